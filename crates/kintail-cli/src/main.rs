#![forbid(unsafe_code)]

mod argfile;
mod aws;
mod cmd;
mod dates;
mod format;
mod interrupt;
mod output;

use clap::{Parser, Subcommand};
use kintail_core::config::{KintailConfig, load_config};
use kintail_core::{TailError, timing};
use std::env;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    name = "kt",
    author,
    version,
    about = "kintail: tail a sharded log stream as one time-ordered view",
    long_about = None,
    after_help = "Arguments of the form @FILE are replaced by the lines of FILE."
)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $KINTAIL_CONFIG, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// AWS credentials profile.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// AWS region.
    #[arg(long, global = true)]
    region: Option<String>,

    /// Emit a source latency report to stderr on exit.
    #[arg(long, global = true)]
    timing: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Command line flags take precedence over the config file.
    fn apply_overrides(&self, config: &mut KintailConfig) {
        if let Some(profile) = &self.profile {
            config.aws.profile = Some(profile.clone());
        }
        if let Some(region) = &self.region {
            config.aws.region = Some(region.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Follow a Kinesis log stream across all of its shards",
        long_about = "Read every shard of a Kinesis stream carrying a CloudWatch Logs \
                      subscription and print the events merged by timestamp. Split and \
                      merged shards are followed into their children.",
        after_help = "EXAMPLES:\n    kt tail app-logs\n    kt tail app-logs --start earliest -j -f '%(level)s %(message)s'"
    )]
    Tail(cmd::tail::TailArgs),

    #[command(
        about = "Print a log group's events",
        long_about = "Page through `aws logs filter-log-events` for one log group and print \
                      each event in the order returned.",
        after_help = "EXAMPLES:\n    kt cat /app/web -b 2024-05-01 -e '2024-05-01 12:00:00'\n    kt cat /app/web -s web-1 web-2 --aws --no-paginate"
    )]
    Cat(cmd::cat::CatArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("KINTAIL_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "kintail=debug,kt=debug,info"
        } else {
            "kintail=info,kt=info,warn"
        })
    });

    let format = env::var("KINTAIL_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = argfile::expand_args(env::args_os())?;
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);

    let timing_enabled = cli.timing || timing::enabled_from_env();
    timing::set_enabled(timing_enabled);

    let mut config = load_config(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    debug!(?config, "effective config");

    let stop = interrupt::install()?;

    let command_result = match &cli.command {
        Commands::Tail(args) => {
            timing::timed("cmd.tail", || cmd::tail::run_tail(args, &config, stop))
        }
        Commands::Cat(args) => {
            timing::timed("cmd.cat", || cmd::cat::run_cat(args, &config, &stop))
        }
    };

    if timing_enabled {
        let report = timing::take_report();
        if report.is_empty() {
            eprintln!("timing report: no samples recorded");
        } else {
            eprintln!("timing report:");
            eprint!("{}", report.render());
        }
    }

    let hint = command_result
        .as_ref()
        .err()
        .and_then(|err| err.downcast_ref::<TailError>())
        .and_then(TailError::hint);
    if let Some(hint) = hint {
        eprintln!("hint: {hint}");
    }

    command_result
}

#[cfg(test)]
mod tests {
    use super::*;
    use kintail_core::StartPolicy;

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::parse_from(["kt", "tail", "app-logs", "--timing", "-v", "--region", "us-east-2"]);
        assert!(cli.timing);
        assert!(cli.verbose);
        assert_eq!(cli.region.as_deref(), Some("us-east-2"));
        assert!(matches!(cli.command, Commands::Tail(ref args) if args.stream == "app-logs"));
    }

    #[test]
    fn tail_flags_parse() {
        let cli = Cli::parse_from([
            "kt",
            "tail",
            "app-logs",
            "--start",
            "trim_horizon",
            "--shards",
            "shardId-000000000001",
            "shardId-000000000002",
            "-j",
            "-f",
            "%(level)s %(message)s",
        ]);
        let Commands::Tail(args) = cli.command else {
            panic!("expected tail");
        };
        assert_eq!(args.start, Some(StartPolicy::Earliest));
        assert_eq!(args.shards.len(), 2);
        assert!(args.output.json);
        assert_eq!(args.output.format.as_deref(), Some("%(level)s %(message)s"));
    }

    #[test]
    fn aws_passthrough_takes_the_rest() {
        let cli = Cli::parse_from(["kt", "cat", "/app", "-b", "2024-05-01", "--aws", "--endpoint-url", "http://localhost:4566"]);
        let Commands::Cat(args) = cli.command else {
            panic!("expected cat");
        };
        assert_eq!(args.begin, Some(1_714_521_600_000));
        assert_eq!(args.output.aws, vec!["--endpoint-url", "http://localhost:4566"]);
    }

    #[test]
    fn bad_date_is_a_usage_error() {
        let err = Cli::try_parse_from(["kt", "cat", "/app", "-b", "someday"]).expect_err("bad date");
        assert!(err.to_string().contains("someday"));
    }

    #[test]
    fn profile_and_region_override_config() {
        let cli = Cli::parse_from(["kt", "--profile", "ops", "cat", "/app"]);
        let mut config = KintailConfig::default();
        config.aws.region = Some("eu-west-1".into());
        cli.apply_overrides(&mut config);
        assert_eq!(config.aws.profile.as_deref(), Some("ops"));
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
    }
}
