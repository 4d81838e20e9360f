//! `kt cat`: print a log group's events page by page.

use anyhow::{Context as _, Result, bail};
use clap::Args;
use kintail_core::config::KintailConfig;
use kintail_core::{PageOutcome, StopSignal, concat_pages};
use tracing::debug;

use crate::aws::{AwsCli, LogEventsPager, LogQuery};
use crate::cmd::OutputArgs;
use crate::dates::parse_epoch_millis;

#[derive(Args, Debug)]
pub struct CatArgs {
    /// CloudWatch Logs group to read.
    pub log_group: String,

    /// Only these log streams.
    #[arg(short, long, value_name = "NAME", num_args = 1..)]
    pub streams: Vec<String>,

    /// Earliest event time (RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD`, UTC).
    #[arg(short, long, value_name = "DATE", value_parser = parse_epoch_millis)]
    pub begin: Option<i64>,

    /// Latest event time, same forms as `--begin`.
    #[arg(short, long, value_name = "DATE", value_parser = parse_epoch_millis)]
    pub end: Option<i64>,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl CatArgs {
    fn query(&self) -> Result<LogQuery> {
        if matches!((self.begin, self.end), (Some(begin), Some(end)) if begin > end) {
            bail!("--begin must not be later than --end");
        }
        Ok(LogQuery {
            log_group: self.log_group.clone(),
            streams: self.streams.clone(),
            start_ms: self.begin,
            end_ms: self.end,
        })
    }
}

pub fn run_cat(args: &CatArgs, config: &KintailConfig, stop: &StopSignal) -> Result<()> {
    let query = args.query()?;
    debug!(?query, "starting listing");

    let mut pager = LogEventsPager::new(AwsCli::new(&config.aws, &args.output.aws), query);
    let mut sink = args.output.stdout_sink(&config.output);

    let summary = concat_pages(&mut pager, &mut sink, stop)
        .with_context(|| format!("Listing of log group '{}' failed", args.log_group))?;

    if summary.outcome == PageOutcome::RepeatedToken {
        debug!(pages = summary.pages, "listing ended on a repeated token");
    }
    debug!(
        pages = summary.pages,
        delivered = summary.delivered,
        lines = sink.written(),
        "cat totals"
    );
    Ok(())
}
