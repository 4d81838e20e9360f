//! `kt tail`: follow every shard of a stream as one time-ordered view.

use anyhow::{Context as _, Result};
use clap::Args;
use kintail_core::config::KintailConfig;
use kintail_core::{RunOutcome, ShardId, StartPolicy, StopSignal, StreamMerger};
use tracing::{debug, info};

use crate::aws::AwsCli;
use crate::cmd::OutputArgs;

#[derive(Args, Debug)]
pub struct TailArgs {
    /// Kinesis stream carrying the log subscription.
    pub stream: String,

    /// Where to begin reading existing shards: `earliest` or `latest`.
    #[arg(long, value_name = "POLICY")]
    pub start: Option<StartPolicy>,

    /// Only read these shards (their children are still followed).
    #[arg(long, value_name = "SHARD_ID", num_args = 1..)]
    pub shards: Vec<String>,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn run_tail(args: &TailArgs, config: &KintailConfig, stop: StopSignal) -> Result<()> {
    let mut merger_config = config.tail.merger_config();
    if let Some(start) = args.start {
        merger_config.start_policy = start;
    }
    merger_config.shard_filter = args.shards.iter().map(|s| ShardId::new(s.as_str())).collect();
    debug!(?merger_config, stream = %args.stream, "starting tail");

    let source = AwsCli::new(&config.aws, &args.output.aws);
    let mut merger = StreamMerger::initialize(source, args.stream.clone(), merger_config, stop)?;
    let mut sink = args.output.stdout_sink(&config.output);

    let summary = merger
        .run(&mut sink)
        .with_context(|| format!("Tail of stream '{}' failed", args.stream))?;

    match summary.outcome {
        RunOutcome::Drained => info!(delivered = summary.delivered, "all shards drained"),
        RunOutcome::SinkClosed => debug!("stdout closed"),
        RunOutcome::Interrupted => debug!("interrupted"),
    }
    debug!(
        fetches = summary.buffers.fetches,
        expiries = summary.buffers.cursor_expiries,
        decode_failures = summary.buffers.decode_failures,
        passes = summary.passes,
        lines = sink.written(),
        "tail totals"
    );
    Ok(())
}
