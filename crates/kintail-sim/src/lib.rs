//! kintail-sim library.
//!
//! Deterministic simulation of a resharding stream read through the real
//! [`kintail_core::StreamMerger`]. A seed fixes the topology, the events and
//! every injected fault, so a failing seed replays exactly.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod oracle;
pub mod plan;
pub mod rng;
pub mod stream;

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use kintail_core::sink::VecSink;
use kintail_core::{MergerConfig, Record, RetryPolicy, RunSummary, StartPolicy, StopSignal, StreamMerger};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::plan::{StreamPlan, TopologyConfig};
use crate::rng::DeterministicRng;
use crate::stream::{FaultConfig, SimulatedStream, SourceStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub topology: TopologyConfig,
    pub fault: FaultConfig,
}

impl SimulationConfig {
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            topology: TopologyConfig::default(),
            fault: FaultConfig::default(),
        }
    }

    /// Merger settings that tolerate every fault this config can inject.
    #[must_use]
    pub fn merger_config(&self) -> MergerConfig {
        MergerConfig {
            start_policy: StartPolicy::Earliest,
            retry: RetryPolicy {
                max_cursor_expiries: self.fault.max_consecutive_expiries + 1,
                max_empty_polls: self.fault.max_consecutive_empty + 1,
                ..RetryPolicy::immediate()
            },
            idle_wait: Duration::ZERO,
            shard_filter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub plan: StreamPlan,
    pub delivered: Vec<Record>,
    /// Event ids the source corrupted on purpose.
    pub lost: BTreeSet<String>,
    pub summary: RunSummary,
    pub source: SourceStats,
}

pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    #[must_use]
    pub const fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Generate the stream for this seed and merge it to the end.
    ///
    /// # Errors
    ///
    /// Returns an error if the merger fails; the fault bounds in
    /// [`SimulationConfig::merger_config`] mean this indicates a bug.
    pub fn run(&self) -> Result<SimulationResult> {
        let mut rng = DeterministicRng::new(self.config.seed);
        let plan = StreamPlan::generate(&self.config.topology, &mut rng);
        let source = SimulatedStream::new(plan, self.config.fault, rng);

        let mut merger = StreamMerger::initialize(
            source,
            "sim",
            self.config.merger_config(),
            StopSignal::new(),
        )
        .with_context(|| format!("seed {}: initialize failed", self.config.seed))?;

        let mut sink = VecSink::default();
        let summary = merger
            .run(&mut sink)
            .with_context(|| format!("seed {}: run failed", self.config.seed))?;

        let source = merger.into_source();
        debug!(
            seed = self.config.seed,
            delivered = sink.records.len(),
            shards = summary.shards_seen,
            "simulation finished"
        );

        Ok(SimulationResult {
            plan: source.plan().clone(),
            delivered: sink.records,
            lost: source.lost().clone(),
            summary,
            source: source.stats(),
        })
    }
}
