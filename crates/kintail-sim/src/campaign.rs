//! Multi-seed simulation campaigns.
//!
//! Runs the simulator over a range of seeds, checks each run with the
//! oracle, and reports the first failing seed so it can be replayed.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::oracle::{MergeOracle, OracleResult};
use crate::plan::TopologyConfig;
use crate::stream::FaultConfig;
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    pub topology: TopologyConfig,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            seed_range: 0..100,
            topology: TopologyConfig::default(),
            fault: FaultConfig::default(),
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            topology: self.topology,
            fault: self.fault,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.topology.root_shards == 0 {
            bail!("topology.root_shards must be > 0");
        }
        if self.topology.generations == 0 {
            bail!("topology.generations must be > 0");
        }
        if self.fault.max_events_per_fetch == 0 || self.fault.max_events_per_record == 0 {
            bail!("fault.max_events_per_fetch and fault.max_events_per_record must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds whose stream split or merged at least once.
    pub seeds_with_reshards: usize,
    pub records_delivered: u64,
}

impl CampaignReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Pretty JSON for CI artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// One seed's run together with its oracle verdict.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// # Errors
///
/// Returns an error if the config is invalid or a seed's merge run fails.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        seeds_with_reshards: 0,
        records_delivered: 0,
    };

    for seed in config.seed_range.clone() {
        let trace = replay_seed(seed, config)?;
        report.seeds_run += 1;
        report.records_delivered += trace.result.summary.delivered;
        if trace.result.plan.reshard_children() > 0 {
            report.seeds_with_reshards += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(ToString::to_string).collect(),
            });
        }
    }

    info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        resharded = report.seeds_with_reshards,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed and check it.
///
/// # Errors
///
/// Returns an error if the merge run itself fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let result = Simulator::new(config.sim_config_for_seed(seed)).run()?;
    let oracle = MergeOracle::check_all(&result.plan, &result.lost, &result.delivered);
    Ok(DetailedTrace { result, oracle })
}
