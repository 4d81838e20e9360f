//! Invariant checks over a merged record sequence.
//!
//! Every planned event not lost to corruption must be delivered exactly
//! once, each shard's events keep their planned order, and the delivered
//! timestamps never go backwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use kintail_core::Record;

use crate::plan::StreamPlan;

/// Outcome of [`MergeOracle::check_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A delivered timestamp is smaller than the one before it.
    OutOfOrder {
        position: usize,
        previous: i64,
        current: i64,
    },
    /// A shard's events came out in a different order than planned.
    ShardOrder {
        shard: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },
    /// Planned, not lost, never delivered.
    Missing { ids: Vec<String> },
    /// Delivered more than once.
    Duplicated { ids: Vec<String> },
    /// Delivered but not part of the plan, or lost to corruption.
    Unexpected { ids: Vec<String> },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder {
                position,
                previous,
                current,
            } => write!(
                f,
                "OutOfOrder: record {position} has timestamp {current} after {previous}"
            ),
            Self::ShardOrder {
                shard,
                expected,
                actual,
            } => write!(
                f,
                "ShardOrder: {shard} delivered {actual:?}, planned {expected:?}"
            ),
            Self::Missing { ids } => write!(f, "Missing: {ids:?}"),
            Self::Duplicated { ids } => write!(f, "Duplicated: {ids:?}"),
            Self::Unexpected { ids } => write!(f, "Unexpected: {ids:?}"),
        }
    }
}

pub struct MergeOracle;

impl MergeOracle {
    /// Run every check. Event ids are carried in [`Record::message`].
    #[must_use]
    pub fn check_all(plan: &StreamPlan, lost: &BTreeSet<String>, delivered: &[Record]) -> OracleResult {
        let mut violations = Vec::new();
        violations.extend(Self::check_order(delivered));
        violations.extend(Self::check_completeness(plan, lost, delivered));
        violations.extend(Self::check_shard_order(plan, lost, delivered));
        OracleResult::from_violations(violations)
    }

    /// Delivered timestamps are non-decreasing.
    #[must_use]
    pub fn check_order(delivered: &[Record]) -> Vec<InvariantViolation> {
        delivered
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[1].timestamp < pair[0].timestamp)
            .map(|(i, pair)| InvariantViolation::OutOfOrder {
                position: i + 1,
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            })
            .collect()
    }

    #[must_use]
    pub fn check_completeness(
        plan: &StreamPlan,
        lost: &BTreeSet<String>,
        delivered: &[Record],
    ) -> Vec<InvariantViolation> {
        let expected: BTreeSet<&str> = plan
            .shards
            .values()
            .flat_map(|s| s.events.iter())
            .map(|e| e.id.as_str())
            .filter(|id| !lost.contains(*id))
            .collect();

        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in delivered {
            *counts.entry(record.message.as_str()).or_default() += 1;
        }

        let mut violations = Vec::new();
        let missing: Vec<String> = expected
            .iter()
            .filter(|id| !counts.contains_key(*id))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            violations.push(InvariantViolation::Missing { ids: missing });
        }
        let duplicated: Vec<String> = counts
            .iter()
            .filter(|(_, n)| **n > 1)
            .map(|(id, _)| (*id).to_string())
            .collect();
        if !duplicated.is_empty() {
            violations.push(InvariantViolation::Duplicated { ids: duplicated });
        }
        let unexpected: Vec<String> = counts
            .keys()
            .filter(|id| !expected.contains(*id))
            .map(ToString::to_string)
            .collect();
        if !unexpected.is_empty() {
            violations.push(InvariantViolation::Unexpected { ids: unexpected });
        }
        violations
    }

    /// Each shard's delivered events appear in planned order.
    #[must_use]
    pub fn check_shard_order(
        plan: &StreamPlan,
        lost: &BTreeSet<String>,
        delivered: &[Record],
    ) -> Vec<InvariantViolation> {
        let mut by_shard: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for record in delivered {
            if let Some(shard) = &record.shard {
                by_shard
                    .entry(shard.as_str())
                    .or_default()
                    .push(record.message.clone());
            }
        }

        plan.shards
            .iter()
            .filter_map(|(id, shard)| {
                let expected: Vec<String> = shard
                    .events
                    .iter()
                    .filter(|e| !lost.contains(&e.id))
                    .map(|e| e.id.clone())
                    .collect();
                let actual = by_shard.remove(id.as_str()).unwrap_or_default();
                (actual != expected).then(|| InvariantViolation::ShardOrder {
                    shard: id.to_string(),
                    expected,
                    actual,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlannedEvent, PlannedShard};
    use kintail_core::{ShardDescriptor, ShardId};

    fn plan() -> StreamPlan {
        let mut plan = StreamPlan::default();
        for (shard, stamps) in [("a", [1, 3]), ("b", [2, 4])] {
            plan.shards.insert(
                ShardId::new(shard),
                PlannedShard {
                    descriptor: ShardDescriptor::root(shard),
                    events: stamps
                        .iter()
                        .enumerate()
                        .map(|(i, &timestamp)| PlannedEvent {
                            id: format!("{shard}/{i}"),
                            timestamp,
                        })
                        .collect(),
                    hidden: false,
                },
            );
        }
        plan
    }

    fn record(shard: &str, i: usize, timestamp: i64) -> Record {
        let mut record = Record::new(timestamp, format!("{shard}/{i}"));
        record.shard = Some(ShardId::new(shard));
        record
    }

    #[test]
    fn correct_merge_passes() {
        let delivered = [record("a", 0, 1), record("b", 0, 2), record("a", 1, 3), record("b", 1, 4)];
        let result = MergeOracle::check_all(&plan(), &BTreeSet::new(), &delivered);
        assert!(result.passed, "{:?}", result.violations);
    }

    #[test]
    fn detects_each_kind_of_violation() {
        let delivered = [record("b", 0, 2), record("a", 0, 1), record("a", 0, 1)];
        let result = MergeOracle::check_all(&plan(), &BTreeSet::new(), &delivered);
        assert!(!result.passed);

        let kinds: Vec<String> = result
            .violations
            .iter()
            .map(|v| v.to_string().split(':').next().unwrap_or_default().to_string())
            .collect();
        assert!(kinds.contains(&"OutOfOrder".to_string()));
        assert!(kinds.contains(&"Missing".to_string()));
        assert!(kinds.contains(&"Duplicated".to_string()));
        assert!(kinds.contains(&"ShardOrder".to_string()));
    }

    #[test]
    fn lost_events_are_not_expected() {
        let lost: BTreeSet<String> = ["a/1".to_string(), "b/1".to_string()].into();
        let delivered = [record("a", 0, 1), record("b", 0, 2)];
        assert!(MergeOracle::check_all(&plan(), &lost, &delivered).passed);

        let with_lost = [record("a", 0, 1), record("b", 0, 2), record("a", 1, 3)];
        let result = MergeOracle::check_all(&plan(), &lost, &with_lost);
        assert!(matches!(
            result.violations.as_slice(),
            [InvariantViolation::Unexpected { .. }, InvariantViolation::ShardOrder { .. }]
        ));
    }
}
