//! Seeded stream topology: shards, their events and reshard lineage.
//!
//! Time is cut into generations of [`GENERATION_SPAN_MS`]. Every open shard
//! receives events inside the current span; between generations each open
//! shard may split in two, merge with its neighbour, or carry on. A closed
//! shard's events all fall strictly before its children's.

use std::collections::BTreeMap;

use kintail_core::{ShardDescriptor, ShardId};
use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

pub const GENERATION_SPAN_MS: i64 = 1_000;
const BASE_TIMESTAMP_MS: i64 = 1_700_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    pub root_shards: usize,
    pub generations: u32,
    /// Upper bound on events each open shard receives per generation.
    pub max_events_per_generation: u64,
    pub split_rate_percent: u8,
    pub merge_rate_percent: u8,
    /// Chance a new child stays out of the shard listing until a parent of
    /// it has been read to the end.
    pub hide_children_percent: u8,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            root_shards: 3,
            generations: 3,
            max_events_per_generation: 12,
            split_rate_percent: 25,
            merge_rate_percent: 15,
            hide_children_percent: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedEvent {
    /// Unique across the stream; used as the event message.
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedShard {
    pub descriptor: ShardDescriptor,
    /// Non-decreasing timestamps.
    pub events: Vec<PlannedEvent>,
    pub hidden: bool,
}

impl PlannedShard {
    fn parents(&self) -> impl Iterator<Item = &ShardId> {
        self.descriptor
            .parent_shard_id
            .iter()
            .chain(self.descriptor.adjacent_parent_shard_id.iter())
    }

    #[must_use]
    pub fn is_child_of(&self, parent: &ShardId) -> bool {
        self.parents().any(|p| p == parent)
    }
}

/// Complete, fixed content of one simulated stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPlan {
    pub shards: BTreeMap<ShardId, PlannedShard>,
}

impl StreamPlan {
    #[must_use]
    pub fn generate(config: &TopologyConfig, rng: &mut DeterministicRng) -> Self {
        let mut plan = Self::default();
        let mut next_id = 0_u64;
        let mut open: Vec<ShardId> = (0..config.root_shards)
            .map(|_| plan.add(ShardDescriptor::root(fresh_id(&mut next_id)), false))
            .collect();

        for generation in 0..config.generations {
            let start = BASE_TIMESTAMP_MS + i64::from(generation) * GENERATION_SPAN_MS;
            for shard in &open {
                let count = rng.below(config.max_events_per_generation + 1);
                let mut stamps: Vec<i64> = (0..count)
                    .map(|_| {
                        let offset = rng.below(GENERATION_SPAN_MS.unsigned_abs());
                        start + i64::try_from(offset).unwrap_or_default()
                    })
                    .collect();
                stamps.sort_unstable();
                if let Some(planned) = plan.shards.get_mut(shard) {
                    for timestamp in stamps {
                        let id = format!("{shard}/{}", planned.events.len());
                        planned.events.push(PlannedEvent { id, timestamp });
                    }
                }
            }

            if generation + 1 == config.generations {
                break;
            }

            let mut next_open = Vec::with_capacity(open.len() + 1);
            let mut i = 0;
            while i < open.len() {
                let shard = open[i].clone();
                if rng.chance(config.split_rate_percent) {
                    for _ in 0..2 {
                        let hidden = rng.chance(config.hide_children_percent);
                        let child = ShardDescriptor::child_of(fresh_id(&mut next_id), shard.clone());
                        next_open.push(plan.add(child, hidden));
                    }
                    i += 1;
                } else if i + 1 < open.len() && rng.chance(config.merge_rate_percent) {
                    let hidden = rng.chance(config.hide_children_percent);
                    let mut child = ShardDescriptor::child_of(fresh_id(&mut next_id), shard);
                    child.adjacent_parent_shard_id = Some(open[i + 1].clone());
                    next_open.push(plan.add(child, hidden));
                    i += 2;
                } else {
                    next_open.push(shard);
                    i += 1;
                }
            }
            open = next_open;
        }

        plan
    }

    fn add(&mut self, descriptor: ShardDescriptor, hidden: bool) -> ShardId {
        let id = descriptor.shard_id.clone();
        self.shards.insert(
            id.clone(),
            PlannedShard {
                descriptor,
                events: Vec::new(),
                hidden,
            },
        );
        id
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.shards.values().map(|s| s.events.len()).sum()
    }

    /// Shards created by a split or merge.
    #[must_use]
    pub fn reshard_children(&self) -> usize {
        self.shards
            .values()
            .filter(|s| s.descriptor.parent_shard_id.is_some())
            .count()
    }
}

fn fresh_id(next: &mut u64) -> ShardId {
    let id = ShardId::new(format!("shardId-{next:012}"));
    *next += 1;
    id
}
