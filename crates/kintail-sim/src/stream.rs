//! In-memory [`ShardSource`] serving a [`StreamPlan`] with injected faults.
//!
//! Cursors are `"<shard>@<position>"` and sequence numbers are the index of
//! the last event a raw record carries, so resolving "after sequence N"
//! resumes at `N + 1`. Nothing expires on its own; expiry, lagging empty
//! batches and corrupt containers are drawn from the RNG.

use std::collections::{BTreeMap, BTreeSet};

use kintail_core::decode::{LogEnvelope, LogEvent, encode_container};
use kintail_core::{
    Cursor, FetchedBatch, RawRecord, SequenceNumber, ShardDescriptor, ShardId, ShardSource,
    SourceError, StartPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::plan::StreamPlan;
use crate::rng::DeterministicRng;

/// Fault injection for the simulated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultConfig {
    pub expire_rate_percent: u8,
    /// At most this many expiries in a row for one shard.
    pub max_consecutive_expiries: u32,
    /// Empty batch that still reports lag.
    pub lagging_empty_rate_percent: u8,
    pub max_consecutive_empty: u32,
    /// Raw record replaced with bytes that do not decode. Never applied to
    /// the last record of a batch.
    pub corrupt_rate_percent: u8,
    /// Events taken per fetch are drawn from `1..=max_events_per_fetch`.
    pub max_events_per_fetch: u64,
    /// Events packed into one raw record are drawn from `1..=max_events_per_record`.
    pub max_events_per_record: u64,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self {
            expire_rate_percent: 10,
            max_consecutive_expiries: 2,
            lagging_empty_rate_percent: 15,
            max_consecutive_empty: 3,
            corrupt_rate_percent: 0,
            max_events_per_fetch: 6,
            max_events_per_record: 3,
        }
    }
}

impl FaultConfig {
    /// No faults, one event per fetch.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            expire_rate_percent: 0,
            max_consecutive_expiries: 0,
            lagging_empty_rate_percent: 0,
            max_consecutive_empty: 0,
            corrupt_rate_percent: 0,
            max_events_per_fetch: 1,
            max_events_per_record: 1,
        }
    }
}

/// What the simulated source did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub describes: u64,
    pub resolves: u64,
    pub fetches: u64,
    pub expiries: u64,
    pub lagging_empty: u64,
    pub corrupt_records: u64,
}

/// Faults served since the shard last returned data.
#[derive(Debug, Clone, Copy, Default)]
struct Streak {
    expiries: u32,
    empty: u32,
}

#[derive(Debug, Clone)]
pub struct SimulatedStream {
    plan: StreamPlan,
    fault: FaultConfig,
    rng: DeterministicRng,
    revealed: BTreeSet<ShardId>,
    streaks: BTreeMap<ShardId, Streak>,
    lost: BTreeSet<String>,
    stats: SourceStats,
}

impl SimulatedStream {
    #[must_use]
    pub fn new(plan: StreamPlan, fault: FaultConfig, rng: DeterministicRng) -> Self {
        Self {
            plan,
            fault,
            rng,
            revealed: BTreeSet::new(),
            streaks: BTreeMap::new(),
            lost: BTreeSet::new(),
            stats: SourceStats::default(),
        }
    }

    #[must_use]
    pub const fn plan(&self) -> &StreamPlan {
        &self.plan
    }

    /// Event ids carried by corrupt raw records; a correct reader skips them.
    #[must_use]
    pub const fn lost(&self) -> &BTreeSet<String> {
        &self.lost
    }

    #[must_use]
    pub const fn stats(&self) -> SourceStats {
        self.stats
    }

    fn parse_cursor(cursor: &Cursor) -> Result<(ShardId, usize), SourceError> {
        cursor
            .as_str()
            .rsplit_once('@')
            .and_then(|(shard, pos)| Some((ShardId::new(shard), pos.parse().ok()?)))
            .ok_or_else(|| SourceError::failed("get-records", format!("malformed cursor {cursor:?}")))
    }

    fn reveal_children_of(&mut self, parent: &ShardId) {
        for (id, shard) in &self.plan.shards {
            if shard.hidden && shard.is_child_of(parent) && self.revealed.insert(id.clone()) {
                trace!(parent = %parent, child = %id, "child shard listed");
            }
        }
    }

    fn raw_record(
        &mut self,
        shard: &ShardId,
        start: usize,
        end: usize,
        may_corrupt: bool,
    ) -> Result<RawRecord, SourceError> {
        let planned = &self.plan.shards[shard].events[start..end];
        let sequence_number = SequenceNumber::new((end - 1).to_string());

        if may_corrupt && self.rng.chance(self.fault.corrupt_rate_percent) {
            self.stats.corrupt_records += 1;
            self.lost.extend(planned.iter().map(|e| e.id.clone()));
            return Ok(RawRecord {
                data: "H4sI!!corrupt!!".to_string(),
                sequence_number,
                partition_key: None,
            });
        }

        let events = planned
            .iter()
            .map(|e| LogEvent {
                id: None,
                timestamp: e.timestamp,
                message: e.id.clone(),
            })
            .collect();
        let data = encode_container(&LogEnvelope::data("/sim", shard.as_str(), events))
            .map_err(|err| SourceError::failed("get-records", err.to_string()))?;
        Ok(RawRecord {
            data,
            sequence_number,
            partition_key: Some(shard.to_string()),
        })
    }
}

impl ShardSource for SimulatedStream {
    fn describe_shards(&mut self, _stream: &str) -> Result<Vec<ShardDescriptor>, SourceError> {
        self.stats.describes += 1;
        Ok(self
            .plan
            .shards
            .iter()
            .filter(|(id, shard)| !shard.hidden || self.revealed.contains(*id))
            .map(|(_, shard)| shard.descriptor.clone())
            .collect())
    }

    fn resolve_cursor(
        &mut self,
        _stream: &str,
        shard: &ShardId,
        policy: StartPolicy,
        after_sequence: Option<&SequenceNumber>,
    ) -> Result<Option<Cursor>, SourceError> {
        self.stats.resolves += 1;
        let Some(planned) = self.plan.shards.get(shard) else {
            return Ok(None);
        };
        let position = match (after_sequence, policy) {
            (Some(seq), _) => {
                let last: usize = seq.as_str().parse().map_err(|_| {
                    SourceError::failed("get-shard-iterator", format!("bad sequence number {seq}"))
                })?;
                last + 1
            }
            (None, StartPolicy::Earliest) => 0,
            (None, StartPolicy::Latest) => planned.events.len(),
        };
        Ok(Some(Cursor::new(format!("{shard}@{position}"))))
    }

    fn fetch_batch(&mut self, cursor: &Cursor) -> Result<FetchedBatch, SourceError> {
        self.stats.fetches += 1;
        let (shard, position) = Self::parse_cursor(cursor)?;
        let Some(total) = self.plan.shards.get(&shard).map(|s| s.events.len()) else {
            return Err(SourceError::failed("get-records", format!("unknown shard {shard}")));
        };
        let mut streak = self.streaks.get(&shard).copied().unwrap_or_default();

        if streak.expiries < self.fault.max_consecutive_expiries
            && self.rng.chance(self.fault.expire_rate_percent)
        {
            streak.expiries += 1;
            self.streaks.insert(shard, streak);
            self.stats.expiries += 1;
            return Err(SourceError::CursorExpired);
        }

        let remaining = total.saturating_sub(position);
        if remaining > 0
            && streak.empty < self.fault.max_consecutive_empty
            && self.rng.chance(self.fault.lagging_empty_rate_percent)
        {
            streak.empty += 1;
            self.streaks.insert(shard, streak);
            self.stats.lagging_empty += 1;
            return Ok(FetchedBatch {
                records: Vec::new(),
                next_cursor: Some(cursor.clone()),
                millis_behind_latest: 1_000,
            });
        }
        self.streaks.insert(shard.clone(), Streak::default());

        let wanted = usize::try_from(self.rng.between(1, self.fault.max_events_per_fetch.max(1)))
            .unwrap_or(1);
        let end = position + wanted.min(remaining);

        let mut records = Vec::new();
        let mut start = position;
        while start < end {
            let per_record = usize::try_from(self.rng.between(1, self.fault.max_events_per_record.max(1)))
                .unwrap_or(1);
            let stop = (start + per_record).min(end);
            // The last record of a batch always decodes, so a non-empty
            // batch never looks like an idle poll to the reader.
            records.push(self.raw_record(&shard, start, stop, stop < end)?);
            start = stop;
        }

        let closed = end >= total;
        if closed {
            self.reveal_children_of(&shard);
        }
        let behind = u64::try_from(total - end).unwrap_or(u64::MAX);

        Ok(FetchedBatch {
            records,
            next_cursor: (!closed).then(|| Cursor::new(format!("{shard}@{end}"))),
            millis_behind_latest: behind.saturating_mul(100),
        })
    }
}
