#![allow(dead_code)]

//! In-memory shard source with a fixed script of batches per shard.
//!
//! Cursors are `"<shard>#<batch index>"`; sequence numbers are
//! `"<shard>-<batch index>"`. A shard is closed once its last batch has been
//! fetched. Hidden children only show up in the topology after their parent
//! has been read to the end.

use std::collections::{BTreeMap, BTreeSet};

use kintail_core::decode::{LogEnvelope, LogEvent, encode_container};
use kintail_core::{
    Cursor, FetchedBatch, RawRecord, SequenceNumber, ShardDescriptor, ShardId, ShardSource,
    SourceError, StartPolicy, StopSignal,
};

#[derive(Debug, Clone)]
struct Shard {
    descriptor: ShardDescriptor,
    batches: Vec<Vec<i64>>,
    hidden: bool,
}

#[derive(Debug, Default)]
pub struct ScriptedStream {
    shards: BTreeMap<ShardId, Shard>,
    expire: BTreeSet<(ShardId, usize)>,
    fail: BTreeSet<(ShardId, usize)>,
    stop_on_failure: Option<StopSignal>,
    pub fetches: Vec<ShardId>,
    pub resolves: Vec<(ShardId, StartPolicy, Option<String>)>,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Root shard, listed from the start.
    pub fn shard(self, id: &str, batches: &[&[i64]]) -> Self {
        self.insert(ShardDescriptor::root(id), batches, false)
    }

    /// Child listed only once `parent` has been read to the end.
    pub fn child(self, id: &str, parent: &str, batches: &[&[i64]]) -> Self {
        self.insert(ShardDescriptor::child_of(id, parent), batches, true)
    }

    /// Child of `parent` that is already listed at startup.
    pub fn visible_child(self, id: &str, parent: &str, batches: &[&[i64]]) -> Self {
        self.insert(ShardDescriptor::child_of(id, parent), batches, false)
    }

    /// The first fetch of batch `index` reports an expired cursor.
    pub fn expire_once(mut self, id: &str, index: usize) -> Self {
        self.expire.insert((ShardId::new(id), index));
        self
    }

    /// Fetching batch `index` fails outright.
    pub fn fail_at(mut self, id: &str, index: usize) -> Self {
        self.fail.insert((ShardId::new(id), index));
        self
    }

    /// Trigger `stop` just before a `fail_at` fetch fails, as when Ctrl-C
    /// kills the in-flight request.
    pub fn stop_on_failure(mut self, stop: StopSignal) -> Self {
        self.stop_on_failure = Some(stop);
        self
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        self.fetches.iter().filter(|s| s.as_str() == id).count()
    }

    fn insert(mut self, descriptor: ShardDescriptor, batches: &[&[i64]], hidden: bool) -> Self {
        let shard = Shard {
            descriptor,
            batches: batches.iter().map(|b| b.to_vec()).collect(),
            hidden,
        };
        self.shards.insert(shard.descriptor.shard_id.clone(), shard);
        self
    }

    fn parse(cursor: &Cursor) -> (ShardId, usize) {
        let (shard, index) = cursor.as_str().rsplit_once('#').expect("scripted cursor");
        (ShardId::new(shard), index.parse().expect("scripted index"))
    }
}

/// Message text used for event `n` of batch `index` in `shard`.
pub fn message(shard: &str, index: usize, n: usize) -> String {
    format!("{shard}:{index}:{n}")
}

impl ShardSource for ScriptedStream {
    fn describe_shards(&mut self, _stream: &str) -> Result<Vec<ShardDescriptor>, SourceError> {
        Ok(self
            .shards
            .values()
            .filter(|s| !s.hidden)
            .map(|s| s.descriptor.clone())
            .collect())
    }

    fn resolve_cursor(
        &mut self,
        _stream: &str,
        shard: &ShardId,
        policy: StartPolicy,
        after_sequence: Option<&SequenceNumber>,
    ) -> Result<Option<Cursor>, SourceError> {
        self.resolves.push((
            shard.clone(),
            policy,
            after_sequence.map(|s| s.as_str().to_string()),
        ));
        let Some(script) = self.shards.get(shard) else {
            return Ok(None);
        };
        let index = match (after_sequence, policy) {
            (Some(seq), _) => {
                let (_, index) = seq.as_str().rsplit_once('-').expect("scripted sequence");
                index.parse::<usize>().expect("scripted index") + 1
            }
            (None, StartPolicy::Earliest) => 0,
            (None, StartPolicy::Latest) => script.batches.len(),
        };
        Ok(Some(Cursor::new(format!("{shard}#{index}"))))
    }

    fn fetch_batch(&mut self, cursor: &Cursor) -> Result<FetchedBatch, SourceError> {
        let (shard, index) = Self::parse(cursor);
        self.fetches.push(shard.clone());

        if self.expire.remove(&(shard.clone(), index)) {
            return Err(SourceError::CursorExpired);
        }
        if self.fail.contains(&(shard.clone(), index)) {
            if let Some(stop) = &self.stop_on_failure {
                stop.trigger();
            }
            return Err(SourceError::Failed {
                request: format!("get-records {cursor:?}"),
                status: Some(255),
                detail: "InternalFailure".to_string(),
            });
        }

        let Some(script) = self.shards.get(&shard) else {
            return Err(SourceError::failed("get-records", "unknown shard"));
        };
        let timestamps = script.batches.get(index).cloned().unwrap_or_default();
        let last = index + 1 >= script.batches.len();

        let records = if timestamps.is_empty() {
            Vec::new()
        } else {
            let events = timestamps
                .iter()
                .enumerate()
                .map(|(n, &timestamp)| LogEvent {
                    id: None,
                    timestamp,
                    message: message(shard.as_str(), index, n),
                })
                .collect();
            let data = encode_container(&LogEnvelope::data("/test", shard.as_str(), events))
                .expect("encode");
            vec![RawRecord {
                data,
                sequence_number: SequenceNumber::new(format!("{shard}-{index}")),
                partition_key: None,
            }]
        };

        if last {
            for child in self.shards.values_mut() {
                let parents = [
                    child.descriptor.parent_shard_id.as_ref(),
                    child.descriptor.adjacent_parent_shard_id.as_ref(),
                ];
                if parents.contains(&Some(&shard)) {
                    child.hidden = false;
                }
            }
        }

        Ok(FetchedBatch {
            records,
            next_cursor: (!last).then(|| Cursor::new(format!("{shard}#{}", index + 1))),
            millis_behind_latest: 0,
        })
    }
}
