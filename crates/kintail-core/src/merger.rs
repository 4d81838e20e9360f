//! Greedy timestamp-ordered merge across the live shards of a stream.
//!
//! Each pass works from a snapshot of the active set's keys (ascending shard
//! id). It peeks every buffer, collecting removals (CLOSED and drained), at
//! most one adoption (PARENT and drained, which also ends the pass), and the
//! candidate with the smallest head timestamp. Changes are applied after the
//! pass, then the candidate's head is popped and delivered.
//!
//! Equal timestamps go to the smallest shard id. A buffer's head can only
//! change when it is refilled, and refills only happen when its queue is
//! empty, so every head compared in a pass is stable until it is popped.
//!
//! The merge is greedy: a shard that is lagging and returns nothing during a
//! pass does not hold back the others.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::buffer::{BufferStats, RetryPolicy, ShardBuffer, ShardState};
use crate::error::TailError;
use crate::record::{ShardId, StartPolicy};
use crate::signal::StopSignal;
use crate::sink::{OutputSink, SinkError};
use crate::source::ShardSource;
use crate::timing;

/// Tunables for one merge run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergerConfig {
    /// Where shards listed at startup begin reading.
    pub start_policy: StartPolicy,
    pub retry: RetryPolicy,
    /// Pause after a pass that produced nothing and changed nothing.
    pub idle_wait: Duration,
    /// Restrict startup to these shards; empty means every shard.
    pub shard_filter: Vec<ShardId>,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            start_policy: StartPolicy::Latest,
            retry: RetryPolicy::default(),
            idle_wait: Duration::from_millis(500),
            shard_filter: Vec::new(),
        }
    }
}

/// Why [`StreamMerger::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every shard closed and drained.
    Drained,
    /// The output consumer went away.
    SinkClosed,
    /// A stop was requested.
    Interrupted,
}

/// Totals for a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub delivered: u64,
    pub passes: u64,
    /// Distinct shards that were ever tracked.
    pub shards_seen: usize,
    pub buffers: BufferStats,
}

#[derive(Debug, Default)]
struct Pass {
    removals: Vec<ShardId>,
    adoption: Option<(ShardId, Vec<ShardId>)>,
    candidate: Option<(i64, ShardId)>,
    /// Some buffer left OPEN while being peeked.
    state_changed: bool,
}

/// Owner of the active set of shard buffers.
#[derive(Debug)]
pub struct StreamMerger<S> {
    source: S,
    stream: String,
    config: MergerConfig,
    stop: StopSignal,
    active: BTreeMap<ShardId, ShardBuffer>,
    /// Every shard ever tracked; children already seen are never re-adopted.
    seen: BTreeSet<ShardId>,
    retired: BufferStats,
}

impl<S: ShardSource> StreamMerger<S> {
    /// List the stream's shards and open one buffer per shard.
    ///
    /// Each buffer gets an initial cursor from `config.start_policy` and one
    /// refill. Shards for which the source hands out no cursor are skipped.
    ///
    /// A stop request ends startup early with the shards opened so far, and
    /// [`Self::run`] then reports [`RunOutcome::Interrupted`].
    ///
    /// # Errors
    ///
    /// Fails if listing shards, resolving a cursor, or the first refill fails
    /// before any stop request.
    pub fn initialize(
        mut source: S,
        stream: impl Into<String>,
        config: MergerConfig,
        stop: StopSignal,
    ) -> Result<Self, TailError> {
        let stream = stream.into();
        let shards = match timing::timed("source.describe_shards", || source.describe_shards(&stream)) {
            Ok(shards) => shards,
            Err(err) if stop.is_triggered() => {
                debug!("listing shards failed after stop request: {err}");
                Vec::new()
            }
            Err(err) => {
                let (request, detail) = err.into_context();
                return Err(TailError::Describe {
                    stream,
                    request,
                    detail,
                });
            }
        };

        let wanted: BTreeSet<&ShardId> = config.shard_filter.iter().collect();
        for missing in config
            .shard_filter
            .iter()
            .filter(|id| !shards.iter().any(|s| &s.shard_id == *id))
        {
            info!(shard = %missing, stream = %stream, "requested shard not found in stream");
        }

        let mut active = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for descriptor in shards {
            if stop.is_triggered() {
                debug!(opened = active.len(), "stop requested during startup");
                break;
            }
            let shard = descriptor.shard_id;
            if !wanted.is_empty() && !wanted.contains(&shard) {
                continue;
            }

            let resolved = timing::timed("source.resolve_cursor", || {
                source.resolve_cursor(&stream, &shard, config.start_policy, None)
            });
            let cursor = match resolved {
                Ok(cursor) => cursor,
                Err(err) if stop.is_triggered() => {
                    debug!(shard = %shard, "resolving cursor failed after stop request: {err}");
                    break;
                }
                Err(err) => {
                    let (request, detail) = err.into_context();
                    return Err(TailError::ResolveCursor {
                        stream,
                        shard,
                        request,
                        detail,
                    });
                }
            };

            let Some(cursor) = cursor else {
                debug!(shard = %shard, "no initial cursor, skipping shard");
                continue;
            };
            debug!(shard = %shard, cursor = cursor.as_str(), "opened shard");

            let mut buffer =
                ShardBuffer::new(stream.clone(), shard.clone(), Some(cursor), config.start_policy)
                    .with_stop(stop.clone());
            match buffer.ensure_head(&mut source, &config.retry) {
                Ok(_) => {}
                Err(err) if stop.is_triggered() => {
                    debug!(shard = %shard, "first refill failed after stop request: {err}");
                    break;
                }
                Err(err) => return Err(err),
            }
            seen.insert(shard.clone());
            active.insert(shard, buffer);
        }

        info!(
            stream = %stream,
            shards = active.len(),
            policy = %config.start_policy,
            "tailing stream"
        );

        Ok(Self {
            source,
            stream,
            config,
            stop,
            active,
            seen,
            retired: BufferStats::default(),
        })
    }

    /// Shard ids currently in the active set, ascending.
    #[must_use]
    pub fn active_shards(&self) -> Vec<ShardId> {
        self.active.keys().cloned().collect()
    }

    #[must_use]
    pub fn buffer(&self, shard: &ShardId) -> Option<&ShardBuffer> {
        self.active.get(shard)
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Merge and deliver records until the active set drains, the sink
    /// closes, or a stop is requested.
    ///
    /// # Errors
    ///
    /// Fatal source errors and sink I/O failures. A source failure observed
    /// after a stop request is reported as [`RunOutcome::Interrupted`].
    pub fn run<K>(&mut self, sink: &mut K) -> Result<RunSummary, TailError>
    where
        K: OutputSink + ?Sized,
    {
        let mut delivered = 0_u64;
        let mut passes = 0_u64;

        let outcome = loop {
            if self.stop.is_triggered() {
                break RunOutcome::Interrupted;
            }
            if self.active.is_empty() {
                break RunOutcome::Drained;
            }

            passes += 1;
            let pass = match self.select() {
                Ok(pass) => pass,
                Err(err) if self.stop.is_triggered() => {
                    debug!("source failed after stop request: {err}");
                    break RunOutcome::Interrupted;
                }
                Err(err) => return Err(err),
            };
            let changed = self.apply(&pass) || pass.state_changed;

            let Some((timestamp, shard)) = pass.candidate else {
                if !changed && !self.active.is_empty() {
                    self.idle();
                }
                continue;
            };

            let Some(record) = self.active.get_mut(&shard).and_then(ShardBuffer::pop) else {
                continue;
            };
            trace!(shard = %shard, timestamp, "delivering record");
            match sink.deliver(record) {
                Ok(()) => delivered += 1,
                Err(SinkError::Closed) => {
                    debug!("output closed, stopping");
                    break RunOutcome::SinkClosed;
                }
                Err(SinkError::Io(err)) => return Err(TailError::Sink(err)),
            }
        };

        let mut buffers = self.retired;
        for buffer in self.active.values() {
            add_stats(&mut buffers, buffer.stats());
        }

        info!(
            stream = %self.stream,
            ?outcome,
            delivered,
            shards = self.seen.len(),
            "tail finished"
        );

        Ok(RunSummary {
            outcome,
            delivered,
            passes,
            shards_seen: self.seen.len(),
            buffers,
        })
    }

    /// One selection pass over a snapshot of the active set.
    fn select(&mut self) -> Result<Pass, TailError> {
        let snapshot: Vec<ShardId> = self.active.keys().cloned().collect();
        let mut pass = Pass::default();

        for shard in snapshot {
            let Some(buffer) = self.active.get_mut(&shard) else {
                continue;
            };

            if buffer.is_empty() {
                match buffer.state() {
                    ShardState::Closed => {
                        pass.removals.push(shard);
                        continue;
                    }
                    ShardState::Parent { children } => {
                        pass.adoption = Some((shard, children.clone()));
                        pass.candidate = None;
                        break;
                    }
                    ShardState::Open => {}
                }
            }

            let head = buffer.peek(&mut self.source, &self.config.retry)?;
            let Some(head) = head else {
                pass.state_changed |= !buffer.state().is_open();
                continue;
            };
            let better = pass
                .candidate
                .as_ref()
                .is_none_or(|(best, _)| head.timestamp < *best);
            if better {
                pass.candidate = Some((head.timestamp, shard));
            }
        }

        Ok(pass)
    }

    /// Apply removals and adoption. Returns whether the active set changed.
    fn apply(&mut self, pass: &Pass) -> bool {
        let mut changed = false;

        for shard in &pass.removals {
            if let Some(buffer) = self.active.remove(shard) {
                debug!(shard = %shard, "shard drained, removing");
                add_stats(&mut self.retired, buffer.stats());
                changed = true;
            }
        }

        if let Some((parent, children)) = &pass.adoption {
            if let Some(buffer) = self.active.remove(parent) {
                add_stats(&mut self.retired, buffer.stats());
                changed = true;
            }
            for child in children {
                if !self.seen.insert(child.clone()) {
                    debug!(parent = %parent, child = %child, "child already tracked");
                    continue;
                }
                debug!(parent = %parent, child = %child, "adopting child shard");
                // A child's whole content follows the parent's close point.
                let buffer = ShardBuffer::new(
                    self.stream.clone(),
                    child.clone(),
                    None,
                    StartPolicy::Earliest,
                )
                .with_stop(self.stop.clone());
                self.active.insert(child.clone(), buffer);
            }
        }

        changed
    }

    fn idle(&self) {
        self.stop.pause(self.config.idle_wait);
    }
}

fn add_stats(total: &mut BufferStats, more: BufferStats) {
    total.fetches += more.fetches;
    total.records += more.records;
    total.cursor_expiries += more.cursor_expiries;
    total.decode_failures += more.decode_failures;
}
