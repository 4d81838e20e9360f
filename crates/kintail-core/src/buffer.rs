//! Per-shard buffering: cursor lifecycle, pending records, shard state.
//!
//! # State machine
//!
//! ```text
//!            fetch returned a continuation cursor
//!              ┌──────┐
//!              ▼      │
//!           ┌──────┐──┘   no cursor, children found    ┌──────────┐
//!           │ OPEN │ ───────────────────────────────▶ │  PARENT  │
//!           └──────┘                                  └──────────┘
//!              │       no cursor, no children         ┌──────────┐
//!              └────────────────────────────────────▶ │  CLOSED  │
//!                                                     └──────────┘
//! ```
//!
//! PARENT and CLOSED are terminal: no further fetches happen, the buffer only
//! drains. The merger adopts a PARENT's children once it is empty.
//!
//! # Invariants
//!
//! - Pending records keep source delivery order.
//! - A buffer never re-enters OPEN after leaving it.
//! - Children are recorded once, on the OPEN → PARENT transition.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::decode::decode_container;
use crate::error::TailError;
use crate::record::{Cursor, Record, SequenceNumber, ShardId, StartPolicy};
use crate::signal::StopSignal;
use crate::source::{FetchedBatch, ShardLineage, ShardSource, SourceError};
use crate::timing;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Lifecycle state of one shard buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardState {
    /// Still readable; fetches may return more records.
    Open,
    /// Closed by a reshard; reading continues in `children` once drained.
    Parent { children: Vec<ShardId> },
    /// Closed with no successors.
    Closed,
}

impl ShardState {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Parent { .. } => "PARENT",
            Self::Closed => "CLOSED",
        }
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Validate and perform a transition for `shard`.
    ///
    /// Only OPEN → OPEN, OPEN → PARENT and OPEN → CLOSED are allowed.
    ///
    /// # Errors
    ///
    /// Returns [`TailError::InvalidTransition`] for any other pair.
    pub fn transition(self, shard: &ShardId, next: Self) -> Result<Self, TailError> {
        match (&self, &next) {
            (Self::Open, _) => Ok(next),
            _ => Err(TailError::InvalidTransition {
                shard: shard.clone(),
                from: self.name(),
                to: next.name(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Bounds on the local retry loops inside [`ShardBuffer::ensure_head`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive cursor expiries tolerated before the run fails.
    pub max_cursor_expiries: u32,
    /// Empty-but-lagging fetches retried before reporting "empty for now".
    pub max_empty_polls: u32,
    pub poll_backoff_initial: Duration,
    pub poll_backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_cursor_expiries: 5,
            max_empty_polls: 10,
            poll_backoff_initial: Duration::from_millis(100),
            poll_backoff_max: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default bounds and no sleeping, for tests and simulation.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            poll_backoff_initial: Duration::ZERO,
            poll_backoff_max: Duration::ZERO,
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.poll_backoff_initial
            .saturating_mul(factor)
            .min(self.poll_backoff_max)
    }
}

/// Per-buffer counters surfaced in the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub fetches: u64,
    pub records: u64,
    pub cursor_expiries: u64,
    pub decode_failures: u64,
}

// ---------------------------------------------------------------------------
// ShardBuffer
// ---------------------------------------------------------------------------

/// Buffered reader over one shard.
#[derive(Debug)]
pub struct ShardBuffer {
    stream: String,
    shard: ShardId,
    start_policy: StartPolicy,
    cursor: Option<Cursor>,
    state: ShardState,
    pending: VecDeque<Record>,
    last_sequence: Option<SequenceNumber>,
    stats: BufferStats,
    /// Cuts the empty-poll backoff short.
    stop: StopSignal,
}

impl ShardBuffer {
    /// Create an OPEN buffer. A `None` cursor is resolved on first refill
    /// using `start_policy`.
    #[must_use]
    pub fn new(
        stream: impl Into<String>,
        shard: ShardId,
        cursor: Option<Cursor>,
        start_policy: StartPolicy,
    ) -> Self {
        Self {
            stream: stream.into(),
            shard,
            start_policy,
            cursor,
            state: ShardState::Open,
            pending: VecDeque::new(),
            last_sequence: None,
            stats: BufferStats::default(),
            stop: StopSignal::new(),
        }
    }

    /// Stop polling a lagging shard as soon as `stop` is triggered.
    #[must_use]
    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[must_use]
    pub const fn shard(&self) -> &ShardId {
        &self.shard
    }

    #[must_use]
    pub const fn state(&self) -> &ShardState {
        &self.state
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub const fn last_sequence(&self) -> Option<&SequenceNumber> {
        self.last_sequence.as_ref()
    }

    #[must_use]
    pub const fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    #[must_use]
    pub const fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Children recorded on the OPEN → PARENT transition.
    #[must_use]
    pub fn children(&self) -> &[ShardId] {
        match &self.state {
            ShardState::Parent { children } => children,
            ShardState::Open | ShardState::Closed => &[],
        }
    }

    /// Make sure a head record is pending, unless the shard is exhausted
    /// for now. Returns `true` if the queue is still empty afterwards.
    ///
    /// An empty result with the buffer still OPEN is transient: the shard
    /// may yield records on a later call. A stop request ends the empty-poll
    /// backoff early in the same way.
    ///
    /// # Errors
    ///
    /// Fatal fetch/resolve failures, and cursor expiries beyond
    /// [`RetryPolicy::max_cursor_expiries`].
    pub fn ensure_head<S>(&mut self, source: &mut S, retry: &RetryPolicy) -> Result<bool, TailError>
    where
        S: ShardSource + ?Sized,
    {
        let mut expiries = 0_u32;
        let mut empty_polls = 0_u32;

        loop {
            if !self.state.is_open() {
                return Ok(self.pending.is_empty());
            }

            let Some(cursor) = self.cursor.clone() else {
                match self.resolve_cursor(source)? {
                    Some(cursor) => {
                        self.cursor = Some(cursor);
                        continue;
                    }
                    None => {
                        debug!(shard = %self.shard, "no cursor available, treating shard as closed");
                        self.close(source)?;
                        return Ok(self.pending.is_empty());
                    }
                }
            };

            self.stats.fetches += 1;
            let fetched = timing::timed("source.fetch_batch", || source.fetch_batch(&cursor));
            let batch = match fetched {
                Ok(batch) => batch,
                Err(SourceError::CursorExpired) => {
                    expiries += 1;
                    self.stats.cursor_expiries += 1;
                    if expiries > retry.max_cursor_expiries {
                        return Err(TailError::CursorRetriesExhausted {
                            stream: self.stream.clone(),
                            shard: self.shard.clone(),
                            attempts: expiries,
                        });
                    }
                    debug!(
                        shard = %self.shard,
                        attempt = expiries,
                        after = ?self.last_sequence,
                        "cursor expired, re-resolving"
                    );
                    self.cursor = None;
                    continue;
                }
                Err(err) => {
                    let (request, detail) = err.into_context();
                    return Err(TailError::Fetch {
                        stream: self.stream.clone(),
                        shard: self.shard.clone(),
                        request,
                        detail,
                    });
                }
            };

            let lag = batch.millis_behind_latest;
            let has_next = batch.next_cursor.is_some();
            self.absorb(batch);

            if has_next {
                self.state = std::mem::replace(&mut self.state, ShardState::Closed)
                    .transition(&self.shard, ShardState::Open)?;

                if self.pending.is_empty() && lag > 0 {
                    if empty_polls >= retry.max_empty_polls {
                        debug!(shard = %self.shard, lag, "still behind after empty polls, yielding");
                        return Ok(true);
                    }
                    let wait = retry.backoff(empty_polls);
                    empty_polls += 1;
                    trace!(shard = %self.shard, lag, ?wait, "empty batch while behind, polling again");
                    if self.stop.pause(wait) {
                        debug!(shard = %self.shard, lag, "stop requested while behind, yielding");
                        return Ok(true);
                    }
                    continue;
                }
                return Ok(self.pending.is_empty());
            }

            self.close(source)?;
            return Ok(self.pending.is_empty());
        }
    }

    /// Earliest pending record, refilling once if the queue is empty.
    ///
    /// # Errors
    ///
    /// Propagates fatal errors from [`Self::ensure_head`].
    pub fn peek<S>(&mut self, source: &mut S, retry: &RetryPolicy) -> Result<Option<&Record>, TailError>
    where
        S: ShardSource + ?Sized,
    {
        if self.pending.is_empty() {
            self.ensure_head(source, retry)?;
        }
        Ok(self.pending.front())
    }

    /// Remove the earliest pending record. Call right after a `Some` peek.
    pub fn pop(&mut self) -> Option<Record> {
        self.pending.pop_front()
    }

    fn resolve_cursor<S>(&self, source: &mut S) -> Result<Option<Cursor>, TailError>
    where
        S: ShardSource + ?Sized,
    {
        let after = self.last_sequence.as_ref();
        debug!(
            shard = %self.shard,
            policy = %self.start_policy,
            after = after.map(SequenceNumber::as_str),
            "resolving cursor"
        );
        timing::timed("source.resolve_cursor", || {
            source.resolve_cursor(&self.stream, &self.shard, self.start_policy, after)
        })
        .map_err(|err| {
            let (request, detail) = err.into_context();
            TailError::ResolveCursor {
                stream: self.stream.clone(),
                shard: self.shard.clone(),
                request,
                detail,
            }
        })
    }

    /// Decode a fetched batch into the pending queue and advance position.
    fn absorb(&mut self, batch: FetchedBatch) {
        if let Some(last) = batch.records.last() {
            self.last_sequence = Some(last.sequence_number.clone());
        }

        for raw in &batch.records {
            match decode_container(&raw.data) {
                Ok(records) => {
                    self.stats.records += records.len() as u64;
                    self.pending.extend(records.into_iter().map(|mut record| {
                        record.shard = Some(self.shard.clone());
                        record
                    }));
                }
                Err(err) => {
                    self.stats.decode_failures += 1;
                    warn!(
                        shard = %self.shard,
                        stream = %self.stream,
                        sequence = %raw.sequence_number,
                        code = %err.code(),
                        "dropping undecodable record: {err}"
                    );
                }
            }
        }

        trace!(
            shard = %self.shard,
            raw = batch.records.len(),
            pending = self.pending.len(),
            lag = batch.millis_behind_latest,
            "absorbed batch"
        );
        self.cursor = batch.next_cursor;
    }

    /// Shard yielded no continuation: consult the topology for successors.
    fn close<S>(&mut self, source: &mut S) -> Result<(), TailError>
    where
        S: ShardSource + ?Sized,
    {
        self.cursor = None;
        let shards = timing::timed("source.describe_shards", || {
            source.describe_shards(&self.stream)
        })
        .map_err(|err| {
            let (request, detail) = err.into_context();
            TailError::Describe {
                stream: self.stream.clone(),
                request,
                detail,
            }
        })?;

        let children = ShardLineage::from_descriptors(&shards).children_of(&self.shard);
        let next = if children.is_empty() {
            debug!(shard = %self.shard, "shard closed");
            ShardState::Closed
        } else {
            debug!(shard = %self.shard, ?children, "shard closed by reshard");
            ShardState::Parent { children }
        };
        self.state = std::mem::replace(&mut self.state, ShardState::Closed)
            .transition(&self.shard, next)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{LogEnvelope, LogEvent, encode_container};
    use crate::source::{RawRecord, ShardDescriptor};
    use std::collections::VecDeque;

    /// Scripted source: fetch responses are popped in order.
    #[derive(Default)]
    struct Scripted {
        shards: Vec<ShardDescriptor>,
        fetches: VecDeque<Result<FetchedBatch, SourceError>>,
        resolves: Vec<(StartPolicy, Option<String>)>,
        describes: usize,
        next_cursor: usize,
    }

    impl ShardSource for Scripted {
        fn describe_shards(&mut self, _stream: &str) -> Result<Vec<ShardDescriptor>, SourceError> {
            self.describes += 1;
            Ok(self.shards.clone())
        }

        fn resolve_cursor(
            &mut self,
            _stream: &str,
            _shard: &ShardId,
            policy: StartPolicy,
            after_sequence: Option<&SequenceNumber>,
        ) -> Result<Option<Cursor>, SourceError> {
            self.resolves
                .push((policy, after_sequence.map(|s| s.as_str().to_string())));
            self.next_cursor += 1;
            Ok(Some(Cursor::new(format!("cursor-{}", self.next_cursor))))
        }

        fn fetch_batch(&mut self, _cursor: &Cursor) -> Result<FetchedBatch, SourceError> {
            self.fetches
                .pop_front()
                .unwrap_or_else(|| Ok(batch(&[], &[], Some("tail"), 0)))
        }
    }

    fn container(timestamps: &[i64]) -> String {
        let events = timestamps
            .iter()
            .map(|&timestamp| LogEvent {
                id: None,
                timestamp,
                message: format!("m{timestamp}"),
            })
            .collect();
        encode_container(&LogEnvelope::data("/g", "s", events)).expect("encode")
    }

    fn batch(timestamps: &[i64], seqs: &[&str], next: Option<&str>, lag: u64) -> FetchedBatch {
        let records = seqs
            .iter()
            .map(|seq| RawRecord {
                data: container(timestamps),
                sequence_number: SequenceNumber::new(*seq),
                partition_key: None,
            })
            .collect();
        FetchedBatch {
            records,
            next_cursor: next.map(Cursor::new),
            millis_behind_latest: lag,
        }
    }

    fn buffer(policy: StartPolicy) -> ShardBuffer {
        ShardBuffer::new("stream", ShardId::new("shard-0"), None, policy)
    }

    #[test]
    fn transitions_only_leave_open() {
        let shard = ShardId::new("s");
        assert!(ShardState::Open.transition(&shard, ShardState::Open).is_ok());
        assert!(ShardState::Open.transition(&shard, ShardState::Closed).is_ok());
        assert!(ShardState::Closed.transition(&shard, ShardState::Open).is_err());
        let parent = ShardState::Parent { children: vec![] };
        let err = parent.transition(&shard, ShardState::Closed).expect_err("terminal");
        assert!(err.to_string().contains("PARENT to CLOSED"));
    }

    #[test]
    fn resolves_with_start_policy_then_fills_queue() {
        let mut source = Scripted::default();
        source.fetches.push_back(Ok(batch(&[10, 20], &["1"], Some("c2"), 0)));
        let mut buf = buffer(StartPolicy::Earliest);

        let empty = buf.ensure_head(&mut source, &RetryPolicy::immediate()).expect("fill");
        assert!(!empty);
        assert_eq!(source.resolves, vec![(StartPolicy::Earliest, None)]);
        assert_eq!(buf.pending_len(), 2);
        assert_eq!(buf.last_sequence().map(SequenceNumber::as_str), Some("1"));
        assert_eq!(buf.cursor().map(Cursor::as_str), Some("c2"));
        assert!(buf.state().is_open());
        let head = buf.pop().expect("head");
        assert_eq!(head.timestamp, 10);
        assert_eq!(head.shard, Some(ShardId::new("shard-0")));
    }

    #[test]
    fn empty_batch_keeps_previous_sequence_marker() {
        let mut source = Scripted::default();
        source.fetches.push_back(Ok(batch(&[10], &["7"], Some("c2"), 0)));
        source.fetches.push_back(Ok(batch(&[], &[], Some("c3"), 0)));
        let mut buf = buffer(StartPolicy::Latest);
        let retry = RetryPolicy::immediate();

        buf.ensure_head(&mut source, &retry).expect("first");
        buf.pop();
        assert!(buf.ensure_head(&mut source, &retry).expect("second"));
        assert_eq!(buf.last_sequence().map(SequenceNumber::as_str), Some("7"));
        assert!(buf.state().is_open());
    }

    #[test]
    fn expired_cursor_resumes_after_last_sequence() {
        let mut source = Scripted::default();
        source.fetches.push_back(Ok(batch(&[10], &["41"], Some("c2"), 0)));
        source.fetches.push_back(Err(SourceError::CursorExpired));
        source.fetches.push_back(Ok(batch(&[20], &["42"], Some("c3"), 0)));
        let mut buf = buffer(StartPolicy::Latest);
        let retry = RetryPolicy::immediate();

        buf.ensure_head(&mut source, &retry).expect("first");
        buf.pop();
        let empty = buf.ensure_head(&mut source, &retry).expect("transparent retry");

        assert!(!empty);
        assert_eq!(
            source.resolves,
            vec![
                (StartPolicy::Latest, None),
                (StartPolicy::Latest, Some("41".to_string())),
            ]
        );
        assert_eq!(buf.stats().cursor_expiries, 1);
        assert_eq!(buf.pop().map(|r| r.timestamp), Some(20));
    }

    #[test]
    fn expired_cursor_without_marker_uses_start_policy() {
        let mut source = Scripted::default();
        source.fetches.push_back(Err(SourceError::CursorExpired));
        source.fetches.push_back(Ok(batch(&[5], &["1"], Some("c"), 0)));
        let mut buf = ShardBuffer::new(
            "stream",
            ShardId::new("shard-0"),
            Some(Cursor::new("initial")),
            StartPolicy::Earliest,
        );

        buf.ensure_head(&mut source, &RetryPolicy::immediate()).expect("retry");
        assert_eq!(source.resolves, vec![(StartPolicy::Earliest, None)]);
    }

    #[test]
    fn repeated_expiry_is_capped() {
        let mut source = Scripted::default();
        for _ in 0..10 {
            source.fetches.push_back(Err(SourceError::CursorExpired));
        }
        let retry = RetryPolicy {
            max_cursor_expiries: 3,
            ..RetryPolicy::immediate()
        };
        let mut buf = buffer(StartPolicy::Latest);

        let err = buf.ensure_head(&mut source, &retry).expect_err("capped");
        assert!(matches!(err, TailError::CursorRetriesExhausted { attempts: 4, .. }));
        assert_eq!(source.resolves.len(), 4);
    }

    #[test]
    fn other_fetch_failures_are_fatal_with_context() {
        let mut source = Scripted::default();
        source.fetches.push_back(Err(SourceError::Failed {
            request: "aws kinesis get-records --shard-iterator cursor-1".into(),
            status: Some(255),
            detail: "AccessDeniedException".into(),
        }));
        let mut buf = buffer(StartPolicy::Latest);

        let err = buf
            .ensure_head(&mut source, &RetryPolicy::immediate())
            .expect_err("fatal");
        match err {
            TailError::Fetch { shard, request, detail, .. } => {
                assert_eq!(shard.as_str(), "shard-0");
                assert!(request.contains("get-records"));
                assert_eq!(detail, "exit status 255: AccessDeniedException");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn empty_batch_with_lag_polls_again() {
        let mut source = Scripted::default();
        source.fetches.push_back(Ok(batch(&[], &[], Some("c2"), 5_000)));
        source.fetches.push_back(Ok(batch(&[], &[], Some("c3"), 4_000)));
        source.fetches.push_back(Ok(batch(&[99], &["9"], Some("c4"), 0)));
        let mut buf = buffer(StartPolicy::Latest);

        let empty = buf.ensure_head(&mut source, &RetryPolicy::immediate()).expect("poll");
        assert!(!empty);
        assert_eq!(buf.stats().fetches, 3);
    }

    #[test]
    fn empty_polls_are_bounded_and_stay_open() {
        let mut source = Scripted::default();
        for _ in 0..20 {
            source.fetches.push_back(Ok(batch(&[], &[], Some("c"), 1_000)));
        }
        let retry = RetryPolicy {
            max_empty_polls: 2,
            ..RetryPolicy::immediate()
        };
        let mut buf = buffer(StartPolicy::Latest);

        assert!(buf.ensure_head(&mut source, &retry).expect("bounded"));
        assert_eq!(buf.stats().fetches, 3);
        assert!(buf.state().is_open());
    }

    #[test]
    fn stop_cuts_the_empty_poll_backoff_short() {
        let mut source = Scripted::default();
        for _ in 0..20 {
            source.fetches.push_back(Ok(batch(&[], &[], Some("c"), 1_000)));
        }
        let stop = StopSignal::new();
        let mut buf = buffer(StartPolicy::Latest).with_stop(stop.clone());

        let handle = stop.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            handle.trigger();
        });
        let started = std::time::Instant::now();
        // Default backoff would keep polling for about 13 seconds.
        assert!(buf.ensure_head(&mut source, &RetryPolicy::default()).expect("poll"));
        stopper.join().expect("stopper");

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(buf.state().is_open());
        assert!(buf.stats().fetches < 5);
    }

    #[test]
    fn closed_shard_without_children_becomes_closed() {
        let mut source = Scripted {
            shards: vec![ShardDescriptor::root("shard-0")],
            ..Scripted::default()
        };
        source.fetches.push_back(Ok(batch(&[1], &["1"], None, 0)));
        let mut buf = buffer(StartPolicy::Latest);
        let retry = RetryPolicy::immediate();

        assert!(!buf.ensure_head(&mut source, &retry).expect("fill"));
        assert_eq!(buf.state(), &ShardState::Closed);
        assert!(buf.cursor().is_none());

        // Terminal: no further fetch or describe.
        buf.pop();
        assert!(buf.ensure_head(&mut source, &retry).expect("no-op"));
        assert_eq!(source.describes, 1);
        assert_eq!(buf.stats().fetches, 1);
    }

    #[test]
    fn closed_shard_with_children_becomes_parent() {
        let mut source = Scripted {
            shards: vec![
                ShardDescriptor::root("shard-0"),
                ShardDescriptor::child_of("shard-2", "shard-0"),
                ShardDescriptor::child_of("shard-1", "shard-0"),
            ],
            ..Scripted::default()
        };
        source.fetches.push_back(Ok(batch(&[], &[], None, 0)));
        let mut buf = buffer(StartPolicy::Latest);

        assert!(buf.ensure_head(&mut source, &RetryPolicy::immediate()).expect("close"));
        assert_eq!(buf.state().name(), "PARENT");
        assert_eq!(buf.children(), &[ShardId::new("shard-1"), ShardId::new("shard-2")]);
    }

    #[test]
    fn undecodable_record_is_dropped_and_rest_of_batch_kept() {
        let mut source = Scripted::default();
        let mut fetched = batch(&[1, 2], &["1", "2"], Some("c"), 0);
        fetched.records[0].data = "@@not a container@@".to_string();
        source.fetches.push_back(Ok(fetched));
        let mut buf = buffer(StartPolicy::Latest);

        buf.ensure_head(&mut source, &RetryPolicy::immediate()).expect("shard-local");
        assert_eq!(buf.pending_len(), 2);
        assert_eq!(buf.stats().decode_failures, 1);
        assert_eq!(buf.last_sequence().map(SequenceNumber::as_str), Some("2"));
    }

    #[test]
    fn peek_refills_once_and_reports_none_when_still_empty() {
        let mut source = Scripted::default();
        source.fetches.push_back(Ok(batch(&[], &[], Some("c"), 0)));
        source.fetches.push_back(Ok(batch(&[3], &["3"], Some("c"), 0)));
        let mut buf = buffer(StartPolicy::Latest);
        let retry = RetryPolicy::immediate();

        assert!(buf.peek(&mut source, &retry).expect("first").is_none());
        assert_eq!(buf.peek(&mut source, &retry).expect("second").map(|r| r.timestamp), Some(3));
        // Non-empty queue: peek does not fetch.
        assert_eq!(buf.peek(&mut source, &retry).expect("third").map(|r| r.timestamp), Some(3));
        assert_eq!(buf.stats().fetches, 2);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let retry = RetryPolicy {
            poll_backoff_initial: Duration::from_millis(100),
            poll_backoff_max: Duration::from_millis(350),
            ..RetryPolicy::default()
        };
        assert_eq!(retry.backoff(0), Duration::from_millis(100));
        assert_eq!(retry.backoff(1), Duration::from_millis(200));
        assert_eq!(retry.backoff(2), Duration::from_millis(350));
        assert_eq!(retry.backoff(40), Duration::from_millis(350));
    }
}
