//! kintail-core library.
//!
//! Reads every shard of a Kinesis-style stream and re-emits the decoded log
//! events as one stream in non-decreasing timestamp order, following shard
//! splits and merges as they happen.
//!
//! - [`buffer::ShardBuffer`] owns one shard's cursor, pending records and state.
//! - [`merger::StreamMerger`] owns the active set and performs the greedy merge.
//! - [`source::ShardSource`] and [`sink::OutputSink`] are the two seams to
//!   the outside world.
//! - [`pager::concat_pages`] reads a paged listing linearly.
//!
//! # Conventions
//!
//! - **Errors**: library errors are `thiserror` enums carrying an
//!   [`error::ErrorCode`]; config loading returns `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `debug!`, `trace!`).

pub mod buffer;
pub mod config;
pub mod decode;
pub mod error;
pub mod merger;
pub mod pager;
pub mod record;
pub mod signal;
pub mod sink;
pub mod source;
pub mod timing;

pub use buffer::{BufferStats, RetryPolicy, ShardBuffer, ShardState};
pub use error::{ErrorCode, TailError};
pub use merger::{MergerConfig, RunOutcome, RunSummary, StreamMerger};
pub use pager::{EventPage, PageOutcome, PageSource, PageSummary, concat_pages};
pub use record::{Cursor, Record, SequenceNumber, ShardId, StartPolicy};
pub use signal::StopSignal;
pub use sink::{OutputSink, SinkError};
pub use source::{FetchedBatch, RawRecord, ShardDescriptor, ShardLineage, ShardSource, SourceError};
