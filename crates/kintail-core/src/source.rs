//! Shard source interface and shard lineage.
//!
//! A [`ShardSource`] is whatever can list a stream's shards, hand out read
//! cursors and fetch record batches. The CLI implements it by shelling out
//! to the AWS CLI; the simulator implements it in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Cursor, SequenceNumber, ShardId, StartPolicy};

/// One shard as reported by the topology listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    pub shard_id: ShardId,
    #[serde(default)]
    pub parent_shard_id: Option<ShardId>,
    /// Second parent of a shard produced by merging two shards.
    #[serde(default)]
    pub adjacent_parent_shard_id: Option<ShardId>,
}

impl ShardDescriptor {
    #[must_use]
    pub fn root(shard_id: impl Into<ShardId>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: None,
            adjacent_parent_shard_id: None,
        }
    }

    #[must_use]
    pub fn child_of(shard_id: impl Into<ShardId>, parent: impl Into<ShardId>) -> Self {
        Self {
            shard_id: shard_id.into(),
            parent_shard_id: Some(parent.into()),
            adjacent_parent_shard_id: None,
        }
    }

    fn parents(&self) -> impl Iterator<Item = &ShardId> {
        self.parent_shard_id
            .iter()
            .chain(self.adjacent_parent_shard_id.iter())
    }
}

/// One undecoded record as delivered by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Encoded container, see [`crate::decode`].
    pub data: String,
    pub sequence_number: SequenceNumber,
    pub partition_key: Option<String>,
}

/// Result of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchedBatch {
    pub records: Vec<RawRecord>,
    /// `None` once the shard is closed and fully read.
    pub next_cursor: Option<Cursor>,
    /// How far this read position trails the tip of the shard.
    pub millis_behind_latest: u64,
}

/// Failures reported by a [`ShardSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The cursor is no longer valid; resolve a new one and retry.
    #[error("cursor expired")]
    CursorExpired,

    /// Any other non-success response.
    #[error("{request} failed{}: {detail}", .status.map(|s| format!(" with status {s}")).unwrap_or_default())]
    Failed {
        /// Human-readable description of the request (e.g. the command line).
        request: String,
        status: Option<i32>,
        /// Raw error payload from the source.
        detail: String,
    },
}

impl SourceError {
    #[must_use]
    pub fn failed(request: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Failed {
            request: request.into(),
            status: None,
            detail: detail.into(),
        }
    }

    /// Split into `(request, detail)` for fatal error reporting.
    #[must_use]
    pub fn into_context(self) -> (String, String) {
        match self {
            Self::CursorExpired => (String::from("fetch"), String::from("cursor expired")),
            Self::Failed {
                request,
                status,
                detail,
            } => {
                let detail = match status {
                    Some(status) => format!("exit status {status}: {}", detail.trim()),
                    None => detail.trim().to_string(),
                };
                (request, detail)
            }
        }
    }
}

/// Access to a sharded stream.
pub trait ShardSource {
    /// List every shard currently known for `stream`, open or closed.
    ///
    /// # Errors
    ///
    /// Any non-success response is fatal to the caller.
    fn describe_shards(&mut self, stream: &str) -> Result<Vec<ShardDescriptor>, SourceError>;

    /// Resolve a read cursor for `shard`.
    ///
    /// `after_sequence`, when present, overrides `policy` and positions the
    /// cursor just past that record. `Ok(None)` means the source has no
    /// position to hand out for this shard.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Failed`] on any non-success response.
    fn resolve_cursor(
        &mut self,
        stream: &str,
        shard: &ShardId,
        policy: StartPolicy,
        after_sequence: Option<&SequenceNumber>,
    ) -> Result<Option<Cursor>, SourceError>;

    /// Fetch the batch following `cursor`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::CursorExpired`] when the cursor must be
    /// re-resolved, [`SourceError::Failed`] otherwise.
    fn fetch_batch(&mut self, cursor: &Cursor) -> Result<FetchedBatch, SourceError>;
}

impl<S: ShardSource + ?Sized> ShardSource for &mut S {
    fn describe_shards(&mut self, stream: &str) -> Result<Vec<ShardDescriptor>, SourceError> {
        (**self).describe_shards(stream)
    }

    fn resolve_cursor(
        &mut self,
        stream: &str,
        shard: &ShardId,
        policy: StartPolicy,
        after_sequence: Option<&SequenceNumber>,
    ) -> Result<Option<Cursor>, SourceError> {
        (**self).resolve_cursor(stream, shard, policy, after_sequence)
    }

    fn fetch_batch(&mut self, cursor: &Cursor) -> Result<FetchedBatch, SourceError> {
        (**self).fetch_batch(cursor)
    }
}

/// Directed parent → children relation over a topology snapshot.
///
/// Built on demand from [`ShardSource::describe_shards`] when a shard is
/// found closed; buffers keep only the resulting child ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardLineage {
    children: BTreeMap<ShardId, BTreeSet<ShardId>>,
}

impl ShardLineage {
    #[must_use]
    pub fn from_descriptors(shards: &[ShardDescriptor]) -> Self {
        let mut children: BTreeMap<ShardId, BTreeSet<ShardId>> = BTreeMap::new();
        for shard in shards {
            for parent in shard.parents() {
                children
                    .entry(parent.clone())
                    .or_default()
                    .insert(shard.shard_id.clone());
            }
        }
        Self { children }
    }

    /// Direct children of `parent`, ascending.
    #[must_use]
    pub fn children_of(&self, parent: &ShardId) -> Vec<ShardId> {
        self.children
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl fmt::Display for ShardLineage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (parent, children) in &self.children {
            let list: Vec<&str> = children.iter().map(ShardId::as_str).collect();
            writeln!(f, "{parent} -> {}", list.join(", "))?;
        }
        Ok(())
    }
}
