//! Record model shared by the decoder, the shard buffers and the sinks.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of one shard within a stream.
///
/// Ordering is plain string ordering; the merger relies on it to break
/// timestamp ties deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque read position inside one shard. May expire at the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Source-assigned position of a raw record, used to resume after expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    #[must_use]
    pub fn new(seq: impl Into<String>) -> Self {
        Self(seq.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a freshly resolved cursor starts when no sequence marker is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Oldest record still retained by the shard.
    Earliest,
    /// Only records written after the cursor is resolved.
    #[default]
    Latest,
}

impl StartPolicy {
    /// Iterator type name understood by the Kinesis API.
    #[must_use]
    pub const fn iterator_type(self) -> &'static str {
        match self {
            Self::Earliest => "TRIM_HORIZON",
            Self::Latest => "LATEST",
        }
    }
}

impl FromStr for StartPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" | "trim_horizon" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            other => Err(format!(
                "unknown start policy '{other}' (expected earliest, trim_horizon or latest)"
            )),
        }
    }
}

impl fmt::Display for StartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => f.write_str("earliest"),
            Self::Latest => f.write_str("latest"),
        }
    }
}

/// One log event, ordered by `timestamp` (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
    /// Shard the record was read from; absent for paged (non-sharded) reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardId>,
}

impl Record {
    #[must_use]
    pub fn new(timestamp: i64, message: impl Into<String>) -> Self {
        Self {
            id: None,
            timestamp,
            message: message.into(),
            log_group: None,
            log_stream: None,
            shard: None,
        }
    }

    /// All populated fields keyed by their wire names, for output templates.
    #[must_use]
    pub fn fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_policy_accepts_api_and_friendly_names() {
        assert_eq!("LATEST".parse::<StartPolicy>(), Ok(StartPolicy::Latest));
        assert_eq!("trim_horizon".parse::<StartPolicy>(), Ok(StartPolicy::Earliest));
        assert_eq!("Earliest".parse::<StartPolicy>(), Ok(StartPolicy::Earliest));
        assert!("at_timestamp".parse::<StartPolicy>().is_err());
        assert_eq!(StartPolicy::default().iterator_type(), "LATEST");
    }

    #[test]
    fn fields_use_wire_names_and_skip_missing() {
        let mut record = Record::new(1_700_000_000_000, "hello");
        record.log_stream = Some("i-0abc".into());
        record.shard = Some(ShardId::new("shardId-000000000002"));

        let fields = record.fields();
        assert_eq!(fields["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(fields["message"], "hello");
        assert_eq!(fields["logStream"], "i-0abc");
        assert_eq!(fields["shard"], "shardId-000000000002");
        assert!(!fields.contains_key("logGroup"));
        assert!(!fields.contains_key("id"));
    }

    #[test]
    fn shard_ids_order_lexicographically() {
        let mut ids = vec![
            ShardId::new("shardId-000000000010"),
            ShardId::new("shardId-000000000002"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "shardId-000000000002");
    }
}
