//! Batch decoder for CloudWatch Logs subscription containers.
//!
//! Each raw record fetched from a shard carries one container: a base64
//! string wrapping a gzip stream wrapping a JSON envelope.
//!
//! ```text
//! base64( gzip( {"messageType": "DATA_MESSAGE",
//!                "logGroup": "...", "logStream": "...",
//!                "logEvents": [{"id": "...", "timestamp": 1, "message": "..."}]} ) )
//! ```
//!
//! Events inside one container are already in time order; decoding keeps
//! that order.

use std::io::{Read, Write};

use base64::{Engine as _, engine::general_purpose};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::record::Record;

/// Envelope `messageType` sent when the subscription is first wired up.
pub const CONTROL_MESSAGE: &str = "CONTROL_MESSAGE";

/// Errors produced while unpacking one container.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid log envelope: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::DecodeFailed
    }
}

/// JSON document carried inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscription_filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_events: Option<Vec<LogEvent>>,
}

/// One event inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timestamp: i64,
    pub message: String,
}

impl LogEnvelope {
    /// Data envelope for `log_group`/`log_stream` holding `events`.
    #[must_use]
    pub fn data(log_group: &str, log_stream: &str, events: Vec<LogEvent>) -> Self {
        Self {
            message_type: Some("DATA_MESSAGE".to_string()),
            owner: None,
            log_group: Some(log_group.to_string()),
            log_stream: Some(log_stream.to_string()),
            subscription_filters: Vec::new(),
            log_events: Some(events),
        }
    }

    fn into_records(self) -> Vec<Record> {
        if self.message_type.as_deref() == Some(CONTROL_MESSAGE) {
            return Vec::new();
        }
        let Some(events) = self.log_events else {
            return Vec::new();
        };

        events
            .into_iter()
            .map(|event| Record {
                id: event.id,
                timestamp: event.timestamp,
                message: event.message,
                log_group: self.log_group.clone(),
                log_stream: self.log_stream.clone(),
                shard: None,
            })
            .collect()
    }
}

/// Decode one container into its records, in container order.
///
/// # Errors
///
/// Returns [`DecodeError`] if any layer (base64, gzip, JSON) is malformed.
pub fn decode_container(data: &str) -> Result<Vec<Record>, DecodeError> {
    let compressed = general_purpose::STANDARD.decode(data.trim())?;

    let mut decoder = GzDecoder::new(&compressed[..]);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json).map_err(DecodeError::Gzip)?;

    let envelope: LogEnvelope = serde_json::from_slice(&json)?;
    Ok(envelope.into_records())
}

/// Build a container from an envelope. Inverse of [`decode_container`].
///
/// # Errors
///
/// Returns [`DecodeError`] if serialization or compression fails.
pub fn encode_container(envelope: &LogEnvelope) -> Result<String, DecodeError> {
    let json = serde_json::to_vec(envelope)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(DecodeError::Gzip)?;
    let compressed = encoder.finish().map_err(DecodeError::Gzip)?;

    Ok(general_purpose::STANDARD.encode(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, timestamp: i64, message: &str) -> LogEvent {
        LogEvent {
            id: Some(id.to_string()),
            timestamp,
            message: message.to_string(),
        }
    }

    #[test]
    fn well_formed_container_round_trips_in_order() {
        let events = vec![
            event("e1", 100, "first"),
            event("e2", 100, "same millisecond"),
            event("e3", 250, r#"{"level":"warn"}"#),
        ];
        let envelope = LogEnvelope::data("/app/api", "i-0abc", events.clone());
        let data = encode_container(&envelope).expect("encode");

        let records = decode_container(&data).expect("decode");
        let round_tripped: Vec<LogEvent> = records
            .iter()
            .map(|r| LogEvent {
                id: r.id.clone(),
                timestamp: r.timestamp,
                message: r.message.clone(),
            })
            .collect();
        assert_eq!(round_tripped, events);
        assert!(records.iter().all(|r| r.log_group.as_deref() == Some("/app/api")));
        assert!(records.iter().all(|r| r.log_stream.as_deref() == Some("i-0abc")));
        assert!(records.iter().all(|r| r.shard.is_none()));
    }

    #[test]
    fn control_message_decodes_to_nothing() {
        let envelope = LogEnvelope {
            message_type: Some(CONTROL_MESSAGE.to_string()),
            log_events: Some(vec![event("c", 1, "CWL CONTROL MESSAGE: Checking health")]),
            ..LogEnvelope::default()
        };
        let data = encode_container(&envelope).expect("encode");
        assert!(decode_container(&data).expect("decode").is_empty());
    }

    #[test]
    fn envelope_without_events_decodes_to_nothing() {
        let data = encode_container(&LogEnvelope::default()).expect("encode");
        assert!(decode_container(&data).expect("decode").is_empty());
    }

    #[test]
    fn each_layer_reports_its_own_failure() {
        assert!(matches!(
            decode_container("not base64!!"),
            Err(DecodeError::Base64(_))
        ));

        let not_gzip = general_purpose::STANDARD.encode(b"plain text");
        assert!(matches!(decode_container(&not_gzip), Err(DecodeError::Gzip(_))));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"{\"logEvents\": [").expect("write");
        let truncated_json = general_purpose::STANDARD.encode(encoder.finish().expect("finish"));
        assert!(matches!(decode_container(&truncated_json), Err(DecodeError::Json(_))));
    }
}
