use std::fmt;

use crate::record::ShardId;

/// Machine-readable error codes so operators and scripts can branch on failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    DescribeFailed,
    CursorResolveFailed,
    FetchFailed,
    CursorRetriesExhausted,
    PageFetchFailed,
    InvalidStateTransition,
    DecodeFailed,
    SinkFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::DescribeFailed => "E2001",
            Self::CursorResolveFailed => "E2002",
            Self::FetchFailed => "E2003",
            Self::CursorRetriesExhausted => "E2004",
            Self::PageFetchFailed => "E2005",
            Self::InvalidStateTransition => "E3001",
            Self::DecodeFailed => "E4001",
            Self::SinkFailed => "E5001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::DescribeFailed => "Could not list stream shards",
            Self::CursorResolveFailed => "Could not resolve shard cursor",
            Self::FetchFailed => "Record fetch failed",
            Self::CursorRetriesExhausted => "Shard cursor kept expiring",
            Self::PageFetchFailed => "Log page fetch failed",
            Self::InvalidStateTransition => "Invalid shard state transition",
            Self::DecodeFailed => "Record container could not be decoded",
            Self::SinkFailed => "Output write failed",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the kintail config.toml and retry."),
            Self::DescribeFailed => {
                Some("Check the stream name, credentials profile and region.")
            }
            Self::CursorResolveFailed | Self::FetchFailed | Self::PageFetchFailed => {
                Some("Re-run with -v to see the failing command and its stderr.")
            }
            Self::CursorRetriesExhausted => {
                Some("Raise tail.max_cursor_expiries or check clock skew against the source.")
            }
            Self::DecodeFailed => Some("Verify the stream carries gzip-compressed log envelopes."),
            Self::InvalidStateTransition => Some("Report a bug with logs from a -v run."),
            Self::SinkFailed => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Fatal conditions that stop a tail or concatenation run.
///
/// Transient conditions (cursor expiry, empty batches while the source
/// reports lag) never surface here unless their retry bound is exceeded.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("{}: failed to describe stream {stream}: {detail}", ErrorCode::DescribeFailed)]
    Describe {
        stream: String,
        request: String,
        detail: String,
    },

    #[error("{}: failed to resolve cursor for {stream}/{shard}: {detail}", ErrorCode::CursorResolveFailed)]
    ResolveCursor {
        stream: String,
        shard: ShardId,
        request: String,
        detail: String,
    },

    #[error("{}: fetch failed for {stream}/{shard} ({request}): {detail}", ErrorCode::FetchFailed)]
    Fetch {
        stream: String,
        shard: ShardId,
        request: String,
        detail: String,
    },

    #[error("{}: cursor for {stream}/{shard} expired {attempts} times in a row", ErrorCode::CursorRetriesExhausted)]
    CursorRetriesExhausted {
        stream: String,
        shard: ShardId,
        attempts: u32,
    },

    #[error("{}: page request failed ({request}): {detail}", ErrorCode::PageFetchFailed)]
    Page { request: String, detail: String },

    #[error("{}: shard {shard} cannot move from {from} to {to}", ErrorCode::InvalidStateTransition)]
    InvalidTransition {
        shard: ShardId,
        from: &'static str,
        to: &'static str,
    },

    #[error("{}: {0}", ErrorCode::SinkFailed)]
    Sink(#[source] std::io::Error),
}

impl TailError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Describe { .. } => ErrorCode::DescribeFailed,
            Self::ResolveCursor { .. } => ErrorCode::CursorResolveFailed,
            Self::Fetch { .. } => ErrorCode::FetchFailed,
            Self::CursorRetriesExhausted { .. } => ErrorCode::CursorRetriesExhausted,
            Self::Page { .. } => ErrorCode::PageFetchFailed,
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::Sink(_) => ErrorCode::SinkFailed,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// The shard this error is attributed to, if any.
    #[must_use]
    pub const fn shard(&self) -> Option<&ShardId> {
        match self {
            Self::ResolveCursor { shard, .. }
            | Self::Fetch { shard, .. }
            | Self::CursorRetriesExhausted { shard, .. }
            | Self::InvalidTransition { shard, .. } => Some(shard),
            Self::Describe { .. } | Self::Page { .. } | Self::Sink(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::ConfigParseError,
            ErrorCode::DescribeFailed,
            ErrorCode::CursorResolveFailed,
            ErrorCode::FetchFailed,
            ErrorCode::CursorRetriesExhausted,
            ErrorCode::PageFetchFailed,
            ErrorCode::InvalidStateTransition,
            ErrorCode::DecodeFailed,
            ErrorCode::SinkFailed,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::CursorRetriesExhausted.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn fetch_error_carries_request_context() {
        let err = TailError::Fetch {
            stream: "app-logs".into(),
            shard: ShardId::new("shardId-000000000001"),
            request: "aws kinesis get-records --shard-iterator AAA".into(),
            detail: "AccessDeniedException".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("E2003"));
        assert!(text.contains("app-logs/shardId-000000000001"));
        assert!(text.contains("get-records"));
        assert!(text.contains("AccessDeniedException"));
        assert_eq!(err.shard().map(ShardId::as_str), Some("shardId-000000000001"));
    }
}
