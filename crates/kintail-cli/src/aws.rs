//! Shard and page sources backed by the `aws` command line tool.
//!
//! Every request spawns one `aws` process with `--output json` and parses
//! its stdout. A non-zero exit becomes [`SourceError::Failed`] carrying the
//! command line, exit status and stderr, except for an expired shard
//! iterator, which the Kinesis CLI reports as exit status 255 with
//! `ExpiredIteratorException` on stderr.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use kintail_core::config::AwsConfig;
use kintail_core::{
    Cursor, EventPage, FetchedBatch, PageSource, RawRecord, Record, SequenceNumber,
    ShardDescriptor, ShardId, ShardSource, SourceError, StartPolicy,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

const EXPIRED_STATUS: i32 = 255;
const EXPIRED_MARKER: &str = "ExpiredIteratorException";

/// Handle on the `aws` executable plus the arguments appended to every call.
#[derive(Debug, Clone)]
pub struct AwsCli {
    binary: PathBuf,
    common: Vec<String>,
}

impl AwsCli {
    /// `passthrough` comes from `--aws` on the command line and is appended
    /// after the configured extra arguments.
    #[must_use]
    pub fn new(config: &AwsConfig, passthrough: &[String]) -> Self {
        let mut common = vec!["--output".to_string(), "json".to_string()];
        if let Some(profile) = &config.profile {
            common.extend(["--profile".to_string(), profile.clone()]);
        }
        if let Some(region) = &config.region {
            common.extend(["--region".to_string(), region.clone()]);
        }
        common.extend(config.extra_args.iter().cloned());
        common.extend(passthrough.iter().cloned());

        Self {
            binary: config.binary.clone(),
            common,
        }
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.binary.display().to_string())
            .chain(args.iter().cloned())
            .chain(self.common.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run<T: DeserializeOwned>(&self, args: &[String]) -> Result<T, SourceError> {
        let request = self.command_line(args);
        debug!(command = %request, "running aws");

        let output = Command::new(&self.binary)
            .args(args)
            .args(&self.common)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| SourceError::failed(request.clone(), format!("failed to spawn: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if is_expired(output.status.code(), &stderr) {
                trace!(command = %request, "shard iterator expired");
                return Err(SourceError::CursorExpired);
            }
            return Err(SourceError::Failed {
                request,
                status: output.status.code(),
                detail: stderr,
            });
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|err| SourceError::failed(request, format!("unexpected response: {err}")))
    }
}

fn is_expired(status: Option<i32>, stderr: &str) -> bool {
    status == Some(EXPIRED_STATUS) && stderr.contains(EXPIRED_MARKER)
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(ToString::to_string).collect()
}

// ---------------------------------------------------------------------------
// Kinesis wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStreamResponse {
    stream_description: StreamDescription,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StreamDescription {
    #[serde(default)]
    shards: Vec<WireShard>,
    #[serde(default)]
    has_more_shards: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireShard {
    shard_id: String,
    #[serde(default)]
    parent_shard_id: Option<String>,
    #[serde(default)]
    adjacent_parent_shard_id: Option<String>,
}

impl From<WireShard> for ShardDescriptor {
    fn from(shard: WireShard) -> Self {
        Self {
            shard_id: ShardId::new(shard.shard_id),
            parent_shard_id: shard.parent_shard_id.map(ShardId::new),
            adjacent_parent_shard_id: shard.adjacent_parent_shard_id.map(ShardId::new),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShardIteratorResponse {
    #[serde(default)]
    shard_iterator: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetRecordsResponse {
    #[serde(default)]
    records: Vec<WireRecord>,
    #[serde(default)]
    next_shard_iterator: Option<String>,
    #[serde(default)]
    millis_behind_latest: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRecord {
    data: String,
    sequence_number: String,
    #[serde(default)]
    partition_key: Option<String>,
}

impl ShardSource for AwsCli {
    fn describe_shards(&mut self, stream: &str) -> Result<Vec<ShardDescriptor>, SourceError> {
        let mut shards: Vec<ShardDescriptor> = Vec::new();
        loop {
            let mut request = args(["kinesis", "describe-stream", "--stream-name", stream]);
            if let Some(last) = shards.last() {
                request.extend(["--exclusive-start-shard-id".to_string(), last.shard_id.to_string()]);
            }
            let response: DescribeStreamResponse = self.run(&request)?;
            let description = response.stream_description;
            let page_was_empty = description.shards.is_empty();
            shards.extend(description.shards.into_iter().map(ShardDescriptor::from));

            if !description.has_more_shards || page_was_empty {
                break;
            }
        }
        Ok(shards)
    }

    fn resolve_cursor(
        &mut self,
        stream: &str,
        shard: &ShardId,
        policy: StartPolicy,
        after_sequence: Option<&SequenceNumber>,
    ) -> Result<Option<Cursor>, SourceError> {
        let mut request = args([
            "kinesis",
            "get-shard-iterator",
            "--stream-name",
            stream,
            "--shard-id",
            shard.as_str(),
            "--shard-iterator-type",
        ]);
        match after_sequence {
            Some(seq) => request.extend([
                "AFTER_SEQUENCE_NUMBER".to_string(),
                "--starting-sequence-number".to_string(),
                seq.to_string(),
            ]),
            None => request.push(policy.iterator_type().to_string()),
        }

        let response: ShardIteratorResponse = self.run(&request)?;
        Ok(response.shard_iterator.map(Cursor::new))
    }

    fn fetch_batch(&mut self, cursor: &Cursor) -> Result<FetchedBatch, SourceError> {
        let request = args(["kinesis", "get-records", "--shard-iterator", cursor.as_str()]);
        let response: GetRecordsResponse = self.run(&request)?;

        Ok(FetchedBatch {
            records: response
                .records
                .into_iter()
                .map(|r| RawRecord {
                    data: r.data,
                    sequence_number: SequenceNumber::new(r.sequence_number),
                    partition_key: r.partition_key,
                })
                .collect(),
            next_cursor: response.next_shard_iterator.map(Cursor::new),
            millis_behind_latest: response.millis_behind_latest,
        })
    }
}

// ---------------------------------------------------------------------------
// CloudWatch Logs listing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterLogEventsResponse {
    #[serde(default)]
    events: Vec<FilteredEvent>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilteredEvent {
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    log_stream_name: Option<String>,
    timestamp: i64,
    #[serde(default)]
    message: String,
}

/// What `kt cat` asks `filter-log-events` for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogQuery {
    pub log_group: String,
    pub streams: Vec<String>,
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

/// [`PageSource`] over `aws logs filter-log-events`.
#[derive(Debug, Clone)]
pub struct LogEventsPager {
    cli: AwsCli,
    query: LogQuery,
}

impl LogEventsPager {
    #[must_use]
    pub const fn new(cli: AwsCli, query: LogQuery) -> Self {
        Self { cli, query }
    }

    fn request(&self, token: Option<&str>) -> Vec<String> {
        let mut request = args([
            "logs",
            "filter-log-events",
            "--log-group-name",
            self.query.log_group.as_str(),
        ]);
        if !self.query.streams.is_empty() {
            request.push("--log-stream-names".to_string());
            request.extend(self.query.streams.iter().cloned());
        }
        if let Some(start) = self.query.start_ms {
            request.extend(["--start-time".to_string(), start.to_string()]);
        }
        if let Some(end) = self.query.end_ms {
            request.extend(["--end-time".to_string(), end.to_string()]);
        }
        if let Some(token) = token {
            request.extend(["--next-token".to_string(), token.to_string()]);
        }
        request
    }
}

impl PageSource for LogEventsPager {
    fn fetch_page(&mut self, token: Option<&str>) -> Result<EventPage, SourceError> {
        let response: FilterLogEventsResponse = self.cli.run(&self.request(token))?;
        let events = response
            .events
            .into_iter()
            .map(|event| Record {
                id: event.event_id,
                timestamp: event.timestamp,
                message: event.message,
                log_group: Some(self.query.log_group.clone()),
                log_stream: event.log_stream_name,
                shard: None,
            })
            .collect();

        Ok(EventPage {
            events,
            next_token: response.next_token,
        })
    }
}
