use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::buffer::RetryPolicy;
use crate::error::ErrorCode;
use crate::merger::MergerConfig;
use crate::record::StartPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KintailConfig {
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// How the `aws` executable is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_aws_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Appended to every invocation.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            binary: default_aws_binary(),
            profile: None,
            region: None,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailConfig {
    #[serde(default)]
    pub start: StartPolicy,
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    #[serde(default = "default_max_cursor_expiries")]
    pub max_cursor_expiries: u32,
    #[serde(default = "default_max_empty_polls")]
    pub max_empty_polls: u32,
    #[serde(default = "default_poll_backoff_initial_ms")]
    pub poll_backoff_initial_ms: u64,
    #[serde(default = "default_poll_backoff_max_ms")]
    pub poll_backoff_max_ms: u64,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            start: StartPolicy::default(),
            idle_wait_ms: default_idle_wait_ms(),
            max_cursor_expiries: default_max_cursor_expiries(),
            max_empty_polls: default_max_empty_polls(),
            poll_backoff_initial_ms: default_poll_backoff_initial_ms(),
            poll_backoff_max_ms: default_poll_backoff_max_ms(),
        }
    }
}

impl TailConfig {
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_cursor_expiries: self.max_cursor_expiries,
            max_empty_polls: self.max_empty_polls,
            poll_backoff_initial: Duration::from_millis(self.poll_backoff_initial_ms),
            poll_backoff_max: Duration::from_millis(self.poll_backoff_max_ms),
        }
    }

    /// Merger settings; startup shard filtering is left to the caller.
    #[must_use]
    pub const fn merger_config(&self) -> MergerConfig {
        MergerConfig {
            start_policy: self.start,
            retry: self.retry_policy(),
            idle_wait: Duration::from_millis(self.idle_wait_ms),
            shard_filter: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// `%(field)s` template applied to each record.
    #[serde(default = "default_format")]
    pub format: String,
    /// Take template fields from the message parsed as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            json: false,
        }
    }
}

/// Pick the config file: explicit path, then `KINTAIL_CONFIG`, then the
/// per-user config directory. Only an explicit choice may point at a
/// missing file.
#[must_use]
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_value: Option<String>,
    config_dir: Option<PathBuf>,
) -> Option<(PathBuf, bool)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), true));
    }
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return Some((PathBuf::from(value), true));
    }
    config_dir.map(|dir| (dir.join("kintail/config.toml"), false))
}

/// Load the effective configuration.
///
/// # Errors
///
/// Fails if an explicitly chosen file is missing, or if any chosen file
/// cannot be read or parsed.
pub fn load_config(explicit: Option<&Path>) -> Result<KintailConfig> {
    let resolved = resolve_config_path(
        explicit,
        std::env::var("KINTAIL_CONFIG").ok(),
        dirs::config_dir(),
    );
    let Some((path, required)) = resolved else {
        return Ok(KintailConfig::default());
    };
    if !required && !path.exists() {
        return Ok(KintailConfig::default());
    }
    load_config_file(&path)
}

/// Parse one config file.
///
/// # Errors
///
/// Fails if the file cannot be read or is not valid config TOML.
pub fn load_config_file(path: &Path) -> Result<KintailConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<KintailConfig>(&content).with_context(|| {
        format!(
            "{}: {} ({})",
            ErrorCode::ConfigParseError,
            ErrorCode::ConfigParseError.message(),
            path.display()
        )
    })
}

fn default_aws_binary() -> PathBuf {
    PathBuf::from("aws")
}

fn default_format() -> String {
    "%(message)s".to_string()
}

const fn default_idle_wait_ms() -> u64 {
    500
}

const fn default_max_cursor_expiries() -> u32 {
    5
}

const fn default_max_empty_polls() -> u32 {
    10
}

const fn default_poll_backoff_initial_ms() -> u64 {
    100
}

const fn default_poll_backoff_max_ms() -> u64 {
    2_000
}
