//! Configuration schema definitions for testwire.
//!
//! This module defines all configuration types that can be deserialized from
//! TOML configuration files. Every field has a default, so an empty file is a
//! valid (if unauthenticated) configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── ReporterConfig         - Endpoint, credentials, batching, retries
//! ├── SanitizeConfig         - Truncation limits
//! │   └── RedactionConfig    - Redaction switch and extra patterns
//! └── UploadConfig           - Artifact upload settings
//! ```

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Default ingestion endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://ingest.testwire.dev/api/v1/reports";

/// Root configuration structure for testwire.
///
/// # TOML Structure
///
/// ```toml
/// [reporter]
/// api_key = "tw_live_..."
/// endpoint = "https://ingest.testwire.dev/api/v1/reports"
/// batch_size = 50
/// max_retries = 3
///
/// [sanitize]
/// max_error_length = 5000
///
/// [sanitize.redaction]
/// patterns = ["internal-hostname", { regex = "acct-[0-9]{6}" }]
///
/// [upload]
/// concurrency = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Transmission settings.
    #[serde(default)]
    pub reporter: ReporterConfig,

    /// Sanitization settings.
    #[serde(default)]
    pub sanitize: SanitizeConfig,

    /// Artifact upload settings.
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Endpoint, credentials, batching and retry settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `api_key` | empty (must be set here or via `TESTWIRE_API_KEY`) |
/// | `endpoint` | [`DEFAULT_ENDPOINT`] |
/// | `source` | `"testwire"` |
/// | `batch_size` | 50 |
/// | `timeout_ms` | 30000 |
/// | `max_retries` | 3 |
/// | `retry_base_delay_ms` | 1000 |
/// | `retry_max_delay_ms` | 30000 |
/// | `max_buffer_size` | 1000 |
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReporterConfig {
    /// Bearer token for the ingestion API.
    #[serde(default)]
    pub api_key: String,

    /// Reports endpoint. Upload confirmations go to `<endpoint>/confirm-uploads`.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Source label attached to the run metadata.
    #[serde(default = "default_source")]
    pub source: String,

    /// Number of buffered records that triggers an intermediate send.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-attempt request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt. `0` disables retrying.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff before the first retry, doubled on every further retry.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Records held in memory before the oldest are dropped.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            source: default_source(),
            batch_size: default_batch_size(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

impl ReporterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_source() -> String {
    "testwire".to_string()
}

fn default_batch_size() -> usize {
    50
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_max_buffer_size() -> usize {
    1_000
}

/// Truncation limits applied to free text at capture time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SanitizeConfig {
    /// Maximum characters kept from an error message (after line truncation).
    ///
    /// Default: 5000
    #[serde(default = "default_max_error_length")]
    pub max_error_length: usize,

    /// Maximum lines kept from an error stack.
    ///
    /// Default: 50
    #[serde(default = "default_max_stack_trace_lines")]
    pub max_stack_trace_lines: usize,

    /// Maximum stdout/stderr lines kept per test; the tail is kept.
    ///
    /// Default: 200
    #[serde(default = "default_max_console_lines")]
    pub max_console_lines: usize,

    #[serde(default)]
    pub redaction: RedactionConfig,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_error_length: default_max_error_length(),
            max_stack_trace_lines: default_max_stack_trace_lines(),
            max_console_lines: default_max_console_lines(),
            redaction: RedactionConfig::default(),
        }
    }
}

fn default_max_error_length() -> usize {
    5_000
}

fn default_max_stack_trace_lines() -> usize {
    50
}

fn default_max_console_lines() -> usize {
    200
}

/// Redaction settings.
///
/// With `replace_builtin = false` (the default) the configured patterns
/// extend the built-in set; with `true` they replace it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedactionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub replace_builtin: bool,

    #[serde(default)]
    pub patterns: Vec<RedactionPattern>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            replace_builtin: false,
            patterns: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// A caller-supplied redaction pattern.
///
/// A bare string is a literal, matched case-insensitively. A table with a
/// `regex` key is a regular expression.
///
/// ```toml
/// patterns = ["corp.internal", { regex = "ticket-[0-9]+" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RedactionPattern {
    Literal(String),
    Regex { regex: String },
}

impl RedactionPattern {
    /// Compiles this pattern into a matcher.
    pub fn compile(&self) -> Result<Regex, ConfigError> {
        let (source, original) = match self {
            RedactionPattern::Literal(literal) => {
                if literal.is_empty() {
                    return Err(ConfigError::InvalidPattern {
                        pattern: literal.clone(),
                        reason: "empty literal".to_string(),
                    });
                }
                (format!("(?i){}", regex::escape(literal)), literal)
            }
            RedactionPattern::Regex { regex } => (regex.clone(), regex),
        };

        Regex::new(&source).map_err(|e| ConfigError::InvalidPattern {
            pattern: original.clone(),
            reason: e.to_string(),
        })
    }
}

/// Artifact upload settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Upload artifacts when the ingestion API offers targets.
    ///
    /// Default: true
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum uploads in flight at once.
    ///
    /// Default: 4
    #[serde(default = "default_upload_concurrency")]
    pub concurrency: usize,

    /// Per-upload timeout in milliseconds.
    ///
    /// Default: 120000
    #[serde(default = "default_upload_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_upload_concurrency(),
            timeout_ms: default_upload_timeout_ms(),
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_upload_concurrency() -> usize {
    4
}

fn default_upload_timeout_ms() -> u64 {
    120_000
}
