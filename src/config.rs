//! Configuration loading, environment overrides and validation.
//!
//! Configuration comes from a TOML file (see [`schema`]) and two
//! environment variables that take precedence over the file:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TESTWIRE_API_KEY` | `reporter.api_key` |
//! | `TESTWIRE_ENDPOINT` | `reporter.endpoint` |
//!
//! Loading never checks values; call [`Config::validate`] before any
//! network activity.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Environment variable overriding `reporter.api_key`.
pub const API_KEY_ENV: &str = "TESTWIRE_API_KEY";

/// Environment variable overriding `reporter.endpoint`.
pub const ENDPOINT_ENV: &str = "TESTWIRE_ENDPOINT";

/// A configuration value that would make the pipeline misbehave.
///
/// These are the `validation` class of errors: they are raised before any
/// request is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reporter.api_key is empty (set it in the config file or TESTWIRE_API_KEY)")]
    MissingApiKey,

    #[error("reporter.endpoint {url:?} is not a valid http(s) URL: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error(
        "reporter.retry_base_delay_ms ({base}) must not exceed reporter.retry_max_delay_ms ({max})"
    )]
    DelayOrder { base: u64, max: u64 },

    #[error(
        "reporter.batch_size ({batch_size}) must not exceed reporter.max_buffer_size ({max_buffer_size})"
    )]
    BatchExceedsBuffer {
        batch_size: usize,
        max_buffer_size: usize,
    },

    #[error("invalid redaction pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

impl Config {
    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Empty values are ignored so an exported-but-blank variable doesn't
    /// wipe out the file setting.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.reporter.api_key = key.trim().to_string();
        }
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            self.reporter.endpoint = endpoint.trim().to_string();
        }
    }

    /// Checks every value the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, in field order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let reporter = &self.reporter;

        if reporter.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        match reqwest::Url::parse(&reporter.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(ConfigError::InvalidEndpoint {
                    url: reporter.endpoint.clone(),
                    reason: format!("unsupported scheme {}", url.scheme()),
                });
            }
            Err(e) => {
                return Err(ConfigError::InvalidEndpoint {
                    url: reporter.endpoint.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let non_zero = [
            ("reporter.batch_size", reporter.batch_size as u64),
            ("reporter.timeout_ms", reporter.timeout_ms),
            ("reporter.max_buffer_size", reporter.max_buffer_size as u64),
            ("sanitize.max_error_length", self.sanitize.max_error_length as u64),
            (
                "sanitize.max_stack_trace_lines",
                self.sanitize.max_stack_trace_lines as u64,
            ),
            ("upload.concurrency", self.upload.concurrency as u64),
            ("upload.timeout_ms", self.upload.timeout_ms),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }

        if reporter.retry_base_delay_ms > reporter.retry_max_delay_ms {
            return Err(ConfigError::DelayOrder {
                base: reporter.retry_base_delay_ms,
                max: reporter.retry_max_delay_ms,
            });
        }

        // A batch that can't fit in the buffer never triggers a send.
        if reporter.batch_size > reporter.max_buffer_size {
            return Err(ConfigError::BatchExceedsBuffer {
                batch_size: reporter.batch_size,
                max_buffer_size: reporter.max_buffer_size,
            });
        }

        for pattern in &self.sanitize.redaction.patterns {
            pattern.compile()?;
        }

        Ok(())
    }
}

/// Loads configuration from a TOML file and applies environment overrides.
///
/// A leading `~` in `path` is expanded to the home directory.
///
/// # Errors
///
/// Returns an error if the file cannot be read or isn't valid TOML for the
/// schema. Values are not validated here.
pub fn load_config(path: &Path) -> Result<Config> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
    let content = std::fs::read_to_string(&expanded)
        .with_context(|| format!("Failed to read config file: {}", expanded))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", expanded))?;
    config.apply_env_overrides(|name| std::env::var(name).ok());

    Ok(config)
}

/// Loads configuration from a TOML string, without environment overrides.
///
/// # Example
///
/// ```
/// use testwire::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [reporter]
///     api_key = "secret"
///     batch_size = 10
/// "#)?;
///
/// assert_eq!(config.reporter.batch_size, 10);
/// assert_eq!(config.reporter.max_retries, 3);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}

/// Configuration file written by `testwire init`.
pub const CONFIG_TEMPLATE: &str = r#"# testwire configuration

[reporter]
# api_key = "..."            # or set TESTWIRE_API_KEY
endpoint = "https://ingest.testwire.dev/api/v1/reports"
source = "testwire"
batch_size = 50
timeout_ms = 30000
max_retries = 3
retry_base_delay_ms = 1000
retry_max_delay_ms = 30000
max_buffer_size = 1000

[sanitize]
max_error_length = 5000
max_stack_trace_lines = 50
max_console_lines = 200

[sanitize.redaction]
enabled = true
replace_builtin = false
# Bare strings are case-insensitive literals; tables hold regular expressions.
patterns = []

[upload]
enabled = true
concurrency = 4
timeout_ms = 120000
"#;
