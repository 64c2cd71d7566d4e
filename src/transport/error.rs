//! Classified transmission failures.

use std::fmt;

/// What went wrong, as far as retrying is concerned.
///
/// | Kind | Retried? |
/// |------|----------|
/// | `Validation` | No (nothing was sent) |
/// | `Network` | Yes |
/// | `Timeout` | Yes |
/// | `Api { status: 4xx }` | No |
/// | `Api { status: 5xx }` | Yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitErrorKind {
    /// Rejected locally before any request was issued.
    Validation,

    /// Connection, DNS or body transfer failure.
    Network,

    /// The per-attempt deadline elapsed.
    Timeout,

    /// The server answered with a non-2xx status.
    Api { status: u16 },
}

impl TransmitErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransmitErrorKind::Validation => false,
            TransmitErrorKind::Network | TransmitErrorKind::Timeout => true,
            TransmitErrorKind::Api { status } => *status >= 500,
        }
    }
}

impl fmt::Display for TransmitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitErrorKind::Validation => f.write_str("validation"),
            TransmitErrorKind::Network => f.write_str("network"),
            TransmitErrorKind::Timeout => f.write_str("timeout"),
            TransmitErrorKind::Api { status } => write!(f, "api ({})", status),
        }
    }
}

/// A failed transmission.
///
/// Carries the correlation id of the batch (empty for errors raised before
/// a batch existed) and how many records did not reach the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransmitError {
    pub kind: TransmitErrorKind,
    pub message: String,
    pub correlation_id: String,
    pub failed_records: usize,
}

impl TransmitError {
    pub fn new(kind: TransmitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: String::new(),
            failed_records: 0,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(TransmitErrorKind::Validation, message)
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_failed_records(mut self, count: usize) -> Self {
        self.failed_records = count;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// HTTP status for `Api` errors.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            TransmitErrorKind::Api { status } => Some(status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransmitError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransmitErrorKind::Timeout
        } else if let Some(status) = err.status() {
            TransmitErrorKind::Api {
                status: status.as_u16(),
            }
        } else {
            TransmitErrorKind::Network
        };
        Self::new(kind, err.to_string())
    }
}
