//! testwire: ship test results from a runner to a reporting service.
//!
//! testwire sits between a test runner and an ingestion API. Every completed
//! test is sanitized (secrets redacted, oversized text truncated), buffered
//! in memory, sent in batches with retries, and its captured files are
//! uploaded to presigned targets handed back by the server.
//!
//! # Architecture
//!
//! ```text
//!  host runner ──► Reporter (CloudReporter)
//!                    │
//!                    ├── sanitize   redact + truncate free text
//!                    ├── buffer     bounded FIFO, snapshot-then-clear
//!                    ├── transport  batch POST, gzip, retry with backoff
//!                    └── upload     artifact PUTs, confirmation
//! ```
//!
//! - **[`model`]**: inbound `CompletedTest`, sanitized `ExecutionRecord`,
//!   run metadata and artifacts
//! - **[`sanitize`]**: redaction and truncation
//! - **[`buffer`]**: bounded result buffer
//! - **[`transport`]**: ingestion API client
//! - **[`upload`]**: artifact upload orchestration
//! - **[`report`]**: the `Reporter` lifecycle and the coordinator
//! - **[`ci`]**: CI provider detection for run metadata
//! - **[`config`]**: TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use testwire::config::load_config;
//! use testwire::model::{CompletedTest, TestOutcome};
//! use testwire::report::{CloudReporter, Reporter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("testwire.toml"))?;
//!     let reporter = CloudReporter::new(&config)?;
//!
//!     reporter
//!         .on_run_start(&testwire::ci::resolve_run_metadata("my-runner"))
//!         .await;
//!     reporter
//!         .on_test_complete(&CompletedTest::new("t1", "logs in", TestOutcome::Passed))
//!         .await;
//!     reporter.on_run_end().await;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod ci;
pub mod config;
pub mod model;
pub mod report;
pub mod sanitize;
pub mod transport;
pub mod upload;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use model::{CompletedTest, ExecutionRecord, RunMetadata, TestOutcome};
pub use report::{CloudReporter, Reporter};
pub use transport::{SendResult, TransmissionClient, TransmitError};
