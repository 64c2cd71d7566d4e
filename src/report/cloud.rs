//! The pipeline coordinator: capture, buffer, transmit, upload.
//!
//! [`CloudReporter`] glues the pipeline stages together behind the
//! [`Reporter`] interface:
//!
//! ```text
//! on_test_complete ──► Sanitizer::capture ──► ResultBuffer::push
//!                                                   │ count ≥ batch_size
//!                                                   ▼
//!                         send_snapshot: flush ──► TransmissionClient::send_batch
//!                                                   │
//!                             success ──────────────┴────────────── failure
//!                                │                                     │
//!               ArtifactUploader::upload(targets)          ResultBuffer::requeue(snapshot)
//! ```
//!
//! Sends are serialized by an async mutex. Intermediate sends triggered by
//! `on_test_complete` are skipped while another send is in flight; the
//! records stay buffered for the next trigger or for `on_run_end`. After a
//! failed send, intermediate sends also hold off until another `batch_size`
//! records have been captured. The buffer's own lock is never held across
//! an `.await`.
//!
//! [`CloudReporter::shutdown`] only sends: no retries, no re-queue, no
//! artifact uploads.
//!
//! Nothing in here fails the host run. Failures are logged, counted in
//! [`DeliveryStats`], and passed to the optional callbacks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Reporter;
use crate::buffer::ResultBuffer;
use crate::config::{Config, ConfigError};
use crate::model::{Artifact, CompletedTest, ExecutionRecord, RunMetadata};
use crate::sanitize::Sanitizer;
use crate::transport::{SendOptions, SendResult, TransmissionClient, TransmitError};
use crate::upload::{ArtifactUploader, HttpUploader, ProgressCallback, UploadError, Uploader};

/// Receives every classified transmission error.
pub type ErrorCallback = Arc<dyn Fn(&TransmitError) + Send + Sync>;

/// Receives every send result, successful or not.
pub type MetricsCallback = Arc<dyn Fn(&SendResult) + Send + Sync>;

/// Why a [`CloudReporter`] couldn't be built.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transmit(#[from] TransmitError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// How a flush handles failure and artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    /// Full retry budget, re-queue on failure, upload artifacts on success.
    Regular,
    /// Single attempt; undelivered records are dropped, artifacts skipped.
    Shutdown,
}

impl Flush {
    fn options(self) -> SendOptions {
        match self {
            Flush::Regular => SendOptions::default(),
            Flush::Shutdown => SendOptions::no_retry(),
        }
    }
}

/// Delivery counters for one reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub records_sent: u64,

    /// Evicted by buffer overflow or abandoned by a failed shutdown send.
    pub records_dropped: u64,

    pub artifacts_uploaded: u64,
    pub artifacts_failed: u64,

    /// Request body bytes of delivered batches, after compression.
    pub bytes_sent: u64,
}

/// Reporter that delivers sanitized results to the ingestion API.
///
/// # Example
///
/// ```no_run
/// use testwire::config::Config;
/// use testwire::model::{CompletedTest, RunMetadata, TestOutcome};
/// use testwire::report::{CloudReporter, Reporter};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut config = Config::default();
/// config.reporter.api_key = "tw_live_...".to_string();
///
/// let reporter = CloudReporter::new(&config)?;
/// reporter.on_run_start(&RunMetadata::new("my-runner")).await;
/// reporter
///     .on_test_complete(&CompletedTest::new("t1", "works", TestOutcome::Passed))
///     .await;
/// reporter.on_run_end().await;
///
/// println!("{:?}", reporter.stats());
/// # Ok(())
/// # }
/// ```
pub struct CloudReporter {
    sanitizer: Sanitizer,
    buffer: ResultBuffer,
    client: TransmissionClient,
    batch_size: usize,
    source: String,

    upload_enabled: bool,
    upload_concurrency: usize,
    uploader: Arc<dyn Uploader>,
    upload_progress: Option<ProgressCallback>,

    run: Mutex<Option<RunMetadata>>,
    stats: Mutex<DeliveryStats>,
    send_lock: tokio::sync::Mutex<()>,
    /// Captures left before intermediate sends resume after a failure.
    hold_off: AtomicUsize,

    on_error: Option<ErrorCallback>,
    on_metrics: Option<MetricsCallback>,
}

impl CloudReporter {
    /// Builds a reporter from validated configuration.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, before any network activity.
    pub fn new(config: &Config) -> Result<Self, SetupError> {
        config.validate()?;

        let sanitizer = Sanitizer::new(&config.sanitize)?;
        let client = TransmissionClient::new(&config.reporter)?;
        let uploader = HttpUploader::new(&config.upload)?;

        Ok(Self {
            sanitizer,
            buffer: ResultBuffer::new(config.reporter.max_buffer_size),
            client,
            batch_size: config.reporter.batch_size.max(1),
            source: config.reporter.source.clone(),
            upload_enabled: config.upload.enabled,
            upload_concurrency: config.upload.concurrency,
            uploader: Arc::new(uploader),
            upload_progress: None,
            run: Mutex::new(None),
            stats: Mutex::new(DeliveryStats::default()),
            send_lock: tokio::sync::Mutex::new(()),
            hold_off: AtomicUsize::new(0),
            on_error: None,
            on_metrics: None,
        })
    }

    /// Replaces the artifact transport.
    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn with_on_error(mut self, callback: ErrorCallback) -> Self {
        self.on_error = Some(callback);
        self
    }

    pub fn with_on_metrics(mut self, callback: MetricsCallback) -> Self {
        self.on_metrics = Some(callback);
        self
    }

    pub fn with_upload_progress(mut self, callback: ProgressCallback) -> Self {
        self.upload_progress = Some(callback);
        self
    }

    /// Current delivery counters.
    pub fn stats(&self) -> DeliveryStats {
        let mut stats = *self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.records_dropped += self.buffer.dropped_count();
        stats
    }

    /// Records buffered and not yet delivered.
    pub fn pending(&self) -> usize {
        self.buffer.count()
    }

    /// Run metadata in effect, synthesizing one if the run was never started.
    pub fn run_metadata(&self) -> RunMetadata {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        run.get_or_insert_with(|| {
            warn!("no run started, synthesizing run metadata");
            RunMetadata::new(&self.source)
        })
        .clone()
    }

    fn update_stats(&self, update: impl FnOnce(&mut DeliveryStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut *stats);
    }

    /// Best-effort final delivery for process shutdown.
    ///
    /// Sends whatever is buffered once, without retries. On failure the
    /// records are abandoned and counted as dropped. Artifacts are not
    /// uploaded.
    pub async fn shutdown(&self) -> Option<SendResult> {
        {
            let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(run) = run.as_mut().filter(|r| r.finished_at.is_none()) {
                run.finish();
            }
        }

        let _guard = self.send_lock.lock().await;
        let result = self.send_snapshot(Flush::Shutdown).await;

        let stats = self.stats();
        info!(
            batches_sent = stats.batches_sent,
            records_sent = stats.records_sent,
            records_dropped = stats.records_dropped,
            "shutdown flush complete"
        );
        result
    }

    /// Flushes and sends if at least `batch_size` records are waiting, no
    /// other send is in flight, and no post-failure hold-off is pending.
    async fn maybe_send_batch(&self) {
        let holding = self
            .hold_off
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if holding {
            debug!("holding off after failed send");
            return;
        }

        if self.buffer.count() < self.batch_size {
            return;
        }

        let Ok(_guard) = self.send_lock.try_lock() else {
            debug!("send already in flight, deferring batch");
            return;
        };
        self.send_snapshot(Flush::Regular).await;
    }

    /// Sends the current buffer content. Caller must hold `send_lock`.
    async fn send_snapshot(&self, flush: Flush) -> Option<SendResult> {
        let records = self.buffer.flush();
        if records.is_empty() {
            return None;
        }

        let metadata = self.run_metadata();
        let result = self
            .client
            .send_batch_with(&metadata, &records, flush.options())
            .await;

        if let Some(callback) = &self.on_metrics {
            callback(&result);
        }

        if result.success {
            self.update_stats(|s| {
                s.batches_sent += 1;
                s.records_sent += records.len() as u64;
                s.bytes_sent += result.bytes_sent as u64;
            });
            self.hold_off.store(0, Ordering::SeqCst);
            if flush == Flush::Regular {
                self.upload_artifacts(&records, &result).await;
            }
        } else {
            self.update_stats(|s| s.batches_failed += 1);
            if let (Some(callback), Some(error)) = (&self.on_error, &result.error) {
                callback(error);
            }

            if flush == Flush::Regular {
                debug!(count = records.len(), "re-queuing undelivered batch");
                self.buffer.requeue(records);
                self.hold_off.store(self.batch_size, Ordering::SeqCst);
            } else {
                warn!(count = records.len(), "abandoning undelivered records");
                self.update_stats(|s| s.records_dropped += records.len() as u64);
            }
        }

        Some(result)
    }

    async fn upload_artifacts(&self, records: &[ExecutionRecord], result: &SendResult) {
        if !self.upload_enabled {
            return;
        }

        let artifacts: Vec<Artifact> = records
            .iter()
            .flat_map(|r| r.artifacts.iter().cloned())
            .collect();
        if artifacts.is_empty() {
            return;
        }

        let mut uploader =
            ArtifactUploader::new(Arc::clone(&self.uploader), self.upload_concurrency)
                .with_confirmer(self.client.clone());
        if let Some(progress) = &self.upload_progress {
            uploader = uploader.with_progress(Arc::clone(progress));
        }

        let report = uploader.upload(&artifacts, &result.upload_urls()).await;
        self.update_stats(|s| {
            s.artifacts_uploaded += report.succeeded.len() as u64;
            s.artifacts_failed += report.failed.len() as u64;
        });
    }
}

#[async_trait]
impl Reporter for CloudReporter {
    async fn on_run_start(&self, run: &RunMetadata) {
        debug!(run_id = %run.run_id, source = %run.source, "run started");
        *self.run.lock().unwrap_or_else(|e| e.into_inner()) = Some(run.clone());
    }

    async fn on_test_complete(&self, test: &CompletedTest) {
        let record = self.sanitizer.capture(test);
        self.buffer.push(record);
        self.maybe_send_batch().await;
    }

    async fn on_run_end(&self) {
        {
            let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
            run.get_or_insert_with(|| RunMetadata::new(&self.source))
                .finish();
        }

        let _guard = self.send_lock.lock().await;
        self.send_snapshot(Flush::Regular).await;

        let stats = self.stats();
        info!(
            batches_sent = stats.batches_sent,
            batches_failed = stats.batches_failed,
            records_sent = stats.records_sent,
            records_dropped = stats.records_dropped,
            records_pending = self.buffer.count(),
            artifacts_uploaded = stats.artifacts_uploaded,
            artifacts_failed = stats.artifacts_failed,
            "run reporting finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::TestOutcome;
    use crate::transport::TransmitErrorKind;

    fn config() -> Config {
        let mut config = Config::default();
        config.reporter.api_key = "key".to_string();
        // Nothing listens on the discard port; connections are refused.
        config.reporter.endpoint = "http://127.0.0.1:9/reports".to_string();
        config.reporter.batch_size = 10;
        config.reporter.max_retries = 0;
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = CloudReporter::new(&Config::default());
        assert!(matches!(
            result,
            Err(SetupError::Config(ConfigError::MissingApiKey))
        ));
    }

    #[test]
    fn test_new_rejects_batch_larger_than_buffer() {
        let mut cfg = config();
        cfg.reporter.batch_size = 10;
        cfg.reporter.max_buffer_size = 5;

        assert!(matches!(
            CloudReporter::new(&cfg),
            Err(SetupError::Config(ConfigError::BatchExceedsBuffer { .. }))
        ));
    }

    #[test]
    fn test_run_metadata_is_synthesized_once() {
        let reporter = CloudReporter::new(&config()).unwrap();

        let first = reporter.run_metadata();
        let second = reporter.run_metadata();

        assert_eq!(first.run_id, second.run_id);
        assert_eq!(first.source, "testwire");
    }

    #[tokio::test]
    async fn test_records_below_batch_size_stay_buffered() {
        let reporter = CloudReporter::new(&config()).unwrap();
        reporter.on_run_start(&RunMetadata::new("test")).await;

        for i in 0..5 {
            reporter
                .on_test_complete(&CompletedTest::new(
                    format!("t{}", i),
                    "case",
                    TestOutcome::Passed,
                ))
                .await;
        }

        assert_eq!(reporter.pending(), 5);
        assert_eq!(reporter.stats(), DeliveryStats::default());
    }

    #[tokio::test]
    async fn test_test_complete_redacts_before_buffering() {
        let reporter = CloudReporter::new(&config()).unwrap();
        reporter
            .on_test_complete(
                &CompletedTest::new("t1", "case", TestOutcome::Failed)
                    .with_error("login failed for jane@example.com"),
            )
            .await;

        let records = reporter.buffer.flush();
        assert_eq!(
            records[0].error.as_deref(),
            Some("login failed for [REDACTED]")
        );
    }

    #[tokio::test]
    async fn test_failed_shutdown_abandons_records() {
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        let reporter = CloudReporter::new(&config())
            .unwrap()
            .with_on_error(Arc::new(move |e: &TransmitError| {
                assert_eq!(e.kind, TransmitErrorKind::Network);
                assert_eq!(e.failed_records, 3);
                seen.fetch_add(1, Ordering::SeqCst);
            }));

        for i in 0..3 {
            reporter
                .on_test_complete(&CompletedTest::new(
                    format!("t{}", i),
                    "case",
                    TestOutcome::Passed,
                ))
                .await;
        }

        let result = reporter.shutdown().await.unwrap();

        assert!(!result.success);
        assert_eq!(result.retry_count, 0);
        assert_eq!(reporter.pending(), 0);
        assert_eq!(reporter.stats().records_dropped, 3);
        assert_eq!(reporter.stats().batches_failed, 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_buffer_sends_nothing() {
        let reporter = CloudReporter::new(&config()).unwrap();
        assert!(reporter.shutdown().await.is_none());
    }
}
