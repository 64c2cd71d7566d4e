//! Artifact upload orchestration.
//!
//! After a batch is accepted the ingestion API may answer with presigned
//! upload targets keyed by artifact id. [`ArtifactUploader`] uploads every
//! artifact that has a target, reports partial success, and confirms the
//! successful ids in one call. Nothing here can fail the run: every problem
//! ends up in the [`UploadReport`] or in the log.
//!
//! ```text
//! artifacts ──partition──┬── no target ──► skipped (logged)
//!                        │
//!                        └── target ──► UploadTask ──► Uploader (≤ concurrency in flight)
//!                                                        │
//!                                    progress(decile) ◄──┤
//!                                                        ▼
//!                                         succeeded / failed ──► confirm_uploads(succeeded)
//! ```
//!
//! Presigned URLs grant write access, so only their host is ever logged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::model::Artifact;
use crate::transport::{TransmissionClient, gzip};

/// Why a single upload failed.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload target answered HTTP {status}")]
    Status { status: u16 },

    #[error("upload timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Timeout
        } else {
            // The URL is a bearer credential; keep it out of messages.
            UploadError::Network(err.without_url().to_string())
        }
    }
}

/// One artifact to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub artifact_id: String,
    pub path: PathBuf,
    pub content_type: String,

    /// Presigned target URL.
    pub target: String,

    /// Gzip the file before sending; false for already-compressed formats.
    pub compress: bool,
}

impl UploadTask {
    pub fn new(artifact: &Artifact, target: impl Into<String>) -> Self {
        Self {
            artifact_id: artifact.id.clone(),
            path: artifact.path.clone(),
            content_type: artifact.content_type.clone(),
            target: target.into(),
            compress: !artifact.precompressed,
        }
    }

    /// Host part of the target, safe to log.
    pub fn target_host(&self) -> String {
        target_host(&self.target)
    }
}

fn target_host(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "<invalid url>".to_string())
}

/// Moves one file to its target.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Uploads `task` and returns the number of bytes put on the wire.
    async fn upload(&self, task: &UploadTask) -> Result<u64, UploadError>;
}

/// Uploads with an HTTP `PUT` of the (optionally gzipped) file bytes.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("testwire/{}", crate::transport::SDK_VERSION))
            .build()
            .map_err(|e| UploadError::Client(e.to_string()))?;

        Ok(Self {
            http,
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, task: &UploadTask) -> Result<u64, UploadError> {
        let data = tokio::fs::read(&task.path)
            .await
            .map_err(|source| UploadError::Io {
                path: task.path.clone(),
                source,
            })?;

        let mut request = self
            .http
            .put(&task.target)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, &task.content_type);

        let body = if task.compress {
            request = request.header(CONTENT_ENCODING, "gzip");
            gzip(&data).map_err(|source| UploadError::Io {
                path: task.path.clone(),
                source,
            })?
        } else {
            data
        };
        let len = body.len() as u64;

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
            });
        }

        Ok(len)
    }
}

/// Progress snapshot passed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

/// Receives progress at decile boundaries and at 100%.
pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

/// An upload that didn't make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpload {
    pub artifact_id: String,
    pub error: String,
}

/// Aggregate result of one upload pass.
///
/// `success` is always true: upload problems never fail a run, they are
/// listed in `failed` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub success: bool,
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedUpload>,

    /// Artifacts the server offered no target for.
    pub skipped: Vec<String>,

    pub bytes_uploaded: u64,
}

/// Tracks completions and decides when progress is worth reporting.
struct ProgressTracker {
    total: usize,
    completed: usize,
    last_decile: usize,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    fn new(total: usize, callback: Option<ProgressCallback>) -> Self {
        Self {
            total,
            completed: 0,
            last_decile: 0,
            callback,
        }
    }

    fn complete_one(&mut self) {
        self.completed += 1;
        let percent = self.completed * 100 / self.total.max(1);
        let decile = percent / 10;

        if decile > self.last_decile {
            self.last_decile = decile;
            if let Some(callback) = &self.callback {
                callback(UploadProgress {
                    completed: self.completed,
                    total: self.total,
                    percent: percent as u8,
                });
            }
        }
    }
}

/// Uploads artifacts against server-provided targets and confirms them.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
/// use std::sync::Arc;
/// use testwire::config::UploadConfig;
/// use testwire::upload::{ArtifactUploader, HttpUploader};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let uploader = ArtifactUploader::new(Arc::new(HttpUploader::new(&UploadConfig::default())?), 4)
///     .with_progress(Arc::new(|p| println!("{}%", p.percent)));
///
/// let report = uploader.upload(&[], &HashMap::new()).await;
/// assert!(report.success);
/// # Ok(())
/// # }
/// ```
pub struct ArtifactUploader {
    uploader: Arc<dyn Uploader>,
    concurrency: usize,
    confirmer: Option<TransmissionClient>,
    progress: Option<ProgressCallback>,
}

impl ArtifactUploader {
    pub fn new(uploader: Arc<dyn Uploader>, concurrency: usize) -> Self {
        Self {
            uploader,
            concurrency: concurrency.max(1),
            confirmer: None,
            progress: None,
        }
    }

    /// Confirms successful uploads through `client`.
    pub fn with_confirmer(mut self, client: TransmissionClient) -> Self {
        self.confirmer = Some(client);
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Uploads every artifact in `artifacts` that has an entry in `targets`.
    pub async fn upload(
        &self,
        artifacts: &[Artifact],
        targets: &HashMap<String, String>,
    ) -> UploadReport {
        let mut report = UploadReport {
            success: true,
            ..UploadReport::default()
        };

        let mut tasks = Vec::new();
        for artifact in artifacts {
            match targets.get(&artifact.id) {
                Some(target) => tasks.push(UploadTask::new(artifact, target.as_str())),
                None => {
                    debug!(artifact_id = %artifact.id, name = %artifact.name, "no upload target, skipping");
                    report.skipped.push(artifact.id.clone());
                }
            }
        }

        if tasks.is_empty() {
            return report;
        }

        info!(
            count = tasks.len(),
            skipped = report.skipped.len(),
            "uploading artifacts"
        );

        let mut progress = ProgressTracker::new(tasks.len(), self.progress.clone());
        let uploader = &self.uploader;
        let mut outcomes = stream::iter(tasks)
            .map(|task| async move {
                let result = uploader.upload(&task).await;
                (task, result)
            })
            .buffer_unordered(self.concurrency);

        while let Some((task, result)) = outcomes.next().await {
            match result {
                Ok(bytes) => {
                    debug!(
                        artifact_id = %task.artifact_id,
                        host = %task.target_host(),
                        bytes,
                        "artifact uploaded"
                    );
                    report.bytes_uploaded += bytes;
                    report.succeeded.push(task.artifact_id);
                }
                Err(e) => {
                    warn!(
                        artifact_id = %task.artifact_id,
                        host = %task.target_host(),
                        error = %e,
                        "artifact upload failed"
                    );
                    report.failed.push(FailedUpload {
                        artifact_id: task.artifact_id,
                        error: e.to_string(),
                    });
                }
            }
            progress.complete_one();
        }

        if !report.succeeded.is_empty() {
            self.confirm(&report.succeeded).await;
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            bytes = report.bytes_uploaded,
            "artifact upload finished"
        );
        report
    }

    async fn confirm(&self, ids: &[String]) {
        let Some(client) = &self.confirmer else {
            return;
        };

        match client.confirm_uploads(ids).await {
            Ok(response) if response.success => {
                debug!(
                    requested = ids.len(),
                    confirmed = response.confirmed,
                    "uploads confirmed"
                );
            }
            Ok(response) => {
                warn!(
                    requested = ids.len(),
                    confirmed = response.confirmed,
                    "server did not accept upload confirmation"
                );
            }
            Err(e) => {
                warn!(error = %e, count = ids.len(), "failed to confirm uploads");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::ArtifactKind;

    /// Succeeds for every target except those containing "fail".
    struct FakeUploader {
        calls: Mutex<Vec<UploadTask>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeUploader {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, task: &UploadTask) -> Result<u64, UploadError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.calls.lock().unwrap().push(task.clone());
            if task.target.contains("fail") {
                Err(UploadError::Status { status: 403 })
            } else {
                Ok(100)
            }
        }
    }

    fn artifact(id: &str, precompressed: bool) -> Artifact {
        Artifact {
            id: id.to_string(),
            kind: ArtifactKind::Attachment,
            name: id.to_string(),
            path: PathBuf::from(format!("/tmp/{}", id)),
            content_type: "text/plain".to_string(),
            size_bytes: 100,
            precompressed,
        }
    }

    fn targets(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_no_targets_is_empty_success() {
        let fake = Arc::new(FakeUploader::new());
        let uploader = ArtifactUploader::new(fake.clone(), 2);

        let report = uploader
            .upload(&[artifact("a", false)], &HashMap::new())
            .await;

        assert!(report.success);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.skipped, vec!["a"]);
        assert!(fake.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_success() {
        let fake = Arc::new(FakeUploader::new());
        let uploader = ArtifactUploader::new(fake.clone(), 2);
        let artifacts = [
            artifact("a", false),
            artifact("b", true),
            artifact("c", false),
        ];

        let report = uploader
            .upload(
                &artifacts,
                &targets(&[
                    ("a", "https://bucket.example/a?sig=1"),
                    ("b", "https://bucket.example/fail?sig=2"),
                ]),
            )
            .await;

        assert!(report.success);
        assert_eq!(report.succeeded, vec!["a"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].artifact_id, "b");
        assert_eq!(report.skipped, vec!["c"]);
        assert_eq!(report.bytes_uploaded, 100);
    }

    #[tokio::test]
    async fn test_all_failures_still_succeed() {
        let fake = Arc::new(FakeUploader::new());
        let uploader = ArtifactUploader::new(fake, 2);

        let report = uploader
            .upload(
                &[artifact("a", false)],
                &targets(&[("a", "https://bucket.example/fail")]),
            )
            .await;

        assert!(report.success);
        assert!(report.succeeded.is_empty());
        assert_eq!(report.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_compress_flag_follows_precompressed() {
        let fake = Arc::new(FakeUploader::new());
        let uploader = ArtifactUploader::new(fake.clone(), 1);

        uploader
            .upload(
                &[artifact("log", false), artifact("png", true)],
                &targets(&[("log", "https://b.example/1"), ("png", "https://b.example/2")]),
            )
            .await;

        let calls = fake.calls.lock().unwrap();
        let by_id: HashMap<_, _> = calls.iter().map(|t| (t.artifact_id.as_str(), t)).collect();
        assert!(by_id["log"].compress);
        assert!(!by_id["png"].compress);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let fake = Arc::new(FakeUploader::new());
        let uploader = ArtifactUploader::new(fake.clone(), 3);
        let artifacts: Vec<_> = (0..12).map(|i| artifact(&format!("a{}", i), false)).collect();
        let targets: HashMap<_, _> = artifacts
            .iter()
            .map(|a| (a.id.clone(), format!("https://b.example/{}", a.id)))
            .collect();

        let report = uploader.upload(&artifacts, &targets).await;

        assert_eq!(report.succeeded.len(), 12);
        assert!(fake.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_progress_reported_on_deciles() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let uploader = ArtifactUploader::new(Arc::new(FakeUploader::new()), 1).with_progress(
            Arc::new(move |p: UploadProgress| sink.lock().unwrap().push(p.percent)),
        );
        let artifacts: Vec<_> = (0..4).map(|i| artifact(&format!("a{}", i), false)).collect();
        let targets: HashMap<_, _> = artifacts
            .iter()
            .map(|a| (a.id.clone(), format!("https://b.example/{}", a.id)))
            .collect();

        uploader.upload(&artifacts, &targets).await;

        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 100]);
    }

    #[test]
    fn test_progress_skips_repeated_deciles() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut tracker = ProgressTracker::new(
            40,
            Some(Arc::new(move |p: UploadProgress| {
                sink.lock().unwrap().push(p.percent)
            })),
        );

        for _ in 0..40 {
            tracker.complete_one();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last(), Some(&100));
    }

    #[test]
    fn test_target_host_hides_signature() {
        let task = UploadTask::new(
            &artifact("a", false),
            "https://bucket.s3.amazonaws.com/a?X-Amz-Signature=secret",
        );

        assert_eq!(task.target_host(), "bucket.s3.amazonaws.com");
        assert_eq!(target_host("not a url"), "<invalid url>");
    }
}
