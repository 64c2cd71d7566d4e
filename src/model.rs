//! Test execution records, run metadata, and their wire projections.
//!
//! Three shapes of a test outcome move through the pipeline:
//!
//! ```text
//!   host runner                sanitizer                 transport
//!       │                          │                         │
//!  CompletedTest ──capture()──► ExecutionRecord ──to_wire()──► WireRecord<'_>
//!  (raw text, local paths)    (redacted, owned by buffer)   (borrowed, no paths)
//! ```
//!
//! - [`CompletedTest`] is what a runner hands over: raw error text, raw
//!   console chunks, attachments pointing at local files.
//! - [`ExecutionRecord`] is the sanitized, immutable record stored in the
//!   [`ResultBuffer`](crate::buffer::ResultBuffer).
//! - [`WireRecord`] borrows an `ExecutionRecord` for serialization and never
//!   carries local file paths.
//!
//! All wire types serialize to camelCase JSON. Durations are integer
//! milliseconds and timestamps are RFC 3339 UTC.

pub mod artifact;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use artifact::{Artifact, ArtifactKind, WireArtifact, is_precompressed};

/// The outcome status of a single test execution.
///
/// | Outcome | Wire value | Counts as success? |
/// |---------|------------|--------------------|
/// | Passed | `passed` | Yes |
/// | Failed | `failed` | No |
/// | Skipped | `skipped` | Yes |
/// | TimedOut | `timedOut` | No |
/// | Interrupted | `interrupted` | No |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TestOutcome {
    /// All assertions succeeded.
    Passed,

    /// An assertion or expectation failed.
    Failed,

    /// The test was not run.
    Skipped,

    /// The test exceeded its deadline.
    TimedOut,

    /// The run was stopped while the test was executing.
    Interrupted,
}

impl TestOutcome {
    /// Returns `true` for outcomes that don't fail a run.
    ///
    /// ```
    /// use testwire::model::TestOutcome;
    ///
    /// assert!(TestOutcome::Passed.is_success());
    /// assert!(TestOutcome::Skipped.is_success());
    /// assert!(!TestOutcome::TimedOut.is_success());
    /// ```
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed | TestOutcome::Skipped)
    }

    /// The wire spelling of this outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::TimedOut => "timedOut",
            TestOutcome::Interrupted => "interrupted",
        }
    }
}

impl std::fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a test, possibly with nested sub-steps.
///
/// Steps are used both on the inbound side (raw errors) and in sanitized
/// records (redacted errors); the sanitizer rebuilds the tree rather than
/// mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// Step title as reported by the runner.
    pub title: String,

    /// Step duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,

    /// Error raised inside this step, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Nested sub-steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepRecord>,
}

impl StepRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            duration_ms: 0,
            error: None,
            steps: Vec::new(),
        }
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_step(mut self, step: StepRecord) -> Self {
        self.steps.push(step);
        self
    }
}

/// A file attachment as reported by the host runner.
///
/// Attachments without a `path` were captured inline by the runner and
/// have no file to upload; they are ignored at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Display name (e.g. `screenshot`, `trace`).
    pub name: String,

    /// Local file path.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// MIME type reported by the runner.
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// File size reported by the runner. Read from disk at capture when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

/// A completed test as handed over by the host runner.
///
/// This is the minimally-shaped inbound record: free text is still raw and
/// may contain secrets. It is only ever turned into an [`ExecutionRecord`]
/// through [`Sanitizer::capture`](crate::sanitize::Sanitizer::capture).
///
/// # Example
///
/// ```
/// use testwire::model::{CompletedTest, TestOutcome};
///
/// let test = CompletedTest::new("login-1", "logs in", TestOutcome::Failed)
///     .with_file("tests/login.spec.ts")
///     .with_suite_path(["auth", "login"])
///     .with_error("expected 200, got 500");
///
/// assert_eq!(test.suite_path, vec!["auth", "login"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTest {
    /// Unique identifier assigned by the runner.
    pub id: String,

    /// Source file the test lives in.
    #[serde(default)]
    pub file: String,

    /// Describe/suite nesting, outermost first.
    #[serde(default)]
    pub suite_path: Vec<String>,

    /// Test title.
    pub title: String,

    /// Tags or annotations attached to the test.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Logical project (browser, device profile, ...).
    #[serde(default)]
    pub project: Option<String>,

    /// Final outcome.
    pub outcome: TestOutcome,

    /// Wall-clock duration in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,

    /// Retry ordinal, `0` for the first attempt.
    #[serde(default)]
    pub retry: u32,

    /// Raw error message and stack.
    #[serde(default)]
    pub error: Option<String>,

    /// Raw stdout chunks; each chunk may span several lines.
    #[serde(default)]
    pub stdout: Vec<String>,

    /// Raw stderr chunks.
    #[serde(default)]
    pub stderr: Vec<String>,

    /// Step tree.
    #[serde(default)]
    pub steps: Vec<StepRecord>,

    /// Files captured while the test ran.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl CompletedTest {
    pub fn new(id: impl Into<String>, title: impl Into<String>, outcome: TestOutcome) -> Self {
        Self {
            id: id.into(),
            file: String::new(),
            suite_path: Vec::new(),
            title: title.into(),
            tags: Vec::new(),
            project: None,
            outcome,
            duration_ms: 0,
            retry: 0,
            error: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            steps: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = file.into();
        self
    }

    pub fn with_suite_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suite_path = path.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_stdout(mut self, chunk: impl Into<String>) -> Self {
        self.stdout.push(chunk.into());
        self
    }

    pub fn with_stderr(mut self, chunk: impl Into<String>) -> Self {
        self.stderr.push(chunk.into());
        self
    }

    pub fn with_step(mut self, step: StepRecord) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_attachment(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            path: Some(path.into()),
            content_type: content_type.into(),
            size_bytes: None,
        });
        self
    }

    /// Like [`with_attachment`](Self::with_attachment), with the size known
    /// up front so capture doesn't touch the filesystem.
    pub fn with_sized_attachment(
        mut self,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        self.attachments.push(Attachment {
            name: name.into(),
            path: Some(path.into()),
            content_type: content_type.into(),
            size_bytes: Some(size_bytes),
        });
        self
    }
}

/// One sanitized test outcome.
///
/// Built once per completed test and never mutated afterwards. Free-text
/// fields (`error`, step errors, `stdout`, `stderr`) have already been
/// redacted and truncated.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub id: String,
    pub file: String,
    pub suite_path: Vec<String>,
    pub name: String,
    pub tags: Vec<String>,
    pub project: Option<String>,
    pub outcome: TestOutcome,
    pub duration: Duration,
    pub retry: u32,
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

impl ExecutionRecord {
    /// Borrows this record as its wire-safe projection.
    pub fn to_wire(&self) -> WireRecord<'_> {
        WireRecord {
            id: &self.id,
            file: &self.file,
            suite_path: &self.suite_path,
            name: &self.name,
            tags: &self.tags,
            project: self.project.as_deref(),
            outcome: self.outcome,
            duration_ms: self.duration.as_millis() as u64,
            retry: self.retry,
            error: self.error.as_deref(),
            steps: &self.steps,
            stdout: &self.stdout,
            stderr: &self.stderr,
            artifacts: self.artifacts.iter().map(Artifact::to_wire).collect(),
        }
    }
}

/// Serialized form of an [`ExecutionRecord`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord<'a> {
    pub id: &'a str,
    pub file: &'a str,
    pub suite_path: &'a [String],
    pub name: &'a str,
    pub tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<&'a str>,
    pub outcome: TestOutcome,
    pub duration_ms: u64,
    pub retry: u32,
    pub error: Option<&'a str>,
    pub steps: &'a [StepRecord],
    pub stdout: &'a [String],
    pub stderr: &'a [String],
    pub artifacts: Vec<WireArtifact<'a>>,
}

/// Identity and provenance for one test run.
///
/// Produced by [`ci::resolve_run_metadata`](crate::ci::resolve_run_metadata)
/// or supplied by the host; the pipeline only stamps `finished_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub run_id: String,
    pub source: String,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub ci_url: Option<String>,
    pub shard_index: Option<u32>,
    pub total_shards: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunMetadata {
    /// Creates metadata for a run starting now with a fresh run id.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            branch: None,
            commit_sha: None,
            ci_url: None,
            shard_index: None,
            total_shards: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_ci_url(mut self, url: impl Into<String>) -> Self {
        self.ci_url = Some(url.into());
        self
    }

    pub fn with_shard(mut self, index: u32, total: u32) -> Self {
        self.shard_index = Some(index);
        self.total_shards = Some(total);
        self
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}
