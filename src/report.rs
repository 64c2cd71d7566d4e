//! Run lifecycle reporting.
//!
//! A host test runner drives a [`Reporter`] through three events:
//!
//! ```text
//! on_run_start(metadata) ──► on_test_complete(test) × N ──► on_run_end()
//! ```
//!
//! Implementations in this module:
//!
//! | Reporter | Purpose |
//! |----------|---------|
//! | [`NullReporter`] | Discards everything |
//! | [`MultiReporter`] | Fans events out to several reporters in order |
//! | [`ConsoleReporter`] | Terminal progress and outcome summary |
//! | [`CloudReporter`] | Sanitizes, buffers and ships results to the ingestion API |

pub mod cloud;

pub use cloud::{CloudReporter, DeliveryStats, ErrorCallback, MetricsCallback, SetupError};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::model::{CompletedTest, RunMetadata, TestOutcome};

/// Receives run lifecycle events from a host test runner.
///
/// Reporters never fail the host run: every method is infallible and
/// implementations surface problems through logging or callbacks.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Called once before any test completes.
    async fn on_run_start(&self, run: &RunMetadata);

    /// Called once per finished test, retries included.
    async fn on_test_complete(&self, test: &CompletedTest);

    /// Called once after the last test.
    async fn on_run_end(&self);
}

#[async_trait]
impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    async fn on_run_start(&self, run: &RunMetadata) {
        (**self).on_run_start(run).await;
    }

    async fn on_test_complete(&self, test: &CompletedTest) {
        (**self).on_test_complete(test).await;
    }

    async fn on_run_end(&self) {
        (**self).on_run_end().await;
    }
}

/// A reporter that does nothing (for testing or when output is not needed).
pub struct NullReporter;

#[async_trait]
impl Reporter for NullReporter {
    async fn on_run_start(&self, _run: &RunMetadata) {}
    async fn on_test_complete(&self, _test: &CompletedTest) {}
    async fn on_run_end(&self) {}
}

/// A reporter that combines multiple reporters.
pub struct MultiReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl MultiReporter {
    pub fn new() -> Self {
        Self {
            reporters: Vec::new(),
        }
    }

    /// Adds a reporter; events reach reporters in the order they were added.
    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporters.push(Box::new(reporter));
        self
    }
}

impl Default for MultiReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for MultiReporter {
    async fn on_run_start(&self, run: &RunMetadata) {
        for reporter in &self.reporters {
            reporter.on_run_start(run).await;
        }
    }

    async fn on_test_complete(&self, test: &CompletedTest) {
        for reporter in &self.reporters {
            reporter.on_test_complete(test).await;
        }
    }

    async fn on_run_end(&self) {
        for reporter in &self.reporters {
            reporter.on_run_end().await;
        }
    }
}

/// Outcome counts collected by [`ConsoleReporter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    pub interrupted: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::TimedOut => self.timed_out += 1,
            TestOutcome::Interrupted => self.interrupted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.timed_out + self.interrupted
    }

    pub fn success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.interrupted == 0
    }
}

/// Console reporter that shows progress in the terminal.
pub struct ConsoleReporter {
    progress: Mutex<Option<indicatif::ProgressBar>>,
    counts: Mutex<OutcomeCounts>,
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            counts: Mutex::new(OutcomeCounts::default()),
            verbose,
        }
    }

    pub fn counts(&self) -> OutcomeCounts {
        *self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Reporter for ConsoleReporter {
    async fn on_run_start(&self, run: &RunMetadata) {
        println!(
            "Reporting run {} ({})",
            console::style(&run.run_id).bold(),
            run.branch.as_deref().unwrap_or("unknown branch")
        );

        let pb = indicatif::ProgressBar::new_spinner();
        if let Ok(style) = indicatif::ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} tests {msg}")
        {
            pb.set_style(style);
        }

        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb);
    }

    async fn on_test_complete(&self, test: &CompletedTest) {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(test.outcome);

        let status = match test.outcome {
            TestOutcome::Passed => console::style("PASS").green(),
            TestOutcome::Failed => console::style("FAIL").red(),
            TestOutcome::Skipped => console::style("SKIP").yellow(),
            TestOutcome::TimedOut => console::style("TIME").red().bold(),
            TestOutcome::Interrupted => console::style("INTR").red().bold(),
        };
        let line = format!("{} {}", status, test.title);
        let noteworthy = self.verbose || !test.outcome.is_success();

        match self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            Some(pb) => {
                pb.inc(1);
                if noteworthy {
                    pb.println(line);
                }
            }
            None if noteworthy => println!("{}", line),
            None => {}
        }
    }

    async fn on_run_end(&self) {
        if let Some(pb) = self
            .progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            pb.finish_and_clear();
        }

        let counts = self.counts();
        println!();
        println!("Test Results:");
        println!("  Total:       {}", counts.total());
        println!("  Passed:      {}", console::style(counts.passed).green());
        println!("  Failed:      {}", console::style(counts.failed).red());
        println!("  Skipped:     {}", console::style(counts.skipped).yellow());
        if counts.timed_out > 0 {
            println!("  Timed out:   {}", console::style(counts.timed_out).red());
        }
        if counts.interrupted > 0 {
            println!(
                "  Interrupted: {}",
                console::style(counts.interrupted).red().bold()
            );
        }
    }
}
