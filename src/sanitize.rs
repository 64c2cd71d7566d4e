//! Capture-time redaction and truncation.
//!
//! Every free-text field of a test result passes through the [`Sanitizer`]
//! before it is stored in the buffer, so no unredacted text can reach the
//! transport. Two independent concerns live here:
//!
//! 1. **Redaction**: every match of a configured pattern is replaced by
//!    [`REDACTION_MARKER`]. Patterns are the built-in set (e-mail addresses,
//!    bearer tokens, JWTs, API keys, card numbers, national ids, phone
//!    numbers, cloud and source-control tokens, URL credentials) optionally
//!    extended or replaced by caller patterns.
//! 2. **Truncation**: line count first, then length (see [`truncate`]).
//!
//! Redaction runs first so a secret that straddles the cut point is never
//! half-emitted.
//!
//! # Example
//!
//! ```
//! use testwire::config::SanitizeConfig;
//! use testwire::sanitize::Sanitizer;
//!
//! let sanitizer = Sanitizer::new(&SanitizeConfig::default())?;
//! let clean = sanitizer.redact("login failed for jane@example.com");
//!
//! assert_eq!(clean, "login failed for [REDACTED]");
//! # Ok::<(), testwire::config::ConfigError>(())
//! ```

mod patterns;

use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::config::{ConfigError, SanitizeConfig};
use crate::model::{Artifact, CompletedTest, ExecutionRecord, StepRecord};

use patterns::BUILTIN_PATTERNS;

/// Replaces every redacted match.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Appended when text is cut for length.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

struct Rule {
    name: String,
    regex: Regex,
    replacement: String,
}

impl Rule {
    /// Applies this rule to every segment between existing markers.
    ///
    /// Marker text is never rescanned, which keeps redaction idempotent even
    /// for caller patterns that would match the marker itself.
    fn apply(&self, text: &str) -> String {
        if !text.contains(REDACTION_MARKER) {
            return self
                .regex
                .replace_all(text, self.replacement.as_str())
                .into_owned();
        }

        text.split(REDACTION_MARKER)
            .map(|segment| self.regex.replace_all(segment, self.replacement.as_str()))
            .collect::<Vec<_>>()
            .join(REDACTION_MARKER)
    }
}

/// Redacts and truncates free text from test results.
///
/// A `Sanitizer` is a pure function of its configuration: it holds no
/// mutable state and can be shared freely.
pub struct Sanitizer {
    rules: Vec<Rule>,
    max_error_length: usize,
    max_stack_trace_lines: usize,
    max_console_lines: usize,
}

impl std::fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sanitizer")
            .field(
                "rules",
                &self.rules.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            )
            .field("max_error_length", &self.max_error_length)
            .field("max_stack_trace_lines", &self.max_stack_trace_lines)
            .field("max_console_lines", &self.max_console_lines)
            .finish()
    }
}

impl Sanitizer {
    /// Builds a sanitizer from configuration.
    ///
    /// With redaction disabled the sanitizer only truncates.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] if a caller pattern doesn't
    /// compile.
    pub fn new(config: &SanitizeConfig) -> Result<Self, ConfigError> {
        let redaction = &config.redaction;
        let mut rules = Vec::new();

        if redaction.enabled {
            if !redaction.replace_builtin {
                for builtin in BUILTIN_PATTERNS {
                    let regex =
                        Regex::new(builtin.regex).map_err(|e| ConfigError::InvalidPattern {
                            pattern: builtin.name.to_string(),
                            reason: e.to_string(),
                        })?;
                    rules.push(Rule {
                        name: builtin.name.to_string(),
                        regex,
                        replacement: builtin.replacement.to_string(),
                    });
                }
            }

            for (i, pattern) in redaction.patterns.iter().enumerate() {
                rules.push(Rule {
                    name: format!("custom_{}", i),
                    regex: pattern.compile()?,
                    replacement: REDACTION_MARKER.to_string(),
                });
            }
        }

        debug!(rules = rules.len(), "sanitizer ready");

        Ok(Self {
            rules,
            max_error_length: config.max_error_length,
            max_stack_trace_lines: config.max_stack_trace_lines,
            max_console_lines: config.max_console_lines,
        })
    }

    /// Replaces every pattern match with [`REDACTION_MARKER`].
    ///
    /// Redacting already-redacted text returns it unchanged.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for rule in &self.rules {
            out = rule.apply(&out);
        }
        out
    }

    /// Redacts an error message and truncates it to the configured line and
    /// length limits.
    pub fn sanitize_error(&self, text: &str) -> String {
        truncate(
            &self.redact(text),
            self.max_stack_trace_lines,
            self.max_error_length,
        )
    }

    /// Splits console chunks into lines, redacts and length-caps each line,
    /// and keeps at most the last `max_console_lines` lines.
    ///
    /// When lines are dropped, the first returned line says how many.
    pub fn sanitize_console(&self, chunks: &[String]) -> Vec<String> {
        let lines: Vec<&str> = chunks.iter().flat_map(|chunk| chunk.lines()).collect();
        let skip = lines.len().saturating_sub(self.max_console_lines);

        let mut out = Vec::with_capacity(lines.len() - skip + 1);
        if skip > 0 {
            out.push(format!("... {} earlier lines truncated", skip));
        }
        out.extend(
            lines[skip..]
                .iter()
                .map(|line| truncate_length(&self.redact(line), self.max_error_length)),
        );
        out
    }

    fn sanitize_steps(&self, steps: &[StepRecord]) -> Vec<StepRecord> {
        steps
            .iter()
            .map(|step| StepRecord {
                title: self.redact(&step.title),
                duration_ms: step.duration_ms,
                error: step.error.as_deref().map(|e| self.sanitize_error(e)),
                steps: self.sanitize_steps(&step.steps),
            })
            .collect()
    }

    /// Turns a raw completed test into a sanitized [`ExecutionRecord`].
    ///
    /// Attachments without a local path are dropped; the rest become
    /// [`Artifact`]s. Sizes the runner didn't report are read from disk,
    /// a blocking call per attachment.
    pub fn capture(&self, test: &CompletedTest) -> ExecutionRecord {
        let artifacts = test
            .attachments
            .iter()
            .filter_map(|attachment| {
                let path = attachment.path.as_ref()?;
                let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                let name = attachment.name.clone();
                let content_type = attachment.content_type.clone();
                Some(match attachment.size_bytes {
                    Some(size) => Artifact::sized(name, path, content_type, size),
                    None => Artifact::new(name, path, content_type),
                })
            })
            .collect();

        ExecutionRecord {
            id: test.id.clone(),
            file: test.file.clone(),
            suite_path: test.suite_path.clone(),
            name: test.title.clone(),
            tags: test.tags.clone(),
            project: test.project.clone(),
            outcome: test.outcome,
            duration: Duration::from_millis(test.duration_ms),
            retry: test.retry,
            error: test.error.as_deref().map(|e| self.sanitize_error(e)),
            steps: self.sanitize_steps(&test.steps),
            stdout: self.sanitize_console(&test.stdout),
            stderr: self.sanitize_console(&test.stderr),
            artifacts,
        }
    }
}

/// Truncates `text` to at most `max_lines` lines, then to `max_length`
/// characters.
///
/// A line cut appends `"\n... <k> more lines truncated"`. A length cut on
/// text whose lines were not cut appends [`TRUNCATION_MARKER`]. When both
/// apply, the line marker is kept and the body is shortened so the whole
/// result stays within `max_length + TRUNCATION_MARKER.len()` characters.
/// A line marker longer than that bound is kept whole over an empty body.
///
/// ```
/// use testwire::sanitize::truncate;
///
/// assert_eq!(truncate("a\nb\nc", 2, 100), "a\nb\n... 1 more lines truncated");
/// assert_eq!(truncate("abcdef", 10, 3), "abc... [truncated]");
/// ```
pub fn truncate(text: &str, max_lines: usize, max_length: usize) -> String {
    let line_count = text.lines().count();

    let (body, mut suffix) = if line_count > max_lines {
        let kept = text.lines().take(max_lines).collect::<Vec<_>>().join("\n");
        let marker = format!("\n... {} more lines truncated", line_count - max_lines);
        (kept, marker)
    } else {
        (text.to_string(), String::new())
    };

    if body.chars().count() <= max_length {
        return body + &suffix;
    }

    let budget = if suffix.is_empty() {
        suffix = TRUNCATION_MARKER.to_string();
        max_length
    } else {
        (max_length + TRUNCATION_MARKER.chars().count()).saturating_sub(suffix.chars().count())
    };
    body.chars().take(budget).collect::<String>() + &suffix
}

/// Cuts a single line to `max_length` characters, appending
/// [`TRUNCATION_MARKER`] when cut.
pub fn truncate_length(text: &str, max_length: usize) -> String {
    if text.chars().count() <= max_length {
        return text.to_string();
    }
    text.chars().take(max_length).collect::<String>() + TRUNCATION_MARKER
}
