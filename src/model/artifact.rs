//! Artifact metadata.
//!
//! An [`Artifact`] describes a captured file (trace, screenshot, video or
//! generic attachment) without holding its content. The local path is kept
//! for the upload stage and is never serialized.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

/// Content types that are already compressed and must not be gzipped again.
const PRECOMPRESSED_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/gif",
    "image/webp",
    "video/webm",
    "video/mp4",
    "application/zip",
    "application/gzip",
    "application/x-gzip",
    "application/zstd",
];

/// File extensions that are already compressed.
const PRECOMPRESSED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "webm", "mp4", "zip", "gz", "tgz", "zst", "br",
];

/// Kind of captured file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Trace,
    Screenshot,
    Video,
    Attachment,
}

impl ArtifactKind {
    /// Infers the kind from an attachment name and content type.
    ///
    /// Runners name traces `trace` and store them as zip archives, so the
    /// name check comes before the content-type check.
    pub fn infer(name: &str, content_type: &str) -> Self {
        let content_type = normalize_content_type(content_type);
        if name.eq_ignore_ascii_case("trace") {
            ArtifactKind::Trace
        } else if content_type.starts_with("image/") {
            ArtifactKind::Screenshot
        } else if content_type.starts_with("video/") {
            ArtifactKind::Video
        } else {
            ArtifactKind::Attachment
        }
    }
}

/// Returns `true` if a file is stored in an already-compressed format.
///
/// Either an allow-listed content type or an allow-listed extension is
/// enough. Content-type parameters are ignored and both checks are
/// case-insensitive.
///
/// ```
/// use std::path::Path;
/// use testwire::model::is_precompressed;
///
/// assert!(is_precompressed("image/PNG; q=1", Path::new("shot.bin")));
/// assert!(is_precompressed("application/octet-stream", Path::new("trace.ZIP")));
/// assert!(!is_precompressed("text/plain", Path::new("log.txt")));
/// ```
pub fn is_precompressed(content_type: &str, path: &Path) -> bool {
    let content_type = normalize_content_type(content_type);
    if PRECOMPRESSED_CONTENT_TYPES.contains(&content_type.as_str()) {
        return true;
    }

    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Metadata for one captured file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Identifier the ingestion API keys upload targets by.
    pub id: String,

    pub kind: ArtifactKind,

    /// Display name.
    pub name: String,

    /// Local file path. Never leaves the process.
    pub path: PathBuf,

    pub content_type: String,

    /// File size at capture time, `0` if the file couldn't be read.
    pub size_bytes: u64,

    /// Whether the file format is already compressed.
    pub precompressed: bool,
}

impl Artifact {
    /// Describes the file at `path`, reading its size from the filesystem.
    ///
    /// This is a blocking `stat`. A missing or unreadable file yields a size
    /// of zero; the upload stage reports the actual failure.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let size_bytes = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "artifact size unavailable");
                0
            }
        };

        Self::sized(name, path, content_type, size_bytes)
    }

    /// Describes the file at `path` with a size supplied by the caller.
    /// Never touches the filesystem.
    pub fn sized(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        content_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        let name = name.into();
        let path = path.into();
        let content_type = content_type.into();

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: ArtifactKind::infer(&name, &content_type),
            precompressed: is_precompressed(&content_type, &path),
            name,
            path,
            content_type,
            size_bytes,
        }
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the inferred kind.
    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }

    /// Borrows the wire-safe projection (no local path).
    pub fn to_wire(&self) -> WireArtifact<'_> {
        WireArtifact {
            id: &self.id,
            kind: self.kind,
            name: &self.name,
            content_type: &self.content_type,
            size_bytes: self.size_bytes,
            precompressed: self.precompressed,
        }
    }
}

/// Serialized form of an [`Artifact`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireArtifact<'a> {
    pub id: &'a str,
    pub kind: ArtifactKind,
    pub name: &'a str,
    pub content_type: &'a str,
    pub size_bytes: u64,
    pub precompressed: bool,
}
