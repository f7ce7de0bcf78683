//! Error types for the pdfpack library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`PipelineError`]: **fatal**. The request cannot produce a document
//!   (unreadable archive, nothing to merge). An input that stays corrupt
//!   after repair is reported as [`PipelineError::NoValidPages`] naming the
//!   document. Returned as `Err(PipelineError)` from the `run*` entry points.
//!
//! * [`SkipReason`]: **per image**. One image could not be re-encoded and is
//!   left byte-for-byte untouched; the pass over the document continues.
//!
//! * [`TransformError`]: **per external invocation**. A repair or tier
//!   rewrite through an out-of-process tool failed or timed out. During
//!   recompression this marks the tier as failed and the ladder moves on.
//!
//! Budget misses are not errors at all: the best-effort document is returned
//! with `final_size > budget`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the pdfpack library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Request errors ────────────────────────────────────────────────────
    /// A submitted part looked like a ZIP archive but could not be read as one.
    #[error("Archive '{name}' could not be read: {detail}")]
    ArchiveFormat { name: String, detail: String },

    /// No PDF content was resolved from the submitted parts.
    #[error("No PDF documents were found in the submitted files")]
    EmptyInput,

    /// The merge produced zero pages.
    ///
    /// Either every resolved document was empty, or `unreadable` names a
    /// document that failed to open and failed again after the repair pass.
    /// One unrepairable input fails the whole request.
    #[error("No pages could be merged from {documents} document(s){}", unreadable_suffix(.unreadable))]
    NoValidPages {
        documents: usize,
        unreadable: Option<UnreadableDocument>,
    },

    // ── Boundary errors ───────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither a readable path nor a valid URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Structured `{ "error": "..." }` body for the response boundary.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.to_string(),
        }
    }
}

/// A document that could not be opened, even after repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadableDocument {
    pub name: String,
    pub detail: String,
}

impl fmt::Display for UnreadableDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PDF '{}' is corrupt and could not be repaired: {}",
            self.name, self.detail
        )
    }
}

fn unreadable_suffix(unreadable: &Option<UnreadableDocument>) -> String {
    unreadable
        .as_ref()
        .map(|doc| format!(": {doc}"))
        .unwrap_or_default()
}

/// The failure body surfaced to callers at the request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
}

/// Why a single image was left unmodified during a recompression pass.
///
/// Never surfaced as a request failure; counted in the tier report.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum SkipReason {
    #[error("image is {width}x{height}, both sides must be at least 2 px")]
    TooSmall { width: i64, height: i64 },

    #[error("missing or malformed /{0}")]
    MissingKey(String),

    #[error("unsupported filter chain: {0}")]
    UnsupportedFilter(String),

    #[error("unsupported bits per component: {0}")]
    UnsupportedBitDepth(i64),

    #[error("unsupported colour space: {0}")]
    UnsupportedColorSpace(String),

    #[error("unsupported predictor {0}")]
    UnsupportedPredictor(i64),

    /// Declared geometry disagrees with the payload length, its decoded
    /// length, or its decode parameters.
    #[error("geometry mismatch: expected {expected}, found {actual}")]
    GeometryMismatch { expected: usize, actual: usize },

    /// The re-encoded image was not smaller than the one already stored.
    #[error("re-encoded size {new} is not smaller than {old}")]
    NotSmaller { old: usize, new: usize },

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("codec failed: {0}")]
    Codec(String),
}

/// A failed out-of-process document transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The tool binary is not installed or not on `PATH`.
    #[error("transform tool '{tool}' is not available")]
    ToolNotFound { tool: String },

    /// The tool did not finish within its wall-clock budget.
    #[error("transform timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The tool exited unsuccessfully.
    #[error("transform exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// The tool exited successfully but produced nothing.
    #[error("transform produced an empty document")]
    EmptyOutput,

    /// Scratch directory or pipe I/O failed.
    #[error("transform I/O error: {0}")]
    Io(#[from] std::io::Error),
}
