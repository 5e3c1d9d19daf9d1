//! Error types for the chunkmark library.
//!
//! Two distinct error types reflect two distinct layers:
//!
//! * [`ServiceError`] — a single call to the remote conversion service
//!   failed. Each variant knows whether it is **transient** (network blip,
//!   5xx, garbled body) or **definitive** (the service rejected the file or
//!   forgot the job). Transient errors are absorbed by [`crate::retry`] and
//!   only surface once the retry budget is spent.
//!
//! * [`ChunkmarkError`] — everything else: bad input, storage trouble,
//!   a merge that cannot be completed. Inside the engine these are recorded
//!   on the job as a human-readable string; only process-level problems
//!   (unusable cache directory, missing API key) are returned to callers.

use std::path::PathBuf;
use thiserror::Error;

/// Engine-level errors.
#[derive(Debug, Error)]
pub enum ChunkmarkError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input path does not exist.
    #[error("Input not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input is neither a regular file nor a directory with files in it.
    #[error("Invalid input '{input}': {reason}")]
    InvalidInput { input: String, reason: String },

    /// The sniffed content type is not on the service allow-list.
    #[error("Unsupported file type '{mime}' for '{path}'")]
    UnsupportedType { path: PathBuf, mime: String },

    /// The document parsed but contains nothing to convert.
    #[error("Document '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// The document could not be parsed at all.
    #[error("Document '{path}' is malformed: {detail}")]
    MalformedDocument { path: PathBuf, detail: String },

    // ── Service errors ────────────────────────────────────────────────────
    /// A call to the conversion service failed definitively or ran out of retries.
    #[error(transparent)]
    Service(#[from] ServiceError),

    // ── Storage errors ────────────────────────────────────────────────────
    /// Reading or writing a workspace, cache or output file failed.
    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted job record could not be decoded.
    #[error("Job record '{path}' is unreadable: {detail}")]
    StoreCorrupt { path: PathBuf, detail: String },

    // ── Combination errors ────────────────────────────────────────────────
    /// A completed unit's result is missing, or the merged document is empty.
    #[error("Failed to combine results: {0}")]
    Combination(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required credential was not supplied.
    #[error("Missing credential: {name} is not set.\nExport it, e.g. export {name}=...")]
    MissingCredential { name: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Splitting PDFs needs libpdfium at runtime. Either:\n\
  • let chunkmark download it (needs network on first run), or\n\
  • install it where the system linker can find it, or\n\
  • set PDFIUM_LIB_PATH=/path/to/libpdfium.\n\
Use --no-chunk to submit PDFs whole without pdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChunkmarkError {
    /// Wrap an I/O error with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChunkmarkError::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Errors from a single call to the conversion service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// Connection refused, reset, DNS failure and the like.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Non-success HTTP status other than 404.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The body was not the JSON shape we expect.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The service answered `success: false` to a submission.
    #[error("Submission rejected: {0}")]
    Rejected(String),

    /// The service has no record of this request id.
    #[error("Request '{request_id}' not found")]
    NotFound { request_id: String },

    /// The shared rate limiter was shut down.
    #[error("Rate limiter closed")]
    LimiterClosed,
}

impl ServiceError {
    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, timeouts, 429/5xx and malformed bodies are
    /// transient. Everything the service said on purpose is not.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Network(_)
            | ServiceError::Timeout { .. }
            | ServiceError::MalformedResponse(_) => true,
            ServiceError::Http { status, .. } => *status == 429 || *status >= 500,
            ServiceError::Rejected(_)
            | ServiceError::NotFound { .. }
            | ServiceError::LimiterClosed => false,
        }
    }
}
