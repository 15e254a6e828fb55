//! Error types for the pdfglean library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`GleanError`] is **fatal**: the operation cannot proceed at all
//!   (non-PDF upload, unparseable document, invalid batch request, broken
//!   working-set directory). Returned as `Err(GleanError)` from the
//!   top-level entry points.
//!
//! * [`ItemError`] is **non-fatal**: the external text-extraction call failed
//!   for a single image (API error, network blip, unreadable file). Carried
//!   inside a [`crate::progress::ProgressEvent`] so the batch keeps going;
//!   one bad image never aborts the run.
//!
//! Every `Display` string here is written to be shown directly to an end
//! user: no internal paths beyond what the user supplied, no stack traces.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdfglean library.
///
/// Per-image failures during a batch run use [`ItemError`] and surface as
/// progress events rather than propagating here.
#[derive(Debug, Error)]
pub enum GleanError {
    // ── Upload / request validation ───────────────────────────────────────
    /// The uploaded file is not a PDF (extension allow-list is `pdf` only).
    #[error("Unsupported file '{filename}': only PDF files are accepted.")]
    UnsupportedUpload { filename: String },

    /// A batch request failed pre-flight validation (empty selection,
    /// prompt, or credential). Nothing was written to disk.
    #[error("{0}")]
    InvalidRequest(String),

    // ── PDF errors ────────────────────────────────────────────────────────
    /// The document could not be parsed as a PDF. Working-set state after
    /// this error is best effort: the pre-extraction clear may already have
    /// happened.
    #[error("Could not parse PDF '{}': {detail}", path.display())]
    MalformedPdf { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// A filesystem operation on the working set failed.
    #[error("Working-set I/O failure at '{}': {source}", path.display())]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── External capability ───────────────────────────────────────────────
    /// The text-extraction session could not be constructed at all
    /// (malformed credential, HTTP client build failure).
    #[error("Could not start text-extraction session: {0}")]
    SessionInit(String),
}

impl GleanError {
    /// Wrap an `io::Error` with the path it occurred on.
    pub(crate) fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GleanError::StoreIo {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal failure for a single image during a batch run.
///
/// Reported as an error progress event naming the image; the batch then
/// continues with the next selection entry.
#[derive(Debug, Clone, Error)]
pub enum ItemError {
    /// The model API rejected the request or returned an error status.
    #[error("API error: {0}")]
    Api(String),

    /// The request never reached the API (DNS, connect, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// The API answered but the response carried no extractable text.
    #[error("Model returned no text")]
    EmptyResponse,

    /// The image file could not be read from the working set.
    #[error("Could not read image: {0}")]
    UnreadableImage(String),
}
