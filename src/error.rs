//! Error types for the pptx-extract library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PptxError`]: **Fatal**: the job cannot produce a result at all
//!   (not a ZIP archive, no slide parts, every slide dropped, storage
//!   unreachable). Returned as `Err(PptxError)` from the orchestrator entry
//!   points; its `Display` text is what a failed job reports to pollers.
//!
//! * [`SlideError`]: **Non-fatal**: a single slide's upload or field
//!   extraction failed. The slide loses its image URL or is dropped from the
//!   result set, and every other slide in the batch carries on.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the pptx-extract library.
///
/// Slide-level failures use [`SlideError`] and never escape their batch.
#[derive(Debug, Error)]
pub enum PptxError {
    // ── Input-format errors ───────────────────────────────────────────────
    /// The uploaded bytes are not a readable ZIP container.
    #[error("File is not a valid PPTX archive: {detail}")]
    InvalidArchive { detail: String },

    /// The archive opened but holds no `ppt/slides/slideN.xml` parts.
    #[error("No data found: the presentation contains no slides")]
    NoSlides,

    /// Every slide part was empty once markup was stripped.
    #[error("No data found: none of the {total} slides contains text")]
    NoUsableText { total: usize },

    /// Every slide was dropped by the field extraction stage.
    #[error("No data found: field extraction failed for all {total} slides")]
    NoDataExtracted { total: usize },

    // ── Storage errors ────────────────────────────────────────────────────
    /// The object store rejected or failed a request.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The referenced object does not exist in the store.
    #[error("Object not found in storage: '{path}'")]
    ObjectNotFound { path: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Request / job errors ──────────────────────────────────────────────
    /// A submit request failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No job with this id is tracked.
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output or job-record file.
    #[error("Failed to write file '{path}': {source}")]
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
    /// Unexpected internal error (task panic, closed channel, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single slide.
///
/// Upload failures leave the slide's `imageUrl` empty; every other variant
/// drops the slide from the final record set.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum SlideError {
    /// Nothing left to send to the extraction service.
    #[error("Slide {slide}: no text after stripping markup")]
    EmptyText { slide: u32 },

    /// Service call failed (after any configured retries).
    #[error("Slide {slide}: extraction call failed after {retries} retries: {detail}")]
    ExtractionFailed {
        slide: u32,
        retries: u32,
        detail: String,
    },

    /// Service call exceeded the per-call timeout.
    #[error("Slide {slide}: extraction call timed out after {secs}s")]
    Timeout { slide: u32, secs: u64 },

    /// The service answered, but not with the expected JSON object.
    #[error("Slide {slide}: malformed structured response: {detail}")]
    MalformedResponse { slide: u32, detail: String },

    /// An offline extractor found none of the fields.
    #[error("Slide {slide}: no fields found in slide text")]
    NoFieldsFound { slide: u32 },

    /// The relationship part names a media entry the archive lacks.
    #[error("Slide {slide}: media entry '{name}' missing from archive")]
    MissingMedia { slide: u32, name: String },

    /// Upload of the slide's image to object storage failed.
    #[error("Slide {slide}: image upload failed: {detail}")]
    UploadFailed { slide: u32, detail: String },
}

impl SlideError {
    /// The slide this error belongs to.
    pub fn slide(&self) -> u32 {
        match self {
            SlideError::EmptyText { slide }
            | SlideError::ExtractionFailed { slide, .. }
            | SlideError::Timeout { slide, .. }
            | SlideError::MalformedResponse { slide, .. }
            | SlideError::NoFieldsFound { slide }
            | SlideError::MissingMedia { slide, .. }
            | SlideError::UploadFailed { slide, .. } => *slide,
        }
    }
}

impl From<zip::result::ZipError> for PptxError {
    fn from(e: zip::result::ZipError) -> Self {
        PptxError::InvalidArchive {
            detail: e.to_string(),
        }
    }
}
