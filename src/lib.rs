//! # pptx-extract
//!
//! Pull structured store-visit records out of PowerPoint decks.
//!
//! ## What it does
//!
//! Field teams report visits as slides: one photo plus a few lines of
//! free-form text naming the partner code, store, employee, supervisor and
//! send date. This crate unpacks the `.pptx`, pairs every slide with its
//! photo, uploads the photos to object storage, asks an LLM to read the
//! five fields out of each slide's text, and tracks the whole run as a
//! pollable background job.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PPTX bytes
//!  │
//!  ├─ 1. Archive        ZIP directory, slideN.xml ordered by N, <a:t> text
//!  ├─ 2. Relationships  slideN.xml.rels → first media/*.{jpg,jpeg,png}
//!  ├─ 3. Media          batched uploads → public URLs (failures → "")
//!  ├─ 4. Fields         batched LLM calls → five strings (failures → drop)
//!  └─ 5. Records        ordered by slide, slideNumber + imageUrl injected
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pptx_extract::{
//!     JobService, ExtractionConfig, FsObjectStore, PipelineContext, ServiceConfig,
//!     SubmitJobRequest,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let store = Arc::new(FsObjectStore::new("./storage"));
//!     let ctx = PipelineContext::with_llm(ExtractionConfig::default(), store)?;
//!     let service = JobService::new(ctx, ServiceConfig::default()).await?;
//!
//!     let submitted = service
//!         .submit_job(SubmitJobRequest {
//!             file_name: "visitas.pptx".into(),
//!             file_size: 1_048_576,
//!             storage_path: "uploads/visitas.pptx".into(),
//!         })
//!         .await;
//!     let job_id = submitted.job_id.ok_or("submit failed")?;
//!
//!     let status = service.check_job_status(&job_id.to_string()).await;
//!     println!("{}", serde_json::to_string_pretty(&status)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pptx-extract` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pptx-extract = { version = "0.1", default-features = false }
//! ```
//!
//! ## Offline extraction
//!
//! [`PatternFieldExtractor`] reads the standard slide layout with regular
//! expressions and needs no API key. Plug any other strategy in through the
//! [`FieldExtractor`] trait.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod service;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, ServiceConfig};
pub use error::{PptxError, SlideError};
pub use extract::{
    extract_from_bytes, extract_from_store, inspect, write_records, ArchiveSummary,
    PipelineContext,
};
pub use job::{JobStatus, JobTracker, JobUpdate, ProcessingJob, TransitionError};
pub use output::{
    ExtractedSlideData, ExtractionOutput, ExtractionStats, SlideFields, SlideImageRef, SlideText,
    UploadedImage,
};
pub use pipeline::fields::{FieldExtractor, LlmFieldExtractor};
pub use pipeline::pattern::PatternFieldExtractor;
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use service::{
    JobService, JobStatusResponse, JobView, SubmitJobRequest, SubmitJobResponse,
};
pub use storage::{FsObjectStore, HttpObjectStore, MemoryObjectStore, ObjectStore};
