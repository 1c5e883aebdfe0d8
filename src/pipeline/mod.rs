//! Pipeline stages for PPTX slide extraction.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable; the orchestrator in [`crate::extract`] threads a
//! single context object through them.
//!
//! ## Data Flow
//!
//! ```text
//! archive ──▶ relationships ──▶ media ──▶ fields
//! (ZIP+XML)   (slide→image)     (upload)  (LLM / pattern)
//! ```
//!
//! 1. [`archive`]: open the ZIP, order slide parts, pull `<a:t>` text
//! 2. [`relationships`]: pair each slide with its first raster image
//! 3. [`media`]: read media bytes and upload them in batches
//! 4. [`fields`]: turn slide text into five fields, batched; the
//!    only stage besides uploads with network I/O
//! 5. [`pattern`]: offline regex implementation of the fields stage

pub mod archive;
pub mod fields;
pub mod media;
pub mod pattern;
pub mod relationships;
