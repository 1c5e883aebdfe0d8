//! Pipeline orchestration: archive bytes → ordered slide records.
//!
//! ## Stages
//!
//! 1. Archive work (open, slide text, image relationships, media bytes) runs
//!    in `spawn_blocking`; ZIP inflation and XML parsing are CPU-bound.
//! 2. Images are uploaded in sequential batches.
//! 3. Slide text goes through the [`FieldExtractor`] in sequential batches.
//! 4. Records are assembled in slide order; a slide without an uploaded
//!    image gets an empty `imageUrl`.
//!
//! Per-slide problems never abort the run. The run fails only when the
//! archive has no slides, when no slide has text, or when every slide was
//! dropped.

use crate::config::ExtractionConfig;
use crate::error::{PptxError, SlideError};
use crate::output::{
    ExtractedSlideData, ExtractionOutput, ExtractionStats, SlideImageRef, SlideText,
};
use crate::pipeline::archive::PptxArchive;
use crate::pipeline::fields::{self, FieldExtractor, LlmFieldExtractor};
use crate::pipeline::media::{self, MediaPayload};
use crate::pipeline::relationships;
use crate::progress::ProgressCallback;
use crate::storage::ObjectStore;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Everything a pipeline run needs, passed explicitly into every stage.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: ExtractionConfig,
    pub store: Arc<dyn ObjectStore>,
    pub extractor: Arc<dyn FieldExtractor>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("config", &self.config)
            .field("store", &self.store.name())
            .field("extractor", &self.extractor.name())
            .finish()
    }
}

impl PipelineContext {
    pub fn new(
        config: ExtractionConfig,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn FieldExtractor>,
    ) -> Self {
        Self {
            config,
            store,
            extractor,
        }
    }

    /// Context whose extractor is an LLM resolved from `config` / environment.
    pub fn with_llm(
        config: ExtractionConfig,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self, PptxError> {
        let extractor: Arc<dyn FieldExtractor> = Arc::new(LlmFieldExtractor::from_config(&config)?);
        Ok(Self::new(config, store, extractor))
    }
}

/// Slide texts and image references, without any network work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveSummary {
    pub slides: Vec<SlideText>,
    pub images: Vec<SlideImageRef>,
}

/// Run the full pipeline over an archive held in memory.
///
/// Progress events go to `ctx.config.progress_callback`.
///
/// # Errors
/// Only fatal conditions: unreadable archive, no slides, no slide text, or
/// every slide dropped. Per-slide failures are reported in
/// [`ExtractionOutput::slide_errors`].
pub async fn extract_from_bytes(
    bytes: Vec<u8>,
    ctx: &PipelineContext,
) -> Result<ExtractionOutput, PptxError> {
    run_pipeline(bytes, ctx, ctx.config.progress_callback.as_ref()).await
}

/// Download the archive at `storage_path` from `ctx.store`, then run the
/// pipeline.
pub async fn extract_from_store(
    storage_path: &str,
    ctx: &PipelineContext,
) -> Result<ExtractionOutput, PptxError> {
    info!("Fetching '{}' from {}", storage_path, ctx.store.name());
    let bytes = ctx.store.get(storage_path).await?;
    extract_from_bytes(bytes, ctx).await
}

/// Read slide texts and image references without uploading or extracting.
pub async fn inspect(bytes: Vec<u8>) -> Result<ArchiveSummary, PptxError> {
    tokio::task::spawn_blocking(move || {
        let mut archive = PptxArchive::open(bytes)?;
        let slides = archive.slide_texts()?;
        let images = relationships::resolve_slide_images(&mut archive)?;
        Ok(ArchiveSummary { slides, images })
    })
    .await
    .map_err(|e| PptxError::Internal(format!("Archive task panicked: {}", e)))?
}

/// Write records as pretty JSON.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_records(
    records: &[ExtractedSlideData],
    output_path: impl AsRef<Path>,
) -> Result<(), PptxError> {
    let path = output_path.as_ref();
    let json = serde_json::to_vec_pretty(records)
        .map_err(|e| PptxError::Internal(format!("Failed to serialise records: {}", e)))?;
    write_atomic(path, &json).await
}

/// Write `data` to `path` via a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), PptxError> {
    let fail = |source: std::io::Error| PptxError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(fail)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, data).await.map_err(fail)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(fail)?;
    Ok(())
}

// ── Internals ────────────────────────────────────────────────────────────

struct ArchiveContents {
    texts: Vec<SlideText>,
    image_refs: usize,
    payloads: Vec<MediaPayload>,
    media_errors: Vec<SlideError>,
}

fn read_archive_blocking(bytes: Vec<u8>) -> Result<ArchiveContents, PptxError> {
    let mut archive = PptxArchive::open(bytes)?;
    let texts = archive.slide_texts()?;
    let refs = relationships::resolve_slide_images(&mut archive)?;
    let (payloads, media_errors) = media::collect_media(&mut archive, &refs)?;
    Ok(ArchiveContents {
        texts,
        image_refs: refs.len(),
        payloads,
        media_errors,
    })
}

pub(crate) async fn run_pipeline(
    bytes: Vec<u8>,
    ctx: &PipelineContext,
    progress: Option<&ProgressCallback>,
) -> Result<ExtractionOutput, PptxError> {
    let total_start = Instant::now();
    let config = &ctx.config;
    info!("Starting extraction: {} bytes", bytes.len());

    // ── Step 1: Archive ──────────────────────────────────────────────────
    let archive_start = Instant::now();
    let contents = tokio::task::spawn_blocking(move || read_archive_blocking(bytes))
        .await
        .map_err(|e| PptxError::Internal(format!("Archive task panicked: {}", e)))??;
    let archive_duration_ms = archive_start.elapsed().as_millis() as u64;

    let ArchiveContents {
        texts,
        image_refs,
        payloads,
        media_errors,
    } = contents;
    let total = texts.len();
    info!(
        "Archive read in {}ms: {} slides, {} image references",
        archive_duration_ms, total, image_refs
    );

    if let Some(cb) = progress {
        cb.on_extraction_start(total);
    }

    if texts.iter().all(|t| t.text.trim().is_empty()) {
        return Err(PptxError::NoUsableText { total });
    }

    let mut slide_errors = media_errors;
    if let Some(cb) = progress {
        for e in &slide_errors {
            cb.on_slide_error(e.slide(), &e.to_string());
        }
    }

    // ── Step 2: Upload images ────────────────────────────────────────────
    let upload_start = Instant::now();
    let (uploaded, upload_errors) =
        media::upload_images(&ctx.store, payloads, config.upload_batch_size, progress).await;
    let upload_duration_ms = upload_start.elapsed().as_millis() as u64;
    slide_errors.extend(upload_errors);

    let image_urls: HashMap<u32, String> = uploaded
        .into_iter()
        .filter(|u| u.is_uploaded())
        .map(|u| (u.slide_number, u.public_url))
        .collect();

    // ── Step 3: Extract fields ───────────────────────────────────────────
    let extraction_start = Instant::now();
    let (extracted, field_errors) = fields::extract_all(
        &ctx.extractor,
        &texts,
        config.extraction_batch_size,
        progress,
    )
    .await;
    let extraction_duration_ms = extraction_start.elapsed().as_millis() as u64;
    slide_errors.extend(field_errors);

    if extracted.is_empty() {
        return Err(PptxError::NoDataExtracted { total });
    }

    // ── Step 4: Assemble ─────────────────────────────────────────────────
    let mut records: Vec<ExtractedSlideData> = extracted
        .into_iter()
        .map(|(slide_number, fields)| {
            let image_url = image_urls.get(&slide_number).cloned().unwrap_or_default();
            ExtractedSlideData::from_fields(fields, slide_number, image_url)
        })
        .collect();
    records.sort_by_key(|r| r.slide_number);
    slide_errors.sort_by_key(|e| e.slide());

    let stats = ExtractionStats {
        total_slides: total,
        extracted_slides: records.len(),
        dropped_slides: total - records.len(),
        images_resolved: image_refs,
        images_uploaded: image_urls.len(),
        archive_duration_ms,
        upload_duration_ms,
        extraction_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    debug!("Per-slide problems: {:?}", slide_errors);
    info!(
        "Extraction complete: {}/{} slides, {} images, {}ms total",
        stats.extracted_slides, total, stats.images_uploaded, stats.total_duration_ms
    );

    if let Some(cb) = progress {
        cb.on_extraction_complete(total, records.len());
    }

    Ok(ExtractionOutput {
        records,
        slide_errors,
        stats,
    })
}
