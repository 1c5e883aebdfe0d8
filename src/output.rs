//! Data model shared by the pipeline stages and the job tracker.
//!
//! Field names on the wire follow the record layout consumed by the
//! evaluation UI (`codigoParceiro`, `nomeLoja`, ...), hence the camelCase
//! renames.

use crate::error::SlideError;
use serde::{Deserialize, Serialize};

/// Plain text recovered from one slide part.
///
/// `slide_number` is 1-based and contiguous, assigned after sorting parts by
/// the numeric suffix of their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideText {
    pub slide_number: u32,
    pub text: String,
}

/// The first image a slide's relationship part points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideImageRef {
    pub slide_number: u32,
    pub media_filename: String,
}

/// Result of uploading one slide image. An empty `public_url` marks a failed
/// upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedImage {
    pub slide_number: u32,
    pub public_url: String,
}

impl UploadedImage {
    pub fn is_uploaded(&self) -> bool {
        !self.public_url.is_empty()
    }
}

/// The five fields the extraction service pulls out of a slide's text.
///
/// Any field the service could not locate is an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlideFields {
    pub codigo_parceiro: String,
    pub nome_loja: String,
    pub colaborador: String,
    pub superior: String,
    pub data_envio: String,
}

impl SlideFields {
    pub fn is_empty(&self) -> bool {
        self.codigo_parceiro.is_empty()
            && self.nome_loja.is_empty()
            && self.colaborador.is_empty()
            && self.superior.is_empty()
            && self.data_envio.is_empty()
    }
}

/// Final per-slide record.
///
/// `slide_number` and `image_url` are injected by the orchestrator and are
/// never taken from service output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSlideData {
    pub codigo_parceiro: String,
    pub nome_loja: String,
    pub colaborador: String,
    pub superior: String,
    pub data_envio: String,
    pub slide_number: u32,
    pub image_url: String,
}

impl ExtractedSlideData {
    pub fn from_fields(fields: SlideFields, slide_number: u32, image_url: String) -> Self {
        Self {
            codigo_parceiro: fields.codigo_parceiro,
            nome_loja: fields.nome_loja,
            colaborador: fields.colaborador,
            superior: fields.superior,
            data_envio: fields.data_envio,
            slide_number,
            image_url,
        }
    }
}

/// Counters and timings for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_slides: usize,
    pub extracted_slides: usize,
    pub dropped_slides: usize,
    pub images_resolved: usize,
    pub images_uploaded: usize,
    pub archive_duration_ms: u64,
    pub upload_duration_ms: u64,
    pub extraction_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a pipeline run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    /// Records ordered by slide number.
    pub records: Vec<ExtractedSlideData>,
    /// Slides that were dropped or lost their image, with the reason.
    pub slide_errors: Vec<SlideError>,
    pub stats: ExtractionStats,
}
