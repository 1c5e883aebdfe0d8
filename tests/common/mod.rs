//! Shared fixtures: in-memory decks and stub collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use pptx_extract::{
    ExtractionConfig, FieldExtractor, JobService, JobView, MemoryObjectStore, ObjectStore,
    PatternFieldExtractor, PipelineContext, PptxError, ServiceConfig, SlideError, SlideFields,
    SlideText,
};
use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

pub const SCENARIO_A: &str = "Junco 225699 - CARVALHO RUI BARBOSA\nScala Colaborador:\nScala FRANCISCA KATIA\nSuperior: NATANAEL FERREIRA\nData do Envio: 29/09/2025 10:04:51";

/// Builds a minimal PPTX in memory. Entries are written in insertion order.
#[derive(Default)]
pub struct DeckBuilder {
    entries: Vec<(String, Vec<u8>)>,
}

impl DeckBuilder {
    pub fn new() -> Self {
        let mut deck = Self::default();
        deck.add(
            "[Content_Types].xml",
            br#"<?xml version="1.0" encoding="UTF-8"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#.to_vec(),
        );
        deck.add(
            "ppt/presentation.xml",
            br#"<?xml version="1.0" encoding="UTF-8"?><p:presentation xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"/>"#.to_vec(),
        );
        deck
    }

    fn add(&mut self, name: &str, bytes: Vec<u8>) {
        self.entries.push((name.to_string(), bytes));
    }

    /// `ppt/slides/slide{index}.xml` with one `<a:t>` run per line of `text`.
    pub fn slide(mut self, index: u32, text: &str) -> Self {
        self.add(&format!("ppt/slides/slide{index}.xml"), slide_xml(text).into_bytes());
        self
    }

    /// A slide whose relationship part points at `ppt/media/{media}`, plus
    /// the media entry itself.
    pub fn slide_with_image(self, index: u32, text: &str, media: &str) -> Self {
        let mut deck = self.slide_with_dangling_image(index, text, media);
        deck.add(&format!("ppt/media/{media}"), PNG.to_vec());
        deck
    }

    /// Like [`slide_with_image`] but without the media entry.
    pub fn slide_with_dangling_image(mut self, index: u32, text: &str, media: &str) -> Self {
        self = self.slide(index, text);
        self.add(
            &format!("ppt/slides/_rels/slide{index}.xml.rels"),
            rels_xml(media).into_bytes(),
        );
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in &self.entries {
            zip.start_file(name.as_str(), SimpleFileOptions::default())
                .unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn slide_xml(text: &str) -> String {
    let paragraphs: String = text
        .lines()
        .map(|l| format!("<a:p><a:r><a:rPr lang=\"pt-BR\"/><a:t>{}</a:t></a:r></a:p>", escape(l)))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <p:sld xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\" \
         xmlns:p=\"http://schemas.openxmlformats.org/presentationml/2006/main\" \
         xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">\
         <p:cSld><p:spTree>\
         <p:pic><p:blipFill><a:blip r:embed=\"rId2\"/></p:blipFill></p:pic>\
         <p:sp><p:txBody>{paragraphs}</p:txBody></p:sp>\
         </p:spTree></p:cSld></p:sld>"
    )
}

pub fn rels_xml(media: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\
         <Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">\
         <Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/slideLayout\" Target=\"../slideLayouts/slideLayout1.xml\"/>\
         <Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/image\" Target=\"../media/{media}\"/>\
         </Relationships>"
    )
}

/// Visit slide text for partner `code`.
pub fn visit_text(code: u32) -> String {
    format!(
        "Junco {code} - LOJA {code}\nScala Colaborador:\nScala PESSOA {code}\nSuperior: CHEFE\nData do Envio: 01/10/2025 08:00:00"
    )
}

// ── Stub collaborators ───────────────────────────────────────────────────────

/// Store that rejects every upload whose key mentions `-slide{N}-`.
pub struct FailingUploads {
    pub inner: MemoryObjectStore,
    pub fail_slide: u32,
}

#[async_trait]
impl ObjectStore for FailingUploads {
    fn name(&self) -> &str {
        "failing-uploads"
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
        self.inner.get(path).await
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), PptxError> {
        if key.contains(&format!("-slide{}-", self.fail_slide)) {
            return Err(PptxError::Storage("HTTP 503 Service Unavailable".into()));
        }
        self.inner.put(key, data, content_type).await
    }

    fn public_url(&self, key: &str) -> String {
        self.inner.public_url(key)
    }
}

/// Store whose uploads each take `delay`, like a slow network.
pub struct SlowUploads {
    pub inner: MemoryObjectStore,
    pub delay: Duration,
}

#[async_trait]
impl ObjectStore for SlowUploads {
    fn name(&self) -> &str {
        "slow-uploads"
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, PptxError> {
        self.inner.get(path).await
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), PptxError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, data, content_type).await
    }

    fn public_url(&self, key: &str) -> String {
        self.inner.public_url(key)
    }
}

/// Pattern extraction that waits until the gate is opened.
pub struct GatedExtractor {
    pub gate: Semaphore,
}

impl GatedExtractor {
    pub fn closed() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
        })
    }

    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl FieldExtractor for GatedExtractor {
    fn name(&self) -> &str {
        "gated"
    }

    async fn extract_fields(&self, slide: &SlideText) -> Result<SlideFields, SlideError> {
        let _permit = self.gate.acquire().await.map_err(|e| SlideError::ExtractionFailed {
            slide: slide.slide_number,
            retries: 0,
            detail: e.to_string(),
        })?;
        PatternFieldExtractor.extract(slide)
    }
}

/// Fails every call, like a provider that is down.
pub struct DownExtractor;

#[async_trait]
impl FieldExtractor for DownExtractor {
    fn name(&self) -> &str {
        "down"
    }

    async fn extract_fields(&self, slide: &SlideText) -> Result<SlideFields, SlideError> {
        Err(SlideError::ExtractionFailed {
            slide: slide.slide_number,
            retries: 0,
            detail: "HTTP 500".into(),
        })
    }
}

/// Panics on the first call.
pub struct PanickingExtractor;

#[async_trait]
impl FieldExtractor for PanickingExtractor {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn extract_fields(&self, _slide: &SlideText) -> Result<SlideFields, SlideError> {
        panic!("extractor exploded")
    }
}

/// Route library logs to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── Context helpers ──────────────────────────────────────────────────────────

pub fn config(batch: usize) -> ExtractionConfig {
    ExtractionConfig::builder()
        .extraction_batch_size(batch)
        .upload_batch_size(batch)
        .build()
        .unwrap()
}

pub fn pattern_ctx(store: Arc<dyn ObjectStore>) -> PipelineContext {
    PipelineContext::new(config(10), store, Arc::new(PatternFieldExtractor::new()))
}

/// Service over an in-memory store holding `deck` at `uploads/deck.pptx`.
pub async fn service_with_deck(
    deck: Vec<u8>,
    extractor: Arc<dyn FieldExtractor>,
) -> (JobService, Arc<MemoryObjectStore>) {
    let store = Arc::new(MemoryObjectStore::new());
    store
        .put("uploads/deck.pptx", deck, "application/octet-stream")
        .await
        .unwrap();
    let ctx = PipelineContext::new(config(2), store.clone(), extractor);
    let service = JobService::new(ctx, ServiceConfig::default()).await.unwrap();
    (service, store)
}

pub async fn wait_terminal(service: &JobService, id: Uuid) -> JobView {
    wait_terminal_for(service, id, Duration::from_secs(5)).await
}

pub async fn wait_terminal_for(service: &JobService, id: Uuid, limit: Duration) -> JobView {
    let polls = limit.as_millis() / 10;
    for _ in 0..polls {
        let resp = service.check_job_status(&id.to_string()).await;
        let job = resp.job.expect("job should exist");
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach a terminal state");
}
