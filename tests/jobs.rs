//! Job service integration tests: submit, poll, terminal states.

mod common;

use common::*;
use pptx_extract::job::read_persisted;
use pptx_extract::{
    ExtractionProgressCallback, JobService, JobStatus, MemoryObjectStore, ObjectStore,
    PatternFieldExtractor, PipelineContext, ServiceConfig, SubmitJobRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn request() -> SubmitJobRequest {
    SubmitJobRequest {
        file_name: "visitas.pptx".into(),
        file_size: 2048,
        storage_path: "uploads/deck.pptx".into(),
    }
}

#[tokio::test]
async fn scenario_b_no_slides_fails_the_job() {
    let (service, _) =
        service_with_deck(DeckBuilder::new().build(), Arc::new(PatternFieldExtractor)).await;

    let submitted = service.submit_job(request()).await;
    assert!(submitted.success);
    let job = wait_terminal(&service, submitted.job_id.unwrap()).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.extracted_data.is_none());
    assert!(job.error_message.unwrap().contains("No data found"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn scenario_c_poll_until_completed() {
    let mut deck = DeckBuilder::new();
    for idx in 1..=5 {
        deck = deck.slide_with_image(idx, &visit_text(idx), &format!("image{idx}.png"));
    }
    deck = deck.slide(6, "Obrigado pela atenção");
    let gated = GatedExtractor::closed();
    let (service, store) = service_with_deck(deck.build(), gated.clone()).await;

    let id = service.submit_job(request()).await.job_id.unwrap();

    let early = service.check_job_status(&id.to_string()).await;
    assert!(early.success);
    let early = early.job.unwrap();
    assert!(matches!(
        early.status,
        JobStatus::Pending | JobStatus::Processing
    ));
    assert!(early.extracted_data.is_none());
    assert!(early.error_message.is_none());

    gated.open();
    let job = wait_terminal(&service, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_slides, 6);
    assert_eq!(job.processed_slides, job.total_slides);
    let data = job.extracted_data.unwrap();
    assert_eq!(data.len(), 5);
    assert!(job.error_message.is_none());
    assert!(data.iter().all(|r| r.image_url.starts_with("memory://slides/")));
    // deck + five images
    assert_eq!(store.len().await, 6);
}

#[tokio::test]
async fn panic_in_background_task_is_recorded() {
    let deck = DeckBuilder::new().slide(1, SCENARIO_A).build();
    let (service, _) = service_with_deck(deck, Arc::new(PanickingExtractor)).await;

    let id = service.submit_job(request()).await.job_id.unwrap();
    let job = wait_terminal(&service, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("Internal error"), "{message}");
    assert!(message.contains("extractor exploded"));
}

#[tokio::test]
async fn missing_upload_fails_the_job() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let service = JobService::new(pattern_ctx(store), ServiceConfig::default())
        .await
        .unwrap();

    let id = service.submit_job(request()).await.job_id.unwrap();
    let job = wait_terminal(&service, id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("uploads/deck.pptx"));
}

#[tokio::test]
async fn unknown_job_ids() {
    let (service, _) =
        service_with_deck(DeckBuilder::new().build(), Arc::new(PatternFieldExtractor)).await;

    let id = Uuid::new_v4();
    let resp = service.check_job_status(&id.to_string()).await;
    assert!(!resp.success);
    assert!(resp.job.is_none());
    assert_eq!(resp.error.unwrap(), format!("Job not found: {id}"));

    let resp = service.check_job_status("not-a-uuid").await;
    assert_eq!(resp.error.unwrap(), "Job not found: not-a-uuid");
}

#[test]
fn invalid_requests_create_no_job() {
    tokio_test::block_on(async {
        let (service, _) =
            service_with_deck(DeckBuilder::new().build(), Arc::new(PatternFieldExtractor)).await;

        let resp = service
            .submit_job(SubmitJobRequest {
                file_name: "visitas.key".into(),
                ..request()
            })
            .await;

        assert!(!resp.success);
        assert!(resp.job_id.is_none());
        assert!(resp.error.unwrap().contains(".pptx"));
        assert!(service.tracker().list().await.unwrap().is_empty());
    });
}

#[tokio::test]
async fn user_callback_still_sees_progress() {
    #[derive(Default)]
    struct Batches(AtomicUsize);
    impl ExtractionProgressCallback for Batches {
        fn on_batch_complete(&self, _processed: usize, _total: usize) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let mut deck = DeckBuilder::new();
    for idx in 1..=5 {
        deck = deck.slide(idx, &visit_text(idx));
    }
    let store = Arc::new(MemoryObjectStore::new());
    store
        .put("uploads/deck.pptx", deck.build(), "application/octet-stream")
        .await
        .unwrap();

    let batches = Arc::new(Batches::default());
    let config = pptx_extract::ExtractionConfig::builder()
        .extraction_batch_size(2)
        .progress_callback(batches.clone())
        .build()
        .unwrap();
    let ctx = PipelineContext::new(config, store, Arc::new(PatternFieldExtractor));
    let service = JobService::new(ctx, ServiceConfig::default()).await.unwrap();

    let id = service.submit_job(request()).await.job_id.unwrap();
    let job = wait_terminal(&service, id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.processed_slides, 5);
    assert_eq!(batches.0.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn completed_job_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryObjectStore::new());
    store
        .put(
            "uploads/deck.pptx",
            DeckBuilder::new().slide(1, SCENARIO_A).build(),
            "application/octet-stream",
        )
        .await
        .unwrap();
    let service = JobService::new(
        pattern_ctx(store),
        ServiceConfig::default().with_persist_dir(dir.path()),
    )
    .await
    .unwrap();

    let id = service.submit_job(request()).await.job_id.unwrap();
    wait_terminal(&service, id).await;

    let on_disk = read_persisted(dir.path(), id).await.unwrap();
    assert_eq!(on_disk.status, JobStatus::Completed);
    assert_eq!(on_disk.storage_path, "uploads/deck.pptx");
    let data = on_disk.extracted_data.unwrap();
    assert_eq!(data[0].codigo_parceiro, "225699");

    // a fresh tracker over the same directory sees the finished job
    let reopened = JobService::new(
        pattern_ctx(Arc::new(MemoryObjectStore::new())),
        ServiceConfig::default().with_persist_dir(dir.path()),
    )
    .await
    .unwrap();
    let resp = reopened.check_job_status(&id.to_string()).await;
    assert_eq!(resp.job.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn slow_uploads_keep_the_job_alive_under_the_reaper() {
    init_tracing();
    let mut deck = DeckBuilder::new();
    for idx in 1..=5 {
        deck = deck.slide_with_image(idx, &visit_text(idx), &format!("image{idx}.png"));
    }
    let inner = MemoryObjectStore::new();
    inner
        .put("uploads/deck.pptx", deck.build(), "application/octet-stream")
        .await
        .unwrap();
    let store = Arc::new(SlowUploads {
        inner,
        delay: Duration::from_millis(700),
    });

    let config = pptx_extract::ExtractionConfig::builder()
        .upload_batch_size(1)
        .extraction_batch_size(5)
        .build()
        .unwrap();
    let ctx = PipelineContext::new(config, store.clone(), Arc::new(PatternFieldExtractor));
    let service = JobService::new(ctx, ServiceConfig::default().with_stale_job_timeout_secs(2))
        .await
        .unwrap();
    let reaper = service.spawn_reaper().unwrap();

    // five sequential 700ms uploads outlast the 2s stall window
    let id = service.submit_job(request()).await.job_id.unwrap();
    let job = wait_terminal_for(&service, id, Duration::from_secs(20)).await;
    reaper.abort();

    assert_eq!(
        job.status,
        JobStatus::Completed,
        "error: {:?}",
        job.error_message
    );
    assert_eq!(job.extracted_data.unwrap().len(), 5);
    assert_eq!(store.inner.len().await, 6);
}
