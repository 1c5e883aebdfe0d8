//! Submit/poll interface over the pipeline.
//!
//! [`JobService::submit_job`] records a `Pending` job, spawns the pipeline as
//! a background task and returns immediately. [`JobService::check_job_status`]
//! returns a snapshot of the job; callers poll it until the status is
//! terminal.
//!
//! The background task never mutates a job directly: it reports through the
//! [`JobTracker`], which is the only owner of job state. Errors and panics
//! inside the task both end as `Failed` with a readable message.

use crate::config::ServiceConfig;
use crate::error::PptxError;
use crate::extract::{run_pipeline, PipelineContext};
use crate::job::{JobStatus, JobTracker, JobUpdate, ProcessingJob};
use crate::output::ExtractedSlideData;
use crate::progress::{ChainedProgress, ExtractionProgressCallback, ProgressCallback};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ── Wire types ───────────────────────────────────────────────────────────

/// Body of a submit call. `storagePath` names an already-uploaded archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub file_name: String,
    pub file_size: u64,
    pub storage_path: String,
}

impl SubmitJobRequest {
    pub fn validate(&self) -> Result<(), PptxError> {
        if self.storage_path.trim().is_empty() {
            return Err(PptxError::InvalidRequest(
                "storagePath must not be empty".to_string(),
            ));
        }
        if !self.file_name.to_ascii_lowercase().ends_with(".pptx") {
            return Err(PptxError::InvalidRequest(format!(
                "'{}' is not a .pptx file",
                self.file_name
            )));
        }
        if self.file_size == 0 {
            return Err(PptxError::InvalidRequest("fileSize must be > 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The job as pollers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub status: JobStatus,
    pub total_slides: usize,
    pub processed_slides: usize,
    pub extracted_data: Option<Vec<ExtractedSlideData>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ProcessingJob> for JobView {
    fn from(job: ProcessingJob) -> Self {
        Self {
            id: job.id,
            file_name: job.file_name,
            file_size: job.file_size,
            status: job.status,
            total_slides: job.total_slides,
            processed_slides: job.processed_slides,
            extracted_data: job.extracted_data,
            error_message: job.error_message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<JobView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatusResponse {
    fn not_found(job_id: &str) -> Self {
        Self {
            success: false,
            job: None,
            error: Some(format!("Job not found: {job_id}")),
        }
    }
}

// ── Service ──────────────────────────────────────────────────────────────

/// Accepts jobs, runs them in the background, answers status polls.
#[derive(Debug, Clone)]
pub struct JobService {
    ctx: PipelineContext,
    tracker: JobTracker,
    config: ServiceConfig,
}

impl JobService {
    /// Open the tracker described by `config` and build a service over it.
    pub async fn new(ctx: PipelineContext, config: ServiceConfig) -> Result<Self, PptxError> {
        let tracker = JobTracker::open(&config).await?;
        Ok(Self::with_tracker(ctx, tracker, config))
    }

    pub fn with_tracker(ctx: PipelineContext, tracker: JobTracker, config: ServiceConfig) -> Self {
        Self {
            ctx,
            tracker,
            config,
        }
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Validate, record a `Pending` job, start the pipeline, return the id.
    ///
    /// Returns before any archive work begins.
    pub async fn submit_job(&self, request: SubmitJobRequest) -> SubmitJobResponse {
        match self.try_submit(request).await {
            Ok(id) => SubmitJobResponse {
                success: true,
                job_id: Some(id),
                error: None,
            },
            Err(e) => {
                warn!("Submit rejected: {}", e);
                SubmitJobResponse {
                    success: false,
                    job_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_submit(&self, request: SubmitJobRequest) -> Result<Uuid, PptxError> {
        request.validate()?;
        let job = ProcessingJob::new(request.file_name, request.file_size, &request.storage_path);
        let id = self.tracker.create(job).await?;
        info!("Job {} submitted for '{}'", id, request.storage_path);
        self.spawn_job(id, request.storage_path);
        Ok(id)
    }

    /// Snapshot of a job, or `Job not found: <id>`.
    pub async fn check_job_status(&self, job_id: &str) -> JobStatusResponse {
        let Ok(id) = Uuid::parse_str(job_id.trim()) else {
            return JobStatusResponse::not_found(job_id);
        };
        match self.tracker.get(id).await {
            Ok(Some(job)) => JobStatusResponse {
                success: true,
                job: Some(job.into()),
                error: None,
            },
            Ok(None) => JobStatusResponse::not_found(job_id),
            Err(e) => JobStatusResponse {
                success: false,
                job: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Fail every job stalled past `stale_job_timeout_secs`.
    pub async fn reap_stale_jobs(&self) -> Result<Vec<Uuid>, PptxError> {
        self.tracker.reap_stale().await
    }

    /// Run the reaper periodically, every quarter of the stale timeout.
    ///
    /// Returns `None` when the timeout is disabled.
    pub fn spawn_reaper(&self) -> Option<JoinHandle<()>> {
        let secs = self.config.stale_job_timeout_secs;
        if secs == 0 {
            return None;
        }
        let every = std::time::Duration::from_secs((secs / 4).max(1));
        let tracker = self.tracker.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match tracker.reap_stale().await {
                    Ok(reaped) if !reaped.is_empty() => {
                        warn!("Reaped {} stalled jobs", reaped.len())
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Reaper stopping: {}", e);
                        break;
                    }
                }
            }
        }))
    }

    fn spawn_job(&self, id: Uuid, storage_path: String) {
        let ctx = self.ctx.clone();
        let tracker = self.tracker.clone();
        let worker = tokio::spawn(run_job(ctx, tracker.clone(), id, storage_path));

        tokio::spawn(async move {
            if let Err(join_err) = worker.await {
                let detail = if join_err.is_panic() {
                    panic_message(join_err.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                error!("Job {} background task died: {}", id, detail);
                let message = PptxError::Internal(detail).to_string();
                if let Err(e) = tracker.update(id, JobUpdate::Failed(message)) {
                    error!("Job {}: could not record failure: {}", id, e);
                }
            }
        });
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "background task panicked".to_string()
    }
}

/// Forwards pipeline progress into the tracker.
struct JobProgress {
    tracker: JobTracker,
    id: Uuid,
}

impl JobProgress {
    fn send(&self, update: JobUpdate) {
        if let Err(e) = self.tracker.update(self.id, update) {
            warn!("Job {}: progress not recorded: {}", self.id, e);
        }
    }
}

impl ExtractionProgressCallback for JobProgress {
    fn on_extraction_start(&self, total_slides: usize) {
        self.send(JobUpdate::SlidesCounted(total_slides));
    }

    fn on_upload_batch_complete(&self, _uploaded: usize, _total_images: usize) {
        self.send(JobUpdate::Heartbeat);
    }

    fn on_batch_complete(&self, processed: usize, _total: usize) {
        self.send(JobUpdate::Progress(processed));
    }
}

async fn run_job(ctx: PipelineContext, tracker: JobTracker, id: Uuid, storage_path: String) {
    if let Err(e) = tracker.update(id, JobUpdate::Started) {
        error!("Job {}: {}", id, e);
        return;
    }

    let job_progress: ProgressCallback = Arc::new(JobProgress {
        tracker: tracker.clone(),
        id,
    });
    let progress: ProgressCallback = match &ctx.config.progress_callback {
        Some(user) => Arc::new(ChainedProgress {
            first: job_progress,
            second: Arc::clone(user),
        }),
        None => job_progress,
    };

    let result = async {
        debug!("Job {}: fetching '{}'", id, storage_path);
        let bytes = ctx.store.get(&storage_path).await?;
        run_pipeline(bytes, &ctx, Some(&progress)).await
    }
    .await;

    let update = match result {
        Ok(output) => JobUpdate::Completed(output.records),
        Err(e) => JobUpdate::Failed(e.to_string()),
    };
    if let Err(e) = tracker.update(id, update) {
        error!("Job {}: could not record outcome: {}", id, e);
    }
}
