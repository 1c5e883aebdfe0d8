//! Job tracking: one record per submitted archive.
//!
//! ## State machine
//!
//! ```text
//! Pending ──Started──▶ Processing ──Completed(records)──▶ Completed
//!    │                     │
//!    └──────Failed(msg)────┴─────────────────────────────▶ Failed
//! ```
//!
//! All mutation goes through [`ProcessingJob::apply`], a pure function that
//! refuses illegal transitions. At runtime a single actor task owns every
//! job; [`JobTracker`] is a cheap, cloneable handle that sends it messages.
//! There is exactly one writer, so no job is ever updated concurrently.
//!
//! With a persist directory configured, every accepted update rewrites
//! `{dir}/{id}.json` atomically and [`JobTracker::open`] reloads the records
//! on startup.

use crate::config::ServiceConfig;
use crate::error::PptxError;
use crate::extract::write_atomic;
use crate::output::ExtractedSlideData;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// `Completed` or `Failed`. Nothing changes after this.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One tracked execution of the pipeline for one uploaded archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: Uuid,
    pub file_name: String,
    pub file_size: u64,
    pub storage_path: String,
    pub status: JobStatus,
    pub total_slides: usize,
    pub processed_slides: usize,
    /// Non-null iff `status == Completed`.
    pub extracted_data: Option<Vec<ExtractedSlideData>>,
    /// Non-null iff `status == Failed`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A single state change, applied by the tracker in arrival order.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    /// Background execution began.
    Started,
    /// The archive stage finished and counted the slides.
    SlidesCounted(usize),
    /// An extraction batch finished; the value is cumulative.
    Progress(usize),
    /// Work is advancing without a count change (e.g. an upload batch).
    /// Only refreshes `updated_at`.
    Heartbeat,
    /// The pipeline produced its records.
    Completed(Vec<ExtractedSlideData>),
    /// The pipeline failed; the message is shown to pollers verbatim.
    Failed(String),
}

impl JobUpdate {
    fn kind(&self) -> &'static str {
        match self {
            JobUpdate::Started => "Started",
            JobUpdate::SlidesCounted(_) => "SlidesCounted",
            JobUpdate::Progress(_) => "Progress",
            JobUpdate::Heartbeat => "Heartbeat",
            JobUpdate::Completed(_) => "Completed",
            JobUpdate::Failed(_) => "Failed",
        }
    }
}

/// Why [`ProcessingJob::apply`] refused an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job is already {status}; terminal state is final")]
    Terminal { status: JobStatus },

    #[error("{update} not allowed while {status}")]
    WrongState {
        status: JobStatus,
        update: &'static str,
    },

    #[error("processed count would go backwards ({current} → {attempted})")]
    Regression { current: usize, attempted: usize },

    #[error("processed count {processed} exceeds total {total}")]
    ExceedsTotal { processed: usize, total: usize },

    #[error("no such job")]
    UnknownJob,
}

impl ProcessingJob {
    /// A fresh `Pending` job.
    pub fn new(file_name: impl Into<String>, file_size: u64, storage_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            file_size,
            storage_path: storage_path.into(),
            status: JobStatus::Pending,
            total_slides: 0,
            processed_slides: 0,
            extracted_data: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Apply one update at time `now`.
    ///
    /// On error the job is left untouched.
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                status: self.status,
            });
        }

        let kind = update.kind();
        let wrong_state = |status| TransitionError::WrongState {
            status,
            update: kind,
        };

        match update {
            JobUpdate::Started => {
                if self.status != JobStatus::Pending {
                    return Err(wrong_state(self.status));
                }
                self.status = JobStatus::Processing;
            }
            JobUpdate::SlidesCounted(total) => {
                if self.status != JobStatus::Processing {
                    return Err(wrong_state(self.status));
                }
                if self.processed_slides > total {
                    return Err(TransitionError::ExceedsTotal {
                        processed: self.processed_slides,
                        total,
                    });
                }
                self.total_slides = total;
            }
            JobUpdate::Progress(processed) => {
                if self.status != JobStatus::Processing {
                    return Err(wrong_state(self.status));
                }
                if processed < self.processed_slides {
                    return Err(TransitionError::Regression {
                        current: self.processed_slides,
                        attempted: processed,
                    });
                }
                if processed > self.total_slides {
                    return Err(TransitionError::ExceedsTotal {
                        processed,
                        total: self.total_slides,
                    });
                }
                self.processed_slides = processed;
            }
            JobUpdate::Heartbeat => {
                if self.status != JobStatus::Processing {
                    return Err(wrong_state(self.status));
                }
            }
            JobUpdate::Completed(records) => {
                if self.status != JobStatus::Processing {
                    return Err(wrong_state(self.status));
                }
                if records.len() > self.total_slides {
                    return Err(TransitionError::ExceedsTotal {
                        processed: records.len(),
                        total: self.total_slides,
                    });
                }
                self.status = JobStatus::Completed;
                self.processed_slides = self.total_slides;
                self.extracted_data = Some(records);
                self.completed_at = Some(now);
            }
            JobUpdate::Failed(message) => {
                self.status = JobStatus::Failed;
                self.error_message = Some(message);
                self.completed_at = Some(now);
            }
        }

        self.updated_at = now;
        Ok(())
    }

    /// Non-terminal and silent for at least `timeout`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        !self.status.is_terminal() && now - self.updated_at >= timeout
    }
}

// ── Tracker actor ────────────────────────────────────────────────────────

enum Command {
    Create {
        job: ProcessingJob,
        reply: oneshot::Sender<()>,
    },
    Update {
        id: Uuid,
        update: JobUpdate,
        reply: Option<oneshot::Sender<Result<(), TransitionError>>>,
    },
    Get {
        id: Uuid,
        reply: oneshot::Sender<Option<ProcessingJob>>,
    },
    List {
        reply: oneshot::Sender<Vec<ProcessingJob>>,
    },
    ReapStale {
        timeout: Duration,
        reply: oneshot::Sender<Vec<Uuid>>,
    },
}

/// Handle to the task that owns every [`ProcessingJob`].
///
/// Clone freely; all clones talk to the same owner. The owner task stops
/// once the last handle is dropped.
#[derive(Debug, Clone)]
pub struct JobTracker {
    tx: mpsc::UnboundedSender<Command>,
    stale_timeout: Option<Duration>,
}

impl JobTracker {
    /// Start a tracker, reloading persisted jobs and reaping stale ones.
    ///
    /// Must be called inside a Tokio runtime.
    pub async fn open(config: &ServiceConfig) -> Result<Self, PptxError> {
        let jobs = match &config.persist_dir {
            Some(dir) => load_jobs(dir).await?,
            None => HashMap::new(),
        };
        info!(
            "Job tracker started with {} persisted jobs (persist dir: {:?})",
            jobs.len(),
            config.persist_dir
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let owner = TrackerTask {
            jobs,
            persist_dir: config.persist_dir.clone(),
        };
        tokio::spawn(owner.run(rx));

        let stale_timeout = (config.stale_job_timeout_secs > 0)
            .then(|| Duration::seconds(config.stale_job_timeout_secs as i64));
        let tracker = Self { tx, stale_timeout };

        let reaped = tracker.reap_stale().await?;
        if !reaped.is_empty() {
            warn!("Failed {} stale jobs left over from a previous run", reaped.len());
        }
        Ok(tracker)
    }

    /// In-memory tracker with default settings.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn in_memory() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(
            TrackerTask {
                jobs: HashMap::new(),
                persist_dir: None,
            }
            .run(rx),
        );
        Self {
            tx,
            stale_timeout: Some(Duration::seconds(
                ServiceConfig::default().stale_job_timeout_secs as i64,
            )),
        }
    }

    /// Register a new job. Returns once the job is visible to `get`.
    pub async fn create(&self, job: ProcessingJob) -> Result<Uuid, PptxError> {
        let id = job.id;
        let (reply, rx) = oneshot::channel();
        self.send(Command::Create { job, reply })?;
        rx.await.map_err(|_| stopped())?;
        Ok(id)
    }

    /// Queue an update without waiting for it to be applied.
    ///
    /// Rejected transitions are logged by the owner task.
    pub fn update(&self, id: Uuid, update: JobUpdate) -> Result<(), PptxError> {
        self.send(Command::Update {
            id,
            update,
            reply: None,
        })
    }

    /// Apply an update and report whether it was accepted.
    pub async fn update_and_wait(
        &self,
        id: Uuid,
        update: JobUpdate,
    ) -> Result<Result<(), TransitionError>, PptxError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Update {
            id,
            update,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| stopped())
    }

    /// Snapshot of one job.
    pub async fn get(&self, id: Uuid) -> Result<Option<ProcessingJob>, PptxError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get { id, reply })?;
        rx.await.map_err(|_| stopped())
    }

    /// Snapshot of every job, newest first.
    pub async fn list(&self) -> Result<Vec<ProcessingJob>, PptxError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::List { reply })?;
        rx.await.map_err(|_| stopped())
    }

    /// Fail every job stalled past the configured timeout.
    ///
    /// No-op when the timeout is disabled.
    pub async fn reap_stale(&self) -> Result<Vec<Uuid>, PptxError> {
        match self.stale_timeout {
            Some(timeout) => self.reap_stale_older_than(timeout).await,
            None => Ok(Vec::new()),
        }
    }

    /// Fail every non-terminal job whose last update is at least `timeout` old.
    pub async fn reap_stale_older_than(&self, timeout: Duration) -> Result<Vec<Uuid>, PptxError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ReapStale { timeout, reply })?;
        rx.await.map_err(|_| stopped())
    }

    fn send(&self, cmd: Command) -> Result<(), PptxError> {
        self.tx.send(cmd).map_err(|_| stopped())
    }
}

fn stopped() -> PptxError {
    PptxError::Internal("job tracker stopped".to_string())
}

struct TrackerTask {
    jobs: HashMap<Uuid, ProcessingJob>,
    persist_dir: Option<PathBuf>,
}

impl TrackerTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Create { job, reply } => {
                    debug!("Job {} created for '{}'", job.id, job.file_name);
                    self.persist(&job).await;
                    self.jobs.insert(job.id, job);
                    let _ = reply.send(());
                }
                Command::Update { id, update, reply } => {
                    let result = self.apply(id, update).await;
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Command::Get { id, reply } => {
                    let _ = reply.send(self.jobs.get(&id).cloned());
                }
                Command::List { reply } => {
                    let mut all: Vec<ProcessingJob> = self.jobs.values().cloned().collect();
                    all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                    let _ = reply.send(all);
                }
                Command::ReapStale { timeout, reply } => {
                    let _ = reply.send(self.reap(timeout).await);
                }
            }
        }
        debug!("Job tracker stopped");
    }

    async fn apply(&mut self, id: Uuid, update: JobUpdate) -> Result<(), TransitionError> {
        let Some(job) = self.jobs.get_mut(&id) else {
            warn!("Update {} for unknown job {}", update.kind(), id);
            return Err(TransitionError::UnknownJob);
        };

        let kind = update.kind();
        if let Err(e) = job.apply(update, Utc::now()) {
            warn!("Job {}: rejected {}: {}", id, kind, e);
            return Err(e);
        }

        match job.status {
            JobStatus::Completed => info!(
                "Job {} completed: {} records from {} slides",
                id,
                job.extracted_data.as_ref().map_or(0, Vec::len),
                job.total_slides
            ),
            JobStatus::Failed => error!(
                "Job {} failed: {}",
                id,
                job.error_message.as_deref().unwrap_or_default()
            ),
            _ => debug!(
                "Job {}: {} ({}/{})",
                id, kind, job.processed_slides, job.total_slides
            ),
        }

        let snapshot = job.clone();
        self.persist(&snapshot).await;
        Ok(())
    }

    async fn reap(&mut self, timeout: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let stale: Vec<Uuid> = self
            .jobs
            .values()
            .filter(|j| j.is_stale(now, timeout))
            .map(|j| j.id)
            .collect();

        for id in &stale {
            let message = format!(
                "Job stalled: no progress for over {}s",
                timeout.num_seconds()
            );
            let _ = self.apply(*id, JobUpdate::Failed(message)).await;
        }
        stale
    }

    async fn persist(&self, job: &ProcessingJob) {
        let Some(dir) = &self.persist_dir else {
            return;
        };
        let path = record_path(dir, job.id);
        let json = match serde_json::to_vec_pretty(job) {
            Ok(j) => j,
            Err(e) => {
                error!("Job {}: could not serialise record: {}", job.id, e);
                return;
            }
        };
        if let Err(e) = write_atomic(&path, &json).await {
            error!("Job {}: {}", job.id, e);
        }
    }
}

// ── Persistence ──────────────────────────────────────────────────────────

fn record_path(dir: &Path, id: Uuid) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Read one persisted job record.
pub async fn read_persisted(dir: &Path, id: Uuid) -> Result<ProcessingJob, PptxError> {
    let path = record_path(dir, id);
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PptxError::JobNotFound(id))
        }
        Err(e) => {
            return Err(PptxError::Internal(format!(
                "Failed to read '{}': {}",
                path.display(),
                e
            )))
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| {
        PptxError::Internal(format!("Corrupt job record '{}': {}", path.display(), e))
    })
}

async fn load_jobs(dir: &Path) -> Result<HashMap<Uuid, ProcessingJob>, PptxError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PptxError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;

    let mut jobs = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PptxError::Internal(format!("Failed to list '{}': {}", dir.display(), e)))?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match tokio::fs::read(&path).await.map(|b| serde_json::from_slice::<ProcessingJob>(&b)) {
            Ok(Ok(job)) => {
                jobs.insert(job.id, job);
            }
            Ok(Err(e)) => warn!("Skipping corrupt job record '{}': {}", path.display(), e),
            Err(e) => warn!("Skipping unreadable job record '{}': {}", path.display(), e),
        }
    }
    Ok(jobs)
}
