//! The job store and its state machine.
//!
//! [`ProgressTracker`] exclusively owns every [`ImportJob`]. All mutation
//! funnels through [`ProgressTracker::update`], which locks only the one job
//! it touches: updates to one job serialize, updates to different jobs run
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use annot_core::{ImportJob, JobStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::ImportError;

/// Cumulative counters reported by a running pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub processed_rows: u64,
    pub total_rows: Option<u64>,
    pub failed_rows: u64,
    pub target_collection_id: Option<i64>,
}

/// Every way a job can change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    Progress(ProgressUpdate),
    Fail(Vec<String>),
    Complete,
    Cancel,
    Retry,
}

impl JobChange {
    fn action(&self) -> &'static str {
        match self {
            JobChange::Progress(_) => "update",
            JobChange::Fail(_) => "fail",
            JobChange::Complete => "complete",
            JobChange::Cancel => "cancel",
            JobChange::Retry => "retry",
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(processed: u64, total: Option<u64>) -> f64 {
    match total {
        Some(total) if total > 0 => (processed as f64 / total as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// Apply `change` to `job`, or leave it untouched and return `false` if the
/// change is illegal from the job's current status.
fn apply(job: &mut ImportJob, change: JobChange, now: DateTime<Utc>) -> bool {
    let live = matches!(job.status, JobStatus::Pending | JobStatus::Processing);
    match change {
        JobChange::Progress(update) if live => {
            job.status = JobStatus::Processing;
            if let Some(total) = update.total_rows {
                job.total_rows = Some(total);
            }
            job.processed_rows = match job.total_rows {
                Some(total) => update.processed_rows.min(total),
                None => update.processed_rows,
            };
            job.failed_rows = update.failed_rows;
            if update.target_collection_id.is_some() {
                job.target_collection_id = update.target_collection_id;
            }
            job.percentage = percentage(job.processed_rows, job.total_rows);
        }
        JobChange::Fail(errors) if live => {
            job.status = JobStatus::Failed;
            if errors.is_empty() {
                job.errors.push("import failed".to_string());
            } else {
                job.errors.extend(errors);
            }
            job.end_time = Some(now);
        }
        JobChange::Complete
            if job.status == JobStatus::Processing
                && job.errors.is_empty()
                && job.total_rows == Some(job.processed_rows) =>
        {
            job.status = JobStatus::Completed;
            job.percentage = 1.0;
            job.end_time = Some(now);
        }
        JobChange::Cancel if live => {
            job.status = JobStatus::Cancelled;
            job.end_time = Some(now);
        }
        JobChange::Retry if job.status == JobStatus::Failed => {
            job.status = JobStatus::Pending;
            job.processed_rows = 0;
            job.failed_rows = 0;
            job.percentage = 0.0;
            job.errors.clear();
            job.start_time = now;
            job.end_time = None;
        }
        _ => return false,
    }
    true
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<ImportJob>>>>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::InvalidTransition`] if `job` is not `pending`.
    pub async fn create(&self, job: ImportJob) -> Result<Uuid, ImportError> {
        if job.status != JobStatus::Pending {
            return Err(ImportError::InvalidTransition {
                job_id: job.id,
                from: job.status,
                action: "create",
            });
        }
        let id = job.id;
        self.jobs.write().await.insert(id, Arc::new(Mutex::new(job)));
        tracing::debug!(job_id = %id, "import job created");
        Ok(id)
    }

    async fn slot(&self, job_id: Uuid) -> Result<Arc<Mutex<ImportJob>>, ImportError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(ImportError::JobNotFound(job_id))
    }

    /// The single mutation entry point. Returns the job as it stands after
    /// the change.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown id, or
    /// [`ImportError::InvalidTransition`] if the change is illegal from the
    /// job's current status.
    pub async fn update(&self, job_id: Uuid, change: JobChange) -> Result<ImportJob, ImportError> {
        let slot = self.slot(job_id).await?;
        let mut job = slot.lock().await;
        let action = change.action();
        if !apply(&mut job, change, Utc::now()) {
            return Err(ImportError::InvalidTransition {
                job_id,
                from: job.status,
                action,
            });
        }
        if job.status != JobStatus::Processing {
            tracing::info!(
                job_id = %job_id,
                status = %job.status,
                processed_rows = job.processed_rows,
                total_rows = ?job.total_rows,
                "import job {action}"
            );
        }
        Ok(job.clone())
    }

    /// # Errors
    ///
    /// See [`ProgressTracker::update`].
    pub async fn report(&self, job_id: Uuid, update: ProgressUpdate) -> Result<ImportJob, ImportError> {
        self.update(job_id, JobChange::Progress(update)).await
    }

    /// # Errors
    ///
    /// See [`ProgressTracker::update`].
    pub async fn fail(&self, job_id: Uuid, errors: Vec<String>) -> Result<ImportJob, ImportError> {
        self.update(job_id, JobChange::Fail(errors)).await
    }

    /// Mark a fully processed job `completed`. Legal only while processing
    /// with every row counted and no errors.
    ///
    /// # Errors
    ///
    /// See [`ProgressTracker::update`].
    pub async fn complete(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.update(job_id, JobChange::Complete).await
    }

    /// # Errors
    ///
    /// See [`ProgressTracker::update`].
    pub async fn cancel(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.update(job_id, JobChange::Cancel).await
    }

    /// # Errors
    ///
    /// See [`ProgressTracker::update`].
    pub async fn retry(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.update(job_id, JobChange::Retry).await
    }

    /// Snapshot of one job.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown id.
    pub async fn get(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let slot = self.slot(job_id).await?;
        let job = slot.lock().await;
        Ok(job.clone())
    }

    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown id.
    pub async fn status(&self, job_id: Uuid) -> Result<JobStatus, ImportError> {
        let slot = self.slot(job_id).await?;
        let status = slot.lock().await.status;
        Ok(status)
    }

    /// Snapshots of every job, newest first.
    pub async fn list(&self) -> Vec<ImportJob> {
        let slots: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(slots.len());
        for slot in slots {
            jobs.push(slot.lock().await.clone());
        }
        jobs.sort_by(|a, b| b.start_time.cmp(&a.start_time).then(a.id.cmp(&b.id)));
        jobs
    }
}

/// Where a running pipeline sends its progress.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Record cumulative progress. Returns `false` once the job no longer
    /// accepts updates, which the pipeline treats as cancellation.
    async fn report(&self, update: ProgressUpdate) -> bool;

    /// Whether the job has left `pending`/`processing` behind, usually
    /// through a cancel.
    async fn cancelled(&self) -> bool;
}

/// [`ProgressReporter`] bound to one tracked job.
#[derive(Debug, Clone)]
pub struct JobReporter {
    tracker: Arc<ProgressTracker>,
    job_id: Uuid,
}

impl JobReporter {
    #[must_use]
    pub fn new(tracker: Arc<ProgressTracker>, job_id: Uuid) -> Self {
        Self { tracker, job_id }
    }
}

#[async_trait]
impl ProgressReporter for JobReporter {
    async fn report(&self, update: ProgressUpdate) -> bool {
        match self.tracker.report(self.job_id, update).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(job_id = %self.job_id, error = %e, "progress update rejected");
                false
            }
        }
    }

    async fn cancelled(&self) -> bool {
        !matches!(
            self.tracker.status(self.job_id).await,
            Ok(JobStatus::Pending | JobStatus::Processing)
        )
    }
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;
