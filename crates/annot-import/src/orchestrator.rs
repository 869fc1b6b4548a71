//! Request validation and background execution of import jobs.
//!
//! [`ImportOrchestrator::start_import`] does all of its checking before a
//! job exists. Once it returns a job id, everything that goes wrong is
//! visible only through the [`ProgressTracker`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use annot_core::{
    store::{collection_type_for, CHAT_DISENTANGLEMENT},
    CollectionStore, ColumnMapping, ColumnMappingResolver, ImportConfig, ImportJob, JobStatus,
    MappingOverrides, ProjectDirectory,
};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use crate::error::ImportError;
use crate::pipeline::{
    ImportOutcome, ImportPipeline, ImportTarget, PipelineOptions, RunStatus, TargetCollection,
};
use crate::progress::{JobReporter, ProgressTracker};
use crate::source::{read_headers, UploadedFile};

const MAX_NAME_LEN: usize = 200;

/// Everything a caller supplies to start an import.
#[derive(Debug)]
pub struct StartImport {
    pub project_id: i64,
    pub upload: UploadedFile,
    pub collection_id: Option<i64>,
    pub name: Option<String>,
    /// Raw JSON object of canonical field → header or glob.
    pub column_mapping: Option<String>,
    pub batch_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Request validation
// ---------------------------------------------------------------------------

/// Parse a JSON column-mapping override. `None`, blank input, and `null`
/// values all mean "no override".
///
/// # Errors
///
/// Returns [`ImportError::Validation`] for malformed JSON, a non-object, or
/// a non-string value, and [`ImportError::Mapping`] for an unknown field.
pub fn parse_overrides(raw: Option<&str>) -> Result<MappingOverrides, ImportError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(MappingOverrides::default());
    };
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| ImportError::Validation(format!("column_mapping is not valid JSON: {e}")))?;
    let serde_json::Value::Object(map) = value else {
        return Err(ImportError::Validation(
            "column_mapping must be a JSON object".to_string(),
        ));
    };

    let mut pairs = Vec::with_capacity(map.len());
    for (field, value) in map {
        match value {
            serde_json::Value::String(header) => pairs.push((field, header)),
            serde_json::Value::Null => {}
            other => {
                return Err(ImportError::Validation(format!(
                    "column_mapping value for '{field}' must be a string, got {other}"
                )))
            }
        }
    }
    Ok(MappingOverrides::from_pairs(pairs)?)
}

fn validate_batch_size(requested: Option<usize>, config: &ImportConfig) -> Result<usize, ImportError> {
    let size = requested.unwrap_or(config.default_batch_size);
    if size == 0 || size > config.max_batch_size {
        return Err(ImportError::Validation(format!(
            "batch_size must be between 1 and {}",
            config.max_batch_size
        )));
    }
    Ok(size)
}

fn normalize_name(name: Option<String>) -> Result<Option<String>, ImportError> {
    let Some(name) = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ImportError::Validation(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(Some(name))
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

struct RunSpec {
    target: ImportTarget,
    mapping: ColumnMapping,
    options: PipelineOptions,
    upload: Arc<UploadedFile>,
}

struct JobRun {
    generation: u64,
    /// Held while the job may still be retried; dropping it releases the upload.
    spec: Option<Arc<RunSpec>>,
    done: Shared<BoxFuture<'static, ()>>,
}

struct Inner {
    tracker: Arc<ProgressTracker>,
    store: Arc<dyn CollectionStore>,
    projects: Arc<dyn ProjectDirectory>,
    resolver: ColumnMappingResolver,
    config: ImportConfig,
    permits: Arc<Semaphore>,
    runs: Mutex<HashMap<Uuid, JobRun>>,
}

/// Starts, cancels, and retries import jobs. Cheap to clone.
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    #[must_use]
    pub fn new(
        store: Arc<dyn CollectionStore>,
        projects: Arc<dyn ProjectDirectory>,
        config: ImportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tracker: Arc::new(ProgressTracker::new()),
                store,
                projects,
                resolver: ColumnMappingResolver::new(),
                config,
                permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.inner.tracker
    }

    #[must_use]
    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    /// Validate a request, create a `pending` job, and launch it in the
    /// background. Returns as soon as the job is registered.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::Validation`] or [`ImportError::Mapping`] for a
    /// request that cannot run; no job is created in that case.
    pub async fn start_import(&self, request: StartImport) -> Result<Uuid, ImportError> {
        let inner = &self.inner;
        let overrides = parse_overrides(request.column_mapping.as_deref())?;
        let batch_size = validate_batch_size(request.batch_size, &inner.config)?;
        let name = normalize_name(request.name)?;
        let collection_type = inner.check_project(request.project_id).await?;

        let upload = Arc::new(request.upload);
        let headers = {
            let upload = Arc::clone(&upload);
            tokio::task::spawn_blocking(move || read_headers(upload.path()))
                .await
                .map_err(|e| ImportError::Task(e.to_string()))?
                .map_err(|e| {
                    ImportError::Validation(format!("could not read the file's header row: {e}"))
                })?
        };
        let mapping = inner.resolver.resolve(&headers, &overrides)?;

        let job = ImportJob::new(upload.filename(), request.project_id, mapping.clone());
        let job_id = inner.tracker.create(job).await?;

        let collection = match request.collection_id {
            Some(id) => TargetCollection::Existing(id),
            None => TargetCollection::New { name },
        };
        let spec = Arc::new(RunSpec {
            target: ImportTarget {
                job_id,
                project_id: request.project_id,
                collection_type,
                collection,
            },
            mapping,
            options: PipelineOptions {
                batch_size,
                batch_pause: Duration::from_millis(inner.config.batch_pause_ms),
            },
            upload,
        });
        inner.launch(job_id, spec).await;

        tracing::info!(
            job_id = %job_id,
            project_id = request.project_id,
            batch_size,
            "import job queued"
        );
        Ok(job_id)
    }

    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown id.
    pub async fn progress(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.inner.tracker.get(job_id).await
    }

    pub async fn list(&self) -> Vec<ImportJob> {
        self.inner.tracker.list().await
    }

    /// Flag a job as cancelled. A running pipeline stops after its current
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::InvalidTransition`] if the job is already
    /// terminal, or [`ImportError::JobNotFound`].
    pub async fn cancel(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        self.inner.tracker.cancel(job_id).await
    }

    /// Reset a failed job and run it again from the same upload.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::InvalidTransition`] unless the job is `failed`,
    /// [`ImportError::Validation`] if its upload has already been released,
    /// or [`ImportError::JobNotFound`].
    pub async fn retry(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let inner = &self.inner;
        let status = inner.tracker.status(job_id).await?;
        if status != JobStatus::Failed {
            return Err(ImportError::InvalidTransition {
                job_id,
                from: status,
                action: "retry",
            });
        }
        let spec = inner
            .runs
            .lock()
            .await
            .get(&job_id)
            .and_then(|run| run.spec.clone())
            .ok_or_else(|| {
                ImportError::Validation(format!(
                    "the upload for job {job_id} is no longer available; start a new import"
                ))
            })?;

        let job = inner.tracker.retry(job_id).await?;
        inner.launch(job_id, spec).await;
        tracing::info!(job_id = %job_id, "import job requeued");
        Ok(job)
    }

    /// Wait for the job's current run to finish and return its final state.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::JobNotFound`] for an unknown id.
    pub async fn wait(&self, job_id: Uuid) -> Result<ImportJob, ImportError> {
        let done = self
            .inner
            .runs
            .lock()
            .await
            .get(&job_id)
            .map(|run| run.done.clone())
            .ok_or(ImportError::JobNotFound(job_id))?;
        done.await;
        self.inner.tracker.get(job_id).await
    }
}

impl Inner {
    /// The collection type a project imports into, if it accepts imports.
    async fn check_project(&self, project_id: i64) -> Result<String, ImportError> {
        let project = self
            .projects
            .find_project(project_id)
            .await?
            .ok_or_else(|| ImportError::Validation(format!("project {project_id} not found")))?;
        if project.project_type != CHAT_DISENTANGLEMENT {
            return Err(ImportError::Validation(format!(
                "project {project_id} has type '{}'; imports need a '{CHAT_DISENTANGLEMENT}' project",
                project.project_type
            )));
        }
        collection_type_for(&project.project_type)
            .map(str::to_string)
            .ok_or_else(|| {
                ImportError::Validation(format!(
                    "project type '{}' has no collection type",
                    project.project_type
                ))
            })
    }

    async fn launch(self: &Arc<Self>, job_id: Uuid, spec: Arc<RunSpec>) {
        let mut runs = self.runs.lock().await;
        let generation = runs.get(&job_id).map_or(0, |run| run.generation + 1);
        let handle = tokio::spawn(Arc::clone(self).supervise(job_id, generation, Arc::clone(&spec)));
        let done = async move {
            if let Err(e) = handle.await {
                tracing::error!(job_id = %job_id, error = %e, "import supervisor failed");
            }
        }
        .boxed()
        .shared();
        runs.insert(
            job_id,
            JobRun {
                generation,
                spec: Some(spec),
                done,
            },
        );
    }

    /// Run the job in its own task so a panic is caught here and recorded
    /// as a failure instead of vanishing.
    async fn supervise(self: Arc<Self>, job_id: Uuid, generation: u64, spec: Arc<RunSpec>) {
        let worker = tokio::spawn(Arc::clone(&self).execute(job_id, spec));
        if let Err(e) = worker.await {
            tracing::error!(job_id = %job_id, error = %e, "import task panicked");
            if let Err(err) = self
                .tracker
                .fail(job_id, vec![format!("import task failed: {e}")])
                .await
            {
                tracing::warn!(job_id = %job_id, error = %err, "could not record task failure");
            }
        }
        self.settle(job_id, generation).await;
    }

    async fn execute(self: Arc<Self>, job_id: Uuid, spec: Arc<RunSpec>) {
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            tracing::error!(job_id = %job_id, "import scheduler closed");
            return;
        };
        if !matches!(self.tracker.status(job_id).await, Ok(JobStatus::Pending)) {
            tracing::debug!(job_id = %job_id, "job left pending before it started");
            return;
        }

        let reporter = JobReporter::new(Arc::clone(&self.tracker), job_id);
        let pipeline = ImportPipeline::new(Arc::clone(&self.store), spec.options);
        let result = pipeline
            .run(&spec.target, &spec.upload, &spec.mapping, &reporter)
            .await;

        let recorded = match result {
            Ok(ImportOutcome {
                status: RunStatus::Completed,
                processed_rows,
                ..
            }) => self.record_completion(job_id, processed_rows).await,
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "import failed");
                self.tracker.fail(job_id, e.summaries()).await.map(|_| ())
            }
        };
        if let Err(e) = recorded {
            tracing::warn!(job_id = %job_id, error = %e, "could not record import result");
        }
    }

    /// A run that read the whole file may still be refused `completed` if the
    /// recorded counts disagree. The job must not stay `processing`, so the
    /// refusal becomes a failure unless the job was cancelled meanwhile.
    async fn record_completion(&self, job_id: Uuid, processed_rows: u64) -> Result<(), ImportError> {
        let Err(refused) = self.tracker.complete(job_id).await else {
            return Ok(());
        };
        if self.tracker.status(job_id).await? != JobStatus::Processing {
            return Err(refused);
        }
        let job = self.tracker.get(job_id).await?;
        let expected = job.total_rows.unwrap_or_default();
        tracing::warn!(
            job_id = %job_id,
            expected,
            processed_rows,
            error = %refused,
            "completion refused"
        );
        self.tracker
            .fail(
                job_id,
                ImportError::RowCountChanged {
                    expected,
                    found: processed_rows,
                }
                .summaries(),
            )
            .await
            .map(|_| ())
    }

    /// Release the upload once the job can no longer be retried.
    async fn settle(&self, job_id: Uuid, generation: u64) {
        let status = self.tracker.status(job_id).await;
        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(&job_id) else {
            return;
        };
        if run.generation != generation {
            return;
        }
        if !matches!(status, Ok(JobStatus::Failed)) && run.spec.take().is_some() {
            tracing::debug!(job_id = %job_id, "upload released");
        }
    }
}
