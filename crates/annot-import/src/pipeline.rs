//! Import pipeline: one uploaded file into one target collection.

use std::sync::Arc;
use std::time::Duration;

use annot_core::{CollectionRef, CollectionStore, ColumnMapping, NewCollection};
use chrono::Utc;
use uuid::Uuid;

use crate::error::{AggregateImportError, ImportError, RowFailure, SourceError};
use crate::progress::{ProgressReporter, ProgressUpdate};
use crate::source::{count_rows, read_headers, Batch, BatchReader, RowShape, UploadedFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Pause after every batch write. Zero yields without sleeping.
    pub batch_pause: Duration,
}

/// The collection a job writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetCollection {
    /// Append to an existing collection, which must belong to the project.
    Existing(i64),
    /// Create a collection. `None` generates a timestamped name.
    New { name: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportTarget {
    pub job_id: Uuid,
    pub project_id: i64,
    /// Collection type the project stores its data in.
    pub collection_type: String,
    pub collection: TargetCollection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// The job stopped accepting updates part-way, almost always a cancel.
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub status: RunStatus,
    pub total_rows: u64,
    pub processed_rows: u64,
    pub collection_id: Option<i64>,
}

pub struct ImportPipeline {
    store: Arc<dyn CollectionStore>,
    options: PipelineOptions,
}

impl ImportPipeline {
    #[must_use]
    pub fn new(store: Arc<dyn CollectionStore>, options: PipelineOptions) -> Self {
        Self { store, options }
    }

    /// Run one import to the end of the file or until the job is cancelled.
    ///
    /// The mapping is bound to the header row once and reused for every
    /// batch. Row failures never stop the run; they are counted as they
    /// happen and turned into one [`ImportError::Aggregate`] after the last
    /// batch.
    ///
    /// # Errors
    ///
    /// Returns [`ImportError::EmptyFile`] for a file with no data rows (no
    /// collection is created), [`ImportError::Validation`] for a target
    /// collection that does not fit the project, [`ImportError::Aggregate`]
    /// if any row failed, [`ImportError::RowCountChanged`] if the file no
    /// longer matches its pre-scan, and source or store errors that stop the
    /// run.
    pub async fn run(
        &self,
        target: &ImportTarget,
        source: &Arc<UploadedFile>,
        mapping: &ColumnMapping,
        reporter: &dyn ProgressReporter,
    ) -> Result<ImportOutcome, ImportError> {
        let job_id = target.job_id;
        let headers = blocking(source, read_headers).await?;
        let shape = RowShape::bind(mapping, &headers)?;
        let total = blocking(source, count_rows).await?;

        let mut outcome = ImportOutcome {
            status: RunStatus::Stopped,
            total_rows: total,
            processed_rows: 0,
            collection_id: None,
        };

        let started = reporter
            .report(ProgressUpdate {
                total_rows: Some(total),
                ..ProgressUpdate::default()
            })
            .await;
        if !started {
            return Ok(outcome);
        }
        if total == 0 {
            return Err(ImportError::EmptyFile);
        }

        let collection = self.resolve_collection(target, source.filename()).await?;
        outcome.collection_id = Some(collection.id);
        tracing::info!(
            job_id = %job_id,
            project_id = target.project_id,
            collection_id = collection.id,
            rows = total,
            batch_size = self.options.batch_size,
            "import started"
        );

        let batch_size = self.options.batch_size.max(1);
        let mut reader = {
            let path = source.path().to_path_buf();
            run_blocking(move || BatchReader::open(&path, shape)).await?
        };
        let mut failures = AggregateImportError::new();
        let mut batch_no = 0_u64;

        loop {
            if reporter.cancelled().await {
                tracing::info!(job_id = %job_id, processed_rows = outcome.processed_rows, "import stopped");
                return Ok(outcome);
            }

            let (returned, next) = run_blocking(move || {
                let batch = reader.next_batch(batch_size);
                Ok((reader, batch))
            })
            .await?;
            reader = returned;
            let Some(batch) = next? else {
                break;
            };
            batch_no += 1;

            let rows = batch.rows;
            self.write_batch(collection.id, batch, &mut failures).await;
            outcome.processed_rows += rows;
            tracing::debug!(
                job_id = %job_id,
                batch = batch_no,
                rows,
                processed_rows = outcome.processed_rows,
                failed_rows = failures.failed_rows(),
                "batch written"
            );

            let accepted = reporter
                .report(ProgressUpdate {
                    processed_rows: outcome.processed_rows,
                    total_rows: None,
                    failed_rows: failures.failed_rows(),
                    target_collection_id: (batch_no == 1).then_some(collection.id),
                })
                .await;
            if !accepted {
                return Ok(outcome);
            }

            if self.options.batch_pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.options.batch_pause).await;
            }
        }

        if outcome.processed_rows != total {
            return Err(ImportError::RowCountChanged {
                expected: total,
                found: outcome.processed_rows,
            });
        }

        if let Some(aggregate) = failures.finish() {
            tracing::warn!(
                job_id = %job_id,
                failed_rows = aggregate.failed_rows(),
                causes = aggregate.summaries().len(),
                "import finished with row failures"
            );
            return Err(ImportError::Aggregate(aggregate));
        }

        outcome.status = RunStatus::Completed;
        tracing::info!(
            job_id = %job_id,
            collection_id = collection.id,
            processed_rows = outcome.processed_rows,
            "import finished"
        );
        Ok(outcome)
    }

    async fn resolve_collection(
        &self,
        target: &ImportTarget,
        filename: &str,
    ) -> Result<CollectionRef, ImportError> {
        match &target.collection {
            TargetCollection::Existing(id) => {
                let collection = self
                    .store
                    .get_collection(*id)
                    .await?
                    .ok_or_else(|| ImportError::Validation(format!("collection {id} not found")))?;
                check_fits(&collection, target)?;
                Ok(collection)
            }
            // Always a fresh row, even when another collection in the
            // project already carries the same name.
            TargetCollection::New { name } => {
                let name = name.clone().unwrap_or_else(|| {
                    format!("Import {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"))
                });
                let collection = self
                    .store
                    .create_collection(NewCollection {
                        project_id: target.project_id,
                        name,
                        collection_type: target.collection_type.clone(),
                        metadata: serde_json::json!({
                            "source_file": filename,
                            "import_job_id": target.job_id,
                        }),
                    })
                    .await?;
                check_fits(&collection, target)?;
                Ok(collection)
            }
        }
    }

    /// Write one batch. A failed write turns every record in the batch into
    /// a row failure; it never stops the run.
    async fn write_batch(
        &self,
        collection_id: i64,
        batch: Batch,
        failures: &mut AggregateImportError,
    ) {
        let Batch {
            items,
            failures: row_failures,
            ..
        } = batch;
        for failure in &row_failures {
            failures.record_error(failure);
        }
        if items.is_empty() {
            return;
        }
        if let Err(e) = self.store.append_items(collection_id, &items).await {
            tracing::warn!(
                collection_id,
                rows = items.len(),
                error = %e,
                "batch write failed"
            );
            let cause = RowFailure::WriteFailed(e.to_string());
            failures.record(&cause, items.iter().map(|item| item.ordinal));
        }
    }
}

/// A collection may receive rows only if it belongs to the target project
/// and holds the project's collection type.
fn check_fits(collection: &CollectionRef, target: &ImportTarget) -> Result<(), ImportError> {
    let id = collection.id;
    if collection.project_id != target.project_id {
        return Err(ImportError::Validation(format!(
            "collection {id} does not belong to project {}",
            target.project_id
        )));
    }
    if collection.collection_type != target.collection_type {
        return Err(ImportError::Validation(format!(
            "collection {id} has type '{}', expected '{}'",
            collection.collection_type, target.collection_type
        )));
    }
    Ok(())
}

async fn run_blocking<T, F>(f: F) -> Result<T, ImportError>
where
    F: FnOnce() -> Result<T, SourceError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImportError::Source(SourceError::Task(e.to_string())))?
        .map_err(ImportError::from)
}

async fn blocking<T, F>(source: &Arc<UploadedFile>, f: F) -> Result<T, ImportError>
where
    F: FnOnce(&std::path::Path) -> Result<T, SourceError> + Send + 'static,
    T: Send + 'static,
{
    let source = Arc::clone(source);
    run_blocking(move || f(source.path())).await
}
