//! `import` command: run one file through the import orchestrator and follow
//! the job until it reaches a terminal status.
//!
//! Ctrl-C cancels the job; the command then waits for the pipeline to stop
//! after its current batch before exiting.

use std::{path::PathBuf, sync::Arc, time::Duration};

use annot_core::{AppConfig, ImportJob, JobStatus};
use annot_db::PgStore;
use annot_import::{ImportOrchestrator, StartImport, UploadedFile};
use clap::Args;
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Target project id (must be a chat disentanglement project)
    #[arg(long)]
    pub project: i64,
    /// CSV file to import
    #[arg(long)]
    pub file: PathBuf,
    /// Name for the generated collection
    #[arg(long)]
    pub name: Option<String>,
    /// Append to this existing collection instead of creating one
    #[arg(long)]
    pub collection: Option<i64>,
    /// JSON object of field overrides, e.g. '{"content": "Message"}'
    #[arg(long)]
    pub mapping: Option<String>,
    /// Rows per batch (defaults to ANNOT_IMPORT_BATCH_SIZE)
    #[arg(long)]
    pub batch_size: Option<usize>,
}

/// Run an import against the configured database.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the request is rejected,
/// or the job ends in any status other than `completed`.
pub(crate) async fn run_import(config: &AppConfig, args: ImportArgs) -> anyhow::Result<()> {
    let pool = crate::connect(config).await?;
    let store = Arc::new(PgStore::new(pool));
    let orchestrator = ImportOrchestrator::new(store.clone(), store, config.import);

    let job = import_file(&orchestrator, args, POLL_INTERVAL).await?;
    finish(&job)
}

/// Start the import and follow it to the end, returning the final job.
pub(crate) async fn import_file(
    orchestrator: &ImportOrchestrator,
    args: ImportArgs,
    poll: Duration,
) -> anyhow::Result<ImportJob> {
    anyhow::ensure!(
        args.file.is_file(),
        "file not found: {}",
        args.file.display()
    );

    let job_id = orchestrator
        .start_import(StartImport {
            project_id: args.project,
            upload: UploadedFile::external(args.file.clone()),
            collection_id: args.collection,
            name: args.name,
            column_mapping: args.mapping,
            batch_size: args.batch_size,
        })
        .await?;
    println!("import job {job_id} queued for {}", args.file.display());

    follow(orchestrator, job_id, poll).await
}

async fn follow(
    orchestrator: &ImportOrchestrator,
    job_id: Uuid,
    poll: Duration,
) -> anyhow::Result<ImportJob> {
    let done = orchestrator.wait(job_id);
    tokio::pin!(done);
    let mut ticker = tokio::time::interval(poll);
    let mut last_printed: Option<(JobStatus, u64)> = None;
    let mut cancel_sent = false;

    loop {
        tokio::select! {
            job = &mut done => return Ok(job?),
            _ = ticker.tick() => {
                let job = orchestrator.progress(job_id).await?;
                let key = (job.status, job.processed_rows);
                if last_printed != Some(key) && !job.status.is_terminal() {
                    println!("{}", format_progress(&job));
                    last_printed = Some(key);
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancel_sent => {
                cancel_sent = true;
                if let Err(e) = signal {
                    tracing::warn!(error = %e, "failed to listen for ctrl-c");
                    continue;
                }
                match orchestrator.cancel(job_id).await {
                    Ok(_) => eprintln!("cancelling import job {job_id}..."),
                    Err(e) => tracing::warn!(job_id = %job_id, error = %e, "cancel rejected"),
                }
            }
        }
    }
}

pub(crate) fn format_progress(job: &ImportJob) -> String {
    let total = job
        .total_rows
        .map_or_else(|| "?".to_string(), |t| t.to_string());
    let mut line = format!(
        "{}: {}/{} rows ({:.1}%)",
        job.status,
        job.processed_rows,
        total,
        job.percentage * 100.0
    );
    if job.failed_rows > 0 {
        line.push_str(&format!(", {} failed", job.failed_rows));
    }
    line
}

fn finish(job: &ImportJob) -> anyhow::Result<()> {
    match job.status {
        JobStatus::Completed => {
            let collection = job
                .target_collection_id
                .map_or_else(|| "?".to_string(), |id| id.to_string());
            println!(
                "imported {} rows into collection {collection}",
                job.processed_rows
            );
            Ok(())
        }
        JobStatus::Failed => {
            for error in &job.errors {
                eprintln!("  {error}");
            }
            anyhow::bail!("import job {} failed", job.id)
        }
        status => anyhow::bail!("import job {} ended as {status}", job.id),
    }
}
