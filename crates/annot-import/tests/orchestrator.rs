//! End-to-end job behaviour: validation, background execution, cancel,
//! retry, and concurrent jobs, all against the in-memory store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use annot_core::{
    store::{CHAT_DISENTANGLEMENT, CHAT_ROOMS},
    ImportConfig, JobStatus,
};
use annot_import::{ImportError, ImportOrchestrator, MemoryStore, StartImport, UploadedFile};

fn config(batch_pause_ms: u64, max_concurrent_jobs: usize) -> ImportConfig {
    ImportConfig {
        batch_pause_ms,
        max_concurrent_jobs,
        ..ImportConfig::default()
    }
}

async fn setup(config: ImportConfig) -> (Arc<MemoryStore>, ImportOrchestrator, i64) {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("Disentangle", CHAT_DISENTANGLEMENT).await;
    let orchestrator = ImportOrchestrator::new(store.clone(), store.clone(), config);
    (store, orchestrator, project.id)
}

fn request(project_id: i64, upload: UploadedFile, batch_size: usize) -> StartImport {
    StartImport {
        project_id,
        upload,
        collection_id: None,
        name: None,
        column_mapping: None,
        batch_size: Some(batch_size),
    }
}

// ---------------------------------------------------------------------------
// Synchronous validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_project_is_rejected_without_a_job() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;

    let err = orchestrator
        .start_import(request(project_id + 100, common::upload(&common::chat_csv(3)), 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Validation(_)));
    assert!(orchestrator.list().await.is_empty());
}

#[tokio::test]
async fn wrong_project_type_is_rejected() {
    let (store, orchestrator, _) = setup(config(0, 4)).await;
    let images = store.add_project("Images", "image_annotation").await;

    let err = orchestrator
        .start_import(request(images.id, common::upload(&common::chat_csv(3)), 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Validation(msg) if msg.contains("image_annotation")));
}

#[tokio::test]
async fn malformed_override_is_rejected() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;
    let mut req = request(project_id, common::upload(&common::chat_csv(3)), 10);
    req.column_mapping = Some("{\"content\": ".to_string());

    let err = orchestrator.start_import(req).await.unwrap_err();

    assert!(matches!(err, ImportError::Validation(_)));
    assert!(orchestrator.list().await.is_empty());
}

#[tokio::test]
async fn unresolvable_content_column_is_a_mapping_error() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;
    let upload = common::upload(b"Turn_ID,User\n1,alice\n");

    let err = orchestrator
        .start_import(request(project_id, upload, 10))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Mapping(_)));
    assert!(err.to_string().contains("content"));
    assert!(orchestrator.list().await.is_empty());
}

#[tokio::test]
async fn out_of_range_batch_size_is_rejected() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;

    let err = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(3)), 0))
        .await
        .unwrap_err();

    assert!(matches!(err, ImportError::Validation(_)));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (_store, orchestrator, _) = setup(config(0, 4)).await;
    let id = uuid::Uuid::new_v4();

    assert!(matches!(orchestrator.progress(id).await, Err(ImportError::JobNotFound(_))));
    assert!(matches!(orchestrator.cancel(id).await, Err(ImportError::JobNotFound(_))));
    assert!(matches!(orchestrator.retry(id).await, Err(ImportError::JobNotFound(_))));
}

// ---------------------------------------------------------------------------
// Background execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_import_completes_at_full_percentage() {
    let (store, orchestrator, project_id) = setup(config(0, 4)).await;
    let upload = common::upload(&common::chat_csv(25));
    let spooled = upload.path().to_path_buf();

    let job_id = orchestrator
        .start_import(request(project_id, upload, 10))
        .await
        .unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert!((job.percentage - 1.0).abs() < f64::EPSILON);
    assert!(job.errors.is_empty());
    assert_eq!(job.total_rows, Some(25));
    assert_eq!(job.processed_rows, 25);
    assert!(job.end_time.is_some());
    assert_eq!(job.column_mapping.header(annot_core::CanonicalField::Content), Some("Message"));

    let collection_id = job.target_collection_id.unwrap();
    assert_eq!(store.items(collection_id).await.len(), 25);
    assert!(!spooled.exists(), "upload should be released after completion");
}

#[tokio::test]
async fn two_bad_rows_fail_with_one_aggregated_error() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;
    let upload = common::upload(&common::ten_rows_two_bad());
    let spooled = upload.path().to_path_buf();

    let job_id = orchestrator
        .start_import(request(project_id, upload, 4))
        .await
        .unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.total_rows, Some(10));
    assert_eq!(job.processed_rows, 10);
    assert_eq!(job.failed_rows, 2);
    assert_eq!(job.errors.len(), 1);
    assert!(job.errors[0].starts_with("2 rows:"), "{:?}", job.errors);
    assert!(job.percentage <= 1.0);
    assert!(spooled.exists(), "failed job keeps its upload for retry");
}

#[tokio::test]
async fn header_only_file_fails_without_collection() {
    let (store, orchestrator, project_id) = setup(config(0, 4)).await;

    let job_id = orchestrator
        .start_import(request(project_id, common::upload(b"Turn_ID,User,Message\n"), 10))
        .await
        .unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.total_rows, Some(0));
    assert!(job.target_collection_id.is_none());
    assert!(store.collections().await.is_empty());
}

#[tokio::test]
async fn named_import_into_existing_collection() {
    let (store, orchestrator, project_id) = setup(config(0, 4)).await;
    let existing = store.add_collection(project_id, "Week 1", CHAT_ROOMS).await;
    let mut req = request(project_id, common::upload(&common::chat_csv(3)), 10);
    req.collection_id = Some(existing.id);

    let job_id = orchestrator.start_import(req).await.unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.target_collection_id, Some(existing.id));
    assert_eq!(store.items(existing.id).await.len(), 3);
}

#[tokio::test]
async fn override_redirects_content_column() {
    let (store, orchestrator, project_id) = setup(config(0, 4)).await;
    let upload = common::upload(b"Message,Utterance\nignored,kept\n");
    let mut req = request(project_id, upload, 10);
    req.column_mapping = Some(r#"{"content": "utter*"}"#.to_string());

    let job_id = orchestrator.start_import(req).await.unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    let items = store.items(job.target_collection_id.unwrap()).await;
    assert_eq!(items[0].content, "kept");
}

#[tokio::test]
async fn reused_collection_name_creates_a_new_chat_collection() {
    let (store, orchestrator, project_id) = setup(config(0, 4)).await;
    let images = store.add_collection(project_id, "Week 1", "image_collections").await;
    let mut req = request(project_id, common::upload(&common::chat_csv(3)), 10);
    req.name = Some("Week 1".to_string());

    let job_id = orchestrator.start_import(req).await.unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    let target = job.target_collection_id.unwrap();
    assert_ne!(target, images.id);
    assert!(store.items(images.id).await.is_empty());
    let created = store
        .collections()
        .await
        .into_iter()
        .find(|c| c.id == target)
        .unwrap();
    assert_eq!(created.name, "Week 1");
    assert_eq!(created.collection_type, CHAT_ROOMS);
}

async fn wait_for_status(orchestrator: &ImportOrchestrator, job_id: uuid::Uuid, status: JobStatus) {
    for _ in 0..500 {
        if orchestrator.progress(job_id).await.unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("job {job_id} never reached {status}");
}

// ---------------------------------------------------------------------------
// Cancel and retry
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_queued_job_never_runs_and_releases_its_upload() {
    let (store, orchestrator, project_id) = setup(config(10, 1)).await;

    let running = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(100)), 5))
        .await
        .unwrap();
    wait_for_status(&orchestrator, running, JobStatus::Processing).await;

    let upload = common::upload(&common::chat_csv(5));
    let spooled = upload.path().to_path_buf();
    let queued = orchestrator
        .start_import(request(project_id, upload, 5))
        .await
        .unwrap();
    assert_eq!(orchestrator.progress(queued).await.unwrap().status, JobStatus::Pending);

    let cancelled = orchestrator.cancel(queued).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let job = orchestrator.wait(queued).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.end_time, cancelled.end_time);
    assert_eq!(job.total_rows, None);
    assert_eq!(job.processed_rows, 0);
    assert!(job.target_collection_id.is_none());
    assert!(!spooled.exists(), "cancelled queued job releases its upload");

    let finished = orchestrator.wait(running).await.unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    let collections = store.collections().await;
    assert_eq!(collections.len(), 1);
    assert_eq!(Some(collections[0].id), finished.target_collection_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_stops_a_running_job_exactly_once() {
    let (store, orchestrator, project_id) = setup(config(20, 4)).await;
    let upload = common::upload(&common::chat_csv(200));
    let spooled = upload.path().to_path_buf();

    let job_id = orchestrator
        .start_import(request(project_id, upload, 10))
        .await
        .unwrap();
    let cancelled = orchestrator.cancel(job_id).await.unwrap();
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let err = orchestrator.cancel(job_id).await.unwrap_err();
    assert!(matches!(err, ImportError::InvalidTransition { .. }));

    let job = orchestrator.wait(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.end_time, cancelled.end_time);
    assert!(job.processed_rows < 200);

    let written: usize = {
        let mut total = 0;
        for collection in store.collections().await {
            total += store.items(collection.id).await.len();
        }
        total
    };
    assert!(written < 200);
    assert!(!spooled.exists(), "cancelled job releases its upload");
}

#[tokio::test]
async fn retry_resets_and_reruns_a_failed_job() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;

    let job_id = orchestrator
        .start_import(request(project_id, common::upload(&common::ten_rows_two_bad()), 4))
        .await
        .unwrap();
    let failed = orchestrator.wait(job_id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    let reset = orchestrator.retry(job_id).await.unwrap();
    assert_eq!(reset.id, job_id);
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.processed_rows, 0);
    assert!(reset.errors.is_empty());
    assert!(reset.end_time.is_none());

    let rerun = orchestrator.wait(job_id).await.unwrap();
    assert_eq!(rerun.status, JobStatus::Failed);
    assert_eq!(rerun.errors.len(), 1);
    assert_eq!(orchestrator.list().await.len(), 1);
}

#[tokio::test]
async fn retry_is_rejected_unless_failed() {
    let (_store, orchestrator, project_id) = setup(config(0, 4)).await;

    let job_id = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(3)), 10))
        .await
        .unwrap();
    let job = orchestrator.wait(job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    assert!(matches!(
        orchestrator.retry(job_id).await,
        Err(ImportError::InvalidTransition {
            from: JobStatus::Completed,
            ..
        })
    ));
    assert!(matches!(
        orchestrator.cancel(job_id).await,
        Err(ImportError::InvalidTransition { .. })
    ));
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_jobs_progress_independently() {
    let (store, orchestrator, project_id) = setup(config(5, 4)).await;

    let short = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(20)), 5))
        .await
        .unwrap();
    let long = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(60)), 5))
        .await
        .unwrap();

    let (short_job, long_job) = tokio::join!(orchestrator.wait(short), orchestrator.wait(long));
    let short_job = short_job.unwrap();
    let long_job = long_job.unwrap();
    assert_eq!(short_job.status, JobStatus::Completed);
    assert_eq!(long_job.status, JobStatus::Completed);

    let short_collection = short_job.target_collection_id.unwrap();
    let long_collection = long_job.target_collection_id.unwrap();
    assert_ne!(short_collection, long_collection);
    assert_eq!(store.items(short_collection).await.len(), 20);
    assert_eq!(store.items(long_collection).await.len(), 60);

    // Writes interleave: the long job wrote before the short one finished.
    let log = store.append_log().await;
    let last_short = log.iter().rposition(|&c| c == short_collection).unwrap();
    let first_long = log.iter().position(|&c| c == long_collection).unwrap();
    assert!(first_long < last_short, "append order: {log:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_beyond_the_limit_wait_in_pending() {
    let (_store, orchestrator, project_id) = setup(config(10, 1)).await;

    let first = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(100)), 5))
        .await
        .unwrap();
    let second = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(5)), 5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(orchestrator.progress(first).await.unwrap().status, JobStatus::Processing);
    assert_eq!(orchestrator.progress(second).await.unwrap().status, JobStatus::Pending);

    let second_job = orchestrator.wait(second).await.unwrap();
    assert_eq!(second_job.status, JobStatus::Completed);
    let first_job = orchestrator.progress(first).await.unwrap();
    assert_eq!(first_job.status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn percentage_stays_in_bounds_while_polled() {
    let (_store, orchestrator, project_id) = setup(config(2, 4)).await;

    let job_id = orchestrator
        .start_import(request(project_id, common::upload(&common::chat_csv(50)), 5))
        .await
        .unwrap();

    let mut observed = Vec::new();
    loop {
        let job = orchestrator.progress(job_id).await.unwrap();
        observed.push(job.percentage);
        if let Some(total) = job.total_rows {
            assert!(job.processed_rows <= total);
        }
        if job.status.is_terminal() {
            assert_eq!(job.status, JobStatus::Completed);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(observed.iter().all(|p| (0.0..=1.0).contains(p)));
    assert!(observed.windows(2).all(|w| w[0] <= w[1]));
    assert!((observed.last().copied().unwrap() - 1.0).abs() < f64::EPSILON);
}
