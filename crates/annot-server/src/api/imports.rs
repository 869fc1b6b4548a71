use std::str::FromStr;

use annot_core::{ColumnMapping, ImportJob, JobStatus};
use annot_import::{StartImport, UploadedFile};
use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_import_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

const DEFAULT_UPLOAD_NAME: &str = "upload.csv";

#[derive(Debug, Deserialize)]
pub(super) struct ImportsQuery {
    pub limit: Option<usize>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct ImportAccepted {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub(super) struct ImportJobItem {
    job_id: Uuid,
    status: JobStatus,
    filename: String,
    project_id: i64,
    total_rows: Option<u64>,
    processed_rows: u64,
    failed_rows: u64,
    percentage: f64,
    errors: Vec<String>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    target_collection_id: Option<i64>,
    column_mapping: ColumnMapping,
}

impl From<ImportJob> for ImportJobItem {
    fn from(job: ImportJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            filename: job.filename,
            project_id: job.project_id,
            total_rows: job.total_rows,
            processed_rows: job.processed_rows,
            failed_rows: job.failed_rows,
            percentage: job.percentage,
            errors: job.errors,
            start_time: job.start_time,
            end_time: job.end_time,
            target_collection_id: job.target_collection_id,
            column_mapping: job.column_mapping,
        }
    }
}

/// Multipart fields of an import request, before the upload is spooled.
#[derive(Debug, Default)]
struct ImportForm {
    file: Option<(String, Vec<u8>)>,
    name: Option<String>,
    collection_id: Option<i64>,
    column_mapping: Option<String>,
    batch_size: Option<usize>,
}

pub(super) async fn start_import(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(project_id): Path<i64>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<ImportAccepted>>), ApiError> {
    let form = read_form(&req_id.0, multipart).await?;
    let Some((filename, bytes)) = form.file else {
        return Err(ApiError::new(
            req_id.0,
            "validation_error",
            "multipart field 'file' is required",
        ));
    };

    let upload = UploadedFile::spool(filename, bytes).await.map_err(|e| {
        tracing::error!(error = %e, "failed to spool upload");
        ApiError::new(req_id.0.clone(), "internal_error", "failed to store upload")
    })?;

    let job_id = state
        .imports
        .start_import(StartImport {
            project_id,
            upload,
            collection_id: form.collection_id,
            name: form.name,
            column_mapping: form.column_mapping,
            batch_size: form.batch_size,
        })
        .await
        .map_err(|e| map_import_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: ImportAccepted { job_id },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn list_imports(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ImportsQuery>,
) -> Result<Json<ApiResponse<Vec<ImportJobItem>>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(|e| ApiError::new(req_id.0.clone(), "validation_error", e))?;

    let data = state
        .imports
        .list()
        .await
        .into_iter()
        .filter(|job| status.map_or(true, |s| job.status == s))
        .take(normalize_limit(query.limit))
        .map(ImportJobItem::from)
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn get_import(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse<ImportJobItem>>, ApiError> {
    let job_id = parse_job_id(&req_id.0, &raw_id)?;
    let job = state
        .imports
        .progress(job_id)
        .await
        .map_err(|e| map_import_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: job.into(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn cancel_import(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<Json<ApiResponse<ImportJobItem>>, ApiError> {
    let job_id = parse_job_id(&req_id.0, &raw_id)?;
    let job = state
        .imports
        .cancel(job_id)
        .await
        .map_err(|e| map_import_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: job.into(),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn retry_import(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(raw_id): Path<String>,
) -> Result<(StatusCode, Json<ApiResponse<ImportJobItem>>), ApiError> {
    let job_id = parse_job_id(&req_id.0, &raw_id)?;
    let job = state
        .imports
        .retry(job_id)
        .await
        .map_err(|e| map_import_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: job.into(),
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

fn parse_job_id(req_id: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| {
        ApiError::new(
            req_id,
            "validation_error",
            format!("'{raw}' is not a valid job id"),
        )
    })
}

async fn read_form(req_id: &str, mut multipart: Multipart) -> Result<ImportForm, ApiError> {
    let mut form = ImportForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(req_id, &e))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(upload_name)
                    .unwrap_or(DEFAULT_UPLOAD_NAME)
                    .to_owned();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(req_id, &e))?;
                form.file = Some((filename, bytes.to_vec()));
            }
            "name" => {
                form.name = Some(field_text(req_id, field.text().await)?);
            }
            "collection_id" => {
                let text = field_text(req_id, field.text().await)?;
                form.collection_id = parse_optional(req_id, "collection_id", &text)?;
            }
            "column_mapping" => {
                form.column_mapping = Some(field_text(req_id, field.text().await)?);
            }
            "batch_size" => {
                let text = field_text(req_id, field.text().await)?;
                form.batch_size = parse_optional(req_id, "batch_size", &text)?;
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    Ok(form)
}

fn field_text(req_id: &str, text: Result<String, MultipartError>) -> Result<String, ApiError> {
    text.map_err(|e| multipart_error(req_id, &e))
}

/// Blank values mean "not provided".
fn parse_optional<T: FromStr>(req_id: &str, field: &str, raw: &str) -> Result<Option<T>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse().map(Some).map_err(|_| {
        ApiError::new(
            req_id,
            "validation_error",
            format!("'{field}' must be a positive integer, got '{raw}'"),
        )
    })
}

/// Browsers may send a full client-side path as the file name.
fn upload_name(raw: &str) -> &str {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or(raw).trim();
    if name.is_empty() {
        DEFAULT_UPLOAD_NAME
    } else {
        name
    }
}

fn multipart_error(req_id: &str, error: &MultipartError) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::new(req_id, "payload_too_large", error.body_text());
    }
    tracing::debug!(error = %error, "rejected malformed multipart body");
    ApiError::new(req_id, "validation_error", error.body_text())
}
