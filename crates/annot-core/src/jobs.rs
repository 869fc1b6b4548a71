//! Import job record and its status enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mapping::ColumnMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal jobs never change again, except `Failed` through a retry.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            _ => Err(format!("invalid job status: {s}")),
        }
    }
}

/// One tracked import attempt.
///
/// `percentage` is a fraction in `[0, 1]`. `end_time` is set exactly when
/// the status is terminal. `failed_rows` counts row-level failures seen so
/// far; `errors` only ever holds end-of-run summaries.
#[derive(Debug, Clone, Serialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub filename: String,
    pub project_id: i64,
    pub total_rows: Option<u64>,
    pub processed_rows: u64,
    pub failed_rows: u64,
    pub percentage: f64,
    pub errors: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub target_collection_id: Option<i64>,
    pub column_mapping: ColumnMapping,
}

impl ImportJob {
    /// A fresh `pending` job with a new id.
    #[must_use]
    pub fn new(filename: impl Into<String>, project_id: i64, column_mapping: ColumnMapping) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            filename: filename.into(),
            project_id,
            total_rows: None,
            processed_rows: 0,
            failed_rows: 0,
            percentage: 0.0,
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
            target_collection_id: None,
            column_mapping,
        }
    }
}
