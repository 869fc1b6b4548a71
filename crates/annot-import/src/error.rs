use std::collections::HashMap;
use std::path::PathBuf;

use annot_core::{CanonicalField, JobStatus, MappingError, StoreError};
use thiserror::Error;
use uuid::Uuid;

/// Failures reading the uploaded file itself, as opposed to one of its rows.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("file has no header row")]
    MissingHeader,

    #[error("file reader task failed: {0}")]
    Task(String),
}

/// Why a single row could not become a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowFailure {
    /// The row is shorter than the header and has no cell for a mapped column.
    MissingValue {
        field: CanonicalField,
        header: String,
    },
    EmptyContent { header: String },
    InvalidUtf8 { header: String },
    WriteFailed(String),
}

impl std::fmt::Display for RowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowFailure::MissingValue { field, header } => {
                write!(f, "column '{header}' ({field}) missing")
            }
            RowFailure::EmptyContent { header } => write!(f, "column '{header}' (content) is empty"),
            RowFailure::InvalidUtf8 { header } => {
                write!(f, "column '{header}' is not valid UTF-8")
            }
            RowFailure::WriteFailed(reason) => write!(f, "batch write failed: {reason}"),
        }
    }
}

/// One skipped row. `row` is the 1-based data-row number.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("row {row}: {cause}")]
pub struct RowError {
    pub row: u64,
    pub cause: RowFailure,
}

/// Row numbers kept per cause for the summary line.
const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CauseCount {
    cause: RowFailure,
    count: u64,
    sample: Vec<u64>,
}

/// Row failures from a whole file, grouped by cause in first-seen order.
///
/// Built up batch by batch. Memory grows with the number of distinct causes,
/// never with the number of failed rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateImportError {
    groups: Vec<CauseCount>,
    index: HashMap<RowFailure, usize>,
}

impl AggregateImportError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one failure per entry of `rows`, all with the same cause.
    pub fn record(&mut self, cause: &RowFailure, rows: impl IntoIterator<Item = u64>) {
        let mut rows = rows.into_iter().peekable();
        if rows.peek().is_none() {
            return;
        }
        let slot = match self.index.get(cause) {
            Some(&slot) => slot,
            None => {
                self.groups.push(CauseCount {
                    cause: cause.clone(),
                    count: 0,
                    sample: Vec::new(),
                });
                self.index.insert(cause.clone(), self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        let group = &mut self.groups[slot];
        for row in rows {
            group.count += 1;
            if group.sample.len() < SAMPLE_ROWS {
                group.sample.push(row);
            }
        }
    }

    pub fn record_error(&mut self, error: &RowError) {
        self.record(&error.cause, [error.row]);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group `failures` by cause. Returns `None` when there is nothing to report.
    #[must_use]
    pub fn from_failures(failures: &[RowError]) -> Option<Self> {
        let mut aggregate = Self::new();
        for failure in failures {
            aggregate.record_error(failure);
        }
        aggregate.finish()
    }

    /// `None` if nothing was recorded.
    #[must_use]
    pub fn finish(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }

    /// One `"<count> row(s): <cause> (rows a, b, ...)"` line per distinct cause.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        self.groups.iter().map(CauseCount::summary).collect()
    }

    #[must_use]
    pub fn failed_rows(&self) -> u64 {
        self.groups.iter().map(|g| g.count).sum()
    }
}

impl CauseCount {
    fn summary(&self) -> String {
        let noun = if self.count == 1 { "row" } else { "rows" };
        let mut rows: Vec<String> = self.sample.iter().map(u64::to_string).collect();
        if self.count > self.sample.len() as u64 {
            rows.push("...".to_string());
        }
        format!(
            "{} {noun}: {} ({noun} {})",
            self.count,
            self.cause,
            rows.join(", ")
        )
    }
}

impl std::fmt::Display for AggregateImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = self.failed_rows();
        let noun = if failed == 1 { "row" } else { "rows" };
        write!(f, "{failed} {noun} failed: {}", self.summaries().join("; "))
    }
}

impl std::error::Error for AggregateImportError {}

/// Temp-file cleanup failure. Only ever logged.
#[derive(Debug, Error)]
#[error("failed to remove temporary file {}: {source}", path.display())]
pub struct ResourceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid import request: {0}")]
    Validation(String),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error("could not read source file: {0}")]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("file contains no data rows")]
    EmptyFile,

    #[error("row count changed during import: pre-scan counted {expected}, read {found}")]
    RowCountChanged { expected: u64, found: u64 },

    #[error(transparent)]
    Aggregate(AggregateImportError),

    #[error("import job {0} not found")]
    JobNotFound(Uuid),

    #[error("cannot {action} import job {job_id} while it is {from}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        action: &'static str,
    },

    #[error("import task failed: {0}")]
    Task(String),
}

impl ImportError {
    /// The lines recorded in a failed job's `errors` list.
    #[must_use]
    pub fn summaries(&self) -> Vec<String> {
        match self {
            ImportError::Aggregate(agg) => agg.summaries(),
            other => vec![other.to_string()],
        }
    }
}
