//! Tabular conversation import: batched pipeline, job tracking, and the
//! orchestrator that runs jobs in the background.

pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod source;

pub use error::{AggregateImportError, ImportError, ResourceError, RowError, RowFailure, SourceError};
pub use memory::MemoryStore;
pub use orchestrator::{parse_overrides, ImportOrchestrator, StartImport};
pub use pipeline::{
    ImportOutcome, ImportPipeline, ImportTarget, PipelineOptions, RunStatus, TargetCollection,
};
pub use progress::{JobChange, JobReporter, ProgressReporter, ProgressTracker, ProgressUpdate};
pub use source::{is_null, read_headers, UploadedFile};
