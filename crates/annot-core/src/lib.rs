//! Shared types for the annotation import backend: configuration, column
//! mapping, the import job record, and the storage collaborator traits.

pub mod app_config;
pub mod config;
pub mod glob;
pub mod jobs;
pub mod mapping;
pub mod store;

use thiserror::Error;

pub use app_config::{AppConfig, Environment, ImportConfig};
pub use config::{load_app_config, load_app_config_from_env};
pub use jobs::{ImportJob, JobStatus};
pub use mapping::{
    CanonicalField, ColumnMapping, ColumnMappingResolver, MappingError, MappingOverrides,
    ResolvedColumn,
};
pub use store::{
    CollectionRef, CollectionStore, NewCollection, NewItem, ProjectDirectory, ProjectRef,
    StoreError,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
