//! Persistence and project-lookup collaborators consumed by the importer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Project type whose collections hold imported conversations.
pub const CHAT_DISENTANGLEMENT: &str = "chat_disentanglement";
/// Collection type created for [`CHAT_DISENTANGLEMENT`] projects.
pub const CHAT_ROOMS: &str = "chat_rooms";

/// Container type each project type stores its data in.
#[must_use]
pub fn collection_type_for(project_type: &str) -> Option<&'static str> {
    match project_type {
        CHAT_DISENTANGLEMENT => Some(CHAT_ROOMS),
        "image_annotation" => Some("image_collections"),
        "text_classification" => Some("text_documents"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: i64,
    pub name: String,
    pub project_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRef {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub collection_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCollection {
    pub project_id: i64,
    pub name: String,
    pub collection_type: String,
    pub metadata: serde_json::Value,
}

/// One record bound for a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewItem {
    /// 1-based data-row number in the source file.
    pub ordinal: u64,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection {0} not found")]
    CollectionNotFound(i64),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Always inserts a fresh collection. Names are labels, not keys: two
    /// collections in one project may share a name.
    async fn create_collection(&self, new: NewCollection) -> Result<CollectionRef, StoreError>;

    async fn get_collection(&self, collection_id: i64) -> Result<Option<CollectionRef>, StoreError>;

    /// Append records in one transaction. Returns how many were written.
    async fn append_items(&self, collection_id: i64, items: &[NewItem]) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn find_project(&self, project_id: i64) -> Result<Option<ProjectRef>, StoreError>;
}
