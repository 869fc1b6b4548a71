//! [`PgStore`]: the Postgres-backed collection store and project directory.

use annot_core::{
    CollectionRef, CollectionStore, NewCollection, NewItem, ProjectDirectory, ProjectRef,
    StoreError,
};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::{collections, projects, CollectionRow, DbError, ProjectRow};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<CollectionRow> for CollectionRef {
    fn from(row: CollectionRow) -> Self {
        Self {
            id: row.id,
            project_id: row.project_id,
            name: row.name,
            collection_type: row.collection_type,
        }
    }
}

impl From<ProjectRow> for ProjectRef {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            project_type: row.project_type,
        }
    }
}

#[async_trait]
impl CollectionStore for PgStore {
    async fn create_collection(&self, new: NewCollection) -> Result<CollectionRef, StoreError> {
        let row = collections::create_collection(
            &self.pool,
            new.project_id,
            &new.name,
            &new.collection_type,
            &new.metadata,
        )
        .await?;
        tracing::debug!(
            collection_id = row.id,
            project_id = row.project_id,
            "collection created"
        );
        Ok(row.into())
    }

    async fn get_collection(&self, collection_id: i64) -> Result<Option<CollectionRef>, StoreError> {
        Ok(collections::get_collection(&self.pool, collection_id)
            .await?
            .map(CollectionRef::from))
    }

    async fn append_items(&self, collection_id: i64, items: &[NewItem]) -> Result<u64, StoreError> {
        match collections::append_collection_items(&self.pool, collection_id, items).await {
            Ok(n) => Ok(n),
            Err(DbError::NotFound) => Err(StoreError::CollectionNotFound(collection_id)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ProjectDirectory for PgStore {
    async fn find_project(&self, project_id: i64) -> Result<Option<ProjectRef>, StoreError> {
        Ok(projects::get_project(&self.pool, project_id)
            .await?
            .map(ProjectRef::from))
    }
}
