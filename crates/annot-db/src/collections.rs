//! Database operations for `collections` and `collection_items`.

use annot_core::NewItem;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `collections` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionRow {
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub collection_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A row from the `collection_items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionItemRow {
    pub id: i64,
    pub collection_id: i64,
    /// 1-based data-row number in the imported file.
    pub ordinal: i64,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// collections operations
// ---------------------------------------------------------------------------

/// Inserts a new collection and returns it. Names are not unique.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_collection(
    pool: &PgPool,
    project_id: i64,
    name: &str,
    collection_type: &str,
    metadata: &serde_json::Value,
) -> Result<CollectionRow, DbError> {
    let row = sqlx::query_as::<_, CollectionRow>(
        "INSERT INTO collections (project_id, name, collection_type, metadata) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, project_id, name, collection_type, metadata, created_at",
    )
    .bind(project_id)
    .bind(name)
    .bind(collection_type)
    .bind(metadata)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a collection by id, or `None` if it does not exist.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_collection(pool: &PgPool, id: i64) -> Result<Option<CollectionRow>, DbError> {
    let row = sqlx::query_as::<_, CollectionRow>(
        "SELECT id, project_id, name, collection_type, metadata, created_at \
         FROM collections \
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// collection_items operations
// ---------------------------------------------------------------------------

/// Appends `items` to a collection inside one transaction. Either every item
/// is written or none are.
///
/// Returns the number of rows inserted.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the collection does not exist,
/// [`DbError::OutOfRange`] for an ordinal past `i64::MAX`, or
/// [`DbError::Sqlx`] if any insert or the commit fails.
pub async fn append_collection_items(
    pool: &PgPool,
    collection_id: i64,
    items: &[NewItem],
) -> Result<u64, DbError> {
    let mut tx = pool.begin().await?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM collections WHERE id = $1 FOR SHARE")
        .bind(collection_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(DbError::NotFound);
    }

    let mut inserted = 0_u64;
    for item in items {
        let result = sqlx::query(
            "INSERT INTO collection_items (collection_id, ordinal, content, metadata) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(collection_id)
        .bind(ordinal_param(item.ordinal)?)
        .bind(&item.content)
        .bind(Json(&item.metadata))
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

fn ordinal_param(ordinal: u64) -> Result<i64, DbError> {
    i64::try_from(ordinal).map_err(|_| DbError::OutOfRange(format!("ordinal {ordinal}")))
}
