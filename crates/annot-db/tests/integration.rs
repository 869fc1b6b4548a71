//! Offline unit tests for annot-db pool configuration and row types.
//! These tests do not require a live database connection.

use annot_core::{AppConfig, CollectionRef, Environment, ImportConfig, ProjectRef};
use annot_db::{CollectionItemRow, CollectionRow, PgStore, PoolConfig, ProjectRow};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

#[test]
fn pool_config_from_app_config_uses_core_values() {
    let app_config = AppConfig {
        database_url: "postgres://example".to_string(),
        env: Environment::Test,
        bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
        log_level: "info".to_string(),
        db_max_connections: 42,
        db_min_connections: 7,
        db_acquire_timeout_secs: 9,
        import: ImportConfig::default(),
        upload_max_bytes: 1024,
    };

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

#[test]
fn collection_row_converts_to_domain_ref() {
    let row = CollectionRow {
        id: 11,
        project_id: 3,
        name: "Import 2026-01-01T00:00:00Z".to_string(),
        collection_type: "chat_rooms".to_string(),
        metadata: serde_json::json!({ "source_file": "chat.csv" }),
        created_at: chrono::Utc::now(),
    };

    let collection = CollectionRef::from(row);
    assert_eq!(collection.id, 11);
    assert_eq!(collection.project_id, 3);
    assert_eq!(collection.collection_type, "chat_rooms");
}

#[test]
fn project_row_converts_to_domain_ref() {
    let row = ProjectRow {
        id: 5,
        name: "Disentangle".to_string(),
        project_type: "chat_disentanglement".to_string(),
        created_at: chrono::Utc::now(),
    };

    let project = ProjectRef::from(row);
    assert_eq!(
        project,
        ProjectRef {
            id: 5,
            name: "Disentangle".to_string(),
            project_type: "chat_disentanglement".to_string(),
        }
    );
}

/// Compile-time smoke test: confirm that [`CollectionItemRow`] has all
/// expected fields with the correct types. No database required.
#[test]
fn collection_item_row_has_expected_fields() {
    let row = CollectionItemRow {
        id: 1,
        collection_id: 11,
        ordinal: 1,
        content: "hello".to_string(),
        metadata: serde_json::json!({ "user_id": "alice" }),
        created_at: chrono::Utc::now(),
    };

    assert_eq!(row.ordinal, 1);
    assert_eq!(row.metadata["user_id"], "alice");
}

#[tokio::test]
async fn pg_store_wraps_a_lazy_pool() {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy("postgres://localhost/annot_test")
        .expect("lazy pool");
    let store = PgStore::new(pool);
    assert_eq!(store.pool().size(), 0);
}
