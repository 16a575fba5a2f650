//! Integration tests for the SQLite connection pool
//!
//! Each test works on its own temporary database file.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use traffic_pool::{DatabasePool, PoolConfig, PoolError, PoolState};

async fn setup(max_connections: usize) -> (TempDir, DatabasePool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pool.db");
    let pool = DatabasePool::new(
        path.to_string_lossy(),
        PoolConfig {
            min_connections: 1,
            max_connections,
            timeout: Duration::from_secs(2),
            ..Default::default()
        },
    );
    pool.initialize().await.unwrap();
    pool.execute_batch(
        "CREATE TABLE IF NOT EXISTS studies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL,
            modality TEXT NOT NULL,
            meta TEXT
        );",
    )
    .await
    .unwrap();
    (dir, pool)
}

#[tokio::test]
async fn test_crud_cycle() {
    let (_dir, pool) = setup(2).await;

    pool.execute(
        "INSERT INTO studies (patient_id, modality, meta) VALUES (?1, ?2, ?3)",
        &[json!(42), json!("CT"), json!({"slices": 120})],
    )
    .await
    .unwrap();

    let row = pool
        .fetch_one("SELECT patient_id, modality, meta FROM studies WHERE patient_id = ?1", &[json!(42)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["modality"], "CT");
    assert_eq!(row["meta"], r#"{"slices":120}"#);

    let updated = pool
        .execute("UPDATE studies SET modality = ?1 WHERE patient_id = ?2", &[json!("MR"), json!(42)])
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = pool
        .execute("DELETE FROM studies WHERE patient_id = ?1", &[json!(42)])
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(
        pool.fetch_value("SELECT COUNT(*) FROM studies", &[]).await.unwrap(),
        Some(json!(0))
    );
}

#[tokio::test]
async fn test_concurrent_writers_share_bounded_pool() {
    let (_dir, pool) = setup(3).await;

    let inserts = (0..20).map(|i| {
        let pool = &pool;
        async move {
            pool.execute(
                "INSERT INTO studies (patient_id, modality) VALUES (?1, ?2)",
                &[json!(i), json!("XR")],
            )
            .await
        }
    });
    let results = futures::future::join_all(inserts).await;
    assert!(results.iter().all(|r| r.is_ok()));

    let stats = pool.stats();
    assert!(stats.size <= 3);
    assert_eq!(stats.checked_out, 0);

    let rows = pool
        .fetch("SELECT patient_id FROM studies ORDER BY patient_id", &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 20);
    assert_eq!(rows[19]["patient_id"], 19);
}

#[tokio::test]
async fn test_bad_sql_is_query_error() {
    let (_dir, pool) = setup(1).await;
    let result = pool.execute("INSERT INTO nowhere VALUES (1)", &[]).await;
    assert!(matches!(result, Err(PoolError::Query(_))));

    // the lease came back despite the error
    assert_eq!(pool.fetch_value("SELECT 1", &[]).await.unwrap(), Some(json!(1)));
}

#[tokio::test]
async fn test_close_all() {
    let (_dir, pool) = setup(2).await;
    pool.close_all().await;

    let stats = pool.stats();
    assert_eq!(stats.state, PoolState::Closed);
    assert_eq!(stats.available, 0);
    assert_eq!(
        pool.fetch("SELECT 1", &[]).await,
        Err(PoolError::Closed)
    );
}
