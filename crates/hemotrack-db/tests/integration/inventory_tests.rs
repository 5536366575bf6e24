use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

use hemotrack_core::error::PipelineError;
use hemotrack_core::model::{InventoryObservation, InventoryValue, StockLevel};
use hemotrack_core::traits::InventoryStore;
use hemotrack_db::InventoryRepository;

use crate::integration::common::setup_test_db;

const SOURCE: &str = "rckik-test";

fn obs(key: &str, level: StockLevel, quantity: Option<i32>) -> InventoryObservation {
    InventoryObservation {
        source_id: SOURCE.into(),
        entity_key: key.into(),
        value: InventoryValue { level, quantity },
        observed_at: Utc::now(),
        raw: format!("{key} {level}"),
    }
}

#[tokio::test]
async fn first_run_inserts_and_reads_back() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool);

    let now = Utc::now();
    let batch = [
        obs("A+", StockLevel::Low, None),
        obs("B+", StockLevel::High, Some(12)),
    ];
    let counts = repo.reconcile(SOURCE, &batch, now).await.unwrap();

    assert_eq!(counts.inserted, 2);
    assert_eq!(counts.updated, 0);
    assert_eq!(counts.deactivated, 0);

    let records = repo.active_records(SOURCE).await.unwrap();
    assert_eq!(records.len(), 2);
    // Ordered by entity key.
    assert_eq!(records[0].entity_key, "A+");
    assert_eq!(records[0].value.level, StockLevel::Low);
    assert_eq!(records[1].entity_key, "B+");
    assert_eq!(records[1].value.quantity, Some(12));
    assert!(records.iter().all(|r| r.active));
    assert!(
        records
            .iter()
            .all(|r| r.last_changed_at == r.last_observed_at)
    );
}

#[tokio::test]
async fn identical_rerun_touches_without_change() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool);

    let first = Utc::now();
    let batch = [obs("A+", StockLevel::Low, None)];
    repo.reconcile(SOURCE, &batch, first).await.unwrap();
    let before = repo.active_records(SOURCE).await.unwrap();

    let counts = repo
        .reconcile(SOURCE, &batch, first + Duration::seconds(60))
        .await
        .unwrap();

    assert_eq!(counts.inserted, 0);
    assert_eq!(counts.updated, 0);
    assert_eq!(counts.deactivated, 0);

    let after = repo.active_records(SOURCE).await.unwrap();
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].last_changed_at, before[0].last_changed_at);
    assert!(after[0].last_observed_at > before[0].last_observed_at);
}

#[tokio::test]
async fn changed_value_updates_in_place() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool);

    let first = Utc::now();
    repo.reconcile(SOURCE, &[obs("A+", StockLevel::Low, None)], first)
        .await
        .unwrap();
    let before = repo.active_records(SOURCE).await.unwrap();

    let counts = repo
        .reconcile(
            SOURCE,
            &[obs("A+", StockLevel::High, Some(3))],
            first + Duration::seconds(60),
        )
        .await
        .unwrap();

    assert_eq!(counts.inserted, 0);
    assert_eq!(counts.updated, 1);

    let after = repo.active_records(SOURCE).await.unwrap();
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].value.level, StockLevel::High);
    assert_eq!(after[0].value.quantity, Some(3));
    assert!(after[0].last_changed_at > before[0].last_changed_at);
    assert_eq!(after[0].last_changed_at, after[0].last_observed_at);
}

#[tokio::test]
async fn missing_key_deactivates_and_reappearance_inserts_fresh_row() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool.clone());

    let first = Utc::now();
    let full = [
        obs("A+", StockLevel::Low, None),
        obs("B+", StockLevel::High, None),
    ];
    repo.reconcile(SOURCE, &full, first).await.unwrap();
    let original_b = repo.active_records(SOURCE).await.unwrap()[1].id;

    // B+ disappears from the scrape.
    let counts = repo
        .reconcile(
            SOURCE,
            &[obs("A+", StockLevel::Low, None)],
            first + Duration::seconds(60),
        )
        .await
        .unwrap();
    assert_eq!(counts.deactivated, 1);

    let records = repo.active_records(SOURCE).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entity_key, "A+");

    // The deactivated row is kept, not deleted.
    let inactive: bool = sqlx::query_scalar(
        "SELECT active FROM inventory_records WHERE id = $1",
    )
    .bind(original_b)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(!inactive);

    // Reappearance starts a fresh lineage under a new id.
    let counts = repo
        .reconcile(SOURCE, &full, first + Duration::seconds(120))
        .await
        .unwrap();
    assert_eq!(counts.inserted, 1);

    let records = repo.active_records(SOURCE).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_ne!(records[1].id, original_b);

    let b_rows: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM inventory_records WHERE source_id = $1 AND entity_key = 'B+'",
    )
    .bind(SOURCE)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(b_rows, 2);
}

#[tokio::test]
async fn active_unique_index_rejects_second_active_row() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool.clone());

    let now = Utc::now();
    repo.reconcile(SOURCE, &[obs("A+", StockLevel::Low, None)], now)
        .await
        .unwrap();

    let insert = r#"
        INSERT INTO inventory_records
            (source_id, entity_key, stock_level, quantity, raw,
             last_observed_at, last_changed_at, active)
        VALUES ($1, 'A+', 'high', NULL, 'A+ high', $2, $2, TRUE)
    "#;

    let err = sqlx::query(insert)
        .bind(SOURCE)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap_err();
    assert!(err.as_database_error().unwrap().is_unique_violation());

    // Once the existing row is inactive, the same key is free again.
    sqlx::query("UPDATE inventory_records SET active = FALSE WHERE source_id = $1")
        .bind(SOURCE)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(insert)
        .bind(SOURCE)
        .bind(now)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn conflicting_insert_rolls_back_whole_batch() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool.clone());

    let first = Utc::now();
    repo.reconcile(SOURCE, &[obs("AB+", StockLevel::Low, None)], first)
        .await
        .unwrap();

    // A concurrent writer claims A+ after the reconcile snapshot is taken;
    // it commits while the batch insert is waiting on the unique index.
    let mut tx = pool.begin().await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO inventory_records
            (source_id, entity_key, stock_level, quantity, raw,
             last_observed_at, last_changed_at, active)
        VALUES ($1, 'A+', 'high', NULL, 'A+ high', $2, $2, TRUE)
        "#,
    )
    .bind(SOURCE)
    .bind(first)
    .execute(&mut *tx)
    .await
    .unwrap();
    let committer = tokio::spawn(async move {
        tokio::time::sleep(StdDuration::from_millis(800)).await;
        tx.commit().await.unwrap();
    });

    let batch = [
        obs("AB+", StockLevel::High, None),
        obs("A+", StockLevel::Medium, None),
    ];
    let err = repo
        .reconcile(SOURCE, &batch, first + Duration::seconds(60))
        .await
        .unwrap_err();
    committer.await.unwrap();

    assert!(matches!(err, PipelineError::ConstraintViolation(_)));

    // The AB+ change ran earlier in the same transaction and must have
    // rolled back with it.
    let records = repo.active_records(SOURCE).await.unwrap();
    let ab = records.iter().find(|r| r.entity_key == "AB+").unwrap();
    assert_eq!(ab.value.level, StockLevel::Low);
}

#[tokio::test]
async fn corrupt_stock_level_surfaces_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = InventoryRepository::new(pool.clone());

    let now = Utc::now();
    repo.reconcile(SOURCE, &[obs("A+", StockLevel::Low, None)], now)
        .await
        .unwrap();

    sqlx::query("UPDATE inventory_records SET stock_level = 'purple' WHERE source_id = $1")
        .bind(SOURCE)
        .execute(&pool)
        .await
        .unwrap();

    let err = repo.active_records(SOURCE).await.unwrap_err();
    assert!(matches!(err, PipelineError::TransactionFailed(_)));

    // The reconcile snapshot hits the same row and must refuse to diff
    // against a fabricated level.
    let err = repo
        .reconcile(
            SOURCE,
            &[obs("A+", StockLevel::Low, None)],
            now + Duration::seconds(60),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::TransactionFailed(_)));
}
