use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use hemotrack_core::error::PipelineError;
use hemotrack_core::model::{InventoryObservation, InventoryRecord, InventoryValue, StockLevel};
use hemotrack_core::reconcile;
use hemotrack_core::run::RunCounts;
use hemotrack_core::traits::InventoryStore;

/// PostgreSQL-backed inventory store.
///
/// `reconcile` runs entirely inside one transaction: the active rows for
/// the source are locked with `FOR UPDATE`, the diff is computed by
/// [`reconcile::plan`], and all mutations commit together or not at all.
/// A partial unique index on `(source_id, entity_key) WHERE active`
/// enforces the one-active-row invariant at the schema level.
#[derive(Clone)]
pub struct InventoryRepository {
    pool: Pool<Postgres>,
}

impl InventoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct InventoryRecordRow {
    id: Uuid,
    source_id: String,
    entity_key: String,
    stock_level: String,
    quantity: Option<i32>,
    raw: String,
    last_observed_at: DateTime<Utc>,
    last_changed_at: DateTime<Utc>,
    active: bool,
}

impl TryFrom<InventoryRecordRow> for InventoryRecord {
    type Error = PipelineError;

    fn try_from(row: InventoryRecordRow) -> Result<Self, Self::Error> {
        // A stored level outside the known set means the row is corrupt;
        // feeding a default into change detection would fabricate a value.
        let level: StockLevel = row.stock_level.parse().map_err(|_| {
            PipelineError::TransactionFailed(format!(
                "corrupt stock_level {:?} in record {}",
                row.stock_level, row.id
            ))
        })?;

        Ok(InventoryRecord {
            id: row.id,
            source_id: row.source_id,
            entity_key: row.entity_key,
            value: InventoryValue {
                level,
                quantity: row.quantity,
            },
            raw: row.raw,
            last_observed_at: row.last_observed_at,
            last_changed_at: row.last_changed_at,
            active: row.active,
        })
    }
}

fn map_db_err(e: sqlx::Error) -> PipelineError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            PipelineError::ConstraintViolation(db.to_string())
        }
        _ => PipelineError::TransactionFailed(e.to_string()),
    }
}

impl InventoryStore for InventoryRepository {
    async fn reconcile(
        &self,
        source_id: &str,
        observations: &[InventoryObservation],
        now: DateTime<Utc>,
    ) -> Result<RunCounts, PipelineError> {
        let mut tx = self.pool.begin().await.map_err(map_db_err)?;

        let rows = sqlx::query_as::<_, InventoryRecordRow>(
            r#"
            SELECT id, source_id, entity_key, stock_level, quantity, raw,
                   last_observed_at, last_changed_at, active
            FROM inventory_records
            WHERE source_id = $1 AND active
            FOR UPDATE
            "#,
        )
        .bind(source_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_err)?;

        let active: Vec<InventoryRecord> = rows
            .into_iter()
            .map(InventoryRecord::try_from)
            .collect::<Result<_, _>>()?;
        let plan = reconcile::plan(&active, observations, now);
        tracing::debug!(
            source_id,
            inserts = plan.inserts.len(),
            changes = plan.changes.len(),
            touches = plan.touches.len(),
            deactivations = plan.deactivations.len(),
            "Applying reconcile plan"
        );

        if !plan.touches.is_empty() {
            sqlx::query(
                r#"
                UPDATE inventory_records
                SET last_observed_at = $2
                WHERE id = ANY($1)
                "#,
            )
            .bind(&plan.touches)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        for change in &plan.changes {
            sqlx::query(
                r#"
                UPDATE inventory_records
                SET stock_level = $2, quantity = $3, raw = $4,
                    last_observed_at = $5, last_changed_at = $5
                WHERE id = $1
                "#,
            )
            .bind(change.record_id)
            .bind(change.value.level.as_str())
            .bind(change.value.quantity)
            .bind(&change.raw)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        if !plan.deactivations.is_empty() {
            sqlx::query(
                r#"
                UPDATE inventory_records
                SET active = FALSE
                WHERE id = ANY($1)
                "#,
            )
            .bind(&plan.deactivations)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        for insert in &plan.inserts {
            sqlx::query(
                r#"
                INSERT INTO inventory_records
                    (source_id, entity_key, stock_level, quantity, raw,
                     last_observed_at, last_changed_at, active)
                VALUES ($1, $2, $3, $4, $5, $6, $6, TRUE)
                "#,
            )
            .bind(source_id)
            .bind(&insert.entity_key)
            .bind(insert.value.level.as_str())
            .bind(insert.value.quantity)
            .bind(&insert.raw)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;
        }

        tx.commit().await.map_err(map_db_err)?;

        Ok(plan.counts())
    }

    async fn active_records(&self, source_id: &str) -> Result<Vec<InventoryRecord>, PipelineError> {
        let rows = sqlx::query_as::<_, InventoryRecordRow>(
            r#"
            SELECT id, source_id, entity_key, stock_level, quantity, raw,
                   last_observed_at, last_changed_at, active
            FROM inventory_records
            WHERE source_id = $1 AND active
            ORDER BY entity_key
            "#,
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_err)?;

        rows.into_iter().map(InventoryRecord::try_from).collect()
    }
}
