use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use hemotrack_core::error::PipelineError;
use hemotrack_core::run::{RunCounts, RunOutcome, RunResult};
use hemotrack_core::traits::RunLedger;

/// PostgreSQL-backed run ledger. Append-only: rows are inserted once and
/// never updated.
#[derive(Clone)]
pub struct RunRepository {
    pool: Pool<Postgres>,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RunResultRow {
    id: Uuid,
    source_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcome: String,
    observed: i32,
    inserted: i32,
    updated: i32,
    deactivated: i32,
    malformed: i32,
    error_message: Option<String>,
}

impl TryFrom<RunResultRow> for RunResult {
    type Error = PipelineError;

    fn try_from(row: RunResultRow) -> Result<Self, Self::Error> {
        // The CHECK constraint guards new writes; a value outside it means
        // the ledger row is corrupt, so surface the error rather than
        // reporting a fabricated outcome.
        let outcome: RunOutcome = row.outcome.parse().map_err(|e: String| {
            PipelineError::TransactionFailed(format!("corrupt outcome in run {}: {e}", row.id))
        })?;

        Ok(RunResult {
            id: row.id,
            source_id: row.source_id,
            started_at: row.started_at,
            finished_at: row.finished_at,
            outcome,
            counts: RunCounts {
                observed: row.observed as u32,
                inserted: row.inserted as u32,
                updated: row.updated as u32,
                deactivated: row.deactivated as u32,
                malformed: row.malformed as u32,
            },
            error: row.error_message,
        })
    }
}

impl RunLedger for RunRepository {
    async fn record(&self, result: &RunResult) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO run_results
                (id, source_id, started_at, finished_at, outcome,
                 observed, inserted, updated, deactivated, malformed, error_message)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(result.id)
        .bind(&result.source_id)
        .bind(result.started_at)
        .bind(result.finished_at)
        .bind(result.outcome.as_str())
        .bind(result.counts.observed as i32)
        .bind(result.counts.inserted as i32)
        .bind(result.counts.updated as i32)
        .bind(result.counts.deactivated as i32)
        .bind(result.counts.malformed as i32)
        .bind(&result.error)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::TransactionFailed(e.to_string()))?;

        Ok(())
    }

    async fn last_successful(&self, source_id: &str) -> Result<Option<RunResult>, PipelineError> {
        let row = sqlx::query_as::<_, RunResultRow>(
            r#"
            SELECT id, source_id, started_at, finished_at, outcome,
                   observed, inserted, updated, deactivated, malformed, error_message
            FROM run_results
            WHERE source_id = $1 AND outcome IN ('success', 'partial')
            ORDER BY finished_at DESC
            LIMIT 1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::TransactionFailed(e.to_string()))?;

        row.map(RunResult::try_from).transpose()
    }

    async fn history(
        &self,
        source_id: &str,
        limit: usize,
    ) -> Result<Vec<RunResult>, PipelineError> {
        let rows = sqlx::query_as::<_, RunResultRow>(
            r#"
            SELECT id, source_id, started_at, finished_at, outcome,
                   observed, inserted, updated, deactivated, malformed, error_message
            FROM run_results
            WHERE source_id = $1
            ORDER BY finished_at DESC
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::TransactionFailed(e.to_string()))?;

        rows.into_iter().map(RunResult::try_from).collect()
    }
}
