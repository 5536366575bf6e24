use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::Source;
use crate::error::PipelineError;
use crate::model::{InventoryObservation, compute_hash};
use crate::report::{RunEvent, RunReporter};
use crate::run::{RunCounts, RunOutcome, RunResult};
use crate::traits::{
    AdapterRegistry, FetchedPage, Fetcher, InventoryStore, ParsedBatch, RunLedger, SourceRunner,
};

/// Orchestrates the full run for one source: fetch → parse → reconcile →
/// ledger.
///
/// Generic over the external dependencies via traits, enabling dependency
/// injection and testability without real HTTP or a database. Failure at
/// any stage is caught, classified, and recorded — a run never aborts the
/// schedules of other sources.
pub struct ScrapePipeline<F, S, L, R>
where
    F: Fetcher,
    S: InventoryStore,
    L: RunLedger,
    R: RunReporter,
{
    fetcher: F,
    adapters: AdapterRegistry,
    store: S,
    ledger: L,
    reporter: Arc<R>,
}

impl<F, S, L, R> Clone for ScrapePipeline<F, S, L, R>
where
    F: Fetcher,
    S: InventoryStore,
    L: RunLedger,
    R: RunReporter,
{
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            adapters: self.adapters.clone(),
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            reporter: Arc::clone(&self.reporter),
        }
    }
}

impl<F, S, L, R> ScrapePipeline<F, S, L, R>
where
    F: Fetcher,
    S: InventoryStore,
    L: RunLedger,
    R: RunReporter,
{
    pub fn new(
        fetcher: F,
        adapters: AdapterRegistry,
        store: S,
        ledger: L,
        reporter: Arc<R>,
    ) -> Self {
        Self {
            fetcher,
            adapters,
            store,
            ledger,
            reporter,
        }
    }

    /// Run one source end to end and return the finalized ledger entry.
    ///
    /// The entry is always written to the ledger, failure outcomes
    /// included, so operators can see gaps.
    pub async fn execute(&self, source: &Source) -> RunResult {
        let started_at = Utc::now();
        self.reporter.report(RunEvent::RunStarted {
            source_id: &source.id,
        });

        let (outcome, counts, error) = match self.stages(source).await {
            Ok(counts) => {
                let outcome = if counts.malformed > 0 {
                    RunOutcome::Partial
                } else {
                    RunOutcome::Success
                };
                (outcome, counts, None)
            }
            Err(e) => {
                tracing::warn!(source_id = %source.id, error = %e, "Run failed");
                (RunOutcome::Failure, RunCounts::default(), Some(e.to_string()))
            }
        };

        let result = RunResult {
            id: Uuid::new_v4(),
            source_id: source.id.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            counts,
            error,
        };

        if let Err(e) = self.ledger.record(&result).await {
            tracing::error!(source_id = %source.id, error = %e, "Failed to record run result");
        }
        self.reporter
            .report(RunEvent::RunCompleted { result: &result });

        result
    }

    async fn stages(&self, source: &Source) -> Result<RunCounts, PipelineError> {
        let page: FetchedPage = self.fetcher.fetch(source).await?;
        tracing::debug!(
            source_id = %source.id,
            bytes = page.body.len(),
            content_hash = %&compute_hash(&page.body)[..8],
            "Page fetched"
        );

        let adapter = self
            .adapters
            .get(&source.adapter)
            .ok_or_else(|| PipelineError::UnknownAdapter(source.adapter.clone()))?;

        // Pure extraction — markup-shape failures surface here, distinct
        // from the network failures above.
        let parsed: ParsedBatch = adapter.extract(&page.body)?;
        let observations = normalize(source, &parsed, page.fetched_at);

        let mut counts = self
            .store
            .reconcile(&source.id, &observations, page.fetched_at)
            .await?;
        counts.observed = observations.len() as u32;
        counts.malformed = parsed.malformed;
        Ok(counts)
    }
}

/// Attach source id and the batch's shared observed-at to extracted
/// entries.
fn normalize(
    source: &Source,
    parsed: &ParsedBatch,
    fetched_at: chrono::DateTime<Utc>,
) -> Vec<InventoryObservation> {
    parsed
        .entries
        .iter()
        .map(|entry| InventoryObservation {
            source_id: source.id.clone(),
            entity_key: entry.entity_key.clone(),
            value: entry.value,
            observed_at: fetched_at,
            raw: entry.raw.clone(),
        })
        .collect()
}

impl<F, S, L, R> SourceRunner for ScrapePipeline<F, S, L, R>
where
    F: Fetcher + 'static,
    S: InventoryStore + 'static,
    L: RunLedger + 'static,
    R: RunReporter + 'static,
{
    async fn run(&self, source: &Source) {
        let _ = self.execute(source).await;
    }
}
