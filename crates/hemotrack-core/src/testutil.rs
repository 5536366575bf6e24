//! Test utilities: mock implementations of the pipeline seams.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability, allowing assertions on
//! recorded calls. `MemoryStore` is a faithful in-memory stand-in for the
//! transactional inventory store, including rollback-on-failure.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Source;
use crate::error::PipelineError;
use crate::model::{InventoryObservation, InventoryRecord, InventoryValue};
use crate::reconcile;
use crate::report::{RunEvent, RunReporter};
use crate::run::{RunCounts, RunResult};
use crate::traits::{
    ExtractedEntry, FetchedPage, Fetcher, InventoryStore, ParsedBatch, RunLedger, SourceAdapter,
    SourceRunner,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that returns a configurable queue of responses.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<Vec<Result<String, PipelineError>>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(body: &str) -> Self {
        Self::with_responses(vec![Ok(body.to_string())])
    }

    pub fn with_error(error: PipelineError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, PipelineError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, source: &Source) -> Result<FetchedPage, PipelineError> {
        self.calls.lock().unwrap().push(source.id.clone());
        let mut responses = self.responses.lock().unwrap();
        let body = if responses.is_empty() {
            Ok("<html><body>default</body></html>".to_string())
        } else {
            responses.remove(0)
        }?;
        Ok(FetchedPage {
            body,
            fetched_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockAdapter
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum AdapterBehavior {
    Batch(ParsedBatch),
    SchemaMismatch,
}

/// Mock adapter registered under the name "mock".
#[derive(Clone)]
pub struct MockAdapter {
    behavior: AdapterBehavior,
}

impl MockAdapter {
    pub fn with_entries(entries: Vec<ExtractedEntry>) -> Self {
        Self::with_batch(ParsedBatch {
            entries,
            malformed: 0,
        })
    }

    pub fn with_batch(batch: ParsedBatch) -> Self {
        Self {
            behavior: AdapterBehavior::Batch(batch),
        }
    }

    pub fn schema_mismatch() -> Self {
        Self {
            behavior: AdapterBehavior::SchemaMismatch,
        }
    }
}

impl SourceAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn extract(&self, _content: &str) -> Result<ParsedBatch, PipelineError> {
        match &self.behavior {
            AdapterBehavior::Batch(batch) => Ok(batch.clone()),
            AdapterBehavior::SchemaMismatch => Err(PipelineError::SchemaMismatch {
                adapter: "mock".into(),
                message: "structure not recognized".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory inventory store applying the shared reconcile plan under a
/// single lock, with optional injected write failure. A failed reconcile
/// leaves the stored state untouched, mirroring a rolled-back transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<InventoryRecord>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next reconcile call to fail without writing.
    pub fn fail_next_reconcile(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    /// Seed an active record, timestamps set to now.
    pub fn seed_active(&self, source_id: &str, entity_key: &str, value: InventoryValue) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.records.lock().unwrap().push(InventoryRecord {
            id,
            source_id: source_id.to_string(),
            entity_key: entity_key.to_string(),
            value,
            raw: entity_key.to_string(),
            last_observed_at: now,
            last_changed_at: now,
            active: true,
        });
        id
    }

    /// Active records for a source, ordered by entity key.
    pub fn active(&self, source_id: &str) -> Vec<InventoryRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.source_id == source_id && r.active)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
        records
    }

    /// All records for a source, active or not, ordered by entity key.
    pub fn all_records(&self, source_id: &str) -> Vec<InventoryRecord> {
        let mut records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.entity_key.cmp(&b.entity_key));
        records
    }
}

impl InventoryStore for MemoryStore {
    async fn reconcile(
        &self,
        source_id: &str,
        observations: &[InventoryObservation],
        now: DateTime<Utc>,
    ) -> Result<RunCounts, PipelineError> {
        {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail {
                *fail = false;
                return Err(PipelineError::TransactionFailed(
                    "injected write failure".into(),
                ));
            }
        }

        let mut records = self.records.lock().unwrap();
        let active: Vec<InventoryRecord> = records
            .iter()
            .filter(|r| r.source_id == source_id && r.active)
            .cloned()
            .collect();
        let plan = reconcile::plan(&active, observations, now);

        for id in &plan.touches {
            if let Some(record) = records.iter_mut().find(|r| r.id == *id) {
                record.last_observed_at = now;
            }
        }
        for change in &plan.changes {
            if let Some(record) = records.iter_mut().find(|r| r.id == change.record_id) {
                record.value = change.value;
                record.raw = change.raw.clone();
                record.last_observed_at = now;
                record.last_changed_at = now;
            }
        }
        for id in &plan.deactivations {
            if let Some(record) = records.iter_mut().find(|r| r.id == *id) {
                record.active = false;
            }
        }
        for insert in &plan.inserts {
            records.push(InventoryRecord {
                id: Uuid::new_v4(),
                source_id: source_id.to_string(),
                entity_key: insert.entity_key.clone(),
                value: insert.value,
                raw: insert.raw.clone(),
                last_observed_at: now,
                last_changed_at: now,
                active: true,
            });
        }

        Ok(plan.counts())
    }

    async fn active_records(&self, source_id: &str) -> Result<Vec<InventoryRecord>, PipelineError> {
        Ok(self.active(source_id))
    }
}

// ---------------------------------------------------------------------------
// MemoryLedger
// ---------------------------------------------------------------------------

/// In-memory append-only run ledger.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    results: Arc<Mutex<Vec<RunResult>>>,
    record_error: Arc<Mutex<Option<PipelineError>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record_error(error: PipelineError) -> Self {
        Self {
            results: Arc::new(Mutex::new(Vec::new())),
            record_error: Arc::new(Mutex::new(Some(error))),
        }
    }

    pub fn all(&self) -> Vec<RunResult> {
        self.results.lock().unwrap().clone()
    }
}

impl RunLedger for MemoryLedger {
    async fn record(&self, result: &RunResult) -> Result<(), PipelineError> {
        let mut err = self.record_error.lock().unwrap();
        if let Some(e) = err.take() {
            return Err(e);
        }
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }

    async fn last_successful(&self, source_id: &str) -> Result<Option<RunResult>, PipelineError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.source_id == source_id && r.outcome.is_persisted())
            .cloned())
    }

    async fn history(&self, source_id: &str, limit: usize) -> Result<Vec<RunResult>, PipelineError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.source_id == source_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

/// Mock source runner that records which sources it ran, with an optional
/// artificial delay for overlap tests.
#[derive(Clone)]
pub struct MockRunner {
    delay: Duration,
    runs: Arc<Mutex<Vec<String>>>,
}

impl MockRunner {
    pub fn instant() -> Self {
        Self::slow(Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn runs(&self) -> Vec<String> {
        self.runs.lock().unwrap().clone()
    }
}

impl SourceRunner for MockRunner {
    async fn run(&self, source: &Source) {
        self.runs.lock().unwrap().push(source.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock run reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    labels: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl RunReporter for MockReporter {
    fn report(&self, event: RunEvent<'_>) {
        let label = match &event {
            RunEvent::Scheduled { .. } => "Scheduled",
            RunEvent::Rescheduled { .. } => "Rescheduled",
            RunEvent::Removed { .. } => "Removed",
            RunEvent::Paused { .. } => "Paused",
            RunEvent::Resumed { .. } => "Resumed",
            RunEvent::SkippedOverlap { .. } => "SkippedOverlap",
            RunEvent::RunStarted { .. } => "RunStarted",
            RunEvent::RunCompleted { .. } => "RunCompleted",
        };
        self.labels.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A source wired to the "mock" adapter.
pub fn make_test_source() -> Source {
    make_test_source_with_id("src-test")
}

pub fn make_test_source_with_id(id: &str) -> Source {
    Source {
        id: id.to_string(),
        name: format!("Test source {id}"),
        adapter: "mock".to_string(),
        url: "https://example.com/inventory".to_string(),
        cadence: "1h".parse().expect("valid cadence"),
        timeout_secs: 5,
        max_retries: 2,
        min_fetch_interval_secs: 0,
        enabled: true,
    }
}
