use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::Source;
use crate::error::PipelineError;
use crate::model::{InventoryObservation, InventoryRecord, InventoryValue};
use crate::run::{RunCounts, RunResult};

/// Raw page content as retrieved by a [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: String,
    /// Retrieval time — becomes the shared observed-at of the whole batch.
    pub fetched_at: DateTime<Utc>,
}

/// Retrieves the raw inventory page for a source.
///
/// Implementations own timeout, bounded retry with backoff for transient
/// failures, and the per-source rate gate. A permanent failure (4xx other
/// than 429, malformed URL) is returned without retrying.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        source: &Source,
    ) -> impl Future<Output = Result<FetchedPage, PipelineError>> + Send;
}

/// One inventory entry as extracted by an adapter, before normalization
/// attaches source id and observed-at.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntry {
    pub entity_key: String,
    pub value: InventoryValue,
    /// The markup fragment the entry came from, kept for audit.
    pub raw: String,
}

/// Result of one adapter extraction pass.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub entries: Vec<ExtractedEntry>,
    /// Rows present in the recognized structure that could not be
    /// normalized. Skipped, not fatal.
    pub malformed: u32,
}

/// Site-specific extraction rules: maps one site's markup to inventory
/// entries. One implementation per distinct markup shape, selected by
/// configuration at startup.
///
/// `extract` must be pure (no I/O) so it can be tested against captured
/// fixture content. A recognized page with no inventory rows is a valid
/// empty batch; an unrecognized structure is a
/// [`PipelineError::SchemaMismatch`].
pub trait SourceAdapter: Send + Sync {
    /// Registry name, e.g. "rzeszow".
    fn name(&self) -> &'static str;

    fn extract(&self, content: &str) -> Result<ParsedBatch, PipelineError>;
}

/// Adapter lookup by configured name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.name(), adapter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SourceAdapter>> {
        self.adapters.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.adapters.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.adapters.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Transactional persistence boundary for inventory records.
///
/// The only point where the core touches durable inventory state, so it is
/// substitutable for testing. `reconcile` must be atomic: on any error the
/// entire batch rolls back and no partial writes survive.
pub trait InventoryStore: Send + Sync + Clone {
    /// Diff a batch of observations against the currently active records
    /// for the source and apply inserts/updates/deactivations in a single
    /// transaction. Returns the mutation counts (`observed` and `malformed`
    /// are filled in by the caller).
    fn reconcile(
        &self,
        source_id: &str,
        observations: &[InventoryObservation],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<RunCounts, PipelineError>> + Send;

    /// Currently active records for a source, for operational tooling.
    fn active_records(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Vec<InventoryRecord>, PipelineError>> + Send;
}

/// Executes one full run for a source. The scheduler dispatches through
/// this seam so it can be tested without network or storage.
///
/// Implementations must not let errors escape: every run ends in a
/// recorded [`RunResult`], failures included.
pub trait SourceRunner: Send + Sync + Clone + 'static {
    fn run(&self, source: &Source) -> impl Future<Output = ()> + Send;
}

/// Durable, append-only record of job executions.
pub trait RunLedger: Send + Sync + Clone {
    /// Append a finished run. Never updates an existing entry.
    fn record(&self, result: &RunResult) -> impl Future<Output = Result<(), PipelineError>> + Send;

    /// Most recent successful run, used to detect stale sources.
    fn last_successful(
        &self,
        source_id: &str,
    ) -> impl Future<Output = Result<Option<RunResult>, PipelineError>> + Send;

    /// Run history for a source, newest first.
    fn history(
        &self,
        source_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RunResult>, PipelineError>> + Send;
}
