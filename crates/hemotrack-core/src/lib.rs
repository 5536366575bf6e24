pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod run;
pub mod scheduler;
#[cfg(test)]
pub mod testutil;
pub mod traits;

pub use config::{Cadence, Source, SourcesConfig};
pub use error::{FetchKind, PipelineError};
pub use model::{
    BloodType, InventoryObservation, InventoryRecord, InventoryValue, StockLevel, compute_hash,
};
pub use pipeline::ScrapePipeline;
pub use report::{RunEvent, RunReporter, TracingRunReporter};
pub use run::{RunCounts, RunOutcome, RunResult};
pub use scheduler::{Scheduler, SchedulerConfig, TriggerOutcome};
pub use traits::{
    AdapterRegistry, FetchedPage, Fetcher, InventoryStore, RunLedger, SourceAdapter, SourceRunner,
};
