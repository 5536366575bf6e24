use std::time::Duration;

use crate::run::RunResult;

/// Events emitted by the scheduler and pipeline for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    Scheduled {
        source_id: &'a str,
        cadence: Duration,
    },
    Rescheduled {
        source_id: &'a str,
        cadence: Duration,
    },
    Removed {
        source_id: &'a str,
    },
    Paused {
        source_id: &'a str,
    },
    Resumed {
        source_id: &'a str,
    },
    /// A trigger fired while a run for the same source was still in
    /// flight. Informational, never an operator alert by itself.
    SkippedOverlap {
        source_id: &'a str,
    },
    RunStarted {
        source_id: &'a str,
    },
    /// The run's finalized ledger entry — the structured operational
    /// signal carrying source id, outcome, duration, and counts.
    RunCompleted {
        result: &'a RunResult,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait RunReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::Scheduled { source_id, cadence } => {
                tracing::info!(%source_id, cadence_secs = cadence.as_secs(), "Source scheduled");
            }
            RunEvent::Rescheduled { source_id, cadence } => {
                tracing::info!(%source_id, cadence_secs = cadence.as_secs(), "Source rescheduled");
            }
            RunEvent::Removed { source_id } => {
                tracing::info!(%source_id, "Source removed from schedule");
            }
            RunEvent::Paused { source_id } => {
                tracing::info!(%source_id, "Source paused");
            }
            RunEvent::Resumed { source_id } => {
                tracing::info!(%source_id, "Source resumed");
            }
            RunEvent::SkippedOverlap { source_id } => {
                tracing::info!(%source_id, "skipped: overlap");
            }
            RunEvent::RunStarted { source_id } => {
                tracing::info!(%source_id, "Run started");
            }
            RunEvent::RunCompleted { result } => {
                tracing::info!(
                    source_id = %result.source_id,
                    outcome = %result.outcome,
                    duration_ms = result.duration_ms(),
                    observed = result.counts.observed,
                    inserted = result.counts.inserted,
                    updated = result.counts.updated,
                    deactivated = result.counts.deactivated,
                    malformed = result.counts.malformed,
                    error = result.error.as_deref().unwrap_or(""),
                    "Run completed"
                );
            }
        }
    }
}
