use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final classification of one fetch→parse→reconcile run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Batch persisted, no parse or fetch errors.
    Success,
    /// Batch persisted but some individual entries were malformed and skipped.
    Partial,
    /// Fetch failed, parse failed wholesale, or the transaction rolled back.
    Failure,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Partial => "partial",
            RunOutcome::Failure => "failure",
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, RunOutcome::Success | RunOutcome::Partial)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "success" => Ok(RunOutcome::Success),
            "partial" => Ok(RunOutcome::Partial),
            "failure" => Ok(RunOutcome::Failure),
            _ => Err(format!("Unknown run outcome: {s}")),
        }
    }
}

/// Reconciliation counters reported per run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Observations in the normalized batch.
    pub observed: u32,
    /// New records inserted (entity keys never seen active before).
    pub inserted: u32,
    /// Records whose value changed.
    pub updated: u32,
    /// Active records the source stopped reporting.
    pub deactivated: u32,
    /// Entries skipped during parsing because they could not be normalized.
    pub malformed: u32,
}

/// Ledger entry for one job execution. Append-only: never mutated after
/// the run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub counts: RunCounts,
    pub error: Option<String>,
}

impl RunResult {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
