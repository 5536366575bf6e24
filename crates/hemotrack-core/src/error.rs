use std::fmt;

use thiserror::Error;

/// Whether a fetch failure is worth retrying within the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Network error, timeout, HTTP 5xx, or 429 — retried with backoff.
    Transient,
    /// Malformed URL or any other 4xx — never retried within a run.
    Permanent,
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Transient => write!(f, "transient"),
            FetchKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Pipeline-wide error types for hemotrack.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Network retrieval failed (after retries, for transient failures).
    #[error("fetch error ({kind}): {message}")]
    Fetch { kind: FetchKind, message: String },

    /// Page fetched but its structure does not match the adapter's
    /// extraction contract — the external site likely changed.
    #[error("schema mismatch in adapter '{adapter}': {message}")]
    SchemaMismatch { adapter: String, message: String },

    /// A single inventory entry could not be normalized. Recorded and
    /// skipped; never fails the whole batch by itself.
    #[error("malformed entry: {0}")]
    MalformedEntry(String),

    /// Transactional persistence failed; the whole batch was rolled back.
    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// A storage uniqueness or integrity constraint was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Source configuration entry is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// No source registered under the given identifier.
    #[error("unknown source: {0}")]
    UnknownSource(String),

    /// No adapter registered under the name a source is configured with.
    #[error("unknown adapter: {0}")]
    UnknownAdapter(String),
}

impl PipelineError {
    /// Convenience constructor for transient fetch failures.
    pub fn transient_fetch(message: impl Into<String>) -> Self {
        PipelineError::Fetch {
            kind: FetchKind::Transient,
            message: message.into(),
        }
    }

    /// Convenience constructor for permanent fetch failures.
    pub fn permanent_fetch(message: impl Into<String>) -> Self {
        PipelineError::Fetch {
            kind: FetchKind::Permanent,
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Fetch {
                kind: FetchKind::Transient,
                ..
            }
        )
    }
}
