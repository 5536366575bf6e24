use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::PipelineError;

/// Blood group as reported by the source sites.
///
/// Polish donation centers render group 0 with a zero, so the canonical
/// entity key uses "0+" rather than "O+".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BloodType {
    APositive,
    ANegative,
    BPositive,
    BNegative,
    AbPositive,
    AbNegative,
    OPositive,
    ONegative,
}

impl BloodType {
    pub const ALL: [BloodType; 8] = [
        BloodType::APositive,
        BloodType::ANegative,
        BloodType::BPositive,
        BloodType::BNegative,
        BloodType::AbPositive,
        BloodType::AbNegative,
        BloodType::OPositive,
        BloodType::ONegative,
    ];

    /// Canonical entity key used for reconciliation.
    pub fn entity_key(&self) -> &'static str {
        match self {
            BloodType::APositive => "A+",
            BloodType::ANegative => "A-",
            BloodType::BPositive => "B+",
            BloodType::BNegative => "B-",
            BloodType::AbPositive => "AB+",
            BloodType::AbNegative => "AB-",
            BloodType::OPositive => "0+",
            BloodType::ONegative => "0-",
        }
    }

    /// Parse a blood type from site markup.
    ///
    /// Accepts the spellings seen in the wild: "0+", "0 RhD+", "A Rh-",
    /// case-insensitively and with arbitrary internal whitespace.
    pub fn from_markup(text: &str) -> Result<Self, PipelineError> {
        let normalized: String = text
            .to_uppercase()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let compact = normalized.replace("RHD", "").replace("RH", "");
        match compact.as_str() {
            "A+" => Ok(BloodType::APositive),
            "A-" => Ok(BloodType::ANegative),
            "B+" => Ok(BloodType::BPositive),
            "B-" => Ok(BloodType::BNegative),
            "AB+" => Ok(BloodType::AbPositive),
            "AB-" => Ok(BloodType::AbNegative),
            "0+" | "O+" => Ok(BloodType::OPositive),
            "0-" | "O-" => Ok(BloodType::ONegative),
            _ => Err(PipelineError::MalformedEntry(format!(
                "unknown blood type: {text}"
            ))),
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity_key())
    }
}

/// Inventory level reported by a source, ordered from scarcest to fullest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Low,
    Medium,
    Satisfactory,
    High,
}

impl StockLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockLevel::Low => "low",
            StockLevel::Medium => "medium",
            StockLevel::Satisfactory => "satisfactory",
            StockLevel::High => "high",
        }
    }

    /// Ordinal level, 1 (low) through 4 (high).
    pub fn ordinal(&self) -> u8 {
        match self {
            StockLevel::Low => 1,
            StockLevel::Medium => 2,
            StockLevel::Satisfactory => 3,
            StockLevel::High => 4,
        }
    }
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StockLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(StockLevel::Low),
            "medium" => Ok(StockLevel::Medium),
            "satisfactory" => Ok(StockLevel::Satisfactory),
            "high" => Ok(StockLevel::High),
            _ => Err(PipelineError::MalformedEntry(format!(
                "unknown stock level: {s}"
            ))),
        }
    }
}

/// The reported value for one entity key — the unit of change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryValue {
    pub level: StockLevel,
    /// Optional numeric quantity when the source exposes one.
    pub quantity: Option<i32>,
}

impl InventoryValue {
    pub fn level(level: StockLevel) -> Self {
        Self {
            level,
            quantity: None,
        }
    }
}

/// One normalized inventory fact extracted from a single scrape.
///
/// Ephemeral: lives only inside one run's batch until reconciled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryObservation {
    pub source_id: String,
    pub entity_key: String,
    pub value: InventoryValue,
    /// Shared across the whole batch: the fetcher's retrieval time.
    pub observed_at: DateTime<Utc>,
    /// Raw markup-derived snapshot retained for audit.
    pub raw: String,
}

/// The durable, reconciled current-state row per (source, entity key).
///
/// Invariant: at most one active record per (source_id, entity_key).
/// Mutated only by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: Uuid,
    pub source_id: String,
    pub entity_key: String,
    pub value: InventoryValue,
    pub raw: String,
    pub last_observed_at: DateTime<Utc>,
    pub last_changed_at: DateTime<Utc>,
    pub active: bool,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
///
/// Used for fetched-page audit logging.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
