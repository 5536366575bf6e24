//! Source configuration: the fixed list of external sites and their
//! scraping parameters.
//!
//! Loaded from a JSON file at startup and on reload. Malformed entries are
//! rejected per-entry (logged, entry skipped) rather than aborting the
//! whole load, so one bad source cannot take the pipeline down.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PipelineError;

/// Scrape cadence: a plain interval expression such as `"90s"`, `"15m"`,
/// or `"6h"`. Backfilled inventory data loses value quickly, so a missed
/// fire is never caught up — the next tick proceeds normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cadence(Duration);

impl Cadence {
    pub fn interval(&self) -> Duration {
        self.0
    }
}

impl FromStr for Cadence {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let unit = s.chars().last().ok_or_else(|| {
            PipelineError::Config("invalid cadence '': expected e.g. '30s', '15m', '6h'".into())
        })?;
        let digits = &s[..s.len() - unit.len_utf8()];
        let value: u64 = digits.parse().map_err(|_| {
            PipelineError::Config(format!("invalid cadence '{s}': expected e.g. '30s', '15m', '6h'"))
        })?;
        let secs = match unit {
            's' => value,
            'm' => value * 60,
            'h' => value * 3600,
            _ => {
                return Err(PipelineError::Config(format!(
                    "invalid cadence unit in '{s}': expected 's', 'm', or 'h'"
                )));
            }
        };
        if secs == 0 {
            return Err(PipelineError::Config(format!(
                "cadence '{s}' must be at least one second"
            )));
        }
        Ok(Cadence(Duration::from_secs(secs)))
    }
}

impl TryFrom<String> for Cadence {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Cadence> for String {
    fn from(c: Cadence) -> String {
        c.to_string()
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        if secs % 3600 == 0 {
            write!(f, "{}h", secs / 3600)
        } else if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_fetch_interval_secs() -> u64 {
    1
}

fn default_enabled() -> bool {
    true
}

/// One configured external site plus its scraping parameters.
/// Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    /// Unique identifier, e.g. "rckik-rzeszow".
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Name of the adapter that understands this site's markup.
    pub adapter: String,
    /// Inventory page URL.
    pub url: String,
    pub cadence: Cadence,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Minimum interval between consecutive requests to this source.
    #[serde(default = "default_min_fetch_interval_secs")]
    pub min_fetch_interval_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Source {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.min_fetch_interval_secs)
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.id.trim().is_empty() {
            return Err(PipelineError::Config("source id is empty".into()));
        }
        if self.adapter.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "source '{}' has no adapter",
                self.id
            )));
        }
        let url = Url::parse(&self.url)
            .map_err(|e| PipelineError::Config(format!("source '{}': bad url: {e}", self.id)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(PipelineError::Config(format!(
                "source '{}': unsupported url scheme '{scheme}'",
                self.id
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<serde_json::Value>,
}

/// Validated source set, as loaded from a configuration file.
#[derive(Debug, Clone, Default)]
pub struct SourcesConfig {
    sources: Vec<Source>,
}

impl SourcesConfig {
    /// Parse and validate a JSON document of the shape
    /// `{"sources": [{...}, ...]}`.
    ///
    /// Entries that fail to deserialize or validate are logged and dropped;
    /// duplicate ids keep the first occurrence.
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        let file: SourcesFile = serde_json::from_str(raw)
            .map_err(|e| PipelineError::Config(format!("invalid sources file: {e}")))?;

        let mut sources = Vec::new();
        let mut seen = HashSet::new();
        for (index, entry) in file.sources.into_iter().enumerate() {
            let source: Source = match serde_json::from_value(entry) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(%index, error = %e, "Rejected malformed source entry");
                    continue;
                }
            };
            if let Err(e) = source.validate() {
                tracing::warn!(source_id = %source.id, error = %e, "Rejected invalid source entry");
                continue;
            }
            if !seen.insert(source.id.clone()) {
                tracing::warn!(source_id = %source.id, "Rejected duplicate source id");
                continue;
            }
            sources.push(source);
        }

        Ok(Self { sources })
    }

    /// Load from a file path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read sources file {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, source_id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == source_id)
    }
}
