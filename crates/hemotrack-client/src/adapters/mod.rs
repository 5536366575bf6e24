//! Site-specific extraction rules for the supported donation centers.
//!
//! One adapter per distinct markup shape. Adapters are pure: they map an
//! already-fetched page to a [`ParsedBatch`](hemotrack_core::traits::ParsedBatch)
//! and never perform I/O, so every one of them is tested against inline
//! HTML fixtures. A page whose expected structure is missing is a
//! schema mismatch; a recognized page with rows that fail to normalize
//! skips those rows and counts them as malformed.

use std::sync::Arc;

use hemotrack_core::model::StockLevel;
use hemotrack_core::traits::AdapterRegistry;
use scraper::Selector;

mod krakow;
mod rzeszow;
mod wroclaw;

pub use krakow::KrakowAdapter;
pub use rzeszow::RzeszowAdapter;
pub use wroclaw::WroclawAdapter;

/// Registry holding every built-in adapter.
pub fn builtin_adapters() -> AdapterRegistry {
    AdapterRegistry::new()
        .register(Arc::new(RzeszowAdapter))
        .register(Arc::new(KrakowAdapter))
        .register(Arc::new(WroclawAdapter))
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("static CSS selector is valid")
}

/// Map the level keywords the sites use (Polish and English) to a
/// [`StockLevel`]. `None` when no keyword matches; callers count the
/// row as malformed rather than guessing a default.
fn level_from_keywords(text: &str) -> Option<StockLevel> {
    let lower = text.to_lowercase();
    if lower.contains("niski") || lower.contains("low") || lower.contains("critical") {
        Some(StockLevel::Low)
    } else if lower.contains("średni") || lower.contains("sredni") || lower.contains("medium") {
        Some(StockLevel::Medium)
    } else if lower.contains("wysoki") || lower.contains("high") {
        Some(StockLevel::High)
    } else if lower.contains("optymalny")
        || lower.contains("optimal")
        || lower.contains("satisfactory")
    {
        Some(StockLevel::Satisfactory)
    } else {
        None
    }
}
