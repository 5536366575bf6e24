use hemotrack_core::error::PipelineError;
use hemotrack_core::model::{BloodType, InventoryValue};
use hemotrack_core::traits::{ExtractedEntry, ParsedBatch, SourceAdapter};
use scraper::Html;

use super::{level_from_keywords, selector};

/// Kraków center: `<table class="blood-inventory">` with one row per
/// group. First cell is the group, second the level text, and an
/// optional third cell carries the unit count.
pub struct KrakowAdapter;

impl SourceAdapter for KrakowAdapter {
    fn name(&self) -> &'static str {
        "krakow"
    }

    fn extract(&self, content: &str) -> Result<ParsedBatch, PipelineError> {
        let doc = Html::parse_document(content);

        let table = doc
            .select(&selector("table.blood-inventory"))
            .next()
            .ok_or_else(|| PipelineError::SchemaMismatch {
                adapter: "krakow".into(),
                message: "table.blood-inventory not found".into(),
            })?;

        let cell_selector = selector("td");
        let mut batch = ParsedBatch::default();
        for row in table.select(&selector("tr")) {
            let cells: Vec<String> = row
                .select(&cell_selector)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            // Header rows use <th> and yield no cells.
            if cells.len() < 2 {
                continue;
            }

            match parse_row(&cells) {
                Some((blood_type, value)) => batch.entries.push(ExtractedEntry {
                    entity_key: blood_type.entity_key().to_string(),
                    value,
                    raw: cells.join(" | "),
                }),
                None => {
                    tracing::warn!(
                        adapter = "krakow",
                        row = %cells.join(" | "),
                        "Skipping unparseable row"
                    );
                    batch.malformed += 1;
                }
            }
        }
        Ok(batch)
    }
}

fn parse_row(cells: &[String]) -> Option<(BloodType, InventoryValue)> {
    let blood_type = BloodType::from_markup(&cells[0]).ok()?;
    let level = level_from_keywords(&cells[1])?;
    // A third cell, when present, must be a unit count.
    let quantity = match cells.get(2) {
        Some(cell) if !cell.is_empty() => Some(cell.parse::<i32>().ok()?),
        _ => None,
    };
    Some((blood_type, InventoryValue { level, quantity }))
}
