use hemotrack_core::error::PipelineError;
use hemotrack_core::model::{BloodType, InventoryValue};
use hemotrack_core::traits::{ExtractedEntry, ParsedBatch, SourceAdapter};
use scraper::Html;

use super::{level_from_keywords, selector};

/// Rzeszów center: `<div class="blood-inventory">` holding a `<ul>` with
/// one `<li>` per blood group. The group is in the item text
/// (e.g. "0 RhD+"), the level in the item's CSS class.
pub struct RzeszowAdapter;

impl SourceAdapter for RzeszowAdapter {
    fn name(&self) -> &'static str {
        "rzeszow"
    }

    fn extract(&self, content: &str) -> Result<ParsedBatch, PipelineError> {
        let doc = Html::parse_document(content);

        let section = doc
            .select(&selector("div.blood-inventory"))
            .next()
            .ok_or_else(|| PipelineError::SchemaMismatch {
                adapter: "rzeszow".into(),
                message: "div.blood-inventory not found".into(),
            })?;

        let mut batch = ParsedBatch::default();
        for item in section.select(&selector("ul li")) {
            let text = item.text().collect::<String>().trim().to_string();
            let class = item.value().attr("class").unwrap_or("");

            match parse_item(&text, class) {
                Some((blood_type, value)) => batch.entries.push(ExtractedEntry {
                    entity_key: blood_type.entity_key().to_string(),
                    value,
                    raw: format!("{text} [{class}]"),
                }),
                None => {
                    tracing::warn!(adapter = "rzeszow", row = %text, "Skipping unparseable row");
                    batch.malformed += 1;
                }
            }
        }
        Ok(batch)
    }
}

/// The item text carries the group, sometimes with trailing labels; the
/// first token plus the RhD sign is authoritative.
fn parse_item(text: &str, class: &str) -> Option<(BloodType, InventoryValue)> {
    let first = text.split_whitespace().next()?;
    let blood_type = BloodType::from_markup(first).ok().or_else(|| {
        let sign = if text.contains("RhD-") || text.contains("Rh-") {
            '-'
        } else {
            '+'
        };
        BloodType::from_markup(&format!("{first}{sign}")).ok()
    })?;
    let level = level_from_keywords(class)?;
    Some((blood_type, InventoryValue::level(level)))
}
