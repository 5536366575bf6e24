use hemotrack_core::error::PipelineError;
use hemotrack_core::model::{BloodType, InventoryValue, StockLevel};
use hemotrack_core::traits::{ExtractedEntry, ParsedBatch, SourceAdapter};
use scraper::{ElementRef, Html};

use super::{level_from_keywords, selector};

/// Wrocław center: two sections (`div.blood-inventory-rhd-plus` and
/// `div.blood-inventory-rhd-minus`) holding one `div` per group, the
/// group letter in the CSS class and the level in a container image
/// (alt text, or the `pojemnik_1..4` filename as fallback).
pub struct WroclawAdapter;

impl SourceAdapter for WroclawAdapter {
    fn name(&self) -> &'static str {
        "wroclaw"
    }

    fn extract(&self, content: &str) -> Result<ParsedBatch, PipelineError> {
        let doc = Html::parse_document(content);

        let plus = selector("div.blood-inventory-rhd-plus div[class*=blood-group]");
        let minus = selector("div.blood-inventory-rhd-minus div[class*=blood-group]");
        let has_sections = doc
            .select(&selector("div.blood-inventory-rhd-plus, div.blood-inventory-rhd-minus"))
            .next()
            .is_some();
        if !has_sections {
            return Err(PipelineError::SchemaMismatch {
                adapter: "wroclaw".into(),
                message: "RhD sections not found".into(),
            });
        }

        let mut batch = ParsedBatch::default();
        for group in doc.select(&plus) {
            push_group(&mut batch, group, '+');
        }
        for group in doc.select(&minus) {
            push_group(&mut batch, group, '-');
        }
        Ok(batch)
    }
}

fn push_group(batch: &mut ParsedBatch, group: ElementRef<'_>, rhd: char) {
    let class = group.value().attr("class").unwrap_or("");
    match parse_group(group, class, rhd) {
        Some((blood_type, value, raw)) => batch.entries.push(ExtractedEntry {
            entity_key: blood_type.entity_key().to_string(),
            value,
            raw,
        }),
        None => {
            tracing::warn!(adapter = "wroclaw", %class, "Skipping unparseable group");
            batch.malformed += 1;
        }
    }
}

fn parse_group(
    group: ElementRef<'_>,
    class: &str,
    rhd: char,
) -> Option<(BloodType, InventoryValue, String)> {
    let letter = group_letter(class)?;
    let blood_type = BloodType::from_markup(&format!("{letter}{rhd}")).ok()?;

    let img = group.select(&selector("img")).next()?;
    let alt = img.value().attr("alt").unwrap_or("");
    let src = img.value().attr("src").unwrap_or("");
    let level = level_from_keywords(alt).or_else(|| level_from_filename(src))?;

    let raw = format!("{class} RhD{rhd} [{alt} {src}]");
    Some((blood_type, InventoryValue::level(level), raw))
}

// "ab" must be checked before "a" and "b".
fn group_letter(class: &str) -> Option<&'static str> {
    if class.contains("blood-group-ab") {
        Some("AB")
    } else if class.contains("blood-group-a") {
        Some("A")
    } else if class.contains("blood-group-b") {
        Some("B")
    } else if class.contains("blood-group-o") {
        Some("0")
    } else {
        None
    }
}

/// The container images encode the level in the filename:
/// pojemnik_1 is full, pojemnik_4 nearly empty.
fn level_from_filename(src: &str) -> Option<StockLevel> {
    if src.contains("pojemnik_1") {
        Some(StockLevel::High)
    } else if src.contains("pojemnik_2") {
        Some(StockLevel::Satisfactory)
    } else if src.contains("pojemnik_3") {
        Some(StockLevel::Medium)
    } else if src.contains("pojemnik_4") {
        Some(StockLevel::Low)
    } else {
        None
    }
}
