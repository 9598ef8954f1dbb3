//! Shapes raw scraped listings into a candidate [`Batch`].
//!
//! Scraped data is expected to be partly broken, so a bad entry is
//! skipped and counted; it never fails the batch.

use serde_json::Value;
use tracing::{debug, info};

use vacancy_core::config::NormalizeConfig;
use vacancy_core::{Batch, FieldValue, ListingId, ListingRecord};

use crate::source::RawBatch;

/// Why an entry was left out of the candidate batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    EmptyId,
    NonNumericId,
    /// Item of a list payload without a usable id field.
    MissingId,
    NotAnObject,
    MissingField(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::EmptyId => f.write_str("empty id"),
            SkipReason::NonNumericId => f.write_str("non-numeric id"),
            SkipReason::MissingId => f.write_str("missing id"),
            SkipReason::NotAnObject => f.write_str("record is not an object"),
            SkipReason::MissingField(name) => write!(f, "missing required field '{name}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub id: String,
    pub reason: SkipReason,
}

/// Output of one normalization pass.
#[derive(Debug, Default)]
pub struct Normalized {
    pub batch: Batch,
    pub skipped: Vec<Skipped>,
}

impl Normalized {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Validates raw records and coerces known numeric fields.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizeConfig,
}

impl Normalizer {
    pub fn new(config: NormalizeConfig) -> Self {
        Self { config }
    }

    /// Normalize a batch keyed by source id.
    pub fn normalize(&self, raw: RawBatch) -> Normalized {
        let mut out = Normalized::default();
        let total = raw.len();
        for (id, value) in raw {
            self.push(&mut out, &id, value);
        }
        log_summary(total, &out);
        out
    }

    /// Normalize a list of objects that carry their own id under `id_field`
    /// (string or integer), as JSON list APIs return them.
    pub fn normalize_items(&self, items: Vec<Value>, id_field: &str) -> Normalized {
        let mut out = Normalized::default();
        let total = items.len();
        for item in items {
            let id = item.get(id_field).and_then(id_from_value);
            match id {
                Some(id) => self.push(&mut out, &id, item),
                None => skip(&mut out, String::new(), SkipReason::MissingId),
            }
        }
        log_summary(total, &out);
        out
    }

    fn push(&self, out: &mut Normalized, raw_id: &str, value: Value) {
        match self.normalize_entry(raw_id, value) {
            Ok((id, record)) => {
                if out.batch.insert(id.clone(), record).is_some() {
                    debug!(id = %id, "duplicate id in batch; keeping the later entry");
                }
            }
            Err(reason) => skip(out, raw_id.to_string(), reason),
        }
    }

    fn normalize_entry(&self, raw_id: &str, value: Value) -> Result<(ListingId, ListingRecord), SkipReason> {
        let id = raw_id.trim();
        if id.is_empty() {
            return Err(SkipReason::EmptyId);
        }
        if self.config.numeric_ids && !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(SkipReason::NonNumericId);
        }

        let Value::Object(fields) = value else {
            return Err(SkipReason::NotAnObject);
        };

        let mut record = ListingRecord::new();
        for (name, value) in fields {
            let mut field = to_field(value);
            if self.config.numeric_fields.iter().any(|n| *n == name) {
                if let Some(number) = field.as_str().and_then(coerce_numeric) {
                    field = number;
                }
            }
            record.insert(name, field);
        }

        for required in &self.config.required_fields {
            if record.get(required).map_or(true, FieldValue::is_blank) {
                return Err(SkipReason::MissingField(required.clone()));
            }
        }

        Ok((id.to_string(), record))
    }
}

fn skip(out: &mut Normalized, id: String, reason: SkipReason) {
    debug!(id = %id, reason = %reason, "skipping listing");
    out.skipped.push(Skipped { id, reason });
}

fn log_summary(total: usize, out: &Normalized) {
    if out.skipped.is_empty() {
        debug!(total, kept = out.batch.len(), "batch normalized");
    } else {
        info!(total, kept = out.batch.len(), skipped = out.skipped.len(), "batch normalized with skips");
    }
}

fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// Map a JSON value onto a flat scalar. Nested values keep their compact
/// JSON text so records stay flat.
fn to_field(value: Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Integer(i),
            None => n.as_f64().map_or(FieldValue::Null, FieldValue::Float),
        },
        Value::String(s) => FieldValue::Text(s.trim().to_string()),
        nested @ (Value::Array(_) | Value::Object(_)) => FieldValue::Text(nested.to_string()),
    }
}

/// Best-effort number parse for scraped salary-like text such as
/// `"50 000"` or `"4,5"`. Returns `None` when the text is not a number.
fn coerce_numeric(text: &str) -> Option<FieldValue> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if compact.is_empty() {
        return None;
    }
    if let Ok(i) = compact.parse::<i64>() {
        return Some(FieldValue::Integer(i));
    }
    compact
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(FieldValue::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawBatch {
        match value {
            Value::Object(map) => map,
            _ => panic!("test input must be an object"),
        }
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let out = Normalizer::default().normalize(RawBatch::new());
        assert!(out.batch.is_empty());
        assert_eq!(out.skipped_count(), 0);
    }

    #[test]
    fn keeps_valid_listings() {
        let out = Normalizer::default().normalize(raw(json!({
            "1": {"title": "X"},
            "2": {"title": "Y", "employer": "Acme"},
        })));
        assert_eq!(out.batch.len(), 2);
        assert_eq!(out.batch["2"]["employer"], FieldValue::from("Acme"));
    }

    #[test]
    fn bad_entries_are_skipped_not_fatal() {
        let out = Normalizer::default().normalize(raw(json!({
            "1": {"title": "Loader"},
            "2": {"title": "   "},
            "3": {"salary": 100},
            "4": "not a record",
            " ": {"title": "no id"},
        })));
        assert_eq!(out.batch.keys().collect::<Vec<_>>(), vec!["1"]);
        assert_eq!(out.skipped_count(), 4);
        let reasons: Vec<&SkipReason> = out.skipped.iter().map(|s| &s.reason).collect();
        assert!(reasons.contains(&&SkipReason::EmptyId));
        assert!(reasons.contains(&&SkipReason::NotAnObject));
        assert!(reasons.contains(&&SkipReason::MissingField("title".to_string())));
    }

    #[test]
    fn ids_are_trimmed() {
        let out = Normalizer::default().normalize(raw(json!({" 77 ": {"title": "Cook"}})));
        assert!(out.batch.contains_key("77"));
    }

    #[test]
    fn numeric_ids_enforced_when_configured() {
        let normalizer = Normalizer::new(NormalizeConfig {
            numeric_ids: true,
            ..NormalizeConfig::default()
        });
        let out = normalizer.normalize(raw(json!({
            "123": {"title": "ok"},
            "abc": {"title": "rejected"},
        })));
        assert_eq!(out.batch.len(), 1);
        assert_eq!(out.skipped[0].reason, SkipReason::NonNumericId);
    }

    #[test]
    fn salary_text_is_coerced() {
        let out = Normalizer::default().normalize(raw(json!({
            "1": {"title": "A", "salary_from": "50 000", "salary_to": "4,5", "salary": "by agreement"},
        })));
        let rec = &out.batch["1"];
        assert_eq!(rec["salary_from"], FieldValue::Integer(50_000));
        assert_eq!(rec["salary_to"], FieldValue::Float(4.5));
        assert_eq!(rec["salary"], FieldValue::from("by agreement"));
    }

    #[test]
    fn unknown_fields_are_not_coerced() {
        let out = Normalizer::default().normalize(raw(json!({"1": {"title": "A", "phone": "123"}})));
        assert_eq!(out.batch["1"]["phone"], FieldValue::from("123"));
    }

    #[test]
    fn nested_values_are_flattened_to_text() {
        let out = Normalizer::default().normalize(raw(json!({
            "1": {"title": "A", "contacts": {"name": "Ann"}, "tags": [1, 2], "remote": true, "rating": 4.2},
        })));
        let rec = &out.batch["1"];
        assert_eq!(rec["contacts"], FieldValue::from(r#"{"name":"Ann"}"#));
        assert_eq!(rec["tags"], FieldValue::from("[1,2]"));
        assert_eq!(rec["remote"], FieldValue::Boolean(true));
        assert_eq!(rec["rating"], FieldValue::Float(4.2));
    }

    #[test]
    fn list_items_with_integer_and_string_ids() {
        let items = vec![
            json!({"id": 101, "title": "A"}),
            json!({"id": "102", "title": "B"}),
            json!({"title": "no id"}),
            json!({"id": 1.5, "title": "float id"}),
        ];
        let out = Normalizer::default().normalize_items(items, "id");
        assert_eq!(out.batch.keys().collect::<Vec<_>>(), vec!["101", "102"]);
        assert_eq!(out.skipped_count(), 2);
        assert!(out.skipped.iter().all(|s| s.reason == SkipReason::MissingId));
    }

    #[test]
    fn no_required_fields_keeps_everything_shaped() {
        let normalizer = Normalizer::new(NormalizeConfig {
            required_fields: Vec::new(),
            ..NormalizeConfig::default()
        });
        let out = normalizer.normalize(raw(json!({"9": {}})));
        assert_eq!(out.batch.len(), 1);
        assert!(out.batch["9"].is_empty());
    }

    #[test]
    fn coerce_numeric_edge_cases() {
        assert_eq!(coerce_numeric("\u{a0}12\u{202f}000 "), Some(FieldValue::Integer(12_000)));
        assert_eq!(coerce_numeric("-3"), Some(FieldValue::Integer(-3)));
        assert_eq!(coerce_numeric(""), None);
        assert_eq!(coerce_numeric("from 50 000"), None);
        assert_eq!(coerce_numeric("inf"), None);
    }
}
