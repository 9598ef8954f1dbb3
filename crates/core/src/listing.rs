use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source-native vacancy identifier (hh.ru / zarplata.ru numeric IDs arrive as strings).
pub type ListingId = String;

/// One vacancy: a flat map of field name to scalar value.
pub type ListingRecord = BTreeMap<String, FieldValue>;

/// A set of listings keyed by ID. Ordered so persisted files diff cleanly.
pub type Batch = BTreeMap<ListingId, ListingRecord>;

/// Typed scalar field value. Scraped data arrives mostly as text; the
/// normalizer coerces known numeric fields where it can.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Null,
}

impl FieldValue {
    /// Extract as string, returning None for non-text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// True for `Null` and for text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::Integer(n) => write!(f, "{n}"),
            FieldValue::Float(x) => write!(f, "{x}"),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Null => Ok(()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

/// Build a record from `(field, value)` pairs.
pub fn record<K, V, I>(fields: I) -> ListingRecord
where
    K: Into<String>,
    V: Into<FieldValue>,
    I: IntoIterator<Item = (K, V)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
