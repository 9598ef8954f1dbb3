//! Minijinja rendering of listing messages.
//!
//! Each listing is turned into a [`ListingView`] with fallbacks already
//! applied, so templates stay simple. The raw record stays reachable as
//! `fields` for custom templates.

use serde::Serialize;

use vacancy_core::ListingRecord;

use crate::telegram::escape_markdown_v2;
use crate::traits::NotifyError;

/// Default message, one line per attribute.
pub const DEFAULT_TEMPLATE: &str = "🏢 {{ employer }}\n🔹 {{ title }}\n💵 {{ salary }}\n📍 {{ location }}\n🔗 {{ url }}";

/// Listing data exposed to templates.
#[derive(Debug, Clone, Serialize)]
pub struct ListingView<'a> {
    pub id: &'a str,
    pub title: String,
    pub employer: String,
    pub salary: String,
    pub location: String,
    pub url: String,
    pub fields: &'a ListingRecord,
}

impl<'a> ListingView<'a> {
    pub fn new(id: &'a str, record: &'a ListingRecord) -> Self {
        Self {
            id,
            title: text_or(record, &["title"], "Без названия"),
            employer: text_or(record, &["employer", "company"], "Не указано"),
            salary: salary_text(record),
            location: text_or(record, &["address", "location"], "Локация не указана"),
            url: text_or(record, &["url", "link"], "#"),
            fields: record,
        }
    }
}

/// First non-blank field among `keys`, else `fallback`.
fn text_or(record: &ListingRecord, keys: &[&str], fallback: &str) -> String {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_blank())
        .map(|v| v.to_string())
        .unwrap_or_else(|| fallback.to_string())
}

fn salary_text(record: &ListingRecord) -> String {
    let part = |key: &str| record.get(key).filter(|v| !v.is_blank());
    let currency = part("currency").map(|c| format!(" {c}")).unwrap_or_default();
    match (part("salary_from"), part("salary_to")) {
        (Some(from), Some(to)) => format!("от {from} до {to}{currency}"),
        (Some(from), None) => format!("от {from}{currency}"),
        (None, Some(to)) => format!("до {to}{currency}"),
        (None, None) => text_or(record, &["salary"], "З/п не указана"),
    }
}

/// Renders listing messages from a minijinja template.
#[derive(Debug, Clone)]
pub struct ListingRenderer {
    template: String,
}

impl ListingRenderer {
    /// Renderer with a custom template. The template is validated up front.
    pub fn new(template: impl Into<String>) -> Result<Self, NotifyError> {
        let template = template.into();
        Self::build_env()
            .template_from_str(&template)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(Self { template })
    }

    /// Build a configured minijinja environment with custom filters.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();
        env.add_filter("escape_md", escape_md_filter);
        env
    }

    /// Render one listing.
    pub fn render(&self, id: &str, record: &ListingRecord) -> Result<String, NotifyError> {
        let view = ListingView::new(id, record);
        Self::build_env()
            .render_str(&self.template, &view)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }
}

impl Default for ListingRenderer {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }
}

/// Custom filter: escape text for Telegram MarkdownV2.
fn escape_md_filter(value: String) -> String {
    escape_markdown_v2(&value)
}
