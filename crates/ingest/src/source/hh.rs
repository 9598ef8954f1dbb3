//! hh.ru public vacancies API source.
//!
//! Pages through `GET /vacancies?text=&area=&page=&per_page=` and flattens
//! each item into a record with stable field names. A failed page is logged
//! and skipped; the fetch only fails when no page could be read at all.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use vacancy_core::config::SourceConfig;

use super::{ListingSource, RawBatch, SourceError};

/// Reads vacancies from the hh.ru API.
#[derive(Debug)]
pub struct HhApiSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HhApiSource {
    pub fn new(config: SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }

    fn vacancies_url(&self) -> String {
        format!("{}/vacancies", self.config.base_url.trim_end_matches('/'))
    }

    async fn fetch_page(&self, page: u32) -> Result<Value, SourceError> {
        let url = self.vacancies_url();
        let per_page = self.config.per_page.to_string();
        let page_param = page.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("text", self.config.text.as_str()),
                ("area", self.config.area.as_str()),
                ("page", page_param.as_str()),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ListingSource for HhApiSource {
    fn name(&self) -> &str {
        "hh.ru"
    }

    async fn fetch(&self) -> Result<Vec<RawBatch>, SourceError> {
        let mut pages = Vec::new();
        let mut last_error = None;

        for page in 0..self.config.max_pages {
            if page > 0 && self.config.request_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.request_delay_ms)).await;
            }

            let body = match self.fetch_page(page).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(page, error = %e, "failed to fetch vacancies page");
                    last_error = Some(e);
                    continue;
                }
            };

            let (batch, total_pages) = match parse_page(&body) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(page, error = %e, "failed to parse vacancies page");
                    last_error = Some(e);
                    continue;
                }
            };

            debug!(page, listings = batch.len(), "vacancies page fetched");
            if batch.is_empty() {
                break;
            }
            pages.push(batch);

            if total_pages.is_some_and(|total| u64::from(page) + 1 >= total) {
                break;
            }
        }

        match (pages.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => {
                info!(pages = pages.len(), "vacancies fetched");
                Ok(pages)
            }
        }
    }
}

/// Split an API response into a raw batch and the reported page count.
pub(crate) fn parse_page(body: &Value) -> Result<(RawBatch, Option<u64>), SourceError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Payload("missing 'items' array".to_string()))?;

    let mut batch = RawBatch::new();
    for item in items {
        match flatten_item(item) {
            Some((id, record)) => {
                batch.insert(id, record);
            }
            None => debug!("vacancy item without id skipped"),
        }
    }

    let total_pages = body.get("pages").and_then(Value::as_u64);
    Ok((batch, total_pages))
}

fn field(item: &Value, pointer: &str) -> Value {
    item.pointer(pointer).cloned().unwrap_or(Value::Null)
}

/// Flatten one API item into `(id, record)`. Missing nested parts become
/// nulls; validation happens later in the normalizer.
fn flatten_item(item: &Value) -> Option<(String, Value)> {
    let id = match item.get("id")? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };

    let record = json!({
        "title": field(item, "/name"),
        "salary_from": field(item, "/salary/from"),
        "salary_to": field(item, "/salary/to"),
        "currency": field(item, "/salary/currency"),
        "address": field(item, "/address/raw"),
        "url": field(item, "/alternate_url"),
        "employer_id": field(item, "/employer/id"),
        "employer": field(item, "/employer/name"),
        "employer_rating": field(item, "/employer/employer_rating/total_rating"),
        "requirement": field(item, "/snippet/requirement"),
        "responsibility": field(item, "/snippet/responsibility"),
        "published_at": field(item, "/published_at"),
    });
    Some((id, record))
}
