//! Fetch collaborator interface.
//!
//! A source produces raw pages of listings keyed by source-native id. It
//! knows nothing about deduplication; the pipeline normalizes each page and
//! hands it to the store.

mod hh;

pub use hh::HhApiSource;

use async_trait::async_trait;

/// One fetched page: source id → raw field object.
pub type RawBatch = serde_json::Map<String, serde_json::Value>;

/// Errors raised while fetching listings.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("unexpected payload: {0}")]
    Payload(String),
}

/// Trait for listing providers (job boards, APIs, scrapers).
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Human-readable name for logs (e.g., "hh.ru").
    fn name(&self) -> &str;

    /// Fetch the current listings, one [`RawBatch`] per page.
    async fn fetch(&self) -> Result<Vec<RawBatch>, SourceError>;
}
