//! Delivery channel seam shared by the dispatcher and its notifiers.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("listing template error: {0}")]
    Template(String),

    #[error("notifier misconfigured: {0}")]
    Config(String),

    #[error("channel rejected message: {0}")]
    Api(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("subscriber storage error: {0}")]
    Storage(String),
}

impl NotifyError {
    /// Failures worth retrying on a later cycle. A rejected message or a
    /// broken template fails the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Http(_) | NotifyError::RateLimited { .. })
    }
}

/// One rendered listing message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    /// Listing title, for channels that show a subject line.
    pub subject: String,
    pub body: String,
    /// Carries `listing_id`.
    pub metadata: HashMap<String, String>,
}

/// A channel able to deliver a message to one recipient.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// `recipient` is channel specific; a chat id for Telegram.
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError>;

    fn channel_name(&self) -> &str;
}

/// Outcome of sending one listing to one recipient.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub channel: String,
    pub recipient: String,
    pub listing_id: String,
    pub success: bool,
    /// Set on failures that may succeed on a later attempt.
    pub retryable: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}
