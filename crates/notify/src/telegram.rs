//! Telegram Bot API notifier.
//!
//! Listing messages go out through `sendMessage`; the recipient passed to
//! [`Notifier::send`] is the chat id.

use serde_json::{json, Value};

use crate::traits::{Notification, Notifier, NotifyError};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Hard limit of one `sendMessage` text, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Wait applied when a 429 response carries no `retry_after`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

const MARKDOWN_V2_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

/// Backslash-escape the characters MarkdownV2 reserves.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 4);
    for ch in text.chars() {
        if MARKDOWN_V2_SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Cut `text` to the message limit on a char boundary, marking the cut.
fn truncate_message(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    cut.push('…');
    cut
}

/// Accept a literal token or a `${VAR}` reference to one.
fn resolve_token(raw: &str) -> Result<String, NotifyError> {
    let token = match raw.strip_prefix("${") {
        Some(rest) => {
            let var = rest
                .strip_suffix('}')
                .ok_or_else(|| NotifyError::Config(format!("Malformed env var reference: {raw}")))?;
            std::env::var(var)
                .map_err(|_| NotifyError::Config(format!("Environment variable '{var}' is not set")))?
        }
        None => raw.to_string(),
    };
    if token.trim().is_empty() {
        return Err(NotifyError::Config("Telegram bot token must not be empty".to_string()));
    }
    Ok(token)
}

/// Sends listing messages through one bot.
#[derive(Debug)]
pub struct TelegramNotifier {
    bot_token: String,
    parse_mode: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_PARSE_MODE` values.
    pub fn from_config(bot_token: String, parse_mode: Option<String>) -> Result<Self, NotifyError> {
        Ok(Self {
            bot_token: resolve_token(&bot_token)?,
            parse_mode,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Point the notifier at another Bot API server (self-hosted or test).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base.trim_end_matches('/'), self.bot_token)
    }

    fn message_body(&self, chat_id: &str, text: &str) -> Value {
        let mut body = json!({
            "chat_id": chat_id,
            "text": truncate_message(text),
            "disable_web_page_preview": true,
        });
        if let Some(mode) = &self.parse_mode {
            body["parse_mode"] = Value::String(mode.clone());
        }
        body
    }
}

/// Map a Bot API reply onto the notifier result.
fn check_reply(status: reqwest::StatusCode, reply: &Value) -> Result<(), NotifyError> {
    if reply["ok"].as_bool() == Some(true) {
        return Ok(());
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = reply["parameters"]["retry_after"]
            .as_u64()
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(NotifyError::RateLimited { retry_after_secs });
    }
    let description = reply["description"].as_str().unwrap_or("no description");
    Err(NotifyError::Api(format!("Telegram returned {status}: {description}")))
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(chat_id = %recipient, parse_mode = ?self.parse_mode, "Sending Telegram message");

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&self.message_body(recipient, &notification.body))
            .send()
            .await?;
        let status = response.status();
        let reply: Value = response.json().await?;
        check_reply(status, &reply)
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
