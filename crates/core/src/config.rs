use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key).as_deref() {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

/// Comma-separated list; blank entries are dropped.
fn profiled_env_list(profile: &str, key: &str, default: &[&str]) -> Vec<String> {
    match profiled_env_opt(profile, key) {
        Some(v) => v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub source: SourceConfig,
    pub schedule: ScheduleConfig,
    pub telegram: TelegramConfig,
    pub normalize: NormalizeConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `VACANCY_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("VACANCY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            source: SourceConfig::from_env_profiled(p),
            schedule: ScheduleConfig::from_env_profiled(p),
            telegram: TelegramConfig::from_env_profiled(p),
            normalize: NormalizeConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject combinations that would make the worker misbehave at runtime.
    pub fn validate(&self) -> Result<(), CoreError> {
        let files = [
            ("table", &self.storage.table_file),
            ("pending", &self.storage.pending_file),
            ("subscribers", &self.storage.subscribers_file),
        ];
        for (i, (a, a_file)) in files.iter().enumerate() {
            if let Some((b, _)) = files[i + 1..].iter().find(|(_, b_file)| b_file == a_file) {
                return Err(CoreError::Config(format!(
                    "{a} and {b} files must differ (both '{a_file}')"
                )));
            }
        }
        if self.source.per_page == 0 || self.source.per_page > 100 {
            return Err(CoreError::Config(format!(
                "SOURCE_PER_PAGE must be within 1..=100, got {}",
                self.source.per_page
            )));
        }
        if self.schedule.process_timeout_secs == 0 {
            return Err(CoreError::Config("PROCESS_TIMEOUT_SECS must be positive".to_string()));
        }
        Ok(())
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  storage:     data_dir={}, table={}", self.storage.data_dir.display(), self.storage.table_file);
        tracing::info!("  source:      url={}, area={}, text={:?}", self.source.base_url, self.source.area, self.source.text);
        tracing::info!("  schedule:    cron={}, timeout={}s", self.schedule.cron, self.schedule.process_timeout_secs);
        tracing::info!("  telegram:    configured={}", self.telegram.is_configured());
        tracing::info!("  normalize:   required={:?}", self.normalize.required_fields);
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// File name of the listing table inside `data_dir`.
    pub table_file: String,
    /// File name of the pending (not yet delivered) delta inside `data_dir`.
    pub pending_file: String,
    /// File name of the subscriber list inside `data_dir`.
    pub subscribers_file: String,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            data_dir: PathBuf::from(profiled_env_or(p, "DATA_DIR", "data")),
            table_file: profiled_env_or(p, "TABLE_FILE", "vacancies.json"),
            pending_file: profiled_env_or(p, "PENDING_FILE", "new_vacancies.json"),
            subscribers_file: profiled_env_or(p, "SUBSCRIBERS_FILE", "subscribers.json"),
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.data_dir.join(&self.table_file)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join(&self.pending_file)
    }

    pub fn subscribers_path(&self) -> PathBuf {
        self.data_dir.join(&self.subscribers_file)
    }
}

// ── Source (hh.ru vacancies API) ──────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    /// hh.ru area id (1204 = Berdsk).
    pub area: String,
    /// Free-text search query; empty matches everything.
    pub text: String,
    pub per_page: u32,
    pub max_pages: u32,
    pub request_delay_ms: u64,
    pub user_agent: String,
}

impl SourceConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            base_url: profiled_env_or(p, "SOURCE_BASE_URL", "https://api.hh.ru"),
            area: profiled_env_or(p, "SOURCE_AREA", "1204"),
            text: profiled_env_or(p, "SOURCE_TEXT", ""),
            per_page: profiled_env_u32(p, "SOURCE_PER_PAGE", 50),
            max_pages: profiled_env_u32(p, "SOURCE_MAX_PAGES", 6),
            request_delay_ms: profiled_env_u64(p, "SOURCE_REQUEST_DELAY_MS", 1000),
            user_agent: profiled_env_or(p, "SOURCE_USER_AGENT", "vacancy-watch/0.1"),
        }
    }
}

// ── Schedule ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// 5- or 6-field cron expression for polling cycles.
    pub cron: String,
    /// Upper bound for one store `process` call.
    pub process_timeout_secs: u64,
    /// Wait after a failed cycle before retrying.
    pub retry_delay_secs: u64,
    /// Pause between two Telegram messages.
    pub send_delay_ms: u64,
}

impl ScheduleConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            cron: profiled_env_or(p, "POLL_CRON", "*/30 * * * *"),
            process_timeout_secs: profiled_env_u64(p, "PROCESS_TIMEOUT_SECS", 60),
            retry_delay_secs: profiled_env_u64(p, "RETRY_DELAY_SECS", 300),
            send_delay_ms: profiled_env_u64(p, "SEND_DELAY_MS", 100),
        }
    }
}

// ── Telegram ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub parse_mode: Option<String>,
    /// Optional minijinja template overriding the default listing message.
    pub template: Option<String>,
}

impl TelegramConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            bot_token: profiled_env_opt(p, "TELEGRAM_BOT_TOKEN"),
            parse_mode: profiled_env_opt(p, "TELEGRAM_PARSE_MODE"),
            template: profiled_env_opt(p, "TELEGRAM_TEMPLATE"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some()
    }
}

// ── Normalization ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Fields that must be present and non-blank for a listing to be kept.
    pub required_fields: Vec<String>,
    /// Fields coerced to numbers when they arrive as text.
    pub numeric_fields: Vec<String>,
    /// Require IDs made only of ASCII digits.
    pub numeric_ids: bool,
}

impl NormalizeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            required_fields: profiled_env_list(p, "REQUIRED_FIELDS", &["title"]),
            numeric_fields: profiled_env_list(
                p,
                "NUMERIC_FIELDS",
                &["salary", "salary_from", "salary_to", "employer_rating"],
            ),
            numeric_ids: profiled_env_bool(p, "NUMERIC_IDS", false),
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            required_fields: vec!["title".to_string()],
            numeric_fields: ["salary", "salary_from", "salary_to", "employer_rating"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            numeric_ids: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            profile: String::new(),
            storage: StorageConfig {
                data_dir: PathBuf::from("data"),
                table_file: "vacancies.json".to_string(),
                pending_file: "new_vacancies.json".to_string(),
                subscribers_file: "subscribers.json".to_string(),
            },
            source: SourceConfig {
                base_url: "https://api.hh.ru".to_string(),
                area: "1204".to_string(),
                text: String::new(),
                per_page: 50,
                max_pages: 6,
                request_delay_ms: 0,
                user_agent: "test".to_string(),
            },
            schedule: ScheduleConfig {
                cron: "*/30 * * * *".to_string(),
                process_timeout_secs: 60,
                retry_delay_secs: 300,
                send_delay_ms: 0,
            },
            telegram: TelegramConfig { bot_token: None, parse_mode: None, template: None },
            normalize: NormalizeConfig::default(),
        }
    }

    #[test]
    fn sample_config_is_valid() {
        assert!(sample().validate().is_ok());
        assert_eq!(sample().profile_label(), "default");
    }

    #[test]
    fn same_table_and_pending_file_rejected() {
        let mut cfg = sample();
        cfg.storage.pending_file = cfg.storage.table_file.clone();
        assert!(matches!(cfg.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn subscribers_file_must_not_collide() {
        let mut cfg = sample();
        cfg.storage.subscribers_file = cfg.storage.table_file.clone();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("table and subscribers"), "{err}");

        let mut cfg = sample();
        cfg.storage.subscribers_file = cfg.storage.pending_file.clone();
        let err = cfg.validate().unwrap_err().to_string();
        assert!(err.contains("pending and subscribers"), "{err}");
    }

    #[test]
    fn per_page_out_of_range_rejected() {
        let mut cfg = sample();
        cfg.source.per_page = 0;
        assert!(cfg.validate().is_err());
        cfg.source.per_page = 101;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn storage_paths_join_data_dir() {
        let cfg = sample();
        assert_eq!(cfg.storage.table_path(), PathBuf::from("data/vacancies.json"));
        assert_eq!(cfg.storage.pending_path(), PathBuf::from("data/new_vacancies.json"));
    }

    #[test]
    fn profiled_lookup_prefers_prefixed_key() {
        env::set_var("VACTEST_PROD_SOURCE_AREA", "1");
        assert_eq!(profiled_env_or("VACTEST_PROD", "SOURCE_AREA", "1204"), "1");
        assert_eq!(profiled_env_or("VACTEST_PROD", "VACTEST_MISSING_KEY", "1204"), "1204");
        env::remove_var("VACTEST_PROD_SOURCE_AREA");
    }

    #[test]
    fn list_values_are_trimmed() {
        env::set_var("VACTEST_LIST", " title , employer,, ");
        assert_eq!(profiled_env_list("", "VACTEST_LIST", &[]), vec!["title", "employer"]);
        assert_eq!(profiled_env_list("", "VACTEST_LIST_MISSING", &["x"]), vec!["x"]);
        env::remove_var("VACTEST_LIST");
    }
}
