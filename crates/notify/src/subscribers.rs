//! Subscriber repository.
//!
//! The dispatcher receives a repository instead of reaching for shared
//! global state, so the bot front-end and the polling worker can share one
//! store and tests can inject their own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use vacancy_core::ListingRecord;
use vacancy_store::JsonFileBackend;

use crate::traits::NotifyError;

/// One chat subscribed to new vacancies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub chat_id: i64,
    /// Title keywords; empty means every listing.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Subscription {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id,
            keywords: Vec::new(),
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Case-insensitive match of any keyword against the listing title.
    pub fn matches(&self, record: &ListingRecord) -> bool {
        if self.keywords.is_empty() {
            return true;
        }
        let Some(title) = record.get("title").and_then(|v| v.as_str()) else {
            return false;
        };
        let title = title.to_lowercase();
        self.keywords
            .iter()
            .any(|k| title.contains(&k.to_lowercase()))
    }
}

/// Storage for subscriptions.
#[async_trait]
pub trait SubscriberRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Subscription>, NotifyError>;

    /// Add or replace a subscription. Returns `true` when the chat was not
    /// subscribed before.
    async fn subscribe(&self, subscription: Subscription) -> Result<bool, NotifyError>;

    /// Returns `true` when a subscription was removed.
    async fn unsubscribe(&self, chat_id: i64) -> Result<bool, NotifyError>;
}

/// Process-local subscriptions, lost on restart.
#[derive(Debug, Default)]
pub struct InMemorySubscribers {
    subs: RwLock<BTreeMap<i64, Subscription>>,
}

impl InMemorySubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        Self {
            subs: RwLock::new(subscriptions.into_iter().map(|s| (s.chat_id, s)).collect()),
        }
    }
}

#[async_trait]
impl SubscriberRepository for InMemorySubscribers {
    async fn list(&self) -> Result<Vec<Subscription>, NotifyError> {
        Ok(self.subs.read().await.values().cloned().collect())
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<bool, NotifyError> {
        Ok(self
            .subs
            .write()
            .await
            .insert(subscription.chat_id, subscription)
            .is_none())
    }

    async fn unsubscribe(&self, chat_id: i64) -> Result<bool, NotifyError> {
        Ok(self.subs.write().await.remove(&chat_id).is_some())
    }
}

/// Subscriptions persisted as a JSON array, written with the same atomic
/// replace as the listing table.
///
/// The file is the source of truth: every call reads it again, so a
/// subscription changed from another process is seen on the next delivery.
#[derive(Debug)]
pub struct JsonFileSubscribers {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileSubscribers {
    /// Open the subscriber file at `path`; a missing file means none.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, NotifyError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| NotifyError::Storage(format!("{}: {e}", dir.display())))?;
        }
        let repo = Self {
            path,
            write_lock: Mutex::new(()),
        };
        let subs = repo.load()?;
        info!(path = %repo.path.display(), subscribers = subs.len(), "subscribers loaded");
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<i64, Subscription>, NotifyError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let list: Vec<Subscription> = serde_json::from_slice(&bytes)
                    .map_err(|e| NotifyError::Storage(format!("{}: {e}", self.path.display())))?;
                Ok(list.into_iter().map(|s| (s.chat_id, s)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(NotifyError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }

    fn persist(&self, subs: &BTreeMap<i64, Subscription>) -> Result<(), NotifyError> {
        let list: Vec<&Subscription> = subs.values().collect();
        JsonFileBackend::write_atomic(&self.path, &list).map_err(|e| NotifyError::Storage(e.to_string()))
    }
}

#[async_trait]
impl SubscriberRepository for JsonFileSubscribers {
    async fn list(&self) -> Result<Vec<Subscription>, NotifyError> {
        Ok(self.load()?.into_values().collect())
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<bool, NotifyError> {
        let _guard = self.write_lock.lock().await;
        let mut subs = self.load()?;
        let is_new = subs.insert(subscription.chat_id, subscription).is_none();
        self.persist(&subs)?;
        Ok(is_new)
    }

    async fn unsubscribe(&self, chat_id: i64) -> Result<bool, NotifyError> {
        let _guard = self.write_lock.lock().await;
        let mut subs = self.load()?;
        if subs.remove(&chat_id).is_none() {
            return Ok(false);
        }
        self.persist(&subs)?;
        Ok(true)
    }
}
