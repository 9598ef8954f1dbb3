//! Delivery of new vacancies to subscribers.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable delivery channels
//! - Telegram Bot API notifier
//! - Minijinja rendering of listing messages
//! - `SubscriberRepository` trait with in-memory and JSON-file stores
//! - Dispatcher that fans a delta out to matching subscribers

pub mod dispatcher;
pub mod subscribers;
pub mod telegram;
pub mod templating;
pub mod traits;

pub use dispatcher::{DeliveryReport, Dispatcher};
pub use subscribers::{InMemorySubscribers, JsonFileSubscribers, SubscriberRepository, Subscription};
pub use telegram::TelegramNotifier;
pub use templating::ListingRenderer;
pub use traits::{Notification, Notifier, NotifyError};
