//! Delivers a delta of new listings to every interested subscriber.
//!
//! Each listing is rendered once and sent to each subscriber whose
//! keywords match it. Individual send failures don't block the rest of the
//! delivery; they are counted in the [`DeliveryReport`], which also tells
//! the caller which recipients got what so a retry never repeats a send.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vacancy_core::{Batch, ListingId};
use vacancy_store::Receipts;

use crate::subscribers::SubscriberRepository;
use crate::templating::ListingRenderer;
use crate::traits::{DispatchResult, Notification, Notifier, NotifyError};

/// Longest wait honoured for a Telegram `retry_after` hint.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Outcome of one [`Dispatcher::deliver`] call.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Listings in the delta.
    pub listings: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sends left out because the recipient already got the listing.
    pub skipped: usize,
    pub results: Vec<DispatchResult>,
}

impl DeliveryReport {
    /// True when every attempted send succeeded.
    pub fn all_delivered(&self) -> bool {
        self.failed == 0
    }

    /// Recipients reached in this delivery, per listing.
    pub fn receipts(&self) -> Receipts {
        let mut receipts = Receipts::new();
        for r in self.results.iter().filter(|r| r.success) {
            receipts
                .entry(r.listing_id.clone())
                .or_default()
                .insert(r.recipient.clone());
        }
        receipts
    }

    /// Listings with at least one send that may still succeed later.
    pub fn unsettled(&self) -> BTreeSet<ListingId> {
        self.results
            .iter()
            .filter(|r| !r.success && r.retryable)
            .map(|r| r.listing_id.clone())
            .collect()
    }
}

/// Fans new listings out to subscribers through one notifier channel.
pub struct Dispatcher {
    notifier: Box<dyn Notifier>,
    subscribers: Arc<dyn SubscriberRepository>,
    renderer: ListingRenderer,
    send_delay: Duration,
}

impl Dispatcher {
    pub fn new(
        notifier: Box<dyn Notifier>,
        subscribers: Arc<dyn SubscriberRepository>,
        renderer: ListingRenderer,
    ) -> Self {
        Self {
            notifier,
            subscribers,
            renderer,
            send_delay: Duration::ZERO,
        }
    }

    /// Pause between consecutive sends to stay under chat rate limits.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// Send every listing of `delta` to every matching subscriber that is
    /// not already listed in `already_sent`.
    ///
    /// Fails only when the subscriber list can't be read.
    pub async fn deliver(&self, delta: &Batch, already_sent: &Receipts) -> Result<DeliveryReport, NotifyError> {
        let mut report = DeliveryReport {
            listings: delta.len(),
            ..DeliveryReport::default()
        };
        if delta.is_empty() {
            return Ok(report);
        }

        let subscribers = self.subscribers.list().await?;
        if subscribers.is_empty() {
            tracing::debug!(listings = delta.len(), "No subscribers; nothing to deliver");
            return Ok(report);
        }

        let mut first = true;
        for (id, record) in delta {
            let notification = match self.renderer.render(id, record) {
                Ok(body) => Notification {
                    subject: record
                        .get("title")
                        .map(|t| t.to_string())
                        .unwrap_or_default(),
                    body,
                    metadata: HashMap::from([("listing_id".to_string(), id.clone())]),
                },
                Err(e) => {
                    tracing::warn!(listing_id = %id, error = %e, "Listing rendering failed");
                    let recipients = subscribers.iter().filter(|s| s.matches(record)).count();
                    report.failed += recipients;
                    continue;
                }
            };

            let done = already_sent.get(id);
            for sub in subscribers.iter().filter(|s| s.matches(record)) {
                let recipient = sub.chat_id.to_string();
                if done.is_some_and(|d| d.contains(&recipient)) {
                    report.skipped += 1;
                    continue;
                }
                if !first && !self.send_delay.is_zero() {
                    tokio::time::sleep(self.send_delay).await;
                }
                first = false;

                let result = self.send_one(&recipient, id, &notification).await;
                if result.success {
                    report.sent += 1;
                } else {
                    report.failed += 1;
                }
                report.results.push(result);
            }
        }

        tracing::info!(
            channel = self.notifier.channel_name(),
            listings = report.listings,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "Delivery finished"
        );
        Ok(report)
    }

    /// Send one message, retrying once when the channel asks us to back off.
    async fn send_one(&self, recipient: &str, listing_id: &str, notification: &Notification) -> DispatchResult {
        let start = Instant::now();
        let mut result = self.notifier.send(recipient, notification).await;
        if let Err(NotifyError::RateLimited { retry_after_secs }) = result {
            let wait = Duration::from_secs(retry_after_secs).min(MAX_RETRY_AFTER);
            tracing::warn!(recipient, retry_after_secs, "Rate limited; retrying once");
            tokio::time::sleep(wait).await;
            result = self.notifier.send(recipient, notification).await;
        }
        let duration_ms = start.elapsed().as_millis() as u64;

        let (success, retryable, error) = match result {
            Ok(()) => {
                tracing::debug!(
                    channel = self.notifier.channel_name(),
                    recipient,
                    listing_id,
                    duration_ms,
                    "Listing delivered"
                );
                (true, false, None)
            }
            Err(e) => {
                tracing::warn!(
                    channel = self.notifier.channel_name(),
                    recipient,
                    listing_id,
                    error = %e,
                    transient = e.is_transient(),
                    duration_ms,
                    "Listing delivery failed"
                );
                (false, e.is_transient(), Some(e.to_string()))
            }
        };

        DispatchResult {
            channel: self.notifier.channel_name().to_string(),
            recipient: recipient.to_string(),
            listing_id: listing_id.to_string(),
            success,
            retryable,
            error,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use vacancy_core::record;

    use crate::subscribers::{InMemorySubscribers, Subscription};

    /// Records every send. Recipients in `failing` are rejected for good,
    /// recipients in `flaky` are always rate limited, and the first
    /// `rate_limited` calls answer 429.
    #[derive(Default)]
    struct MockNotifier {
        sent: Arc<Mutex<Vec<(String, String)>>>,
        failing: Vec<String>,
        flaky: Vec<String>,
        rate_limited: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for MockNotifier {
        async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
            if self
                .rate_limited
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NotifyError::RateLimited { retry_after_secs: 0 });
            }
            if self.failing.iter().any(|r| r == recipient) {
                return Err(NotifyError::Api("Forbidden: bot was blocked by the user".to_string()));
            }
            if self.flaky.iter().any(|r| r == recipient) {
                return Err(NotifyError::RateLimited { retry_after_secs: 0 });
            }
            self.sent.lock().unwrap().push((
                recipient.to_string(),
                notification.metadata["listing_id"].clone(),
            ));
            Ok(())
        }
        fn channel_name(&self) -> &str {
            "mock"
        }
    }

    fn delta() -> Batch {
        Batch::from([
            ("1".to_string(), record([("title", "Грузчик")])),
            ("2".to_string(), record([("title", "Повар")])),
        ])
    }

    fn dispatcher(notifier: MockNotifier, subs: Vec<Subscription>) -> Dispatcher {
        Dispatcher::new(
            Box::new(notifier),
            Arc::new(InMemorySubscribers::with(subs)),
            ListingRenderer::default(),
        )
    }

    #[tokio::test]
    async fn delivers_matching_listings_to_each_subscriber() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = MockNotifier {
            sent: sent.clone(),
            ..MockNotifier::default()
        };
        let d = dispatcher(
            notifier,
            vec![Subscription::new(10), Subscription::new(20).with_keywords(["повар"])],
        );

        let report = d.deliver(&delta(), &Receipts::new()).await.unwrap();
        assert_eq!(report.listings, 2);
        assert_eq!(report.sent, 3);
        assert!(report.all_delivered());

        let mut got = sent.lock().unwrap().clone();
        got.sort();
        assert_eq!(
            got,
            vec![
                ("10".to_string(), "1".to_string()),
                ("10".to_string(), "2".to_string()),
                ("20".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn partial_failure_doesnt_block() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = MockNotifier {
            sent: sent.clone(),
            failing: vec!["10".to_string()],
            ..MockNotifier::default()
        };
        let d = dispatcher(notifier, vec![Subscription::new(10), Subscription::new(20)]);

        let report = d.deliver(&delta(), &Receipts::new()).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.sent, 2);
        assert!(!report.all_delivered());
        assert_eq!(sent.lock().unwrap().len(), 2); // chat 20 still got both
        assert!(report.results.iter().filter(|r| !r.success).all(|r| r.recipient == "10"));

        // A blocked chat won't change its mind: nothing is left to retry.
        assert!(report.unsettled().is_empty());
        assert_eq!(report.receipts()["1"], BTreeSet::from(["20".to_string()]));
    }

    #[tokio::test]
    async fn transient_failure_leaves_listing_unsettled() {
        let notifier = MockNotifier {
            flaky: vec!["10".to_string()],
            ..MockNotifier::default()
        };
        let d = dispatcher(notifier, vec![Subscription::new(10), Subscription::new(20)]);

        let report = d.deliver(&delta(), &Receipts::new()).await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.unsettled(), BTreeSet::from(["1".to_string(), "2".to_string()]));
        assert!(report.receipts().values().all(|r| r == &BTreeSet::from(["20".to_string()])));
    }

    #[tokio::test]
    async fn recipients_with_receipts_are_skipped() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let notifier = MockNotifier {
            sent: sent.clone(),
            ..MockNotifier::default()
        };
        let d = dispatcher(notifier, vec![Subscription::new(10), Subscription::new(20)]);
        let already = Receipts::from([("1".to_string(), BTreeSet::from(["20".to_string()]))]);

        let report = d.deliver(&delta(), &already).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.sent, 3);
        assert!(!sent.lock().unwrap().contains(&("20".to_string(), "1".to_string())));
    }

    #[tokio::test]
    async fn rate_limited_send_is_retried_once() {
        let notifier = MockNotifier {
            rate_limited: AtomicUsize::new(1),
            ..MockNotifier::default()
        };
        let d = dispatcher(notifier, vec![Subscription::new(10)]);
        let report = d.deliver(&delta(), &Receipts::new()).await.unwrap();
        assert_eq!(report.sent, 2);
        assert!(report.all_delivered());
    }

    #[tokio::test]
    async fn empty_delta_or_no_subscribers_sends_nothing() {
        let d = dispatcher(MockNotifier::default(), vec![Subscription::new(10)]);
        let report = d.deliver(&Batch::new(), &Receipts::new()).await.unwrap();
        assert_eq!(report.sent + report.failed, 0);

        let d = dispatcher(MockNotifier::default(), Vec::new());
        let report = d.deliver(&delta(), &Receipts::new()).await.unwrap();
        assert_eq!(report.listings, 2);
        assert!(report.results.is_empty());
        assert!(report.all_delivered());
    }
}
