use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use vacancy_core::ListingId;
use vacancy_ingest::{ListingSource, Normalizer, SourceError};
use vacancy_notify::{Dispatcher, NotifyError};
use vacancy_store::{DedupStore, StoreError};

const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Reasons a cycle stops early.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("fetch failed: {0}")]
    Source(#[from] SourceError),

    #[error("storage failed: {0}")]
    Storage(#[from] StoreError),

    #[error("storage call did not finish within {0:?}")]
    StorageTimeout(Duration),

    #[error("storage task aborted: {0}")]
    StorageTask(String),

    #[error("delivery failed: {0}")]
    Notify(#[from] NotifyError),
}

impl WatchError {
    /// True for any failure of the dedup store, including timeouts.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            WatchError::Storage(_) | WatchError::StorageTimeout(_) | WatchError::StorageTask(_)
        )
    }
}

/// Counters for one [`Pipeline::run_cycle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Raw entries returned by the source.
    pub fetched: usize,
    /// Entries dropped by the normalizer.
    pub skipped: usize,
    /// Listings the store accepted as new this cycle.
    pub new: usize,
    /// Messages sent.
    pub delivered: usize,
    /// Messages that could not be sent.
    pub failed: usize,
}

/// One source feeding one store, with optional delivery.
///
/// Without a dispatcher, new listings accumulate in the store's pending
/// delta for an outside consumer.
pub struct Pipeline {
    source: Box<dyn ListingSource>,
    normalizer: Normalizer,
    store: Arc<DedupStore>,
    dispatcher: Option<Dispatcher>,
    process_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn ListingSource>,
        normalizer: Normalizer,
        store: Arc<DedupStore>,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            source,
            normalizer,
            store,
            dispatcher,
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
        }
    }

    /// Upper bound for one store call. The call itself is not cancelled; a
    /// late commit is still picked up through the pending delta.
    pub fn with_process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<DedupStore> {
        &self.store
    }

    /// Fetch, dedup and deliver once.
    ///
    /// A storage failure aborts the cycle before anything is sent. After
    /// delivery, a listing leaves the pending delta once no send for it can
    /// still succeed. Listings with a transient failure stay pending
    /// together with the recipients already reached, so the next cycle only
    /// retries the sends that failed.
    pub async fn run_cycle(&self) -> Result<CycleReport, WatchError> {
        let mut report = CycleReport::default();

        let pages = self.source.fetch().await?;
        debug!(source = self.source.name(), pages = pages.len(), "source fetched");

        for page in pages {
            report.fetched += page.len();
            let normalized = self.normalizer.normalize(page);
            report.skipped += normalized.skipped_count();
            if normalized.batch.is_empty() {
                continue;
            }

            let batch = normalized.batch;
            let delta = self.blocking(move |store| store.process(&batch)).await?;
            report.new += delta.len();
        }

        let Some(dispatcher) = &self.dispatcher else {
            info!(
                source = self.source.name(),
                fetched = report.fetched,
                skipped = report.skipped,
                new = report.new,
                "cycle finished without delivery"
            );
            return Ok(report);
        };

        let pending = self.blocking(|store| store.pending()).await?;
        if let Some(pending) = pending.filter(|p| !p.is_empty()) {
            let delivery = dispatcher.deliver(&pending.listings, &pending.sent).await?;
            report.delivered = delivery.sent;
            report.failed = delivery.failed;

            let unsettled = delivery.unsettled();
            let settled: Vec<ListingId> = pending
                .listings
                .into_keys()
                .filter(|id| !unsettled.contains(id))
                .collect();
            if !delivery.all_delivered() {
                warn!(
                    failed = delivery.failed,
                    retry = unsettled.len(),
                    "delivery incomplete; listings with transient failures stay pending"
                );
            }
            let receipts = delivery.receipts();
            self.blocking(move |store| store.settle_pending(&settled, &receipts))
                .await?;
        }

        info!(
            source = self.source.name(),
            fetched = report.fetched,
            skipped = report.skipped,
            new = report.new,
            delivered = report.delivered,
            failed = report.failed,
            "cycle finished"
        );
        Ok(report)
    }

    /// Run a store call on the blocking pool, bounded by the process timeout.
    async fn blocking<T, F>(&self, op: F) -> Result<T, WatchError>
    where
        T: Send + 'static,
        F: FnOnce(&DedupStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || op(&store));
        match tokio::time::timeout(self.process_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(WatchError::StorageTask(join.to_string())),
            Err(_) => Err(WatchError::StorageTimeout(self.process_timeout)),
        }
    }
}
