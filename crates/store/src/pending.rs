use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vacancy_core::{Batch, ListingId};

/// Recipients that already received a listing, keyed by listing ID.
pub type Receipts = BTreeMap<ListingId, BTreeSet<String>>;

/// Listings accepted by the store but not yet confirmed as delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelta {
    pub created_at: DateTime<Utc>,
    pub listings: Batch,
    /// Partial progress for listings still owed to someone. Only IDs
    /// present in `listings` appear here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sent: Receipts,
}

impl PendingDelta {
    pub fn new(listings: Batch) -> Self {
        Self {
            created_at: Utc::now(),
            listings,
            sent: Receipts::new(),
        }
    }

    /// Fold a newer delta in. Entries of `newer` win on key collision and
    /// the original creation time is kept.
    pub fn absorb(&mut self, newer: &Batch) {
        for (id, record) in newer {
            self.listings.insert(id.clone(), record.clone());
        }
    }

    /// Drop every listing whose ID appears in `settled`, with its receipts.
    pub fn remove_settled<'a>(&mut self, settled: impl IntoIterator<Item = &'a ListingId>) {
        for id in settled {
            self.listings.remove(id);
            self.sent.remove(id);
        }
    }

    /// Remember who already got which listing. Receipts for listings no
    /// longer pending are ignored.
    pub fn record_sent(&mut self, receipts: &Receipts) {
        for (id, recipients) in receipts {
            if self.listings.contains_key(id) {
                self.sent
                    .entry(id.clone())
                    .or_default()
                    .extend(recipients.iter().cloned());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }
}
