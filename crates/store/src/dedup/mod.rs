mod operations;

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use vacancy_core::config::StorageConfig;
use vacancy_core::Batch;

use crate::backend::{JsonFileBackend, TableBackend};
use crate::error::StoreError;
use crate::pending::PendingDelta;

/// Result of a [`DedupStore::merge`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The delta was empty; nothing touched the disk.
    NothingWritten,
    /// The table was rewritten.
    Written {
        added: usize,
        /// Existing IDs overwritten by the delta (only possible when
        /// `merge` is fed a delta that did not come from `diff`).
        replaced: usize,
        total: usize,
    },
}

impl MergeOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, MergeOutcome::Written { .. })
    }
}

/// Single-writer authority over every listing seen so far.
///
/// The whole table lives in memory behind one mutex. [`process`](Self::process)
/// holds that mutex across diff and merge, so two callers can never both
/// treat the same ID as new or drop each other's entries.
///
/// The in-memory table is only replaced after the new version is durably
/// on disk, which keeps memory and disk identical even when a write fails
/// (and makes a poisoned lock safe to recover).
pub struct DedupStore {
    backend: Box<dyn TableBackend>,
    table: Mutex<Batch>,
}

impl DedupStore {
    /// Open the JSON-file store described by `config`.
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        let backend = JsonFileBackend::new(config)?;
        Self::with_backend(Box::new(backend))
    }

    /// Load the table from `backend`.
    ///
    /// A missing table is created empty and persisted right away so later
    /// writes always replace a known-good file. A corrupt table is an error:
    /// the file is left untouched for an operator to inspect (see
    /// [`DedupStore::quarantine`]).
    pub fn with_backend(backend: Box<dyn TableBackend>) -> Result<Self, StoreError> {
        let table = match backend.load_table() {
            Ok(Some(table)) => {
                info!(location = %backend.location(), listings = table.len(), "listing table loaded");
                table
            }
            Ok(None) => {
                let empty = Batch::new();
                backend.save_table(&empty)?;
                info!(location = %backend.location(), "listing table initialized empty");
                empty
            }
            Err(e) => {
                tracing::error!(location = %backend.location(), error = %e, "failed to load listing table");
                return Err(e);
            }
        };

        Ok(Self {
            backend,
            table: Mutex::new(table),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Batch> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listings of `candidate` whose IDs are not in the table.
    ///
    /// Pure query: repeated calls return the same delta until a merge.
    pub fn diff(&self, candidate: &Batch) -> Batch {
        let table = self.lock();
        diff_against(&table, candidate)
    }

    /// Union `delta` into the table and persist it atomically.
    ///
    /// Delta entries win on key collision. An empty delta is a no-op
    /// reported as [`MergeOutcome::NothingWritten`].
    pub fn merge(&self, delta: &Batch) -> Result<MergeOutcome, StoreError> {
        let mut table = self.lock();
        self.merge_locked(&mut table, delta)
    }

    /// Diff, merge and return the delta as one critical section.
    ///
    /// A non-empty delta is also folded into the pending artifact so it
    /// survives until [`settle_pending`](Self::settle_pending) confirms
    /// delivery. An unreadable pending file fails the call before the table
    /// is touched and is left in place (see
    /// [`DedupStore::quarantine_pending`]).
    pub fn process(&self, candidate: &Batch) -> Result<Batch, StoreError> {
        let mut table = self.lock();
        let delta = diff_against(&table, candidate);

        if delta.is_empty() {
            debug!(candidates = candidate.len(), "no new listings");
            return Ok(delta);
        }

        let existing = self.backend.load_pending().inspect_err(|e| {
            tracing::error!(error = %e, "pending delta unreadable; refusing to accept new listings");
        })?;
        self.merge_locked(&mut table, &delta)?;
        self.record_pending(existing, &delta);

        info!(
            candidates = candidate.len(),
            new = delta.len(),
            total = table.len(),
            "new listings accepted"
        );
        Ok(delta)
    }

    fn merge_locked(&self, table: &mut Batch, delta: &Batch) -> Result<MergeOutcome, StoreError> {
        if delta.is_empty() {
            return Ok(MergeOutcome::NothingWritten);
        }

        let mut next = table.clone();
        let mut added = 0;
        let mut replaced = 0;
        for (id, record) in delta {
            if next.insert(id.clone(), record.clone()).is_some() {
                replaced += 1;
            } else {
                added += 1;
            }
        }

        if let Err(e) = self.backend.save_table(&next) {
            warn!(location = %self.backend.location(), error = %e, "table write failed; keeping previous version");
            return Err(e);
        }
        *table = next;

        debug!(added, replaced, total = table.len(), "listing table persisted");
        Ok(MergeOutcome::Written {
            added,
            replaced,
            total: table.len(),
        })
    }

    /// Called with the table lock held. The table write already committed,
    /// so a failure here is logged rather than surfaced.
    fn record_pending(&self, existing: Option<PendingDelta>, delta: &Batch) {
        let pending = match existing {
            Some(mut existing) => {
                existing.absorb(delta);
                existing
            }
            None => PendingDelta::new(delta.clone()),
        };
        if let Err(e) = self.backend.save_pending(&pending) {
            warn!(error = %e, pending = pending.len(), "failed to record pending delta");
        }
    }
}

fn diff_against(table: &Batch, candidate: &Batch) -> Batch {
    candidate
        .iter()
        .filter(|(id, _)| !table.contains_key(*id))
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect()
}
