use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use vacancy_core::config::StorageConfig;
use vacancy_core::{Batch, ListingId};

use super::DedupStore;
use crate::backend::{JsonFileBackend, TableBackend};
use crate::error::StoreError;
use crate::pending::{PendingDelta, Receipts};

impl DedupStore {
    // ── Read-only views ─────────────────────────────────────────

    /// Read the persisted table without opening a store.
    ///
    /// Safe to call while another process owns the store: nothing is
    /// written, no temp file is removed, and a missing table reads as empty.
    pub fn read_snapshot(config: &StorageConfig) -> Result<Batch, StoreError> {
        let backend = JsonFileBackend::at(config.table_path(), config.pending_path());
        Ok(backend.load_table()?.unwrap_or_default())
    }

    /// Copy of the full table for exports and inspection. Changes to the
    /// copy never reach the store.
    pub fn snapshot(&self) -> Batch {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Where the table is persisted.
    pub fn location(&self) -> String {
        self.backend.location()
    }

    // ── Pending delta ───────────────────────────────────────────

    /// The undelivered delta, if any.
    pub fn pending(&self) -> Result<Option<PendingDelta>, StoreError> {
        let _table = self.lock();
        self.backend.load_pending()
    }

    /// Drop the `settled` listings from the pending delta and record
    /// `receipts` for the ones still owed to someone, in one write. Only the
    /// named listings are dropped, so a delta recorded after `pending()` was
    /// read is kept.
    pub fn settle_pending<'a>(
        &self,
        settled: impl IntoIterator<Item = &'a ListingId>,
        receipts: &Receipts,
    ) -> Result<(), StoreError> {
        let _table = self.lock();
        let Some(mut pending) = self.backend.load_pending()? else {
            return Ok(());
        };
        pending.remove_settled(settled);
        pending.record_sent(receipts);
        if pending.is_empty() {
            self.backend.clear_pending()
        } else {
            self.backend.save_pending(&pending)
        }
    }

    // ── Operator recovery ───────────────────────────────────────

    /// Move a table file aside as `<name>.corrupt-<timestamp>` so the next
    /// [`open`](Self::open) starts from an empty table. Returns the new
    /// location, or `None` when there was no table file.
    ///
    /// Never called automatically: a corrupt table stops the worker until an
    /// operator decides.
    pub fn quarantine(config: &StorageConfig) -> Result<Option<PathBuf>, StoreError> {
        quarantine_file(&config.table_path())
    }

    /// Same as [`quarantine`](Self::quarantine) for the pending delta file.
    /// The listings it held stay in the table and will not be notified.
    pub fn quarantine_pending(config: &StorageConfig) -> Result<Option<PathBuf>, StoreError> {
        quarantine_file(&config.pending_path())
    }
}

fn quarantine_file(path: &Path) -> Result<Option<PathBuf>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let ts = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = path.with_file_name(format!("{}.corrupt-{}", name, ts));
    fs::rename(path, &target).map_err(|source| StoreError::Write {
        path: target.clone(),
        source,
    })?;
    info!(from = %path.display(), to = %target.display(), "file quarantined");
    Ok(Some(target))
}
