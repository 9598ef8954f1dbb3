//! Persistence backends for the listing table.
//!
//! The JSON backend writes every file through [`JsonFileBackend::write_atomic`]:
//! serialize, write a uniquely named sibling temp file, fsync, rename over
//! the target. A reader therefore sees either the old file or the new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use vacancy_core::config::StorageConfig;
use vacancy_core::Batch;

use crate::error::StoreError;
use crate::pending::PendingDelta;

/// Stable storage behind a [`DedupStore`](crate::DedupStore).
///
/// Only the store calls these methods, always under its lock.
pub trait TableBackend: Send + Sync {
    /// Load the persisted table; `Ok(None)` when nothing was persisted yet.
    fn load_table(&self) -> Result<Option<Batch>, StoreError>;

    /// Replace the persisted table atomically.
    fn save_table(&self, table: &Batch) -> Result<(), StoreError>;

    fn load_pending(&self) -> Result<Option<PendingDelta>, StoreError>;

    fn save_pending(&self, pending: &PendingDelta) -> Result<(), StoreError>;

    fn clear_pending(&self) -> Result<(), StoreError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

/// Filesystem backend holding pretty-printed JSON files:
/// ```text
/// data/
///   vacancies.json        <- every listing ever accepted
///   new_vacancies.json    <- most recent undelivered delta (optional)
/// ```
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    table_path: PathBuf,
    pending_path: PathBuf,
}

impl JsonFileBackend {
    /// Create the backend, ensuring the data directory exists and clearing
    /// temp files left behind by an interrupted write.
    pub fn new(config: &StorageConfig) -> Result<Self, StoreError> {
        Self::from_paths(config.table_path(), config.pending_path())
    }

    pub fn from_paths(
        table_path: impl Into<PathBuf>,
        pending_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let backend = Self::at(table_path, pending_path);
        for path in [&backend.table_path, &backend.pending_path] {
            if let Some(dir) = parent_dir(path) {
                fs::create_dir_all(dir).map_err(|source| StoreError::Write {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            remove_stray_temps(path);
        }
        Ok(backend)
    }

    /// Point at the files without touching the disk. Used by readers that
    /// run next to a live worker: they must not sweep its in-flight temp
    /// files or create a table it has not written yet.
    pub fn at(table_path: impl Into<PathBuf>, pending_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
            pending_path: pending_path.into(),
        }
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    /// Serialize `value` and atomically replace `path` with it.
    pub fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(value)?;
        let tmp = Self::write_temp(path, &json)?;
        if let Err(e) = Self::commit(&tmp, path) {
            fs::remove_file(&tmp).ok();
            return Err(e);
        }
        Ok(())
    }

    /// First half of an atomic replace: durable bytes in a sibling temp file.
    pub(crate) fn write_temp(path: &Path, bytes: &[u8]) -> Result<PathBuf, StoreError> {
        let tmp = temp_path(path);
        let write = |tmp: &Path| -> std::io::Result<()> {
            let mut file = File::create(tmp)?;
            file.write_all(bytes)?;
            file.sync_all()
        };
        if let Err(source) = write(&tmp) {
            fs::remove_file(&tmp).ok();
            return Err(StoreError::Write { path: tmp, source });
        }
        Ok(tmp)
    }

    /// Second half: rename the temp file over the target.
    pub(crate) fn commit(tmp: &Path, path: &Path) -> Result<(), StoreError> {
        fs::rename(tmp, path).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        // Persist the rename itself. Not supported on every platform.
        if let Some(dir) = parent_dir(path) {
            if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
                debug!(dir = %dir.display(), error = %e, "directory fsync skipped");
            }
        }
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl TableBackend for JsonFileBackend {
    fn load_table(&self) -> Result<Option<Batch>, StoreError> {
        Self::read_json(&self.table_path)
    }

    fn save_table(&self, table: &Batch) -> Result<(), StoreError> {
        Self::write_atomic(&self.table_path, table)
    }

    fn load_pending(&self) -> Result<Option<PendingDelta>, StoreError> {
        Self::read_json(&self.pending_path)
    }

    fn save_pending(&self, pending: &PendingDelta) -> Result<(), StoreError> {
        Self::write_atomic(&self.pending_path, pending)
    }

    fn clear_pending(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.pending_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Write {
                path: self.pending_path.clone(),
                source,
            }),
        }
    }

    fn location(&self) -> String {
        self.table_path.display().to_string()
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `.vacancies.json.<uuid>.tmp` next to the target.
fn temp_path(path: &Path) -> PathBuf {
    let name = format!(".{}.{}.tmp", file_name(path), Uuid::new_v4().simple());
    match parent_dir(path) {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

fn is_temp_for(candidate: &str, target: &str) -> bool {
    candidate
        .strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(target))
        .and_then(|rest| rest.strip_prefix('.'))
        .is_some_and(|rest| rest.ends_with(".tmp"))
}

fn remove_stray_temps(path: &Path) {
    let target = file_name(path);
    let dir = parent_dir(path).unwrap_or(Path::new("."));
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        if is_temp_for(&name.to_string_lossy(), &target) {
            match fs::remove_file(entry.path()) {
                Ok(()) => warn!(file = %entry.path().display(), "removed temp file from interrupted write"),
                Err(e) => warn!(file = %entry.path().display(), error = %e, "could not remove stray temp file"),
            }
        }
    }
}
