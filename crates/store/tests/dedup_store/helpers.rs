use std::path::Path;

use vacancy_core::config::StorageConfig;
use vacancy_core::{record, Batch};
use vacancy_store::DedupStore;

pub fn make_config(data_dir: &Path) -> StorageConfig {
    StorageConfig {
        data_dir: data_dir.to_path_buf(),
        table_file: "vacancies.json".to_string(),
        pending_file: "new_vacancies.json".to_string(),
        subscribers_file: "subscribers.json".to_string(),
    }
}

pub fn open(data_dir: &Path) -> DedupStore {
    DedupStore::open(&make_config(data_dir)).unwrap()
}

/// Batch of listings with only a title field.
pub fn titled(entries: &[(&str, &str)]) -> Batch {
    entries
        .iter()
        .map(|(id, title)| (id.to_string(), record([("title", *title)])))
        .collect()
}

/// Batch with generated titles for the given numeric id range.
pub fn numbered(ids: std::ops::Range<u32>) -> Batch {
    ids.map(|i| (i.to_string(), record([("title", format!("Vacancy {i}"))])))
        .collect()
}
