use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use crate::helpers::{numbered, open, titled};

#[test]
fn reprocessing_same_batch_yields_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    store.process(&numbered(0..5)).unwrap();

    let batch = numbered(3..10);
    let first = store.process(&batch).unwrap();
    let second = store.process(&batch).unwrap();

    assert_eq!(first, numbered(5..10));
    assert!(second.is_empty());
}

#[test]
fn merge_never_loses_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    store.process(&numbered(0..20)).unwrap();
    let before: BTreeSet<String> = store.snapshot().into_keys().collect();

    let delta = titled(&[("100", "A"), ("3", "replaced")]);
    store.merge(&delta).unwrap();

    let after = store.snapshot();
    for id in &before {
        assert!(after.contains_key(id), "lost {id}");
    }
    for (id, record) in &delta {
        assert_eq!(&after[id], record);
    }
}

#[test]
fn diff_partitions_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    store.process(&numbered(0..30)).unwrap();
    let table: BTreeSet<String> = store.snapshot().into_keys().collect();

    let batch = numbered(25..40);
    let batch_ids: BTreeSet<String> = batch.keys().cloned().collect();
    let delta_ids: BTreeSet<String> = store.diff(&batch).into_keys().collect();

    assert!(delta_ids.is_disjoint(&table));
    let known: BTreeSet<String> = table.intersection(&batch_ids).cloned().collect();
    let union: BTreeSet<String> = delta_ids.union(&known).cloned().collect();
    assert_eq!(union, batch_ids);
    assert_eq!(delta_ids.len(), 10);
}

#[test]
fn overlapping_concurrent_batches_report_each_id_once() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(open(tmp.path()));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let store = Arc::clone(&store);
            // Neighbouring workers share half their IDs.
            let start = worker * 10;
            thread::spawn(move || store.process(&numbered(start..start + 20)).unwrap())
        })
        .collect();

    let mut reported = Vec::new();
    for handle in handles {
        reported.extend(handle.join().unwrap().into_keys());
    }

    let unique: BTreeSet<&String> = reported.iter().collect();
    assert_eq!(unique.len(), reported.len(), "an ID was reported twice");
    assert_eq!(reported.len(), 90);
    assert_eq!(store.len(), 90);
}
