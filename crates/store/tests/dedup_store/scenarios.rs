use std::sync::Arc;
use std::thread;

use vacancy_core::Batch;

use crate::helpers::{make_config, open, titled};

#[test]
fn empty_table_accepts_whole_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());

    let delta = store.process(&titled(&[("1", "X"), ("2", "Y")])).unwrap();

    assert_eq!(delta, titled(&[("1", "X"), ("2", "Y")]));
    assert_eq!(store.len(), 2);
}

#[test]
fn known_listing_is_filtered_out() {
    let tmp = tempfile::tempdir().unwrap();
    let store = open(tmp.path());
    store.process(&titled(&[("1", "X")])).unwrap();

    let delta = store.process(&titled(&[("1", "X again"), ("3", "Z")])).unwrap();

    assert_eq!(delta, titled(&[("3", "Z")]));
    assert_eq!(store.len(), 2);
    assert!(store.contains("1"));
    assert!(store.contains("3"));
    // The dedup path never overwrites an existing record.
    assert_eq!(store.snapshot()["1"]["title"].as_str(), Some("X"));
}

#[test]
fn empty_batch_touches_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let config = make_config(tmp.path());
    let store = open(tmp.path());
    store.process(&titled(&[("1", "X")])).unwrap();

    let before = std::fs::read(config.table_path()).unwrap();
    let modified = std::fs::metadata(config.table_path()).unwrap().modified().unwrap();

    let delta = store.process(&Batch::new()).unwrap();

    assert!(delta.is_empty());
    assert_eq!(std::fs::read(config.table_path()).unwrap(), before);
    assert_eq!(
        std::fs::metadata(config.table_path()).unwrap().modified().unwrap(),
        modified
    );
}

#[test]
fn concurrent_callers_both_land() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(open(tmp.path()));
    store.process(&titled(&[("1", "X"), ("2", "Y")])).unwrap();

    let handles: Vec<_> = [("5", "Five"), ("6", "Six")]
        .into_iter()
        .map(|(id, title)| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.process(&titled(&[(id, title)])).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().len(), 1);
    }

    let ids: Vec<String> = store.snapshot().into_keys().collect();
    assert_eq!(ids, vec!["1", "2", "5", "6"]);

    // Disk holds both as well.
    drop(store);
    let reopened = open(tmp.path());
    assert_eq!(reopened.len(), 4);
}

#[test]
fn table_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let store = open(tmp.path());
        store.process(&titled(&[("10", "Cook"), ("11", "Driver")])).unwrap();
    }
    let store = open(tmp.path());
    assert_eq!(store.len(), 2);
    assert!(store.process(&titled(&[("10", "Cook")])).unwrap().is_empty());
}
