//! Concurrency integration tests.
//!
//! Exercise the single-writer/many-reader discipline and the merge engine
//! under live traffic: disjoint-key counters incremented from many threads
//! while merges run, a single hot key pounded through merges and a reopen,
//! and readers probing for torn values during sustained writes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kvdb::{DataStore, StoreConfig, StoreError};
use tempfile::TempDir;

/// Config with a small rotation threshold so merges always have immutable
/// files to chew on.
fn churny_config() -> StoreConfig {
    StoreConfig {
        max_datafile_size: 4096,
        ..StoreConfig::default()
    }
}

/// Spawn a background thread that merges in a loop until `stop` is set.
fn merge_loop(store: Arc<DataStore>, stop: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            store.merge().expect("merge");
            thread::sleep(Duration::from_millis(50));
        }
    })
}

#[test]
fn concurrent_counters_on_disjoint_keys_with_merges() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        DataStore::create_with_config(tmp.path().join("store"), churny_config()).unwrap(),
    );

    // Initialize counter_1..counter_20 to 0 (4-byte little-endian i32).
    for i in 1..=20 {
        store
            .put(format!("counter_{i}").as_bytes(), &0i32.to_le_bytes())
            .unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let merger = merge_loop(Arc::clone(&store), Arc::clone(&stop));

    let workers: Vec<_> = (1..=20)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let key = format!("counter_{i}");
                for _ in 0..500 {
                    let raw = store.get(key.as_bytes()).expect("get");
                    let current = i32::from_le_bytes(raw.try_into().expect("4 bytes"));
                    store
                        .put(key.as_bytes(), &(current + 1).to_le_bytes())
                        .expect("put");
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    merger.join().unwrap();

    let mut sum = 0i64;
    for i in 1..=20 {
        let raw = store.get(format!("counter_{i}").as_bytes()).unwrap();
        let value = i32::from_le_bytes(raw.try_into().unwrap());
        assert_eq!(value, 500, "counter_{i} lost increments");
        sum += i64::from(value);
    }
    assert_eq!(sum, 10_000);
    store.close().unwrap();
}

#[test]
fn repeated_updates_to_one_key_through_merges_and_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("store");

    let store = DataStore::create_with_config(
        &path,
        StoreConfig {
            max_datafile_size: 64 * 1024,
            ..StoreConfig::default()
        },
    )
    .unwrap();

    store.put(b"counter", b"0").unwrap();
    let increment = |store: &DataStore, rounds: u64| {
        for _ in 0..rounds {
            let raw = store.get(b"counter").unwrap();
            let current: u64 = String::from_utf8(raw).unwrap().parse().unwrap();
            store
                .put(b"counter", (current + 1).to_string().as_bytes())
                .unwrap();
        }
    };

    increment(&store, 100_000);
    store.merge().unwrap();
    increment(&store, 25_000);
    store.merge().unwrap();
    store.close().unwrap();
    drop(store);

    let store = DataStore::open(&path).unwrap();
    assert_eq!(store.get(b"counter").unwrap(), b"125000");
    assert_eq!(store.size().unwrap(), 1);
    store.close().unwrap();
}

#[test]
fn readers_never_observe_torn_values() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        DataStore::create_with_config(tmp.path().join("store"), churny_config()).unwrap(),
    );

    // Every generation of the value is 100 identical bytes, so any mix of
    // two generations is detectable.
    store.put(b"shared", &[0u8; 100]).unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut reads = 0u64;
                while !stop.load(Ordering::SeqCst) {
                    let value = store.get(b"shared").expect("get");
                    assert_eq!(value.len(), 100);
                    assert!(
                        value.iter().all(|&b| b == value[0]),
                        "torn value observed"
                    );
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    let merger = merge_loop(Arc::clone(&store), Arc::clone(&stop));

    for generation in 0..2000u32 {
        store.put(b"shared", &[(generation % 251) as u8; 100]).unwrap();
    }

    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    merger.join().unwrap();

    let last = store.get(b"shared").unwrap();
    assert_eq!(last, vec![(1999 % 251) as u8; 100]);
    store.close().unwrap();
}

#[test]
fn writers_on_distinct_keys_all_land() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        DataStore::create_with_config(tmp.path().join("store"), churny_config()).unwrap(),
    );

    let writers: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..250 {
                    store
                        .put(
                            format!("t{t}_key_{i}").as_bytes(),
                            format!("t{t}_value_{i}").as_bytes(),
                        )
                        .expect("put");
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(store.size().unwrap(), 8 * 250);
    for t in 0..8 {
        for i in (0..250).step_by(49) {
            assert_eq!(
                store.get(format!("t{t}_key_{i}").as_bytes()).unwrap(),
                format!("t{t}_value_{i}").as_bytes()
            );
        }
    }

    // A final merge after the dust settles must not change anything.
    store.merge().unwrap();
    assert_eq!(store.size().unwrap(), 8 * 250);
    store.close().unwrap();
}

#[test]
fn deletes_racing_a_merge_stay_deleted() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        DataStore::create_with_config(tmp.path().join("store"), churny_config()).unwrap(),
    );

    for i in 0..500 {
        store
            .put(format!("key_{i}").as_bytes(), format!("value_{i}").as_bytes())
            .unwrap();
    }

    // One thread deletes half the keys while merges run concurrently.
    let stop = Arc::new(AtomicBool::new(false));
    let merger = merge_loop(Arc::clone(&store), Arc::clone(&stop));
    {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in (0..500).step_by(2) {
                store.delete(format!("key_{i}").as_bytes()).expect("delete");
            }
        })
        .join()
        .unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    merger.join().unwrap();

    for i in 0..500 {
        let result = store.get(format!("key_{i}").as_bytes());
        if i % 2 == 0 {
            assert!(matches!(result.unwrap_err(), StoreError::KeyNotFound));
        } else {
            assert_eq!(result.unwrap(), format!("value_{i}").as_bytes());
        }
    }
    assert_eq!(store.size().unwrap(), 250);
    store.close().unwrap();
}
