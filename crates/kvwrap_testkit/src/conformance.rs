//! Engine conformance suite.
//!
//! Each check takes a fresh fixture and panics on the first violated
//! expectation. [`run_all`] runs every check against one engine
//! configuration; engines are expected to pass it under every capability
//! mask, since the facade fills in what an engine leaves out.

use crate::fixtures::{EngineKind, TestDatabase};
use kvwrap_core::{
    Capabilities, Database, DbError, DbResult, StoreMode, TransactionState, TraverseControl,
};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a contender must stay blocked before it counts as waiting.
const BLOCK_WINDOW: Duration = Duration::from_millis(50);

/// A check in the suite.
pub type Check = fn(TestDatabase);

/// Every check, by name.
#[must_use]
pub fn checks() -> Vec<(&'static str, Check)> {
    vec![
        ("store_then_fetch", check_store_then_fetch as Check),
        ("delete_then_absent", check_delete_then_absent),
        ("wipe_empties", check_wipe_empties),
        ("cancel_restores", check_cancel_restores),
        ("commit_survives_reopen", check_commit_survives_reopen),
        ("locked_fetch_is_exclusive", check_locked_fetch_is_exclusive),
        ("traverse_read_concurrent_store", check_traverse_read_concurrent_store),
        ("traverse_read_ignores_held_lock", check_traverse_read_ignores_held_lock),
        ("wipe_concurrent_with_traversal", check_wipe_concurrent_with_traversal),
        ("password_scenario", check_password_scenario),
        ("wipe_scenario", check_wipe_scenario),
        ("record_guard_rules", check_record_guard_rules),
        ("optional_ops_agree", check_optional_ops_agree),
        ("traverse_stop_and_mutate", check_traverse_stop_and_mutate),
        ("transaction_state_machine", check_transaction_state_machine),
        ("transaction_isolation", check_transaction_isolation),
        ("seqnum_monotonic", check_seqnum_monotonic),
        ("u32_counters", check_u32_counters),
    ]
}

/// Runs every check against fresh databases on `kind`.
pub fn run_all(kind: EngineKind) {
    for (name, check) in checks() {
        eprintln!("conformance: {kind} / {name}");
        check(TestDatabase::open(kind));
    }
}

fn sample_records() -> Vec<(Vec<u8>, Vec<u8>)> {
    vec![
        (b"alice".to_vec(), b"pw1".to_vec()),
        (b"empty".to_vec(), Vec::new()),
        (vec![0, 1, 2, 255], vec![0; 300]),
        (b"k\0with\0nul".to_vec(), b"v\0".to_vec()),
        (vec![b'x'; 200], b"long key".to_vec()),
    ]
}

fn count_locked(db: &Database) -> usize {
    db.traverse(|_| Ok(TraverseControl::Continue))
        .expect("traverse failed")
}

fn collect_read(db: &Database) -> HashMap<Vec<u8>, Vec<u8>> {
    let mut seen = HashMap::new();
    db.traverse_read(|key, value| {
        assert!(
            seen.insert(key.to_vec(), value.to_vec()).is_none(),
            "key visited twice in one pass"
        );
        Ok(TraverseControl::Continue)
    })
    .expect("traverse_read failed");
    seen
}

/// `store(K, V, Replace)` then `fetch(K)` returns V exactly.
pub fn check_store_then_fetch(db: TestDatabase) {
    for (key, value) in sample_records() {
        db.store(&key, &value, StoreMode::Replace).unwrap();
        assert_eq!(db.fetch(&key).unwrap(), Some(value));
    }
}

/// `delete(K)` then `fetch(K)` is absent.
pub fn check_delete_then_absent(db: TestDatabase) {
    for (key, value) in sample_records() {
        db.store(&key, &value, StoreMode::Insert).unwrap();
        db.delete(&key).unwrap();
        assert_eq!(db.fetch(&key).unwrap(), None);
        assert!(!db.exists(&key).unwrap());
        assert!(matches!(db.delete(&key), Err(DbError::NotFound)));
    }
}

/// `wipe()` leaves nothing to traverse and advances a non-empty database's
/// counter.
pub fn check_wipe_empties(db: TestDatabase) {
    let before = db.get_seqnum().unwrap();
    db.wipe().unwrap();
    assert_eq!(db.get_seqnum().unwrap(), before, "empty wipe changed seqnum");

    for (key, value) in sample_records() {
        db.store(&key, &value, StoreMode::Insert).unwrap();
    }
    let before = db.get_seqnum().unwrap();
    db.wipe().unwrap();
    assert_eq!(count_locked(&db), 0);
    assert!(collect_read(&db).is_empty());
    assert!(db.get_seqnum().unwrap() > before);
}

/// A cancelled store leaves the previous value, or absence, in place.
pub fn check_cancel_restores(db: TestDatabase) {
    db.store(b"present", b"old", StoreMode::Insert).unwrap();
    let seq = db.get_seqnum().unwrap();

    db.transaction_start().unwrap();
    db.store(b"present", b"new", StoreMode::Replace).unwrap();
    db.store(b"absent", b"new", StoreMode::Replace).unwrap();
    db.transaction_cancel().unwrap();

    assert_eq!(db.fetch(b"present").unwrap(), Some(b"old".to_vec()));
    assert_eq!(db.fetch(b"absent").unwrap(), None);
    assert_eq!(db.get_seqnum().unwrap(), seq);
}

/// A committed store is visible, and still visible after reopening.
pub fn check_commit_survives_reopen(db: TestDatabase) {
    db.transaction_start().unwrap();
    db.store(b"k", b"committed", StoreMode::Replace).unwrap();
    db.transaction_commit().unwrap();
    assert_eq!(db.fetch(b"k").unwrap(), Some(b"committed".to_vec()));

    let db = db.reopen();
    assert_eq!(db.fetch(b"k").unwrap(), Some(b"committed".to_vec()));
}

/// A second locker on another handle waits for, or is refused, the first
/// holder's lock, and then sees what the holder stored.
pub fn check_locked_fetch_is_exclusive(db: TestDatabase) {
    let other = db.second_handle();
    let nonblocking = other.get_flags().contains(Capabilities::NONBLOCKING_LOCK);

    if nonblocking {
        other.try_fetch_locked(b"k").unwrap().release();
    }

    let mut held = db.fetch_locked(b"k").unwrap();

    if nonblocking {
        assert!(matches!(other.try_fetch_locked(b"k"), Err(DbError::WouldBlock)));
    } else {
        assert!(matches!(
            other.try_fetch_locked(b"k"),
            Err(DbError::Unsupported { .. })
        ));
    }

    let other = &other;
    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        let waiter = s.spawn(move || {
            let record = other.fetch_locked(b"k").unwrap();
            tx.send(()).unwrap();
            record.value().map(<[u8]>::to_vec)
        });

        assert!(
            rx.recv_timeout(BLOCK_WINDOW).is_err(),
            "second locker did not wait"
        );
        held.store(b"from-holder", StoreMode::Insert).unwrap();
        held.release();

        let seen = waiter.join().unwrap();
        assert_eq!(seen, Some(b"from-holder".to_vec()));
    });
}

/// A read-only pass racing a store of a new key sees it once with its
/// value, or not at all.
pub fn check_traverse_read_concurrent_store(db: TestDatabase) {
    let other = db.second_handle();
    for n in 0..50u32 {
        db.store(&n.to_le_bytes(), b"base", StoreMode::Insert).unwrap();
    }

    for round in 0..10u32 {
        let new_key = format!("late-{round}").into_bytes();
        let seen = thread::scope(|s| {
            let reader = s.spawn(|| collect_read(&db));
            other.store(&new_key, b"late", StoreMode::Insert).unwrap();
            reader.join().unwrap()
        });
        if let Some(value) = seen.get(&new_key) {
            assert_eq!(value, b"late");
        }
        assert!(seen.len() >= 50);
    }
}

/// A read-only pass finishes while another handle holds a record, and
/// sees every record nobody holds.
pub fn check_traverse_read_ignores_held_lock(db: TestDatabase) {
    let other = db.second_handle();
    db.store(b"a", b"1", StoreMode::Insert).unwrap();
    db.store(b"b", b"2", StoreMode::Insert).unwrap();
    db.store(b"held", b"3", StoreMode::Insert).unwrap();
    let held = other.fetch_locked(b"held").unwrap();

    let db = &db;
    let seen = thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        s.spawn(move || tx.send(collect_read(db)).unwrap());
        let seen = rx.recv_timeout(Duration::from_secs(10));
        held.release();
        seen
    })
    .expect("read-only traversal waited on a held record");

    assert_eq!(seen.get(&b"a"[..]), Some(&b"1".to_vec()));
    assert_eq!(seen.get(&b"b"[..]), Some(&b"2".to_vec()));
    // Engines reading a snapshot report the held record; the lock-based
    // pass leaves it out.
    if let Some(value) = seen.get(&b"held"[..]) {
        assert_eq!(value, b"3");
    }
    assert!(seen.len() <= 3);
}

/// A wipe racing both traversals fails neither of them, never shows a
/// key twice, and leaves nothing behind.
pub fn check_wipe_concurrent_with_traversal(db: TestDatabase) {
    let other = db.second_handle();
    for round in 0..5u32 {
        let tag = round.to_le_bytes();
        for n in 0..40u32 {
            db.store(&n.to_le_bytes(), &tag, StoreMode::Replace).unwrap();
        }

        thread::scope(|s| {
            let reader = s.spawn(|| collect_read(&db));
            let locker = s.spawn(|| {
                let mut keys = HashSet::new();
                db.traverse(|record| {
                    assert!(keys.insert(record.key().to_vec()), "key visited twice");
                    assert_eq!(record.value(), Some(&tag[..]));
                    Ok(TraverseControl::Continue)
                })
                .unwrap()
            });
            other.wipe().unwrap();

            let read = reader.join().unwrap();
            assert!(read.len() <= 40);
            assert!(read.values().all(|value| value[..] == tag[..]));
            assert!(locker.join().unwrap() <= 40);
        });

        assert_eq!(count_locked(&db), 0);
        assert!(collect_read(&db).is_empty());
    }
}

/// The password replacement scenario.
pub fn check_password_scenario(db: TestDatabase) {
    db.store(b"alice", b"pw1", StoreMode::Replace).unwrap();
    assert_eq!(db.fetch(b"alice").unwrap(), Some(b"pw1".to_vec()));
    db.store(b"alice", b"pw2", StoreMode::Replace).unwrap();
    assert_eq!(db.fetch(b"alice").unwrap(), Some(b"pw2".to_vec()));
    assert!(matches!(
        db.store(b"alice", b"pw3", StoreMode::Insert),
        Err(DbError::AlreadyExists)
    ));
    assert_eq!(db.fetch(b"alice").unwrap(), Some(b"pw2".to_vec()));
}

/// Two inserts, a wipe, and nothing left.
pub fn check_wipe_scenario(db: TestDatabase) {
    db.store(b"a", b"1", StoreMode::Insert).unwrap();
    db.store(b"b", b"2", StoreMode::Insert).unwrap();
    db.wipe().unwrap();
    assert_eq!(count_locked(&db), 0);
    assert_eq!(db.fetch(b"a").unwrap(), None);
}

/// Insert, delete and re-create through one guard.
pub fn check_record_guard_rules(db: TestDatabase) {
    let mut record = db.fetch_locked(b"g").unwrap();
    assert!(!record.exists());
    assert!(matches!(record.delete(), Err(DbError::NotFound)));
    record.store(b"1", StoreMode::Insert).unwrap();
    assert!(matches!(
        record.store(b"2", StoreMode::Insert),
        Err(DbError::AlreadyExists)
    ));
    record.delete().unwrap();
    assert!(matches!(record.delete(), Err(DbError::AlreadyDeleted)));
    record.store(b"3", StoreMode::Insert).unwrap();
    assert_eq!(record.value(), Some(&b"3"[..]));
    record.release();

    assert_eq!(db.fetch(b"g").unwrap(), Some(b"3".to_vec()));
}

/// Optional operations, native or not, agree with the primitives.
pub fn check_optional_ops_agree(db: TestDatabase) {
    let records = sample_records();
    for (key, value) in &records {
        db.store(key, value, StoreMode::Insert).unwrap();
    }

    for (key, value) in &records {
        let locked = db.fetch_locked(key).unwrap();
        let via_lock = locked.value().map(<[u8]>::to_vec);
        locked.release();

        assert_eq!(db.fetch(key).unwrap(), via_lock);
        assert!(db.exists(key).unwrap());
        let parsed = db
            .parse_record(key, |k, v| (k.to_vec(), v.to_vec()))
            .unwrap();
        assert_eq!(parsed, (key.clone(), value.clone()));
    }
    assert!(matches!(
        db.parse_record(b"missing", |_, _| ()),
        Err(DbError::NotFound)
    ));

    let mut locked_view = HashMap::new();
    db.traverse(|record| {
        let value = record.value().map(<[u8]>::to_vec).unwrap_or_default();
        locked_view.insert(record.key().to_vec(), value);
        Ok(TraverseControl::Continue)
    })
    .unwrap();
    assert_eq!(collect_read(&db), locked_view);
    assert_eq!(locked_view.len(), records.len());
}

/// Stop halts traversal at once; records can be rewritten during it.
pub fn check_traverse_stop_and_mutate(db: TestDatabase) {
    for n in 0..20u8 {
        db.store(&[n], &[n], StoreMode::Insert).unwrap();
    }

    let mut calls = 0;
    let visited = db
        .traverse(|_| {
            calls += 1;
            Ok(if calls == 5 {
                TraverseControl::Stop
            } else {
                TraverseControl::Continue
            })
        })
        .unwrap();
    assert_eq!((visited, calls), (5, 5));

    let read = db.traverse_read(|_, _| Ok(TraverseControl::Stop)).unwrap();
    assert_eq!(read, 1);

    db.traverse(|record| {
        let key = record.key()[0];
        if key % 2 == 0 {
            record.delete()?;
        } else {
            record.store(&[key, key], StoreMode::Replace)?;
        }
        Ok(TraverseControl::Continue)
    })
    .unwrap();

    let remaining = collect_read(&db);
    assert_eq!(remaining.len(), 10);
    for (key, value) in remaining {
        assert_eq!(key[0] % 2, 1);
        assert_eq!(value, vec![key[0], key[0]]);
    }

    let failed: DbResult<usize> = db.traverse(|_| Err(DbError::invalid_value("stop here")));
    assert!(matches!(failed, Err(DbError::InvalidValue { .. })));
    db.store(&[1], b"after", StoreMode::Replace).unwrap();
}

/// Start, commit and cancel follow the `Idle`/`Active` machine.
pub fn check_transaction_state_machine(db: TestDatabase) {
    assert!(matches!(db.transaction_commit(), Err(DbError::InvalidState { .. })));
    assert!(matches!(db.transaction_cancel(), Err(DbError::InvalidState { .. })));

    db.transaction_start().unwrap();
    assert_eq!(db.transaction_state(), TransactionState::Active);
    assert!(matches!(db.transaction_start(), Err(DbError::InvalidState { .. })));
    db.transaction_commit().unwrap();
    assert_eq!(db.transaction_state(), TransactionState::Idle);

    let result: DbResult<()> = db.transaction(|db| {
        db.store(b"t", b"1", StoreMode::Insert)?;
        Err(DbError::invalid_value("abort"))
    });
    assert!(result.is_err());
    assert_eq!(db.fetch(b"t").unwrap(), None);

    db.trans_store(b"t", b"2", StoreMode::Insert).unwrap();
    assert_eq!(db.fetch(b"t").unwrap(), Some(b"2".to_vec()));
}

/// Uncommitted writes stay private to their handle; a dropped handle
/// cancels.
pub fn check_transaction_isolation(db: TestDatabase) {
    let other = db.second_handle();
    db.transaction_start().unwrap();
    db.store(b"iso", b"v", StoreMode::Insert).unwrap();
    assert!(db.exists(b"iso").unwrap());
    assert!(!other.exists(b"iso").unwrap());
    assert_eq!(other.fetch(b"iso").unwrap(), None);
    db.transaction_commit().unwrap();
    assert_eq!(other.fetch(b"iso").unwrap(), Some(b"v".to_vec()));

    {
        let doomed = db.second_handle();
        doomed.transaction_start().unwrap();
        doomed.store(b"doomed", b"v", StoreMode::Insert).unwrap();
    }
    assert_eq!(other.fetch(b"doomed").unwrap(), None);
}

/// Every mutation advances the counter; reads and cancels do not.
pub fn check_seqnum_monotonic(test_db: TestDatabase) {
    let db: &Database = &test_db;
    let mut last = db.get_seqnum().unwrap();
    let mut advance = |db: &Database, changed: bool| {
        let now = db.get_seqnum().unwrap();
        if changed {
            assert!(now > last, "seqnum did not advance: {last} -> {now}");
        } else {
            assert_eq!(now, last);
        }
        last = now;
    };

    db.store(b"a", b"1", StoreMode::Insert).unwrap();
    advance(db, true);
    db.store(b"a", b"2", StoreMode::Replace).unwrap();
    advance(db, true);
    db.fetch(b"a").unwrap();
    collect_read(db);
    advance(db, false);
    db.delete(b"a").unwrap();
    advance(db, true);

    db.transaction_start().unwrap();
    db.store(b"b", b"1", StoreMode::Insert).unwrap();
    db.transaction_cancel().unwrap();
    advance(db, false);

    db.transaction(|db| {
        db.store(b"b", b"1", StoreMode::Insert)?;
        db.store(b"c", b"1", StoreMode::Insert)
    })
    .unwrap();
    advance(db, true);
}

/// The little-endian `u32` helpers.
pub fn check_u32_counters(db: TestDatabase) {
    assert!(matches!(db.fetch_u32(b"n"), Err(DbError::NotFound)));
    assert_eq!(db.change_u32_atomic(b"n", 3).unwrap(), 3);
    assert_eq!(db.change_u32_atomic(b"n", -1).unwrap(), 2);
    assert_eq!(db.fetch_u32(b"n").unwrap(), 2);

    db.store_u32(b"n", 0).unwrap();
    assert_eq!(db.change_u32_atomic(b"n", -1).unwrap(), u32::MAX);

    db.store(b"text", b"abc", StoreMode::Insert).unwrap();
    assert!(matches!(db.fetch_u32(b"text"), Err(DbError::InvalidValue { .. })));
}

/// Keys present according to a read-only pass.
#[must_use]
pub fn visible_keys(db: &Database) -> HashSet<Vec<u8>> {
    collect_read(db).into_keys().collect()
}
