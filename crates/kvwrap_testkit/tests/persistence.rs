//! Restart behavior of the log engine.

use kvwrap_core::{Config, Database, SequenceNumber, StoreMode, TraverseControl};
use kvwrap_engines::LogBackend;
use kvwrap_testkit::{with_log_db, TestDatabase};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

fn reopen(path: &Path) -> Database {
    let config = Config::default();
    Database::open(LogBackend::open(path, &config).unwrap(), &config).unwrap()
}

#[test]
fn committed_transaction_survives_restart() {
    let test_db = TestDatabase::log();
    test_db.transaction_start().unwrap();
    test_db.store(b"k", b"v", StoreMode::Insert).unwrap();
    test_db.transaction_commit().unwrap();
    let seq = test_db.get_seqnum().unwrap();

    let test_db = test_db.reopen();
    assert_eq!(test_db.fetch(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(test_db.get_seqnum().unwrap(), seq);
}

#[test]
fn uncommitted_transaction_is_gone_after_restart() {
    let test_db = TestDatabase::log();
    test_db.store(b"kept", b"1", StoreMode::Insert).unwrap();
    test_db.transaction_start().unwrap();
    test_db.store(b"lost", b"1", StoreMode::Insert).unwrap();

    let test_db = test_db.reopen();
    assert_eq!(test_db.fetch(b"lost").unwrap(), None);
    assert_eq!(test_db.fetch(b"kept").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn wipe_survives_restart() {
    let test_db = TestDatabase::log();
    for n in 0..10u8 {
        test_db.store(&[n], b"v", StoreMode::Insert).unwrap();
    }
    test_db.wipe().unwrap();

    let test_db = test_db.reopen();
    let count = test_db
        .traverse(|_| Ok(TraverseControl::Continue))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn torn_tail_recovery_keeps_every_complete_batch() {
    with_log_db(|db, path| {
        for n in 0..5u8 {
            db.store(&[n], &[n; 8], StoreMode::Insert).unwrap();
        }
        let seq = db.get_seqnum().unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(path.join("data.log"))
            .unwrap();
        file.write_all(b"KVLG\x01\x00\x01\xff\x00\x00\x00partial").unwrap();
        drop(file);

        let restarted = reopen(path);
        assert_eq!(restarted.get_seqnum().unwrap(), seq);
        for n in 0..5u8 {
            assert_eq!(restarted.fetch(&[n]).unwrap(), Some(vec![n; 8]));
        }

        restarted.store(b"after", b"crash", StoreMode::Insert).unwrap();
        assert_eq!(db.fetch(b"after").unwrap(), Some(b"crash".to_vec()));
        assert_eq!(db.get_seqnum().unwrap(), SequenceNumber::new(seq.as_u64() + 1));
    });
}

#[test]
fn missing_directory_without_create_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::new().create_if_missing(false);
    assert!(LogBackend::open(dir.path().join("nope"), &config).is_err());
    assert!(!dir.path().join("nope").exists());
}
