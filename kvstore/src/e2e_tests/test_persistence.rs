//! State survives closing and reopening the database file.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{Model, TestDb, assert_matches_model, key, value};
use crate::storage::{Database, DatabaseError, FileError, PAGE_SIZE, PAGE_SIZE_U64};

#[test]
fn test_reopen_after_many_operations() {
    let mut t = TestDb::new();
    let mut model = Model::new();
    let mut rng = StdRng::seed_from_u64(11);

    for _ in 0..3 {
        for _ in 0..400 {
            let i = rng.random_range(0..250);
            if rng.random_bool(0.7) {
                let v = value(i, rng.random_range(0..600));
                t.db.set(&key(i), &v).expect("set");
                model.insert(key(i), v);
            } else {
                let expected = model.remove(&key(i)).is_some();
                assert_eq!(t.db.delete(&key(i)).expect("delete"), expected);
            }
        }
        t.reopen();
        assert_matches_model(&mut t.db, &model);
        assert_eq!(t.db.pager_stats().commits, 0);
    }
}

#[test]
fn test_pages_past_recorded_count_are_ignored() {
    let mut t = TestDb::new();
    let mut model = Model::new();
    for i in 0..100 {
        t.db.set(&key(i), &value(i, 200)).expect("set");
        model.insert(key(i), value(i, 200));
    }
    let total = t.db.storage().superblock().total_page_count;

    // Leftovers of a commit that never installed its root.
    {
        let mut file = OpenOptions::new()
            .write(true)
            .open(t.path())
            .expect("open raw");
        file.seek(SeekFrom::Start(total * PAGE_SIZE_U64))
            .expect("seek");
        file.write_all(&vec![0xAB; PAGE_SIZE * 3]).expect("write junk");
    }

    t.reopen();
    assert_eq!(t.db.storage().file_pages(), total + 3);
    assert_matches_model(&mut t.db, &model);

    // New pages are appended at the recorded count, over the junk.
    for i in 100..200 {
        t.db.set(&key(i), &value(i, 200)).expect("set");
        model.insert(key(i), value(i, 200));
    }
    t.reopen();
    assert_matches_model(&mut t.db, &model);
}

#[test]
fn test_truncated_file_is_rejected() {
    let mut t = TestDb::new();
    for i in 0..100 {
        t.db.set(&key(i), &value(i, 200)).expect("set");
    }
    let total = t.db.storage().superblock().total_page_count;
    assert!(total > 2);

    let file = OpenOptions::new()
        .write(true)
        .open(t.path())
        .expect("open raw");
    file.set_len((total - 1) * PAGE_SIZE_U64).expect("truncate");

    let err = Database::open(t.path()).expect_err("truncated file");
    assert!(matches!(
        err,
        DatabaseError::File(FileError::Truncated { .. })
    ));
}

#[test]
fn test_corrupt_root_record_is_rejected() {
    let mut t = TestDb::new();
    t.db.set(b"k", b"v").expect("set");

    let mut file = OpenOptions::new()
        .write(true)
        .open(t.path())
        .expect("open raw");
    file.seek(SeekFrom::Start(20)).expect("seek");
    file.write_all(&[0xFF; 4]).expect("scribble");

    let err = Database::open(t.path()).expect_err("bad checksum");
    assert!(matches!(
        err,
        DatabaseError::File(FileError::Superblock(_))
    ));
}

#[test]
fn test_empty_database_reopens_empty() {
    let mut t = TestDb::new();
    t.reopen();
    assert_eq!(t.db.root(), 0);
    assert_eq!(t.db.count().expect("count"), 0);

    t.db.set(b"a", b"1").expect("set");
    assert!(t.db.delete(b"a").expect("delete"));
    t.reopen();
    // The sentinel leaf stays behind.
    assert_ne!(t.db.root(), 0);
    assert_eq!(t.db.get(b"a").expect("get"), None);
    assert_eq!(t.db.verify().expect("verify").pages, 1);
}
