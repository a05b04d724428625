//! Size limits and the reserved empty key.

use super::helpers::{Model, TestDb, assert_matches_model, key, sim_db};
use crate::storage::DatabaseError;
use crate::storage::btree::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

#[test]
fn test_maximum_sizes_are_accepted() {
    let mut t = TestDb::new();
    let mut model = Model::new();

    for i in 0..30 {
        let mut k = key(i);
        k.resize(MAX_KEY_SIZE, b'k');
        let v = vec![u8::try_from(i).expect("small"); MAX_VALUE_SIZE];
        t.db.set(&k, &v).expect("max entry");
        model.insert(k, v);
    }
    t.reopen();
    assert_matches_model(&mut t.db, &model);
    // One maximal entry per leaf.
    assert!(t.db.verify().expect("verify").leaves >= 30);
}

#[test]
fn test_oversized_entries_are_rejected() {
    let mut db = sim_db(40);
    db.set(b"keep", b"me").expect("set");

    let err = db
        .set(&vec![b'k'; MAX_KEY_SIZE + 1], b"v")
        .expect_err("key too large");
    assert!(matches!(
        err,
        DatabaseError::KeyTooLarge { len: 1001, max: 1000 }
    ));

    let err = db
        .set(b"k", &vec![b'v'; MAX_VALUE_SIZE + 1])
        .expect_err("value too large");
    assert!(matches!(
        err,
        DatabaseError::ValueTooLarge { len: 3001, max: 3000 }
    ));

    let err = db
        .get(&vec![b'k'; MAX_KEY_SIZE + 1])
        .expect_err("lookup of oversized key");
    assert!(matches!(err, DatabaseError::KeyTooLarge { .. }));

    // Rejected requests never reach storage.
    assert_eq!(db.pager_stats().commits, 1);
    assert_eq!(db.count().expect("count"), 1);
}

#[test]
fn test_empty_key_is_reserved() {
    let mut db = sim_db(41);
    db.set(b"a", b"1").expect("set");

    assert!(matches!(db.set(b"", b"v"), Err(DatabaseError::EmptyKey)));
    // Lookups of the sentinel key report it as absent.
    assert_eq!(db.get(b"").expect("get"), None);
    assert!(!db.delete(b"").expect("delete"));
    assert_eq!(db.pager_stats().commits, 1);
    assert_eq!(
        DatabaseError::EmptyKey.to_string(),
        "the empty key is reserved"
    );
    assert_eq!(db.count().expect("count"), 1);
}

#[test]
fn test_single_byte_keys() {
    let mut db = sim_db(42);
    let mut model = Model::new();
    for b in 0..=u8::MAX {
        db.set(&[b], &[b; 8]).expect("set");
        model.insert(vec![b], vec![b; 8]);
    }
    assert_matches_model(&mut db, &model);
}
