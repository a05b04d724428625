//! Ordered scans over the whole store and from a start key.

use super::helpers::{Model, TestDb, contents, key, sim_db, value};

fn collect_from(
    db: &mut crate::storage::Database<crate::simulation::SimulatedStorage>,
    start: &[u8],
) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    let mut iter = db.iter_from(start).expect("iter_from");
    while let Some((k, _)) = iter.next_entry().expect("next entry") {
        keys.push(k);
    }
    keys
}

#[test]
fn test_cursor_visits_every_key_in_order() {
    let mut db = sim_db(30);
    let mut model = Model::new();
    for i in (0..700).rev() {
        db.set(&key(i * 3), &value(i, 80)).expect("set");
        model.insert(key(i * 3), value(i, 80));
    }
    assert_eq!(contents(&mut db), model);
    assert_eq!(db.count().expect("count"), 700);
}

#[test]
fn test_iter_from_starts_at_ceiling() {
    let mut db = sim_db(31);
    for i in 0..500 {
        db.set(&key(i * 2), &value(i, 100)).expect("set");
    }

    // Present key.
    let keys = collect_from(&mut db, &key(100));
    assert_eq!(keys.first(), Some(&key(100)));
    assert_eq!(keys.len(), 450);

    // Absent key between two present ones.
    let keys = collect_from(&mut db, &key(101));
    assert_eq!(keys.first(), Some(&key(102)));
    assert_eq!(keys.len(), 449);

    // Before everything, and past everything.
    assert_eq!(collect_from(&mut db, b"a").len(), 500);
    assert!(collect_from(&mut db, b"zzz").is_empty());
}

#[test]
fn test_scan_never_yields_the_sentinel() {
    let mut db = sim_db(32);
    assert!(collect_from(&mut db, b"").is_empty());

    db.set(b"\x00", b"lowest").expect("set");
    let keys = collect_from(&mut db, b"");
    assert_eq!(keys, vec![b"\x00".to_vec()]);
}

#[test]
fn test_scan_after_reopen() {
    let mut t = TestDb::new();
    let mut model = Model::new();
    for i in 0..300 {
        t.db.set(&key(i), &value(i, 250)).expect("set");
        model.insert(key(i), value(i, 250));
    }
    for i in (0..300).step_by(3) {
        t.db.delete(&key(i)).expect("delete");
        model.remove(&key(i));
    }
    t.reopen();
    assert_eq!(contents(&mut t.db), model);
}
