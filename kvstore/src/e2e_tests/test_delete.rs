//! Deleted keys disappear and nothing else changes.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::helpers::{Model, assert_matches_model, key, sim_db, value};

#[test]
fn test_delete_reports_presence() {
    let mut db = sim_db(1);
    db.set(b"present", b"1").expect("set");

    assert!(db.delete(b"present").expect("delete"));
    assert!(!db.delete(b"present").expect("delete again"));
    assert!(!db.delete(b"never-there").expect("delete absent"));
    assert_eq!(db.get(b"present").expect("get"), None);
}

#[test]
fn test_delete_in_random_order() {
    let mut db = sim_db(2);
    let mut model = Model::new();
    for i in 0..400 {
        db.set(&key(i), &value(i, 120)).expect("set");
        model.insert(key(i), value(i, 120));
    }

    let mut order: Vec<usize> = (0..400).collect();
    order.shuffle(&mut StdRng::seed_from_u64(99));

    for (n, i) in order.into_iter().enumerate() {
        assert!(db.delete(&key(i)).expect("delete"), "key {i}");
        model.remove(&key(i));
        if n % 50 == 0 {
            assert_matches_model(&mut db, &model);
        }
    }
    assert_matches_model(&mut db, &model);
    assert_eq!(db.count().expect("count"), 0);
}

#[test]
fn test_delete_everything_empties_the_tree() {
    let mut db = sim_db(3);
    for i in 0..50 {
        db.set(&key(i), &value(i, 10)).expect("set");
    }
    for i in 0..50 {
        assert!(db.delete(&key(i)).expect("delete"));
    }
    assert_eq!(db.count().expect("count"), 0);
    assert_eq!(db.verify().expect("verify").entries, 0);

    // The store is usable after being emptied.
    db.set(b"again", b"yes").expect("set");
    assert_eq!(db.get(b"again").expect("get"), Some(b"yes".to_vec()));
}

#[test]
fn test_delete_first_key_of_each_leaf() {
    let mut db = sim_db(4);
    let mut model = Model::new();
    for i in 0..300 {
        db.set(&key(i), &value(i, 150)).expect("set");
        model.insert(key(i), value(i, 150));
    }

    // Removing a leaf's smallest key changes the link key in its parent.
    for i in (0..300).step_by(7) {
        assert!(db.delete(&key(i)).expect("delete"));
        model.remove(&key(i));
    }
    assert_matches_model(&mut db, &model);
}
