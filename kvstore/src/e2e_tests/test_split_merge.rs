//! The tree grows and shrinks as entries come and go.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{Model, assert_matches_model, key, sim_db, value};
use crate::storage::btree::{MAX_KEY_SIZE, MAX_VALUE_SIZE};

#[test]
fn test_height_grows_then_shrinks() {
    let mut db = sim_db(5);
    let mut model = Model::new();

    db.set(&key(0), &value(0, 100)).expect("set");
    model.insert(key(0), value(0, 100));
    assert_eq!(db.verify().expect("verify").height, 1);

    let mut i = 1;
    while db.verify().expect("verify").height < 3 {
        db.set(&key(i), &value(i, 900)).expect("set");
        model.insert(key(i), value(i, 900));
        i += 1;
    }
    assert_matches_model(&mut db, &model);
    let grown = db.verify().expect("verify");
    assert!(grown.leaves > 2);

    for j in 1..i {
        assert!(db.delete(&key(j)).expect("delete"));
        model.remove(&key(j));
    }
    assert_matches_model(&mut db, &model);

    let shrunk = db.verify().expect("verify");
    assert_eq!(shrunk.height, 1, "a single small entry fits in one leaf");
    assert_eq!(shrunk.pages, 1);
}

#[test]
fn test_merges_reclaim_leaves() {
    let mut db = sim_db(6);
    for i in 0..400 {
        db.set(&key(i), &value(i, 200)).expect("set");
    }
    let before = db.verify().expect("verify");

    // Thin out every leaf until neighbors fit together.
    for i in 0..400 {
        if i % 10 != 0 {
            assert!(db.delete(&key(i)).expect("delete"));
        }
    }
    let after = db.verify().expect("verify");
    assert_eq!(after.entries, 40);
    assert!(
        after.leaves < before.leaves / 2,
        "leaves {} -> {}",
        before.leaves,
        after.leaves
    );
}

#[test]
fn test_large_entries_split_three_ways() {
    let mut db = sim_db(7);
    db.set(b"a", b"1").expect("set");
    db.set(b"x", &vec![b'v'; 3000]).expect("set");
    assert_eq!(db.verify().expect("verify").leaves, 1);

    // A maximal entry at the tail leaves both count-based halves oversized on the right.
    let big_key = vec![b'y'; 1000];
    db.set(&big_key, &vec![b'w'; 3000]).expect("set max");

    let stats = db.verify().expect("verify");
    assert_eq!(stats.height, 2);
    assert_eq!(stats.leaves, 3);
    assert_eq!(stats.pages, 4);
    assert_eq!(db.get(&big_key).expect("get"), Some(vec![b'w'; 3000]));
}

#[test]
fn test_large_entries_clustered_low_split_by_size() {
    let mut db = sim_db(9);
    let mut model = Model::new();
    db.set(b"a", &[1; 3000]).expect("set");
    model.insert(b"a".to_vec(), vec![1; 3000]);
    for i in 1..=6 {
        let k = format!("c{i}").into_bytes();
        db.set(&k, b"x").expect("set");
        model.insert(k, b"x".to_vec());
    }
    db.set(b"b", &[2; 2000]).expect("set");
    model.insert(b"b".to_vec(), vec![2; 2000]);

    assert_matches_model(&mut db, &model);
    assert_eq!(db.verify().expect("verify").leaves, 2);
}

#[test]
fn test_mixed_entry_sizes_at_random_positions() {
    let mut rng = StdRng::seed_from_u64(0x512E);
    let mut db = sim_db(10);
    let mut model = Model::new();

    for step in 0..800 {
        let mut k = key(rng.random_range(0..150));
        if rng.random_bool(0.4) {
            k.resize(rng.random_range(k.len()..=MAX_KEY_SIZE), b'.');
        }
        if rng.random_bool(0.75) {
            let len = if rng.random_bool(0.4) {
                rng.random_range(1500..=MAX_VALUE_SIZE)
            } else {
                rng.random_range(0..30)
            };
            let v = value(step, len);
            db.set(&k, &v).expect("set");
            model.insert(k, v);
        } else {
            let expected = model.remove(&k).is_some();
            assert_eq!(db.delete(&k).expect("delete"), expected, "step {step}");
        }
        let stats = db.verify().expect("verify");
        assert_eq!(stats.entries, model.len(), "step {step}");
    }
    assert_matches_model(&mut db, &model);
}

#[test]
fn test_sequential_and_reverse_inserts() {
    let mut forward = sim_db(8);
    let mut backward = sim_db(8);
    let mut model = Model::new();

    for i in 0..600 {
        forward.set(&key(i), &value(i, 60)).expect("set");
        backward.set(&key(599 - i), &value(599 - i, 60)).expect("set");
        model.insert(key(i), value(i, 60));
    }
    assert_matches_model(&mut forward, &model);
    assert_matches_model(&mut backward, &model);
}
