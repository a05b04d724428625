//! Every written key reads back its most recent value.

use super::helpers::{Model, TestDb, assert_matches_model, key, sim_db, value};

#[test]
fn test_distinct_keys_read_back() {
    let mut t = TestDb::new();
    let mut model = Model::new();

    for i in 0..500 {
        t.db.set(&key(i), &value(i, 90)).expect("set");
        model.insert(key(i), value(i, 90));
    }
    assert_matches_model(&mut t.db, &model);
}

#[test]
fn test_overwrites_keep_latest_value() {
    let mut db = sim_db(1);
    let mut model = Model::new();

    for round in 0..4 {
        for i in (0..200).rev() {
            let v = value(i * 10 + round, 20 + round * 150);
            db.set(&key(i), &v).expect("set");
            model.insert(key(i), v);
        }
        assert_matches_model(&mut db, &model);
    }
    assert_eq!(db.count().expect("count"), 200);
}

#[test]
fn test_empty_value() {
    let mut db = sim_db(1);
    db.set(b"nothing", b"").expect("set");
    assert_eq!(db.get(b"nothing").expect("get"), Some(Vec::new()));
    assert_eq!(db.get(b"nothing-else").expect("get"), None);
}

#[test]
fn test_binary_keys_order_bytewise() {
    let mut db = sim_db(1);
    let keys: [&[u8]; 6] = [b"\xff", b"\x00", b"a", b"\x00\x00", b"A", b"ab"];
    for (i, k) in keys.iter().enumerate() {
        db.set(k, &[u8::try_from(i).expect("small")]).expect("set");
    }

    let mut model = Model::new();
    for (i, k) in keys.iter().enumerate() {
        model.insert(k.to_vec(), vec![u8::try_from(i).expect("small")]);
    }
    assert_matches_model(&mut db, &model);
}
