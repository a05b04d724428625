//! A crash at any point of a commit recovers either the old or the new state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helpers::{Model, assert_matches_model, contents, key, sim_db, value};
use crate::simulation::{CrashMode, FaultPoint, SimulatedStorage};
use crate::storage::{Database, DatabaseError};

/// A database holding `n` committed entries, and the matching model.
fn populated(seed: u64, n: usize) -> (Database<SimulatedStorage>, Model) {
    let mut db = sim_db(seed);
    let mut model = Model::new();
    for i in 0..n {
        db.set(&key(i), &value(i, 150)).expect("set");
        model.insert(key(i), value(i, 150));
    }
    (db, model)
}

fn restart(db: Database<SimulatedStorage>, mode: CrashMode) -> Database<SimulatedStorage> {
    Database::with_storage(db.into_storage().crash(mode))
}

#[test]
fn test_failed_root_write_keeps_old_state() {
    let (mut db, before) = populated(20, 80);
    db.storage_mut().fail_nth(FaultPoint::SuperblockWrite, 1);

    let err = db.set(&key(500), b"lost").expect_err("root write fails");
    assert!(matches!(err, DatabaseError::Commit(_)));
    assert!(!err.is_indeterminate());
    assert_matches_model(&mut db, &before);

    for mode in [CrashMode::DropUnsynced, CrashMode::KeepUnsynced] {
        let (mut db, before) = populated(20, 80);
        db.storage_mut().fail_nth(FaultPoint::SuperblockWrite, 1);
        db.set(&key(500), b"lost").expect_err("root write fails");

        let mut db = restart(db, mode);
        assert_matches_model(&mut db, &before);
    }
}

#[test]
fn test_failed_page_sync_keeps_old_state() {
    for mode in [CrashMode::DropUnsynced, CrashMode::KeepUnsynced, CrashMode::Reorder] {
        let (mut db, before) = populated(21, 80);
        db.storage_mut().fail_nth(FaultPoint::Sync, 1);

        let err = db.delete(&key(3)).expect_err("first sync fails");
        assert!(!err.is_indeterminate());
        assert_matches_model(&mut db, &before);

        let mut db = restart(db, mode);
        assert_matches_model(&mut db, &before);
    }
}

#[test]
fn test_failed_final_sync_keeping_writes_recovers_new_state() {
    let (mut db, mut model) = populated(22, 80);
    db.storage_mut().fail_nth(FaultPoint::Sync, 2);

    let err = db.set(&key(500), b"maybe").expect_err("final sync fails");
    assert!(err.is_indeterminate());
    model.insert(key(500), b"maybe".to_vec());

    // The running process already sees the new root.
    assert_eq!(db.get(&key(500)).expect("get"), Some(b"maybe".to_vec()));

    let mut db = restart(db, CrashMode::KeepUnsynced);
    assert_matches_model(&mut db, &model);
}

#[test]
fn test_failed_final_sync_dropping_writes_recovers_old_state() {
    let (mut db, before) = populated(23, 80);
    db.storage_mut().fail_nth(FaultPoint::Sync, 2);

    let err = db.set(&key(500), b"maybe").expect_err("final sync fails");
    assert!(err.is_indeterminate());

    let mut db = restart(db, CrashMode::DropUnsynced);
    assert_matches_model(&mut db, &before);
}

#[test]
fn test_completed_commit_survives_any_crash() {
    for mode in [CrashMode::DropUnsynced, CrashMode::KeepUnsynced, CrashMode::Reorder] {
        let (mut db, mut model) = populated(24, 80);
        db.set(&key(500), b"kept").expect("set");
        model.insert(key(500), b"kept".to_vec());
        assert!(db.delete(&key(7)).expect("delete"));
        model.remove(&key(7));

        let mut db = restart(db, mode);
        assert_matches_model(&mut db, &model);
    }
}

#[test]
fn test_failed_page_write_rolls_back() {
    let (mut db, before) = populated(25, 80);
    db.storage_mut().fail_nth(FaultPoint::PageWrite, 1);

    db.set(&key(40), &value(40, 2000)).expect_err("page write fails");
    assert_matches_model(&mut db, &before);

    // The next commit reuses the page numbers the failed one claimed.
    db.set(&key(40), &value(40, 2000)).expect("retry");
    let mut model = before;
    model.insert(key(40), value(40, 2000));

    let mut db = restart(db, CrashMode::DropUnsynced);
    assert_matches_model(&mut db, &model);
}

#[test]
fn test_random_faults_and_crashes() {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut db = sim_db(26);
    let mut model = Model::new();
    let mut crashes = 0;

    for step in 0..1500 {
        if rng.random_bool(0.05) {
            let point = match rng.random_range(0..4) {
                0 => FaultPoint::PageRead,
                1 => FaultPoint::PageWrite,
                2 => FaultPoint::Sync,
                _ => FaultPoint::SuperblockWrite,
            };
            db.storage_mut().fail_nth(point, rng.random_range(1..4));
        }

        let i = rng.random_range(0..200);
        let before = model.clone();
        let result = if rng.random_bool(0.75) {
            let v = value(i, rng.random_range(0..500));
            model.insert(key(i), v.clone());
            db.set(&key(i), &v)
        } else {
            model.remove(&key(i));
            db.delete(&key(i)).map(|_| ())
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_indeterminate() => {
                // Only a restart can tell which root was installed.
                db = Database::with_storage(db.into_storage().crash(CrashMode::Reorder));
                crashes += 1;
                let recovered = contents(&mut db);
                assert!(
                    recovered == model || recovered == before,
                    "step {step}: recovered neither state"
                );
                model = recovered;
            }
            Err(_) => model = before,
        }

        if step % 100 == 99 {
            db = Database::with_storage(db.into_storage().crash(CrashMode::Reorder));
            crashes += 1;
            assert_matches_model(&mut db, &model);
        }
    }
    assert!(crashes >= 15);
}
