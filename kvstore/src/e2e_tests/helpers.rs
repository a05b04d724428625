//! Common helpers for end-to-end tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::simulation::SimulatedStorage;
use crate::storage::{Database, Storage};
use crate::testing::new_test_database;

pub type Model = BTreeMap<Vec<u8>, Vec<u8>>;

/// RAII guard that cleans up the database file on drop.
pub struct TestDb {
    pub db: Database,
    path: PathBuf,
}

impl TestDb {
    /// Create a fresh file-backed database.
    #[must_use]
    pub fn new() -> Self {
        let (db, path) = new_test_database().expect("Failed to create test database");
        Self { db, path }
    }

    /// Close and reopen the database file.
    pub fn reopen(&mut self) {
        self.db = Database::open(&self.path).expect("Failed to reopen test database");
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TestDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// A database over fault-free simulated storage.
#[must_use]
pub fn sim_db(seed: u64) -> Database<SimulatedStorage> {
    Database::with_storage(SimulatedStorage::new(seed))
}

#[must_use]
pub fn key(i: usize) -> Vec<u8> {
    format!("key{i:06}").into_bytes()
}

#[must_use]
pub fn value(i: usize, len: usize) -> Vec<u8> {
    let mut v = format!("value{i}:").into_bytes();
    v.resize(len.max(v.len()), b'v');
    v
}

/// Read every entry through a cursor.
pub fn contents<S: Storage>(db: &mut Database<S>) -> Model {
    let mut contents = Model::new();
    let mut iter = db.cursor().expect("cursor");
    while let Some((k, v)) = iter.next_entry().expect("next entry") {
        contents.insert(k, v);
    }
    contents
}

/// Assert the database matches the model exactly and is structurally valid.
pub fn assert_matches_model<S: Storage>(db: &mut Database<S>, model: &Model) {
    for (k, v) in model {
        assert_eq!(db.get(k).expect("get").as_ref(), Some(v), "key {k:?}");
    }
    assert_eq!(&contents(db), model);
    let stats = db.verify().expect("verify");
    assert_eq!(stats.entries, model.len());
}
