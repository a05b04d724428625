//! High-level database interface.
//!
//! Provides a clean API for opening, creating, and managing databases. Every
//! successful `set` or `delete` is durable before it returns.

use std::path::Path;

use crate::config::StoreConfig;
use crate::storage::btree::{
    BTree, BTreeError, BTreeIterator, MAX_KEY_SIZE, MAX_VALUE_SIZE, TreeStats,
};
use crate::storage::file::{DatabaseFile, FileError};
use crate::storage::io::Storage;
use crate::storage::page::PageId;
use crate::storage::pager::{CommitError, FilePageStore, PagerStats};

/// A database instance.
///
/// This is the main entry point for working with the storage engine.
/// It owns the storage backend, and callers must serialize access to it.
#[derive(Debug)]
pub struct Database<S: Storage = DatabaseFile> {
    tree: BTree<FilePageStore<S>>,
}

impl Database {
    /// Create a new database at the given path.
    ///
    /// The path must not already exist.
    pub fn create(path: &Path) -> Result<Self, DatabaseError> {
        let file = DatabaseFile::create(path)?;
        tracing::info!(path = %path.display(), "created database");
        Ok(Self::with_storage(file))
    }

    /// Open an existing database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let file = DatabaseFile::open(path)?;
        tracing::info!(
            path = %path.display(),
            root = file.superblock().root,
            pages = file.superblock().total_page_count,
            "opened database"
        );
        Ok(Self::with_storage(file))
    }

    /// Open an existing database or create a new one if it doesn't exist.
    pub fn open_or_create(path: &Path) -> Result<Self, DatabaseError> {
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Open the database described by `config`.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self, DatabaseError> {
        let path = config.database_path.as_path();
        if config.create_if_missing {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(FileError::Io)?;
                }
            }
            Self::open_or_create(path)
        } else {
            Self::open(path)
        }
    }
}

impl<S: Storage> Database<S> {
    /// Open a database over an arbitrary storage backend.
    pub fn with_storage(storage: S) -> Self {
        let store = FilePageStore::new(storage);
        let root = store.root();
        Self {
            tree: BTree::new(store, root),
        }
    }

    /// Look up the value stored under `key`. The empty key is never present.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, DatabaseError> {
        check_key(key)?;
        Ok(self.tree.get(key)?)
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// The empty key is reserved and rejected with [`DatabaseError::EmptyKey`].
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), DatabaseError> {
        if key.is_empty() {
            return Err(DatabaseError::EmptyKey);
        }
        check_key(key)?;
        if value.len() > MAX_VALUE_SIZE {
            return Err(DatabaseError::ValueTooLarge {
                len: value.len(),
                max: MAX_VALUE_SIZE,
            });
        }

        let result = self.tree.insert(key, value);
        self.finish_mutation(result)
    }

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, DatabaseError> {
        check_key(key)?;

        let found = match self.tree.delete(key) {
            Ok(found) => found,
            Err(e) => return self.finish_mutation(Err(e)).map(|()| false),
        };
        if found {
            self.finish_mutation(Ok(()))?;
        }
        Ok(found)
    }

    /// Commit a finished tree mutation, or discard a failed one.
    fn finish_mutation(&mut self, result: Result<(), BTreeError>) -> Result<(), DatabaseError> {
        if let Err(e) = result {
            tracing::warn!(error = %e, "mutation failed, rolling back");
            self.tree.store_mut().rollback();
            self.restore_root();
            return Err(e.into());
        }

        let root = self.tree.root();
        match self.tree.store_mut().commit(root) {
            Ok(()) => Ok(()),
            Err(e) => {
                if !e.root_installed {
                    self.restore_root();
                }
                Err(e.into())
            }
        }
    }

    fn restore_root(&mut self) {
        let root = self.tree.store().root();
        self.tree.set_root(root);
    }

    /// Number of stored keys.
    pub fn count(&mut self) -> Result<usize, DatabaseError> {
        Ok(self.tree.count()?)
    }

    /// Iterate over all entries in key order.
    pub fn cursor(&mut self) -> Result<BTreeIterator<'_, FilePageStore<S>>, DatabaseError> {
        Ok(self.tree.cursor()?)
    }

    /// Iterate over entries with keys `>= start`, in key order.
    pub fn iter_from(
        &mut self,
        start: &[u8],
    ) -> Result<BTreeIterator<'_, FilePageStore<S>>, DatabaseError> {
        Ok(self.tree.iter_from(start)?)
    }

    /// Check the structure of the whole tree.
    pub fn verify(&mut self) -> Result<TreeStats, DatabaseError> {
        Ok(self.tree.verify()?)
    }

    /// Root page of the installed tree, 0 when empty.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.tree.root()
    }

    /// Page store activity counters.
    #[must_use]
    pub const fn pager_stats(&self) -> &PagerStats {
        self.tree.store().stats()
    }

    /// The storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        self.tree.store().storage()
    }

    /// Mutable access to the storage backend.
    pub const fn storage_mut(&mut self) -> &mut S {
        self.tree.store_mut().storage_mut()
    }

    /// Close the database, returning the storage backend.
    pub fn into_storage(self) -> S {
        self.tree.into_store().into_storage()
    }
}

fn check_key(key: &[u8]) -> Result<(), DatabaseError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(DatabaseError::KeyTooLarge {
            len: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    Ok(())
}

/// Errors that can occur during database operations.
#[derive(Debug)]
pub enum DatabaseError {
    /// File I/O error.
    File(FileError),
    /// The tree could not be read or updated.
    Tree(BTreeError),
    /// The mutation was applied in memory but its commit failed.
    Commit(CommitError),
    /// The empty key is reserved.
    EmptyKey,
    /// Key longer than the supported maximum.
    KeyTooLarge { len: usize, max: usize },
    /// Value longer than the supported maximum.
    ValueTooLarge { len: usize, max: usize },
}

impl DatabaseError {
    /// Whether the failed mutation may still have taken effect.
    ///
    /// True only when the root record was written but the final sync failed.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(
            self,
            Self::Commit(CommitError {
                root_installed: true,
                ..
            })
        )
    }
}

impl std::fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Tree(e) => write!(f, "tree error: {e}"),
            Self::Commit(e) => write!(f, "{e}"),
            Self::EmptyKey => write!(f, "the empty key is reserved"),
            Self::KeyTooLarge { len, max } => {
                write!(f, "key of {len} bytes exceeds the maximum of {max}")
            }
            Self::ValueTooLarge { len, max } => {
                write!(f, "value of {len} bytes exceeds the maximum of {max}")
            }
        }
    }
}

impl std::error::Error for DatabaseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Tree(e) => Some(e),
            Self::Commit(e) => Some(e),
            Self::EmptyKey | Self::KeyTooLarge { .. } | Self::ValueTooLarge { .. } => None,
        }
    }
}

impl From<FileError> for DatabaseError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<BTreeError> for DatabaseError {
    fn from(e: BTreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<CommitError> for DatabaseError {
    fn from(e: CommitError) -> Self {
        Self::Commit(e)
    }
}
