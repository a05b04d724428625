//! Crash-safe page store over a [`Storage`] backend.
//!
//! Allocation is monotonic: new pages are numbered from the recorded page count
//! upward and never reuse a retired number. Allocated pages are buffered until
//! [`FilePageStore::commit`] runs the commit sequence:
//!
//! 1. write every pending page
//! 2. sync
//! 3. overwrite the root record with the new root and page count
//! 4. sync
//!
//! If any of steps 1 to 3 fails, the pending pages are discarded and the store
//! falls back to the last installed root record.
//!
//! Retired pointers are remembered only for the life of one `FilePageStore`: the
//! set grows by roughly one tree height per commit and starts empty on every open.
//! A dangling pointer into a page retired by an earlier process is therefore not
//! detected; it still reads the old, intact page contents.

use std::collections::{BTreeMap, HashSet};

use crate::storage::io::{PageStore, Storage, StorageError};
use crate::storage::page::{NULL_PAGE, Page, PageId};

/// Counters for page store activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PagerStats {
    /// Pages read from storage (pending pages are served from memory).
    pub pages_read: u64,
    /// Pages written by commits.
    pub pages_written: u64,
    /// Commits that installed a new root record.
    pub commits: u64,
    /// Commits abandoned before installing their root.
    pub rollbacks: u64,
}

/// A [`PageStore`] that persists pages through a [`Storage`] backend.
#[derive(Debug)]
pub struct FilePageStore<S> {
    storage: S,
    /// Pages allocated since the last commit.
    pending: BTreeMap<PageId, Page>,
    /// Pointers retired since the last commit.
    pending_free: HashSet<PageId>,
    /// Committed pages retired by earlier commits of this store. Not persisted.
    freed: HashSet<PageId>,
    next_page: PageId,
    stats: PagerStats,
}

impl<S: Storage> FilePageStore<S> {
    /// Wrap a storage backend, continuing from its installed root record.
    pub fn new(storage: S) -> Self {
        let next_page = storage.superblock().total_page_count;
        Self {
            storage,
            pending: BTreeMap::new(),
            pending_free: HashSet::new(),
            freed: HashSet::new(),
            next_page,
            stats: PagerStats::default(),
        }
    }

    /// Root pointer of the last installed root record.
    #[must_use]
    pub fn root(&self) -> PageId {
        self.storage.superblock().root
    }

    /// Number of pages allocated but not yet committed.
    #[must_use]
    pub fn pending_pages(&self) -> usize {
        self.pending.len()
    }

    /// Activity counters.
    #[must_use]
    pub const fn stats(&self) -> &PagerStats {
        &self.stats
    }

    /// The storage backend.
    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the storage backend.
    pub const fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Consume the store, returning the storage backend.
    ///
    /// Uncommitted pages are dropped.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Make `root` durable together with every page allocated since the last commit.
    pub fn commit(&mut self, root: PageId) -> Result<(), CommitError> {
        if self.pending.is_empty() && root == self.root() {
            self.freed.extend(self.pending_free.drain());
            return Ok(());
        }

        if let Err(e) = self.write_and_install(root) {
            tracing::warn!(stage = %e.stage, error = %e.source, "commit failed, discarding pending pages");
            self.rollback();
            return Err(e);
        }

        let written = self.pending.len();
        self.pending.clear();
        self.freed.extend(self.pending_free.drain());
        self.stats.commits += 1;
        self.stats.pages_written += written as u64;

        self.storage.sync().map_err(|source| {
            tracing::error!(
                root,
                error = %source,
                "sync after installing root failed, durability of the commit is unknown"
            );
            CommitError {
                stage: CommitStage::SyncRoot,
                source,
                root_installed: true,
            }
        })?;

        tracing::debug!(root, pages = written, "commit complete");
        Ok(())
    }

    /// Steps 1 to 3 of the commit sequence.
    fn write_and_install(&mut self, root: PageId) -> Result<(), CommitError> {
        let failed = |stage: CommitStage| {
            move |source: StorageError| CommitError {
                stage,
                source,
                root_installed: false,
            }
        };

        for (&page_id, page) in &self.pending {
            self.storage
                .write_page(page_id, page)
                .map_err(failed(CommitStage::WritePages))?;
        }
        self.storage
            .sync()
            .map_err(failed(CommitStage::SyncPages))?;

        let mut superblock = *self.storage.superblock();
        superblock.root = root;
        superblock.total_page_count = self.next_page;
        superblock.commit_sequence += 1;
        self.storage
            .write_superblock(superblock)
            .map_err(failed(CommitStage::WriteRoot))?;

        Ok(())
    }

    /// Discard everything since the last commit.
    ///
    /// Pages retired since then become live again and page numbering restarts
    /// at the recorded page count.
    pub fn rollback(&mut self) {
        if self.pending.is_empty() && self.pending_free.is_empty() {
            return;
        }
        tracing::debug!(
            discarded = self.pending.len(),
            restored = self.pending_free.len(),
            "rolling back uncommitted pages"
        );
        self.pending.clear();
        self.pending_free.clear();
        self.next_page = self.storage.superblock().total_page_count;
        self.stats.rollbacks += 1;
    }

    fn assert_live(&self, ptr: PageId) {
        assert!(
            ptr != NULL_PAGE && ptr < self.next_page,
            "pointer {ptr} was never allocated"
        );
        assert!(
            !self.freed.contains(&ptr) && !self.pending_free.contains(&ptr),
            "pointer {ptr} was already deallocated"
        );
    }
}

impl<S: Storage> PageStore for FilePageStore<S> {
    fn dereference(&mut self, ptr: PageId) -> Result<Page, StorageError> {
        self.assert_live(ptr);
        if let Some(page) = self.pending.get(&ptr) {
            return Ok(page.clone());
        }
        self.stats.pages_read += 1;
        self.storage.read_page(ptr)
    }

    fn allocate(&mut self, page: Page) -> Result<PageId, StorageError> {
        let ptr = self.next_page;
        self.next_page += 1;
        let previous = self.pending.insert(ptr, page);
        assert!(previous.is_none(), "pointer {ptr} collides with a pending page");
        Ok(ptr)
    }

    fn deallocate(&mut self, ptr: PageId) -> Result<(), StorageError> {
        self.assert_live(ptr);
        // A page that never reached storage is simply dropped. Committed pages
        // keep their space and their numbers are never handed out again.
        self.pending.remove(&ptr);
        self.pending_free.insert(ptr);
        Ok(())
    }
}

/// Step of the commit sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    /// Writing the operation's new pages.
    WritePages,
    /// Syncing the new pages.
    SyncPages,
    /// Overwriting the root record.
    WriteRoot,
    /// Syncing the root record.
    SyncRoot,
}

impl std::fmt::Display for CommitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WritePages => write!(f, "write pages"),
            Self::SyncPages => write!(f, "sync pages"),
            Self::WriteRoot => write!(f, "write root record"),
            Self::SyncRoot => write!(f, "sync root record"),
        }
    }
}

/// A commit that did not complete.
#[derive(Debug)]
pub struct CommitError {
    /// Step that failed.
    pub stage: CommitStage,
    /// Underlying storage failure.
    pub source: StorageError,
    /// Whether the new root record had already been written.
    ///
    /// When true, the new root is live in this process but may or may not
    /// survive a crash. When false, the previous root is still in effect.
    pub root_installed: bool,
}

impl std::fmt::Display for CommitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "commit failed at {}: {}", self.stage, self.source)
    }
}

impl std::error::Error for CommitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{CrashMode, FaultPoint, SimulatedStorage, StorageEvent};

    fn page_with(byte: u8) -> Page {
        let mut page = Page::new();
        page.write_bytes(0, &[byte; 16]);
        page
    }

    #[test]
    fn test_allocation_starts_after_recorded_pages() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        let b = store.allocate(page_with(2)).expect("allocate");
        assert_eq!((a, b), (1, 2));
        assert_eq!(store.pending_pages(), 2);

        // Pending pages are served from memory.
        assert_eq!(store.dereference(b).expect("dereference"), page_with(2));
        assert_eq!(store.stats().pages_read, 0);
    }

    #[test]
    fn test_commit_installs_root() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.commit(a).expect("commit");

        assert_eq!(store.root(), a);
        assert_eq!(store.pending_pages(), 0);
        let sb = *store.storage().superblock();
        assert_eq!(sb.total_page_count, 2);
        assert_eq!(sb.commit_sequence, 1);

        assert_eq!(store.dereference(a).expect("dereference"), page_with(1));
        assert_eq!(store.stats().pages_read, 1);
        assert_eq!(store.stats().commits, 1);
        assert_eq!(store.stats().pages_written, 1);
    }

    #[test]
    fn test_commit_without_changes_is_free() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        store.commit(0).expect("commit");
        assert_eq!(store.stats().commits, 0);
        assert_eq!(store.storage().stats().syncs, 0);
    }

    #[test]
    fn test_commit_ordering() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.commit(a).expect("commit");

        assert_eq!(
            store.storage().events(),
            [
                StorageEvent::WritePage(1),
                StorageEvent::Sync,
                StorageEvent::WriteSuperblock { root: 1 },
                StorageEvent::Sync,
            ]
        );
    }

    #[test]
    fn test_deallocated_pending_page_is_never_written() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        let b = store.allocate(page_with(2)).expect("allocate");
        store.deallocate(a).expect("deallocate");
        store.commit(b).expect("commit");
        assert_eq!(store.stats().pages_written, 1);
    }

    #[test]
    fn test_failed_page_write_rolls_back() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.commit(a).expect("commit");

        let b = store.allocate(page_with(2)).expect("allocate");
        store.deallocate(a).expect("deallocate");
        store.storage_mut().fail_nth(FaultPoint::PageWrite, 1);

        let err = store.commit(b).expect_err("write should fail");
        assert_eq!(err.stage, CommitStage::WritePages);
        assert!(!err.root_installed);

        // The old root is still live and numbering restarts.
        assert_eq!(store.root(), a);
        assert_eq!(store.dereference(a).expect("dereference"), page_with(1));
        assert_eq!(store.allocate(page_with(3)).expect("allocate"), b);
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[test]
    fn test_failed_root_write_keeps_previous_root() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.storage_mut().fail_nth(FaultPoint::SuperblockWrite, 1);

        let err = store.commit(a).expect_err("root write should fail");
        assert_eq!(err.stage, CommitStage::WriteRoot);
        assert!(!err.root_installed);
        assert_eq!(store.root(), 0);
        assert_eq!(store.storage().superblock().total_page_count, 1);
    }

    #[test]
    fn test_failed_final_sync_keeps_new_root() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.storage_mut().fail_nth(FaultPoint::Sync, 2);

        let err = store.commit(a).expect_err("final sync should fail");
        assert_eq!(err.stage, CommitStage::SyncRoot);
        assert!(err.root_installed);
        assert_eq!(store.root(), a);
        assert_eq!(store.pending_pages(), 0);
    }

    #[test]
    fn test_new_root_survives_crash_after_commit() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(7)).expect("allocate");
        store.commit(a).expect("commit");

        let restarted = store.into_storage().crash(CrashMode::DropUnsynced);
        let mut store = FilePageStore::new(restarted);
        assert_eq!(store.root(), a);
        assert_eq!(store.dereference(a).expect("dereference"), page_with(7));
    }

    #[test]
    fn test_retired_set_starts_empty_on_reopen() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let old = store.allocate(page_with(1)).expect("allocate");
        store.commit(old).expect("commit");
        store.deallocate(old).expect("deallocate");
        let new = store.allocate(page_with(2)).expect("allocate");
        store.commit(new).expect("commit");

        // The retired page keeps its old contents and a new store does not know it is dead.
        let mut reopened = FilePageStore::new(store.into_storage());
        assert_eq!(reopened.root(), new);
        assert_eq!(reopened.dereference(old).expect("dereference"), page_with(1));
    }

    #[test]
    #[should_panic(expected = "already deallocated")]
    fn test_dereference_pointer_retired_by_earlier_commit_panics() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let old = store.allocate(page_with(1)).expect("allocate");
        store.commit(old).expect("commit");
        store.deallocate(old).expect("deallocate");
        let new = store.allocate(page_with(2)).expect("allocate");
        store.commit(new).expect("commit");

        let _ = store.dereference(old);
    }

    #[test]
    #[should_panic(expected = "already deallocated")]
    fn test_double_deallocate_panics() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let a = store.allocate(page_with(1)).expect("allocate");
        store.commit(a).expect("commit");
        store.deallocate(a).expect("deallocate");
        let _ = store.deallocate(a);
    }

    #[test]
    #[should_panic(expected = "never allocated")]
    fn test_dereference_unallocated_panics() {
        let mut store = FilePageStore::new(SimulatedStorage::new(1));
        let _ = store.dereference(5);
    }
}
