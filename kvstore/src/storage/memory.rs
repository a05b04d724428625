//! In-memory page store.
//!
//! Pages live in a hash map keyed by pointers drawn from an incrementing counter.
//! Every contract check the engine relies on is enforced with an assertion, which
//! makes this store the reference for testing the tree without a file.

use std::collections::HashMap;

use crate::storage::btree::Node;
use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{NULL_PAGE, Page, PageId};

/// A [`PageStore`] that keeps every live page in memory.
#[derive(Debug)]
pub struct MemoryPageStore {
    pages: HashMap<PageId, Page>,
    next_ptr: PageId,
}

impl MemoryPageStore {
    /// Create an empty store. The first pointer handed out is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_ptr: NULL_PAGE + 1,
        }
    }

    /// Number of live pages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether no page is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Whether `ptr` is currently live.
    #[must_use]
    pub fn contains(&self, ptr: PageId) -> bool {
        self.pages.contains_key(&ptr)
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryPageStore {
    fn dereference(&mut self, ptr: PageId) -> Result<Page, StorageError> {
        match self.pages.get(&ptr) {
            Some(page) => Ok(page.clone()),
            None => panic!("dereference of pointer {ptr} that is not live"),
        }
    }

    fn allocate(&mut self, page: Page) -> Result<PageId, StorageError> {
        if let Err(e) = Node::from_page(&page) {
            panic!("allocation of a malformed page: {e}");
        }
        let ptr = self.next_ptr;
        self.next_ptr += 1;
        let previous = self.pages.insert(ptr, page);
        assert!(previous.is_none(), "pointer {ptr} collides with a live page");
        Ok(ptr)
    }

    fn deallocate(&mut self, ptr: PageId) -> Result<(), StorageError> {
        assert!(
            self.pages.remove(&ptr).is_some(),
            "deallocation of pointer {ptr} that is not live"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::NodeKind;

    fn leaf_page(key: &[u8]) -> Page {
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, 1);
        node.append_entry(0, 0, key, b"v");
        node.to_page()
    }

    #[test]
    fn test_allocate_dereference_deallocate() {
        let mut store = MemoryPageStore::new();
        assert!(store.is_empty());

        let a = store.allocate(leaf_page(b"a")).expect("allocate");
        let b = store.allocate(leaf_page(b"b")).expect("allocate");
        assert_ne!(a, NULL_PAGE);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);

        let page = store.dereference(a).expect("dereference");
        assert_eq!(page, leaf_page(b"a"));

        store.deallocate(a).expect("deallocate");
        assert!(!store.contains(a));
        assert!(store.contains(b));
    }

    #[test]
    fn test_pointers_are_not_reused() {
        let mut store = MemoryPageStore::new();
        let a = store.allocate(leaf_page(b"a")).expect("allocate");
        store.deallocate(a).expect("deallocate");
        let b = store.allocate(leaf_page(b"b")).expect("allocate");
        assert!(b > a);
    }

    #[test]
    #[should_panic(expected = "not live")]
    fn test_dereference_dead_pointer_panics() {
        let mut store = MemoryPageStore::new();
        let a = store.allocate(leaf_page(b"a")).expect("allocate");
        store.deallocate(a).expect("deallocate");
        let _ = store.dereference(a);
    }

    #[test]
    #[should_panic(expected = "not live")]
    fn test_double_deallocate_panics() {
        let mut store = MemoryPageStore::new();
        let a = store.allocate(leaf_page(b"a")).expect("allocate");
        store.deallocate(a).expect("deallocate");
        let _ = store.deallocate(a);
    }

    #[test]
    #[should_panic(expected = "malformed page")]
    fn test_allocate_garbage_panics() {
        let mut store = MemoryPageStore::new();
        let _ = store.allocate(Page::new());
    }
}
