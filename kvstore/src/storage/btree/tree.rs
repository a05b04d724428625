//! Copy-on-write B+tree operations.
//!
//! Pages are never modified in place. A mutation rebuilds every node on the path
//! from the root to the affected leaf into fresh buffers, publishes them through
//! the [`PageStore`], retires the pages they replace and finally swaps the root.
//! Until the root is swapped the previous tree stays fully intact.

use crate::storage::btree::node::{
    self, HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, MERGE_THRESHOLD, Node, NodeError, NodeKind,
};
use crate::storage::io::{PageStore, StorageError};
use crate::storage::page::{NULL_PAGE, PAGE_SIZE, PageId};

/// A B+tree rooted at a single page pointer.
///
/// All structure lives in pages reachable from `root`; the tree owns nothing else.
/// Callers must serialize access: one operation at a time.
#[derive(Debug)]
pub struct BTree<S> {
    store: S,
    root: PageId,
}

/// Which sibling a shrunken child merges with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sibling {
    Left,
    Right,
}

/// Shape of the tree as observed by [`BTree::verify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree, 1 for a lone root leaf.
    pub height: usize,
    /// Pages reachable from the root.
    pub pages: usize,
    /// Leaf pages reachable from the root.
    pub leaves: usize,
    /// Stored key-value pairs, not counting the sentinel.
    pub entries: usize,
}

impl<S: PageStore> BTree<S> {
    /// Open a tree over `store` rooted at `root` (0 for an empty tree).
    pub const fn new(store: S, root: PageId) -> Self {
        Self { store, root }
    }

    /// The current root pointer.
    #[must_use]
    pub const fn root(&self) -> PageId {
        self.root
    }

    /// Point the tree back at a previously valid root.
    pub(crate) const fn set_root(&mut self, root: PageId) {
        self.root = root;
    }

    /// The underlying page store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable access to the underlying page store.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consume the tree, returning its page store.
    pub fn into_store(self) -> S {
        self.store
    }

    fn load(&mut self, ptr: PageId) -> Result<Node, BTreeError> {
        let page = self.store.dereference(ptr)?;
        Ok(Node::from_page(&page)?)
    }

    fn publish(&mut self, node: &Node) -> Result<PageId, BTreeError> {
        Ok(self.store.allocate(node.to_page())?)
    }

    // ========== Read ==========

    /// Look up the value stored under `key`.
    ///
    /// The empty key is the sentinel and is never reported as present.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        if key.is_empty() || self.root == NULL_PAGE {
            return Ok(None);
        }

        let mut node = self.load(self.root)?;
        loop {
            let idx = node.find_floor_index(key);
            match node.kind() {
                NodeKind::Leaf => {
                    if node.key_count() > 0 && node.key(idx) == key {
                        return Ok(Some(node.value(idx).to_vec()));
                    }
                    return Ok(None);
                }
                NodeKind::Internal => {
                    node = self.load(node.pointer(idx))?;
                }
            }
        }
    }

    // ========== Insert ==========

    /// Insert `key` or overwrite its value.
    ///
    /// # Panics
    ///
    /// Panics if the key is empty or longer than `MAX_KEY_SIZE`, or if the value
    /// is longer than `MAX_VALUE_SIZE`.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        assert!(!key.is_empty(), "the empty key is reserved for the sentinel");
        assert!(
            key.len() <= MAX_KEY_SIZE,
            "key of {} bytes exceeds {MAX_KEY_SIZE}",
            key.len()
        );
        assert!(
            value.len() <= MAX_VALUE_SIZE,
            "value of {} bytes exceeds {MAX_VALUE_SIZE}",
            value.len()
        );

        if self.root == NULL_PAGE {
            // The sentinel makes the first leaf cover the whole key space.
            let mut root = Node::new();
            root.set_header(NodeKind::Leaf, 2);
            root.append_entry(0, 0, &[], &[]);
            root.append_entry(1, 0, key, value);
            self.root = self.publish(&root)?;
            return Ok(());
        }

        let old_root = self.root;
        let node = self.load(old_root)?;
        let updated = self.tree_insert(&node, key, value)?;
        self.install_root(old_root, updated)
    }

    /// Rebuild `node` with the key inserted. The result may exceed one page.
    fn tree_insert(&mut self, node: &Node, key: &[u8], value: &[u8]) -> Result<Node, BTreeError> {
        let mut new = Node::new();
        let idx = node.find_floor_index(key);
        match node.kind() {
            NodeKind::Leaf => {
                if node.key(idx) == key {
                    node::leaf_update(&mut new, node, idx, key, value);
                } else {
                    node::leaf_insert(&mut new, node, idx + 1, key, value);
                }
            }
            NodeKind::Internal => {
                let kid_ptr = node.pointer(idx);
                let kid = self.load(kid_ptr)?;
                let updated = self.tree_insert(&kid, key, value)?;
                let parts = node::split3(updated);
                self.replace_kids(&mut new, node, idx, &parts)?;
                self.store.deallocate(kid_ptr)?;
            }
        }
        Ok(new)
    }

    /// Replace the link at `idx` with one link per node in `kids`.
    fn replace_kids(
        &mut self,
        new: &mut Node,
        old: &Node,
        idx: usize,
        kids: &[Node],
    ) -> Result<(), BTreeError> {
        let count = old.key_count();
        let inc = kids.len();
        new.set_header(NodeKind::Internal, count + inc - 1);
        new.append_range(old, 0, 0, idx);
        for (i, kid) in kids.iter().enumerate() {
            let ptr = self.publish(kid)?;
            new.append_entry(idx + i, ptr, kid.key(0), &[]);
        }
        new.append_range(old, idx + inc, idx + 1, count - idx - 1);
        Ok(())
    }

    /// Publish a rebuilt root, adding a level if it had to be split.
    fn install_root(&mut self, old_root: PageId, candidate: Node) -> Result<(), BTreeError> {
        let parts = node::split3(candidate);
        let new_root = if parts.len() > 1 {
            let mut root = Node::new();
            root.set_header(NodeKind::Internal, parts.len());
            for (i, part) in parts.iter().enumerate() {
                let ptr = self.publish(part)?;
                root.append_entry(i, ptr, part.key(0), &[]);
            }
            tracing::trace!(children = parts.len(), "root split, tree grows by one level");
            self.publish(&root)?
        } else {
            self.publish(&parts[0])?
        };
        self.store.deallocate(old_root)?;
        self.root = new_root;
        Ok(())
    }

    // ========== Delete ==========

    /// Remove `key`, returning whether it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool, BTreeError> {
        if key.is_empty() || self.root == NULL_PAGE {
            return Ok(false);
        }

        let old_root = self.root;
        let node = self.load(old_root)?;
        let Some(updated) = self.tree_delete(&node, key)? else {
            return Ok(false);
        };

        if updated.kind() == NodeKind::Internal && updated.key_count() == 1 {
            self.store.deallocate(old_root)?;
            self.root = updated.pointer(0);
            tracing::trace!(root = self.root, "root collapsed, tree shrinks by one level");
        } else if updated.key_count() == 0 {
            self.store.deallocate(old_root)?;
            self.root = NULL_PAGE;
        } else {
            self.install_root(old_root, updated)?;
        }
        Ok(true)
    }

    /// Rebuild `node` without the key. `None` means the key is absent.
    fn tree_delete(&mut self, node: &Node, key: &[u8]) -> Result<Option<Node>, BTreeError> {
        if node.key_count() == 0 {
            return Ok(None);
        }
        let idx = node.find_floor_index(key);
        match node.kind() {
            NodeKind::Leaf => {
                if node.key(idx) != key {
                    return Ok(None);
                }
                let mut new = Node::new();
                node::leaf_delete(&mut new, node, idx);
                Ok(Some(new))
            }
            NodeKind::Internal => self.node_delete(node, idx, key),
        }
    }

    fn node_delete(
        &mut self,
        node: &Node,
        idx: usize,
        key: &[u8],
    ) -> Result<Option<Node>, BTreeError> {
        let kid_ptr = node.pointer(idx);
        let kid = self.load(kid_ptr)?;
        let Some(updated) = self.tree_delete(&kid, key)? else {
            return Ok(None);
        };

        let mut new = Node::new();
        match self.should_merge(node, idx, &updated)? {
            Some((Sibling::Left, sibling)) => {
                let mut merged = Node::new();
                node::merge(&mut merged, &sibling, &updated);
                let ptr = self.publish(&merged)?;
                node::replace_two_kids(&mut new, node, idx - 1, ptr, merged.key(0));
                self.store.deallocate(node.pointer(idx - 1))?;
                tracing::trace!(index = idx, "merged child into left sibling");
            }
            Some((Sibling::Right, sibling)) => {
                let mut merged = Node::new();
                node::merge(&mut merged, &updated, &sibling);
                let ptr = self.publish(&merged)?;
                node::replace_two_kids(&mut new, node, idx, ptr, merged.key(0));
                self.store.deallocate(node.pointer(idx + 1))?;
                tracing::trace!(index = idx, "merged right sibling into child");
            }
            None if updated.key_count() == 0 => {
                assert!(
                    node.key_count() == 1 && idx == 0,
                    "empty child at {idx} of {} has no sibling to merge with",
                    node.key_count()
                );
                new.set_header(NodeKind::Internal, 0);
            }
            None => {
                // A new first key in the child can lengthen this link, so the rebuilt
                // node is split like an insert result.
                let parts = node::split3(updated);
                self.replace_kids(&mut new, node, idx, &parts)?;
            }
        }
        self.store.deallocate(kid_ptr)?;
        Ok(Some(new))
    }

    /// Decide whether the rebuilt child at `idx` should absorb a sibling.
    fn should_merge(
        &mut self,
        node: &Node,
        idx: usize,
        updated: &Node,
    ) -> Result<Option<(Sibling, Node)>, BTreeError> {
        if updated.total_size() > MERGE_THRESHOLD {
            return Ok(None);
        }

        if idx > 0 {
            let sibling = self.load(node.pointer(idx - 1))?;
            if sibling.total_size() + updated.total_size() - HEADER_SIZE <= PAGE_SIZE {
                return Ok(Some((Sibling::Left, sibling)));
            }
        }

        if idx + 1 < node.key_count() {
            let sibling = self.load(node.pointer(idx + 1))?;
            if sibling.total_size() + updated.total_size() - HEADER_SIZE <= PAGE_SIZE {
                return Ok(Some((Sibling::Right, sibling)));
            }
        }

        Ok(None)
    }

    // ========== Iteration ==========

    /// Create a cursor over all entries in key order.
    pub fn cursor(&mut self) -> Result<BTreeIterator<'_, S>, BTreeError> {
        self.iter_from(&[])
    }

    /// Create an iterator over entries with keys `>= start`, in key order.
    pub fn iter_from(&mut self, start: &[u8]) -> Result<BTreeIterator<'_, S>, BTreeError> {
        let mut stack = Vec::new();

        if self.root != NULL_PAGE {
            let mut node = self.load(self.root)?;
            loop {
                let idx = node.find_floor_index(start);
                match node.kind() {
                    NodeKind::Internal => {
                        let ptr = node.pointer(idx);
                        stack.push((node, idx + 1));
                        node = self.load(ptr)?;
                    }
                    NodeKind::Leaf => {
                        let begin = if node.key_count() > 0 && node.key(idx) < start {
                            idx + 1
                        } else {
                            idx
                        };
                        stack.push((node, begin));
                        break;
                    }
                }
            }
        }

        Ok(BTreeIterator { tree: self, stack })
    }

    /// Count the total number of entries in the tree.
    pub fn count(&mut self) -> Result<usize, BTreeError> {
        let mut count = 0;
        let mut iter = self.cursor()?;
        while iter.next_entry()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    // ========== Verification ==========

    /// Walk every reachable page and check the structural invariants.
    pub fn verify(&mut self) -> Result<TreeStats, BTreeError> {
        let mut stats = TreeStats::default();
        if self.root == NULL_PAGE {
            return Ok(stats);
        }

        let root_ptr = self.root;
        let root = self.load(root_ptr)?;
        if root.key_count() > 0 && !root.key(0).is_empty() {
            return Err(BTreeError::InvariantViolation {
                page: root_ptr,
                message: "leftmost entry is not the sentinel".to_string(),
            });
        }

        let mut leaf_depth = None;
        let bounds = KeyBounds {
            first: None,
            upper: None,
        };
        self.verify_node(root_ptr, &root, &bounds, 1, &mut leaf_depth, &mut stats)?;
        stats.height = leaf_depth.unwrap_or(0);
        Ok(stats)
    }

    fn verify_node(
        &mut self,
        ptr: PageId,
        node: &Node,
        bounds: &KeyBounds,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> Result<(), BTreeError> {
        let violation = |message: String| BTreeError::InvariantViolation { page: ptr, message };

        stats.pages += 1;
        let count = node.key_count();
        if count == 0 {
            return Err(violation("node has no entries".to_string()));
        }
        if node.total_size() > PAGE_SIZE {
            return Err(violation(format!("node occupies {} bytes", node.total_size())));
        }
        if let Some(first) = &bounds.first {
            if node.key(0) != first.as_slice() {
                return Err(violation("first key differs from the parent link".to_string()));
            }
        }
        for i in 1..count {
            if node.key(i - 1) >= node.key(i) {
                return Err(violation(format!("keys not strictly increasing at {i}")));
            }
        }
        if let Some(upper) = &bounds.upper {
            if node.key(count - 1) >= upper.as_slice() {
                return Err(violation("key reaches into the next sibling's range".to_string()));
            }
        }

        match node.kind() {
            NodeKind::Leaf => {
                stats.leaves += 1;
                stats.entries += (0..count).filter(|&i| !node.key(i).is_empty()).count();
                match *leaf_depth {
                    None => *leaf_depth = Some(depth),
                    Some(expected) if expected != depth => {
                        return Err(violation(format!(
                            "leaf at depth {depth}, expected {expected}"
                        )));
                    }
                    Some(_) => {}
                }
            }
            NodeKind::Internal => {
                for i in 0..count {
                    if !node.value(i).is_empty() {
                        return Err(violation(format!("internal entry {i} carries a value")));
                    }
                    let child_ptr = node.pointer(i);
                    let child = self.load(child_ptr)?;
                    let child_bounds = KeyBounds {
                        first: Some(node.key(i).to_vec()),
                        upper: if i + 1 < count {
                            Some(node.key(i + 1).to_vec())
                        } else {
                            bounds.upper.clone()
                        },
                    };
                    self.verify_node(
                        child_ptr,
                        &child,
                        &child_bounds,
                        depth + 1,
                        leaf_depth,
                        stats,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Key range a subtree must respect during verification.
struct KeyBounds {
    first: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
}

/// Iterator over B-tree entries.
pub struct BTreeIterator<'a, S> {
    tree: &'a mut BTree<S>,
    /// Nodes on the current path with the next index to visit in each.
    stack: Vec<(Node, usize)>,
}

enum Step {
    Exhausted,
    Entry(Vec<u8>, Vec<u8>),
    Descend(PageId),
}

impl<S: PageStore> BTreeIterator<'_, S> {
    /// Get the next entry.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, BTreeError> {
        loop {
            let step = {
                let Some((node, next)) = self.stack.last_mut() else {
                    return Ok(None);
                };
                if *next >= node.key_count() {
                    Step::Exhausted
                } else {
                    let i = *next;
                    *next += 1;
                    match node.kind() {
                        NodeKind::Leaf => Step::Entry(node.key(i).to_vec(), node.value(i).to_vec()),
                        NodeKind::Internal => Step::Descend(node.pointer(i)),
                    }
                }
            };

            match step {
                Step::Exhausted => {
                    self.stack.pop();
                }
                Step::Entry(key, value) => {
                    if !key.is_empty() {
                        return Ok(Some((key, value)));
                    }
                }
                Step::Descend(ptr) => {
                    let child = self.tree.load(ptr)?;
                    self.stack.push((child, 0));
                }
            }
        }
    }
}

/// Errors that can occur during B-tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// The page store failed.
    Storage(StorageError),
    /// A page read from the store is malformed.
    Node(NodeError),
    /// `verify` found a structural problem.
    InvariantViolation { page: PageId, message: String },
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::InvariantViolation { page, message } => {
                write!(f, "invariant violated at page {page}: {message}")
            }
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::InvariantViolation { .. } => None,
        }
    }
}

impl From<StorageError> for BTreeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}
