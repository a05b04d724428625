//! Copy-on-write B+tree for the storage engine.
//!
//! # Structure
//!
//! The tree consists of:
//! - Internal nodes: store the first key of each child and the child's page pointer
//! - Leaf nodes: store key-value pairs
//!
//! Every node fits in one page. All leaves sit at the same depth, and the
//! leftmost leaf starts with an empty sentinel key so that every lookup has a
//! floor entry to land on.
//!
//! # Usage
//!
//! ```
//! use kvstore::storage::MemoryPageStore;
//! use kvstore::storage::btree::BTree;
//!
//! let mut tree = BTree::new(MemoryPageStore::new(), 0);
//! tree.insert(b"hello", b"world").unwrap();
//! assert_eq!(tree.get(b"hello").unwrap(), Some(b"world".to_vec()));
//! assert!(tree.delete(b"hello").unwrap());
//! ```

mod node;
mod tree;

pub use node::{
    HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, MERGE_THRESHOLD, Node, NodeError, NodeKind,
    leaf_delete, leaf_insert, leaf_update, merge, replace_two_kids, split2, split3,
};
pub use tree::{BTree, BTreeError, BTreeIterator, TreeStats};
