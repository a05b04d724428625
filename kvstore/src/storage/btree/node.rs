//! B-tree node encoding.
//!
//! A node is laid out as:
//! - header: `kind` (2 bytes), `key_count` (2 bytes)
//! - pointer array: `key_count` little-endian u64 child pointers (zero in leaves)
//! - offset array: `key_count` u16 offsets of entries 1..=`key_count` relative to
//!   the start of the entry region (the offset of entry 0 is always 0 and not stored)
//! - entry region: per entry `key_len` (2 bytes), `value_len` (2 bytes), key, value
//!
//! Index 0 of every node holds the smallest key reachable through that node. In the
//! leftmost leaf this is the empty sentinel key, so a floor search always lands on
//! some entry.
//!
//! While a node is being rebuilt it lives in a growable buffer that may temporarily
//! exceed one page; it is split back into page-sized nodes before being published.

// Entry lengths and offsets are bounded by the size constants below and fit in u16.
#![allow(clippy::cast_possible_truncation)]

use std::cmp::Ordering;

use crate::storage::page::{PAGE_SIZE, Page, PageId};

/// Size of the node header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Size of one child pointer.
pub const POINTER_SIZE: usize = 8;

/// Size of one offset array slot.
pub const OFFSET_SIZE: usize = 2;

/// Size of the per-entry length prefix (`key_len` + `value_len`).
pub const ENTRY_HEADER_SIZE: usize = 4;

/// Maximum key length in bytes.
pub const MAX_KEY_SIZE: usize = 1000;

/// Maximum value length in bytes.
pub const MAX_VALUE_SIZE: usize = 3000;

/// A child rebuilt by a delete is only considered for merging below this size.
pub const MERGE_THRESHOLD: usize = PAGE_SIZE / 4;

const _: () = assert!(
    HEADER_SIZE + POINTER_SIZE + OFFSET_SIZE + ENTRY_HEADER_SIZE + MAX_KEY_SIZE + MAX_VALUE_SIZE
        < PAGE_SIZE,
    "a single maximal entry must fit in one page"
);

/// Node kind stored in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum NodeKind {
    /// Keys paired with child pointers, no values.
    Internal = 1,
    /// Terminal key-value pairs.
    Leaf = 2,
}

impl TryFrom<u16> for NodeKind {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Internal),
            2 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// A single tree node backed by a growable byte buffer.
///
/// Accessors panic on out-of-bounds indices: those are programming errors in the
/// engine, never the result of user input. Bytes coming from storage go through
/// [`Node::from_page`], which validates them first.
#[derive(Clone, PartialEq, Eq)]
pub struct Node {
    data: Vec<u8>,
}

impl Node {
    /// Create an empty scratch node. `set_header` must be called before anything else.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(PAGE_SIZE),
        }
    }

    /// Decode a node from a page read out of storage.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let mut node = Self {
            data: page.as_bytes().to_vec(),
        };
        let size = node.validate()?;
        node.data.truncate(size);
        Ok(node)
    }

    /// Encode this node into a page.
    ///
    /// # Panics
    ///
    /// Panics if the node does not fit in one page.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let size = self.total_size();
        assert!(
            size <= PAGE_SIZE,
            "node of {size} bytes does not fit in a {PAGE_SIZE} byte page"
        );
        let mut page = Page::new();
        page.write_bytes(0, &self.data[..size]);
        page
    }

    /// Check the structure of bytes that did not originate from this process.
    ///
    /// Returns the encoded size on success.
    fn validate(&self) -> Result<usize, NodeError> {
        let raw_kind = self.read_u16(0);
        NodeKind::try_from(raw_kind).map_err(NodeError::InvalidKind)?;

        let count = self.key_count();
        let entries_start = HEADER_SIZE + (POINTER_SIZE + OFFSET_SIZE) * count;
        if entries_start > PAGE_SIZE {
            return Err(NodeError::TooManyKeys(count));
        }

        let mut previous = 0;
        for idx in 0..count {
            let offset = self.offset(idx + 1);
            if offset < previous {
                return Err(NodeError::OffsetOutOfOrder { index: idx + 1 });
            }
            let pos = entries_start + previous;
            if pos + ENTRY_HEADER_SIZE > PAGE_SIZE || entries_start + offset > PAGE_SIZE {
                return Err(NodeError::EntryOutOfBounds { index: idx });
            }
            let key_len = usize::from(self.read_u16(pos));
            let value_len = usize::from(self.read_u16(pos + 2));
            if previous + ENTRY_HEADER_SIZE + key_len + value_len != offset {
                return Err(NodeError::EntryOutOfBounds { index: idx });
            }
            previous = offset;
        }

        Ok(entries_start + previous)
    }

    fn ensure_len(&mut self, len: usize) {
        if self.data.len() < len {
            self.data.resize(len, 0);
        }
    }

    fn read_u16(&self, pos: usize) -> u16 {
        u16::from_le_bytes([self.data[pos], self.data[pos + 1]])
    }

    fn write_u16(&mut self, pos: usize, value: u16) {
        self.write_bytes(pos, &value.to_le_bytes());
    }

    fn write_bytes(&mut self, pos: usize, bytes: &[u8]) {
        self.ensure_len(pos + bytes.len());
        self.data[pos..pos + bytes.len()].copy_from_slice(bytes);
    }

    // ========== Header ==========

    /// The node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match NodeKind::try_from(self.read_u16(0)) {
            Ok(kind) => kind,
            Err(raw) => panic!("node has invalid kind {raw}"),
        }
    }

    /// Number of entries in the node.
    #[must_use]
    pub fn key_count(&self) -> usize {
        usize::from(self.read_u16(2))
    }

    /// Write the kind and key count.
    ///
    /// Pointer and offset positions depend on the key count, so this comes first.
    pub fn set_header(&mut self, kind: NodeKind, key_count: usize) {
        assert!(
            u16::try_from(key_count).is_ok(),
            "key count {key_count} does not fit in the header"
        );
        self.write_u16(0, kind as u16);
        self.write_u16(2, key_count as u16);
        self.ensure_len(HEADER_SIZE + (POINTER_SIZE + OFFSET_SIZE) * key_count);
    }

    // ========== Pointers ==========

    fn pointer_position(&self, idx: usize) -> usize {
        let count = self.key_count();
        assert!(idx < count, "pointer index {idx} out of bounds ({count} keys)");
        HEADER_SIZE + POINTER_SIZE * idx
    }

    /// Child pointer at `idx`.
    #[must_use]
    pub fn pointer(&self, idx: usize) -> PageId {
        let pos = self.pointer_position(idx);
        let mut buf = [0u8; POINTER_SIZE];
        buf.copy_from_slice(&self.data[pos..pos + POINTER_SIZE]);
        u64::from_le_bytes(buf)
    }

    /// Set the child pointer at `idx`.
    pub fn set_pointer(&mut self, idx: usize, ptr: PageId) {
        let pos = self.pointer_position(idx);
        self.write_bytes(pos, &ptr.to_le_bytes());
    }

    // ========== Offsets ==========

    fn offset_position(&self, idx: usize) -> usize {
        let count = self.key_count();
        assert!(
            (1..=count).contains(&idx),
            "offset index {idx} out of bounds ({count} keys)"
        );
        HEADER_SIZE + POINTER_SIZE * count + OFFSET_SIZE * (idx - 1)
    }

    /// Offset of entry `idx` within the entry region.
    #[must_use]
    pub fn offset(&self, idx: usize) -> usize {
        if idx == 0 {
            return 0;
        }
        usize::from(self.read_u16(self.offset_position(idx)))
    }

    /// Set the offset of entry `idx`. The offset of entry 0 is fixed at 0.
    pub fn set_offset(&mut self, idx: usize, offset: usize) {
        if idx == 0 {
            return;
        }
        let pos = self.offset_position(idx);
        let offset = u16::try_from(offset)
            .unwrap_or_else(|_| panic!("entry offset {offset} does not fit in u16"));
        self.write_u16(pos, offset);
    }

    // ========== Entries ==========

    /// Absolute position of entry `idx`. `idx == key_count()` marks the end of the node.
    #[must_use]
    pub fn entry_position(&self, idx: usize) -> usize {
        let count = self.key_count();
        assert!(idx <= count, "entry index {idx} out of bounds ({count} keys)");
        HEADER_SIZE + (POINTER_SIZE + OFFSET_SIZE) * count + self.offset(idx)
    }

    /// Key of entry `idx`.
    #[must_use]
    pub fn key(&self, idx: usize) -> &[u8] {
        let count = self.key_count();
        assert!(idx < count, "key index {idx} out of bounds ({count} keys)");
        let pos = self.entry_position(idx);
        let key_len = usize::from(self.read_u16(pos));
        let start = pos + ENTRY_HEADER_SIZE;
        &self.data[start..start + key_len]
    }

    /// Value of entry `idx`. Always empty in internal nodes.
    #[must_use]
    pub fn value(&self, idx: usize) -> &[u8] {
        let count = self.key_count();
        assert!(idx < count, "value index {idx} out of bounds ({count} keys)");
        let pos = self.entry_position(idx);
        let key_len = usize::from(self.read_u16(pos));
        let value_len = usize::from(self.read_u16(pos + 2));
        let start = pos + ENTRY_HEADER_SIZE + key_len;
        &self.data[start..start + value_len]
    }

    /// Exact number of bytes this node occupies when encoded.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.entry_position(self.key_count())
    }

    /// Whether the node can be published as a single page.
    #[must_use]
    pub fn fits_in_page(&self) -> bool {
        self.total_size() <= PAGE_SIZE
    }

    /// Write one entry at `idx` and record where the next one starts.
    pub fn append_entry(&mut self, idx: usize, ptr: PageId, key: &[u8], value: &[u8]) {
        self.set_pointer(idx, ptr);
        let pos = self.entry_position(idx);
        self.write_u16(pos, key.len() as u16);
        self.write_u16(pos + 2, value.len() as u16);
        self.write_bytes(pos + ENTRY_HEADER_SIZE, key);
        self.write_bytes(pos + ENTRY_HEADER_SIZE + key.len(), value);
        let next = self.offset(idx) + ENTRY_HEADER_SIZE + key.len() + value.len();
        self.set_offset(idx + 1, next);
    }

    /// Copy `n` whole entries from `src[src_start..]` to `self[dst_start..]`.
    pub fn append_range(&mut self, src: &Self, dst_start: usize, src_start: usize, n: usize) {
        assert!(
            src_start + n <= src.key_count(),
            "source range {src_start}+{n} exceeds {} keys",
            src.key_count()
        );
        assert!(
            dst_start + n <= self.key_count(),
            "destination range {dst_start}+{n} exceeds {} keys",
            self.key_count()
        );
        if n == 0 {
            return;
        }

        for i in 0..n {
            self.set_pointer(dst_start + i, src.pointer(src_start + i));
        }

        let dst_begin = self.offset(dst_start);
        let src_begin = src.offset(src_start);
        for i in 1..=n {
            let offset = dst_begin + src.offset(src_start + i) - src_begin;
            self.set_offset(dst_start + i, offset);
        }

        let begin = src.entry_position(src_start);
        let end = src.entry_position(src_start + n);
        let pos = self.entry_position(dst_start);
        self.write_bytes(pos, &src.data[begin..end]);
    }

    /// Largest index in `[1, key_count)` whose key is `<= key`, or 0 if there is none.
    ///
    /// Index 0 is never compared: it holds the node's minimum key by construction.
    #[must_use]
    pub fn find_floor_index(&self, key: &[u8]) -> usize {
        let mut found = 0;
        let mut low = 1;
        let mut high = self.key_count();
        while low < high {
            let mid = low + (high - low) / 2;
            match self.key(mid).cmp(key) {
                Ordering::Less | Ordering::Equal => {
                    found = mid;
                    low = mid + 1;
                }
                Ordering::Greater => high = mid,
            }
        }
        found
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.data.len() < HEADER_SIZE {
            return f.debug_struct("Node").finish_non_exhaustive();
        }
        f.debug_struct("Node")
            .field("kind", &NodeKind::try_from(self.read_u16(0)))
            .field("key_count", &self.key_count())
            .field("total_size", &self.total_size())
            .finish_non_exhaustive()
    }
}

// ========== Node builders ==========

/// Build `new` from `old` with a new entry inserted at `idx`.
pub fn leaf_insert(new: &mut Node, old: &Node, idx: usize, key: &[u8], value: &[u8]) {
    let count = old.key_count();
    new.set_header(NodeKind::Leaf, count + 1);
    new.append_range(old, 0, 0, idx);
    new.append_entry(idx, 0, key, value);
    new.append_range(old, idx + 1, idx, count - idx);
}

/// Build `new` from `old` with the value at `idx` replaced.
pub fn leaf_update(new: &mut Node, old: &Node, idx: usize, key: &[u8], value: &[u8]) {
    let count = old.key_count();
    new.set_header(NodeKind::Leaf, count);
    new.append_range(old, 0, 0, idx);
    new.append_entry(idx, 0, key, value);
    new.append_range(old, idx + 1, idx + 1, count - idx - 1);
}

/// Build `new` from `old` without the entry at `idx`.
pub fn leaf_delete(new: &mut Node, old: &Node, idx: usize) {
    let count = old.key_count();
    new.set_header(NodeKind::Leaf, count - 1);
    new.append_range(old, 0, 0, idx);
    new.append_range(old, idx, idx + 1, count - idx - 1);
}

/// Concatenate two siblings into `new`.
pub fn merge(new: &mut Node, left: &Node, right: &Node) {
    let kind = left.kind();
    assert_eq!(kind, right.kind(), "cannot merge nodes of different kinds");
    let left_count = left.key_count();
    let right_count = right.key_count();
    new.set_header(kind, left_count + right_count);
    new.append_range(left, 0, 0, left_count);
    new.append_range(right, left_count, 0, right_count);
}

/// Replace the two adjacent links at `idx` and `idx + 1` with a single link.
pub fn replace_two_kids(new: &mut Node, old: &Node, idx: usize, ptr: PageId, key: &[u8]) {
    let count = old.key_count();
    new.set_header(NodeKind::Internal, count - 1);
    new.append_range(old, 0, 0, idx);
    new.append_entry(idx, ptr, key, &[]);
    new.append_range(old, idx + 1, idx + 2, count - idx - 2);
}

/// Split an oversized node in two by key count. Both halves keep the node kind.
pub fn split2(left: &mut Node, right: &mut Node, old: &Node) {
    assert!(
        !old.fits_in_page(),
        "split of a node that already fits ({} bytes)",
        old.total_size()
    );
    let count = old.key_count();
    let right_count = count / 2;
    let left_count = count - right_count;

    left.set_header(old.kind(), left_count);
    right.set_header(old.kind(), right_count);
    left.append_range(old, 0, 0, left_count);
    right.append_range(old, 0, left_count, right_count);
}

/// Split a node into one to three page-sized nodes, in key order.
///
/// The count-based split is tried first. If a part still does not fit, the node is
/// split by bytes instead. A node rebuilt by one mutation is at most one page plus one
/// maximal entry, so three parts always suffice.
#[must_use]
pub fn split3(old: Node) -> Vec<Node> {
    if old.fits_in_page() {
        return vec![old];
    }

    let mut parts = split_by_count(&old);
    if !parts.iter().all(Node::fits_in_page) {
        parts = split_by_size(&old);
        tracing::trace!(parts = parts.len(), "count split overflowed, split by size");
    }

    assert!(
        parts.len() <= 3,
        "split of a {} byte node needed {} parts",
        old.total_size(),
        parts.len()
    );
    for part in &parts {
        assert!(
            part.fits_in_page(),
            "split produced an oversized node ({} bytes)",
            part.total_size()
        );
    }
    tracing::trace!(parts = parts.len(), "split oversized node");
    parts
}

/// Halve by key count, halving once more whichever half is still oversized.
/// Parts may still overflow when large entries cluster.
fn split_by_count(old: &Node) -> Vec<Node> {
    let mut left = Node::new();
    let mut right = Node::new();
    split2(&mut left, &mut right, old);

    if !left.fits_in_page() {
        let mut left_left = Node::new();
        let mut middle = Node::new();
        split2(&mut left_left, &mut middle, &left);
        vec![left_left, middle, right]
    } else if !right.fits_in_page() {
        // A large entry inserted at the tail can leave the upper half oversized.
        let mut middle = Node::new();
        let mut right_right = Node::new();
        split2(&mut middle, &mut right_right, &right);
        vec![left, middle, right_right]
    } else {
        vec![left, right]
    }
}

/// Pack entries left to right, closing a part at the last entry that still fits.
fn split_by_size(old: &Node) -> Vec<Node> {
    let count = old.key_count();
    let mut parts = Vec::new();
    let mut start = 0;
    while start < count {
        let mut end = start + 1;
        while end < count && range_size(old, start, end + 1) <= PAGE_SIZE {
            end += 1;
        }
        let mut part = Node::new();
        part.set_header(old.kind(), end - start);
        part.append_range(old, 0, start, end - start);
        parts.push(part);
        start = end;
    }
    parts
}

/// Encoded size of a node holding entries `start..end` of `node`.
fn range_size(node: &Node, start: usize, end: usize) -> usize {
    HEADER_SIZE
        + (POINTER_SIZE + OFFSET_SIZE) * (end - start)
        + node.offset(end)
        - node.offset(start)
}

/// Errors found while decoding a page read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The kind field is neither leaf nor internal.
    InvalidKind(u16),
    /// The pointer and offset arrays alone overflow the page.
    TooManyKeys(usize),
    /// An offset is smaller than the one before it.
    OffsetOutOfOrder { index: usize },
    /// An entry extends past the page or disagrees with its offsets.
    EntryOutOfBounds { index: usize },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidKind(v) => write!(f, "invalid node kind: {v}"),
            Self::TooManyKeys(n) => write!(f, "key count {n} overflows the page"),
            Self::OffsetOutOfOrder { index } => write!(f, "offset {index} is out of order"),
            Self::EntryOutOfBounds { index } => write!(f, "entry {index} is out of bounds"),
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(entries: &[(&[u8], &[u8])]) -> Node {
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, entries.len());
        for (i, (key, value)) in entries.iter().enumerate() {
            node.append_entry(i, 0, key, value);
        }
        node
    }

    fn keys(node: &Node) -> Vec<Vec<u8>> {
        (0..node.key_count()).map(|i| node.key(i).to_vec()).collect()
    }

    #[test]
    fn test_append_and_read_entries() {
        let node = leaf(&[(b"", b""), (b"apple", b"red"), (b"banana", b"yellow")]);

        assert_eq!(node.kind(), NodeKind::Leaf);
        assert_eq!(node.key_count(), 3);
        assert_eq!(node.key(1), b"apple");
        assert_eq!(node.value(1), b"red");
        assert_eq!(node.key(2), b"banana");
        assert_eq!(node.value(2), b"yellow");

        assert_eq!(node.offset(0), 0);
        assert_eq!(node.offset(1), ENTRY_HEADER_SIZE);
        assert_eq!(node.offset(2), 2 * ENTRY_HEADER_SIZE + 5 + 3);

        // 4 header + 3 * (8 + 2) arrays + (4) + (4 + 5 + 3) + (4 + 6 + 6) entries
        assert_eq!(node.total_size(), 66);
    }

    #[test]
    fn test_internal_pointers() {
        let mut node = Node::new();
        node.set_header(NodeKind::Internal, 2);
        node.append_entry(0, 7, b"", &[]);
        node.append_entry(1, 9, b"m", &[]);

        assert_eq!(node.kind(), NodeKind::Internal);
        assert_eq!(node.pointer(0), 7);
        assert_eq!(node.pointer(1), 9);
        assert!(node.value(1).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_pointer_out_of_bounds_panics() {
        let node = leaf(&[(b"", b"")]);
        let _ = node.pointer(1);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_key_out_of_bounds_panics() {
        let node = leaf(&[(b"", b"")]);
        let _ = node.key(1);
    }

    #[test]
    fn test_find_floor_index() {
        let node = leaf(&[(b"", b""), (b"b", b"1"), (b"d", b"2"), (b"f", b"3")]);

        assert_eq!(node.find_floor_index(b"a"), 0);
        assert_eq!(node.find_floor_index(b"b"), 1);
        assert_eq!(node.find_floor_index(b"c"), 1);
        assert_eq!(node.find_floor_index(b"d"), 2);
        assert_eq!(node.find_floor_index(b"e"), 2);
        assert_eq!(node.find_floor_index(b"z"), 3);
    }

    #[test]
    fn test_find_floor_index_single_entry() {
        let node = leaf(&[(b"k", b"v")]);
        assert_eq!(node.find_floor_index(b"a"), 0);
        assert_eq!(node.find_floor_index(b"z"), 0);
    }

    #[test]
    fn test_leaf_insert_update_delete() {
        let old = leaf(&[(b"", b""), (b"b", b"1"), (b"d", b"2")]);

        let mut inserted = Node::new();
        leaf_insert(&mut inserted, &old, 2, b"c", b"new");
        assert_eq!(keys(&inserted), vec![b"".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(inserted.value(2), b"new");
        assert_eq!(inserted.value(3), b"2");

        let mut updated = Node::new();
        leaf_update(&mut updated, &old, 1, b"b", b"changed");
        assert_eq!(keys(&updated), keys(&old));
        assert_eq!(updated.value(1), b"changed");
        assert_eq!(updated.value(2), b"2");

        let mut deleted = Node::new();
        leaf_delete(&mut deleted, &old, 1);
        assert_eq!(keys(&deleted), vec![b"".to_vec(), b"d".to_vec()]);
        assert_eq!(deleted.value(1), b"2");
    }

    #[test]
    fn test_merge_preserves_kind_and_order() {
        let left = leaf(&[(b"a", b"1"), (b"b", b"2")]);
        let right = leaf(&[(b"c", b"3")]);

        let mut merged = Node::new();
        merge(&mut merged, &left, &right);

        assert_eq!(merged.kind(), NodeKind::Leaf);
        assert_eq!(keys(&merged), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(merged.value(2), b"3");
        assert_eq!(
            merged.total_size(),
            left.total_size() + right.total_size() - HEADER_SIZE
        );
    }

    #[test]
    fn test_replace_two_kids() {
        let mut old = Node::new();
        old.set_header(NodeKind::Internal, 4);
        old.append_entry(0, 1, b"", &[]);
        old.append_entry(1, 2, b"c", &[]);
        old.append_entry(2, 3, b"f", &[]);
        old.append_entry(3, 4, b"k", &[]);

        let mut new = Node::new();
        replace_two_kids(&mut new, &old, 1, 99, b"c");

        assert_eq!(new.key_count(), 3);
        assert_eq!(new.pointer(0), 1);
        assert_eq!(new.pointer(1), 99);
        assert_eq!(new.key(1), b"c");
        assert_eq!(new.pointer(2), 4);
        assert_eq!(new.key(2), b"k");
    }

    #[test]
    fn test_split3_fitting_node_is_unchanged() {
        let node = leaf(&[(b"", b""), (b"a", b"1")]);
        let parts = split3(node.clone());
        assert_eq!(parts, vec![node]);
    }

    #[test]
    fn test_split3_two_way() {
        let value = vec![0xAB; 500];
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..12u8)
            .map(|i| (vec![b'k', i], value.clone()))
            .collect();
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, entries.len());
        for (i, (k, v)) in entries.iter().enumerate() {
            node.append_entry(i, 0, k, v);
        }
        assert!(!node.fits_in_page());

        let parts = split3(node);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].key_count(), 6);
        assert_eq!(parts[1].key_count(), 6);
        assert_eq!(parts[1].key(0), &[b'k', 6]);
        assert!(parts.iter().all(Node::fits_in_page));
    }

    #[test]
    fn test_split3_three_way() {
        // Two large entries in the lower half keep it oversized after the first split.
        let big = vec![0xCD; 3000];
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, 8);
        node.append_entry(0, 0, b"a", &big);
        node.append_entry(1, 0, b"b", b"1");
        node.append_entry(2, 0, b"c", &big);
        for (i, key) in [b"d", b"e", b"f", b"g", b"h"].iter().enumerate() {
            node.append_entry(3 + i, 0, *key, b"2");
        }

        let parts = split3(node);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(Node::fits_in_page));
        assert_eq!(keys(&parts[0]), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(keys(&parts[1]), vec![b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(parts[2].key_count(), 4);
    }

    #[test]
    fn test_split3_oversized_right_half() {
        let big_key = vec![b'y'; MAX_KEY_SIZE];
        let big = vec![0xEE; MAX_VALUE_SIZE];
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, 4);
        node.append_entry(0, 0, b"", b"");
        node.append_entry(1, 0, b"a", b"1");
        node.append_entry(2, 0, b"x", &big);
        node.append_entry(3, 0, &big_key, &big);

        let parts = split3(node);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(Node::fits_in_page));
        assert_eq!(parts[2].key(0), big_key.as_slice());
    }

    #[test]
    fn test_split3_large_entries_clustered_low() {
        // Halving twice by count still leaves [sentinel, a, b] over a page.
        let mut entries: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (Vec::new(), Vec::new()),
            (b"a".to_vec(), vec![1; 3000]),
            (b"b".to_vec(), vec![2; 2000]),
        ];
        for i in 1..=6u8 {
            entries.push((vec![b'c', b'0' + i], b"x".to_vec()));
        }
        let mut node = Node::new();
        node.set_header(NodeKind::Leaf, entries.len());
        for (i, (k, v)) in entries.iter().enumerate() {
            node.append_entry(i, 0, k, v);
        }
        assert!(!split_by_count(&node).iter().all(Node::fits_in_page));

        let parts = split3(node);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(Node::fits_in_page));
        assert_eq!(keys(&parts[0]), vec![Vec::new(), b"a".to_vec()]);
        assert_eq!(parts[1].key(0), b"b");
        assert_eq!(parts[1].key_count(), 7);
    }

    #[test]
    fn test_split3_random_overflowing_nodes() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5711);
        for _ in 0..2000 {
            // A full-ish page plus one maximal-size entry at a random position.
            let mut entries: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
            let mut size = HEADER_SIZE;
            loop {
                let key_len = rng.random_range(1..=MAX_KEY_SIZE);
                let value_len = rng.random_range(0..=MAX_VALUE_SIZE);
                let entry = POINTER_SIZE + OFFSET_SIZE + ENTRY_HEADER_SIZE + key_len + value_len;
                if size + entry > PAGE_SIZE {
                    break;
                }
                size += entry;
                entries.push((vec![b'k'; key_len], vec![0; value_len]));
            }
            let at = rng.random_range(0..=entries.len());
            let extra_key = rng.random_range(1..=MAX_KEY_SIZE);
            entries.insert(at, (vec![b'z'; extra_key], vec![0; MAX_VALUE_SIZE]));

            let mut node = Node::new();
            node.set_header(NodeKind::Leaf, entries.len());
            for (i, (k, v)) in entries.iter().enumerate() {
                node.append_entry(i, 0, k, v);
            }
            let total = entries.len();

            let parts = split3(node);
            assert!(parts.len() <= 3);
            assert!(parts.iter().all(Node::fits_in_page));
            assert_eq!(parts.iter().map(Node::key_count).sum::<usize>(), total);
        }
    }

    #[test]
    fn test_page_roundtrip_and_validation() {
        let node = leaf(&[(b"", b""), (b"hello", b"world")]);
        let page = node.to_page();
        let decoded = Node::from_page(&page).expect("valid node");
        assert_eq!(decoded, node);
    }

    #[test]
    fn test_from_page_rejects_garbage() {
        let mut page = Page::new();
        page.write_bytes(0, &[9, 0, 1, 0]);
        assert_eq!(Node::from_page(&page), Err(NodeError::InvalidKind(9)));

        let node = leaf(&[(b"a", b"1"), (b"b", b"2")]);
        let mut page = node.to_page();
        // Corrupt the stored offset of entry 1 → breaks the length check.
        let pos = HEADER_SIZE + 2 * POINTER_SIZE;
        page.write_bytes(pos, &200u16.to_le_bytes());
        assert!(matches!(
            Node::from_page(&page),
            Err(NodeError::EntryOutOfBounds { .. })
        ));

        let mut page = Page::new();
        page.write_bytes(0, &[2, 0, 0xFF, 0xFF]);
        assert_eq!(Node::from_page(&page), Err(NodeError::TooManyKeys(0xFFFF)));
    }
}
