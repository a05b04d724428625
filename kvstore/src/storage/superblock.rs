//! Root record stored at the start of page 0.
//!
//! The record is small enough to live inside the first disk sector, so
//! overwriting it is atomic with respect to crashes. A CRC32 over the record
//! detects a torn or garbage record instead of trusting it.

// PAGE_SIZE is a compile-time constant that fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId};

/// Magic number identifying a database file: "COWKVSTR"
pub const MAGIC: [u8; 8] = *b"COWKVSTR";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Bytes covered by a single sector write.
pub const SECTOR_SIZE: usize = 512;

/// Page size as u32 for storage in the record.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Superblock field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const PAGE_SIZE: usize = 12;
    pub const ROOT: usize = 16;
    pub const TOTAL_PAGE_COUNT: usize = 24;
    pub const COMMIT_SEQUENCE: usize = 32;
    pub const CHECKSUM: usize = 40;
    pub const END: usize = 44;
}

/// Size of the encoded record.
pub const RECORD_SIZE: usize = offsets::END;

const _: () = assert!(RECORD_SIZE <= SECTOR_SIZE);

/// The root record: everything needed to find the tree after a restart.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Format version number.
    pub format_version: u32,
    /// Page size in bytes (should always be `PAGE_SIZE`).
    pub page_size: u32,
    /// Root page of the tree, 0 if the tree is empty.
    pub root: PageId,
    /// Number of pages in use, including page 0. The next page is appended here.
    pub total_page_count: u64,
    /// Number of commits that installed this record.
    pub commit_sequence: u64,
}

impl Superblock {
    /// Create a record for a fresh, empty database.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            root: 0,
            total_page_count: 1,
            commit_sequence: 0,
        }
    }

    /// Serialize the record, checksum included.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[offsets::MAGIC..offsets::FORMAT_VERSION].copy_from_slice(&MAGIC);
        buf[offsets::FORMAT_VERSION..offsets::PAGE_SIZE]
            .copy_from_slice(&self.format_version.to_le_bytes());
        buf[offsets::PAGE_SIZE..offsets::ROOT].copy_from_slice(&self.page_size.to_le_bytes());
        buf[offsets::ROOT..offsets::TOTAL_PAGE_COUNT].copy_from_slice(&self.root.to_le_bytes());
        buf[offsets::TOTAL_PAGE_COUNT..offsets::COMMIT_SEQUENCE]
            .copy_from_slice(&self.total_page_count.to_le_bytes());
        buf[offsets::COMMIT_SEQUENCE..offsets::CHECKSUM]
            .copy_from_slice(&self.commit_sequence.to_le_bytes());
        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        buf[offsets::CHECKSUM..offsets::END].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserialize and validate a record from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SuperblockError> {
        if bytes.len() < RECORD_SIZE {
            return Err(SuperblockError::Truncated(bytes.len()));
        }
        let page = Page::from_prefix(&bytes[..RECORD_SIZE])
            .ok_or(SuperblockError::Truncated(bytes.len()))?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(SuperblockError::InvalidMagic(magic));
        }

        let expected = page.read_u32(offsets::CHECKSUM);
        let actual = crc32fast::hash(page.read_bytes(0, offsets::CHECKSUM));
        if expected != actual {
            return Err(SuperblockError::ChecksumMismatch { expected, actual });
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(SuperblockError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(SuperblockError::InvalidPageSize(page_size));
        }

        let superblock = Self {
            format_version,
            page_size,
            root: page.read_u64(offsets::ROOT),
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            commit_sequence: page.read_u64(offsets::COMMIT_SEQUENCE),
        };

        if superblock.total_page_count == 0
            || (superblock.root != 0 && superblock.root >= superblock.total_page_count)
        {
            return Err(SuperblockError::RootOutOfBounds {
                root: superblock.root,
                total_pages: superblock.total_page_count,
            });
        }

        Ok(superblock)
    }

    /// Serialize the record into an otherwise zeroed page 0.
    #[must_use]
    pub fn to_page(&self) -> Page {
        let mut page = Page::new();
        page.write_bytes(0, &self.to_bytes());
        page
    }
}

impl Default for Superblock {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when reading the root record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperblockError {
    /// Fewer bytes than a whole record.
    Truncated(usize),
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Record checksum does not match its contents.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid page size.
    InvalidPageSize(u32),
    /// The root points past the recorded end of the file.
    RootOutOfBounds { root: PageId, total_pages: u64 },
}

impl std::fmt::Display for SuperblockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(f, "root record truncated ({len} bytes)"),
            Self::InvalidMagic(m) => write!(f, "invalid magic: {m:?}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected:#010x}, got {actual:#010x}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid page size: {s}"),
            Self::RootOutOfBounds { root, total_pages } => {
                write!(f, "root page {root} out of bounds (total pages: {total_pages})")
            }
        }
    }
}

impl std::error::Error for SuperblockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superblock_roundtrip() {
        let mut sb = Superblock::new();
        sb.root = 42;
        sb.total_page_count = 100;
        sb.commit_sequence = 7;

        let restored = Superblock::from_bytes(&sb.to_bytes()).expect("should parse");
        assert_eq!(restored, sb);

        let page = sb.to_page();
        let restored = Superblock::from_bytes(page.as_bytes()).expect("should parse page");
        assert_eq!(restored, sb);
    }

    #[test]
    fn test_superblock_invalid_magic() {
        let page = Page::new(); // All zeros
        let result = Superblock::from_bytes(page.as_bytes());
        assert!(matches!(result, Err(SuperblockError::InvalidMagic(_))));
    }

    #[test]
    fn test_superblock_detects_torn_record() {
        let mut sb = Superblock::new();
        sb.root = 5;
        sb.total_page_count = 6;
        let mut bytes = sb.to_bytes();
        bytes[offsets::ROOT] ^= 0x01;

        let result = Superblock::from_bytes(&bytes);
        assert!(matches!(result, Err(SuperblockError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_superblock_rejects_root_past_end() {
        let mut sb = Superblock::new();
        sb.root = 10;
        sb.total_page_count = 10;
        let result = Superblock::from_bytes(&sb.to_bytes());
        assert!(matches!(result, Err(SuperblockError::RootOutOfBounds { .. })));
    }

    #[test]
    fn test_superblock_truncated() {
        let result = Superblock::from_bytes(&[0u8; 10]);
        assert_eq!(result, Err(SuperblockError::Truncated(10)));
    }
}
