//! Storage abstractions.
//!
//! Two traits live here:
//! - [`PageStore`] is the capability the tree engine consumes: dereference,
//!   allocate and deallocate pages by an opaque pointer.
//! - [`Storage`] is raw page I/O plus the root record, implemented by the real
//!   database file and by the in-memory simulation used for crash testing.
//!
//! [`crate::storage::FilePageStore`] adapts any `Storage` into a `PageStore`
//! with the crash-safe commit sequence.

use crate::storage::page::{Page, PageId};
use crate::storage::superblock::{Superblock, SuperblockError};

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error.
    Io(std::io::Error),
    /// The root record could not be read.
    Superblock(SuperblockError),
    /// Page past the end of storage.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => write!(
                f,
                "page {page_id} out of bounds (total pages: {total_pages})"
            ),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::PageOutOfBounds { .. } | Self::InjectedFault(_) => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SuperblockError> for StorageError {
    fn from(e: SuperblockError) -> Self {
        Self::Superblock(e)
    }
}

/// Page management capability consumed by the tree engine.
///
/// Contract violations (dereferencing or deallocating a pointer that is not
/// live, allocating over a live pointer) are bugs in the caller and panic.
/// Only genuine I/O failures are returned as errors.
pub trait PageStore {
    /// Read the page behind a live pointer.
    fn dereference(&mut self, ptr: PageId) -> Result<Page, StorageError>;

    /// Publish a finalized page and return its new, nonzero pointer.
    fn allocate(&mut self, page: Page) -> Result<PageId, StorageError>;

    /// Retire a live pointer whose replacement has already been allocated.
    fn deallocate(&mut self, ptr: PageId) -> Result<(), StorageError>;
}

/// Abstraction over page-based storage operations.
///
/// This trait allows swapping between real file storage and simulated in-memory
/// storage for deterministic testing.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_page` returns the last written content for a page
/// - `sync` makes all previous writes durable
/// - `write_superblock` overwrites the root record with a single atomic write
///   and only updates `superblock()` once that write succeeded
pub trait Storage {
    /// Read a page from storage.
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError>;

    /// Write a page to storage, extending it if `page_id` is past the end.
    ///
    /// The write may be buffered until `sync` is called.
    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError>;

    /// Sync all pending writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError>;

    /// The root record as last written.
    fn superblock(&self) -> &Superblock;

    /// Overwrite the root record.
    ///
    /// The write may be buffered until `sync` is called.
    fn write_superblock(&mut self, superblock: Superblock) -> Result<(), StorageError>;
}
