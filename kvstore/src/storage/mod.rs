//! Copy-on-write key-value storage engine.
//!
//! A single-file storage engine built on a copy-on-write B+tree.
//!
//! # File Format
//!
//! The database is stored in a single file of 4KB pages:
//!
//! - Page 0: the root record (superblock) in its first sector, rest unused
//! - Pages 1-N: B-tree nodes, appended in allocation order and never rewritten
//!   while reachable from the installed root
//!
//! # Commit Protocol
//!
//! Every mutation is committed by:
//! 1. writing all pages allocated by the operation
//! 2. syncing them to stable storage
//! 3. overwriting the root record in place
//! 4. syncing again
//!
//! A crash at any point leaves the file opening to either the previous or the
//! new root, each pointing at a complete tree.
//!
//! # Usage
//!
//! ```ignore
//! use storage::Database;
//!
//! let mut db = Database::open_or_create(path)?;
//! db.set(b"hello", b"world")?;
//! assert_eq!(db.get(b"hello")?, Some(b"world".to_vec()));
//! ```

pub mod btree;
mod database;
mod file;
mod io;
mod memory;
mod page;
mod pager;
mod superblock;

pub use database::{Database, DatabaseError};
pub use file::{DatabaseFile, FileError};
pub use io::{PageStore, Storage, StorageError};
pub use memory::MemoryPageStore;
pub use page::{NULL_PAGE, PAGE_SIZE, PAGE_SIZE_U64, Page, PageId};
pub use pager::{CommitError, CommitStage, FilePageStore, PagerStats};
pub use superblock::{MAGIC, RECORD_SIZE, SECTOR_SIZE, Superblock, SuperblockError};
