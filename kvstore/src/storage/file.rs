//! Database file I/O operations.
//!
//! This module handles reading and writing pages and the root record.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::storage::io::{Storage, StorageError};
use crate::storage::page::{PAGE_SIZE, PAGE_SIZE_U64, Page, PageId};
use crate::storage::superblock::{RECORD_SIZE, Superblock, SuperblockError};

/// A database file handle with low-level page I/O operations.
#[derive(Debug)]
pub struct DatabaseFile {
    file: File,
    superblock: Superblock,
    /// Whole pages physically present in the file.
    file_pages: u64,
}

impl DatabaseFile {
    /// Create a new database file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        // Initialize with a fresh superblock
        let superblock = Superblock::new();
        file.write_all(superblock.to_page().as_bytes())
            .map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        Ok(Self {
            file,
            superblock,
            file_pages: 1,
        })
    }

    /// Open an existing database file.
    ///
    /// Pages past the recorded page count belong to a commit that never
    /// installed its root. They are ignored and overwritten by later writes.
    pub fn open(path: &Path) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut buf = [0u8; RECORD_SIZE];
        file.read_exact(&mut buf).map_err(FileError::Io)?;
        let superblock = Superblock::from_bytes(&buf).map_err(FileError::Superblock)?;

        let len = file.metadata().map_err(FileError::Io)?.len();
        let file_pages = len / PAGE_SIZE_U64;
        if file_pages < superblock.total_page_count {
            return Err(FileError::Truncated {
                file_pages,
                total_pages: superblock.total_page_count,
            });
        }

        Ok(Self {
            file,
            superblock,
            file_pages,
        })
    }

    /// Get a reference to the superblock.
    #[must_use]
    pub const fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Number of whole pages currently in the file, including unreferenced ones.
    #[must_use]
    pub const fn file_pages(&self) -> u64 {
        self.file_pages
    }

    /// Read a page from the file.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Page, FileError> {
        if page_id >= self.file_pages {
            return Err(FileError::PageOutOfBounds {
                page_id,
                total_pages: self.file_pages,
            });
        }

        let mut page = Page::new();
        let offset = page_id * PAGE_SIZE_U64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;
        self.file
            .read_exact(page.as_bytes_mut())
            .map_err(FileError::Io)?;

        Ok(page)
    }

    /// Write a page to the file, extending the file if needed.
    ///
    /// Page 0 holds the root record and can only be changed through
    /// [`DatabaseFile::write_superblock`].
    pub fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), FileError> {
        if page_id == 0 {
            return Err(FileError::ReservedPage);
        }

        let offset = page_id * PAGE_SIZE_U64;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FileError::Io)?;
        self.file
            .write_all(page.as_bytes())
            .map_err(FileError::Io)?;

        self.file_pages = self.file_pages.max(page_id + 1);
        Ok(())
    }

    /// Overwrite the root record.
    ///
    /// Only the record bytes are written, all within the first sector, so the
    /// overwrite is atomic with respect to crashes.
    pub fn write_superblock(&mut self, superblock: Superblock) -> Result<(), FileError> {
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file
            .write_all(&superblock.to_bytes())
            .map_err(FileError::Io)?;

        self.superblock = superblock;
        Ok(())
    }

    /// Sync all pending writes to disk.
    pub fn sync(&self) -> Result<(), FileError> {
        self.file.sync_all().map_err(FileError::Io)
    }
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(std::path::PathBuf),
    /// Superblock error.
    Superblock(SuperblockError),
    /// The file ends before the last page the root record accounts for.
    Truncated { file_pages: u64, total_pages: u64 },
    /// Page ID out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// Attempt to write page 0 as a data page.
    ReservedPage,
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(p) => write!(f, "file already exists: {}", p.display()),
            Self::Superblock(e) => write!(f, "superblock error: {e}"),
            Self::Truncated {
                file_pages,
                total_pages,
            } => write!(
                f,
                "file holds {file_pages} pages but the root record expects {total_pages}"
            ),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => {
                write!(
                    f,
                    "page {page_id} out of bounds (total pages: {total_pages})"
                )
            }
            Self::ReservedPage => write!(f, "page 0 is reserved for the root record"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Superblock(e) => Some(e),
            Self::AlreadyExists(_)
            | Self::Truncated { .. }
            | Self::PageOutOfBounds { .. }
            | Self::ReservedPage => None,
        }
    }
}

impl From<FileError> for StorageError {
    fn from(e: FileError) -> Self {
        match e {
            FileError::Io(io_err) => Self::Io(io_err),
            FileError::PageOutOfBounds {
                page_id,
                total_pages,
            } => Self::PageOutOfBounds {
                page_id,
                total_pages,
            },
            FileError::Superblock(e) => Self::Superblock(e),
            other @ (FileError::AlreadyExists(_)
            | FileError::Truncated { .. }
            | FileError::ReservedPage) => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}

impl Storage for DatabaseFile {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        Self::read_page(self, page_id).map_err(StorageError::from)
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        Self::write_page(self, page_id, page).map_err(StorageError::from)
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        Self::sync(self).map_err(StorageError::from)
    }

    fn superblock(&self) -> &Superblock {
        Self::superblock(self)
    }

    fn write_superblock(&mut self, superblock: Superblock) -> Result<(), StorageError> {
        Self::write_superblock(self, superblock).map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn scratch() -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("store.db");
        (dir, path)
    }

    fn install(db: &mut DatabaseFile, root: PageId, total_page_count: u64) {
        let mut sb = *db.superblock();
        sb.root = root;
        sb.total_page_count = total_page_count;
        sb.commit_sequence += 1;
        db.write_superblock(sb).expect("write root record");
        db.sync().expect("sync");
    }

    #[test]
    fn test_create_then_open_empty() {
        let (_dir, path) = scratch();

        let db = DatabaseFile::create(&path).expect("create");
        assert_eq!(db.file_pages(), 1);
        assert_eq!(db.superblock(), &Superblock::new());
        drop(db);
        assert_eq!(fs::metadata(&path).expect("metadata").len(), PAGE_SIZE_U64);

        let db = DatabaseFile::open(&path).expect("open");
        assert_eq!(db.superblock().root, 0);
        assert_eq!(db.superblock().total_page_count, 1);
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let (_dir, path) = scratch();
        fs::write(&path, b"someone else's data").expect("write file");

        let result = DatabaseFile::create(&path);
        assert!(matches!(result, Err(FileError::AlreadyExists(_))));
        assert_eq!(fs::read(&path).expect("read"), b"someone else's data");
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let (_dir, path) = scratch();
        fs::write(&path, vec![0xAB; PAGE_SIZE]).expect("write file");
        assert!(matches!(
            DatabaseFile::open(&path),
            Err(FileError::Superblock(_))
        ));

        // Shorter than the root record itself.
        fs::write(&path, b"COWKV").expect("write file");
        assert!(matches!(DatabaseFile::open(&path), Err(FileError::Io(_))));
    }

    #[test]
    fn test_sparse_write_zero_fills_gap() {
        let (_dir, path) = scratch();
        let mut db = DatabaseFile::create(&path).expect("create");

        let mut page = Page::new();
        page.write_bytes(0, b"node bytes");
        db.write_page(3, &page).expect("write page");
        assert_eq!(db.file_pages(), 4);

        assert_eq!(db.read_page(3).expect("read").read_bytes(0, 10), b"node bytes");
        assert_eq!(db.read_page(2).expect("read gap"), Page::new());
        assert!(matches!(
            db.read_page(4),
            Err(FileError::PageOutOfBounds {
                page_id: 4,
                total_pages: 4
            })
        ));
    }

    #[test]
    fn test_page_zero_is_reserved() {
        let (_dir, path) = scratch();
        let mut db = DatabaseFile::create(&path).expect("create");

        let result = db.write_page(0, &Page::new());
        assert!(matches!(result, Err(FileError::ReservedPage)));
        assert_eq!(
            StorageError::from(FileError::ReservedPage).to_string(),
            "I/O error: page 0 is reserved for the root record"
        );
    }

    #[test]
    fn test_root_record_and_pages_survive_reopen() {
        let (_dir, path) = scratch();
        {
            let mut db = DatabaseFile::create(&path).expect("create");
            let mut page = Page::new();
            page.write_u64(100, 0xDEAD_BEEF_CAFE_BABE);
            db.write_page(1, &page).expect("write");
            db.write_page(2, &Page::new()).expect("write");
            db.sync().expect("sync");
            install(&mut db, 1, 3);
        }

        let mut db = DatabaseFile::open(&path).expect("open");
        assert_eq!(db.superblock().root, 1);
        assert_eq!(db.superblock().total_page_count, 3);
        assert_eq!(db.superblock().commit_sequence, 1);
        assert_eq!(db.read_page(1).expect("read").read_u64(100), 0xDEAD_BEEF_CAFE_BABE);
    }

    #[test]
    fn test_root_record_overwrite_touches_only_the_record() {
        let (_dir, path) = scratch();
        let mut db = DatabaseFile::create(&path).expect("create");
        install(&mut db, 0, 1);
        drop(db);

        let bytes = fs::read(&path).expect("read");
        assert_eq!(bytes.len(), PAGE_SIZE);
        assert!(bytes[RECORD_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_open_detects_truncated_file() {
        let (_dir, path) = scratch();
        {
            let mut db = DatabaseFile::create(&path).expect("create");
            install(&mut db, 0, 5);
        }

        assert!(matches!(
            DatabaseFile::open(&path),
            Err(FileError::Truncated {
                file_pages: 1,
                total_pages: 5
            })
        ));
    }

    #[test]
    fn test_open_keeps_pages_past_recorded_count() {
        let (_dir, path) = scratch();
        {
            let mut db = DatabaseFile::create(&path).expect("create");
            db.write_page(1, &Page::new()).expect("write");
            db.write_page(2, &Page::new()).expect("write");
            db.sync().expect("sync");
            install(&mut db, 1, 2);
        }

        let db = DatabaseFile::open(&path).expect("open");
        assert_eq!(db.superblock().total_page_count, 2);
        assert_eq!(db.file_pages(), 3);
    }
}
