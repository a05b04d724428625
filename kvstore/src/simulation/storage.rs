//! Simulated in-memory storage for deterministic testing.
//!
//! This module provides an in-memory implementation of the `Storage` trait
//! that models what a real disk keeps across a crash:
//! - Every write lands in a volatile view the process reads back
//! - Only a successful sync copies the volatile view into the durable one
//! - [`SimulatedStorage::crash`] builds the image a restarted process would see
//!
//! Faults are injected either by rate from a seeded RNG or armed one-shot at
//! the nth call of a given operation.

// Simulation code legitimately needs cloning for test data
#![allow(clippy::disallowed_methods)]

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::{Page, PageId, Storage, StorageError, Superblock};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a page write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of a root record write error (0.0 - 1.0).
    pub superblock_error_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Create a fault config with low fault rates (for stress testing).
    #[must_use]
    pub const fn low_faults() -> Self {
        Self {
            read_error_rate: 0.001,
            write_error_rate: 0.001,
            sync_error_rate: 0.001,
            superblock_error_rate: 0.001,
        }
    }

    /// Create a fault config with high fault rates (for extreme testing).
    #[must_use]
    pub const fn high_faults() -> Self {
        Self {
            read_error_rate: 0.02,
            write_error_rate: 0.02,
            sync_error_rate: 0.05,
            superblock_error_rate: 0.05,
        }
    }
}

/// Storage operation a fault can be armed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    PageRead,
    PageWrite,
    Sync,
    SuperblockWrite,
}

impl std::fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PageRead => write!(f, "page read"),
            Self::PageWrite => write!(f, "page write"),
            Self::Sync => write!(f, "sync"),
            Self::SuperblockWrite => write!(f, "superblock write"),
        }
    }
}

/// What survives a simulated crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashMode {
    /// Only synced writes survive.
    DropUnsynced,
    /// Every completed write survives, synced or not.
    KeepUnsynced,
    /// Each unsynced write independently survives or not, as if the disk
    /// reordered them. The root record is treated as one more such write.
    Reorder,
}

/// A successful storage operation, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEvent {
    WritePage(PageId),
    Sync,
    WriteSuperblock { root: PageId },
}

/// Statistics about simulated storage operations.
#[derive(Debug, Default, Clone)]
pub struct SimulatedStorageStats {
    /// Number of page reads.
    pub reads: u64,
    /// Number of page writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of root record writes.
    pub superblock_writes: u64,
    /// Number of injected faults of any kind.
    pub injected_faults: u64,
}

/// In-memory storage implementation for deterministic testing.
///
/// # Thread Safety
///
/// This implementation is not thread-safe. For DST, we run everything
/// in a single thread, so this is fine.
#[derive(Debug)]
pub struct SimulatedStorage {
    /// Pages as the running process sees them.
    pages: HashMap<PageId, Page>,
    /// Pages as they were at the last successful sync.
    durable_pages: HashMap<PageId, Page>,
    /// Pages written since the last successful sync.
    unsynced: BTreeSet<PageId>,
    /// The root record as the running process sees it.
    superblock: Superblock,
    /// The root record as of the last successful sync.
    durable_superblock: Superblock,

    /// Fault injection configuration.
    fault_config: FaultConfig,
    /// One-shot faults: operation and remaining calls until it fires.
    armed: Vec<(FaultPoint, u64)>,
    /// Random number generator for fault injection.
    rng: StdRng,

    /// Statistics for tracking.
    stats: SimulatedStorageStats,
    events: Vec<StorageEvent>,
}

impl SimulatedStorage {
    /// Create a new simulated storage with the given seed.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, FaultConfig::default())
    }

    /// Create a new simulated storage with custom fault configuration.
    #[must_use]
    pub fn with_config(seed: u64, fault_config: FaultConfig) -> Self {
        Self::from_image(
            HashMap::new(),
            Superblock::new(),
            fault_config,
            StdRng::seed_from_u64(seed),
        )
    }

    fn from_image(
        pages: HashMap<PageId, Page>,
        superblock: Superblock,
        fault_config: FaultConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            durable_pages: pages.clone(),
            pages,
            unsynced: BTreeSet::new(),
            superblock,
            durable_superblock: superblock,
            fault_config,
            armed: Vec::new(),
            rng,
            stats: SimulatedStorageStats::default(),
            events: Vec::new(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &SimulatedStorageStats {
        &self.stats
    }

    /// Successful operations since creation or the last crash.
    #[must_use]
    pub fn events(&self) -> &[StorageEvent] {
        &self.events
    }

    /// The root record a crash right now would keep under [`CrashMode::DropUnsynced`].
    #[must_use]
    pub const fn durable_superblock(&self) -> &Superblock {
        &self.durable_superblock
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Make the `n`th upcoming call at `point` fail (1 is the next call).
    pub fn fail_nth(&mut self, point: FaultPoint, n: u64) {
        assert!(n > 0, "faults are armed on upcoming calls, starting at 1");
        self.armed.push((point, n));
    }

    /// Simulate a crash, returning the storage a restarted process would open.
    ///
    /// The restarted storage has no faults configured.
    #[must_use]
    pub fn crash(mut self, mode: CrashMode) -> Self {
        let (pages, superblock) = match mode {
            CrashMode::KeepUnsynced => (self.pages, self.superblock),
            CrashMode::DropUnsynced => (self.durable_pages, self.durable_superblock),
            CrashMode::Reorder => {
                let mut pages = std::mem::take(&mut self.durable_pages);
                for page_id in &self.unsynced {
                    if self.rng.random_bool(0.5) {
                        if let Some(page) = self.pages.get(page_id) {
                            pages.insert(*page_id, page.clone());
                        }
                    }
                }
                let superblock = if self.superblock != self.durable_superblock
                    && self.rng.random_bool(0.5)
                {
                    self.superblock
                } else {
                    self.durable_superblock
                };
                (pages, superblock)
            }
        };
        tracing::debug!(?mode, root = superblock.root, "simulated crash");
        Self::from_image(pages, superblock, FaultConfig::default(), self.rng)
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    fn check_fault(&mut self, point: FaultPoint) -> Result<(), StorageError> {
        let mut fire = false;
        self.armed.retain_mut(|(armed_point, remaining)| {
            if *armed_point != point {
                return true;
            }
            *remaining -= 1;
            if *remaining == 0 {
                fire = true;
                return false;
            }
            true
        });

        let rate = match point {
            FaultPoint::PageRead => self.fault_config.read_error_rate,
            FaultPoint::PageWrite => self.fault_config.write_error_rate,
            FaultPoint::Sync => self.fault_config.sync_error_rate,
            FaultPoint::SuperblockWrite => self.fault_config.superblock_error_rate,
        };
        if fire || self.should_inject_fault(rate) {
            self.stats.injected_faults += 1;
            return Err(StorageError::InjectedFault(format!("simulated {point} error")));
        }
        Ok(())
    }
}

impl Storage for SimulatedStorage {
    fn read_page(&mut self, page_id: PageId) -> Result<Page, StorageError> {
        self.stats.reads += 1;
        self.check_fault(FaultPoint::PageRead)?;

        if page_id == 0 {
            return Ok(self.superblock.to_page());
        }
        self.pages
            .get(&page_id)
            .cloned()
            .ok_or(StorageError::PageOutOfBounds {
                page_id,
                total_pages: self.superblock.total_page_count,
            })
    }

    fn write_page(&mut self, page_id: PageId, page: &Page) -> Result<(), StorageError> {
        self.stats.writes += 1;
        self.check_fault(FaultPoint::PageWrite)?;
        assert_ne!(page_id, 0, "page 0 holds the root record");

        self.pages.insert(page_id, page.clone());
        self.unsynced.insert(page_id);
        self.events.push(StorageEvent::WritePage(page_id));
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StorageError> {
        self.stats.syncs += 1;
        self.check_fault(FaultPoint::Sync)?;

        for page_id in std::mem::take(&mut self.unsynced) {
            if let Some(page) = self.pages.get(&page_id) {
                self.durable_pages.insert(page_id, page.clone());
            }
        }
        self.durable_superblock = self.superblock;
        self.events.push(StorageEvent::Sync);
        Ok(())
    }

    fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    fn write_superblock(&mut self, superblock: Superblock) -> Result<(), StorageError> {
        self.stats.superblock_writes += 1;
        self.check_fault(FaultPoint::SuperblockWrite)?;

        self.superblock = superblock;
        self.events.push(StorageEvent::WriteSuperblock {
            root: superblock.root,
        });
        Ok(())
    }
}
