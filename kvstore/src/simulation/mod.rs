//! Deterministic Simulation Testing (DST) infrastructure.
//!
//! This module provides tools for testing the store with:
//! - In-memory storage that separates written from durable state
//! - Fault injection at every storage call, by rate or armed one-shot
//! - Crash images reflecting what a real disk could keep
//! - A seeded workload checked against a model after every restart
//!
//! # Design Principles
//!
//! 1. All I/O is abstracted and can be simulated
//! 2. All randomness is seeded for reproducibility
//! 3. Faults can be injected at any I/O boundary
//! 4. Given the same seed, execution is identical
//!
//! # Usage
//!
//! ```
//! use kvstore::simulation::{CrashMode, FaultConfig, Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::new(12345)
//!     .with_fault_config(FaultConfig::low_faults())
//!     .with_crashes(50, CrashMode::DropUnsynced);
//!
//! let result = Simulator::new(config).run(200);
//! assert!(result.passed());
//! ```

mod simulator;
mod storage;

pub use simulator::{InvariantViolation, SimulationResult, Simulator, SimulatorConfig};
pub use storage::{
    CrashMode, FaultConfig, FaultPoint, SimulatedStorage, SimulatedStorageStats, StorageEvent,
};
