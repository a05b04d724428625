//! Main simulator harness for deterministic simulation testing.
//!
//! Drives a [`Database`] over [`SimulatedStorage`] with a seeded random
//! workload, injected I/O faults and periodic crashes, checking the store
//! against an in-memory model after every restart.

// Simulation code legitimately needs cloning for test data
#![allow(clippy::disallowed_methods)]

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::storage::{CrashMode, FaultConfig, SimulatedStorage};
use crate::storage::{Database, DatabaseError};

type Model = BTreeMap<Vec<u8>, Vec<u8>>;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Fault injection configuration.
    pub fault_config: FaultConfig,
    /// Number of distinct keys the workload draws from.
    pub key_space: u64,
    /// Largest value the workload writes.
    pub max_value_len: usize,
    /// Crash and restart after this many operations (0 never crashes).
    pub crash_every: usize,
    /// What survives each crash.
    pub crash_mode: CrashMode,
    /// Compare the full contents with the model after this many operations.
    pub check_every: usize,
}

impl SimulatorConfig {
    /// Create a new simulator config with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            fault_config: FaultConfig::default(),
            key_space: 300,
            max_value_len: 400,
            crash_every: 0,
            crash_mode: CrashMode::DropUnsynced,
            check_every: 100,
        }
    }

    /// Set the fault configuration.
    #[must_use]
    pub fn with_fault_config(mut self, config: FaultConfig) -> Self {
        self.fault_config = config;
        self
    }

    /// Crash every `every` operations using `mode`.
    #[must_use]
    pub const fn with_crashes(mut self, every: usize, mode: CrashMode) -> Self {
        self.crash_every = every;
        self.crash_mode = mode;
        self
    }

    /// Set the number of distinct keys.
    #[must_use]
    pub const fn with_key_space(mut self, key_space: u64) -> Self {
        self.key_space = key_space;
        self
    }

    /// Set the largest value length.
    #[must_use]
    pub const fn with_max_value_len(mut self, max_value_len: usize) -> Self {
        self.max_value_len = max_value_len;
        self
    }
}

/// A disagreement between the store and the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantViolation {
    /// Operation index at which it was detected.
    pub step: usize,
    /// What went wrong.
    pub message: String,
}

/// Results from a simulation run.
#[derive(Debug)]
pub struct SimulationResult {
    /// The seed used for this simulation.
    pub seed: u64,
    /// Number of operations issued.
    pub operations: usize,
    /// Number of operations that completed.
    pub successful_operations: u64,
    /// Number of operations that failed with an injected I/O error.
    pub failed_operations: u64,
    /// Number of simulated crashes.
    pub crashes: u64,
    /// Invariant violations detected.
    pub invariant_violations: Vec<InvariantViolation>,
}

impl SimulationResult {
    /// Check if the simulation passed (no invariant violations).
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.invariant_violations.is_empty()
    }
}

/// The main simulator harness.
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    /// Contents the running process should observe.
    model: Model,
    /// Contents as of the last commit known to be durable, when that differs
    /// from `model` because a commit failed after writing its root record.
    durable: Option<Model>,
    successful_operations: u64,
    failed_operations: u64,
    crashes: u64,
    violations: Vec<InvariantViolation>,
}

impl Simulator {
    /// Create a new simulator with the given configuration.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed ^ 0x5151_5151);
        Self {
            config,
            rng,
            model: Model::new(),
            durable: None,
            successful_operations: 0,
            failed_operations: 0,
            crashes: 0,
            violations: Vec::new(),
        }
    }

    /// Run `operation_count` random operations.
    pub fn run(&mut self, operation_count: usize) -> SimulationResult {
        let storage =
            SimulatedStorage::with_config(self.config.seed, self.config.fault_config.clone());
        let mut db = Database::with_storage(storage);

        for step in 0..operation_count {
            self.apply_random_operation(&mut db, step);

            if self.config.crash_every > 0 && (step + 1) % self.config.crash_every == 0 {
                db = self.crash_and_restart(db, step);
            } else if self.config.check_every > 0 && (step + 1) % self.config.check_every == 0 {
                self.check_contents(&mut db, step);
            }
        }
        self.check_contents(&mut db, operation_count);

        tracing::debug!(
            seed = self.config.seed,
            ok = self.successful_operations,
            failed = self.failed_operations,
            crashes = self.crashes,
            "simulation finished"
        );

        SimulationResult {
            seed: self.config.seed,
            operations: operation_count,
            successful_operations: self.successful_operations,
            failed_operations: self.failed_operations,
            crashes: self.crashes,
            invariant_violations: self.violations.clone(),
        }
    }

    fn violation(&mut self, step: usize, message: String) {
        tracing::warn!(seed = self.config.seed, step, %message, "invariant violation");
        self.violations.push(InvariantViolation { step, message });
    }

    fn random_key(&mut self) -> Vec<u8> {
        format!("key{:06}", self.rng.random_range(0..self.config.key_space)).into_bytes()
    }

    fn random_value(&mut self) -> Vec<u8> {
        let len = self.rng.random_range(0..=self.config.max_value_len);
        (0..len).map(|_| self.rng.random()).collect()
    }

    fn apply_random_operation(&mut self, db: &mut Database<SimulatedStorage>, step: usize) {
        let key = self.random_key();
        match self.rng.random_range(0..10) {
            0..=5 => {
                let value = self.random_value();
                let result = db.set(&key, &value);
                self.record_mutation(step, result.map(|()| true), |model| {
                    model.insert(key, value);
                });
            }
            6..=8 => {
                let expected = self.model.contains_key(&key);
                let result = db.delete(&key);
                if let Ok(found) = result {
                    if found != expected {
                        self.violation(
                            step,
                            format!("delete reported found={found}, model says {expected}"),
                        );
                    }
                }
                self.record_mutation(step, result, |model| {
                    model.remove(&key);
                });
            }
            _ => match db.get(&key) {
                Ok(value) => {
                    self.successful_operations += 1;
                    if value.as_ref() != self.model.get(&key) {
                        self.violation(step, format!("get returned a stale value for {key:?}"));
                    }
                }
                Err(e) => self.record_failure(step, &e),
            },
        }
    }

    /// Update the models after a mutation. `Ok(false)` means nothing changed.
    fn record_mutation(
        &mut self,
        step: usize,
        result: Result<bool, DatabaseError>,
        apply: impl FnOnce(&mut Model),
    ) {
        match result {
            Ok(changed) => {
                self.successful_operations += 1;
                if changed {
                    apply(&mut self.model);
                    self.durable = None;
                }
            }
            Err(e) if e.is_indeterminate() => {
                self.failed_operations += 1;
                if self.durable.is_none() {
                    self.durable = Some(self.model.clone());
                }
                apply(&mut self.model);
            }
            Err(e) => self.record_failure(step, &e),
        }
    }

    fn record_failure(&mut self, step: usize, error: &DatabaseError) {
        match error {
            DatabaseError::Tree(_) | DatabaseError::Commit(_) => self.failed_operations += 1,
            other => self.violation(step, format!("unexpected error: {other}")),
        }
    }

    fn crash_and_restart(
        &mut self,
        db: Database<SimulatedStorage>,
        step: usize,
    ) -> Database<SimulatedStorage> {
        self.crashes += 1;
        let restarted = db.into_storage().crash(self.config.crash_mode);
        let mut db = Database::with_storage(restarted);

        match read_all(&mut db) {
            Ok(contents) => {
                if contents == self.model {
                    self.durable = None;
                } else if self.durable.as_ref() == Some(&contents) {
                    self.model = contents;
                    self.durable = None;
                } else {
                    self.violation(
                        step,
                        format!(
                            "after crash the store holds {} keys, matching no committed state",
                            contents.len()
                        ),
                    );
                }
            }
            Err(e) => self.violation(step, format!("store unreadable after crash: {e}")),
        }
        if let Err(e) = db.verify() {
            self.violation(step, format!("tree invalid after crash: {e}"));
        }

        db.storage_mut()
            .set_fault_config(self.config.fault_config.clone());
        db
    }

    fn check_contents(&mut self, db: &mut Database<SimulatedStorage>, step: usize) {
        let faults = std::mem::take(&mut self.config.fault_config);
        db.storage_mut().set_fault_config(FaultConfig::no_faults());

        match read_all(db) {
            Ok(contents) if contents == self.model => {}
            Ok(contents) => self.violation(
                step,
                format!(
                    "store holds {} keys, model holds {}",
                    contents.len(),
                    self.model.len()
                ),
            ),
            Err(e) => self.violation(step, format!("store unreadable: {e}")),
        }
        match db.verify() {
            Ok(stats) if stats.entries == self.model.len() => {}
            Ok(stats) => self.violation(
                step,
                format!("verify counted {} entries, model holds {}", stats.entries, self.model.len()),
            ),
            Err(e) => self.violation(step, format!("tree invalid: {e}")),
        }

        db.storage_mut().set_fault_config(faults.clone());
        self.config.fault_config = faults;
    }
}

fn read_all(db: &mut Database<SimulatedStorage>) -> Result<Model, DatabaseError> {
    let mut contents = Model::new();
    let mut iter = db.cursor()?;
    while let Some((key, value)) = iter.next_entry()? {
        contents.insert(key, value);
    }
    Ok(contents)
}
