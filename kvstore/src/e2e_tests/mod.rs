//! End-to-end tests at the public database level.
//!
//! Each test file covers a specific scenario, using deterministic inputs
//! and a `BTreeMap` reference model to check the complete read/write cycle.

#![cfg(test)]

mod helpers;

mod test_boundary_limits;
mod test_crash_recovery;
mod test_delete;
mod test_example;
mod test_iteration;
mod test_persistence;
mod test_read_after_write;
mod test_split_merge;
