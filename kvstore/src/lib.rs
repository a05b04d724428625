// Life of a write:
// 1. Database checks the key and value against the size limits
// 2. BTree rebuilds the root-to-leaf path into new pages (copy-on-write)
// 3. FilePageStore writes the new pages, syncs, overwrites the root record, syncs
// 4. On any failure before the root record is written, the pending pages are
//    dropped and the previous root stays in effect
//
// System components:
//  - Page codec (storage::btree::node)
//  - Tree engine (storage::btree::tree)
//  - Page stores (storage::memory, storage::pager)
//  - Storage backends (storage::file, simulation::storage)

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
mod e2e_tests;
pub mod simulation;
pub mod storage;
#[cfg(test)]
mod testing;
