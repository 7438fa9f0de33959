//! Storage layer for ttseries
//!
//! This crate implements an in-process backing store with:
//! - MemoryStore: BTreeMap keyspace behind a parking_lot RwLock
//! - SortedSet: dual-indexed (member -> score, score -> member) sorted set
//! - Modification stamps per key for watch/exec conflict detection
//! - Glob-filtered keyspace scans
//!
//! The store speaks the `BackingStore` contract from `ttseries-core`, so the
//! time-series layer runs against it exactly as it would against a remote
//! sorted-set server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod glob;
pub mod memory;
pub mod sorted_set;

pub use memory::MemoryStore;
pub use sorted_set::SortedSet;
