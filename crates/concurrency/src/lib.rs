//! Concurrency layer for ttseries
//!
//! This crate implements optimistic concurrency control over a
//! `BackingStore` with:
//! - Transaction: watched keys plus buffered writes, committed in one exec
//! - run_in_transaction: bounded watch/retry loop with exponential backoff
//! - RetryConfig: retry bound and backoff parameters
//! - SeriesLocks: optional process-local per-series mutexes
//!
//! Correctness is carried entirely by the watch/exec check in the store.
//! The local locks only cut same-process contention before it reaches the
//! store; multi-process writers have no shared local lock at all.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod locks;
pub mod retry;
pub mod transaction;

pub use locks::SeriesLocks;
pub use retry::RetryConfig;
pub use transaction::{run_in_transaction, Transaction};
