//! Core types and traits for ttseries
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: Error type hierarchy
//! - Value: Payload value model
//! - ScoreRange, Order, WriteOp, WatchSet: store vocabulary
//! - BackingStore: the store contract the time-series layer runs on
//! - keys: series/companion key naming
//! - limits: default sizes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod keys;
pub mod limits;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use traits::BackingStore;
pub use types::{
    ExecOutcome, Member, Order, ScanPage, ScoreRange, ScoredMember, WatchSet, WriteOp,
};
pub use value::Value;
