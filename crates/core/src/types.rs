//! Core types for ttseries
//!
//! This module defines the vocabulary shared by the store contract and the
//! layers above it:
//! - ScoreRange: inclusive/exclusive timestamp bounds
//! - Order: ascending/descending range scans
//! - WriteOp: buffered write commands committed by a transaction
//! - WatchSet / ExecOutcome: optimistic watch tokens and commit results
//! - ScanPage: one page of a cursor-based scan

use std::ops::Bound;

/// Member of a sorted set (encoded payload or indirection ID)
pub type Member = Vec<u8>;

/// A `(member, score)` pair as returned by range queries
pub type ScoredMember = (Member, f64);

/// Timestamp bounds for range operations
///
/// Absent bounds are unbounded. `Bound::Excluded` corresponds to the
/// `(`-prefixed score syntax of sorted-set stores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    /// Lower bound
    pub min: Bound<f64>,
    /// Upper bound
    pub max: Bound<f64>,
}

impl ScoreRange {
    /// Unbounded range: `-inf .. +inf`
    pub const fn all() -> Self {
        ScoreRange {
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        }
    }

    /// Inclusive range; `None` means unbounded on that side
    pub fn between(start: Option<f64>, end: Option<f64>) -> Self {
        ScoreRange {
            min: start.map_or(Bound::Unbounded, Bound::Included),
            max: end.map_or(Bound::Unbounded, Bound::Included),
        }
    }

    /// Exactly one timestamp
    pub fn exact(timestamp: f64) -> Self {
        ScoreRange {
            min: Bound::Included(timestamp),
            max: Bound::Included(timestamp),
        }
    }

    /// Replace the lower bound with an exclusive one
    pub fn exclusive_start(mut self, start: f64) -> Self {
        self.min = Bound::Excluded(start);
        self
    }

    /// Replace the upper bound with an exclusive one
    pub fn exclusive_end(mut self, end: f64) -> Self {
        self.max = Bound::Excluded(end);
        self
    }

    /// True if neither side is bounded
    pub fn is_unbounded(&self) -> bool {
        matches!(self.min, Bound::Unbounded) && matches!(self.max, Bound::Unbounded)
    }

    /// Check whether a score falls within the range
    pub fn contains(&self, score: f64) -> bool {
        let above = match self.min {
            Bound::Included(min) => score >= min,
            Bound::Excluded(min) => score > min,
            Bound::Unbounded => true,
        };
        let below = match self.max {
            Bound::Included(max) => score <= max,
            Bound::Excluded(max) => score < max,
            Bound::Unbounded => true,
        };
        above && below
    }
}

impl Default for ScoreRange {
    fn default() -> Self {
        ScoreRange::all()
    }
}

/// Scan direction for score range queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Lowest timestamp first
    #[default]
    Ascending,
    /// Highest timestamp first
    Descending,
}

/// A buffered write command
///
/// Transactions queue these and hand them to the store in one commit.
/// Each op yields one integer reply, mirroring sorted-set store replies.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Add members with scores; reply = number of new members
    ZAdd {
        /// Sorted-set key
        key: String,
        /// `(score, member)` pairs
        entries: Vec<(f64, Member)>,
    },
    /// Remove members; reply = number removed
    ZRem {
        /// Sorted-set key
        key: String,
        /// Members to remove
        members: Vec<Member>,
    },
    /// Remove members in a score range; reply = number removed
    ZRemRangeByScore {
        /// Sorted-set key
        key: String,
        /// Score range
        range: ScoreRange,
    },
    /// Remove members by rank (negative ranks count from the end); reply = number removed
    ZRemRangeByRank {
        /// Sorted-set key
        key: String,
        /// First rank
        start: i64,
        /// Last rank (inclusive)
        stop: i64,
    },
    /// Set hash fields; reply = number of new fields
    HSet {
        /// Hash key
        key: String,
        /// `(field, value)` pairs
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// Delete hash fields; reply = number removed
    HDel {
        /// Hash key
        key: String,
        /// Fields to delete
        fields: Vec<Vec<u8>>,
    },
    /// Add to a counter; reply = new value
    IncrBy {
        /// Counter key
        key: String,
        /// Amount (may be negative)
        delta: i64,
    },
    /// Delete keys; reply = number of keys removed
    Del {
        /// Keys to delete
        keys: Vec<String>,
    },
}

impl WriteOp {
    /// Keys touched by this op
    pub fn keys(&self) -> Vec<&str> {
        match self {
            WriteOp::ZAdd { key, .. }
            | WriteOp::ZRem { key, .. }
            | WriteOp::ZRemRangeByScore { key, .. }
            | WriteOp::ZRemRangeByRank { key, .. }
            | WriteOp::HSet { key, .. }
            | WriteOp::HDel { key, .. }
            | WriteOp::IncrBy { key, .. } => vec![key.as_str()],
            WriteOp::Del { keys } => keys.iter().map(String::as_str).collect(),
        }
    }
}

/// Versions of watched keys captured at watch time
///
/// Handed back to [`BackingStore::exec`](crate::traits::BackingStore::exec);
/// the commit is refused if any watched key changed in between.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchSet {
    /// `(key, version)` pairs
    pub versions: Vec<(String, u64)>,
    /// Store-wide epoch (bumped by flush)
    pub epoch: u64,
}

impl WatchSet {
    /// Watched key names
    pub fn keys(&self) -> Vec<String> {
        self.versions.iter().map(|(k, _)| k.clone()).collect()
    }

    /// True if no key is watched
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

/// Result of committing buffered writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// All ops applied; one reply per op
    Committed(Vec<i64>),
    /// A watched key changed; nothing applied
    Conflict,
}

impl ExecOutcome {
    /// True if the commit was applied
    pub fn is_committed(&self) -> bool {
        matches!(self, ExecOutcome::Committed(_))
    }
}

/// One page of a cursor scan; `cursor == 0` means the scan is complete
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    /// Cursor for the next call
    pub cursor: u64,
    /// Items in this page
    pub items: Vec<T>,
}
