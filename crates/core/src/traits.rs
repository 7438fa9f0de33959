//! Backing store abstraction
//!
//! This module defines the `BackingStore` trait: the exact set of sorted-set,
//! hash, counter, keyspace and transaction operations the time-series layer
//! depends on. Any store with equivalent semantics (a Redis connection, the
//! in-process `MemoryStore`) can sit underneath.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync).
//!
//! ## Transactions
//!
//! Reads are issued directly. Writes are buffered as [`WriteOp`]s and
//! committed through [`BackingStore::exec`], which applies them atomically
//! only if none of the keys captured by [`BackingStore::watch`] changed in
//! the meantime. A refused commit is reported as [`ExecOutcome::Conflict`],
//! never as an error.

use crate::error::Result;
use crate::types::{ExecOutcome, Member, Order, ScanPage, ScoreRange, ScoredMember, WatchSet, WriteOp};

/// Store operations consumed by the time-series layer
pub trait BackingStore: Send + Sync {
    // ========================================================================
    // Sorted sets
    // ========================================================================

    /// Cardinality of a sorted set (0 if the key is missing)
    fn zcard(&self, key: &str) -> Result<usize>;

    /// Number of members whose score falls in `range`
    fn zcount(&self, key: &str, range: ScoreRange) -> Result<usize>;

    /// Members in `range`, ordered by score, skipping `offset` and returning
    /// at most `limit` (None = all)
    fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        order: Order,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMember>>;

    /// Members between ranks `start` and `stop` inclusive, ascending.
    /// Negative ranks count from the highest score (-1 = last).
    fn zrange_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>>;

    /// Ascending rank of a member, if present
    fn zrank(&self, key: &str, member: &[u8]) -> Result<Option<usize>>;

    /// Incremental, unordered scan over a sorted set
    fn zscan(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage<ScoredMember>>;

    // ========================================================================
    // Hashes
    // ========================================================================

    /// Values of the given fields, `None` for missing ones
    fn hget_many(&self, key: &str, fields: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    /// Number of fields in a hash
    fn hlen(&self, key: &str) -> Result<usize>;

    /// Incremental, unordered scan over a hash
    fn hscan(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage<(Vec<u8>, Vec<u8>)>>;

    // ========================================================================
    // Counters and keyspace
    // ========================================================================

    /// Current counter value, `None` if the key is missing
    fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    /// Whether a key exists
    fn exists(&self, key: &str) -> Result<bool>;

    /// Incremental scan over key names, optionally filtered by a glob pattern
    fn scan_keys(&self, cursor: u64, pattern: Option<&str>, count: usize)
        -> Result<ScanPage<String>>;

    /// Remove every key (test/reset use only)
    fn flush(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Capture the current versions of `keys`
    fn watch(&self, keys: &[String]) -> Result<WatchSet>;

    /// Apply `ops` atomically. With `Some(watch)`, the commit is refused
    /// (`ExecOutcome::Conflict`) if any watched key changed since the watch.
    fn exec(&self, watch: Option<&WatchSet>, ops: Vec<WriteOp>) -> Result<ExecOutcome>;

    // ========================================================================
    // Unwatched single-op conveniences
    // ========================================================================

    /// Atomically add `delta` to a counter, returning the new value
    fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let outcome = self.exec(
            None,
            vec![WriteOp::IncrBy {
                key: key.to_string(),
                delta,
            }],
        )?;
        Ok(first_reply(outcome))
    }

    /// Delete keys, returning how many existed
    fn delete(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let outcome = self.exec(
            None,
            vec![WriteOp::Del {
                keys: keys.to_vec(),
            }],
        )?;
        Ok(first_reply(outcome).max(0) as usize)
    }

    /// Add members without watching anything
    fn zadd(&self, key: &str, entries: Vec<(f64, Member)>) -> Result<usize> {
        let outcome = self.exec(
            None,
            vec![WriteOp::ZAdd {
                key: key.to_string(),
                entries,
            }],
        )?;
        Ok(first_reply(outcome).max(0) as usize)
    }
}

fn first_reply(outcome: ExecOutcome) -> i64 {
    match outcome {
        ExecOutcome::Committed(replies) => replies.first().copied().unwrap_or(0),
        ExecOutcome::Conflict => 0,
    }
}
