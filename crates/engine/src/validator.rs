//! Bulk-insert validation
//!
//! Every variant's batch path runs through here before touching the store:
//!
//! 1. Validate the series name and reject NaN timestamps.
//! 2. Reject timestamps repeated inside the batch (all of them are reported).
//! 3. Sort ascending and keep only the newest `max_length` records.
//! 4. Work out how many existing entries must be evicted to make room.
//! 5. Reject the batch if any timestamp collides with an existing entry
//!    that survives that eviction.
//!
//! Nothing is mutated until all of this passes, so a rejected batch leaves
//! the series exactly as it was. Eviction happens later, inside the first
//! chunk's transaction, where [`prepare_chunk`] recomputes it against the
//! state that transaction actually sees.

use std::ops::Range;

use rustc_hash::FxHashSet;
use tracing::debug;

use ttseries_core::{BackingStore, Error, Order, Result, ScoreRange};

use crate::client::{check_timestamp, overflow, StoreClient};

/// A validated batch, sorted ascending and capped to `max_length`
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan<P> {
    /// Records to write, ascending by timestamp
    pub records: Vec<(f64, P)>,
    /// Existing entries that will be evicted when the batch is written
    pub evict: usize,
    /// Oldest incoming records discarded to respect `max_length`
    pub dropped: usize,
}

impl<P> BatchPlan<P> {
    /// Timestamps of the planned records
    pub fn timestamps(&self) -> Vec<f64> {
        self.records.iter().map(|(ts, _)| *ts).collect()
    }
}

/// Validate, sort and cap a batch for `name`
pub fn plan_batch<P>(
    client: &StoreClient,
    name: &str,
    mut records: Vec<(f64, P)>,
) -> Result<BatchPlan<P>> {
    client.validate_key(name)?;
    for (ts, _) in &records {
        check_timestamp(*ts)?;
    }

    let repeated = repeated_timestamps(records.iter().map(|(ts, _)| *ts));
    if !repeated.is_empty() {
        return Err(Error::DuplicateTimestamp {
            key: name.to_string(),
            timestamps: repeated,
        });
    }

    records.sort_by(|a, b| a.0.total_cmp(&b.0));

    let max_length = client.max_length();
    let dropped = records.len().saturating_sub(max_length);
    if dropped > 0 {
        debug!(series = name, dropped, "batch longer than max_length, keeping newest");
        records.drain(..dropped);
    }

    let current = client.length(name)?;
    let evict = overflow(current, records.len(), max_length);
    let plan = BatchPlan {
        records,
        evict,
        dropped,
    };

    let collisions = surviving_collisions(client.store(), name, &plan.timestamps(), evict)?;
    if !collisions.is_empty() {
        return Err(Error::DuplicateTimestamp {
            key: name.to_string(),
            timestamps: collisions,
        });
    }
    Ok(plan)
}

/// Re-check one chunk inside its transaction and return the eviction count
///
/// `remaining` counts the records of this chunk and every later one, so
/// the first chunk makes room for the whole batch.
pub fn prepare_chunk(
    store: &dyn BackingStore,
    name: &str,
    timestamps: &[f64],
    remaining: usize,
    max_length: usize,
) -> Result<usize> {
    let current = store.zcard(name)?;
    let evict = overflow(current, remaining, max_length);
    let collisions = surviving_collisions(store, name, timestamps, evict)?;
    if !collisions.is_empty() {
        return Err(Error::DuplicateTimestamp {
            key: name.to_string(),
            timestamps: collisions,
        });
    }
    Ok(evict)
}

/// Index ranges of consecutive chunks of at most `chunk_size` records
pub fn chunk_ranges(len: usize, chunk_size: usize) -> impl Iterator<Item = Range<usize>> {
    let size = chunk_size.max(1);
    (0..len)
        .step_by(size)
        .map(move |start| start..(start + size).min(len))
}

fn timestamp_bits(ts: f64) -> u64 {
    // -0.0 and 0.0 are the same score
    if ts == 0.0 {
        0.0f64.to_bits()
    } else {
        ts.to_bits()
    }
}

/// Timestamps occurring more than once, ascending
pub(crate) fn repeated_timestamps(timestamps: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut seen = FxHashSet::default();
    let mut repeated: Vec<f64> = Vec::new();
    for ts in timestamps {
        if !seen.insert(timestamp_bits(ts)) {
            repeated.push(ts);
        }
    }
    repeated.sort_by(f64::total_cmp);
    repeated.dedup_by(|a, b| timestamp_bits(*a) == timestamp_bits(*b));
    repeated
}

/// Incoming timestamps matching existing entries that outlive evicting the `evict` oldest
///
/// `timestamps` must be sorted ascending.
fn surviving_collisions(
    store: &dyn BackingStore,
    name: &str,
    timestamps: &[f64],
    evict: usize,
) -> Result<Vec<f64>> {
    let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
        return Ok(Vec::new());
    };
    let range = ScoreRange::between(Some(*first), Some(*last));
    if store.zcount(name, range)? == 0 {
        return Ok(Vec::new());
    }

    let cutoff = if evict > 0 {
        let rank = evict as i64 - 1;
        store
            .zrange_by_rank(name, rank, rank)?
            .first()
            .map(|(_, score)| *score)
    } else {
        None
    };

    let incoming: FxHashSet<u64> = timestamps.iter().map(|ts| timestamp_bits(*ts)).collect();
    Ok(store
        .zrange_by_score(name, range, Order::Ascending, 0, None)?
        .into_iter()
        .map(|(_, score)| score)
        .filter(|score| cutoff.map_or(true, |c| *score > c))
        .filter(|score| incoming.contains(&timestamp_bits(*score)))
        .collect())
}
