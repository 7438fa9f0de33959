//! Watched transactions and the optimistic retry loop
//!
//! A [`Transaction`] captures the versions of its watched keys when it
//! begins, lets the body read the store directly and buffers every write.
//! [`Transaction::commit`] hands the buffer to `BackingStore::exec`, which
//! applies it only if no watched key changed in between.
//!
//! [`run_in_transaction`] wraps this in a loop: on conflict the body is
//! re-run from scratch against fresh state. Nothing the body buffered on a
//! refused attempt is ever applied.

use std::thread;

use tracing::{debug, trace, warn};

use ttseries_core::{
    BackingStore, Error, ExecOutcome, Member, Result, ScoreRange, WatchSet, WriteOp,
};

use crate::retry::RetryConfig;

/// Read handle plus write buffer for one attempt
pub struct Transaction<'a> {
    store: &'a dyn BackingStore,
    watch: Option<WatchSet>,
    ops: Vec<WriteOp>,
}

impl<'a> Transaction<'a> {
    /// Watch `keys` and start buffering
    pub fn begin(store: &'a dyn BackingStore, keys: &[String]) -> Result<Self> {
        let watch = store.watch(keys)?;
        Ok(Self {
            store,
            watch: Some(watch),
            ops: Vec::new(),
        })
    }

    /// Start buffering without watching anything; the commit always applies
    pub fn unwatched(store: &'a dyn BackingStore) -> Self {
        Self {
            store,
            watch: None,
            ops: Vec::new(),
        }
    }

    /// Store handle for reads inside the body
    pub fn store(&self) -> &'a dyn BackingStore {
        self.store
    }

    /// True if this transaction watches keys
    pub fn is_watched(&self) -> bool {
        self.watch.is_some()
    }

    /// Buffered writes so far
    pub fn pending(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Buffer an arbitrary write
    pub fn queue(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    /// Buffer a sorted-set add
    pub fn zadd(&mut self, key: &str, entries: Vec<(f64, Member)>) {
        if entries.is_empty() {
            return;
        }
        self.queue(WriteOp::ZAdd {
            key: key.to_string(),
            entries,
        });
    }

    /// Buffer sorted-set member removal
    pub fn zrem(&mut self, key: &str, members: Vec<Member>) {
        if members.is_empty() {
            return;
        }
        self.queue(WriteOp::ZRem {
            key: key.to_string(),
            members,
        });
    }

    /// Buffer removal of a score range
    pub fn zrem_range_by_score(&mut self, key: &str, range: ScoreRange) {
        self.queue(WriteOp::ZRemRangeByScore {
            key: key.to_string(),
            range,
        });
    }

    /// Buffer removal of a rank range
    pub fn zrem_range_by_rank(&mut self, key: &str, start: i64, stop: i64) {
        self.queue(WriteOp::ZRemRangeByRank {
            key: key.to_string(),
            start,
            stop,
        });
    }

    /// Buffer hash field writes
    pub fn hset(&mut self, key: &str, fields: Vec<(Vec<u8>, Vec<u8>)>) {
        if fields.is_empty() {
            return;
        }
        self.queue(WriteOp::HSet {
            key: key.to_string(),
            fields,
        });
    }

    /// Buffer hash field deletion
    pub fn hdel(&mut self, key: &str, fields: Vec<Vec<u8>>) {
        if fields.is_empty() {
            return;
        }
        self.queue(WriteOp::HDel {
            key: key.to_string(),
            fields,
        });
    }

    /// Buffer a counter increment
    pub fn incr_by(&mut self, key: &str, delta: i64) {
        self.queue(WriteOp::IncrBy {
            key: key.to_string(),
            delta,
        });
    }

    /// Buffer key deletion
    pub fn del(&mut self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        self.queue(WriteOp::Del { keys });
    }

    /// Submit the buffer
    ///
    /// A watched transaction with nothing buffered still goes through
    /// `exec`, so a read-only body learns whether its reads were consistent.
    pub fn commit(self) -> Result<ExecOutcome> {
        trace!(ops = self.ops.len(), watched = self.watch.is_some(), "commit");
        self.store.exec(self.watch.as_ref(), self.ops)
    }
}

/// Run `body` atomically with respect to `keys`
///
/// Each attempt watches `keys`, runs `body` and commits its buffered writes.
/// A conflicting commit restarts the body after a backoff delay, up to
/// `retry.max_retries` times, then fails with `Error::ContentionExceeded`.
/// Any error from `body` or the store aborts immediately; buffered writes
/// of that attempt are dropped.
///
/// With `transactional == false` the body runs exactly once and its writes
/// are applied without a watch.
pub fn run_in_transaction<T, F>(
    store: &dyn BackingStore,
    keys: &[String],
    retry: &RetryConfig,
    transactional: bool,
    mut body: F,
) -> Result<T>
where
    F: FnMut(&mut Transaction<'_>) -> Result<T>,
{
    if !transactional {
        let mut txn = Transaction::unwatched(store);
        let value = body(&mut txn)?;
        txn.commit()?;
        return Ok(value);
    }

    let mut attempt = 0usize;
    loop {
        let mut txn = Transaction::begin(store, keys)?;
        let value = body(&mut txn)?;
        match txn.commit()? {
            ExecOutcome::Committed(_) => return Ok(value),
            ExecOutcome::Conflict if attempt < retry.max_retries => {
                debug!(?keys, attempt, "watch conflict, retrying");
                let delay = retry.calculate_delay(attempt);
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                attempt += 1;
            }
            ExecOutcome::Conflict => {
                warn!(?keys, attempts = attempt + 1, "giving up after repeated watch conflicts");
                return Err(Error::ContentionExceeded {
                    keys: keys.to_vec(),
                    attempts: attempt + 1,
                });
            }
        }
    }
}
