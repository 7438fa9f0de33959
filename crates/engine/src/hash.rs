//! Indirected encoding
//!
//! Three keys per series `name`:
//!
//! | key          | type       | content                   |
//! |--------------|------------|---------------------------|
//! | `name`       | sorted set | score = timestamp, member = id |
//! | `name:HASH`  | hash       | id -> serialized payload  |
//! | `name:ID`    | counter    | last allocated id         |
//!
//! IDs decouple payloads from sorted-set membership, so equal payloads can
//! sit at different timestamps. Every write touching the sorted set and the
//! hash happens in one transaction watching both keys.
//!
//! IDs are allocated with an unwatched increment before the transaction.
//! The transaction watches the counter too and commits only while the
//! allocated IDs are unclaimed; if the series was deleted in between, the
//! IDs are abandoned and a fresh block is allocated. If the transaction
//! fails, the allocation is handed back only when no other writer has
//! allocated since; otherwise the gap is left in place.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use ttseries_concurrency::Transaction;
use ttseries_core::keys::{decode_id, encode_id, hash_key, id_key, series_from_id_key};
use ttseries_core::{BackingStore, Error, Result, ScoreRange, ScoredMember, Value};

use crate::client::{check_timestamp, overflow, StoreClient};
use crate::config::TimeSeriesConfig;
use crate::scan::CursorScan;
use crate::series::{EntryIter, KeyIter, SliceQuery, TimeSeriesStore};
use crate::validator::{chunk_ranges, plan_batch, prepare_chunk};

/// Time series storing payloads behind per-series integer IDs
#[derive(Debug, Clone)]
pub struct HashTimeSeries {
    client: StoreClient,
}

impl HashTimeSeries {
    /// Create over `store` with `config`
    pub fn new(store: Arc<dyn BackingStore>, config: TimeSeriesConfig) -> Result<Self> {
        Ok(Self::from_client(StoreClient::new(store, config)?))
    }

    /// Create over an existing client
    pub fn from_client(client: StoreClient) -> Self {
        Self { client }
    }

    /// Create over a fresh in-process store
    pub fn in_memory(config: TimeSeriesConfig) -> Result<Self> {
        Ok(Self::from_client(StoreClient::in_memory(config)?))
    }

    /// Last ID allocated for `name` (0 if none)
    pub fn last_id(&self, name: &str) -> Result<i64> {
        Ok(self.client.store().get_counter(&id_key(name))?.unwrap_or(0))
    }

    fn watched_keys(name: &str) -> Vec<String> {
        vec![name.to_string(), hash_key(name)]
    }

    /// Keys a write with freshly allocated IDs must watch
    fn allocation_keys(name: &str) -> Vec<String> {
        vec![name.to_string(), hash_key(name), id_key(name)]
    }

    /// Allocate `count` IDs and commit the writes `queue` buffers for them
    ///
    /// `queue` receives the last allocated ID. The transaction also watches
    /// the counter and only commits while the IDs are still unclaimed, so a
    /// series deleted between allocation and commit cannot leave an ID that
    /// a later allocation hands out again. Such IDs are abandoned and a new
    /// block is allocated. Returns the last ID of the committed block.
    fn place_with_ids<F>(&self, name: &str, count: usize, mut queue: F) -> Result<i64>
    where
        F: FnMut(&mut Transaction<'_>, i64) -> Result<()>,
    {
        let keys = Self::allocation_keys(name);
        let retry = &self.client.config().retry;
        let mut attempt = 0usize;
        loop {
            let last = self.allocate_ids(name, count)?;
            let placed = self.with_rollback(name, last, count, || {
                self.client.transaction(&keys, |txn| {
                    if !ids_unclaimed(txn.store(), name, last, count)? {
                        return Ok(false);
                    }
                    queue(txn, last)?;
                    Ok(true)
                })
            })?;
            if placed {
                return Ok(last);
            }
            if attempt >= retry.max_retries {
                warn!(
                    series = name,
                    last,
                    attempts = attempt + 1,
                    "allocated ids kept going stale, giving up"
                );
                return Err(Error::ContentionExceeded {
                    keys,
                    attempts: attempt + 1,
                });
            }
            debug!(series = name, last, count, "series reset under allocated ids, reallocating");
            let delay = retry.calculate_delay(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;
        }
    }

    /// Allocate `count` consecutive IDs, returning the last one
    fn allocate_ids(&self, name: &str, count: usize) -> Result<i64> {
        self.client.store().incr_by(&id_key(name), count as i64)
    }

    /// Hand back IDs `last - count + 1 ..= last` if nobody allocated after
    /// them and none of them is live
    fn release_ids(&self, name: &str, last: i64, count: usize) -> Result<()> {
        let counter = id_key(name);
        let keys = vec![counter.clone(), name.to_string()];
        let released = self.client.transaction(&keys, |txn| {
            let store = txn.store();
            let current = store.get_counter(&counter)?;
            if current == Some(last) && ids_unclaimed(store, name, last, count)? {
                txn.incr_by(&counter, -(count as i64));
                return Ok(true);
            }
            Ok(false)
        })?;
        if released {
            warn!(series = name, last, count, "rolled back id allocation");
        } else {
            warn!(series = name, last, count, "id allocation not rolled back, counter moved on");
        }
        Ok(())
    }

    /// Run a write that consumed IDs ending at `last`, releasing them on failure
    fn with_rollback<T>(
        &self,
        name: &str,
        last: i64,
        count: usize,
        write: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        match write() {
            Ok(value) => Ok(value),
            Err(e) => {
                self.release_ids(name, last, count)?;
                Err(e)
            }
        }
    }

    /// Queue removal of the `evict` oldest entries from both structures
    fn queue_eviction(txn: &mut Transaction<'_>, name: &str, evict: usize) -> Result<()> {
        if evict == 0 {
            return Ok(());
        }
        let last = evict as i64 - 1;
        let ids: Vec<Vec<u8>> = txn
            .store()
            .zrange_by_rank(name, 0, last)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        debug!(series = name, evict, "evicting oldest entries");
        txn.zrem_range_by_rank(name, 0, last);
        txn.hdel(&hash_key(name), ids);
        Ok(())
    }

    /// Join `(id, timestamp)` pairs with their payloads
    fn resolve(
        &self,
        name: &str,
        pairs: Vec<ScoredMember>,
        store: &dyn BackingStore,
    ) -> Result<Vec<(f64, Value)>> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Vec<u8>> = pairs.iter().map(|(id, _)| id.clone()).collect();
        let payloads = store.hget_many(&hash_key(name), &ids)?;
        let mut entries = Vec::with_capacity(pairs.len());
        for ((id, ts), raw) in pairs.into_iter().zip(payloads) {
            match raw {
                Some(raw) => entries.push((ts, self.client.decode(&raw)?)),
                None => warn!(
                    series = name,
                    id = %String::from_utf8_lossy(&id),
                    "id without payload, skipping"
                ),
            }
        }
        Ok(entries)
    }

    /// Remove entries in `range` from one series inside `txn`
    fn queue_range_delete(
        txn: &mut Transaction<'_>,
        name: &str,
        range: ScoreRange,
    ) -> Result<usize> {
        let ids: Vec<Vec<u8>> = txn
            .store()
            .zrange_by_score(name, range, Default::default(), 0, None)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        let removed = ids.len();
        if removed > 0 {
            txn.zrem_range_by_score(name, range);
            txn.hdel(&hash_key(name), ids);
        }
        Ok(removed)
    }
}

impl TimeSeriesStore for HashTimeSeries {
    type Payload = Value;

    fn client(&self) -> &StoreClient {
        &self.client
    }

    fn add(&self, name: &str, timestamp: f64, payload: Value) -> Result<()> {
        self.client.validate_key(name)?;
        check_timestamp(timestamp)?;
        let raw = self.client.encode(&payload)?;
        let hash = hash_key(name);
        let max_length = self.client.max_length();

        self.client.with_series_lock(name, || {
            let id = self.place_with_ids(name, 1, |txn, last| {
                if txn.store().zcount(name, ScoreRange::exact(timestamp))? > 0 {
                    return Err(Error::duplicate(name, timestamp));
                }
                let evict = overflow(txn.store().zcard(name)?, 1, max_length);
                Self::queue_eviction(txn, name, evict)?;
                let field = encode_id(last);
                txn.zadd(name, vec![(timestamp, field.clone())]);
                txn.hset(&hash, vec![(field, raw.clone())]);
                Ok(())
            })?;
            trace!(series = name, id, "entry committed");
            Ok(())
        })
    }

    fn add_many(
        &self,
        name: &str,
        records: Vec<(f64, Value)>,
        chunk_size: Option<usize>,
    ) -> Result<usize> {
        let chunk_size = chunk_size.unwrap_or(self.client.config().chunk_size);
        let encoded = records
            .into_iter()
            .map(|(ts, payload)| Ok((ts, self.client.encode(&payload)?)))
            .collect::<Result<Vec<_>>>()?;
        let hash = hash_key(name);
        let max_length = self.client.max_length();

        self.client.with_series_lock(name, || {
            let plan = plan_batch(&self.client, name, encoded)?;
            let total = plan.records.len();
            let mut written = 0;

            for range in chunk_ranges(total, chunk_size) {
                let chunk = &plan.records[range.clone()];
                let timestamps: Vec<f64> = chunk.iter().map(|(ts, _)| *ts).collect();
                let remaining = total - range.start;

                let last = self.place_with_ids(name, chunk.len(), |txn, last| {
                    let first = last - chunk.len() as i64 + 1;
                    let evict =
                        prepare_chunk(txn.store(), name, &timestamps, remaining, max_length)?;
                    Self::queue_eviction(txn, name, evict)?;
                    let ids = (first..=last).map(encode_id);
                    txn.zadd(
                        name,
                        chunk.iter().zip(ids.clone()).map(|((ts, _), id)| (*ts, id)).collect(),
                    );
                    txn.hset(
                        &hash,
                        chunk.iter().zip(ids).map(|((_, raw), id)| (id, raw.clone())).collect(),
                    );
                    Ok(())
                })?;

                trace!(series = name, records = chunk.len(), last, "chunk committed");
                written += chunk.len();
            }
            Ok(written)
        })
    }

    fn get(&self, name: &str, timestamp: f64) -> Result<Option<Value>> {
        self.client.validate_key(name)?;
        let keys = Self::watched_keys(name);
        self.client.transaction(&keys, |txn| {
            let pairs = txn.store().zrange_by_score(
                name,
                ScoreRange::exact(timestamp),
                Default::default(),
                0,
                Some(1),
            )?;
            Ok(self
                .resolve(name, pairs, txn.store())?
                .into_iter()
                .next()
                .map(|(_, payload)| payload))
        })
    }

    fn get_slice(&self, name: &str, query: SliceQuery) -> Result<Vec<(f64, Value)>> {
        self.client.validate_key(name)?;
        let keys = Self::watched_keys(name);
        self.client.transaction(&keys, |txn| {
            let pairs = txn.store().zrange_by_score(
                name,
                query.range,
                query.order,
                query.offset,
                query.limit,
            )?;
            self.resolve(name, pairs, txn.store())
        })
    }

    fn delete(&self, name: &str, range: ScoreRange) -> Result<usize> {
        self.client.validate_key(name)?;
        let keys = Self::watched_keys(name);
        self.client.with_series_lock(name, || {
            self.client.transaction(&keys, |txn| {
                if range.is_unbounded() {
                    let removed = txn.store().zcard(name)?;
                    txn.del(vec![name.to_string(), hash_key(name), id_key(name)]);
                    return Ok(removed);
                }
                Self::queue_range_delete(txn, name, range)
            })
        })
    }

    fn trim(&self, name: &str, length: usize) -> Result<usize> {
        self.client.validate_key(name)?;
        if length == 0 {
            return self.delete(name, ScoreRange::all());
        }
        let keys = Self::watched_keys(name);
        self.client.with_series_lock(name, || {
            self.client.transaction(&keys, |txn| {
                let current = txn.store().zcard(name)?;
                if current <= length {
                    return Ok(0);
                }
                let excess = current - length;
                Self::queue_eviction(txn, name, excess)?;
                Ok(excess)
            })
        })
    }

    fn remove_many(&self, names: &[String], range: ScoreRange) -> Result<()> {
        for name in names {
            self.client.validate_key(name)?;
        }
        for chunk in names.chunks(self.client.config().remove_chunk_size) {
            if range.is_unbounded() {
                let doomed: Vec<String> = chunk
                    .iter()
                    .flat_map(|name| [name.clone(), hash_key(name), id_key(name)])
                    .collect();
                self.client.store().delete(&doomed)?;
            } else {
                for name in chunk {
                    self.delete(name, range)?;
                }
            }
        }
        Ok(())
    }

    fn iter<'a>(&'a self, name: &str) -> EntryIter<'a, Value> {
        let store = self.client.store();
        let count = self.client.config().scan_count;
        let series = name.to_string();
        let hash = hash_key(name);
        let ids = CursorScan::new(move |cursor| store.zscan(&series, cursor, count));
        let payloads = CursorScan::new(move |cursor| store.hscan(&hash, cursor, count));
        Box::new(PairedScan {
            client: &self.client,
            name: name.to_string(),
            ids: Box::new(ids),
            payloads: Box::new(payloads),
            ids_done: false,
            payloads_done: false,
            waiting_ids: FxHashMap::default(),
            waiting_payloads: FxHashMap::default(),
            ready: VecDeque::new(),
        })
    }

    fn iter_keys<'a>(&'a self) -> KeyIter<'a> {
        let store = self.client.store();
        let count = self.client.config().scan_count;
        Box::new(
            CursorScan::new(move |cursor| store.scan_keys(cursor, Some("*:ID"), count)).filter_map(
                |item| match item {
                    Ok(key) => series_from_id_key(&key).map(|name| Ok(name.to_string())),
                    Err(e) => Some(Err(e)),
                },
            ),
        )
    }
}

/// Whether IDs `last - count + 1 ..= last` can still be written
///
/// The counter must exist and have reached `last`, and none of the IDs may
/// already be a member. A missing or lower counter means the series was
/// deleted after allocation, so the same IDs will be handed out again.
fn ids_unclaimed(store: &dyn BackingStore, name: &str, last: i64, count: usize) -> Result<bool> {
    match store.get_counter(&id_key(name))? {
        Some(current) if current >= last => {}
        _ => return Ok(false),
    }
    let first = last - count as i64 + 1;
    for id in first..=last {
        if store.zrank(name, &encode_id(id))?.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Joins a sorted-set scan with a hash scan by ID
///
/// The two scans advance independently and may return IDs in different
/// orders, so unmatched halves are parked until their partner shows up.
/// Halves still unmatched when both scans finish are orphans of concurrent
/// writes and are skipped.
struct PairedScan<'a> {
    client: &'a StoreClient,
    name: String,
    ids: Box<dyn Iterator<Item = Result<ScoredMember>> + 'a>,
    payloads: Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 'a>,
    ids_done: bool,
    payloads_done: bool,
    waiting_ids: FxHashMap<Vec<u8>, f64>,
    waiting_payloads: FxHashMap<Vec<u8>, Vec<u8>>,
    ready: VecDeque<(f64, Vec<u8>)>,
}

impl<'a> PairedScan<'a> {
    fn pull_id(&mut self) -> Result<()> {
        match self.ids.next() {
            Some(item) => {
                let (id, ts) = item?;
                match self.waiting_payloads.remove(&id) {
                    Some(raw) => self.ready.push_back((ts, raw)),
                    None => {
                        self.waiting_ids.insert(id, ts);
                    }
                }
            }
            None => self.ids_done = true,
        }
        Ok(())
    }

    fn pull_payload(&mut self) -> Result<()> {
        match self.payloads.next() {
            Some(item) => {
                let (id, raw) = item?;
                match self.waiting_ids.remove(&id) {
                    Some(ts) => self.ready.push_back((ts, raw)),
                    None => {
                        self.waiting_payloads.insert(id, raw);
                    }
                }
            }
            None => self.payloads_done = true,
        }
        Ok(())
    }

    fn report_orphans(&mut self) {
        let orphans = self.waiting_ids.len() + self.waiting_payloads.len();
        if orphans > 0 {
            let sample = self
                .waiting_ids
                .keys()
                .chain(self.waiting_payloads.keys())
                .filter_map(|id| decode_id(id))
                .take(8)
                .collect::<Vec<_>>();
            warn!(series = %self.name, orphans, ?sample, "unmatched ids during iteration");
            self.waiting_ids.clear();
            self.waiting_payloads.clear();
        }
    }
}

impl<'a> Iterator for PairedScan<'a> {
    type Item = Result<(f64, Value)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((ts, raw)) = self.ready.pop_front() {
                return Some(self.client.decode(&raw).map(|payload| (ts, payload)));
            }
            if self.ids_done && self.payloads_done {
                self.report_orphans();
                return None;
            }
            if !self.ids_done {
                if let Err(e) = self.pull_id() {
                    self.ids_done = true;
                    self.payloads_done = true;
                    return Some(Err(e));
                }
            }
            if !self.payloads_done {
                if let Err(e) = self.pull_payload() {
                    self.ids_done = true;
                    self.payloads_done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
