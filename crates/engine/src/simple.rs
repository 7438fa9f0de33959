//! Direct-value encoding
//!
//! Each entry is one sorted-set member: score = timestamp, member = the
//! serialized payload. Reads need a single round trip.
//!
//! The sorted set is keyed by member, so the same encoded payload cannot
//! live at two timestamps: a ZADD would silently move it. Such writes fail
//! with `RepeatedValue` instead; use the indirected encoding when payloads
//! repeat.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use ttseries_core::keys;
use ttseries_core::{BackingStore, Error, Result, ScoreRange, ScoredMember, Value, WriteOp};

use crate::client::{check_timestamp, overflow, StoreClient};
use crate::config::TimeSeriesConfig;
use crate::scan::CursorScan;
use crate::series::{EntryIter, KeyIter, SliceQuery, TimeSeriesStore};
use crate::validator::{chunk_ranges, plan_batch, prepare_chunk, BatchPlan};

/// Time series storing payloads directly as sorted-set members
#[derive(Debug, Clone)]
pub struct SimpleTimeSeries {
    client: StoreClient,
}

impl SimpleTimeSeries {
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

    pub(crate) fn add_encoded(&self, name: &str, timestamp: f64, member: Vec<u8>) -> Result<()> {
        self.client.validate_key(name)?;
        check_timestamp(timestamp)?;
        let keys = vec![name.to_string()];
        let max_length = self.client.max_length();

        self.client.with_series_lock(name, || {
            self.client.transaction(&keys, |txn| {
                let store = txn.store();
                if store.zcount(name, ScoreRange::exact(timestamp))? > 0 {
                    return Err(Error::duplicate(name, timestamp));
                }
                let evict = overflow(store.zcard(name)?, 1, max_length);
                if let Some(existing) = repeated_member(store, name, &member, evict)? {
                    return Err(Error::RepeatedValue {
                        key: name.to_string(),
                        timestamp: existing,
                    });
                }
                if evict > 0 {
                    debug!(series = name, evict, "series full, evicting oldest");
                    txn.zrem_range_by_rank(name, 0, evict as i64 - 1);
                }
                txn.zadd(name, vec![(timestamp, member.clone())]);
                Ok(())
            })
        })
    }

    pub(crate) fn add_many_encoded(
        &self,
        name: &str,
        records: Vec<(f64, Vec<u8>)>,
        chunk_size: Option<usize>,
    ) -> Result<usize> {
        let chunk_size = chunk_size.unwrap_or(self.client.config().chunk_size);
        self.client.with_series_lock(name, || {
            let plan = plan_batch(&self.client, name, records)?;

            let mut seen: FxHashSet<&[u8]> = FxHashSet::default();
            for (ts, member) in &plan.records {
                if !seen.insert(member.as_slice()) {
                    return Err(Error::RepeatedValue {
                        key: name.to_string(),
                        timestamp: *ts,
                    });
                }
            }
            for (_, member) in &plan.records {
                if let Some(existing) = repeated_member(self.client.store(), name, member, plan.evict)? {
                    return Err(Error::RepeatedValue {
                        key: name.to_string(),
                        timestamp: existing,
                    });
                }
            }

            self.write_chunks(name, &plan, chunk_size)
        })
    }

    fn write_chunks(
        &self,
        name: &str,
        plan: &BatchPlan<Vec<u8>>,
        chunk_size: usize,
    ) -> Result<usize> {
        let keys = vec![name.to_string()];
        let max_length = self.client.max_length();
        let total = plan.records.len();
        let mut written = 0;

        for range in chunk_ranges(total, chunk_size) {
            let chunk = &plan.records[range.clone()];
            let timestamps: Vec<f64> = chunk.iter().map(|(ts, _)| *ts).collect();
            let remaining = total - range.start;

            self.client.transaction(&keys, |txn| {
                let store = txn.store();
                let evict = prepare_chunk(store, name, &timestamps, remaining, max_length)?;
                for (_, member) in chunk {
                    if let Some(existing) = repeated_member(store, name, member, evict)? {
                        return Err(Error::RepeatedValue {
                            key: name.to_string(),
                            timestamp: existing,
                        });
                    }
                }
                if evict > 0 {
                    debug!(series = name, evict, "evicting oldest before batch");
                    txn.zrem_range_by_rank(name, 0, evict as i64 - 1);
                }
                txn.zadd(name, chunk.to_vec());
                Ok(())
            })?;

            trace!(series = name, records = chunk.len(), "chunk committed");
            written += chunk.len();
        }
        Ok(written)
    }

    pub(crate) fn slice_encoded(&self, name: &str, query: SliceQuery) -> Result<Vec<ScoredMember>> {
        self.client.validate_key(name)?;
        self.client.store().zrange_by_score(
            name,
            query.range,
            query.order,
            query.offset,
            query.limit,
        )
    }

    pub(crate) fn get_encoded(&self, name: &str, timestamp: f64) -> Result<Option<Vec<u8>>> {
        Ok(self
            .slice_encoded(name, SliceQuery::range(ScoreRange::exact(timestamp)).limit(1))?
            .into_iter()
            .next()
            .map(|(member, _)| member))
    }

    pub(crate) fn iter_encoded<'a>(&'a self, name: &str) -> CursorScan<'a, ScoredMember> {
        let name = name.to_string();
        let store = self.client.store();
        let count = self.client.config().scan_count;
        CursorScan::new(move |cursor| store.zscan(&name, cursor, count))
    }
}

/// Timestamp of an existing entry with this exact member, unless it is
/// among the `evict` oldest about to be removed
fn repeated_member(
    store: &dyn BackingStore,
    name: &str,
    member: &[u8],
    evict: usize,
) -> Result<Option<f64>> {
    match store.zrank(name, member)? {
        Some(rank) if rank >= evict => {
            let rank = rank as i64;
            Ok(store
                .zrange_by_rank(name, rank, rank)?
                .first()
                .map(|(_, score)| *score))
        }
        _ => Ok(None),
    }
}

impl TimeSeriesStore for SimpleTimeSeries {
    type Payload = Value;

    fn client(&self) -> &StoreClient {
        &self.client
    }

    fn add(&self, name: &str, timestamp: f64, payload: Value) -> Result<()> {
        let member = self.client.encode(&payload)?;
        self.add_encoded(name, timestamp, member)
    }

    fn add_many(
        &self,
        name: &str,
        records: Vec<(f64, Value)>,
        chunk_size: Option<usize>,
    ) -> Result<usize> {
        let encoded = records
            .into_iter()
            .map(|(ts, payload)| Ok((ts, self.client.encode(&payload)?)))
            .collect::<Result<Vec<_>>>()?;
        self.add_many_encoded(name, encoded, chunk_size)
    }

    fn get(&self, name: &str, timestamp: f64) -> Result<Option<Value>> {
        self.get_encoded(name, timestamp)?
            .map(|raw| self.client.decode(&raw))
            .transpose()
    }

    fn get_slice(&self, name: &str, query: SliceQuery) -> Result<Vec<(f64, Value)>> {
        self.slice_encoded(name, query)?
            .into_iter()
            .map(|(member, ts)| Ok((ts, self.client.decode(&member)?)))
            .collect()
    }

    fn delete(&self, name: &str, range: ScoreRange) -> Result<usize> {
        self.client.validate_key(name)?;
        let keys = vec![name.to_string()];
        self.client.with_series_lock(name, || {
            self.client.transaction(&keys, |txn| {
                if range.is_unbounded() {
                    let removed = txn.store().zcard(name)?;
                    txn.del(keys.clone());
                    return Ok(removed);
                }
                let removed = txn.store().zcount(name, range)?;
                if removed > 0 {
                    txn.zrem_range_by_score(name, range);
                }
                Ok(removed)
            })
        })
    }

    fn trim(&self, name: &str, length: usize) -> Result<usize> {
        self.client.validate_key(name)?;
        let keys = vec![name.to_string()];
        self.client.with_series_lock(name, || {
            self.client.transaction(&keys, |txn| {
                let current = txn.store().zcard(name)?;
                if length == 0 {
                    txn.del(keys.clone());
                    return Ok(current);
                }
                if current <= length {
                    return Ok(0);
                }
                let excess = current - length;
                txn.zrem_range_by_rank(name, 0, excess as i64 - 1);
                Ok(excess)
            })
        })
    }

    fn remove_many(&self, names: &[String], range: ScoreRange) -> Result<()> {
        for name in names {
            self.client.validate_key(name)?;
        }
        let store = self.client.store();
        for chunk in names.chunks(self.client.config().remove_chunk_size) {
            if range.is_unbounded() {
                store.delete(chunk)?;
            } else {
                let ops = chunk
                    .iter()
                    .map(|name| WriteOp::ZRemRangeByScore {
                        key: name.clone(),
                        range,
                    })
                    .collect();
                store.exec(None, ops)?;
            }
        }
        Ok(())
    }

    fn iter<'a>(&'a self, name: &str) -> EntryIter<'a, Value> {
        let client = &self.client;
        Box::new(
            self.iter_encoded(name)
                .map(move |item| item.and_then(|(member, ts)| Ok((ts, client.decode(&member)?)))),
        )
    }

    fn iter_keys<'a>(&'a self) -> KeyIter<'a> {
        let store = self.client.store();
        let count = self.client.config().scan_count;
        Box::new(
            CursorScan::new(move |cursor| store.scan_keys(cursor, None, count))
                .filter(|item| !matches!(item, Ok(key) if keys::is_companion_key(key))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ttseries_core::Order;

    fn series(max_length: usize) -> SimpleTimeSeries {
        SimpleTimeSeries::in_memory(TimeSeriesConfig::new().with_max_length(max_length)).unwrap()
    }

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    fn timestamps(entries: &[(f64, Value)]) -> Vec<f64> {
        entries.iter().map(|(ts, _)| *ts).collect()
    }

    #[test]
    fn test_add_and_get() {
        let ts = series(100);
        let payload = Value::object([("value", Value::Int(21)), ("volume", Value::Float(1.5))]);
        ts.add("x", 1.5, payload.clone()).unwrap();
        assert_eq!(ts.get("x", 1.5).unwrap(), Some(payload));
        assert_eq!(ts.get("x", 2.0).unwrap(), None);
        assert_eq!(ts.length("x").unwrap(), 1);
    }

    #[test]
    fn test_fifo_eviction_scenario() {
        let ts = series(3);
        for (t, p) in [(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")] {
            ts.add("X", t, s(p)).unwrap();
        }
        assert_eq!(ts.length("X").unwrap(), 3);
        assert_eq!(ts.get("X", 1.0).unwrap(), None);
        assert_eq!(
            ts.get_slice("X", SliceQuery::all()).unwrap(),
            vec![(2.0, s("b")), (3.0, s("c")), (4.0, s("d"))]
        );
    }

    #[test]
    fn test_duplicate_timestamp_rejected() {
        let ts = series(100);
        ts.add("x", 1.0, s("a")).unwrap();
        assert!(matches!(
            ts.add("x", 1.0, s("b")),
            Err(Error::DuplicateTimestamp { .. })
        ));
        assert_eq!(ts.get("x", 1.0).unwrap(), Some(s("a")));
    }

    #[test]
    fn test_repeated_value_rejected() {
        let ts = series(100);
        ts.add("x", 1.0, s("a")).unwrap();
        match ts.add("x", 2.0, s("a")) {
            Err(Error::RepeatedValue { timestamp, .. }) => assert_eq!(timestamp, 1.0),
            other => panic!("expected RepeatedValue, got {:?}", other),
        }
        assert_eq!(ts.get("x", 1.0).unwrap(), Some(s("a")));
    }

    #[test]
    fn test_repeated_value_of_evicted_entry_allowed() {
        let ts = series(1);
        ts.add("x", 1.0, s("a")).unwrap();
        ts.add("x", 2.0, s("a")).unwrap();
        assert_eq!(ts.get_slice("x", SliceQuery::all()).unwrap(), vec![(2.0, s("a"))]);
    }

    #[test]
    fn test_add_many_sorts() {
        let ts = series(100);
        let written = ts
            .add_many("Y", vec![(5.0, s("p")), (3.0, s("q")), (4.0, s("r"))], None)
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            ts.get_slice("Y", SliceQuery::all()).unwrap(),
            vec![(3.0, s("q")), (4.0, s("r")), (5.0, s("p"))]
        );
    }

    #[test]
    fn test_add_many_rejects_overlap_untouched() {
        let ts = series(100);
        ts.add_many("y", vec![(1.0, s("a")), (2.0, s("b"))], None).unwrap();
        let result = ts.add_many("y", vec![(2.0, s("c")), (3.0, s("d"))], None);
        assert!(matches!(result, Err(Error::DuplicateTimestamp { .. })));
        assert_eq!(
            ts.get_slice("y", SliceQuery::all()).unwrap(),
            vec![(1.0, s("a")), (2.0, s("b"))]
        );
    }

    #[test]
    fn test_add_many_rejects_repeated_payloads() {
        let ts = series(100);
        let result = ts.add_many("y", vec![(1.0, s("a")), (2.0, s("a"))], None);
        assert!(matches!(result, Err(Error::RepeatedValue { .. })));
        assert!(!ts.exists("y").unwrap());
    }

    #[test]
    fn test_add_many_auto_trims_in_chunks() {
        let ts = series(5);
        ts.add_many("y", (0..4).map(|i| (i as f64, Value::Int(i))).collect(), None)
            .unwrap();
        let written = ts
            .add_many("y", (10..14).map(|i| (i as f64, Value::Int(i))).collect(), Some(1))
            .unwrap();
        assert_eq!(written, 4);
        let entries = ts.get_slice("y", SliceQuery::all()).unwrap();
        assert_eq!(timestamps(&entries), vec![3.0, 10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_add_many_keeps_newest_of_oversized_batch() {
        let ts = series(3);
        let written = ts
            .add_many("y", (0..10).map(|i| (i as f64, Value::Int(i))).collect(), Some(2))
            .unwrap();
        assert_eq!(written, 3);
        let entries = ts.get_slice("y", SliceQuery::all()).unwrap();
        assert_eq!(timestamps(&entries), vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_get_slice_bounds_order_limit() {
        let ts = series(100);
        ts.add_many("y", (1..=6).map(|i| (i as f64, Value::Int(i))).collect(), None)
            .unwrap();
        let mid = ts.get_slice("y", SliceQuery::between(Some(2.0), Some(4.0))).unwrap();
        assert_eq!(timestamps(&mid), vec![2.0, 3.0, 4.0]);
        let newest = ts.get_slice("y", SliceQuery::all().descending().limit(2)).unwrap();
        assert_eq!(timestamps(&newest), vec![6.0, 5.0]);
        let paged = ts.get_slice("y", SliceQuery::all().offset(4)).unwrap();
        assert_eq!(timestamps(&paged), vec![5.0, 6.0]);
        let open = ts
            .get_slice("y", SliceQuery::range(ScoreRange::all().exclusive_start(5.0)))
            .unwrap();
        assert_eq!(timestamps(&open), vec![6.0]);
        assert_eq!(
            ts.get_slice("y", SliceQuery { order: Order::Descending, ..SliceQuery::between(None, Some(1.0)) })
                .unwrap(),
            vec![(1.0, Value::Int(1))]
        );
    }

    #[test]
    fn test_delete_range_and_whole() {
        let ts = series(100);
        ts.add_many("y", (1..=5).map(|i| (i as f64, Value::Int(i))).collect(), None)
            .unwrap();
        assert_eq!(ts.delete("y", ScoreRange::between(Some(2.0), Some(3.0))).unwrap(), 2);
        assert_eq!(ts.length("y").unwrap(), 3);
        assert_eq!(ts.delete("y", ScoreRange::all()).unwrap(), 3);
        assert!(!ts.exists("y").unwrap());
    }

    #[test]
    fn test_trim() {
        let ts = series(100);
        ts.add_many("y", (1..=5).map(|i| (i as f64, Value::Int(i))).collect(), None)
            .unwrap();
        assert_eq!(ts.trim("y", 10).unwrap(), 0);
        assert_eq!(ts.trim("y", 3).unwrap(), 2);
        assert_eq!(ts.trim("y", 3).unwrap(), 0);
        let entries = ts.get_slice("y", SliceQuery::all()).unwrap();
        assert_eq!(timestamps(&entries), vec![3.0, 4.0, 5.0]);
        assert_eq!(ts.trim("y", 0).unwrap(), 3);
        assert!(!ts.exists("y").unwrap());
    }

    #[test]
    fn test_remove_many() {
        let ts = series(100);
        for name in ["a", "b", "c"] {
            ts.add_many(name, (1..=4).map(|i| (i as f64, Value::Int(i))).collect(), None)
                .unwrap();
        }
        let names: Vec<String> = vec!["a".into(), "b".into()];
        ts.remove_many(&names, ScoreRange::between(None, Some(2.0))).unwrap();
        assert_eq!(ts.length("a").unwrap(), 2);
        assert_eq!(ts.length("b").unwrap(), 2);
        ts.remove_many(&names, ScoreRange::all()).unwrap();
        assert!(!ts.exists("a").unwrap());
        assert!(!ts.exists("b").unwrap());
        assert_eq!(ts.length("c").unwrap(), 4);
    }

    #[test]
    fn test_iter_and_iter_keys() {
        let ts = SimpleTimeSeries::in_memory(TimeSeriesConfig {
            scan_count: 2,
            ..TimeSeriesConfig::default()
        })
        .unwrap();
        ts.add_many("y", (1..=5).map(|i| (i as f64, Value::Int(i))).collect(), None)
            .unwrap();
        ts.add("z", 1.0, s("only")).unwrap();

        let mut entries: Vec<(f64, Value)> = ts.iter("y").collect::<Result<_>>().unwrap();
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(timestamps(&entries), vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let mut names: Vec<String> = ts.iter_keys().collect::<Result<_>>().unwrap();
        names.sort();
        assert_eq!(names, vec!["y".to_string(), "z".to_string()]);
    }

    #[test]
    fn test_invalid_key_and_nan() {
        let ts = series(100);
        assert!(matches!(ts.add("y:HASH", 1.0, s("a")), Err(Error::InvalidKey { .. })));
        assert!(matches!(ts.add("y", f64::NAN, s("a")), Err(Error::InvalidTimestamp(_))));
    }

    #[test]
    fn test_companion_keys_rejected_by_every_operation() {
        let store = Arc::new(ttseries_storage::MemoryStore::new());
        let hash = crate::hash::HashTimeSeries::new(store.clone(), TimeSeriesConfig::default())
            .unwrap();
        hash.add("x", 1.0, s("a")).unwrap();
        let ts = SimpleTimeSeries::new(store.clone(), TimeSeriesConfig::default()).unwrap();

        let invalid = |result: Result<()>| matches!(result, Err(Error::InvalidKey { .. }));
        assert!(invalid(ts.delete("x:HASH", ScoreRange::all()).map(drop)));
        assert!(invalid(ts.trim("x:HASH", 0).map(drop)));
        assert!(invalid(ts.get("x:HASH", 1.0).map(drop)));
        assert!(invalid(ts.get_slice("x:ID", SliceQuery::all()).map(drop)));
        assert!(invalid(
            ts.remove_many(&["y".to_string(), "x:ID".to_string()], ScoreRange::all())
        ));
        assert!(invalid(hash.delete("x:HASH", ScoreRange::all()).map(drop)));
        assert!(invalid(hash.trim("x:ID", 0).map(drop)));

        assert!(store.exists("x:HASH").unwrap());
        assert!(store.exists("x:ID").unwrap());
        assert_eq!(hash.get("x", 1.0).unwrap(), Some(s("a")));
    }

    #[test]
    fn test_non_transactional_mode() {
        let ts = SimpleTimeSeries::in_memory(
            TimeSeriesConfig::new()
                .with_max_length(2)
                .with_transactional(false)
                .with_local_lock(false),
        )
        .unwrap();
        for i in 0..4 {
            ts.add("y", i as f64, Value::Int(i)).unwrap();
        }
        let entries = ts.get_slice("y", SliceQuery::all()).unwrap();
        assert_eq!(timestamps(&entries), vec![2.0, 3.0]);
    }

    #[test]
    fn test_store_failure_propagates() {
        let store = Arc::new(ttseries_storage::MemoryStore::new());
        let ts = SimpleTimeSeries::new(store.clone(), TimeSeriesConfig::default()).unwrap();
        store.set_offline(true);
        assert!(matches!(ts.add("y", 1.0, s("a")), Err(Error::StoreConnection(_))));
        assert!(matches!(ts.length("y"), Err(Error::StoreConnection(_))));
        store.set_offline(false);
        ts.add("y", 1.0, s("a")).unwrap();
    }
}
