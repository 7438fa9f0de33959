//! MemoryStore: in-process backing store with watch/exec transactions
//!
//! This module implements the `BackingStore` trait using:
//! - `BTreeMap<String, Slot>` for an ordered keyspace (stable scan cursors)
//! - `parking_lot::RwLock` for thread-safe access
//! - a modification clock stamped onto every key a write actually changes
//!
//! # Watch Semantics
//!
//! `watch()` captures each key's last-modified stamp plus the flush epoch.
//! `exec()` takes the write lock, compares the captured stamps with the
//! current ones and either applies every op or none. Stamps survive key
//! deletion, so delete-then-recreate between watch and exec is a conflict.
//!
//! # Atomicity
//!
//! Ops are type-checked against the keyspace before anything is applied, so
//! a WRONGTYPE or NaN score rejects the whole commit instead of leaving it
//! half-applied.
//!
//! # Fault Injection
//!
//! `set_offline(true)` makes every call fail with `StoreConnection`;
//! `fail_next_execs(n)` fails the next `n` watched commits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use ttseries_core::{
    BackingStore, Error, ExecOutcome, Order, Result, ScanPage, ScoreRange, ScoredMember, WatchSet,
    WriteOp,
};

use crate::glob::glob_match;
use crate::sorted_set::SortedSet;

/// Value held by one key
#[derive(Debug, Clone)]
enum Slot {
    Sorted(SortedSet),
    Hash(BTreeMap<Vec<u8>, Vec<u8>>),
    Counter(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Sorted,
    Hash,
    Counter,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Sorted => "zset",
            Kind::Hash => "hash",
            Kind::Counter => "string",
        }
    }
}

impl Slot {
    fn kind(&self) -> Kind {
        match self {
            Slot::Sorted(_) => Kind::Sorted,
            Slot::Hash(_) => Kind::Hash,
            Slot::Counter(_) => Kind::Counter,
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Slot::Sorted(set) => set.is_empty(),
            Slot::Hash(map) => map.is_empty(),
            Slot::Counter(_) => false,
        }
    }
}

fn wrong_type(key: &str, actual: Kind) -> Error {
    Error::WrongType {
        key: key.to_string(),
        actual: actual.name(),
    }
}

#[derive(Debug, Default)]
struct Keyspace {
    data: BTreeMap<String, Slot>,
    stamps: FxHashMap<String, u64>,
    clock: u64,
    epoch: u64,
}

impl Keyspace {
    fn stamp(&self, key: &str) -> u64 {
        self.stamps.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.stamps.insert(key.to_string(), self.clock);
    }

    fn sorted(&self, key: &str) -> Result<Option<&SortedSet>> {
        match self.data.get(key) {
            Some(Slot::Sorted(set)) => Ok(Some(set)),
            Some(other) => Err(wrong_type(key, other.kind())),
            None => Ok(None),
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&BTreeMap<Vec<u8>, Vec<u8>>>> {
        match self.data.get(key) {
            Some(Slot::Hash(map)) => Ok(Some(map)),
            Some(other) => Err(wrong_type(key, other.kind())),
            None => Ok(None),
        }
    }

    fn is_current(&self, watch: &WatchSet) -> bool {
        watch.epoch == self.epoch
            && watch
                .versions
                .iter()
                .all(|(key, version)| self.stamp(key) == *version)
    }

    /// Dry-run the ops' type requirements against the current keyspace
    fn check(&self, ops: &[WriteOp]) -> Result<()> {
        let mut kinds: FxHashMap<&str, Option<Kind>> = FxHashMap::default();
        for op in ops {
            let (key, wanted) = match op {
                WriteOp::Del { keys } => {
                    for key in keys {
                        kinds.insert(key.as_str(), None);
                    }
                    continue;
                }
                WriteOp::ZAdd { key, entries } => {
                    if let Some((score, _)) = entries.iter().find(|(s, _)| s.is_nan()) {
                        return Err(Error::InvalidTimestamp(*score));
                    }
                    (key, Kind::Sorted)
                }
                WriteOp::ZRem { key, .. }
                | WriteOp::ZRemRangeByScore { key, .. }
                | WriteOp::ZRemRangeByRank { key, .. } => (key, Kind::Sorted),
                WriteOp::HSet { key, .. } | WriteOp::HDel { key, .. } => (key, Kind::Hash),
                WriteOp::IncrBy { key, .. } => (key, Kind::Counter),
            };
            let current = match kinds.get(key.as_str()) {
                Some(kind) => *kind,
                None => self.data.get(key).map(Slot::kind),
            };
            match current {
                Some(kind) if kind != wanted => return Err(wrong_type(key, kind)),
                _ => {
                    kinds.insert(key.as_str(), Some(wanted));
                }
            }
        }
        Ok(())
    }

    fn slot_mut(&mut self, key: &str, fresh: fn() -> Slot) -> &mut Slot {
        self.data.entry(key.to_string()).or_insert_with(fresh)
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.data.get(key).map_or(false, Slot::is_empty) {
            self.data.remove(key);
        }
    }

    /// Apply one op that already passed `check`
    fn apply(&mut self, op: WriteOp) -> i64 {
        match op {
            WriteOp::ZAdd { key, entries } => {
                let mut added = 0;
                let mut changed = false;
                if let Slot::Sorted(set) = self.slot_mut(&key, || Slot::Sorted(SortedSet::new())) {
                    for (score, member) in entries {
                        if set.score(&member) != Some(score) {
                            changed = true;
                        }
                        if let Ok(true) = set.insert(score, member) {
                            added += 1;
                        }
                    }
                }
                self.drop_if_empty(&key);
                if changed {
                    self.touch(&key);
                }
                added
            }
            WriteOp::ZRem { key, members } => {
                let removed = match self.data.get_mut(&key) {
                    Some(Slot::Sorted(set)) => members.iter().filter(|m| set.remove(m)).count(),
                    _ => 0,
                };
                self.after_removal(&key, removed)
            }
            WriteOp::ZRemRangeByScore { key, range } => {
                let removed = match self.data.get_mut(&key) {
                    Some(Slot::Sorted(set)) => set.remove_range_by_score(range),
                    _ => 0,
                };
                self.after_removal(&key, removed)
            }
            WriteOp::ZRemRangeByRank { key, start, stop } => {
                let removed = match self.data.get_mut(&key) {
                    Some(Slot::Sorted(set)) => set.remove_range_by_rank(start, stop),
                    _ => 0,
                };
                self.after_removal(&key, removed)
            }
            WriteOp::HSet { key, fields } => {
                let mut added = 0;
                if let Slot::Hash(map) = self.slot_mut(&key, || Slot::Hash(BTreeMap::new())) {
                    for (field, value) in fields {
                        if map.insert(field, value).is_none() {
                            added += 1;
                        }
                    }
                }
                self.drop_if_empty(&key);
                self.touch(&key);
                added
            }
            WriteOp::HDel { key, fields } => {
                let removed = match self.data.get_mut(&key) {
                    Some(Slot::Hash(map)) => fields.iter().filter(|f| map.remove(*f).is_some()).count(),
                    _ => 0,
                };
                self.after_removal(&key, removed)
            }
            WriteOp::IncrBy { key, delta } => {
                let value = match self.slot_mut(&key, || Slot::Counter(0)) {
                    Slot::Counter(n) => {
                        *n = n.saturating_add(delta);
                        *n
                    }
                    _ => 0,
                };
                self.touch(&key);
                value
            }
            WriteOp::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    if self.data.remove(&key).is_some() {
                        self.touch(&key);
                        removed += 1;
                    }
                }
                removed
            }
        }
    }

    fn after_removal(&mut self, key: &str, removed: usize) -> i64 {
        if removed > 0 {
            self.drop_if_empty(key);
            self.touch(key);
        }
        removed as i64
    }
}

/// In-process sorted-set/hash/counter store
///
/// Thread-safe through `parking_lot::RwLock`. Cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: RwLock<Keyspace>,
    offline: AtomicBool,
    failing_commits: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost connection: every call fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` watched commits with `StoreConnection`
    pub fn fail_next_execs(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Number of keys currently stored
    pub fn key_count(&self) -> usize {
        self.keyspace.read().data.len()
    }

    fn online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::StoreConnection("store offline".to_string()));
        }
        Ok(())
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl BackingStore for MemoryStore {
    fn zcard(&self, key: &str) -> Result<usize> {
        self.online()?;
        Ok(self.keyspace.read().sorted(key)?.map_or(0, SortedSet::len))
    }

    fn zcount(&self, key: &str, range: ScoreRange) -> Result<usize> {
        self.online()?;
        Ok(self
            .keyspace
            .read()
            .sorted(key)?
            .map_or(0, |set| set.count(range)))
    }

    fn zrange_by_score(
        &self,
        key: &str,
        range: ScoreRange,
        order: Order,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredMember>> {
        self.online()?;
        Ok(self
            .keyspace
            .read()
            .sorted(key)?
            .map(|set| set.range_by_score(range, order, offset, limit))
            .unwrap_or_default())
    }

    fn zrange_by_rank(&self, key: &str, start: i64, stop: i64) -> Result<Vec<ScoredMember>> {
        self.online()?;
        Ok(self
            .keyspace
            .read()
            .sorted(key)?
            .map(|set| set.range_by_rank(start, stop))
            .unwrap_or_default())
    }

    fn zrank(&self, key: &str, member: &[u8]) -> Result<Option<usize>> {
        self.online()?;
        Ok(self.keyspace.read().sorted(key)?.and_then(|set| set.rank(member)))
    }

    fn zscan(&self, key: &str, cursor: u64, count: usize) -> Result<ScanPage<ScoredMember>> {
        self.online()?;
        Ok(self
            .keyspace
            .read()
            .sorted(key)?
            .map(|set| set.scan(cursor, count))
            .unwrap_or(ScanPage {
                cursor: 0,
                items: Vec::new(),
            }))
    }

    fn hget_many(&self, key: &str, fields: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        self.online()?;
        let keyspace = self.keyspace.read();
        let map = keyspace.hash(key)?;
        Ok(fields
            .iter()
            .map(|field| map.and_then(|m| m.get(field).cloned()))
            .collect())
    }

    fn hlen(&self, key: &str) -> Result<usize> {
        self.online()?;
        Ok(self.keyspace.read().hash(key)?.map_or(0, BTreeMap::len))
    }

    fn hscan(
        &self,
        key: &str,
        cursor: u64,
        count: usize,
    ) -> Result<ScanPage<(Vec<u8>, Vec<u8>)>> {
        self.online()?;
        let keyspace = self.keyspace.read();
        let Some(map) = keyspace.hash(key)? else {
            return Ok(ScanPage {
                cursor: 0,
                items: Vec::new(),
            });
        };
        let start = cursor as usize;
        let items: Vec<(Vec<u8>, Vec<u8>)> = map
            .iter()
            .skip(start)
            .take(count.max(1))
            .map(|(f, v)| (f.clone(), v.clone()))
            .collect();
        let next = start + items.len();
        Ok(ScanPage {
            cursor: if next >= map.len() { 0 } else { next as u64 },
            items,
        })
    }

    fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        self.online()?;
        match self.keyspace.read().data.get(key) {
            Some(Slot::Counter(n)) => Ok(Some(*n)),
            Some(other) => Err(wrong_type(key, other.kind())),
            None => Ok(None),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.online()?;
        Ok(self.keyspace.read().data.contains_key(key))
    }

    fn scan_keys(
        &self,
        cursor: u64,
        pattern: Option<&str>,
        count: usize,
    ) -> Result<ScanPage<String>> {
        self.online()?;
        let keyspace = self.keyspace.read();
        let start = cursor as usize;
        let window: Vec<&String> = keyspace.data.keys().skip(start).take(count.max(1)).collect();
        let next = start + window.len();
        let items = window
            .into_iter()
            .filter(|key| pattern.map_or(true, |p| glob_match(p, key)))
            .cloned()
            .collect();
        Ok(ScanPage {
            cursor: if next >= keyspace.data.len() { 0 } else { next as u64 },
            items,
        })
    }

    fn flush(&self) -> Result<()> {
        self.online()?;
        let mut keyspace = self.keyspace.write();
        keyspace.data.clear();
        keyspace.stamps.clear();
        keyspace.epoch += 1;
        Ok(())
    }

    fn watch(&self, keys: &[String]) -> Result<WatchSet> {
        self.online()?;
        let keyspace = self.keyspace.read();
        Ok(WatchSet {
            versions: keys.iter().map(|k| (k.clone(), keyspace.stamp(k))).collect(),
            epoch: keyspace.epoch,
        })
    }

    fn exec(&self, watch: Option<&WatchSet>, ops: Vec<WriteOp>) -> Result<ExecOutcome> {
        self.online()?;
        if watch.is_some() && self.take_commit_failure() {
            return Err(Error::StoreConnection("injected commit failure".to_string()));
        }

        let mut keyspace = self.keyspace.write();
        if let Some(watch) = watch {
            if !keyspace.is_current(watch) {
                trace!(keys = ?watch.keys(), "watched key changed, refusing commit");
                return Ok(ExecOutcome::Conflict);
            }
        }
        keyspace.check(&ops)?;
        let replies = ops.into_iter().map(|op| keyspace.apply(op)).collect();
        Ok(ExecOutcome::Committed(replies))
    }
}
