//! The contract shared by every encoding variant
//!
//! [`TimeSeriesStore`] is implemented by the direct, indirected and
//! columnar variants. The queries that only need the sorted set (length,
//! counts, existence) are provided once on top of [`StoreClient`]; each
//! variant supplies the payload-specific reads and writes.

use ttseries_core::{Order, Result, ScoreRange};

use crate::client::StoreClient;

/// Lazy sequence of `(timestamp, payload)` entries
pub type EntryIter<'a, P> = Box<dyn Iterator<Item = Result<(f64, P)>> + 'a>;

/// Lazy sequence of series names
pub type KeyIter<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Parameters of a range query
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SliceQuery {
    /// Timestamp bounds
    pub range: ScoreRange,
    /// Entries to skip before the first returned one
    pub offset: usize,
    /// Maximum entries to return (None = all)
    pub limit: Option<usize>,
    /// Ascending or descending by timestamp
    pub order: Order,
}

impl SliceQuery {
    /// Every entry, ascending
    pub fn all() -> Self {
        Self::default()
    }

    /// Entries with `start <= timestamp <= end`; `None` is unbounded
    pub fn between(start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            range: ScoreRange::between(start, end),
            ..Self::default()
        }
    }

    /// Entries in an explicit range
    pub fn range(range: ScoreRange) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    /// Cap the number of returned entries
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip entries before returning
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Newest first
    pub fn descending(mut self) -> Self {
        self.order = Order::Descending;
        self
    }

    /// Ascending when `ascending` is true, descending otherwise
    pub fn ascending(mut self, ascending: bool) -> Self {
        self.order = if ascending {
            Order::Ascending
        } else {
            Order::Descending
        };
        self
    }
}

/// Bounded-length time series over a backing store
pub trait TimeSeriesStore {
    /// What callers store at each timestamp
    type Payload;

    /// Shared client core
    fn client(&self) -> &StoreClient;

    /// Insert one entry
    ///
    /// Fails with `DuplicateTimestamp` if `timestamp` is taken. When the
    /// series is full the oldest entry is evicted in the same transaction.
    fn add(&self, name: &str, timestamp: f64, payload: Self::Payload) -> Result<()>;

    /// Insert a batch, returning how many records were written
    ///
    /// The batch is validated as a whole before anything is written, then
    /// written in transactions of `chunk_size` records (configured default
    /// when `None`). A chunk failing mid-way leaves earlier chunks committed.
    fn add_many(
        &self,
        name: &str,
        records: Vec<(f64, Self::Payload)>,
        chunk_size: Option<usize>,
    ) -> Result<usize>;

    /// Payload stored at `timestamp`
    fn get(&self, name: &str, timestamp: f64) -> Result<Option<Self::Payload>>;

    /// Entries matching `query`
    fn get_slice(&self, name: &str, query: SliceQuery) -> Result<Vec<(f64, Self::Payload)>>;

    /// Remove entries in `range`, or the whole series when `range` is
    /// unbounded. Returns how many entries were removed.
    fn delete(&self, name: &str, range: ScoreRange) -> Result<usize>;

    /// Keep only the newest `length` entries, returning how many were
    /// removed. `trim(name, 0)` deletes the series.
    fn trim(&self, name: &str, length: usize) -> Result<usize>;

    /// `delete` across many series, batched to bound each round trip
    fn remove_many(&self, names: &[String], range: ScoreRange) -> Result<()>;

    /// Unordered walk over a series; not a snapshot
    fn iter<'a>(&'a self, name: &str) -> EntryIter<'a, Self::Payload>;

    /// Unordered walk over series names
    fn iter_keys<'a>(&'a self) -> KeyIter<'a>;

    /// Number of entries in a series
    fn length(&self, name: &str) -> Result<usize> {
        self.client().length(name)
    }

    /// Number of entries with timestamp in `range`
    fn count(&self, name: &str, range: ScoreRange) -> Result<usize> {
        self.client().count(name, range)
    }

    /// Whether the series exists
    fn exists(&self, name: &str) -> Result<bool> {
        self.client().exists(name)
    }

    /// Whether an entry exists at `timestamp`
    fn timestamp_exists(&self, name: &str, timestamp: f64) -> Result<bool> {
        self.client().timestamp_exists(name, timestamp)
    }

    /// Remove every key in the backing store
    fn flush(&self) -> Result<()> {
        self.client().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_query_builders() {
        let q = SliceQuery::between(Some(1.0), None).limit(5).offset(2).descending();
        assert_eq!(q.range, ScoreRange::between(Some(1.0), None));
        assert_eq!(q.limit, Some(5));
        assert_eq!(q.offset, 2);
        assert_eq!(q.order, Order::Descending);
        assert_eq!(SliceQuery::all().ascending(false).order, Order::Descending);
        assert!(SliceQuery::all().range.is_unbounded());
    }
}
