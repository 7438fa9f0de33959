//! ttseries - bounded-length time series over sorted-set key-value stores
//!
//! A series is a named mapping from `f64` timestamps to payloads, kept in a
//! sorted set with the timestamp as score. Every series has a maximum
//! length; inserting past it evicts the oldest entries. Concurrent writers
//! are reconciled with watch/exec optimistic transactions, never with locks
//! held across store round trips.
//!
//! # Quick Start
//!
//! ```ignore
//! use ttseries::{SimpleTimeSeries, SliceQuery, TimeSeriesConfig, TimeSeriesStore, Value};
//!
//! let series = SimpleTimeSeries::in_memory(TimeSeriesConfig::new().with_max_length(3))?;
//! for (ts, v) in [(1.0, "a"), (2.0, "b"), (3.0, "c"), (4.0, "d")] {
//!     series.add("X", ts, Value::from(v))?;
//! }
//! assert_eq!(series.length("X")?, 3);
//! let newest_first = series.get_slice("X", SliceQuery::all().descending())?;
//! ```
//!
//! # Encodings
//!
//! - [`SimpleTimeSeries`]: payload bytes are the sorted-set members
//! - [`HashTimeSeries`]: members are IDs, payloads live in a companion hash
//! - [`ColumnarTimeSeries`]: fixed-layout rows over the direct encoding
//!
//! All three implement [`TimeSeriesStore`] and run on any [`BackingStore`];
//! [`MemoryStore`] is the in-process one.

pub use ttseries_concurrency::{RetryConfig, SeriesLocks};
pub use ttseries_core::{BackingStore, Error, Order, Result, ScoreRange, Value};
pub use ttseries_engine::{
    ColumnarTimeSeries, HashTimeSeries, JsonSerializer, MsgPackSerializer, Record, RecordLayout,
    Serializer, SimpleTimeSeries, SliceQuery, StoreClient, TimeSeriesConfig, TimeSeriesStore,
};
pub use ttseries_storage::MemoryStore;
