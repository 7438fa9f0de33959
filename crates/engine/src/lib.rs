//! Time-series engine for ttseries
//!
//! This crate layers bounded-length time series over a `BackingStore`:
//! - StoreClient: store handle, config, serializer, shared queries
//! - Validator: bulk-insert planning (sort, dedupe, cap, collision check)
//! - TimeSeriesStore: the contract every encoding implements
//! - SimpleTimeSeries: payloads stored directly as sorted-set members
//! - HashTimeSeries: payloads behind per-series IDs in a companion hash
//! - ColumnarTimeSeries: fixed-layout rows over the direct encoding
//!
//! The engine is the only component that knows about:
//! - Series key naming and companion keys
//! - Max-length eviction
//! - Payload serialization

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod columnar;
pub mod config;
pub mod hash;
pub mod scan;
pub mod serializer;
pub mod series;
pub mod simple;
pub mod validator;

pub use client::StoreClient;
pub use columnar::{ColumnarTimeSeries, Record, RecordLayout};
pub use config::TimeSeriesConfig;
pub use hash::HashTimeSeries;
pub use serializer::{serializer_by_name, JsonSerializer, MsgPackSerializer, Serializer};
pub use series::{EntryIter, KeyIter, SliceQuery, TimeSeriesStore};
pub use simple::SimpleTimeSeries;
