//! Default limits and sizes
//!
//! These are the defaults behind `TimeSeriesConfig`; every one of them can be
//! overridden per client.

/// Maximum retained entries per series
pub const DEFAULT_MAX_LENGTH: usize = 100_000;

/// Records per transactional write in `add_many`
pub const DEFAULT_CHUNK_SIZE: usize = 2_000;

/// Series names per multi-key delete in `remove_many`
pub const DEFAULT_REMOVE_CHUNK_SIZE: usize = 10_000;

/// Scan page size hint for `iter` / `iter_keys`
pub const DEFAULT_SCAN_COUNT: usize = 1_000;

/// Decimal places kept when converting datetimes to epoch seconds
pub const TIMESTAMP_DECIMALS: i32 = 6;
