//! Store client core
//!
//! `StoreClient` holds the backing-store handle, the configuration and the
//! serializer, and provides the primitive queries every encoding variant
//! shares. Counts are always read from the store; nothing is cached.
//!
//! Writes go through [`StoreClient::transaction`], which applies the
//! configured retry policy and transactional mode, optionally behind the
//! process-local series lock.

use std::fmt;
use std::sync::Arc;

use ttseries_concurrency::{run_in_transaction, SeriesLocks, Transaction};
use ttseries_core::keys;
use ttseries_core::{BackingStore, Error, Result, ScoreRange, Value};
use ttseries_storage::MemoryStore;

use crate::config::TimeSeriesConfig;
use crate::serializer::{serializer_by_name, Serializer};

/// Shared handle to the backing store plus series-wide settings
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn BackingStore>,
    config: TimeSeriesConfig,
    serializer: Arc<dyn Serializer>,
    locks: Option<Arc<SeriesLocks>>,
}

impl fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreClient")
            .field("config", &self.config)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}

impl StoreClient {
    /// Create a client, resolving the serializer named in `config`
    pub fn new(store: Arc<dyn BackingStore>, config: TimeSeriesConfig) -> Result<Self> {
        let serializer = serializer_by_name(&config.serializer)?;
        Self::with_serializer(store, config, serializer)
    }

    /// Create a client with an explicit serializer
    pub fn with_serializer(
        store: Arc<dyn BackingStore>,
        config: TimeSeriesConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        config.validate()?;
        let locks = config.local_lock.then(|| Arc::new(SeriesLocks::new()));
        Ok(Self {
            store,
            config,
            serializer,
            locks,
        })
    }

    /// Client over a fresh in-process `MemoryStore`
    pub fn in_memory(config: TimeSeriesConfig) -> Result<Self> {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Backing store handle
    pub fn store(&self) -> &dyn BackingStore {
        self.store.as_ref()
    }

    /// Active configuration
    pub fn config(&self) -> &TimeSeriesConfig {
        &self.config
    }

    /// Active serializer
    pub fn serializer(&self) -> &dyn Serializer {
        self.serializer.as_ref()
    }

    /// Maximum retained entries per series
    pub fn max_length(&self) -> usize {
        self.config.max_length
    }

    /// Encode a payload with the active serializer
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>> {
        self.serializer.dumps(value)
    }

    /// Decode a payload with the active serializer
    pub fn decode(&self, raw: &[u8]) -> Result<Value> {
        self.serializer.loads(raw)
    }

    // ========================================================================
    // Primitive queries
    // ========================================================================

    /// Number of entries in a series
    pub fn length(&self, name: &str) -> Result<usize> {
        self.store.zcard(name)
    }

    /// Number of entries with timestamp in `range`
    pub fn count(&self, name: &str, range: ScoreRange) -> Result<usize> {
        self.store.zcount(name, range)
    }

    /// Whether the series key exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        self.store.exists(name)
    }

    /// Whether exactly one entry has `timestamp`
    pub fn timestamp_exists(&self, name: &str, timestamp: f64) -> Result<bool> {
        Ok(self.store.zcount(name, ScoreRange::exact(timestamp))? == 1)
    }

    /// Reject names that collide with companion keys
    pub fn validate_key(&self, name: &str) -> Result<()> {
        keys::validate_key(name)
    }

    /// Remove every key in the store
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Run `body` atomically with respect to `keys`
    ///
    /// Watch conflicts re-run the body under the configured retry policy.
    /// In non-transactional mode the body runs once, unwatched.
    pub fn transaction<T, F>(&self, keys: &[String], body: F) -> Result<T>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<T>,
    {
        run_in_transaction(
            self.store.as_ref(),
            keys,
            &self.config.retry,
            self.config.transactional,
            body,
        )
    }

    /// Run `f` holding the process-local lock for `name`, if enabled
    pub fn with_series_lock<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        match &self.locks {
            Some(locks) => locks.with_lock(name, f),
            None => f(),
        }
    }
}

/// Reject NaN timestamps before they reach the store
pub(crate) fn check_timestamp(timestamp: f64) -> Result<()> {
    if timestamp.is_nan() {
        return Err(Error::InvalidTimestamp(timestamp));
    }
    Ok(())
}

/// Number of oldest entries to evict so that `incoming` more fit under `max_length`
pub(crate) fn overflow(current: usize, incoming: usize, max_length: usize) -> usize {
    (current + incoming).saturating_sub(max_length).min(current)
}
