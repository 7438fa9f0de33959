//! Columnar encoding
//!
//! Rows of a fixed layout stored through the direct encoding. The
//! timestamp column becomes the score and is stripped from the stored
//! payload; reads put it back in place as a `Float`.
//!
//! Two layouts:
//! - `Ordered { width, timestamp_index }`: rows are positional arrays
//! - `Named { columns, timestamp_column }`: rows are column -> value maps
//!
//! Because storage is direct, two rows whose non-timestamp columns are
//! identical cannot coexist; the second fails with `RepeatedValue`.

use std::collections::BTreeMap;
use std::sync::Arc;

use ttseries_core::limits::TIMESTAMP_DECIMALS;
use ttseries_core::{BackingStore, Error, Result, ScoreRange, Value};

use crate::client::StoreClient;
use crate::config::TimeSeriesConfig;
use crate::series::{EntryIter, KeyIter, SliceQuery, TimeSeriesStore};
use crate::simple::SimpleTimeSeries;

/// One row
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Positional columns
    Ordered(Vec<Value>),
    /// Named columns
    Named(BTreeMap<String, Value>),
}

/// Shape every row of a series must have
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLayout {
    /// Positional rows of `width` columns, timestamp at `timestamp_index`
    Ordered {
        /// Number of columns, timestamp included
        width: usize,
        /// Position of the timestamp column
        timestamp_index: usize,
    },
    /// Named rows with exactly `columns`, timestamp in `timestamp_column`
    Named {
        /// Column names, timestamp included
        columns: Vec<String>,
        /// Name of the timestamp column
        timestamp_column: String,
    },
}

impl RecordLayout {
    /// Positional layout
    pub fn ordered(width: usize, timestamp_index: usize) -> Result<Self> {
        if timestamp_index >= width {
            return Err(Error::InvalidConfig(format!(
                "timestamp index {} outside a {}-column layout",
                timestamp_index, width
            )));
        }
        Ok(RecordLayout::Ordered {
            width,
            timestamp_index,
        })
    }

    /// Named layout
    pub fn named<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        timestamp_column: impl Into<String>,
    ) -> Result<Self> {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let timestamp_column = timestamp_column.into();
        if !columns.contains(&timestamp_column) {
            return Err(Error::InvalidConfig(format!(
                "timestamp column '{}' is not one of {:?}",
                timestamp_column, columns
            )));
        }
        Ok(RecordLayout::Named {
            columns,
            timestamp_column,
        })
    }

    /// Split a row into its timestamp and the payload to store
    pub fn split(&self, record: Record) -> Result<(f64, Value)> {
        match (self, record) {
            (
                RecordLayout::Ordered {
                    width,
                    timestamp_index,
                },
                Record::Ordered(mut values),
            ) => {
                if values.len() != *width {
                    return Err(Error::UnsupportedPayloadShape(format!(
                        "expected {} columns, got {}",
                        width,
                        values.len()
                    )));
                }
                let ts = timestamp_of(&values.remove(*timestamp_index))?;
                Ok((ts, Value::Array(values)))
            }
            (
                RecordLayout::Named {
                    columns,
                    timestamp_column,
                },
                Record::Named(mut values),
            ) => {
                if values.len() != columns.len() || !columns.iter().all(|c| values.contains_key(c))
                {
                    return Err(Error::UnsupportedPayloadShape(format!(
                        "expected columns {:?}, got {:?}",
                        columns,
                        values.keys().collect::<Vec<_>>()
                    )));
                }
                let raw = values.remove(timestamp_column).ok_or_else(|| {
                    Error::UnsupportedPayloadShape(format!("missing column '{}'", timestamp_column))
                })?;
                Ok((timestamp_of(&raw)?, Value::Object(values)))
            }
            (_, record) => Err(Error::UnsupportedPayloadShape(format!(
                "{} record does not match {} layout",
                record.kind(),
                self.kind()
            ))),
        }
    }

    /// Rebuild a row from a stored payload and its timestamp
    pub fn join(&self, timestamp: f64, stored: Value) -> Result<Record> {
        match (self, stored) {
            (
                RecordLayout::Ordered {
                    width,
                    timestamp_index,
                },
                Value::Array(mut values),
            ) if values.len() + 1 == *width => {
                values.insert(*timestamp_index, Value::Float(timestamp));
                Ok(Record::Ordered(values))
            }
            (
                RecordLayout::Named {
                    timestamp_column, ..
                },
                Value::Object(mut values),
            ) => {
                values.insert(timestamp_column.clone(), Value::Float(timestamp));
                Ok(Record::Named(values))
            }
            (_, other) => Err(Error::UnsupportedPayloadShape(format!(
                "stored {} does not fit {} layout",
                other.type_name(),
                self.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            RecordLayout::Ordered { .. } => "ordered",
            RecordLayout::Named { .. } => "named",
        }
    }
}

impl Record {
    fn kind(&self) -> &'static str {
        match self {
            Record::Ordered(_) => "ordered",
            Record::Named(_) => "named",
        }
    }
}

/// Epoch seconds of a timestamp cell
fn timestamp_of(value: &Value) -> Result<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) if !f.is_nan() => Ok(*f),
        Value::DateTime(dt) => {
            let scale = 10f64.powi(TIMESTAMP_DECIMALS);
            Ok((dt.and_utc().timestamp_micros() as f64 / 1e6 * scale).round() / scale)
        }
        other => Err(Error::UnsupportedPayloadShape(format!(
            "timestamp column holds {}",
            other.type_name()
        ))),
    }
}

/// Time series of fixed-layout rows
#[derive(Debug, Clone)]
pub struct ColumnarTimeSeries {
    inner: SimpleTimeSeries,
    layout: RecordLayout,
}

impl ColumnarTimeSeries {
    /// Create over `store` with `config` and `layout`
    pub fn new(
        store: Arc<dyn BackingStore>,
        config: TimeSeriesConfig,
        layout: RecordLayout,
    ) -> Result<Self> {
        Ok(Self::from_client(StoreClient::new(store, config)?, layout))
    }

    /// Create over an existing client
    pub fn from_client(client: StoreClient, layout: RecordLayout) -> Self {
        Self {
            inner: SimpleTimeSeries::from_client(client),
            layout,
        }
    }

    /// Create over a fresh in-process store
    pub fn in_memory(config: TimeSeriesConfig, layout: RecordLayout) -> Result<Self> {
        Ok(Self::from_client(StoreClient::in_memory(config)?, layout))
    }

    /// Row layout of this series
    pub fn layout(&self) -> &RecordLayout {
        &self.layout
    }

    /// Insert rows, reading each timestamp from its own timestamp column
    ///
    /// The whole batch is split and encoded up front, then validated and
    /// chunked exactly like `add_many`.
    pub fn add_records(
        &self,
        name: &str,
        records: Vec<Record>,
        chunk_size: Option<usize>,
    ) -> Result<usize> {
        let client = self.inner.client();
        let encoded = records
            .into_iter()
            .map(|record| {
                let (ts, rest) = self.layout.split(record)?;
                Ok((ts, client.encode(&rest)?))
            })
            .collect::<Result<Vec<_>>>()?;
        self.inner.add_many_encoded(name, encoded, chunk_size)
    }

    fn encode_row(&self, record: Record) -> Result<Vec<u8>> {
        let (_, rest) = self.layout.split(record)?;
        self.inner.client().encode(&rest)
    }

    fn decode_row(&self, timestamp: f64, raw: &[u8]) -> Result<Record> {
        self.layout.join(timestamp, self.inner.client().decode(raw)?)
    }
}

impl TimeSeriesStore for ColumnarTimeSeries {
    type Payload = Record;

    fn client(&self) -> &StoreClient {
        self.inner.client()
    }

    /// Insert one row at `timestamp`; the row's own timestamp cell must be
    /// a valid timestamp but its value is replaced by `timestamp`
    fn add(&self, name: &str, timestamp: f64, payload: Record) -> Result<()> {
        let member = self.encode_row(payload)?;
        self.inner.add_encoded(name, timestamp, member)
    }

    fn add_many(
        &self,
        name: &str,
        records: Vec<(f64, Record)>,
        chunk_size: Option<usize>,
    ) -> Result<usize> {
        let encoded = records
            .into_iter()
            .map(|(ts, record)| Ok((ts, self.encode_row(record)?)))
            .collect::<Result<Vec<_>>>()?;
        self.inner.add_many_encoded(name, encoded, chunk_size)
    }

    fn get(&self, name: &str, timestamp: f64) -> Result<Option<Record>> {
        self.inner
            .get_encoded(name, timestamp)?
            .map(|raw| self.decode_row(timestamp, &raw))
            .transpose()
    }

    fn get_slice(&self, name: &str, query: SliceQuery) -> Result<Vec<(f64, Record)>> {
        self.inner
            .slice_encoded(name, query)?
            .into_iter()
            .map(|(raw, ts)| Ok((ts, self.decode_row(ts, &raw)?)))
            .collect()
    }

    fn delete(&self, name: &str, range: ScoreRange) -> Result<usize> {
        self.inner.delete(name, range)
    }

    fn trim(&self, name: &str, length: usize) -> Result<usize> {
        self.inner.trim(name, length)
    }

    fn remove_many(&self, names: &[String], range: ScoreRange) -> Result<()> {
        self.inner.remove_many(names, range)
    }

    fn iter<'a>(&'a self, name: &str) -> EntryIter<'a, Record> {
        Box::new(self.inner.iter_encoded(name).map(move |item| {
            item.and_then(|(raw, ts)| Ok((ts, self.decode_row(ts, &raw)?)))
        }))
    }

    fn iter_keys<'a>(&'a self) -> KeyIter<'a> {
        self.inner.iter_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ordered() -> ColumnarTimeSeries {
        ColumnarTimeSeries::in_memory(
            TimeSeriesConfig::default(),
            RecordLayout::ordered(3, 0).unwrap(),
        )
        .unwrap()
    }

    fn named() -> ColumnarTimeSeries {
        ColumnarTimeSeries::in_memory(
            TimeSeriesConfig::new().with_max_length(3),
            RecordLayout::named(["ts", "price", "side"], "ts").unwrap(),
        )
        .unwrap()
    }

    fn row(ts: f64, a: &str, b: i64) -> Record {
        Record::Ordered(vec![Value::Float(ts), a.into(), Value::Int(b)])
    }

    fn named_row(ts: i64, price: f64, side: &str) -> Record {
        Record::Named(
            [
                ("ts".to_string(), Value::Int(ts)),
                ("price".to_string(), Value::Float(price)),
                ("side".to_string(), Value::from(side)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn test_layout_validation() {
        assert!(RecordLayout::ordered(2, 2).is_err());
        assert!(RecordLayout::named(["a", "b"], "ts").is_err());
    }

    #[test]
    fn test_add_records_sorts_and_roundtrips() {
        let ts = ordered();
        let written = ts
            .add_records("r", vec![row(3.0, "c", 3), row(1.0, "a", 1), row(2.0, "b", 2)], None)
            .unwrap();
        assert_eq!(written, 3);
        let rows = ts.get_slice("r", SliceQuery::all()).unwrap();
        assert_eq!(rows[0], (1.0, row(1.0, "a", 1)));
        assert_eq!(rows[2], (3.0, row(3.0, "c", 3)));
        assert_eq!(ts.get("r", 2.0).unwrap(), Some(row(2.0, "b", 2)));
    }

    #[test]
    fn test_timestamp_column_is_stripped_from_storage() {
        let ts = ordered();
        ts.add_records("r", vec![row(1.0, "a", 1)], None).unwrap();
        let stored = ts
            .client()
            .store()
            .zrange_by_rank("r", 0, 0)
            .unwrap();
        let payload = ts.client().decode(&stored[0].0).unwrap();
        assert_eq!(payload, Value::Array(vec!["a".into(), Value::Int(1)]));
    }

    #[test]
    fn test_repeated_timestamps_rejected() {
        let ts = ordered();
        let result = ts.add_records("r", vec![row(1.0, "a", 1), row(1.0, "b", 2)], None);
        assert!(matches!(result, Err(Error::DuplicateTimestamp { .. })));
        assert!(!ts.exists("r").unwrap());
    }

    #[test]
    fn test_wrong_shape_rejected() {
        let ts = ordered();
        let short = Record::Ordered(vec![Value::Float(1.0)]);
        assert!(matches!(
            ts.add_records("r", vec![short], None),
            Err(Error::UnsupportedPayloadShape(_))
        ));
        let text_ts = Record::Ordered(vec!["yesterday".into(), "a".into(), Value::Int(1)]);
        assert!(matches!(
            ts.add_records("r", vec![text_ts], None),
            Err(Error::UnsupportedPayloadShape(_))
        ));
        assert!(matches!(
            ts.add_records("r", vec![named_row(1, 1.0, "buy")], None),
            Err(Error::UnsupportedPayloadShape(_))
        ));
    }

    #[test]
    fn test_named_layout_with_eviction() {
        let ts = named();
        ts.add_records(
            "n",
            (1..=4).map(|i| named_row(i, i as f64 * 1.5, "buy")).collect(),
            Some(2),
        )
        .unwrap();
        let rows = ts.get_slice("n", SliceQuery::all()).unwrap();
        assert_eq!(rows.iter().map(|(t, _)| *t).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);
        match &rows[0].1 {
            Record::Named(cols) => {
                assert_eq!(cols.get("ts"), Some(&Value::Float(2.0)));
                assert_eq!(cols.get("side"), Some(&Value::from("buy")));
            }
            other => panic!("expected named row, got {:?}", other),
        }
    }

    #[test]
    fn test_datetime_timestamp_column() {
        let ts = ColumnarTimeSeries::in_memory(
            TimeSeriesConfig::default(),
            RecordLayout::ordered(2, 1).unwrap(),
        )
        .unwrap();
        let at = NaiveDate::from_ymd_opt(2018, 5, 11)
            .unwrap()
            .and_hms_micro_opt(3, 14, 43, 331_131)
            .unwrap();
        ts.add_records("d", vec![Record::Ordered(vec![Value::Int(7), Value::DateTime(at)])], None)
            .unwrap();
        let expected = at.and_utc().timestamp_micros() as f64 / 1e6;
        let rows = ts.get_slice("d", SliceQuery::all()).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].0 - expected).abs() < 1e-6);
    }

    #[test]
    fn test_add_uses_explicit_timestamp() {
        let ts = ordered();
        ts.add("r", 5.0, row(0.0, "x", 9)).unwrap();
        assert_eq!(ts.get("r", 5.0).unwrap(), Some(row(5.0, "x", 9)));
        assert_eq!(ts.get("r", 0.0).unwrap(), None);
    }

    #[test]
    fn test_iter_and_trim() {
        let ts = ordered();
        ts.add_many(
            "r",
            (1..=4).map(|i| (i as f64, row(0.0, "v", i))).collect(),
            None,
        )
        .unwrap();
        assert_eq!(ts.trim("r", 2).unwrap(), 2);
        let mut rows: Vec<(f64, Record)> = ts.iter("r").collect::<Result<_>>().unwrap();
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(rows, vec![(3.0, row(3.0, "v", 3)), (4.0, row(4.0, "v", 4))]);
    }
}
