//! Bulk Insert Benchmarks
//!
//! Measures the batch write path of each encoding:
//! - Chunk size: one large transaction versus many small ones
//! - Eviction: appending to a full series, where every chunk trims first
//! - Ordering: a sorted batch against the same batch shuffled
//! - Serializer: msgpack against json for columnar rows
//!
//! Run with: cargo bench --bench add_many

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Duration;
use ttseries::{
    ColumnarTimeSeries, HashTimeSeries, Record, RecordLayout, SimpleTimeSeries, TimeSeriesConfig,
    TimeSeriesStore, Value,
};

const BATCH: usize = 5_000;

fn batch(offset: usize) -> Vec<(f64, Value)> {
    (offset..offset + BATCH)
        .map(|i| (i as f64, Value::Float(i as f64 * 0.5)))
        .collect()
}

fn rows(offset: usize) -> Vec<Record> {
    (offset..offset + BATCH)
        .map(|i| {
            Record::Ordered(vec![
                Value::Float(i as f64),
                Value::Float(i as f64 * 0.5),
                Value::Int(i as i64),
            ])
        })
        .collect()
}

/// Same batch, varying how many records go into each transaction
fn bench_chunk_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_many/chunk_size");
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(BATCH as u64));

    for chunk_size in [100, 1_000, 5_000] {
        group.bench_function(BenchmarkId::new("simple", chunk_size), |b| {
            b.iter(|| {
                let ts = SimpleTimeSeries::in_memory(TimeSeriesConfig::new()).unwrap();
                ts.add_many("bench", batch(0), Some(chunk_size)).unwrap()
            });
        });
        group.bench_function(BenchmarkId::new("hash", chunk_size), |b| {
            b.iter(|| {
                let ts = HashTimeSeries::in_memory(TimeSeriesConfig::new()).unwrap();
                ts.add_many("bench", batch(0), Some(chunk_size)).unwrap()
            });
        });
    }

    group.finish();
}

/// Appending a batch to a series that is already at max_length
fn bench_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_many/eviction");
    group.throughput(Throughput::Elements(BATCH as u64));

    for max_length in [1_000, BATCH] {
        let config = TimeSeriesConfig::new().with_max_length(max_length);
        group.bench_function(BenchmarkId::new("simple", max_length), |b| {
            b.iter(|| {
                let ts = SimpleTimeSeries::in_memory(config.clone()).unwrap();
                ts.add_many("bench", batch(0), None).unwrap();
                ts.add_many("bench", batch(BATCH), None).unwrap()
            });
        });
        group.bench_function(BenchmarkId::new("hash", max_length), |b| {
            b.iter(|| {
                let ts = HashTimeSeries::in_memory(config.clone()).unwrap();
                ts.add_many("bench", batch(0), None).unwrap();
                ts.add_many("bench", batch(BATCH), None).unwrap()
            });
        });
    }

    group.finish();
}

/// The same batch arriving in random order, which the validator must sort
fn bench_unsorted(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_many/unsorted");
    group.throughput(Throughput::Elements(BATCH as u64));

    let mut shuffled = batch(0);
    shuffled.shuffle(&mut StdRng::seed_from_u64(7));
    for (label, records) in [("sorted", batch(0)), ("shuffled", shuffled)] {
        group.bench_function(BenchmarkId::new("hash", label), |b| {
            b.iter(|| {
                let ts = HashTimeSeries::in_memory(TimeSeriesConfig::new()).unwrap();
                ts.add_many("bench", records.clone(), None).unwrap()
            });
        });
    }

    group.finish();
}

/// Rows with the timestamp as a column
fn bench_columnar(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_many/columnar");
    group.throughput(Throughput::Elements(BATCH as u64));

    for serializer in ["msgpack", "json"] {
        let config = TimeSeriesConfig::new().with_serializer(serializer);
        group.bench_function(BenchmarkId::new("ordered", serializer), |b| {
            b.iter(|| {
                let layout = RecordLayout::ordered(3, 0).unwrap();
                let ts = ColumnarTimeSeries::in_memory(config.clone(), layout).unwrap();
                ts.add_records("bench", rows(0), None).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_chunk_size,
    bench_eviction,
    bench_unsorted,
    bench_columnar
);
criterion_main!(benches);
