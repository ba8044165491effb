//! Lookup join throughput benchmarks
//!
//! Stream row → key construction → snapshot lookup → output assembly, for
//! exact-key and prefix matching.
//!
//! Run with: cargo bench --bench lookup_join_bench

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use dimjoin_core::lookup::{
    AliasMap, CacheRefresher, EqualityBinding, Field, FieldType, JoinConfig, JoinEngine,
    LoadError, LookupJoinType, MatchMode, OutputColumn, ReferenceTableLoader, ReloadPolicy, Row,
    RowSchema, ScalarValue, SnapshotBuilder, SnapshotCache,
};

/// In-memory side table for benchmarks: `n` customers with two rows each.
struct BenchLoader {
    n: usize,
}

impl ReferenceTableLoader for BenchLoader {
    async fn scan_all(&self, sink: &mut SnapshotBuilder) -> Result<(), LoadError> {
        for i in 0..self.n {
            for suffix in ["a", "b"] {
                sink.push_row(
                    format!("{i:08}:{suffix}"),
                    [
                        ("name", ScalarValue::Utf8(format!("customer-{i}"))),
                        ("tier", ScalarValue::Utf8(suffix.to_string())),
                    ],
                );
            }
        }
        Ok(())
    }

    fn source_name(&self) -> &str {
        "bench_source"
    }

    fn estimated_row_count(&self) -> Option<u64> {
        Some(self.n as u64 * 2)
    }
}

fn loaded_cache(rt: &tokio::runtime::Runtime, n: usize) -> Arc<SnapshotCache> {
    let cache = Arc::new(SnapshotCache::new("bench"));
    let refresher = CacheRefresher::new(
        BenchLoader { n },
        Arc::clone(&cache),
        &AliasMap::identity(),
        ReloadPolicy::Once,
    );
    if let Err(e) = rt.block_on(refresher.reload()) {
        panic!("bench load failed: {e}");
    }
    cache
}

fn engine(cache: Arc<SnapshotCache>, match_mode: MatchMode) -> JoinEngine {
    let schema = RowSchema::new(vec![
        Field::new("order_id", FieldType::Int64),
        Field::new("customer_id", FieldType::Utf8),
    ]);
    let config = JoinConfig::new(
        EqualityBinding::new([(1, "customer_id")]),
        vec![
            OutputColumn::Input(0),
            OutputColumn::Side(Field::new("name", FieldType::Utf8)),
        ],
    )
    .join_type(LookupJoinType::LeftOuter)
    .match_mode(match_mode);
    match JoinEngine::new(cache, &schema, config) {
        Ok(e) => e,
        Err(e) => panic!("bench engine: {e}"),
    }
}

/// Stream rows cycling over the key space, with a 10% miss rate.
fn stream_rows(key_range: usize, count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let customer = if i % 10 == 9 {
                format!("missing-{i}")
            } else {
                format!("{:08}", (i * 7919) % key_range)
            };
            Row::new(vec![ScalarValue::Int64(i as i64), ScalarValue::Utf8(customer)])
        })
        .collect()
}

/// Exact-key matching against a fully loaded snapshot.
fn bench_exact_join(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lookup_join_exact");

    let dim_size = 10_000;
    let cache = loaded_cache(&rt, dim_size);
    let engine = engine(cache, MatchMode::Exact);

    for &batch_size in &[1, 100, 1_000] {
        // Exact keys carry the row suffix so they hit.
        let rows: Vec<Row> = stream_rows(dim_size, batch_size)
            .into_iter()
            .map(|row| {
                let mut values = row.into_values();
                if let ScalarValue::Utf8(k) = &mut values[1] {
                    k.push_str(":a");
                }
                Row::new(values)
            })
            .collect();

        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch_size), &rows, |b, rows| {
            let mut out = Vec::with_capacity(rows.len());
            b.iter(|| {
                out.clear();
                for row in rows {
                    engine.process(row, &mut out);
                }
                black_box(out.len())
            });
        });
    }

    group.finish();
}

/// Prefix matching walks every key, so cost grows with table size.
fn bench_prefix_join(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("lookup_join_prefix");
    group.sample_size(20);

    for &dim_size in &[100, 1_000, 10_000] {
        let cache = loaded_cache(&rt, dim_size);
        let engine = engine(cache, MatchMode::Prefix);
        let rows = stream_rows(dim_size, 100);

        group.throughput(Throughput::Elements(rows.len() as u64));
        group.bench_with_input(BenchmarkId::new("table_rows", dim_size * 2), &rows, |b, rows| {
            let mut out = Vec::with_capacity(rows.len() * 2);
            b.iter(|| {
                out.clear();
                for row in rows {
                    engine.process(row, &mut out);
                }
                black_box(out.len())
            });
        });
    }

    group.finish();
}

/// Cost of a full reload into a private builder plus publication.
fn bench_reload(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("snapshot_reload");
    group.sample_size(10);

    for &dim_size in &[1_000, 10_000] {
        let refresher = CacheRefresher::new(
            BenchLoader { n: dim_size },
            Arc::new(SnapshotCache::new("bench")),
            &AliasMap::identity(),
            ReloadPolicy::Once,
        );
        group.throughput(Throughput::Elements(dim_size as u64 * 2));
        group.bench_function(BenchmarkId::new("rows", dim_size * 2), |b| {
            b.iter(|| black_box(rt.block_on(refresher.reload()).is_ok()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_exact_join, bench_prefix_join, bench_reload);
criterion_main!(benches);
