//! Benchmarks for the Chronicle query engine
//!
//! Run with: cargo bench

use std::sync::Arc;

use chronicle_engine::query::{Expr, FillOption, SelectStatement, SECOND};
use chronicle_engine::{MemoryStore, QueryConfig, QueryEngine};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

const HOSTS: usize = 10;

fn create_test_lines(per_host: usize) -> String {
    let mut lines = String::new();
    for h in 0..HOSTS {
        for i in 0..per_host {
            lines.push_str(&format!(
                "cpu,host=h{},region=r{} usage={},idle={}i {}\n",
                h,
                h % 3,
                (i % 100) as f64 / 3.0,
                i % 7,
                i as i64 * SECOND
            ));
        }
    }
    lines
}

fn create_store(per_host: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_database("bench");
    store
        .write_lines("bench", None, &create_test_lines(per_host), 0)
        .unwrap();
    store
}

fn inline_engine(store: Arc<MemoryStore>) -> QueryEngine {
    QueryEngine::new(
        store,
        QueryConfig {
            max_concurrent_scans: 0,
            ..QueryConfig::default()
        },
    )
}

fn windowed(field: Expr, per_host: usize) -> SelectStatement {
    SelectStatement::builder()
        .field(field)
        .from("cpu")
        .time_range(0, per_host as i64 * SECOND - 1)
        .group_by_time(60 * SECOND)
        .group_by("host")
        .fill(FillOption::Null)
        .build()
}

fn bench_line_protocol(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_protocol");

    for per_host in [100, 1000] {
        let text = create_test_lines(per_host);
        group.throughput(Throughput::Elements((per_host * HOSTS) as u64));

        group.bench_function(format!("write_{}", per_host * HOSTS), |b| {
            b.iter(|| {
                let store = MemoryStore::new();
                store.create_database("bench");
                store.write_lines("bench", None, black_box(&text), 0).unwrap()
            })
        });
    }

    group.finish();
}

fn bench_aggregates(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for per_host in [1000, 10000] {
        let engine = inline_engine(create_store(per_host));
        group.throughput(Throughput::Elements((per_host * HOSTS) as u64));

        for name in ["mean", "max", "percentile", "top"] {
            let mut args = vec![Expr::var("usage")];
            match name {
                "percentile" => args.push(Expr::Integer(95)),
                "top" => args.push(Expr::Integer(3)),
                _ => {}
            }
            let stmt = windowed(Expr::call(name, args), per_host);

            group.bench_function(format!("{}_{}", name, per_host * HOSTS), |b| {
                b.iter(|| engine.execute_blocking("bench", black_box(&stmt)).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let per_host = 10000;
    let engine = inline_engine(create_store(per_host));

    let raw = SelectStatement::builder()
        .field(Expr::var("usage"))
        .field(Expr::var("idle"))
        .from("cpu")
        .build();
    group.bench_function("raw_rows", |b| {
        b.iter(|| engine.execute_blocking("bench", black_box(&raw)).unwrap())
    });

    let derivative = windowed(
        Expr::call("derivative", vec![Expr::call("mean", vec![Expr::var("usage")])]),
        per_host,
    );
    group.bench_function("derivative_of_mean", |b| {
        b.iter(|| engine.execute_blocking("bench", black_box(&derivative)).unwrap())
    });

    let subquery = SelectStatement::builder()
        .field(Expr::call("max", vec![Expr::var("mean")]))
        .from_subquery(windowed(
            Expr::call("mean", vec![Expr::var("usage")]),
            per_host,
        ))
        .group_by("host")
        .build();
    group.bench_function("max_of_means", |b| {
        b.iter(|| engine.execute_blocking("bench", black_box(&subquery)).unwrap())
    });

    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let per_host = 10000;
    let store = create_store(per_host);
    let stmt = windowed(Expr::call("mean", vec![Expr::var("usage")]), per_host);

    let mut group = c.benchmark_group("engine");

    for scans in [0, 4] {
        let engine = QueryEngine::new(
            store.clone(),
            QueryConfig {
                max_concurrent_scans: scans,
                ..QueryConfig::default()
            },
        );

        group.bench_function(format!("execute_scans_{}", scans), |b| {
            b.iter_custom(|iters| {
                rt.block_on(async {
                    let start = std::time::Instant::now();

                    for _ in 0..iters {
                        engine.execute("bench", black_box(&stmt)).await.unwrap();
                    }

                    start.elapsed()
                })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_line_protocol, bench_aggregates, bench_pipeline, bench_engine);
criterion_main!(benches);
