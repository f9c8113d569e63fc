//! Series and row pagination, ordering

mod common;

use chronicle_engine::query::{Expr, FillOption, SelectStatement};
use chronicle_engine::Series;
use common::*;

/// hosts a..d, each with value = 1..=4 at 0s, 10s, 20s, 30s
fn data() -> String {
    let mut lines = Vec::new();
    for host in ["a", "b", "c", "d"] {
        for i in 0..4 {
            lines.push(format!("cpu,host={} value={} {}", host, i + 1, i * 10 * S));
        }
    }
    lines.join("\n")
}

fn hosts(series: &[Series]) -> Vec<String> {
    series.iter().map(|s| s.tags["host"].clone()).collect()
}

fn times(series: &Series) -> Vec<i64> {
    points(series).into_iter().map(|(t, _)| t).collect()
}

fn raw_by_host() -> chronicle_engine::query::StatementBuilder {
    SelectStatement::builder()
        .field(Expr::var("value"))
        .from("cpu")
        .group_by("host")
}

#[tokio::test]
async fn test_series_sorted_by_tags() {
    let engine = engine(&data());
    let series = run(&engine, &raw_by_host().build()).await;
    assert_eq!(hosts(&series), vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_slimit_and_soffset() {
    let engine = engine(&data());
    let series = run(&engine, &raw_by_host().slimit(2).soffset(1).build()).await;
    assert_eq!(hosts(&series), vec!["b", "c"]);

    let series = run(&engine, &raw_by_host().soffset(3).build()).await;
    assert_eq!(hosts(&series), vec!["d"]);

    let series = run(&engine, &raw_by_host().soffset(4).build()).await;
    assert!(series.is_empty());
}

#[tokio::test]
async fn test_limit_and_offset_apply_per_series() {
    let engine = engine(&data());
    let series = run(&engine, &raw_by_host().limit(2).offset(1).build()).await;
    assert_eq!(series.len(), 4);
    for s in &series {
        assert_eq!(points(s), vec![(10 * S, float(2.0)), (20 * S, float(3.0))]);
    }
}

#[tokio::test]
async fn test_offset_past_end_drops_series() {
    let engine = engine(&data());
    let series = run(&engine, &raw_by_host().offset(4).build()).await;
    assert!(series.is_empty());
}

#[tokio::test]
async fn test_descending_raw_rows() {
    let engine = engine(&data());
    let series = run(&engine, &raw_by_host().order_desc().limit(3).build()).await;
    assert_eq!(times(&series[0]), vec![30 * S, 20 * S, 10 * S]);
}

#[tokio::test]
async fn test_descending_buckets_with_fill() {
    let engine = engine("cpu value=1 0\ncpu value=4 30000000000");
    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::var("value")]))
        .from("cpu")
        .time_range(0, 40 * S - 1)
        .group_by_time(10 * S)
        .fill(FillOption::Null)
        .order_desc()
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(
        points(&series[0]),
        vec![(30 * S, int(1)), (20 * S, int(0)), (10 * S, int(0)), (0, int(1))]
    );
}

#[tokio::test]
async fn test_limit_counts_filled_rows() {
    let engine = engine("cpu value=1 0\ncpu value=4 30000000000");
    let stmt = SelectStatement::builder()
        .field(Expr::call("mean", vec![Expr::var("value")]))
        .from("cpu")
        .time_range(0, 40 * S - 1)
        .group_by_time(10 * S)
        .limit(2)
        .offset(1)
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(times(&series[0]), vec![10 * S, 20 * S]);
}

#[tokio::test]
async fn test_aggregates_paginated_across_series() {
    let engine = engine(&data());
    let stmt = SelectStatement::builder()
        .field(Expr::call("sum", vec![Expr::var("value")]))
        .from("cpu")
        .group_by("host")
        .slimit(1)
        .soffset(2)
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(hosts(&series), vec!["c"]);
    assert_eq!(points(&series[0]), vec![(0, float(10.0))]);
}
