//! End-to-end statement scenarios
//!
//! Drives the public engine API against the in-memory store:
//! - Transforms over bucketed aggregates
//! - Missing measurements and validation errors
//! - Admission guards
//! - Empty-bucket semantics of count versus other aggregates

mod common;

use chronicle_engine::query::{BinaryOp, Expr, FillOption, SelectStatement};
use chronicle_engine::{QueryConfig, QueryError, Value};
use common::*;

// ============================================================================
// Scenario A: derivative(count(value)) over 2s buckets
// ============================================================================

#[tokio::test]
async fn test_derivative_of_count() {
    let t0 = 1_600_000_000 * S;
    let lines = format!(
        "cpu value=10 {}\ncpu value=15 {}\ncpu value=20 {}\ncpu value=25 {}",
        t0,
        t0 + S,
        t0 + 2 * S,
        t0 + 3 * S
    );
    let engine = engine(&lines);
    let stmt = SelectStatement::builder()
        .field(Expr::call(
            "derivative",
            vec![Expr::call("count", vec![Expr::var("value")])],
        ))
        .from("cpu")
        .time_range(t0, t0 + 3 * S)
        .group_by_time(2 * S)
        .build();

    let series = run(&engine, &stmt).await;
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].columns, vec!["time", "derivative"]);
    assert_eq!(
        points(&series[0]),
        vec![(t0, float(2.0)), (t0 + 2 * S, float(0.0))]
    );
}

// ============================================================================
// Scenario B: missing measurement is an empty success
// ============================================================================

#[tokio::test]
async fn test_missing_measurement_is_empty() {
    let engine = engine("cpu,host=a value=1 0");
    let stmt = SelectStatement::builder()
        .field(Expr::var("load"))
        .from("missing")
        .group_by_all()
        .build();
    assert!(run(&engine, &stmt).await.is_empty());

    let stmt = SelectStatement::builder()
        .field(Expr::call("mean", vec![Expr::var("nope")]))
        .from("cpu")
        .build();
    assert!(run(&engine, &stmt).await.is_empty());
}

#[tokio::test]
async fn test_missing_database_is_an_error() {
    let engine = engine("cpu value=1 0");
    let stmt = SelectStatement::builder()
        .field(Expr::var("value"))
        .from_qualified("other", None, "cpu")
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "database not found: other"
    );
}

// ============================================================================
// Scenario C: count(2)
// ============================================================================

#[tokio::test]
async fn test_count_of_literal() {
    let engine = engine("cpu value=1 0");
    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::Integer(2)]))
        .from("cpu")
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await,
        QueryError::InvalidArgument("expected field argument in count()".into())
    );
}

#[tokio::test]
async fn test_validation_messages() {
    let engine = engine("cpu value=1 0");
    let cases = vec![
        (
            Expr::call("foo", vec![Expr::var("value")]),
            "undefined function foo()",
        ),
        (
            Expr::call("mean", vec![]),
            "invalid number of arguments for mean, expected 1, got 0",
        ),
        (
            Expr::call("top", vec![Expr::var("value"), Expr::var("host")]),
            "expected integer as last argument in top(), found host",
        ),
        (
            Expr::call("percentile", vec![Expr::var("value"), Expr::Integer(101)]),
            "percentile must be between 0 and 100",
        ),
    ];
    for (expr, message) in cases {
        let stmt = SelectStatement::builder().field(expr).from("cpu").build();
        assert_eq!(run_err(&engine, &stmt).await.to_string(), message);
    }

    let stmt = SelectStatement::builder()
        .field(Expr::call(
            "moving_average",
            vec![Expr::call("mean", vec![Expr::var("value")]), Expr::Integer(1)],
        ))
        .from("cpu")
        .group_by_time(S)
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "moving_average window must be greater than 1"
    );

    let stmt = SelectStatement::builder()
        .field(Expr::call("derivative", vec![Expr::var("value")]))
        .from("cpu")
        .group_by_time(S)
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "aggregate function required inside the call to derivative"
    );
}

// ============================================================================
// Scenario D: series fan-out guard
// ============================================================================

#[tokio::test]
async fn test_max_select_series() {
    let lines = "cpu,host=a value=1 0\ncpu,host=b value=2 0\ncpu,host=c value=3 0\ncpu,host=d value=4 0";
    let config = QueryConfig {
        max_select_series: 3,
        ..Default::default()
    };
    let engine = engine_with(lines, config);
    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::var("value")]))
        .from("cpu")
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "max-select-series limit exceeded: (4/3)"
    );

    // a tag predicate that narrows the fan-out admits the statement
    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::var("value")]))
        .from("cpu")
        .filter(Expr::binary(
            BinaryOp::Neq,
            Expr::var("host"),
            Expr::String("d".into()),
        ))
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(points(&series[0]), vec![(0, int(3))]);
}

#[tokio::test]
async fn test_max_select_point() {
    let lines = (0..10)
        .map(|i| format!("cpu value={} {}", i, i * S))
        .collect::<Vec<_>>()
        .join("\n");
    let config = QueryConfig {
        max_select_point: 5,
        ..Default::default()
    };
    let engine = engine_with(&lines, config);
    let stmt = SelectStatement::builder()
        .field(Expr::call("sum", vec![Expr::var("value")]))
        .from("cpu")
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "max-select-point limit exceeded: (6/5)"
    );
}

#[tokio::test]
async fn test_max_select_buckets_with_implicit_range() {
    let lines = format!("cpu value=1 0\ncpu value=2 {}", 100 * S);
    let config = QueryConfig {
        max_select_buckets: 10,
        ..Default::default()
    };
    let engine = engine_with(&lines, config);
    let stmt = SelectStatement::builder()
        .field(Expr::call("mean", vec![Expr::var("value")]))
        .from("cpu")
        .group_by_time(S)
        .build();
    assert_eq!(
        run_err(&engine, &stmt).await.to_string(),
        "max-select-buckets limit exceeded: (11/10)"
    );
}

// ============================================================================
// Empty buckets: count yields 0, everything else null
// ============================================================================

#[tokio::test]
async fn test_empty_bucket_values() {
    let lines = format!("cpu value=2 0\ncpu value=4 {}", 25 * S);
    let engine = engine(&lines);
    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::var("value")]))
        .field(Expr::call("mean", vec![Expr::var("value")]))
        .from("cpu")
        .time_range(0, 30 * S - 1)
        .group_by_time(10 * S)
        .build();

    let series = run(&engine, &stmt).await;
    assert_eq!(
        series[0].values,
        vec![
            vec![int(0), int(1), float(2.0)],
            vec![int(10 * S), int(0), Value::Null],
            vec![int(20 * S), int(1), float(4.0)],
        ]
    );

    let stmt = SelectStatement::builder()
        .field(Expr::call("count", vec![Expr::var("value")]))
        .from("cpu")
        .time_range(0, 30 * S - 1)
        .group_by_time(10 * S)
        .fill(FillOption::None)
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(points(&series[0]), vec![(0, int(1)), (20 * S, int(1))]);
}

#[tokio::test]
async fn test_whole_series_aggregates() {
    let engine = engine("cpu value=1 10\ncpu value=3 20\ncpu value=3 30\ncpu value=9 40");
    let cases = vec![
        ("count", int(4)),
        ("sum", float(16.0)),
        ("mean", float(4.0)),
        ("median", float(3.0)),
        ("mode", float(3.0)),
        ("spread", float(8.0)),
        ("stddev", float(12.0_f64.sqrt())),
    ];
    for (name, expected) in cases {
        let stmt = SelectStatement::builder()
            .field(Expr::call(name, vec![Expr::var("value")]))
            .from("cpu")
            .build();
        let series = run(&engine, &stmt).await;
        assert_eq!(points(&series[0]), vec![(0, expected)], "{}()", name);
    }
}

#[tokio::test]
async fn test_lone_selector_keeps_point_time() {
    let engine = engine("cpu,host=a value=1,idle=90 10\ncpu,host=a value=7,idle=20 20\ncpu,host=a value=3,idle=70 30");
    let stmt = SelectStatement::builder()
        .field(Expr::call("max", vec![Expr::var("value")]))
        .field(Expr::var("idle"))
        .field(Expr::var("host"))
        .from("cpu")
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(series[0].columns, vec!["time", "max", "idle", "host"]);
    assert_eq!(
        series[0].values,
        vec![vec![int(20), float(7.0), float(20.0), Value::String("a".into())]]
    );

    // alongside another call the row is stamped with the epoch
    let stmt = SelectStatement::builder()
        .field(Expr::call("max", vec![Expr::var("value")]))
        .field(Expr::call("min", vec![Expr::var("value")]))
        .from("cpu")
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(series[0].values, vec![vec![int(0), float(7.0), float(1.0)]]);
}

#[tokio::test]
async fn test_arithmetic_between_calls() {
    let engine = engine("cpu value=1 0\ncpu value=5 10\ncpu value=3 20");
    let stmt = SelectStatement::builder()
        .field(Expr::binary(
            BinaryOp::Sub,
            Expr::call("max", vec![Expr::var("value")]),
            Expr::call("min", vec![Expr::var("value")]),
        ))
        .field(Expr::binary(
            BinaryOp::Mul,
            Expr::call("mean", vec![Expr::var("value")]),
            Expr::Integer(2),
        ))
        .from("cpu")
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(series[0].columns, vec!["time", "max_min", "mean"]);
    assert_eq!(series[0].values, vec![vec![int(0), float(4.0), float(6.0)]]);
}

#[tokio::test]
async fn test_raw_rows_with_field_condition() {
    let engine = engine("cpu,host=a value=1,idle=50 0\ncpu,host=a value=5,idle=10 10\ncpu,host=b value=3 20");
    let stmt = SelectStatement::builder()
        .field(Expr::var("value"))
        .field(Expr::var("host"))
        .from("cpu")
        .filter(Expr::binary(BinaryOp::Gt, Expr::var("value"), Expr::Integer(2)))
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(series.len(), 1);
    assert_eq!(
        series[0].values,
        vec![
            vec![int(10), float(5.0), Value::String("a".into())],
            vec![int(20), float(3.0), Value::String("b".into())],
        ]
    );
}

#[tokio::test]
async fn test_distinct_rows() {
    let engine = engine("cpu value=3 0\ncpu value=1 10\ncpu value=3 20\ncpu value=2 30");
    let stmt = SelectStatement::builder()
        .field(Expr::call("distinct", vec![Expr::var("value")]))
        .from("cpu")
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(
        points(&series[0]),
        vec![(0, float(1.0)), (0, float(2.0)), (0, float(3.0))]
    );

    let stmt = SelectStatement::builder()
        .field(Expr::call(
            "count",
            vec![Expr::call("distinct", vec![Expr::var("value")])],
        ))
        .from("cpu")
        .build();
    let series = run(&engine, &stmt).await;
    assert_eq!(points(&series[0]), vec![(0, int(3))]);

    let stmt = SelectStatement::builder()
        .field(Expr::call("distinct", vec![Expr::var("value")]))
        .field(Expr::call("mean", vec![Expr::var("value")]))
        .from("cpu")
        .build();
    assert_eq!(run_err(&engine, &stmt).await, QueryError::DistinctCombination);
}
