//! Shared helpers for the engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chronicle_engine::{
    MemoryStore, QueryConfig, QueryEngine, QueryError, SelectStatement, Series, Value,
};

pub const S: i64 = 1_000_000_000;

/// An in-memory store with database `db` holding the given line protocol
pub fn store(lines: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.create_database("db");
    if !lines.trim().is_empty() {
        store
            .write_lines("db", None, lines, 0)
            .expect("Failed to load line protocol");
    }
    store
}

pub fn engine(lines: &str) -> QueryEngine {
    QueryEngine::new(store(lines), QueryConfig::default())
}

pub fn engine_with(lines: &str, config: QueryConfig) -> QueryEngine {
    QueryEngine::new(store(lines), config)
}

pub async fn run(engine: &QueryEngine, stmt: &SelectStatement) -> Vec<Series> {
    engine
        .execute("db", stmt)
        .await
        .unwrap_or_else(|e| panic!("statement failed: {}", e))
}

pub async fn run_err(engine: &QueryEngine, stmt: &SelectStatement) -> QueryError {
    match engine.execute("db", stmt).await {
        Ok(series) => panic!("expected an error, got {:?}", series),
        Err(e) => e,
    }
}

/// (time, first value column) of every row
pub fn points(series: &Series) -> Vec<(i64, Value)> {
    series
        .values
        .iter()
        .map(|row| match (&row[0], row.get(1)) {
            (Value::Integer(t), Some(v)) => (*t, v.clone()),
            other => panic!("malformed row {:?}", other),
        })
        .collect()
}

pub fn float(v: f64) -> Value {
    Value::Float(v)
}

pub fn int(v: i64) -> Value {
    Value::Integer(v)
}
