//! Chronicle Query Engine
//!
//! Streams, windows, aggregates and transforms time-series data for
//! structured SELECT statements:
//!
//! - **ast**: Statement types and a builder (statements arrive parsed, usually as JSON)
//! - **planner**: Source resolution, validation, grouping and admission guards
//! - **window** / **bucket**: GROUP BY time bucketing and per-bucket reduction
//! - **functions**: Aggregates, selectors, top/bottom and window transforms
//! - **fill**: Fill policies for empty buckets
//! - **merge** / **scan**: Multi-shard merge and parallel leaf scans
//! - **source**: Stored measurements and subqueries as row sources
//! - **cursor**: Row assembly, arithmetic and LIMIT/OFFSET per series
//! - **executor**: Async execution with cancellation and tracing
//!
//! # Iterator Tree
//!
//! ```text
//! shard → scan → merge → align → filter → project → merge → reduce → fill → transform → cursor
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chronicle_engine::config::QueryConfig;
//! use chronicle_engine::query::{Expr, QueryEngine, SelectStatement, SECOND};
//! use chronicle_engine::storage::MemoryStore;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! store.create_database("telegraf");
//! store.write_lines("telegraf", None, "cpu,host=a usage=0.5 1000000000", 0)?;
//!
//! let stmt = SelectStatement::builder()
//!     .field(Expr::call("mean", vec![Expr::var("usage")]))
//!     .from("cpu")
//!     .time_range(0, 60 * SECOND - 1)
//!     .group_by_time(10 * SECOND)
//!     .build();
//!
//! let engine = QueryEngine::new(store, QueryConfig::default());
//! let series = engine.execute("telegraf", &stmt).await?;
//! println!("{}", serde_json::to_string(&series)?);
//! # Ok(())
//! # }
//! ```

pub mod ast;
pub mod bucket;
pub mod context;
pub mod cursor;
pub mod duration;
pub mod error;
pub mod eval;
pub mod executor;
pub mod fill;
pub mod functions;
pub mod iterator;
pub mod merge;
pub mod planner;
pub mod result;
pub mod row;
pub mod scan;
pub mod source;
pub mod window;

pub use ast::{
    BinaryOp, Call, Dimensions, Expr, Field, FillOption, Measurement, MeasurementName,
    RegexLiteral, SelectStatement, SortOrder, Source, StatementBuilder,
};
pub use context::{QueryContext, QueryLimits};
pub use duration::{parse_duration, DAY, HOUR, MICROSECOND, MILLISECOND, MINUTE, NANOSECOND, SECOND, WEEK};
pub use error::{LimitViolation, QueryError, QueryResult};
pub use executor::QueryEngine;
pub use planner::{Plan, Planner};
pub use result::{Response, Series, StatementResult};
pub use window::Interval;
