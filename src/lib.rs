//! # Chronicle Engine
//!
//! Query-execution core for time-series data: streaming, windowing,
//! aggregation and transformation of tagged observations, with subquery
//! composition, multi-shard merge and pagination.
//!
//! ## Features
//!
//! - **Streaming**: pull-based iterator trees; series are never materialised
//! - **Windowing**: GROUP BY time with offsets and fixed time zones
//! - **Functions**: aggregates, selectors, top/bottom and window transforms
//! - **Fill**: null, none, previous, linear and literal fill policies
//! - **Subqueries**: inner statements feed outer aggregates to any depth
//! - **Guards**: series, bucket and point limits, timeouts and cancellation
//!
//! ## Modules
//!
//! - [`model`]: Values, tags, points and time ranges
//! - [`query`]: Planner, iterators and executor
//! - [`storage`]: Catalog and shard interfaces plus an in-memory store
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chronicle_engine::{Config, Expr, MemoryStore, QueryEngine, SelectStatement};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.create_database("db");
//!     store.write_lines("db", None, "cpu,host=a value=1 0\ncpu,host=a value=3 10", 0)?;
//!
//!     let stmt = SelectStatement::builder()
//!         .field(Expr::call("max", vec![Expr::var("value")]))
//!         .from("cpu")
//!         .group_by("host")
//!         .build();
//!
//!     let engine = QueryEngine::new(store, Config::load_default().query);
//!     for series in engine.execute("db", &stmt).await? {
//!         println!("{} {:?}: {:?}", series.name, series.tags, series.values);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod model;
pub mod query;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{generate_default_config, Config, ConfigError, LoggingConfig, QueryConfig};

pub use model::{DataType, Point, SeriesKey, Tags, TimeRange, Value};

pub use query::{
    Expr, FillOption, QueryContext, QueryEngine, QueryError, QueryLimits, QueryResult, Response,
    SelectStatement, Series, StatementResult,
};

pub use storage::{MemoryStore, SchemaCatalog, ShardReader, StorageError, StorageResult};
