//! Storage collaborators
//!
//! The query engine reads through two narrow interfaces:
//!
//! - **catalog**: [`SchemaCatalog`] resolves databases, retention policies,
//!   measurements, fields and series; [`ShardReader`] opens per-series point
//!   streams in either time order
//! - **memory**: [`MemoryStore`], an in-memory implementation of both with
//!   time-partitioned shards and first-write-wins field typing
//! - **line_protocol**: parser for `measurement,tag=v field=v timestamp`
//!   text used to load the in-memory store
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust
//! use chronicle_engine::storage::{MemoryStore, SchemaCatalog};
//!
//! let store = MemoryStore::new();
//! store.create_database("telegraf");
//! store
//!     .write_lines("telegraf", None, "cpu,host=a usage=0.5 1000000000", 0)
//!     .unwrap();
//!
//! assert_eq!(store.measurements("telegraf", "autogen"), vec!["cpu".to_string()]);
//! ```

pub mod catalog;
pub mod error;
pub mod line_protocol;
pub mod memory;

pub use catalog::{SchemaCatalog, ShardReader};
pub use error::{StorageError, StorageResult};
pub use line_protocol::{parse_line, parse_lines, LinePoint};
pub use memory::{MemoryStore, DEFAULT_RETENTION_POLICY, DEFAULT_SHARD_DURATION};
