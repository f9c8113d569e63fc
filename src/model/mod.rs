//! Chronicle Data Model
//!
//! Typed values, tag sets, points and time ranges shared by every query
//! stage and by the storage collaborators feeding them.
//!
//! # Example
//!
//! ```rust
//! use chronicle_engine::model::{Point, Tags, Value};
//!
//! let tags = Tags::from_pairs([("host", "server01")]);
//! let point = Point::new("cpu", tags, 1_000_000_000, 0.64);
//!
//! assert_eq!(point.value, Value::Float(0.64));
//! assert_eq!(point.tags.get("host"), Some("server01"));
//! ```

mod types;

pub use types::{DataType, Point, SeriesKey, Tags, TimeRange, Value, MAX_TIME, MIN_TIME};
