//! Core data types for the Chronicle query engine
//!
//! This module defines the fundamental types every query stage passes around:
//! - `Value` / `DataType`: the closed set of field value types
//! - `Tags`: an ordered, cheaply clonable tag set
//! - `Point`: one time-stamped observation flowing through an iterator tree
//! - `SeriesKey`: identity of a single ordered point stream
//! - `TimeRange`: inclusive time bounds of a query

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Smallest representable timestamp (nanoseconds since the epoch)
pub const MIN_TIME: i64 = i64::MIN;

/// Largest representable timestamp (nanoseconds since the epoch)
pub const MAX_TIME: i64 = i64::MAX;

/// A single field value
///
/// `Null` marks a missing value: an empty bucket, a field absent at a
/// timestamp, or the result of arithmetic touching another null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
}

impl Value {
    /// The data type of this value (`Unknown` for null)
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Unknown,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::String(_) => DataType::String,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value, if it is numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Total ordering used for sorting values of the same column
    ///
    /// Values of different types order by type rank (null first), floats use
    /// IEEE total ordering. Integers and floats compare numerically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).total_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.total_cmp(&(*b as f64)),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
        }
    }

    /// Cast a numeric value into the given numeric type
    ///
    /// Non-numeric values and non-numeric targets are returned unchanged.
    pub fn cast_to(self, data_type: DataType) -> Value {
        match (self, data_type) {
            (Value::Integer(v), DataType::Float) => Value::Float(v as f64),
            (Value::Float(v), DataType::Integer) => Value::Integer(v as i64),
            (v, _) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Value types a field or iterator can carry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float,
    Integer,
    String,
    Boolean,
    /// Type not known at plan time (e.g. an all-null column)
    #[default]
    Unknown,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Float | DataType::Integer)
    }

    /// Pick the wider of two types when combining columns
    ///
    /// Float wins over integer; unknown yields to anything.
    pub fn widen(self, other: DataType) -> DataType {
        match (self, other) {
            (DataType::Unknown, t) | (t, DataType::Unknown) => t,
            (DataType::Float, DataType::Integer) | (DataType::Integer, DataType::Float) => {
                DataType::Float
            }
            (a, _) => a,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Float => write!(f, "float"),
            DataType::Integer => write!(f, "integer"),
            DataType::String => write!(f, "string"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Unknown => write!(f, "unknown"),
        }
    }
}

/// An ordered tag set
///
/// Keys are kept sorted (case-sensitive, lexicographic), which gives tag
/// sets a stable display and grouping order. Cloning is an `Arc` bump, so
/// every point can carry its series tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tags(Arc<BTreeMap<String, String>>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tag set from key/value pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(Arc::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Project onto the given keys
    ///
    /// Keys missing from this set map to the empty string, so every series
    /// projected with the same keys produces a comparable grouping key.
    pub fn subset(&self, keys: &[String]) -> Tags {
        if keys.is_empty() {
            return Tags::new();
        }
        Self(Arc::new(
            keys.iter()
                .map(|k| (k.clone(), self.get(k).unwrap_or_default().to_string()))
                .collect(),
        ))
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        (*self.0).clone()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
            first = false;
        }
        Ok(())
    }
}

impl Serialize for Tags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Tags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer).map(|m| Tags(Arc::new(m)))
    }
}

/// One observation flowing through an iterator tree
///
/// Raw points come from a shard reader; derived points (bucket outputs,
/// transform outputs) are stamped by the stage producing them. `aux` carries
/// the auxiliary columns resolved from the same source point, and `seq` is
/// the store's write sequence, used to break ties between points sharing a
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub name: Arc<str>,
    /// Series tags (full set on raw points, group tags on reduced points)
    pub tags: Tags,
    /// Timestamp in nanoseconds since the epoch
    pub time: i64,
    /// The point value
    pub value: Value,
    /// Auxiliary values resolved from the same point
    pub aux: Vec<Value>,
    /// Write sequence (0 for derived points)
    pub seq: u64,
}

impl Point {
    pub fn new(name: impl Into<Arc<str>>, tags: Tags, time: i64, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            tags,
            time,
            value: value.into(),
            aux: Vec::new(),
            seq: 0,
        }
    }

    /// Builder method: set auxiliary values
    pub fn with_aux(mut self, aux: Vec<Value>) -> Self {
        self.aux = aux;
        self
    }

    /// Builder method: set the write sequence
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }
}

/// Identity of one ordered point stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub measurement: String,
    pub tags: Tags,
    pub field: String,
}

impl SeriesKey {
    pub fn new(measurement: impl Into<String>, tags: Tags, field: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags,
            field: field.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}#{}", self.measurement, self.field)
        } else {
            write!(f, "{},{}#{}", self.measurement, self.tags, self.field)
        }
    }
}

/// Inclusive time bounds of a query
///
/// Unlike bucket windows (half-open), a query's time predicate is inclusive
/// on both ends; `MIN_TIME` / `MAX_TIME` mean "no explicit bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: i64,
    pub max: i64,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl TimeRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn unbounded() -> Self {
        Self {
            min: MIN_TIME,
            max: MAX_TIME,
        }
    }

    /// Range starting at `min` with no upper bound
    pub fn since(min: i64) -> Self {
        Self { min, max: MAX_TIME }
    }

    /// Range ending at `max` with no lower bound
    pub fn until(max: i64) -> Self {
        Self { min: MIN_TIME, max }
    }

    pub fn has_min(&self) -> bool {
        self.min != MIN_TIME
    }

    pub fn has_max(&self) -> bool {
        self.max != MAX_TIME
    }

    pub fn contains(&self, time: i64) -> bool {
        time >= self.min && time <= self.max
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    /// Intersection of two ranges (may be empty)
    pub fn intersect(&self, other: &TimeRange) -> TimeRange {
        TimeRange {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        }
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        !self.intersect(other).is_empty()
    }
}
