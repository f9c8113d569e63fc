//! Per-bucket reducers
//!
//! A reducer consumes the points of one bucket and emits its result rows
//! when the bucket closes. Aggregates emit derived values; selectors emit
//! the winning point's value together with its time and auxiliary values.
//! Null inputs are skipped by every reducer.

use std::cmp::Ordering;

use crate::model::{Point, Value};
use crate::query::functions::top::TopReducer;
use crate::query::functions::{CallOptions, CompiledCall, Function};

/// One result row of a reduced bucket
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    /// Original point time for selectors, `None` for derived values
    pub time: Option<i64>,
    pub value: Value,
    /// Auxiliary values of the winning point
    pub aux: Vec<Value>,
}

impl Reduced {
    fn derived(value: Value) -> Self {
        Self {
            time: None,
            value,
            aux: Vec::new(),
        }
    }

    fn selected(point: &Point) -> Self {
        Self {
            time: Some(point.time),
            value: point.value.clone(),
            aux: point.aux.clone(),
        }
    }
}

/// Reduces the points of one bucket
pub trait Reducer: Send {
    fn aggregate(&mut self, point: &Point);

    /// Emit the bucket's rows and reset for the next bucket
    fn emit(&mut self) -> Vec<Reduced>;
}

/// Build a fresh reducer for the reducing part of a call
pub fn new_reducer(call: &CompiledCall) -> Box<dyn Reducer> {
    if call.is_count_distinct() {
        return Box::new(DistinctReducer::counting());
    }
    match (call.function, &call.options) {
        (Function::Count, _) => Box::new(CountReducer::default()),
        (Function::Sum, _) => Box::new(SumReducer::default()),
        (Function::Mean, _) => Box::new(MeanReducer::default()),
        (Function::Median, _) => Box::new(MedianReducer::default()),
        (Function::Mode, _) => Box::new(ModeReducer::default()),
        (Function::Stddev, _) => Box::new(StddevReducer::default()),
        (Function::Spread, _) => Box::new(SpreadReducer::default()),
        (Function::Distinct, _) => Box::new(DistinctReducer::default()),
        (Function::Percentile, CallOptions::Percentile(p)) => Box::new(PercentileReducer::new(*p)),
        (Function::Top, CallOptions::TopBottom { n, tags }) => {
            Box::new(TopReducer::top(*n, tags.clone()))
        }
        (Function::Bottom, CallOptions::TopBottom { n, tags }) => {
            Box::new(TopReducer::bottom(*n, tags.clone()))
        }
        (f, _) => Box::new(SelectorReducer::new(f)),
    }
}

#[derive(Debug, Default)]
struct CountReducer {
    n: i64,
}

impl Reducer for CountReducer {
    fn aggregate(&mut self, point: &Point) {
        if !point.value.is_null() {
            self.n += 1;
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let n = std::mem::take(&mut self.n);
        vec![Reduced::derived(Value::Integer(n))]
    }
}

/// Sums integers as integers (wrapping) and anything else as floats
#[derive(Debug, Default)]
struct SumReducer {
    int: i64,
    float: f64,
    all_int: bool,
    seen: bool,
}

impl Reducer for SumReducer {
    fn aggregate(&mut self, point: &Point) {
        match point.value {
            Value::Integer(v) => {
                if !self.seen {
                    self.all_int = true;
                }
                self.int = self.int.wrapping_add(v);
                self.float += v as f64;
            }
            Value::Float(v) => {
                self.all_int = false;
                self.float += v;
            }
            _ => return,
        }
        self.seen = true;
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let out = std::mem::take(self);
        let value = match (out.seen, out.all_int) {
            (false, _) => Value::Null,
            (true, true) => Value::Integer(out.int),
            (true, false) => Value::Float(out.float),
        };
        vec![Reduced::derived(value)]
    }
}

#[derive(Debug, Default)]
struct MeanReducer {
    sum: f64,
    n: u64,
}

impl Reducer for MeanReducer {
    fn aggregate(&mut self, point: &Point) {
        if let Some(v) = point.value.as_f64() {
            self.sum += v;
            self.n += 1;
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let out = std::mem::take(self);
        let value = if out.n == 0 {
            Value::Null
        } else {
            Value::Float(out.sum / out.n as f64)
        };
        vec![Reduced::derived(value)]
    }
}

#[derive(Debug, Default)]
struct MedianReducer {
    values: Vec<f64>,
}

impl Reducer for MedianReducer {
    fn aggregate(&mut self, point: &Point) {
        if let Some(v) = point.value.as_f64() {
            self.values.push(v);
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let mut values = std::mem::take(&mut self.values);
        if values.is_empty() {
            return vec![Reduced::derived(Value::Null)];
        }
        values.sort_by(f64::total_cmp);
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            values[mid - 1] + (values[mid] - values[mid - 1]) / 2.0
        } else {
            values[mid]
        };
        vec![Reduced::derived(Value::Float(median))]
    }
}

/// Most frequent value; ties go to the smallest value
#[derive(Debug, Default)]
struct ModeReducer {
    values: Vec<Value>,
}

impl Reducer for ModeReducer {
    fn aggregate(&mut self, point: &Point) {
        if !point.value.is_null() {
            self.values.push(point.value.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let mut values = std::mem::take(&mut self.values);
        values.sort_by(Value::total_cmp);

        let mut best: Option<(&Value, usize)> = None;
        let mut i = 0;
        while i < values.len() {
            let mut j = i + 1;
            while j < values.len() && values[j].total_cmp(&values[i]) == Ordering::Equal {
                j += 1;
            }
            if best.map_or(true, |(_, n)| j - i > n) {
                best = Some((&values[i], j - i));
            }
            i = j;
        }

        let value = best.map(|(v, _)| v.clone()).unwrap_or_default();
        vec![Reduced::derived(value)]
    }
}

/// Sample standard deviation
#[derive(Debug, Default)]
struct StddevReducer {
    values: Vec<f64>,
}

impl Reducer for StddevReducer {
    fn aggregate(&mut self, point: &Point) {
        if let Some(v) = point.value.as_f64() {
            self.values.push(v);
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let values = std::mem::take(&mut self.values);
        if values.len() < 2 {
            return vec![Reduced::derived(Value::Null)];
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        vec![Reduced::derived(Value::Float(variance.sqrt()))]
    }
}

#[derive(Debug, Default)]
struct SpreadReducer {
    min: Option<Value>,
    max: Option<Value>,
}

impl Reducer for SpreadReducer {
    fn aggregate(&mut self, point: &Point) {
        if point.value.as_f64().is_none() {
            return;
        }
        let v = &point.value;
        if self.min.as_ref().map_or(true, |m| v.total_cmp(m) == Ordering::Less) {
            self.min = Some(v.clone());
        }
        if self.max.as_ref().map_or(true, |m| v.total_cmp(m) == Ordering::Greater) {
            self.max = Some(v.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let value = match (self.min.take(), self.max.take()) {
            (Some(Value::Integer(min)), Some(Value::Integer(max))) => match max.checked_sub(min) {
                Some(spread) => Value::Integer(spread),
                None => Value::Float(max as f64 - min as f64),
            },
            (Some(min), Some(max)) => match (min.as_f64(), max.as_f64()) {
                (Some(min), Some(max)) => Value::Float(max - min),
                _ => Value::Null,
            },
            _ => Value::Null,
        };
        vec![Reduced::derived(value)]
    }
}

/// Distinct values sorted ascending, or their count
#[derive(Debug, Default)]
struct DistinctReducer {
    values: Vec<Value>,
    count_only: bool,
}

impl DistinctReducer {
    fn counting() -> Self {
        Self {
            values: Vec::new(),
            count_only: true,
        }
    }
}

impl Reducer for DistinctReducer {
    fn aggregate(&mut self, point: &Point) {
        if !point.value.is_null() {
            self.values.push(point.value.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let mut values = std::mem::take(&mut self.values);
        values.sort_by(Value::total_cmp);
        values.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);

        if self.count_only {
            return vec![Reduced::derived(Value::Integer(values.len() as i64))];
        }
        if values.is_empty() {
            return vec![Reduced::derived(Value::Null)];
        }
        values.into_iter().map(Reduced::derived).collect()
    }
}

/// Nearest-rank percentile over a stable sort of the bucket's points
#[derive(Debug)]
struct PercentileReducer {
    percentile: f64,
    points: Vec<Point>,
}

impl PercentileReducer {
    fn new(percentile: f64) -> Self {
        Self {
            percentile,
            points: Vec::new(),
        }
    }
}

impl Reducer for PercentileReducer {
    fn aggregate(&mut self, point: &Point) {
        if point.value.as_f64().is_some() {
            self.points.push(point.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        let mut points = std::mem::take(&mut self.points);
        points.sort_by(|a, b| a.value.total_cmp(&b.value));

        let rank = (points.len() as f64 * self.percentile / 100.0 + 0.5).floor() as i64 - 1;
        match usize::try_from(rank).ok().and_then(|i| points.get(i)) {
            Some(point) => vec![Reduced::selected(point)],
            None => vec![Reduced::derived(Value::Null)],
        }
    }
}

/// first, last, min and max
///
/// Ties on the ranked property fall back to the earliest time, then the
/// earliest write; for `last` the latest write wins.
#[derive(Debug)]
struct SelectorReducer {
    function: Function,
    best: Option<Point>,
}

impl SelectorReducer {
    fn new(function: Function) -> Self {
        Self {
            function,
            best: None,
        }
    }

    fn is_better(&self, candidate: &Point, current: &Point) -> bool {
        let by_time = || (candidate.time, candidate.seq).cmp(&(current.time, current.seq));
        match self.function {
            Function::First => by_time() == Ordering::Less,
            Function::Last => by_time() == Ordering::Greater,
            Function::Min => match candidate.value.total_cmp(&current.value) {
                Ordering::Equal => by_time() == Ordering::Less,
                ord => ord == Ordering::Less,
            },
            _ => match candidate.value.total_cmp(&current.value) {
                Ordering::Equal => by_time() == Ordering::Less,
                ord => ord == Ordering::Greater,
            },
        }
    }
}

impl Reducer for SelectorReducer {
    fn aggregate(&mut self, point: &Point) {
        if point.value.is_null() {
            return;
        }
        let replace = match &self.best {
            None => true,
            Some(current) => self.is_better(point, current),
        };
        if replace {
            self.best = Some(point.clone());
        }
    }

    fn emit(&mut self) -> Vec<Reduced> {
        match self.best.take() {
            Some(point) => vec![Reduced::selected(&point)],
            None => vec![Reduced::derived(Value::Null)],
        }
    }
}
