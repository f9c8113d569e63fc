//! Fill policies for empty buckets
//!
//! The fill stage sits directly above a bucket reducer and walks the bucket
//! sequence of one group, inserting rows for buckets that received no
//! points. Bounds come from the statement's explicit time range. Without a
//! lower bound the walk starts (or, descending, ends) at the bucket of the
//! statement's earliest matching point, shared by every group; without an
//! upper bound the group's own latest bucket ends it. A group with no data
//! produces nothing.

use std::sync::Arc;

use crate::model::{DataType, Point, Tags, Value};
use crate::query::ast::FillOption;
use crate::query::context::QueryContext;
use crate::query::error::{LimitViolation, QueryError, QueryResult};
use crate::query::iterator::{BoxedIterator, PointIterator};
use crate::query::window::Window;

/// Inserts fill rows between (and around) reduced buckets
pub struct FillIterator {
    input: BoxedIterator,
    window: Window,
    fill: FillOption,
    /// What the function yields for an empty bucket under fill(null)
    zero: Value,
    output_type: DataType,
    ascending: bool,
    name: Arc<str>,
    tags: Tags,

    /// Point pulled from upstream but not emitted yet
    pending: Option<Point>,
    /// Next bucket the walk expects
    cursor: Option<i64>,
    /// Last bucket of the walk when bounded explicitly
    last: Option<i64>,
    /// Most recent non-empty bucket (time, value)
    prev: Option<(i64, Value)>,
    buckets: usize,
    seen_data: bool,
    done: bool,
}

impl FillIterator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: BoxedIterator,
        window: Window,
        fill: FillOption,
        zero: Value,
        output_type: DataType,
        ascending: bool,
        name: Arc<str>,
        tags: Tags,
    ) -> Self {
        let (first, last) = if ascending {
            (window.first_bucket(), window.last_bucket())
        } else {
            (window.last_bucket(), window.first_bucket())
        };
        Self {
            input,
            window,
            fill,
            zero,
            output_type,
            ascending,
            name,
            tags,
            pending: None,
            cursor: first,
            last,
            prev: None,
            buckets: 0,
            seen_data: false,
            done: false,
        }
    }

    /// Bound the walk below by `start` where the range sets no lower bound
    pub fn with_implicit_start(mut self, start: Option<i64>) -> Self {
        if self.window.first_bucket().is_none() {
            if self.ascending {
                self.cursor = start;
            } else {
                self.last = start;
            }
        }
        self
    }

    fn advance(&self, bucket: i64) -> Option<i64> {
        if self.ascending {
            self.window.next_start(bucket)
        } else {
            self.window.prev_start(bucket)
        }
    }

    /// `a` comes strictly before `b` in walk order
    fn before(&self, a: i64, b: i64) -> bool {
        if self.ascending {
            a < b
        } else {
            a > b
        }
    }

    fn count_bucket(&mut self, ctx: &QueryContext) -> QueryResult<()> {
        self.buckets += 1;
        let limit = ctx.limits().max_select_buckets;
        if limit > 0 && self.buckets > limit {
            return Err(QueryError::LimitExceeded(LimitViolation::MaxSelectBuckets {
                actual: self.buckets,
                limit,
            }));
        }
        Ok(())
    }

    fn fill_value(&self, bucket: i64, next: Option<&Point>) -> Value {
        match &self.fill {
            FillOption::Null | FillOption::None => self.zero.clone(),
            FillOption::Previous => self
                .prev
                .as_ref()
                .map(|(_, v)| v.clone())
                .unwrap_or_default(),
            FillOption::Value(v) => v.clone().cast_to(self.output_type),
            FillOption::Linear => match (&self.prev, next) {
                (Some((t0, v0)), Some(next)) => {
                    interpolate(*t0, v0, next.time, &next.value, bucket, self.output_type)
                }
                _ => Value::Null,
            },
        }
    }

    fn fill_row(&self, bucket: i64, value: Value) -> Point {
        Point {
            name: self.name.clone(),
            tags: self.tags.clone(),
            time: bucket,
            value,
            aux: Vec::new(),
            seq: 0,
        }
    }
}

fn interpolate(t0: i64, v0: &Value, t1: i64, v1: &Value, t: i64, output_type: DataType) -> Value {
    match (v0.as_f64(), v1.as_f64()) {
        (Some(y0), Some(y1)) if t1 != t0 => {
            let y = y0 + (y1 - y0) * ((t - t0) as f64 / (t1 - t0) as f64);
            Value::Float(y).cast_to(output_type)
        }
        _ => Value::Null,
    }
}

impl PointIterator for FillIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        if self.fill == FillOption::None {
            return self.input.next_point(ctx);
        }

        if self.pending.is_none() && !self.done {
            self.pending = self.input.next_point(ctx)?;
            self.done = self.pending.is_none();
        }

        let Some(point) = self.pending.take() else {
            // trailing buckets up to the explicit bound
            let (Some(cursor), Some(last)) = (self.cursor, self.last) else {
                return Ok(None);
            };
            if !self.seen_data || self.before(last, cursor) {
                return Ok(None);
            }
            let value = self.fill_value(cursor, None);
            self.count_bucket(ctx)?;
            self.cursor = self.advance(cursor);
            return Ok(Some(self.fill_row(cursor, value)));
        };

        self.seen_data = true;
        let bucket = self.window.bucket_start(point.time);
        let cursor = *self.cursor.get_or_insert(bucket);

        if self.before(cursor, bucket) {
            // empty bucket ahead of the next data point
            let value = self.fill_value(cursor, Some(&point));
            self.pending = Some(point);
            self.count_bucket(ctx)?;
            self.cursor = self.advance(cursor);
            return Ok(Some(self.fill_row(cursor, value)));
        }

        if cursor == bucket {
            self.count_bucket(ctx)?;
            self.cursor = self.advance(bucket);
        }
        if !point.value.is_null() {
            self.prev = Some((bucket, point.value.clone()));
        }
        Ok(Some(point))
    }

    fn data_type(&self) -> DataType {
        self.output_type
    }

    fn close(&mut self) {
        self.pending = None;
        self.done = true;
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TimeRange;
    use crate::query::context::QueryLimits;
    use crate::query::iterator::test_util::{collect, floats, integers};
    use crate::query::iterator::BufferedIterator;
    use crate::query::window::Interval;
    use tokio_util::sync::CancellationToken;

    fn window(range: TimeRange) -> Window {
        Window::new(Some(Interval::new(10, 0)), None, range)
    }

    fn fill(input: BoxedIterator, range: TimeRange, option: FillOption, zero: Value) -> Vec<(i64, Value)> {
        let data_type = input.data_type();
        collect(FillIterator::new(
            input,
            window(range),
            option,
            zero,
            data_type,
            true,
            Arc::from("cpu"),
            Tags::new(),
        ))
    }

    #[test]
    fn test_fill_null_inside_explicit_range() {
        let out = fill(
            floats(&[(10, 1.0), (40, 4.0)]),
            TimeRange::new(0, 59),
            FillOption::Null,
            Value::Null,
        );
        assert_eq!(
            out,
            vec![
                (0, Value::Null),
                (10, Value::Float(1.0)),
                (20, Value::Null),
                (30, Value::Null),
                (40, Value::Float(4.0)),
                (50, Value::Null),
            ]
        );
    }

    #[test]
    fn test_fill_null_uses_count_zero() {
        let out = fill(
            integers(&[(0, 3), (20, 1)]),
            TimeRange::new(0, 29),
            FillOption::Null,
            Value::Integer(0),
        );
        assert_eq!(
            out,
            vec![(0, Value::Integer(3)), (10, Value::Integer(0)), (20, Value::Integer(1))]
        );
    }

    #[test]
    fn test_fill_previous_overrides_zero() {
        let out = fill(
            integers(&[(10, 3), (40, 1)]),
            TimeRange::new(0, 49),
            FillOption::Previous,
            Value::Integer(0),
        );
        assert_eq!(
            out,
            vec![
                (0, Value::Null),
                (10, Value::Integer(3)),
                (20, Value::Integer(3)),
                (30, Value::Integer(3)),
                (40, Value::Integer(1)),
            ]
        );
    }

    #[test]
    fn test_fill_literal_is_cast() {
        let out = fill(
            integers(&[(0, 3), (20, 1)]),
            TimeRange::new(0, 29),
            FillOption::Value(Value::Float(7.9)),
            Value::Integer(0),
        );
        assert_eq!(out[1], (10, Value::Integer(7)));
    }

    #[test]
    fn test_fill_linear() {
        let out = fill(
            floats(&[(0, 1.0), (40, 5.0)]),
            TimeRange::new(0, 59),
            FillOption::Linear,
            Value::Null,
        );
        assert_eq!(
            out,
            vec![
                (0, Value::Float(1.0)),
                (10, Value::Float(2.0)),
                (20, Value::Float(3.0)),
                (30, Value::Float(4.0)),
                (40, Value::Float(5.0)),
                (50, Value::Null),
            ]
        );
    }

    #[test]
    fn test_fill_none_passes_through() {
        let out = fill(
            floats(&[(10, 1.0), (40, 4.0)]),
            TimeRange::new(0, 59),
            FillOption::None,
            Value::Null,
        );
        assert_eq!(out, vec![(10, Value::Float(1.0)), (40, Value::Float(4.0))]);
    }

    #[test]
    fn test_implicit_bounds_follow_data() {
        let out = fill(
            floats(&[(20, 1.0), (40, 4.0)]),
            TimeRange::unbounded(),
            FillOption::Null,
            Value::Null,
        );
        assert_eq!(
            out,
            vec![(20, Value::Float(1.0)), (30, Value::Null), (40, Value::Float(4.0))]
        );

        let out = fill(floats(&[]), TimeRange::new(0, 100), FillOption::Null, Value::Null);
        assert!(out.is_empty());
    }

    fn with_start(input: BoxedIterator, ascending: bool, start: Option<i64>) -> Vec<(i64, Value)> {
        collect(
            FillIterator::new(
                input,
                window(TimeRange::unbounded()),
                FillOption::Null,
                Value::Integer(0),
                DataType::Integer,
                ascending,
                Arc::from("cpu"),
                Tags::new(),
            )
            .with_implicit_start(start),
        )
    }

    #[test]
    fn test_implicit_start_leads_the_walk() {
        let out = with_start(integers(&[(20, 1), (30, 1)]), true, Some(0));
        assert_eq!(
            out,
            vec![
                (0, Value::Integer(0)),
                (10, Value::Integer(0)),
                (20, Value::Integer(1)),
                (30, Value::Integer(1)),
            ]
        );

        let descending = BufferedIterator::new(
            vec![
                Point::new("cpu", Tags::new(), 30, 1i64),
                Point::new("cpu", Tags::new(), 20, 1i64),
            ],
            DataType::Integer,
        )
        .boxed();
        let out = with_start(descending, false, Some(0));
        assert_eq!(
            out,
            vec![
                (30, Value::Integer(1)),
                (20, Value::Integer(1)),
                (10, Value::Integer(0)),
                (0, Value::Integer(0)),
            ]
        );

        assert!(with_start(integers(&[]), true, Some(0)).is_empty());
    }

    #[test]
    fn test_explicit_start_wins_over_implicit() {
        let iter = FillIterator::new(
            integers(&[(20, 1)]),
            window(TimeRange::new(10, 29)),
            FillOption::Null,
            Value::Integer(0),
            DataType::Integer,
            true,
            Arc::from("cpu"),
            Tags::new(),
        )
        .with_implicit_start(Some(0));
        assert_eq!(
            collect(iter),
            vec![(10, Value::Integer(0)), (20, Value::Integer(1))]
        );
    }

    #[test]
    fn test_descending_walk() {
        let input = BufferedIterator::new(
            vec![
                Point::new("cpu", Tags::new(), 30, 3.0),
                Point::new("cpu", Tags::new(), 0, 1.0),
            ],
            DataType::Float,
        )
        .boxed();
        let iter = FillIterator::new(
            input,
            window(TimeRange::new(0, 39)),
            FillOption::Value(Value::Float(0.0)),
            Value::Null,
            DataType::Float,
            false,
            Arc::from("cpu"),
            Tags::new(),
        );
        assert_eq!(
            collect(iter),
            vec![
                (30, Value::Float(3.0)),
                (20, Value::Float(0.0)),
                (10, Value::Float(0.0)),
                (0, Value::Float(1.0)),
            ]
        );
    }

    #[test]
    fn test_bucket_guard() {
        let limits = QueryLimits {
            max_select_buckets: 3,
            ..Default::default()
        };
        let ctx = QueryContext::new(CancellationToken::new(), limits);
        let mut iter = FillIterator::new(
            floats(&[(0, 1.0), (90, 2.0)]),
            window(TimeRange::unbounded()),
            FillOption::Null,
            Value::Null,
            DataType::Float,
            true,
            Arc::from("cpu"),
            Tags::new(),
        );
        let mut result = Ok(None);
        for _ in 0..10 {
            result = iter.next_point(&ctx);
            if result.is_err() {
                break;
            }
        }
        assert_eq!(
            result.unwrap_err().to_string(),
            "max-select-buckets limit exceeded: (4/3)"
        );
    }
}
