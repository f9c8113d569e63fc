//! Window transforms
//!
//! Transforms consume an ordered stream of bucket outputs (or raw points
//! when there is no GROUP BY time) and emit one row per input once they
//! have enough history. A null input never enters the running state; it
//! produces a null row at its own time once the transform has history, so
//! fill(null) gaps stay visible in the output.

use std::collections::VecDeque;

use crate::model::{DataType, Point, TimeRange, Value};
use crate::query::context::QueryContext;
use crate::query::error::{QueryError, QueryResult};
use crate::query::functions::{CallOptions, CompiledCall, Function};
use crate::query::iterator::{BoxedIterator, PointIterator};

/// Running state of one transform
#[derive(Debug, Clone, PartialEq)]
pub enum TransformState {
    Derivative {
        unit: i64,
        non_negative: bool,
        prev: Option<(i64, f64)>,
    },
    Difference {
        non_negative: bool,
        prev: Option<(i64, Value)>,
    },
    MovingAverage {
        n: usize,
        window: VecDeque<f64>,
    },
    CumulativeSum {
        sum: Option<Value>,
    },
    Elapsed {
        unit: i64,
        prev: Option<i64>,
    },
}

impl TransformState {
    /// State for a transform call
    ///
    /// `default_unit` applies to derivatives without an explicit unit.
    pub fn new(call: &CompiledCall, default_unit: i64) -> QueryResult<Self> {
        let unit = match call.options {
            CallOptions::Unit(Some(unit)) => unit,
            _ => default_unit,
        };
        Ok(match call.function {
            Function::Derivative | Function::NonNegativeDerivative => Self::Derivative {
                unit,
                non_negative: call.function == Function::NonNegativeDerivative,
                prev: None,
            },
            Function::Difference | Function::NonNegativeDifference => Self::Difference {
                non_negative: call.function == Function::NonNegativeDifference,
                prev: None,
            },
            Function::MovingAverage => Self::MovingAverage {
                n: match call.options {
                    CallOptions::Window(n) => n,
                    _ => 2,
                },
                window: VecDeque::new(),
            },
            Function::Elapsed => Self::Elapsed {
                unit: match call.options {
                    CallOptions::Unit(Some(unit)) => unit,
                    _ => 1,
                },
                prev: None,
            },
            Function::CumulativeSum => Self::CumulativeSum { sum: None },
            Function::Count
            | Function::Sum
            | Function::Mean
            | Function::Median
            | Function::Mode
            | Function::Stddev
            | Function::Spread
            | Function::Distinct
            | Function::First
            | Function::Last
            | Function::Min
            | Function::Max
            | Function::Percentile
            | Function::Top
            | Function::Bottom => {
                return Err(QueryError::Internal(format!(
                    "{}() is not a window transform",
                    call.function
                )))
            }
        })
    }

    /// Feed one input, returning the output value if a row is due
    ///
    /// `ascending` is false when inputs arrive newest first.
    pub fn step(&mut self, time: i64, value: &Value, ascending: bool) -> Option<Value> {
        match self {
            Self::Derivative {
                unit,
                non_negative,
                prev,
            } => {
                let Some(v) = value.as_f64() else {
                    return prev.map(|_| Value::Null);
                };
                let out = match *prev {
                    Some((pt, _)) if pt == time => return None,
                    Some((pt, pv)) => {
                        let mut elapsed = (i128::from(time) - i128::from(pt)) as f64;
                        if !ascending {
                            elapsed = -elapsed;
                        }
                        let rate = (v - pv) / (elapsed / *unit as f64);
                        (!*non_negative || rate >= 0.0).then_some(Value::Float(rate))
                    }
                    None => None,
                };
                *prev = Some((time, v));
                out
            }
            Self::Difference { non_negative, prev } => {
                if value.is_null() {
                    return prev.as_ref().map(|_| Value::Null);
                }
                let out = match prev.take() {
                    Some((pt, _)) if pt == time => None,
                    Some((_, pv)) => {
                        let diff = match (value, &pv) {
                            (Value::Integer(a), Value::Integer(b)) => Value::Integer(a.wrapping_sub(*b)),
                            (a, b) => match (a.as_f64(), b.as_f64()) {
                                (Some(a), Some(b)) => Value::Float(a - b),
                                _ => Value::Null,
                            },
                        };
                        let negative = diff.as_f64().is_some_and(|d| d < 0.0);
                        (!*non_negative || !negative).then_some(diff)
                    }
                    None => None,
                };
                *prev = Some((time, value.clone()));
                out
            }
            Self::MovingAverage { n, window } => {
                let Some(v) = value.as_f64() else {
                    return (window.len() >= *n).then_some(Value::Null);
                };
                window.push_back(v);
                if window.len() > *n {
                    window.pop_front();
                }
                (window.len() == *n).then(|| Value::Float(window.iter().sum::<f64>() / *n as f64))
            }
            Self::CumulativeSum { sum } => {
                if value.as_f64().is_none() {
                    return Some(Value::Null);
                }
                let next = match (sum.take(), value) {
                    (None, v) => v.clone(),
                    (Some(Value::Integer(a)), Value::Integer(b)) => Value::Integer(a.wrapping_add(*b)),
                    (Some(a), b) => match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => Value::Float(a + b),
                        _ => Value::Null,
                    },
                };
                *sum = Some(next.clone());
                Some(next)
            }
            Self::Elapsed { unit, prev } => {
                if value.is_null() {
                    return prev.map(|_| Value::Null);
                }
                let out = prev.map(|pt| {
                    let elapsed = if ascending {
                        time.checked_sub(pt)
                    } else {
                        pt.checked_sub(time)
                    };
                    elapsed.map_or(Value::Null, |e| Value::Integer(e / *unit))
                });
                *prev = Some(time);
                out
            }
        }
    }
}

/// Applies a transform to an upstream stream, clipping output to a range
pub struct TransformIterator {
    input: BoxedIterator,
    state: TransformState,
    output_type: DataType,
    ascending: bool,
    clip: Option<TimeRange>,
}

impl TransformIterator {
    pub fn new(
        input: BoxedIterator,
        state: TransformState,
        output_type: DataType,
        ascending: bool,
    ) -> Self {
        Self {
            input,
            state,
            output_type,
            ascending,
            clip: None,
        }
    }

    /// Builder method: drop output rows outside `range`
    pub fn with_clip(mut self, range: TimeRange) -> Self {
        self.clip = Some(range);
        self
    }
}

impl PointIterator for TransformIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        while let Some(point) = self.input.next_point(ctx)? {
            let Some(value) = self.state.step(point.time, &point.value, self.ascending) else {
                continue;
            };
            if let Some(clip) = &self.clip {
                if !clip.contains(point.time) {
                    continue;
                }
            }
            return Ok(Some(Point {
                value,
                aux: Vec::new(),
                seq: 0,
                ..point
            }));
        }
        Ok(None)
    }

    fn data_type(&self) -> DataType {
        self.output_type
    }

    fn close(&mut self) {
        self.input.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{Call, Expr};
    use crate::query::duration::SECOND;
    use crate::query::functions::{compile_call, CompileEnv};
    use crate::query::iterator::test_util::{collect, floats, integers};

    fn state(name: &str, extra: Vec<Expr>, default_unit: i64) -> TransformState {
        let mut args = vec![Expr::var("value")];
        args.extend(extra);
        let call = Call {
            name: name.to_string(),
            args,
        };
        TransformState::new(&compile_call(&call, &CompileEnv::default()).unwrap(), default_unit).unwrap()
    }

    fn run(state: TransformState, input: BoxedIterator) -> Vec<(i64, Value)> {
        collect(TransformIterator::new(input, state, DataType::Float, true))
    }

    #[test]
    fn test_derivative() {
        let input = floats(&[(0, 10.0), (SECOND, 15.0), (3 * SECOND, 5.0)]);
        assert_eq!(
            run(state("derivative", vec![], SECOND), input),
            vec![(SECOND, Value::Float(5.0)), (3 * SECOND, Value::Float(-5.0))]
        );

        let input = floats(&[(0, 10.0), (2 * SECOND, 20.0)]);
        assert_eq!(
            run(state("derivative", vec![Expr::Duration(4 * SECOND)], SECOND), input),
            vec![(2 * SECOND, Value::Float(20.0))]
        );
    }

    #[test]
    fn test_non_negative_derivative_suppresses_drops() {
        let input = floats(&[(0, 10.0), (SECOND, 5.0), (2 * SECOND, 7.0)]);
        assert_eq!(
            run(state("non_negative_derivative", vec![], SECOND), input),
            vec![(2 * SECOND, Value::Float(2.0))]
        );
    }

    #[test]
    fn test_derivative_descending() {
        let mut s = state("derivative", vec![], SECOND);
        assert_eq!(s.step(2 * SECOND, &Value::Float(20.0), false), None);
        assert_eq!(s.step(SECOND, &Value::Float(15.0), false), Some(Value::Float(-5.0)));
    }

    #[test]
    fn test_difference_keeps_integers() {
        let input = integers(&[(1, 10), (2, 4), (3, 9)]);
        assert_eq!(
            run(state("difference", vec![], SECOND), input),
            vec![(2, Value::Integer(-6)), (3, Value::Integer(5))]
        );

        let input = integers(&[(1, 10), (2, 4), (3, 9)]);
        assert_eq!(
            run(state("non_negative_difference", vec![], SECOND), input),
            vec![(3, Value::Integer(5))]
        );
    }

    #[test]
    fn test_moving_average() {
        let input = floats(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 5.0)]);
        assert_eq!(
            run(state("moving_average", vec![Expr::Integer(2)], SECOND), input),
            vec![(2, Value::Float(1.5)), (3, Value::Float(2.5)), (4, Value::Float(4.0))]
        );
    }

    #[test]
    fn test_cumulative_sum() {
        let input = integers(&[(1, 1), (2, 2), (3, 3)]);
        assert_eq!(
            run(state("cumulative_sum", vec![], SECOND), input),
            vec![(1, Value::Integer(1)), (2, Value::Integer(3)), (3, Value::Integer(6))]
        );
    }

    #[test]
    fn test_elapsed() {
        let input = floats(&[(0, 1.0), (SECOND, 1.0), (4 * SECOND, 1.0)]);
        assert_eq!(
            run(state("elapsed", vec![Expr::Duration(SECOND)], SECOND), input),
            vec![(SECOND, Value::Integer(1)), (4 * SECOND, Value::Integer(3))]
        );
    }

    #[test]
    fn test_null_inputs_propagate() {
        let mut s = state("derivative", vec![], 1);
        assert_eq!(s.step(0, &Value::Null, true), None);
        assert_eq!(s.step(1, &Value::Float(1.0), true), None);
        assert_eq!(s.step(2, &Value::Null, true), Some(Value::Null));
        assert_eq!(s.step(3, &Value::Float(3.0), true), Some(Value::Float(1.0)));

        let mut s = state("cumulative_sum", vec![], 1);
        assert_eq!(s.step(0, &Value::Float(1.0), true), Some(Value::Float(1.0)));
        assert_eq!(s.step(1, &Value::Null, true), Some(Value::Null));
        assert_eq!(s.step(2, &Value::Float(2.0), true), Some(Value::Float(3.0)));

        let mut s = state("moving_average", vec![Expr::Integer(2)], 1);
        assert_eq!(s.step(0, &Value::Null, true), None);
        assert_eq!(s.step(1, &Value::Float(1.0), true), None);
        assert_eq!(s.step(2, &Value::Float(3.0), true), Some(Value::Float(2.0)));
        assert_eq!(s.step(3, &Value::Null, true), Some(Value::Null));
    }

    #[test]
    fn test_gaps_wider_than_i64() {
        let far = 5_000_000_000_000_000_000i64;
        let mut s = state("derivative", vec![], SECOND);
        assert_eq!(s.step(-far, &Value::Float(1.0), true), None);
        let Some(Value::Float(rate)) = s.step(far, &Value::Float(2.0), true) else {
            panic!("expected a rate");
        };
        assert!(rate > 0.0 && rate < 1e-9);

        let mut s = state("elapsed", vec![Expr::Duration(SECOND)], SECOND);
        assert_eq!(s.step(-far, &Value::Float(1.0), true), None);
        assert_eq!(s.step(far, &Value::Float(2.0), true), Some(Value::Null));
        assert_eq!(s.step(far + SECOND, &Value::Float(3.0), true), Some(Value::Integer(1)));

        let mut s = state("elapsed", vec![], SECOND);
        assert_eq!(s.step(far, &Value::Float(1.0), false), None);
        assert_eq!(s.step(-far, &Value::Float(2.0), false), Some(Value::Null));
    }

    #[test]
    fn test_non_transform_rejected() {
        let call = Call {
            name: "mean".to_string(),
            args: vec![Expr::var("value")],
        };
        let compiled = compile_call(&call, &CompileEnv::default()).unwrap();
        assert!(matches!(
            TransformState::new(&compiled, SECOND),
            Err(QueryError::Internal(_))
        ));
    }

    #[test]
    fn test_clip() {
        let input = floats(&[(0, 1.0), (10, 2.0), (20, 4.0)]);
        let iter = TransformIterator::new(input, state("difference", vec![], 1), DataType::Float, true)
            .with_clip(TimeRange::new(15, 30));
        assert_eq!(collect(iter), vec![(20, Value::Float(2.0))]);
    }
}
