//! Function library
//!
//! Functions fall into three families:
//!
//! - **aggregates** reduce a bucket to one derived value stamped with the
//!   bucket start (count, sum, mean, median, mode, stddev, spread, distinct)
//! - **selectors** pick points and keep their timestamp and auxiliary
//!   columns (first, last, min, max, percentile, top, bottom)
//! - **transforms** run over the ordered sequence of bucket outputs
//!   (derivative family, moving_average, cumulative_sum, elapsed)
//!
//! A [`Call`] from the statement is validated and compiled into a
//! [`CompiledCall`] before any iterator is built, so argument and type
//! errors surface at plan time.

pub mod reduce;
pub mod top;
pub mod transform;

use std::fmt;

use crate::model::{DataType, Value};
use crate::query::ast::{Call, Expr};
use crate::query::error::{LimitViolation, QueryError, QueryResult};

pub use reduce::{new_reducer, Reduced, Reducer};
pub use top::TopReducer;
pub use transform::{TransformIterator, TransformState};

/// Family a function belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Aggregate,
    Selector,
    Transform,
}

/// Every supported function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    Count,
    Sum,
    Mean,
    Median,
    Mode,
    Stddev,
    Spread,
    Distinct,
    First,
    Last,
    Min,
    Max,
    Percentile,
    Top,
    Bottom,
    Derivative,
    NonNegativeDerivative,
    Difference,
    NonNegativeDifference,
    MovingAverage,
    CumulativeSum,
    Elapsed,
}

impl Function {
    /// Look up a function by (case-insensitive) name
    pub fn lookup(name: &str) -> Option<Self> {
        let f = match name.to_ascii_lowercase().as_str() {
            "count" => Self::Count,
            "sum" => Self::Sum,
            "mean" => Self::Mean,
            "median" => Self::Median,
            "mode" => Self::Mode,
            "stddev" => Self::Stddev,
            "spread" => Self::Spread,
            "distinct" => Self::Distinct,
            "first" => Self::First,
            "last" => Self::Last,
            "min" => Self::Min,
            "max" => Self::Max,
            "percentile" => Self::Percentile,
            "top" => Self::Top,
            "bottom" => Self::Bottom,
            "derivative" => Self::Derivative,
            "non_negative_derivative" => Self::NonNegativeDerivative,
            "difference" => Self::Difference,
            "non_negative_difference" => Self::NonNegativeDifference,
            "moving_average" => Self::MovingAverage,
            "cumulative_sum" => Self::CumulativeSum,
            "elapsed" => Self::Elapsed,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::Stddev => "stddev",
            Self::Spread => "spread",
            Self::Distinct => "distinct",
            Self::First => "first",
            Self::Last => "last",
            Self::Min => "min",
            Self::Max => "max",
            Self::Percentile => "percentile",
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Derivative => "derivative",
            Self::NonNegativeDerivative => "non_negative_derivative",
            Self::Difference => "difference",
            Self::NonNegativeDifference => "non_negative_difference",
            Self::MovingAverage => "moving_average",
            Self::CumulativeSum => "cumulative_sum",
            Self::Elapsed => "elapsed",
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            Self::Count
            | Self::Sum
            | Self::Mean
            | Self::Median
            | Self::Mode
            | Self::Stddev
            | Self::Spread
            | Self::Distinct => FunctionKind::Aggregate,
            Self::First
            | Self::Last
            | Self::Min
            | Self::Max
            | Self::Percentile
            | Self::Top
            | Self::Bottom => FunctionKind::Selector,
            Self::Derivative
            | Self::NonNegativeDerivative
            | Self::Difference
            | Self::NonNegativeDifference
            | Self::MovingAverage
            | Self::CumulativeSum
            | Self::Elapsed => FunctionKind::Transform,
        }
    }

    pub fn is_transform(&self) -> bool {
        self.kind() == FunctionKind::Transform
    }

    pub fn is_top_bottom(&self) -> bool {
        matches!(self, Self::Top | Self::Bottom)
    }

    /// Selectors that return exactly one point per bucket
    pub fn is_point_selector(&self) -> bool {
        matches!(
            self,
            Self::First | Self::Last | Self::Min | Self::Max | Self::Percentile
        )
    }

    /// Whether the function can consume values of type `t`
    pub fn accepts(&self, t: DataType) -> bool {
        if t == DataType::Unknown {
            return true;
        }
        match self {
            Self::Count | Self::Distinct | Self::Mode | Self::First | Self::Last | Self::Elapsed => {
                true
            }
            _ => t.is_numeric(),
        }
    }

    /// Type of the values produced for an input of type `input`
    pub fn output_type(&self, input: DataType) -> DataType {
        match self {
            Self::Count | Self::Elapsed => DataType::Integer,
            Self::Mean
            | Self::Median
            | Self::Stddev
            | Self::Derivative
            | Self::NonNegativeDerivative
            | Self::MovingAverage => DataType::Float,
            Self::Sum
            | Self::Spread
            | Self::Difference
            | Self::NonNegativeDifference
            | Self::CumulativeSum => match input {
                DataType::Integer => DataType::Integer,
                _ => DataType::Float,
            },
            _ => input,
        }
    }

    /// What the function yields over zero points
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Count => Value::Integer(0),
            _ => Value::Null,
        }
    }

    /// Allowed argument counts (min, max)
    fn arity(&self) -> (usize, usize) {
        match self {
            Self::Percentile | Self::MovingAverage => (2, 2),
            Self::Top | Self::Bottom => (2, usize::MAX),
            Self::Derivative | Self::NonNegativeDerivative | Self::Elapsed => (1, 2),
            _ => (1, 1),
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Validated function arguments
#[derive(Debug, Clone, PartialEq)]
pub enum CallOptions {
    None,
    Percentile(f64),
    TopBottom { n: usize, tags: Vec<String> },
    Window(usize),
    /// Unit for derivative and elapsed (`None` means the default)
    Unit(Option<i64>),
}

/// What a call consumes
#[derive(Debug, Clone, PartialEq)]
pub enum CallInput {
    Field(String),
    Call(Box<CompiledCall>),
}

/// A validated call ready to be turned into iterators
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCall {
    pub function: Function,
    pub input: CallInput,
    pub options: CallOptions,
}

impl CompiledCall {
    /// The field ultimately read by this call
    pub fn field(&self) -> &str {
        match &self.input {
            CallInput::Field(f) => f,
            CallInput::Call(inner) => inner.field(),
        }
    }

    /// The reducing call of a transform, or the call itself
    pub fn reducing_call(&self) -> &CompiledCall {
        match (&self.input, self.function.is_transform()) {
            (CallInput::Call(inner), true) => inner.reducing_call(),
            _ => self,
        }
    }

    /// `count(distinct(field))`
    pub fn is_count_distinct(&self) -> bool {
        matches!(&self.input, CallInput::Call(inner)
            if self.function == Function::Count && inner.function == Function::Distinct)
    }

    /// Output type given the type of the field read
    pub fn output_type(&self, field_type: DataType) -> DataType {
        let input = match &self.input {
            CallInput::Field(_) => field_type,
            CallInput::Call(inner) => inner.output_type(field_type),
        };
        self.function.output_type(input)
    }

    /// Check every function in the chain accepts its input type
    pub fn check_type(&self, field_type: DataType) -> QueryResult<()> {
        let input = match &self.input {
            CallInput::Field(_) => field_type,
            CallInput::Call(inner) => {
                inner.check_type(field_type)?;
                inner.output_type(field_type)
            }
        };
        if self.function.accepts(input) {
            Ok(())
        } else {
            Err(QueryError::type_mismatch(self.function.name(), input))
        }
    }
}

/// Statement properties call validation depends on
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileEnv {
    /// GROUP BY time interval, if any
    pub interval: Option<i64>,
    /// Statement LIMIT (0 = none)
    pub limit: usize,
}

/// Validate a call and compile it
pub fn compile_call(call: &Call, env: &CompileEnv) -> QueryResult<CompiledCall> {
    let function = Function::lookup(&call.name)
        .ok_or_else(|| QueryError::invalid(format!("undefined function {}()", call.name)))?;
    let name = function.name();

    let (min, max) = function.arity();
    let got = call.args.len();
    if got < min || got > max {
        let expected = match (min, max) {
            (min, max) if min == max => format!("expected {}", min),
            (min, usize::MAX) => format!("expected at least {}", min),
            (min, max) => format!("expected at least {} but no more than {}", min, max),
        };
        return Err(QueryError::invalid(format!(
            "invalid number of arguments for {}, {}, got {}",
            name, expected, got
        )));
    }

    if function.is_transform() {
        return compile_transform(function, call, env);
    }

    let input = match &call.args[0] {
        Expr::VarRef(field) => CallInput::Field(field.clone()),
        Expr::Call(inner) if function == Function::Count => {
            let inner = compile_call(inner, env)?;
            if inner.function != Function::Distinct {
                return Err(QueryError::invalid(format!(
                    "expected field argument in {}()",
                    name
                )));
            }
            CallInput::Call(Box::new(inner))
        }
        _ => {
            return Err(QueryError::invalid(format!(
                "expected field argument in {}()",
                name
            )))
        }
    };

    let options = match function {
        Function::Percentile => {
            let p = match &call.args[1] {
                Expr::Integer(v) => *v as f64,
                Expr::Number(v) => *v,
                other => {
                    return Err(QueryError::invalid(format!(
                        "expected float argument in percentile(), found {}",
                        other
                    )))
                }
            };
            if !(0.0..=100.0).contains(&p) {
                return Err(QueryError::invalid("percentile must be between 0 and 100"));
            }
            CallOptions::Percentile(p)
        }
        Function::Top | Function::Bottom => compile_top_bottom(function, call, env)?,
        _ => CallOptions::None,
    };

    Ok(CompiledCall {
        function,
        input,
        options,
    })
}

fn compile_top_bottom(function: Function, call: &Call, env: &CompileEnv) -> QueryResult<CallOptions> {
    let name = function.name();
    let last = &call.args[call.args.len() - 1];
    let n = match last {
        Expr::Integer(n) => *n,
        other => {
            return Err(QueryError::invalid(format!(
                "expected integer as last argument in {}(), found {}",
                name, other
            )))
        }
    };
    if n <= 0 {
        return Err(QueryError::invalid(format!(
            "limit ({}) in {} function must be at least 1",
            n, name
        )));
    }
    let n = n as usize;
    if env.limit > 0 && n > env.limit {
        return Err(QueryError::LimitExceeded(LimitViolation::SelectorLimit {
            function: name.to_string(),
            n,
            limit: env.limit,
        }));
    }

    let mut tags = Vec::new();
    for arg in &call.args[1..call.args.len() - 1] {
        match arg {
            Expr::VarRef(tag) => tags.push(tag.clone()),
            other => {
                return Err(QueryError::invalid(format!(
                    "only fields or tags are allowed in {}(), found {}",
                    name, other
                )))
            }
        }
    }
    Ok(CallOptions::TopBottom { n, tags })
}

fn compile_transform(function: Function, call: &Call, env: &CompileEnv) -> QueryResult<CompiledCall> {
    let name = function.name();
    let input = match (&call.args[0], env.interval) {
        (Expr::Call(inner), Some(_)) => {
            let inner = compile_call(inner, env)?;
            if inner.function.is_transform() || inner.function.is_top_bottom() {
                return Err(QueryError::invalid(format!(
                    "aggregate function required inside the call to {}",
                    name
                )));
            }
            CallInput::Call(Box::new(inner))
        }
        (Expr::Call(_), None) => {
            return Err(QueryError::invalid(format!(
                "{} aggregate requires a GROUP BY interval",
                name
            )))
        }
        (Expr::VarRef(_), Some(_)) => {
            return Err(QueryError::invalid(format!(
                "aggregate function required inside the call to {}",
                name
            )))
        }
        (Expr::VarRef(field), None) => CallInput::Field(field.clone()),
        _ => {
            return Err(QueryError::invalid(format!(
                "expected field argument in {}()",
                name
            )))
        }
    };

    let options = match function {
        Function::MovingAverage => {
            let n = match &call.args[1] {
                Expr::Integer(n) => *n,
                _ => {
                    return Err(QueryError::invalid(
                        "second argument for moving_average must be an integer",
                    ))
                }
            };
            if n <= 1 {
                return Err(QueryError::invalid("moving_average window must be greater than 1"));
            }
            CallOptions::Window(n as usize)
        }
        Function::Derivative | Function::NonNegativeDerivative | Function::Elapsed => {
            match call.args.get(1) {
                None => CallOptions::Unit(None),
                Some(Expr::Duration(d)) if *d > 0 => CallOptions::Unit(Some(*d)),
                Some(Expr::Duration(d)) => {
                    return Err(QueryError::invalid(format!(
                        "duration argument must be positive, got {}",
                        crate::query::duration::format_duration(*d)
                    )))
                }
                Some(other) => {
                    return Err(QueryError::invalid(format!(
                        "second argument to {} must be a duration, got {}",
                        name, other
                    )))
                }
            }
        }
        _ => CallOptions::None,
    };

    Ok(CompiledCall {
        function,
        input,
        options,
    })
}
