//! Statement Abstract Syntax Tree
//!
//! The structured form of a SELECT statement as handed over by the statement
//! parser: resolved field and tag references, sources (measurements or
//! nested subqueries), GROUP BY dimensions, fill policy and pagination.
//! The engine never parses query text; statements are either built with
//! [`StatementBuilder`] or deserialized from JSON.
//!
//! # Example
//!
//! ```rust
//! use chronicle_engine::query::{Expr, FillOption, SelectStatement, SECOND};
//!
//! // SELECT mean(value) FROM cpu WHERE time >= 0 AND time <= 60s
//! //   GROUP BY host, time(10s) fill(0)
//! let stmt = SelectStatement::builder()
//!     .field(Expr::call("mean", vec![Expr::var("value")]))
//!     .from("cpu")
//!     .time_range(0, 60 * SECOND)
//!     .group_by("host")
//!     .group_by_time(10 * SECOND)
//!     .fill(FillOption::Value(0.into()))
//!     .build();
//!
//! assert_eq!(stmt.fields[0].name(), "mean");
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

use crate::model::{TimeRange, Value};
use crate::query::window::Interval;

/// A parsed SELECT statement ready for planning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    /// Expressions in the select list
    pub fields: Vec<Field>,
    /// Measurements or subqueries to read from
    pub sources: Vec<Source>,
    /// Non-time part of the WHERE clause
    #[serde(default)]
    pub condition: Option<Expr>,
    /// Time part of the WHERE clause (inclusive bounds)
    #[serde(default)]
    pub time_range: TimeRange,
    /// GROUP BY clause
    #[serde(default)]
    pub dimensions: Dimensions,
    /// Fill policy for empty GROUP BY time buckets
    #[serde(default)]
    pub fill: FillOption,
    /// Row order within each series
    #[serde(default)]
    pub order: SortOrder,
    /// Maximum rows per series (0 = no limit)
    #[serde(default)]
    pub limit: usize,
    /// Rows to skip per series
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of series (0 = no limit)
    #[serde(default)]
    pub slimit: usize,
    /// Series to skip
    #[serde(default)]
    pub soffset: usize,
    /// Fixed time zone offset in seconds east of UTC for bucket alignment
    #[serde(default)]
    pub tz_offset: Option<i32>,
}

impl SelectStatement {
    /// Start building a statement
    pub fn builder() -> StatementBuilder {
        StatementBuilder::default()
    }

    pub fn is_ascending(&self) -> bool {
        self.order == SortOrder::Ascending
    }

    /// All calls appearing in the select list, outermost first
    pub fn calls(&self) -> Vec<&Call> {
        let mut calls = Vec::new();
        for field in &self.fields {
            field.expr.collect_calls(&mut calls);
        }
        calls
    }
}

/// One entry of the select list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub expr: Expr,
    #[serde(default)]
    pub alias: Option<String>,
}

impl Field {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Default column name when no alias is given
    ///
    /// Calls are named after the function, variables after themselves, and
    /// binary expressions join the names of both sides with `_` (so
    /// `max(v) - min(v)` becomes `max_min`). Literals contribute nothing.
    pub fn name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        self.expr.default_name()
    }
}

/// Resolve the output column names of a select list
///
/// `time` is always the first column. Aliases are taken verbatim; generated
/// names that collide get a numeric suffix, so a second `sum` becomes
/// `sum_1`.
pub fn column_names(fields: &[Field]) -> Vec<String> {
    let mut names: HashMap<String, usize> = HashMap::new();
    names.insert("time".to_string(), 1);

    let mut columns: Vec<Option<String>> = vec![None; fields.len()];
    for (i, field) in fields.iter().enumerate() {
        if let Some(alias) = &field.alias {
            columns[i] = Some(alias.clone());
            names.insert(alias.clone(), 1);
        }
    }

    for (i, field) in fields.iter().enumerate() {
        if columns[i].is_some() {
            continue;
        }
        let mut name = field.expr.default_name();
        if let Some(&count) = names.get(&name) {
            let mut count = count;
            loop {
                let resolved = format!("{}_{}", name, count);
                if !names.contains_key(&resolved) {
                    names.insert(name.clone(), count + 1);
                    name = resolved;
                    break;
                }
                count += 1;
            }
        }
        *names.entry(name.clone()).or_insert(0) += 1;
        columns[i] = Some(name);
    }

    std::iter::once("time".to_string())
        .chain(columns.into_iter().flatten())
        .collect()
}

/// A FROM clause entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Measurement(Measurement),
    Subquery(Box<SelectStatement>),
}

/// A measurement reference, optionally qualified by database and policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
    pub name: MeasurementName,
}

/// Exact measurement name or a regex matching several measurements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementName {
    Exact(String),
    Regex(RegexLiteral),
}

impl Measurement {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            database: None,
            retention_policy: None,
            name: MeasurementName::Exact(name.into()),
        }
    }
}

/// GROUP BY clause
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Tag keys to group by
    #[serde(default)]
    pub tags: Vec<String>,
    /// `GROUP BY *`: group by every tag key of the matched series
    #[serde(default)]
    pub wildcard: bool,
    /// `GROUP BY time(interval, offset)`
    #[serde(default)]
    pub interval: Option<Interval>,
}

/// What empty GROUP BY time buckets emit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillOption {
    /// Null, or the function's own zero-point value (0 for count)
    #[default]
    Null,
    /// Drop empty buckets
    None,
    /// Repeat the previous non-empty bucket's value
    Previous,
    /// Interpolate between the surrounding non-empty buckets
    Linear,
    /// A literal value
    Value(Value),
}

/// Row order within a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Reference to a field or tag
    VarRef(String),
    /// Function call
    Call(Call),
    /// Binary operation
    Binary(Box<BinaryExpr>),
    /// Parenthesized expression
    Paren(Box<Expr>),
    Integer(i64),
    Number(f64),
    String(String),
    Boolean(bool),
    /// Duration literal in nanoseconds
    Duration(i64),
    Regex(RegexLiteral),
    /// `*`
    Wildcard,
}

impl Expr {
    pub fn var(name: impl Into<String>) -> Self {
        Expr::VarRef(name.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            name: name.into(),
            args,
        })
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(Box::new(BinaryExpr { op, lhs, rhs }))
    }

    pub fn paren(expr: Expr) -> Self {
        Expr::Paren(Box::new(expr))
    }

    /// Regex literal; fails on an invalid pattern
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        RegexLiteral::new(pattern).map(Expr::Regex)
    }

    fn default_name(&self) -> String {
        match self {
            Expr::VarRef(name) => name.clone(),
            Expr::Call(call) => call.name.clone(),
            Expr::Paren(inner) => inner.default_name(),
            Expr::Binary(b) => {
                let lhs = b.lhs.default_name();
                let rhs = b.rhs.default_name();
                if !lhs.is_empty() && !rhs.is_empty() {
                    format!("{}_{}", lhs, rhs)
                } else {
                    lhs + &rhs
                }
            }
            _ => String::new(),
        }
    }

    /// Collect calls (not descending into call arguments)
    pub fn collect_calls<'a>(&'a self, out: &mut Vec<&'a Call>) {
        match self {
            Expr::Call(call) => out.push(call),
            Expr::Binary(b) => {
                b.lhs.collect_calls(out);
                b.rhs.collect_calls(out);
            }
            Expr::Paren(inner) => inner.collect_calls(out),
            _ => {}
        }
    }

    /// Collect variable references outside of calls
    pub fn collect_vars<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::VarRef(name) => out.push(name),
            Expr::Binary(b) => {
                b.lhs.collect_vars(out);
                b.rhs.collect_vars(out);
            }
            Expr::Paren(inner) => inner.collect_vars(out),
            _ => {}
        }
    }

    pub fn contains_call(&self) -> bool {
        let mut calls = Vec::new();
        self.collect_calls(&mut calls);
        !calls.is_empty()
    }

    /// Literal value of this expression, if it is a literal
    pub fn literal(&self) -> Option<Value> {
        match self {
            Expr::Integer(v) | Expr::Duration(v) => Some(Value::Integer(*v)),
            Expr::Number(v) => Some(Value::Float(*v)),
            Expr::String(v) => Some(Value::String(v.clone())),
            Expr::Boolean(v) => Some(Value::Boolean(*v)),
            Expr::Paren(inner) => inner.literal(),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::VarRef(name) => write!(f, "{}", name),
            Expr::Call(call) => write!(f, "{}", call),
            Expr::Binary(b) => write!(f, "{} {} {}", b.lhs, b.op, b.rhs),
            Expr::Paren(inner) => write!(f, "({})", inner),
            Expr::Integer(v) => write!(f, "{}", v),
            Expr::Number(v) => write!(f, "{}", v),
            Expr::String(v) => write!(f, "'{}'", v),
            Expr::Boolean(v) => write!(f, "{}", v),
            Expr::Duration(v) => write!(f, "{}", crate::query::duration::format_duration(*v)),
            Expr::Regex(r) => write!(f, "/{}/", r.as_str()),
            Expr::Wildcard => write!(f, "*"),
        }
    }
}

/// A function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Expr>,
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// A binary operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Expr,
    pub rhs: Expr,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Equal to
    Eq,
    /// Not equal to
    Neq,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Matches regex
    EqRegex,
    /// Does not match regex
    NeqRegex,
    And,
    Or,
}

impl BinaryOp {
    /// Parse from its textual operator
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "+" => Some(Self::Add),
            "-" => Some(Self::Sub),
            "*" => Some(Self::Mul),
            "/" => Some(Self::Div),
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Neq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "=~" => Some(Self::EqRegex),
            "!~" => Some(Self::NeqRegex),
            s if s.eq_ignore_ascii_case("and") => Some(Self::And),
            s if s.eq_ignore_ascii_case("or") => Some(Self::Or),
            _ => None,
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, Self::Add | Self::Sub | Self::Mul | Self::Div)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::EqRegex => "=~",
            Self::NeqRegex => "!~",
            Self::And => "AND",
            Self::Or => "OR",
        };
        write!(f, "{}", s)
    }
}

/// A compiled regular expression that serializes as its pattern
#[derive(Debug, Clone)]
pub struct RegexLiteral(Regex);

impl RegexLiteral {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self)
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.0.is_match(s)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for RegexLiteral {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for RegexLiteral {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RegexLiteral {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pattern = String::deserialize(deserializer)?;
        RegexLiteral::new(&pattern).map_err(serde::de::Error::custom)
    }
}

/// Builder for constructing statements programmatically
#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    fields: Vec<Field>,
    sources: Vec<Source>,
    condition: Option<Expr>,
    time_range: TimeRange,
    dimensions: Dimensions,
    fill: FillOption,
    order: SortOrder,
    limit: usize,
    offset: usize,
    slimit: usize,
    soffset: usize,
    tz_offset: Option<i32>,
}

impl StatementBuilder {
    /// Add a select list expression
    pub fn field(mut self, expr: Expr) -> Self {
        self.fields.push(Field::new(expr));
        self
    }

    /// Add an aliased select list expression
    pub fn field_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.fields.push(Field::new(expr).with_alias(alias));
        self
    }

    /// Read from a measurement in the default database
    pub fn from(mut self, measurement: impl Into<String>) -> Self {
        self.sources
            .push(Source::Measurement(Measurement::named(measurement)));
        self
    }

    /// Read from a fully qualified measurement
    pub fn from_qualified(
        mut self,
        database: impl Into<String>,
        retention_policy: Option<&str>,
        measurement: impl Into<String>,
    ) -> Self {
        self.sources.push(Source::Measurement(Measurement {
            database: Some(database.into()),
            retention_policy: retention_policy.map(str::to_string),
            name: MeasurementName::Exact(measurement.into()),
        }));
        self
    }

    /// Read from every measurement matching a regex
    pub fn from_regex(mut self, regex: RegexLiteral) -> Self {
        self.sources.push(Source::Measurement(Measurement {
            database: None,
            retention_policy: None,
            name: MeasurementName::Regex(regex),
        }));
        self
    }

    /// Read from the output of another statement
    pub fn from_subquery(mut self, statement: SelectStatement) -> Self {
        self.sources.push(Source::Subquery(Box::new(statement)));
        self
    }

    /// Set the non-time WHERE condition
    pub fn filter(mut self, condition: Expr) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Restrict to `min <= time <= max`
    pub fn time_range(mut self, min: i64, max: i64) -> Self {
        self.time_range = TimeRange::new(min, max);
        self
    }

    /// Restrict to `time >= min`
    pub fn since(mut self, min: i64) -> Self {
        self.time_range.min = min;
        self
    }

    /// Restrict to `time <= max`
    pub fn until(mut self, max: i64) -> Self {
        self.time_range.max = max;
        self
    }

    /// GROUP BY a tag key
    pub fn group_by(mut self, tag: impl Into<String>) -> Self {
        self.dimensions.tags.push(tag.into());
        self
    }

    /// GROUP BY *
    pub fn group_by_all(mut self) -> Self {
        self.dimensions.wildcard = true;
        self
    }

    /// GROUP BY time(interval)
    pub fn group_by_time(mut self, interval: i64) -> Self {
        self.dimensions.interval = Some(Interval::new(interval, 0));
        self
    }

    /// GROUP BY time(interval, offset)
    pub fn group_by_time_offset(mut self, interval: i64, offset: i64) -> Self {
        self.dimensions.interval = Some(Interval::new(interval, offset));
        self
    }

    pub fn fill(mut self, fill: FillOption) -> Self {
        self.fill = fill;
        self
    }

    /// ORDER BY time DESC
    pub fn order_desc(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = n;
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    pub fn slimit(mut self, n: usize) -> Self {
        self.slimit = n;
        self
    }

    pub fn soffset(mut self, n: usize) -> Self {
        self.soffset = n;
        self
    }

    /// Align buckets to a fixed UTC offset (seconds east)
    pub fn tz(mut self, offset_secs: i32) -> Self {
        self.tz_offset = Some(offset_secs);
        self
    }

    pub fn build(self) -> SelectStatement {
        SelectStatement {
            fields: self.fields,
            sources: self.sources,
            condition: self.condition,
            time_range: self.time_range,
            dimensions: self.dimensions,
            fill: self.fill,
            order: self.order,
            limit: self.limit,
            offset: self.offset,
            slimit: self.slimit,
            soffset: self.soffset,
            tz_offset: self.tz_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::duration::SECOND;

    fn call(name: &str, field: &str) -> Expr {
        Expr::call(name, vec![Expr::var(field)])
    }

    #[test]
    fn test_builder_basic() {
        let stmt = SelectStatement::builder()
            .field(call("count", "value"))
            .from("cpu")
            .time_range(0, 10 * SECOND)
            .group_by("host")
            .group_by_time(2 * SECOND)
            .limit(5)
            .build();

        assert_eq!(stmt.fields.len(), 1);
        assert_eq!(stmt.sources, vec![Source::Measurement(Measurement::named("cpu"))]);
        assert_eq!(stmt.dimensions.tags, vec!["host"]);
        assert_eq!(stmt.dimensions.interval, Some(Interval::new(2 * SECOND, 0)));
        assert_eq!(stmt.limit, 5);
        assert!(stmt.is_ascending());
    }

    #[test]
    fn test_binary_field_name() {
        let field = Field::new(Expr::binary(
            BinaryOp::Sub,
            call("max", "value"),
            call("min", "value"),
        ));
        assert_eq!(field.name(), "max_min");

        let field = Field::new(Expr::binary(
            BinaryOp::Mul,
            call("mean", "value"),
            Expr::Integer(2),
        ));
        assert_eq!(field.name(), "mean");

        let field = Field::new(Expr::paren(call("sum", "value"))).with_alias("total");
        assert_eq!(field.name(), "total");
    }

    #[test]
    fn test_column_names_deduplicate() {
        let fields = vec![
            Field::new(call("sum", "value")),
            Field::new(call("sum", "other")),
            Field::new(call("mean", "value")).with_alias("sum_1"),
        ];
        assert_eq!(column_names(&fields), vec!["time", "sum", "sum_2", "sum_1"]);

        let fields = vec![Field::new(call("sum", "a")), Field::new(call("sum", "b"))];
        assert_eq!(column_names(&fields), vec!["time", "sum", "sum_1"]);
    }

    #[test]
    fn test_collect_calls_and_vars() {
        let expr = Expr::binary(
            BinaryOp::Add,
            call("max", "value"),
            Expr::paren(Expr::binary(BinaryOp::Mul, Expr::var("host"), Expr::Integer(2))),
        );
        let mut calls = Vec::new();
        expr.collect_calls(&mut calls);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "max");

        let mut vars = Vec::new();
        expr.collect_vars(&mut vars);
        assert_eq!(vars, vec!["host"]);
    }

    #[test]
    fn test_operator_from_str() {
        assert_eq!(BinaryOp::from_str(">="), Some(BinaryOp::Gte));
        assert_eq!(BinaryOp::from_str("<>"), Some(BinaryOp::Neq));
        assert_eq!(BinaryOp::from_str("=~"), Some(BinaryOp::EqRegex));
        assert_eq!(BinaryOp::from_str("and"), Some(BinaryOp::And));
        assert_eq!(BinaryOp::from_str("%"), None);
    }

    #[test]
    fn test_statement_json_round_trip() {
        let stmt = SelectStatement::builder()
            .field(call("mean", "value"))
            .from("cpu")
            .filter(Expr::binary(
                BinaryOp::EqRegex,
                Expr::var("host"),
                Expr::regex("^server").unwrap(),
            ))
            .fill(FillOption::Previous)
            .order_desc()
            .build();

        let json = serde_json::to_string(&stmt).unwrap();
        let restored: SelectStatement = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, stmt);
    }

    #[test]
    fn test_display() {
        let expr = Expr::binary(
            BinaryOp::Div,
            Expr::call("derivative", vec![call("mean", "value"), Expr::Duration(SECOND)]),
            Expr::Number(2.5),
        );
        assert_eq!(expr.to_string(), "derivative(mean(value), 1s) / 2.5");
    }
}
