//! Row-level stages over aligned series rows
//!
//! Leaves produce one row per timestamp with an auxiliary slot per
//! requested column. [`FilterIterator`] applies the WHERE condition to those
//! rows and [`ProjectIterator`] turns them into the single-valued stream a
//! function call consumes.

use std::sync::Arc;

use crate::model::{DataType, Point, Value};
use crate::query::ast::Expr;
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::query::eval::{eval_condition, Valuer};
use crate::query::iterator::{BoxedIterator, PointIterator};

/// Resolves names against one aligned row: columns first, then tags
pub struct RowValuer<'a> {
    pub columns: &'a [String],
    pub point: &'a Point,
}

impl Valuer for RowValuer<'_> {
    fn value(&self, name: &str) -> Option<Value> {
        if let Some(i) = self.columns.iter().position(|c| c == name) {
            return self.point.aux.get(i).cloned();
        }
        self.point.tags.get(name).map(Value::from)
    }
}

/// Drops rows that do not satisfy a condition
pub struct FilterIterator {
    input: BoxedIterator,
    condition: Expr,
    columns: Arc<[String]>,
}

impl FilterIterator {
    pub fn new(input: BoxedIterator, condition: Expr, columns: Arc<[String]>) -> Self {
        Self {
            input,
            condition,
            columns,
        }
    }
}

impl PointIterator for FilterIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        while let Some(point) = self.input.next_point(ctx)? {
            let valuer = RowValuer {
                columns: &self.columns,
                point: &point,
            };
            if eval_condition(&self.condition, &valuer) {
                return Ok(Some(point));
            }
        }
        Ok(None)
    }

    fn data_type(&self) -> DataType {
        self.input.data_type()
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// An auxiliary value carried alongside a call's input
#[derive(Debug, Clone, PartialEq)]
pub enum AuxRef {
    /// Slot of the aligned row
    Column(usize),
    /// Tag of the point's series
    Tag(String),
}

/// Selects one column of each row as the point value
///
/// Rows where that column is null are skipped; the requested auxiliary
/// values ride along so selectors can report them.
pub struct ProjectIterator {
    input: BoxedIterator,
    column: usize,
    aux: Vec<AuxRef>,
    data_type: DataType,
}

impl ProjectIterator {
    pub fn new(input: BoxedIterator, column: usize, aux: Vec<AuxRef>, data_type: DataType) -> Self {
        Self {
            input,
            column,
            aux,
            data_type,
        }
    }
}

impl PointIterator for ProjectIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        while let Some(point) = self.input.next_point(ctx)? {
            let value = point.aux.get(self.column).cloned().unwrap_or_default();
            if value.is_null() {
                continue;
            }
            let aux = self
                .aux
                .iter()
                .map(|r| match r {
                    AuxRef::Column(i) => point.aux.get(*i).cloned().unwrap_or_default(),
                    AuxRef::Tag(key) => point.tags.get(key).map(Value::from).unwrap_or_default(),
                })
                .collect();
            return Ok(Some(Point {
                value,
                aux,
                ..point
            }));
        }
        Ok(None)
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn close(&mut self) {
        self.input.close();
    }
}
