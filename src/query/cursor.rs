//! Row assembly for one output group
//!
//! A [`GroupCursor`] turns the iterator trees of a group into result rows.
//! Raw statements evaluate the select list against each aligned row.
//! Statements with calls zip the call streams by timestamp: at every step
//! the earliest pending time (latest, for descending order) is taken and at
//! most one point is consumed from each call stream at that time, so calls
//! that emit several rows per bucket (`distinct`, `top`) line up row by row.

use std::sync::Arc;

use crate::model::{Point, Tags, Value};
use crate::query::ast::{Call, Expr};
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::query::eval::{eval, Valuer};
use crate::query::iterator::{BoxedIterator, Peekable, PointIterator};
use crate::query::result::Series;
use crate::query::row::RowValuer;

enum Mode {
    Raw {
        input: BoxedIterator,
        columns: Arc<[String]>,
        /// Select-list entries that read a stored column
        reads_column: Vec<bool>,
    },
    Calls {
        inputs: Vec<Peekable<BoxedIterator>>,
        calls: Arc<[Call]>,
        aux_names: Arc<[String]>,
        ascending: bool,
    },
}

/// Produces the rows of one output group, honouring LIMIT and OFFSET
pub struct GroupCursor {
    name: Arc<str>,
    tags: Tags,
    mode: Mode,
    fields: Arc<[Expr]>,
    limit: usize,
    offset: usize,
    skipped: usize,
    emitted: usize,
    done: bool,
}

impl GroupCursor {
    pub fn raw(
        name: Arc<str>,
        tags: Tags,
        input: BoxedIterator,
        columns: Arc<[String]>,
        fields: Arc<[Expr]>,
        (limit, offset): (usize, usize),
    ) -> Self {
        let reads_column = fields
            .iter()
            .map(|f| {
                let mut vars = Vec::new();
                f.collect_vars(&mut vars);
                vars.iter().any(|v| columns.iter().any(|c| c == *v))
            })
            .collect();
        Self::with_mode(
            name,
            tags,
            Mode::Raw {
                input,
                columns,
                reads_column,
            },
            fields,
            (limit, offset),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn calls(
        name: Arc<str>,
        tags: Tags,
        inputs: Vec<BoxedIterator>,
        calls: Arc<[Call]>,
        aux_names: Arc<[String]>,
        fields: Arc<[Expr]>,
        ascending: bool,
        (limit, offset): (usize, usize),
    ) -> Self {
        Self::with_mode(
            name,
            tags,
            Mode::Calls {
                inputs: inputs.into_iter().map(Peekable::new).collect(),
                calls,
                aux_names,
                ascending,
            },
            fields,
            (limit, offset),
        )
    }

    fn with_mode(
        name: Arc<str>,
        tags: Tags,
        mode: Mode,
        fields: Arc<[Expr]>,
        (limit, offset): (usize, usize),
    ) -> Self {
        Self {
            name,
            tags,
            mode,
            fields,
            limit,
            offset,
            skipped: 0,
            emitted: 0,
            done: false,
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Next row after OFFSET, until LIMIT rows were produced
    pub fn next_row(&mut self, ctx: &QueryContext) -> QueryResult<Option<(i64, Vec<Value>)>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let Some(row) = self.read_row(ctx)? else {
                self.close();
                return Ok(None);
            };
            if self.skipped < self.offset {
                self.skipped += 1;
                continue;
            }
            self.emitted += 1;
            if self.limit > 0 && self.emitted >= self.limit {
                self.close();
            }
            return Ok(Some(row));
        }
    }

    fn read_row(&mut self, ctx: &QueryContext) -> QueryResult<Option<(i64, Vec<Value>)>> {
        ctx.check()?;
        match &mut self.mode {
            Mode::Raw {
                input,
                columns,
                reads_column,
            } => {
                while let Some(point) = input.next_point(ctx)? {
                    let valuer = RowValuer {
                        columns: &columns[..],
                        point: &point,
                    };
                    let values: Vec<Value> = self.fields.iter().map(|f| eval(f, &valuer)).collect();
                    let empty = values
                        .iter()
                        .zip(reads_column.iter())
                        .filter(|(_, reads)| **reads)
                        .all(|(v, _)| v.is_null());
                    if !empty {
                        return Ok(Some((point.time, values)));
                    }
                }
                Ok(None)
            }
            Mode::Calls {
                inputs,
                calls,
                aux_names,
                ascending,
            } => {
                let mut target: Option<i64> = None;
                for input in inputs.iter_mut() {
                    if let Some(t) = input.peek_time(ctx)? {
                        target = Some(match target {
                            Some(cur) if *ascending => cur.min(t),
                            Some(cur) => cur.max(t),
                            None => t,
                        });
                    }
                }
                let Some(time) = target else {
                    return Ok(None);
                };

                let mut points: Vec<Option<Point>> = Vec::with_capacity(inputs.len());
                for input in inputs.iter_mut() {
                    let point = if input.peek_time(ctx)? == Some(time) {
                        input.next_point(ctx)?
                    } else {
                        None
                    };
                    points.push(point);
                }

                let valuer = CallValuer {
                    calls: &calls[..],
                    points: &points,
                    aux_names: &aux_names[..],
                    tags: &self.tags,
                };
                let values = self.fields.iter().map(|f| eval(f, &valuer)).collect();
                Ok(Some((time, values)))
            }
        }
    }

    /// Drain into series chunks of at most `chunk_size` rows
    ///
    /// A group that produces no rows yields no series.
    pub fn collect_series(
        &mut self,
        columns: &[String],
        chunk_size: usize,
        ctx: &QueryContext,
    ) -> QueryResult<Vec<Series>> {
        let mut series = Series::new(self.name.as_ref(), &self.tags, columns.to_vec());
        while let Some((time, values)) = self.next_row(ctx)? {
            let mut row = Vec::with_capacity(values.len() + 1);
            row.push(Value::Integer(time));
            row.extend(values);
            series.values.push(row);
        }
        if series.values.is_empty() {
            return Ok(Vec::new());
        }
        Ok(series.chunked(chunk_size))
    }

    /// Release the iterator trees; further calls to `next_row` return nothing
    pub fn close(&mut self) {
        self.done = true;
        match &mut self.mode {
            Mode::Raw { input, .. } => input.close(),
            Mode::Calls { inputs, .. } => inputs.iter_mut().for_each(|i| i.close()),
        }
    }
}

/// Resolves call results and auxiliary references for one zipped row
struct CallValuer<'a> {
    calls: &'a [Call],
    points: &'a [Option<Point>],
    aux_names: &'a [String],
    tags: &'a Tags,
}

impl Valuer for CallValuer<'_> {
    fn value(&self, name: &str) -> Option<Value> {
        if let Some(i) = self.aux_names.iter().position(|a| a == name) {
            if let Some(Some(point)) = self.points.first() {
                return point.aux.get(i).cloned();
            }
        }
        self.tags.get(name).map(Value::from)
    }

    fn call(&self, call: &Call) -> Option<Value> {
        let i = self.calls.iter().position(|c| c == call)?;
        self.points.get(i)?.as_ref().map(|p| p.value.clone())
    }
}
