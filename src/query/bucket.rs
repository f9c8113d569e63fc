//! Bucket reduction
//!
//! Pulls a time-ordered stream, cuts it at bucket boundaries and feeds each
//! bucket to a fresh reducer state. Only buckets that received points are
//! emitted; empty buckets are the fill stage's business.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::model::{DataType, Point, Tags};
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::query::functions::Reducer;
use crate::query::iterator::{BoxedIterator, Peekable, PointIterator};
use crate::query::window::Window;

pub struct ReduceIterator {
    input: Peekable<BoxedIterator>,
    reducer: Box<dyn Reducer>,
    window: Window,
    /// Stamp rows with the selected point's time instead of the bucket
    keep_time: bool,
    ascending: bool,
    name: Arc<str>,
    tags: Tags,
    output_type: DataType,
    ready: VecDeque<Point>,
}

impl ReduceIterator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: BoxedIterator,
        reducer: Box<dyn Reducer>,
        window: Window,
        keep_time: bool,
        ascending: bool,
        name: Arc<str>,
        tags: Tags,
        output_type: DataType,
    ) -> Self {
        Self {
            input: Peekable::new(input),
            reducer,
            window,
            keep_time,
            ascending,
            name,
            tags,
            output_type,
            ready: VecDeque::new(),
        }
    }

    fn reduce_bucket(&mut self, first: Point, ctx: &QueryContext) -> QueryResult<()> {
        let bucket = self.window.bucket_start(first.time);
        self.reducer.aggregate(&first);
        while let Some(t) = self.input.peek_time(ctx)? {
            if self.window.bucket_start(t) != bucket {
                break;
            }
            if let Some(point) = self.input.next_point(ctx)? {
                self.reducer.aggregate(&point);
            }
        }

        let mut rows: Vec<Point> = self
            .reducer
            .emit()
            .into_iter()
            .map(|r| Point {
                name: self.name.clone(),
                tags: self.tags.clone(),
                time: match r.time {
                    Some(t) if self.keep_time => t,
                    _ => bucket,
                },
                value: r.value,
                aux: r.aux,
                seq: 0,
            })
            .collect();
        if self.keep_time && !self.ascending {
            rows.reverse();
        }
        self.ready.extend(rows);
        Ok(())
    }
}

impl PointIterator for ReduceIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        loop {
            if let Some(point) = self.ready.pop_front() {
                return Ok(Some(point));
            }
            let Some(first) = self.input.next_point(ctx)? else {
                return Ok(None);
            };
            self.reduce_bucket(first, ctx)?;
        }
    }

    fn data_type(&self) -> DataType {
        self.output_type
    }

    fn close(&mut self) {
        self.ready.clear();
        self.input.close();
    }
}
