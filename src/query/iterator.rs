//! Pull-based point iterators
//!
//! Every stage of a query is a [`PointIterator`]: it pulls points from the
//! iterators it owns and produces points for its consumer. Iterators are
//! forward-only and not restartable; once `next_point` returns `Ok(None)`
//! it keeps returning `Ok(None)`.

use std::collections::VecDeque;

use crate::model::{DataType, Point};
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;

/// A lazy, ordered stream of points
pub trait PointIterator: Send {
    /// Pull the next point, `Ok(None)` once exhausted
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>>;

    /// Type of the values this iterator produces
    fn data_type(&self) -> DataType;

    /// Release upstream resources early
    fn close(&mut self) {}
}

/// An owned, type-erased iterator
pub type BoxedIterator = Box<dyn PointIterator>;

impl PointIterator for BoxedIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        (**self).next_point(ctx)
    }

    fn data_type(&self) -> DataType {
        (**self).data_type()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Iterator over points already held in memory
#[derive(Debug, Default)]
pub struct BufferedIterator {
    points: VecDeque<Point>,
    data_type: DataType,
}

impl BufferedIterator {
    pub fn new(points: impl Into<VecDeque<Point>>, data_type: DataType) -> Self {
        Self {
            points: points.into(),
            data_type,
        }
    }

    /// An iterator that yields nothing
    pub fn empty(data_type: DataType) -> Self {
        Self::new(VecDeque::new(), data_type)
    }

    pub fn boxed(self) -> BoxedIterator {
        Box::new(self)
    }
}

impl PointIterator for BufferedIterator {
    fn next_point(&mut self, _ctx: &QueryContext) -> QueryResult<Option<Point>> {
        Ok(self.points.pop_front())
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn close(&mut self) {
        self.points.clear();
    }
}

/// Wraps an iterator with one point of lookahead
pub struct Peekable<I> {
    inner: I,
    peeked: Option<Point>,
    done: bool,
}

impl<I: PointIterator> Peekable<I> {
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            peeked: None,
            done: false,
        }
    }

    /// Look at the next point without consuming it
    pub fn peek(&mut self, ctx: &QueryContext) -> QueryResult<Option<&Point>> {
        if self.peeked.is_none() && !self.done {
            self.peeked = self.inner.next_point(ctx)?;
            self.done = self.peeked.is_none();
        }
        Ok(self.peeked.as_ref())
    }

    /// Timestamp of the next point, if any
    pub fn peek_time(&mut self, ctx: &QueryContext) -> QueryResult<Option<i64>> {
        Ok(self.peek(ctx)?.map(|p| p.time))
    }
}

impl<I: PointIterator> PointIterator for Peekable<I> {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        if let Some(point) = self.peeked.take() {
            return Ok(Some(point));
        }
        if self.done {
            return Ok(None);
        }
        let point = self.inner.next_point(ctx)?;
        self.done = point.is_none();
        Ok(point)
    }

    fn data_type(&self) -> DataType {
        self.inner.data_type()
    }

    fn close(&mut self) {
        self.peeked = None;
        self.done = true;
        self.inner.close();
    }
}

/// Pull every remaining point into a vector
pub fn drain<I: PointIterator + ?Sized>(iter: &mut I, ctx: &QueryContext) -> QueryResult<Vec<Point>> {
    let mut points = Vec::new();
    while let Some(point) = iter.next_point(ctx)? {
        points.push(point);
    }
    Ok(points)
}
