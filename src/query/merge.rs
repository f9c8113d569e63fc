//! Multi-stream merge stages
//!
//! [`SortedMergeIterator`] interleaves several time-ordered streams into one
//! (shards of a series, or the series of a group). [`FieldAlignIterator`]
//! zips the per-field streams of one series into rows, one auxiliary slot
//! per field.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::model::{DataType, Point, Tags, Value};
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::query::iterator::{BoxedIterator, Peekable, PointIterator};

struct HeapItem {
    point: Point,
    input: usize,
    ascending: bool,
    latest_first: bool,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest item
        let by_time = self.point.time.cmp(&other.point.time);
        let by_time = if self.ascending {
            by_time.reverse()
        } else {
            by_time
        };
        let by_seq = self.point.seq.cmp(&other.point.seq);
        let by_seq = if self.latest_first {
            by_seq
        } else {
            by_seq.reverse()
        };
        by_time.then(by_seq).then(other.input.cmp(&self.input))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

/// K-way merge of time-ordered streams
///
/// Points sharing a timestamp come out in write order. With
/// [`dedupe`](Self::dedupe) only the most recent write at each timestamp
/// survives, which is how overlapping shards of one series collapse into a
/// single stream.
pub struct SortedMergeIterator {
    inputs: Vec<BoxedIterator>,
    heap: BinaryHeap<HeapItem>,
    ascending: bool,
    dedupe: bool,
    data_type: DataType,
    primed: bool,
    last_time: Option<i64>,
}

impl SortedMergeIterator {
    pub fn new(inputs: Vec<BoxedIterator>, ascending: bool) -> Self {
        let data_type = inputs
            .iter()
            .map(|i| i.data_type())
            .fold(DataType::Unknown, DataType::widen);
        Self {
            heap: BinaryHeap::with_capacity(inputs.len()),
            inputs,
            ascending,
            dedupe: false,
            data_type,
            primed: false,
            last_time: None,
        }
    }

    /// Builder method: keep only the latest write per timestamp
    pub fn dedupe(mut self) -> Self {
        self.dedupe = true;
        self
    }

    fn refill(&mut self, input: usize, ctx: &QueryContext) -> QueryResult<()> {
        if let Some(point) = self.inputs[input].next_point(ctx)? {
            self.heap.push(HeapItem {
                point,
                input,
                ascending: self.ascending,
                latest_first: self.dedupe,
            });
        }
        Ok(())
    }
}

impl PointIterator for SortedMergeIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        ctx.check()?;
        if !self.primed {
            for input in 0..self.inputs.len() {
                self.refill(input, ctx)?;
            }
            self.primed = true;
        }

        while let Some(item) = self.heap.pop() {
            self.refill(item.input, ctx)?;
            if self.dedupe {
                if self.last_time == Some(item.point.time) {
                    continue;
                }
                self.last_time = Some(item.point.time);
            }
            return Ok(Some(item.point));
        }
        Ok(None)
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn close(&mut self) {
        self.heap.clear();
        for input in &mut self.inputs {
            input.close();
        }
    }
}

/// Zips the field streams of one series into rows
///
/// Each output point has a null value and one auxiliary slot per input
/// field; fields without a point at that timestamp are null.
pub struct FieldAlignIterator {
    inputs: Vec<Peekable<BoxedIterator>>,
    name: Arc<str>,
    tags: Tags,
    ascending: bool,
}

impl FieldAlignIterator {
    pub fn new(inputs: Vec<BoxedIterator>, name: Arc<str>, tags: Tags, ascending: bool) -> Self {
        Self {
            inputs: inputs.into_iter().map(Peekable::new).collect(),
            name,
            tags,
            ascending,
        }
    }
}

impl PointIterator for FieldAlignIterator {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        ctx.check()?;
        let mut target: Option<i64> = None;
        for input in &mut self.inputs {
            if let Some(t) = input.peek_time(ctx)? {
                target = Some(match target {
                    None => t,
                    Some(cur) if self.ascending => cur.min(t),
                    Some(cur) => cur.max(t),
                });
            }
        }
        let Some(time) = target else {
            return Ok(None);
        };

        let mut aux = Vec::with_capacity(self.inputs.len());
        let mut seq = 0;
        for input in &mut self.inputs {
            if input.peek_time(ctx)? != Some(time) {
                aux.push(Value::Null);
                continue;
            }
            match input.next_point(ctx)? {
                Some(point) => {
                    seq = seq.max(point.seq);
                    aux.push(point.value);
                }
                None => aux.push(Value::Null),
            }
        }

        Ok(Some(Point {
            name: self.name.clone(),
            tags: self.tags.clone(),
            time,
            value: Value::Null,
            aux,
            seq,
        }))
    }

    fn data_type(&self) -> DataType {
        DataType::Unknown
    }

    fn close(&mut self) {
        for input in &mut self.inputs {
            input.close();
        }
    }
}
