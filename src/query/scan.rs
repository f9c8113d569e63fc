//! Leaf shard scans
//!
//! Every shard iterator is wrapped in a [`ScanGuard`], which checks for
//! cancellation and counts raw points against `max-select-point`. A
//! [`ScanScheduler`] then decides whether the scan runs inline or on a
//! blocking worker that streams point batches through a bounded channel.
//! Workers are capped per query; scans beyond the cap run inline.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::model::{DataType, Point};
use crate::query::context::QueryContext;
use crate::query::error::QueryResult;
use crate::query::iterator::{BoxedIterator, PointIterator};

/// Cancellation and point accounting at a leaf
pub struct ScanGuard {
    input: BoxedIterator,
}

impl ScanGuard {
    pub fn new(input: BoxedIterator) -> Self {
        Self { input }
    }
}

impl PointIterator for ScanGuard {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        ctx.check()?;
        match self.input.next_point(ctx)? {
            Some(point) => {
                ctx.record_points(1)?;
                Ok(Some(point))
            }
            None => Ok(None),
        }
    }

    fn data_type(&self) -> DataType {
        self.input.data_type()
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Hands leaf scans to blocking workers, up to a per-query limit
#[derive(Clone)]
pub struct ScanScheduler {
    handle: Option<Handle>,
    permits: Arc<Semaphore>,
    buffer: usize,
    batch_size: usize,
}

impl ScanScheduler {
    /// Run every scan on the calling thread
    pub fn inline() -> Self {
        Self {
            handle: None,
            permits: Arc::new(Semaphore::new(0)),
            buffer: 1,
            batch_size: 1,
        }
    }

    /// Offload up to `max_workers` scans onto `handle`'s blocking pool
    ///
    /// The resulting iterators block on their channel, so the plan must be
    /// driven from a blocking thread, never from an async task.
    pub fn new(handle: Handle, max_workers: usize, buffer: usize, batch_size: usize) -> Self {
        Self {
            handle: Some(handle),
            permits: Arc::new(Semaphore::new(max_workers)),
            buffer: buffer.max(1),
            batch_size: batch_size.max(1),
        }
    }

    /// Wrap a shard iterator, spawning a worker when one is free
    pub fn schedule(&self, input: BoxedIterator, ctx: &QueryContext) -> BoxedIterator {
        let input: BoxedIterator = Box::new(ScanGuard::new(input));
        let Some(handle) = &self.handle else {
            return input;
        };
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Box::new(ParallelScan::spawn(
                handle,
                permit,
                input,
                ctx.clone(),
                self.buffer,
                self.batch_size,
            )),
            Err(_) => input,
        }
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::inline()
    }
}

type Batch = QueryResult<Vec<Point>>;

/// Consumer side of a scan running on a blocking worker
pub struct ParallelScan {
    rx: mpsc::Receiver<Batch>,
    batch: VecDeque<Point>,
    data_type: DataType,
    done: bool,
}

impl ParallelScan {
    fn spawn(
        handle: &Handle,
        permit: OwnedSemaphorePermit,
        input: BoxedIterator,
        ctx: QueryContext,
        buffer: usize,
        batch_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer);
        let data_type = input.data_type();
        handle.spawn_blocking(move || {
            let _permit = permit;
            scan_worker(input, ctx, tx, batch_size);
        });
        Self {
            rx,
            batch: VecDeque::new(),
            data_type,
            done: false,
        }
    }
}

/// Drain `input` into the channel until exhausted, failed or abandoned
fn scan_worker(mut input: BoxedIterator, ctx: QueryContext, tx: mpsc::Sender<Batch>, batch_size: usize) {
    let mut sent = 0usize;
    loop {
        let mut batch = Vec::with_capacity(batch_size);
        let outcome = loop {
            if batch.len() >= batch_size {
                break Ok(false);
            }
            match input.next_point(&ctx) {
                Ok(Some(point)) => batch.push(point),
                Ok(None) => break Ok(true),
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(exhausted) => {
                sent += batch.len();
                if !batch.is_empty() && tx.blocking_send(Ok(batch)).is_err() {
                    break;
                }
                if exhausted {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
    trace!(points = sent, "scan worker finished");
    input.close();
}

impl PointIterator for ParallelScan {
    fn next_point(&mut self, ctx: &QueryContext) -> QueryResult<Option<Point>> {
        ctx.check()?;
        loop {
            if let Some(point) = self.batch.pop_front() {
                return Ok(Some(point));
            }
            if self.done {
                return Ok(None);
            }
            match self.rx.blocking_recv() {
                Some(Ok(batch)) => self.batch = batch.into(),
                Some(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                None => self.done = true,
            }
        }
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn close(&mut self) {
        self.done = true;
        self.batch.clear();
        self.rx.close();
    }
}
