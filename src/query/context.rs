//! Per-query execution context
//!
//! Carries the cancellation token, the optional deadline and the admission
//! limits of one statement execution. Every leaf and merge stage calls
//! [`QueryContext::check`] from `next_point`, so cancellation is cooperative
//! and takes effect at the next pulled point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::query::error::{LimitViolation, QueryError, QueryResult};

/// Admission-control limits for one execution (0 means unlimited)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryLimits {
    /// Maximum number of series a statement may fan out to
    pub max_select_series: usize,
    /// Maximum number of GROUP BY time buckets per statement
    pub max_select_buckets: usize,
    /// Maximum number of raw points read at the leaves
    pub max_select_point: usize,
}

/// Execution context threaded through every `next_point` call
#[derive(Debug, Clone)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<Instant>,
    limits: QueryLimits,
    points_read: Arc<AtomicUsize>,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(CancellationToken::new(), QueryLimits::default())
    }
}

impl QueryContext {
    pub fn new(token: CancellationToken, limits: QueryLimits) -> Self {
        Self {
            token,
            deadline: None,
            limits,
            points_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Builder method: fail with a timeout once `timeout` has elapsed
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.deadline = Some(Instant::now() + timeout);
        }
        self
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fail if the query was cancelled or ran past its deadline
    #[inline]
    pub fn check(&self) -> QueryResult<()> {
        if self.token.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::Timeout);
            }
        }
        Ok(())
    }

    /// Account for `n` raw points read at a leaf
    pub fn record_points(&self, n: usize) -> QueryResult<()> {
        let total = self.points_read.fetch_add(n, Ordering::Relaxed) + n;
        let limit = self.limits.max_select_point;
        if limit > 0 && total > limit {
            return Err(QueryError::LimitExceeded(LimitViolation::MaxSelectPoint {
                actual: total,
                limit,
            }));
        }
        Ok(())
    }

    /// Number of raw points read so far
    pub fn points_read(&self) -> usize {
        self.points_read.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_cancellation() {
        let ctx = QueryContext::default();
        assert!(ctx.check().is_ok());

        ctx.cancel();
        assert_eq!(ctx.check(), Err(QueryError::Cancelled));
    }

    #[test]
    fn test_context_clone_shares_token() {
        let ctx = QueryContext::default();
        let child = ctx.clone();
        ctx.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_context_timeout() {
        let ctx = QueryContext::default().with_timeout(Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(ctx.check(), Err(QueryError::Timeout));
    }

    #[test]
    fn test_point_limit() {
        let limits = QueryLimits {
            max_select_point: 3,
            ..Default::default()
        };
        let ctx = QueryContext::new(CancellationToken::new(), limits);
        assert!(ctx.record_points(2).is_ok());
        let err = ctx.record_points(2).unwrap_err();
        assert_eq!(err.to_string(), "max-select-point limit exceeded: (4/3)");
    }
}
