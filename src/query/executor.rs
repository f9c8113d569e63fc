//! Statement execution
//!
//! [`QueryEngine`] runs planned statements against a [`SchemaCatalog`].
//! Iterator trees are pull-based and synchronous, so each statement runs on
//! a `spawn_blocking` thread; leaf shard scans may fan out further onto
//! blocking workers through the [`ScanScheduler`].
//!
//! # Execution Pipeline
//!
//! ```text
//! Statement → Plan → (per group) open iterator tree → cursor → Series chunks
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::QueryConfig;
use crate::query::ast::SelectStatement;
use crate::query::context::QueryContext;
use crate::query::error::{QueryError, QueryResult};
use crate::query::planner::Planner;
use crate::query::result::{Series, StatementResult};
use crate::query::scan::ScanScheduler;
use crate::storage::SchemaCatalog;

/// Executes statements against a catalog with configured limits
#[derive(Clone)]
pub struct QueryEngine {
    catalog: Arc<dyn SchemaCatalog>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, config: QueryConfig) -> Self {
        Self { catalog, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Execute one statement
    pub async fn execute(&self, database: &str, stmt: &SelectStatement) -> QueryResult<Vec<Series>> {
        self.execute_with_cancellation(database, stmt, CancellationToken::new())
            .await
    }

    /// Execute one statement, aborting when `token` is cancelled
    pub async fn execute_with_cancellation(
        &self,
        database: &str,
        stmt: &SelectStatement,
        token: CancellationToken,
    ) -> QueryResult<Vec<Series>> {
        self.spawn(database, stmt, 0, token).await
    }

    /// Execute statements in order; a failing statement does not stop the rest
    pub async fn execute_batch(
        &self,
        database: &str,
        statements: &[SelectStatement],
    ) -> Vec<StatementResult> {
        let mut results = Vec::with_capacity(statements.len());
        for (id, stmt) in statements.iter().enumerate() {
            let result = match self.spawn(database, stmt, id, CancellationToken::new()).await {
                Ok(series) => StatementResult::ok(id, series),
                Err(e) => StatementResult::failed(id, &e),
            };
            results.push(result);
        }
        results
    }

    /// Stream series chunks as groups complete
    ///
    /// Must be called from within a tokio runtime. The channel closes after
    /// the last chunk or the first error.
    pub fn stream(
        &self,
        database: &str,
        stmt: &SelectStatement,
        token: CancellationToken,
    ) -> mpsc::Receiver<QueryResult<Series>> {
        let (tx, rx) = mpsc::channel(self.config.scan_buffer.max(1));
        let ctx = match self.context(token) {
            Ok(ctx) => ctx,
            Err(e) => {
                let _ = tx.try_send(Err(e));
                return rx;
            }
        };
        let planner = self.planner(database, Some(Handle::current()));
        let stmt = stmt.clone();
        let chunk_size = self.config.chunk_size;
        let span = tracing::info_span!("query", query_id = %Uuid::new_v4(), statement_id = 0);

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            let plan = match planner.plan(&stmt, &ctx) {
                Ok(plan) => plan,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            for index in 0..plan.groups().len() {
                let chunks = plan
                    .open_group(index, &ctx)
                    .and_then(|mut cursor| cursor.collect_series(plan.columns(), chunk_size, &ctx));
                match chunks {
                    Ok(chunks) => {
                        for chunk in chunks {
                            if tx.blocking_send(Ok(chunk)).is_err() {
                                tracing::debug!("stream receiver dropped");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log_failure(&e);
                        let _ = tx.blocking_send(Err(e));
                        return;
                    }
                }
            }
        });
        rx
    }

    /// Execute on the calling thread with inline leaf scans
    ///
    /// For callers without a tokio runtime.
    pub fn execute_blocking(&self, database: &str, stmt: &SelectStatement) -> QueryResult<Vec<Series>> {
        let ctx = self.context(CancellationToken::new())?;
        let planner = self.planner(database, None);
        let span = tracing::info_span!("query", query_id = %Uuid::new_v4(), statement_id = 0);
        let _enter = span.enter();
        run_statement(&planner, stmt, &ctx, self.config.chunk_size)
    }

    async fn spawn(
        &self,
        database: &str,
        stmt: &SelectStatement,
        statement_id: usize,
        token: CancellationToken,
    ) -> QueryResult<Vec<Series>> {
        let ctx = self.context(token)?;
        let planner = self.planner(database, Some(Handle::current()));
        let stmt = stmt.clone();
        let chunk_size = self.config.chunk_size;
        let span = tracing::info_span!("query", query_id = %Uuid::new_v4(), statement_id);

        tokio::task::spawn_blocking(move || {
            let _enter = span.enter();
            run_statement(&planner, &stmt, &ctx, chunk_size)
        })
        .await
        .map_err(|e| QueryError::Internal(e.to_string()))?
    }

    fn context(&self, token: CancellationToken) -> QueryResult<QueryContext> {
        let timeout = self
            .config
            .timeout()
            .map_err(|e| QueryError::invalid(format!("invalid query timeout: {}", e)))?;
        let ctx = QueryContext::new(token, self.config.limits());
        Ok(if timeout.is_zero() {
            ctx
        } else {
            ctx.with_timeout(timeout)
        })
    }

    fn planner(&self, database: &str, handle: Option<Handle>) -> Planner {
        let planner = Planner::new(self.catalog.clone(), database);
        match handle {
            Some(handle) if self.config.max_concurrent_scans > 0 => {
                planner.with_scheduler(ScanScheduler::new(
                    handle,
                    self.config.max_concurrent_scans,
                    self.config.scan_buffer,
                    self.config.scan_batch_size,
                ))
            }
            _ => planner,
        }
    }
}

/// Plan a statement and drain every group
fn run_statement(
    planner: &Planner,
    stmt: &SelectStatement,
    ctx: &QueryContext,
    chunk_size: usize,
) -> QueryResult<Vec<Series>> {
    let start = Instant::now();
    let result = planner.plan(stmt, ctx).and_then(|plan| {
        let mut series = Vec::new();
        for index in 0..plan.groups().len() {
            let mut cursor = plan.open_group(index, ctx)?;
            series.extend(cursor.collect_series(plan.columns(), chunk_size, ctx)?);
        }
        Ok(series)
    });

    match &result {
        Ok(series) => tracing::info!(
            series = series.len(),
            rows = series.iter().map(|s| s.values.len()).sum::<usize>(),
            points_read = ctx.points_read(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "statement complete"
        ),
        Err(e) => log_failure(e),
    }
    result
}

fn log_failure(err: &QueryError) {
    match err {
        QueryError::Cancelled | QueryError::Timeout | QueryError::LimitExceeded(_) => {
            tracing::warn!(error = %err, "statement aborted")
        }
        _ => tracing::debug!(error = %err, "statement failed"),
    }
}
