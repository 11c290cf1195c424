//! Execution governor: every statement runs under its supervision.
//!
//! A request moves through fixed phases:
//!
//! ```text
//! received ──► cost_checked ──► admitted ──► executing ──► completed
//!     │             │              │             │             │
//!     └── invalid   └── too costly └── no slot   └── timeout / └── result
//!         spec                                       row limit
//! ```
//!
//! The cost probe runs on its own short-lived pooled connection before
//! the request takes a class slot, so a rejected query never occupies
//! preview or export capacity. When the probe itself fails the query
//! proceeds anyway; the wall-clock timeout is the safety net. A query
//! that times out gets its connection discarded, never returned to the
//! pool mid-statement.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::catalog::SchemaCatalog;
use crate::config::{GovernorSettings, PoolSettings, Settings};
use crate::error::{DriverError, QueryError, QueryResult};
use crate::exec::driver::RowBatch;
use crate::exec::pool::{AcquireError, ConnectionPool, PooledConnection};
use crate::plan::{PlanBuilder, PlanLimits};
use crate::spec::{QuerySpec, Value};
use crate::sql::{render, render_count, Dialect, SqlDialect, SqlStatement};

/// Request class; each class has its own concurrency cap and row ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Preview,
    Export,
}

impl OperationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Preview => "preview",
            OperationClass::Export => "export",
        }
    }
}

/// One page of preview results plus the total filtered count.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Total rows the query matches, ignoring pagination.
    pub total_rows: u64,
    pub execution_ms: u128,
    /// True when the requested page size was clamped to the ceiling.
    pub limit_clamped: bool,
}

/// Admits, executes, and supervises queries against one target database.
pub struct ExecutionGovernor {
    catalog: Arc<dyn SchemaCatalog>,
    pool: ConnectionPool,
    dialect: Dialect,
    pool_settings: PoolSettings,
    governor: GovernorSettings,
    compiler: crate::config::CompilerSettings,
    preview_slots: Arc<Semaphore>,
    export_slots: Arc<Semaphore>,
}

impl ExecutionGovernor {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        pool: ConnectionPool,
        dialect: Dialect,
        settings: &Settings,
    ) -> Self {
        ExecutionGovernor {
            catalog,
            pool,
            dialect,
            pool_settings: settings.pool.clone(),
            governor: settings.governor.clone(),
            compiler: settings.compiler.clone(),
            preview_slots: Arc::new(Semaphore::new(settings.governor.preview_concurrency)),
            export_slots: Arc::new(Semaphore::new(settings.governor.export_concurrency)),
        }
    }

    /// Runs a preview: one bounded page plus the total filtered count.
    pub async fn preview(&self, spec: &QuerySpec) -> QueryResult<PreviewPage> {
        let started = Instant::now();
        tracing::info!(dataset = %spec.dataset, class = "preview", phase = "received", "query received");

        let plan = self.build_plan(spec, self.governor.preview_row_ceiling)?;
        let statement = render(&plan, self.dialect)?;
        let count_statement = render_count(&plan, self.dialect)?;
        tracing::debug!(sql = %statement.text, binds = statement.binds.len(), "rendered statement");

        self.cost_check(&statement).await?;
        tracing::debug!(class = "preview", phase = "cost_checked", "cost check passed");

        let _slot = self.admit(OperationClass::Preview).await?;
        let mut conn = self.acquire_with_retry().await?;
        tracing::info!(class = "preview", phase = "executing", "admitted for execution");

        let timeout = Duration::from_secs(self.governor.query_timeout_secs);
        let limit = plan.limit;
        let run = tokio::time::timeout(timeout, async {
            let total = conn.fetch_scalar(&count_statement).await?;
            let batch = conn.fetch_page(&statement, limit).await?;
            Ok::<_, DriverError>((total, batch))
        })
        .await;

        match run {
            Err(_) => {
                tracing::warn!(class = "preview", timeout_secs = self.governor.query_timeout_secs, "execution timed out, discarding connection");
                conn.discard();
                Err(QueryError::QueryTimeout {
                    timeout_secs: self.governor.query_timeout_secs,
                })
            }
            Ok(Err(e)) => {
                conn.discard();
                Err(e.into())
            }
            Ok(Ok((total, batch))) => {
                let total_rows = scalar_rows(total)?;
                let page = PreviewPage {
                    columns: batch.columns,
                    rows: batch.rows,
                    total_rows,
                    execution_ms: started.elapsed().as_millis(),
                    limit_clamped: plan.limit_clamped,
                };
                tracing::info!(
                    class = "preview",
                    phase = "completed",
                    rows = page.rows.len(),
                    total_rows = page.total_rows,
                    execution_ms = page.execution_ms as u64,
                    "query completed"
                );
                Ok(page)
            }
        }
    }

    /// Starts an export: the full result as a chunked row stream under a
    /// hard row ceiling. The total count is pre-checked so an oversized
    /// export fails before the first row moves.
    pub async fn export(&self, spec: &QuerySpec) -> QueryResult<ExportStream> {
        tracing::info!(dataset = %spec.dataset, class = "export", phase = "received", "query received");

        let plan = self.build_plan(spec, self.governor.export_row_ceiling)?;
        let statement = render(&plan, self.dialect)?;
        let count_statement = render_count(&plan, self.dialect)?;
        tracing::debug!(sql = %statement.text, binds = statement.binds.len(), "rendered statement");

        self.cost_check(&statement).await?;
        tracing::debug!(class = "export", phase = "cost_checked", "cost check passed");

        let permit = self.admit(OperationClass::Export).await?;
        let mut conn = self.acquire_with_retry().await?;
        tracing::info!(class = "export", phase = "executing", "admitted for execution");

        let timeout = Duration::from_secs(self.governor.query_timeout_secs);
        let ceiling = self.governor.export_row_ceiling;

        let total = match tokio::time::timeout(timeout, conn.fetch_scalar(&count_statement)).await {
            Err(_) => {
                conn.discard();
                return Err(QueryError::QueryTimeout {
                    timeout_secs: self.governor.query_timeout_secs,
                });
            }
            Ok(Err(e)) => {
                conn.discard();
                return Err(e.into());
            }
            Ok(Ok(total)) => scalar_rows(total)?,
        };
        if total > ceiling {
            tracing::warn!(class = "export", total_rows = total, ceiling, "export rejected before streaming");
            return Err(QueryError::RowLimitExceeded { ceiling });
        }

        match tokio::time::timeout(
            timeout,
            conn.open_cursor(&statement, self.governor.export_chunk_rows),
        )
        .await
        {
            Err(_) => {
                conn.discard();
                return Err(QueryError::QueryTimeout {
                    timeout_secs: self.governor.query_timeout_secs,
                });
            }
            Ok(Err(e)) => {
                conn.discard();
                return Err(e.into());
            }
            Ok(Ok(())) => {}
        }

        Ok(ExportStream {
            conn: Some(conn),
            _permit: permit,
            emitted: 0,
            ceiling,
            chunk_timeout: timeout,
            timeout_secs: self.governor.query_timeout_secs,
        })
    }

    fn build_plan(&self, spec: &QuerySpec, row_ceiling: u64) -> QueryResult<crate::plan::ExecutionPlan> {
        let builder = PlanBuilder::new(
            self.catalog.as_ref(),
            PlanLimits {
                row_ceiling,
                predicate: self.compiler.clone(),
            },
        );
        builder.build(spec)
    }

    /// Cardinality probe ahead of admission, on its own pooled
    /// connection. A probe answer above the ceiling rejects the query; a
    /// failed probe only logs, since the execution timeout still bounds
    /// the damage.
    async fn cost_check(&self, statement: &SqlStatement) -> QueryResult<()> {
        if !self.dialect.supports_cost_estimation() {
            return Ok(());
        }
        let mut conn = self.acquire_with_retry().await?;
        match conn.estimate_cardinality(statement).await {
            Ok(Some(estimated)) => {
                tracing::debug!(estimated, ceiling = self.governor.cost_ceiling, "cost probe answered");
                if estimated > self.governor.cost_ceiling {
                    return Err(QueryError::CostTooHigh {
                        estimated,
                        ceiling: self.governor.cost_ceiling,
                    });
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "cost probe failed, proceeding under execution timeout");
                Ok(())
            }
        }
    }

    async fn admit(&self, class: OperationClass) -> QueryResult<OwnedSemaphorePermit> {
        let slots = match class {
            OperationClass::Preview => Arc::clone(&self.preview_slots),
            OperationClass::Export => Arc::clone(&self.export_slots),
        };
        let wait = Duration::from_millis(self.pool_settings.acquire_timeout_ms);
        tokio::time::timeout(wait, slots.acquire_owned())
            .await
            .map_err(|_| {
                tracing::warn!(class = class.as_str(), "no execution slot within wait timeout");
                QueryError::PoolExhausted { attempts: 1 }
            })?
            .map_err(|_| QueryError::PoolExhausted { attempts: 1 })
    }

    /// Bounded pool acquisition: a timed-out wait is retried with a
    /// backoff pause, then surfaces as pool exhaustion.
    async fn acquire_with_retry(&self) -> QueryResult<PooledConnection> {
        let wait = Duration::from_millis(self.pool_settings.acquire_timeout_ms);
        let max_attempts = self.pool_settings.acquire_retries.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.pool.acquire(wait).await {
                Ok(conn) => return Ok(conn),
                Err(AcquireError::Timeout) if attempt < max_attempts => {
                    tracing::warn!(attempt, max_attempts, "pool wait timed out, retrying");
                    tokio::time::sleep(Duration::from_millis(self.pool_settings.retry_backoff_ms))
                        .await;
                }
                Err(AcquireError::Timeout) | Err(AcquireError::Closed) => {
                    return Err(QueryError::PoolExhausted { attempts: attempt })
                }
                Err(AcquireError::Connect(e)) => return Err(QueryError::Driver(e)),
            }
        }
    }
}

/// A running export: chunks of rows pulled on demand.
///
/// Dropping the stream cancels the export; the connection guard and the
/// class slot are released with it.
pub struct ExportStream {
    conn: Option<PooledConnection>,
    _permit: OwnedSemaphorePermit,
    emitted: u64,
    ceiling: u64,
    chunk_timeout: Duration,
    timeout_secs: u64,
}

impl std::fmt::Debug for ExportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStream")
            .field("emitted", &self.emitted)
            .field("ceiling", &self.ceiling)
            .field("chunk_timeout", &self.chunk_timeout)
            .field("timeout_secs", &self.timeout_secs)
            .finish_non_exhaustive()
    }
}

impl ExportStream {
    /// Next chunk of rows. `None` when the export is complete. The row
    /// ceiling is also enforced incrementally here, in case the actual
    /// row count outruns the pre-checked estimate.
    pub async fn next_batch(&mut self) -> Option<QueryResult<RowBatch>> {
        let conn = self.conn.as_mut()?;
        match tokio::time::timeout(self.chunk_timeout, conn.next_chunk()).await {
            Err(_) => {
                if let Some(conn) = self.conn.take() {
                    conn.discard();
                }
                Some(Err(QueryError::QueryTimeout {
                    timeout_secs: self.timeout_secs,
                }))
            }
            Ok(Err(e)) => {
                if let Some(conn) = self.conn.take() {
                    conn.discard();
                }
                Some(Err(e.into()))
            }
            Ok(Ok(None)) => {
                // Cursor exhausted; the guard returns to the pool.
                self.conn = None;
                tracing::info!(class = "export", phase = "completed", rows = self.emitted, "export completed");
                None
            }
            Ok(Ok(Some(batch))) => {
                self.emitted += batch.rows.len() as u64;
                if self.emitted > self.ceiling {
                    if let Some(conn) = self.conn.take() {
                        conn.discard();
                    }
                    tracing::warn!(class = "export", rows = self.emitted, ceiling = self.ceiling, "row ceiling hit mid-stream");
                    return Some(Err(QueryError::RowLimitExceeded {
                        ceiling: self.ceiling,
                    }));
                }
                Some(Ok(batch))
            }
        }
    }

    pub fn rows_emitted(&self) -> u64 {
        self.emitted
    }
}

/// Interprets the count query's scalar answer. A count must be a
/// non-negative number; anything else is a driver fault, not zero rows.
fn scalar_rows(value: Option<Value>) -> Result<u64, DriverError> {
    match value {
        Some(Value::Int(n)) if n >= 0 => Ok(n as u64),
        Some(Value::Float(f)) if f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        None => Ok(0),
        Some(other) => Err(DriverError::Execute(format!(
            "count query returned a non-count value: {:?}",
            other
        ))),
    }
}
