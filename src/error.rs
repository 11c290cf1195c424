//! Unified error taxonomy for query compilation and execution.
//!
//! Compilation-stage errors (predicate, plan, render) are deterministic and
//! detected before any connection is acquired. Execution-stage errors come
//! from the governor and the pool. Every variant carries a stable
//! machine-readable kind plus a remediation hint for the caller; none of
//! them ever includes rendered SQL text or bind values.

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error raised by a database driver implementation.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("failed to open connection: {0}")]
    Connect(String),

    #[error("statement execution failed: {0}")]
    Execute(String),

    #[error("no open cursor on this connection")]
    NoCursor,

    #[error("connection is closed")]
    Closed,
}

/// Unified error type for the query engine.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A filter condition failed column/operator/type validation.
    #[error("invalid predicate on '{column}': operator '{operator}' {reason}")]
    InvalidPredicate {
        column: String,
        operator: &'static str,
        reason: String,
    },

    /// A `between` condition arrived with its lower bound above its upper
    /// bound. Bounds are never silently swapped.
    #[error("invalid range on '{column}': lower bound exceeds upper bound")]
    InvalidRange { column: String },

    /// The filter tree exceeds a configured nesting or size ceiling.
    #[error("predicate too complex: {0}")]
    PredicateTooComplex(String),

    /// The query specification is structurally invalid.
    #[error("invalid query spec: {0}")]
    InvalidQuerySpec(String),

    /// A post-aggregation filter referenced something that is neither a
    /// declared measure alias nor a group-by column.
    #[error("unknown aggregated column '{column}' in post-aggregation filter")]
    UnknownAggregatedColumn { column: String },

    /// The cost probe predicted a cardinality above the configured ceiling.
    #[error("estimated result of {estimated} rows exceeds the ceiling of {ceiling} rows")]
    CostTooHigh { estimated: u64, ceiling: u64 },

    /// No concurrency slot or pooled connection became available within the
    /// configured wait timeout.
    #[error("connection pool exhausted after {attempts} attempt(s)")]
    PoolExhausted { attempts: u32 },

    /// Execution exceeded the hard wall-clock timeout.
    #[error("query exceeded the {timeout_secs}s execution timeout")]
    QueryTimeout { timeout_secs: u64 },

    /// The result set exceeded the configured row ceiling.
    #[error("result exceeds the configured ceiling of {ceiling} rows")]
    RowLimitExceeded { ceiling: u64 },

    /// The plan requires a capability the target dialect does not have.
    #[error("operator '{operator}' is not supported by the {dialect} dialect")]
    DialectUnsupportedOperator {
        operator: &'static str,
        dialect: &'static str,
    },

    /// Underlying driver failure (execution stage only).
    #[error("database driver error: {0}")]
    Driver(#[from] DriverError),
}

impl QueryError {
    /// Stable machine-readable kind for API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            QueryError::InvalidPredicate { .. } => "invalid_predicate",
            QueryError::InvalidRange { .. } => "invalid_range",
            QueryError::PredicateTooComplex(_) => "predicate_too_complex",
            QueryError::InvalidQuerySpec(_) => "invalid_query_spec",
            QueryError::UnknownAggregatedColumn { .. } => "unknown_aggregated_column",
            QueryError::CostTooHigh { .. } => "cost_too_high",
            QueryError::PoolExhausted { .. } => "pool_exhausted",
            QueryError::QueryTimeout { .. } => "query_timeout",
            QueryError::RowLimitExceeded { .. } => "row_limit_exceeded",
            QueryError::DialectUnsupportedOperator { .. } => "dialect_unsupported_operator",
            QueryError::Driver(_) => "driver_error",
        }
    }

    /// Human-readable remediation hint, where one exists.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            QueryError::CostTooHigh { .. } => {
                Some("add a partition filter or a more selective predicate")
            }
            QueryError::RowLimitExceeded { .. } => {
                Some("narrow the query with additional filters or a smaller date range")
            }
            QueryError::PoolExhausted { .. } => Some("try again in a moment"),
            QueryError::QueryTimeout { .. } => {
                Some("add a partition filter or reduce the number of joins")
            }
            QueryError::PredicateTooComplex(_) => {
                Some("reduce filter nesting or the number of conditions")
            }
            _ => None,
        }
    }

    /// Whether this error was produced before any connection was acquired.
    pub fn is_compilation_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidPredicate { .. }
                | QueryError::InvalidRange { .. }
                | QueryError::PredicateTooComplex(_)
                | QueryError::InvalidQuerySpec(_)
                | QueryError::UnknownAggregatedColumn { .. }
                | QueryError::DialectUnsupportedOperator { .. }
        )
    }
}
