//! # Tabula
//!
//! A query compilation and execution guard for ad-hoc analytical reporting.
//!
//! Tabula turns a structured query description (filters, joins, aggregations,
//! pagination) into safe, parameterized multi-dialect SQL and executes it
//! under strict resource governance.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              QuerySpec (JSON from the UI/API)            │
//! │  (columns, joins, filter tree, aggregation, pagination)  │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan builder + predicate compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │        ExecutionPlan (immutable, pushed-down tree)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [renderer]
//! ┌─────────────────────────────────────────────────────────┐
//! │       SqlStatement (dialect text + ordered binds)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [execution governor]
//! ┌─────────────────────────────────────────────────────────┐
//! │   cost check → admission → pooled, timed-out execution   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Compilation (catalog lookup, predicate compilation, planning, rendering)
//! is pure and synchronous; only the [`exec`] module touches the database.

pub mod catalog;
pub mod compile;
pub mod config;
pub mod error;
pub mod exec;
pub mod plan;
pub mod spec;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{ColumnRef, MemoryCatalog, SchemaCatalog};
    pub use crate::config::Settings;
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::exec::governor::{ExecutionGovernor, ExportStream, OperationClass, PreviewPage};
    pub use crate::exec::pool::ConnectionPool;
    pub use crate::plan::builder::{PlanBuilder, PlanLimits};
    pub use crate::plan::ExecutionPlan;
    pub use crate::spec::{
        AggregateFunction, AggregationSpec, ColumnPath, Condition, ConditionGroup, FilterNode,
        JoinKind, JoinOn, JoinSpec, Logic, Measure, Operator, Pagination, QuerySpec, SemanticType,
        SortDirection, SortKey, Value,
    };
    pub use crate::sql::render::{render, render_count, SqlStatement};
    pub use crate::sql::{Dialect, SqlDialect};
}

// Also export at crate root for convenience
pub use catalog::{ColumnRef, SchemaCatalog};
pub use error::{QueryError, QueryResult};
pub use plan::ExecutionPlan;
pub use spec::QuerySpec;
pub use sql::Dialect;
