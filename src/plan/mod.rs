//! Execution plans: the immutable output of query planning.
//!
//! An [`ExecutionPlan`] is the validated, pushed-down, ordered form of a
//! [`crate::spec::QuerySpec`]. Everything in it is resolved: columns carry
//! their catalog [`ColumnRef`], filters are compiled [`CondExpr`] trees,
//! and operand values sit in a single ordered bind list. The renderer
//! consumes plans without consulting the catalog again.

pub mod builder;

pub use builder::{PlanBuilder, PlanLimits};

use crate::catalog::ColumnRef;
use crate::compile::{CondExpr, MeasureRef};
use crate::spec::{JoinKind, SortDirection, Value};

/// A raw projected column with its output label (`dataset.column`).
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumn {
    pub column: ColumnRef,
    pub output: String,
}

/// An aggregated output with its sanitized alias.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMeasure {
    pub measure: MeasureRef,
    pub alias: String,
}

/// The output schema of a plan: raw columns, or the group-by/measure
/// union an aggregation morphs it into. These are mutually exclusive by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Raw(Vec<RawColumn>),
    Aggregated {
        group_by: Vec<RawColumn>,
        measures: Vec<PlannedMeasure>,
    },
}

impl Projection {
    /// Output column labels in SELECT order.
    pub fn output_labels(&self) -> Vec<&str> {
        match self {
            Projection::Raw(cols) => cols.iter().map(|c| c.output.as_str()).collect(),
            Projection::Aggregated { group_by, measures } => group_by
                .iter()
                .map(|c| c.output.as_str())
                .chain(measures.iter().map(|m| m.alias.as_str()))
                .collect(),
        }
    }
}

/// One dataset scan, possibly wrapped in a filtered sub-query.
///
/// When `pushed` is not the trivial predicate the renderer emits
/// `(SELECT cols FROM dataset WHERE pushed) alias`; otherwise the bare
/// table. `columns` is the explicit projection for the sub-query, in
/// catalog declaration order and restricted to what the outer query
/// actually references.
#[derive(Debug, Clone, PartialEq)]
pub struct TableScan {
    pub dataset: String,
    pub alias: String,
    pub pushed: CondExpr,
    pub columns: Vec<String>,
}

/// A join against a previously placed table, as resolved column pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub kind: JoinKind,
    /// Index into [`ExecutionPlan::tables`] of the joined-in scan.
    pub table: usize,
    pub on: Vec<(ColumnRef, ColumnRef)>,
}

/// What an ORDER BY key points at after resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    Column(ColumnRef),
    /// A measure alias from the aggregated projection.
    Alias(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub target: OrderTarget,
    pub direction: SortDirection,
}

/// Immutable, fully resolved query plan.
///
/// `tables[0]` is always the primary dataset (the FROM anchor); `joins`
/// are already in execution order. `binds` holds every operand value in
/// slot order; slot indices inside the `CondExpr` trees point into it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub tables: Vec<TableScan>,
    pub joins: Vec<JoinStep>,
    pub projection: Projection,
    /// Residual filter that could not be pushed into a single scan.
    pub where_filter: CondExpr,
    pub having: CondExpr,
    pub order_by: Vec<OrderKey>,
    pub offset: u64,
    pub limit: u64,
    /// True when the requested limit was clamped to the row ceiling.
    pub limit_clamped: bool,
    pub binds: Vec<Value>,
}

impl ExecutionPlan {
    /// Alias assigned to a dataset's scan, if the dataset is in the plan.
    pub fn alias_for(&self, dataset: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|t| t.dataset == dataset)
            .map(|t| t.alias.as_str())
    }

    pub fn is_aggregated(&self) -> bool {
        matches!(self.projection, Projection::Aggregated { .. })
    }
}
