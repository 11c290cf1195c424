//! Structured query description (the JSON contract with the UI/API layer).
//!
//! A [`QuerySpec`] is a declarative description of an analytical query:
//! which datasets, which columns, a tree of filter conditions, optional
//! aggregation, sorting and pagination. Nothing in this module touches the
//! catalog or the database; validation happens in [`crate::plan`].

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{QueryError, QueryResult};

// ============================================================================
// Values and types
// ============================================================================

/// Semantic column type used for operator/operand compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Number,
    Date,
    Boolean,
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SemanticType::String => "string",
            SemanticType::Number => "number",
            SemanticType::Date => "date",
            SemanticType::Boolean => "boolean",
        };
        write!(f, "{}", s)
    }
}

/// A typed operand value carried through compilation into the bind list.
///
/// Values are never rendered into SQL text; they travel next to the
/// statement as ordered binds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// The semantic type this value satisfies, or `None` for `Null`.
    pub fn semantic_type(&self) -> Option<SemanticType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(SemanticType::Boolean),
            Value::Int(_) | Value::Float(_) => Some(SemanticType::Number),
            Value::Str(_) => Some(SemanticType::String),
            Value::Date(_) | Value::Timestamp(_) => Some(SemanticType::Date),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Comparison and matching operators available in filter conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Contains,
    StartsWith,
    EndsWith,
    In,
    Between,
    IsNull,
    IsEmpty,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Le => "le",
            Operator::Ge => "ge",
            Operator::Contains => "contains",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::IsNull => "is_null",
            Operator::IsEmpty => "is_empty",
        }
    }
}

/// Reference to a column, optionally qualified with its dataset.
///
/// Unqualified paths resolve against the query's primary dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    pub name: String,
}

impl ColumnPath {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnPath {
            dataset: None,
            name: name.into(),
        }
    }

    pub fn qualified(dataset: impl Into<String>, name: impl Into<String>) -> Self {
        ColumnPath {
            dataset: Some(dataset.into()),
            name: name.into(),
        }
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dataset {
            Some(ds) => write!(f, "{}.{}", ds, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A single leaf condition: column, operator, operand values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub column: ColumnPath,
    pub operator: Operator,
    #[serde(default)]
    pub operands: Vec<Value>,
}

/// Boolean connective for a condition group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Logic {
    And,
    Or,
}

/// A node in the filter tree: either a leaf condition or a nested group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Condition(Condition),
    Group(ConditionGroup),
}

/// A group of filter nodes joined by a single connective.
///
/// An empty group is valid and compiles to "always true".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionGroup {
    pub logic: Logic,
    #[serde(default)]
    pub children: Vec<FilterNode>,
}

impl ConditionGroup {
    pub fn and(children: Vec<FilterNode>) -> Self {
        ConditionGroup {
            logic: Logic::And,
            children,
        }
    }

    pub fn or(children: Vec<FilterNode>) -> Self {
        ConditionGroup {
            logic: Logic::Or,
            children,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Default for ConditionGroup {
    fn default() -> Self {
        ConditionGroup::and(Vec::new())
    }
}

// ============================================================================
// Joins
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    FullOuter,
}

/// One equality pair in a join condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left: ColumnPath,
    pub right: ColumnPath,
}

/// A join between two declared datasets on one or more column equalities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSpec {
    pub left_dataset: String,
    pub right_dataset: String,
    pub kind: JoinKind,
    pub on: Vec<JoinOn>,
}

// ============================================================================
// Aggregation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    DistinctCount,
}

impl AggregateFunction {
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Count | AggregateFunction::DistinctCount => "COUNT",
        }
    }
}

/// An aggregated output column: `function(column) AS alias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub function: AggregateFunction,
    pub column: ColumnPath,
    pub alias: String,
}

/// Group-by columns plus the measures computed over each group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationSpec {
    #[serde(default)]
    pub group_by: Vec<ColumnPath>,
    pub measures: Vec<Measure>,
}

// ============================================================================
// Sorting and pagination
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub column: ColumnPath,
    #[serde(default = "default_sort_direction")]
    pub direction: SortDirection,
}

fn default_sort_direction() -> SortDirection {
    SortDirection::Asc
}

/// Offset/limit pagination. A limit of zero is rejected during planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Pagination {
            offset: 0,
            limit: 1000,
        }
    }
}

// ============================================================================
// The query spec
// ============================================================================

/// Complete declarative description of one analytical query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Primary dataset; always the FROM anchor.
    pub dataset: String,

    /// Raw output columns. May be empty only when `aggregation` is set.
    #[serde(default)]
    pub columns: Vec<ColumnPath>,

    #[serde(default)]
    pub joins: Vec<JoinSpec>,

    /// User filter tree applied before aggregation.
    #[serde(default)]
    pub filter: ConditionGroup,

    /// Caller-injected partition predicate, always pushed to the deepest
    /// level ahead of the user filter.
    #[serde(default)]
    pub partition_filter: ConditionGroup,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationSpec>,

    /// Filter over aggregated output; rendered as HAVING, never WHERE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_aggregation_filter: Option<ConditionGroup>,

    #[serde(default)]
    pub sort: Vec<SortKey>,

    #[serde(default)]
    pub pagination: Pagination,
}

impl QuerySpec {
    /// Parses a spec from its JSON wire form.
    pub fn from_json(input: &str) -> QueryResult<Self> {
        serde_json::from_str(input)
            .map_err(|e| QueryError::InvalidQuerySpec(format!("malformed JSON spec: {}", e)))
    }

    /// Datasets referenced by this query: the primary plus every join side.
    pub fn declared_datasets(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = vec![self.dataset.as_str()];
        for join in &self.joins {
            for ds in [join.left_dataset.as_str(), join.right_dataset.as_str()] {
                if !seen.contains(&ds) {
                    seen.push(ds);
                }
            }
        }
        seen
    }
}
