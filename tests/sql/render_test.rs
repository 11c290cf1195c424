//! Renderer tests: dialect text, bind ordering, parameterization.

use tabula::catalog::{ColumnRef, MemoryCatalog};
use tabula::config::CompilerSettings;
use tabula::plan::{ExecutionPlan, PlanBuilder, PlanLimits};
use tabula::spec::{
    AggregateFunction, AggregationSpec, ColumnPath, Condition, ConditionGroup, FilterNode,
    Measure, Operator, Pagination, QuerySpec, SemanticType, SortDirection, SortKey, Value,
};
use tabula::sql::{render, render_count, Dialect};

fn catalog() -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    cat.add_dataset(
        "t",
        vec![
            ColumnRef::new("t", "id", SemanticType::Number).not_null(),
            ColumnRef::new("t", "name", SemanticType::String),
            ColumnRef::new("t", "flag", SemanticType::Boolean),
        ],
    );
    cat
}

fn leaf(name: &str, operator: Operator, operands: Vec<Value>) -> FilterNode {
    FilterNode::Condition(Condition {
        column: ColumnPath::new(name),
        operator,
        operands,
    })
}

fn build(spec: &QuerySpec) -> ExecutionPlan {
    let cat = catalog();
    let builder = PlanBuilder::new(
        &cat,
        PlanLimits {
            row_ceiling: 10_000,
            predicate: CompilerSettings::default(),
        },
    );
    builder.build(spec).unwrap()
}

fn simple_spec() -> QuerySpec {
    QuerySpec {
        dataset: "t".into(),
        columns: vec![ColumnPath::new("id"), ColumnPath::new("name")],
        joins: vec![],
        filter: ConditionGroup::and(vec![leaf(
            "name",
            Operator::Eq,
            vec![Value::Str("target".into())],
        )]),
        partition_filter: ConditionGroup::default(),
        aggregation: None,
        post_aggregation_filter: None,
        sort: vec![],
        pagination: Pagination {
            offset: 0,
            limit: 10,
        },
    }
}

#[test]
fn test_duckdb_filtered_scan_text() {
    let plan = build(&simple_spec());
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert_eq!(
        stmt.text,
        "SELECT \"t\".\"id\" AS \"t.id\", \"t\".\"name\" AS \"t.name\" \
         FROM (SELECT \"id\", \"name\" FROM \"t\" WHERE \"name\" = ?) \"t\" \
         LIMIT 10"
    );
    assert_eq!(stmt.binds, vec![Value::Str("target".into())]);
}

#[test]
fn test_oracle_placeholders_and_pagination() {
    let mut spec = simple_spec();
    spec.pagination.offset = 20;
    spec.filter = ConditionGroup::and(vec![
        leaf("name", Operator::Eq, vec![Value::Str("a".into())]),
        leaf("id", Operator::Gt, vec![Value::Int(5)]),
    ]);
    let plan = build(&spec);
    let stmt = render(&plan, Dialect::Oracle).unwrap();
    assert!(stmt.text.contains(":p1"));
    assert!(stmt.text.contains(":p2"));
    assert!(!stmt.text.contains('?'));
    assert!(stmt
        .text
        .ends_with("OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
    assert_eq!(
        stmt.binds,
        vec![Value::Str("a".into()), Value::Int(5)]
    );
}

#[test]
fn test_placeholder_count_matches_bind_count() {
    let mut spec = simple_spec();
    spec.filter = ConditionGroup::and(vec![
        leaf(
            "name",
            Operator::In,
            vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into()),
            ],
        ),
        leaf("id", Operator::Between, vec![Value::Int(1), Value::Int(9)]),
    ]);
    let plan = build(&spec);
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    let placeholders = stmt.text.matches('?').count();
    assert_eq!(placeholders, stmt.binds.len());
    assert_eq!(stmt.binds.len(), 5);
}

#[test]
fn test_literals_never_inlined() {
    let plan = build(&simple_spec());
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert!(!stmt.text.contains("target"));
}

#[test]
fn test_never_emits_select_star() {
    let plan = build(&simple_spec());
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert!(!stmt.text.contains("SELECT *"));
    let count = render_count(&plan, Dialect::DuckDb).unwrap();
    // The wrapped count is the one legitimate COUNT(*).
    assert!(!count.text.replace("COUNT(*)", "").contains('*'));
}

#[test]
fn test_rendering_is_deterministic() {
    let plan = build(&simple_spec());
    let a = render(&plan, Dialect::DuckDb).unwrap();
    let b = render(&plan, Dialect::DuckDb).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_count_query_wraps_without_order_or_pagination() {
    let mut spec = simple_spec();
    spec.sort = vec![SortKey {
        column: ColumnPath::new("id"),
        direction: SortDirection::Desc,
    }];
    let plan = build(&spec);
    let stmt = render_count(&plan, Dialect::DuckDb).unwrap();
    assert!(stmt.text.starts_with("SELECT COUNT(*) AS \"total_rows\" FROM ("));
    assert!(stmt.text.ends_with(") \"sub\""));
    assert!(!stmt.text.contains("ORDER BY"));
    assert!(!stmt.text.contains("LIMIT"));
    // Filter binds still apply to the counted set.
    assert_eq!(stmt.binds, vec![Value::Str("target".into())]);
}

#[test]
fn test_aggregated_query_renders_group_by_and_having() {
    let spec = QuerySpec {
        dataset: "t".into(),
        columns: vec![],
        joins: vec![],
        filter: ConditionGroup::default(),
        partition_filter: ConditionGroup::default(),
        aggregation: Some(AggregationSpec {
            group_by: vec![ColumnPath::new("name")],
            measures: vec![Measure {
                function: AggregateFunction::Sum,
                column: ColumnPath::new("id"),
                alias: "id_sum".into(),
            }],
        }),
        post_aggregation_filter: Some(ConditionGroup::and(vec![leaf(
            "id_sum",
            Operator::Gt,
            vec![Value::Int(100)],
        )])),
        sort: vec![SortKey {
            column: ColumnPath::new("id_sum"),
            direction: SortDirection::Desc,
        }],
        pagination: Pagination {
            offset: 20,
            limit: 10,
        },
    };
    let plan = build(&spec);
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert_eq!(
        stmt.text,
        "SELECT \"t\".\"name\" AS \"t.name\", SUM(\"t\".\"id\") AS \"id_sum\" \
         FROM \"t\" \"t\" \
         GROUP BY \"t\".\"name\" \
         HAVING SUM(\"t\".\"id\") > ? \
         ORDER BY \"id_sum\" DESC \
         LIMIT 10 OFFSET 20"
    );
    assert_eq!(stmt.binds, vec![Value::Int(100)]);
}

#[test]
fn test_distinct_count_renders_count_distinct() {
    let spec = QuerySpec {
        dataset: "t".into(),
        columns: vec![],
        joins: vec![],
        filter: ConditionGroup::default(),
        partition_filter: ConditionGroup::default(),
        aggregation: Some(AggregationSpec {
            group_by: vec![],
            measures: vec![Measure {
                function: AggregateFunction::DistinctCount,
                column: ColumnPath::new("name"),
                alias: "distinct_names".into(),
            }],
        }),
        post_aggregation_filter: None,
        sort: vec![],
        pagination: Pagination {
            offset: 0,
            limit: 10,
        },
    };
    let plan = build(&spec);
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert!(stmt
        .text
        .contains("COUNT(DISTINCT \"t\".\"name\") AS \"distinct_names\""));
}

#[test]
fn test_oracle_rejects_boolean_binds() {
    let mut spec = simple_spec();
    spec.filter = ConditionGroup::and(vec![leaf(
        "flag",
        Operator::Eq,
        vec![Value::Bool(true)],
    )]);
    let plan = build(&spec);

    // DuckDB has a native boolean type, Oracle does not.
    assert!(render(&plan, Dialect::DuckDb).is_ok());
    let err = render(&plan, Dialect::Oracle).unwrap_err();
    assert_eq!(err.kind(), "dialect_unsupported_operator");
}

#[test]
fn test_like_pattern_travels_as_bind() {
    let mut spec = simple_spec();
    spec.filter = ConditionGroup::and(vec![leaf(
        "name",
        Operator::StartsWith,
        vec![Value::Str("ab".into())],
    )]);
    let plan = build(&spec);
    let stmt = render(&plan, Dialect::DuckDb).unwrap();
    assert!(stmt.text.contains("LIKE ? ESCAPE '\\'"));
    assert_eq!(stmt.binds, vec![Value::Str("ab%".into())]);
}
