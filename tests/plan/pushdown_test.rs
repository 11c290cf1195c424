//! Predicate pushdown and join ordering tests.

use chrono::NaiveDate;
use tabula::catalog::{ColumnRef, MemoryCatalog};
use tabula::config::CompilerSettings;
use tabula::plan::{PlanBuilder, PlanLimits};
use tabula::spec::{
    ColumnPath, Condition, ConditionGroup, FilterNode, JoinKind, JoinOn, JoinSpec, Operator,
    Pagination, QuerySpec, SemanticType, Value,
};

fn catalog() -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    cat.add_dataset(
        "sales.orders",
        vec![
            ColumnRef::new("sales.orders", "order_id", SemanticType::Number).not_null(),
            ColumnRef::new("sales.orders", "customer_id", SemanticType::Number),
            ColumnRef::new("sales.orders", "status", SemanticType::String),
            ColumnRef::new("sales.orders", "total", SemanticType::Number),
            ColumnRef::new("sales.orders", "order_date", SemanticType::Date),
        ],
    );
    cat.add_dataset(
        "sales.customers",
        vec![
            ColumnRef::new("sales.customers", "customer_id", SemanticType::Number).not_null(),
            ColumnRef::new("sales.customers", "name", SemanticType::String),
            ColumnRef::new("sales.customers", "region", SemanticType::String),
        ],
    );
    cat.add_dataset(
        "sales.items",
        vec![
            ColumnRef::new("sales.items", "item_id", SemanticType::Number).not_null(),
            ColumnRef::new("sales.items", "order_id", SemanticType::Number),
            ColumnRef::new("sales.items", "sku", SemanticType::String),
        ],
    );
    cat.add_dataset(
        "sales.shipments",
        vec![
            ColumnRef::new("sales.shipments", "shipment_id", SemanticType::Number).not_null(),
            ColumnRef::new("sales.shipments", "customer_id", SemanticType::Number),
            ColumnRef::new("sales.shipments", "carrier", SemanticType::String),
        ],
    );
    cat
}

fn limits() -> PlanLimits {
    PlanLimits {
        row_ceiling: 1000,
        predicate: CompilerSettings::default(),
    }
}

fn leaf(dataset: &str, name: &str, operator: Operator, operands: Vec<Value>) -> FilterNode {
    FilterNode::Condition(Condition {
        column: ColumnPath::qualified(dataset, name),
        operator,
        operands,
    })
}

fn join(left: &str, right: &str, left_col: &str, right_col: &str) -> JoinSpec {
    JoinSpec {
        left_dataset: left.into(),
        right_dataset: right.into(),
        kind: JoinKind::Inner,
        on: vec![JoinOn {
            left: ColumnPath::qualified(left, left_col),
            right: ColumnPath::qualified(right, right_col),
        }],
    }
}

fn spec_with(joins: Vec<JoinSpec>, filter: ConditionGroup) -> QuerySpec {
    QuerySpec {
        dataset: "sales.orders".into(),
        columns: vec![ColumnPath::new("order_id")],
        joins,
        filter,
        partition_filter: ConditionGroup::default(),
        aggregation: None,
        post_aggregation_filter: None,
        sort: vec![],
        pagination: Pagination {
            offset: 0,
            limit: 100,
        },
    }
}

#[test]
fn test_single_dataset_conditions_push_into_scans() {
    let cat = catalog();
    let filter = ConditionGroup::and(vec![
        leaf(
            "sales.orders",
            "status",
            Operator::Eq,
            vec![Value::Str("open".into())],
        ),
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("EMEA".into())],
        ),
    ]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert!(!plan.tables[0].pushed.is_true());
    assert!(!plan.tables[1].pushed.is_true());
    // Everything moved into the scans, nothing residual.
    assert!(plan.where_filter.is_true());
    assert_eq!(plan.binds.len(), 2);
}

#[test]
fn test_cross_dataset_or_stays_residual() {
    let cat = catalog();
    let filter = ConditionGroup::or(vec![
        leaf(
            "sales.orders",
            "status",
            Operator::Eq,
            vec![Value::Str("open".into())],
        ),
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("EMEA".into())],
        ),
    ]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert!(plan.tables[0].pushed.is_true());
    assert!(plan.tables[1].pushed.is_true());
    assert!(!plan.where_filter.is_true());
}

#[test]
fn test_single_dataset_or_pushes_whole() {
    let cat = catalog();
    let filter = ConditionGroup::or(vec![
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("EMEA".into())],
        ),
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("APAC".into())],
        ),
    ]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert!(plan.tables[0].pushed.is_true());
    assert!(!plan.tables[1].pushed.is_true());
    assert!(plan.where_filter.is_true());
}

#[test]
fn test_partition_filter_pushed_ahead_of_user_filter() {
    let cat = catalog();
    let mut spec = spec_with(
        vec![],
        ConditionGroup::and(vec![leaf(
            "sales.orders",
            "total",
            Operator::Gt,
            vec![Value::Int(100)],
        )]),
    );
    let cutoff = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    spec.partition_filter = ConditionGroup::and(vec![leaf(
        "sales.orders",
        "order_date",
        Operator::Ge,
        vec![Value::Date(cutoff)],
    )]);
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert!(!plan.tables[0].pushed.is_true());
    assert!(plan.where_filter.is_true());
    // Partition predicate binds before the user predicate.
    assert_eq!(plan.binds, vec![Value::Date(cutoff), Value::Int(100)]);
}

#[test]
fn test_filter_on_undeclared_dataset_rejected() {
    let cat = catalog();
    let filter = ConditionGroup::and(vec![leaf(
        "sales.customers",
        "region",
        Operator::Eq,
        vec![Value::Str("EMEA".into())],
    )]);
    let spec = spec_with(vec![], filter);
    let err = PlanBuilder::new(&cat, limits()).build(&spec).unwrap_err();
    assert_eq!(err.kind(), "invalid_query_spec");
}

#[test]
fn test_joins_ordered_by_pushed_selectivity() {
    let cat = catalog();
    // Items carry no filter; customers carry an equality filter.
    let filter = ConditionGroup::and(vec![leaf(
        "sales.customers",
        "region",
        Operator::Eq,
        vec![Value::Str("EMEA".into())],
    )]);
    let spec = spec_with(
        vec![
            join("sales.orders", "sales.items", "order_id", "order_id"),
            join(
                "sales.orders",
                "sales.customers",
                "customer_id",
                "customer_id",
            ),
        ],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert_eq!(plan.tables[1].dataset, "sales.customers");
    assert_eq!(plan.tables[2].dataset, "sales.items");
    assert_eq!(plan.joins[0].table, 1);
    assert_eq!(plan.joins[1].table, 2);
}

#[test]
fn test_equality_beats_pattern_match_in_ordering() {
    let cat = catalog();
    let filter = ConditionGroup::and(vec![
        leaf(
            "sales.items",
            "sku",
            Operator::Contains,
            vec![Value::Str("X".into())],
        ),
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("EMEA".into())],
        ),
    ]);
    let spec = spec_with(
        vec![
            join("sales.orders", "sales.items", "order_id", "order_id"),
            join(
                "sales.orders",
                "sales.customers",
                "customer_id",
                "customer_id",
            ),
        ],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert_eq!(plan.tables[1].dataset, "sales.customers");
    assert_eq!(plan.tables[2].dataset, "sales.items");
}

#[test]
fn test_dependent_join_follows_its_dependency() {
    let cat = catalog();
    // Shipments hang off customers and carry the most selective filter;
    // they still cannot move ahead of the join that introduces customers.
    let filter = ConditionGroup::and(vec![leaf(
        "sales.shipments",
        "carrier",
        Operator::Eq,
        vec![Value::Str("DHL".into())],
    )]);
    let spec = spec_with(
        vec![
            join(
                "sales.orders",
                "sales.customers",
                "customer_id",
                "customer_id",
            ),
            join(
                "sales.customers",
                "sales.shipments",
                "customer_id",
                "customer_id",
            ),
            join("sales.orders", "sales.items", "order_id", "order_id"),
        ],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    let order: Vec<&str> = plan.tables.iter().map(|t| t.dataset.as_str()).collect();
    let customers_at = order
        .iter()
        .position(|d| *d == "sales.customers")
        .unwrap();
    let shipments_at = order
        .iter()
        .position(|d| *d == "sales.shipments")
        .unwrap();
    assert!(customers_at < shipments_at);
    assert_eq!(order[0], "sales.orders");
}

#[test]
fn test_primary_dataset_never_moves() {
    let cat = catalog();
    // Even when the joined dataset is far more selective, the primary
    // stays the FROM anchor.
    let filter = ConditionGroup::and(vec![leaf(
        "sales.customers",
        "customer_id",
        Operator::Eq,
        vec![Value::Int(42)],
    )]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();
    assert_eq!(plan.tables[0].dataset, "sales.orders");
}

#[test]
fn test_leaf_ceiling_spans_all_datasets() {
    let cat = catalog();
    let tight = PlanLimits {
        row_ceiling: 1000,
        predicate: CompilerSettings {
            max_leaves: 4,
            ..CompilerSettings::default()
        },
    };
    let eq = |ds: &str, name: &str| {
        leaf(ds, name, Operator::Eq, vec![Value::Str("x".into())])
    };
    // Three leaves per dataset: each scan alone is under the ceiling,
    // the tree as a whole is not.
    let filter = ConditionGroup::and(vec![
        eq("sales.orders", "status"),
        eq("sales.orders", "status"),
        eq("sales.orders", "status"),
        eq("sales.customers", "region"),
        eq("sales.customers", "region"),
        eq("sales.customers", "region"),
    ]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let err = PlanBuilder::new(&cat, tight.clone()).build(&spec).unwrap_err();
    assert_eq!(err.kind(), "predicate_too_complex");

    let ok_filter = ConditionGroup::and(vec![
        eq("sales.orders", "status"),
        eq("sales.orders", "status"),
        eq("sales.customers", "region"),
        eq("sales.customers", "region"),
    ]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        ok_filter,
    );
    assert!(PlanBuilder::new(&cat, tight).build(&spec).is_ok());
}

#[test]
fn test_nested_and_groups_flatten_for_pushdown() {
    let cat = catalog();
    let filter = ConditionGroup::and(vec![FilterNode::Group(ConditionGroup::and(vec![
        leaf(
            "sales.orders",
            "status",
            Operator::Eq,
            vec![Value::Str("open".into())],
        ),
        leaf(
            "sales.customers",
            "region",
            Operator::Eq,
            vec![Value::Str("EMEA".into())],
        ),
    ]))]);
    let spec = spec_with(
        vec![join(
            "sales.orders",
            "sales.customers",
            "customer_id",
            "customer_id",
        )],
        filter,
    );
    let plan = PlanBuilder::new(&cat, limits()).build(&spec).unwrap();

    assert!(!plan.tables[0].pushed.is_true());
    assert!(!plan.tables[1].pushed.is_true());
    assert!(plan.where_filter.is_true());
}
