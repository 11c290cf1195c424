//! Predicate compiler tests: validation, bind allocation, ceilings.

use tabula::catalog::{ColumnRef, MemoryCatalog, SchemaCatalog};
use tabula::compile::{BindAllocator, CondExpr, MeasureRef, PredicateCompiler};
use tabula::config::CompilerSettings;
use tabula::spec::{
    AggregateFunction, ColumnPath, Condition, ConditionGroup, FilterNode, Logic, Operator,
    SemanticType, Value,
};

fn catalog() -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    cat.add_dataset(
        "sales.orders",
        vec![
            ColumnRef::new("sales.orders", "order_id", SemanticType::Number).not_null(),
            ColumnRef::new("sales.orders", "status", SemanticType::String),
            ColumnRef::new("sales.orders", "total", SemanticType::Number),
            ColumnRef::new("sales.orders", "order_date", SemanticType::Date),
            ColumnRef::new("sales.orders", "is_priority", SemanticType::Boolean),
        ],
    );
    cat
}

fn cond(name: &str, operator: Operator, operands: Vec<Value>) -> FilterNode {
    FilterNode::Condition(Condition {
        column: ColumnPath::new(name),
        operator,
        operands,
    })
}

fn compile(group: &ConditionGroup) -> Result<(CondExpr, Vec<Value>), tabula::QueryError> {
    let cat = catalog();
    let limits = CompilerSettings::default();
    let compiler = PredicateCompiler::new(&cat, &limits, "sales.orders");
    let mut binds = BindAllocator::new();
    let expr = compiler.compile(group, &mut binds)?;
    Ok((expr, binds.into_values()))
}

#[test]
fn test_empty_group_is_always_true() {
    let (expr, binds) = compile(&ConditionGroup::default()).unwrap();
    assert!(expr.is_true());
    assert!(binds.is_empty());
}

#[test]
fn test_binds_allocated_in_tree_order() {
    let group = ConditionGroup::and(vec![
        cond("status", Operator::Eq, vec![Value::Str("open".into())]),
        cond("total", Operator::Gt, vec![Value::Int(100)]),
        cond(
            "total",
            Operator::Between,
            vec![Value::Int(10), Value::Int(500)],
        ),
    ]);
    let (expr, binds) = compile(&group).unwrap();
    assert_eq!(
        binds,
        vec![
            Value::Str("open".into()),
            Value::Int(100),
            Value::Int(10),
            Value::Int(500),
        ]
    );
    assert_eq!(expr.leaf_count(), 3);
}

#[test]
fn test_unknown_column_rejected() {
    let group = ConditionGroup::and(vec![cond("missing", Operator::Eq, vec![Value::Int(1)])]);
    let err = compile(&group).unwrap_err();
    assert_eq!(err.kind(), "invalid_predicate");
}

#[test]
fn test_operand_type_must_match_column_type() {
    let group = ConditionGroup::and(vec![cond(
        "total",
        Operator::Eq,
        vec![Value::Str("abc".into())],
    )]);
    let err = compile(&group).unwrap_err();
    assert_eq!(err.kind(), "invalid_predicate");
}

#[test]
fn test_contains_only_on_strings() {
    let group = ConditionGroup::and(vec![cond(
        "total",
        Operator::Contains,
        vec![Value::Str("1".into())],
    )]);
    assert_eq!(compile(&group).unwrap_err().kind(), "invalid_predicate");
}

#[test]
fn test_contains_folds_wildcards_into_bind() {
    let group = ConditionGroup::and(vec![cond(
        "status",
        Operator::Contains,
        vec![Value::Str("pen".into())],
    )]);
    let (expr, binds) = compile(&group).unwrap();
    assert!(matches!(expr, CondExpr::Like { .. }));
    assert_eq!(binds, vec![Value::Str("%pen%".into())]);
}

#[test]
fn test_null_operand_rejected_in_comparison() {
    let group = ConditionGroup::and(vec![cond("status", Operator::Eq, vec![Value::Null])]);
    let err = compile(&group).unwrap_err();
    assert_eq!(err.kind(), "invalid_predicate");
    assert!(err.to_string().contains("is_null"));
}

#[test]
fn test_is_null_and_is_empty_consume_no_binds() {
    let group = ConditionGroup::and(vec![
        cond("order_date", Operator::IsNull, vec![]),
        cond("status", Operator::IsEmpty, vec![]),
    ]);
    let (expr, binds) = compile(&group).unwrap();
    assert!(binds.is_empty());
    match expr {
        CondExpr::Group { children, .. } => {
            assert!(matches!(children[0], CondExpr::IsNull { .. }));
            assert!(matches!(children[1], CondExpr::IsEmpty { .. }));
        }
        other => panic!("expected group, got {:?}", other),
    }
}

#[test]
fn test_is_null_rejects_operands() {
    let group = ConditionGroup::and(vec![cond("status", Operator::IsNull, vec![Value::Int(1)])]);
    assert_eq!(compile(&group).unwrap_err().kind(), "invalid_predicate");
}

#[test]
fn test_is_empty_on_non_string_degrades_to_is_null() {
    let group = ConditionGroup::and(vec![cond("total", Operator::IsEmpty, vec![])]);
    let (expr, _) = compile(&group).unwrap();
    assert!(matches!(expr, CondExpr::IsNull { .. }));
}

#[test]
fn test_between_reversed_bounds_rejected_not_swapped() {
    let group = ConditionGroup::and(vec![cond(
        "total",
        Operator::Between,
        vec![Value::Int(500), Value::Int(10)],
    )]);
    let err = compile(&group).unwrap_err();
    assert_eq!(err.kind(), "invalid_range");
}

#[test]
fn test_between_requires_exactly_two_operands() {
    let group = ConditionGroup::and(vec![cond(
        "total",
        Operator::Between,
        vec![Value::Int(1)],
    )]);
    assert_eq!(compile(&group).unwrap_err().kind(), "invalid_predicate");
}

#[test]
fn test_in_list_ceiling() {
    let limits = CompilerSettings {
        max_in_operands: 3,
        ..CompilerSettings::default()
    };
    let cat = catalog();
    let compiler = PredicateCompiler::new(&cat, &limits, "sales.orders");
    let mut binds = BindAllocator::new();

    let ok = ConditionGroup::and(vec![cond(
        "total",
        Operator::In,
        vec![Value::Int(1), Value::Int(2), Value::Int(3)],
    )]);
    assert!(compiler.compile(&ok, &mut binds).is_ok());

    let over = ConditionGroup::and(vec![cond(
        "total",
        Operator::In,
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)],
    )]);
    let err = compiler.compile(&over, &mut binds).unwrap_err();
    assert_eq!(err.kind(), "predicate_too_complex");
}

#[test]
fn test_depth_ceiling() {
    let mut group = ConditionGroup::and(vec![cond("total", Operator::Eq, vec![Value::Int(1)])]);
    for _ in 0..10 {
        group = ConditionGroup::and(vec![FilterNode::Group(group)]);
    }
    let err = compile(&group).unwrap_err();
    assert_eq!(err.kind(), "predicate_too_complex");
    assert!(err.to_string().contains("depth"));
}

#[test]
fn test_leaf_ceiling() {
    let leaves: Vec<FilterNode> = (0..65)
        .map(|i| cond("total", Operator::Eq, vec![Value::Int(i)]))
        .collect();
    let err = compile(&ConditionGroup::and(leaves)).unwrap_err();
    assert_eq!(err.kind(), "predicate_too_complex");
}

#[test]
fn test_ordering_operators_rejected_on_strings() {
    let group = ConditionGroup::and(vec![cond(
        "status",
        Operator::Lt,
        vec![Value::Str("a".into())],
    )]);
    assert_eq!(compile(&group).unwrap_err().kind(), "invalid_predicate");
}

#[test]
fn test_post_aggregation_alias_compiles_to_aggregate() {
    let cat = catalog();
    let limits = CompilerSettings::default();
    let compiler = PredicateCompiler::new(&cat, &limits, "sales.orders");
    let mut binds = BindAllocator::new();

    let group_by = vec![cat.resolve_column("sales.orders", "status").unwrap()];
    let measures = vec![(
        "total_amount".to_string(),
        MeasureRef {
            function: AggregateFunction::Sum,
            column: cat.resolve_column("sales.orders", "total").unwrap(),
        },
    )];

    let having = ConditionGroup::and(vec![
        cond("total_amount", Operator::Gt, vec![Value::Int(1000)]),
        cond("status", Operator::Ne, vec![Value::Str("void".into())]),
    ]);
    let expr = compiler
        .compile_post_aggregation(&having, &group_by, &measures, &mut binds)
        .unwrap();
    match expr {
        CondExpr::Group { children, .. } => {
            assert!(matches!(children[0], CondExpr::AggCompare { .. }));
            assert!(matches!(children[1], CondExpr::Compare { .. }));
        }
        other => panic!("expected group, got {:?}", other),
    }
    assert_eq!(
        binds.values(),
        &[Value::Int(1000), Value::Str("void".into())]
    );
}

#[test]
fn test_post_aggregation_unknown_reference() {
    let cat = catalog();
    let limits = CompilerSettings::default();
    let compiler = PredicateCompiler::new(&cat, &limits, "sales.orders");
    let mut binds = BindAllocator::new();

    let group_by = vec![cat.resolve_column("sales.orders", "status").unwrap()];
    let having = ConditionGroup::and(vec![cond("total", Operator::Gt, vec![Value::Int(1)])]);
    let err = compiler
        .compile_post_aggregation(&having, &group_by, &[], &mut binds)
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_aggregated_column");
}

#[test]
fn test_count_alias_compares_as_number() {
    let cat = catalog();
    let limits = CompilerSettings::default();
    let compiler = PredicateCompiler::new(&cat, &limits, "sales.orders");
    let mut binds = BindAllocator::new();

    // COUNT over a string column still compares numerically.
    let measures = vec![(
        "order_count".to_string(),
        MeasureRef {
            function: AggregateFunction::Count,
            column: cat.resolve_column("sales.orders", "status").unwrap(),
        },
    )];
    let having = ConditionGroup::and(vec![cond("order_count", Operator::Ge, vec![Value::Int(5)])]);
    let expr = compiler
        .compile_post_aggregation(&having, &[], &measures, &mut binds)
        .unwrap();
    assert!(matches!(expr, CondExpr::AggCompare { .. }));
}

#[test]
fn test_or_logic_preserved() {
    let group = ConditionGroup::or(vec![
        cond("status", Operator::Eq, vec![Value::Str("a".into())]),
        cond("status", Operator::Eq, vec![Value::Str("b".into())]),
    ]);
    let (expr, _) = compile(&group).unwrap();
    match expr {
        CondExpr::Group { logic, children } => {
            assert_eq!(logic, Logic::Or);
            assert_eq!(children.len(), 2);
        }
        other => panic!("expected or-group, got {:?}", other),
    }
}
