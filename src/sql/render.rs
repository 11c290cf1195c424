//! Plan renderer: execution plans into dialect SQL with ordered binds.
//!
//! Rendering is deterministic: the same plan and dialect always produce
//! the same text and the same bind order. Bind values are emitted in the
//! order their placeholders appear in the text, which is the contract
//! drivers rely on for both `?` and `:p<n>` styles.

use std::collections::HashMap;

use crate::catalog::ColumnRef;
use crate::compile::{CompareOp, CondExpr, MeasureRef};
use crate::error::{QueryError, QueryResult};
use crate::plan::{ExecutionPlan, OrderTarget, Projection, TableScan};
use crate::spec::{AggregateFunction, JoinKind, Logic, SortDirection, Value};
use crate::sql::dialect::{Dialect, SqlDialect};
use crate::sql::token::{Token, TokenStream};

/// A rendered statement: dialect SQL text plus its bind values in
/// placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub text: String,
    pub binds: Vec<Value>,
}

/// Renders the full paginated statement for a plan.
pub fn render(plan: &ExecutionPlan, dialect: Dialect) -> QueryResult<SqlStatement> {
    check_capabilities(plan, dialect)?;
    let ts = statement_tokens(plan, dialect, true);
    Ok(finalize(&ts, plan, dialect))
}

/// Renders the total-count companion statement: the same plan without
/// ordering or pagination, wrapped in `SELECT COUNT(*)`.
pub fn render_count(plan: &ExecutionPlan, dialect: Dialect) -> QueryResult<SqlStatement> {
    check_capabilities(plan, dialect)?;
    let inner = statement_tokens(plan, dialect, false);
    let mut ts = TokenStream::new();
    ts.push(Token::Select)
        .space()
        .push(Token::FunctionName("COUNT".into()))
        .lparen()
        .push(Token::Star)
        .rparen()
        .space()
        .push(Token::As)
        .space()
        .push(Token::Ident("total_rows".into()))
        .space()
        .push(Token::From)
        .space()
        .lparen()
        .append(&inner)
        .rparen()
        .space()
        .push(Token::Ident("sub".into()));
    Ok(finalize(&ts, plan, dialect))
}

fn check_capabilities(plan: &ExecutionPlan, dialect: Dialect) -> QueryResult<()> {
    if !dialect.supports_full_outer_join()
        && plan.joins.iter().any(|j| j.kind == JoinKind::FullOuter)
    {
        return Err(QueryError::DialectUnsupportedOperator {
            operator: "full_outer_join",
            dialect: dialect.dialect().name(),
        });
    }
    if !dialect.supports_boolean_predicates()
        && plan.binds.iter().any(|v| matches!(v, Value::Bool(_)))
    {
        return Err(QueryError::DialectUnsupportedOperator {
            operator: "boolean_predicate",
            dialect: dialect.dialect().name(),
        });
    }
    Ok(())
}

fn finalize(ts: &TokenStream, plan: &ExecutionPlan, dialect: Dialect) -> SqlStatement {
    let (text, slots) = ts.serialize_with_binds(dialect);
    let binds = slots.iter().map(|s| plan.binds[*s].clone()).collect();
    SqlStatement { text, binds }
}

// ============================================================================
// Statement assembly
// ============================================================================

fn statement_tokens(plan: &ExecutionPlan, dialect: Dialect, with_pagination: bool) -> TokenStream {
    let aliases: HashMap<String, String> = plan
        .tables
        .iter()
        .map(|t| (t.dataset.clone(), t.alias.clone()))
        .collect();
    let scope = Scope::Outer(&aliases);

    let mut ts = TokenStream::new();
    ts.push(Token::Select).space();
    push_projection(&mut ts, &plan.projection, scope);

    ts.space().push(Token::From).space();
    push_scan(&mut ts, &plan.tables[0]);

    for join in &plan.joins {
        ts.space();
        match join.kind {
            JoinKind::Inner => {
                ts.push(Token::Inner);
            }
            JoinKind::Left => {
                ts.push(Token::Left);
            }
            JoinKind::Right => {
                ts.push(Token::Right);
            }
            JoinKind::FullOuter => {
                ts.push(Token::Full).space().push(Token::Outer);
            }
        }
        ts.space().push(Token::Join).space();
        push_scan(&mut ts, &plan.tables[join.table]);
        ts.space().push(Token::On).space();
        for (i, (left, right)) in join.on.iter().enumerate() {
            if i > 0 {
                ts.space().push(Token::And).space();
            }
            push_column(&mut ts, left, scope);
            ts.space().push(Token::Eq).space();
            push_column(&mut ts, right, scope);
        }
    }

    if !plan.where_filter.is_true() {
        ts.space().push(Token::Where).space();
        push_cond(&mut ts, &plan.where_filter, scope);
    }

    if let Projection::Aggregated { group_by, .. } = &plan.projection {
        if !group_by.is_empty() {
            ts.space().push(Token::GroupBy).space();
            for (i, raw) in group_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                push_column(&mut ts, &raw.column, scope);
            }
        }
        if !plan.having.is_true() {
            ts.space().push(Token::Having).space();
            push_cond(&mut ts, &plan.having, scope);
        }
    }

    if with_pagination {
        if !plan.order_by.is_empty() {
            ts.space().push(Token::OrderBy).space();
            for (i, key) in plan.order_by.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                match &key.target {
                    OrderTarget::Column(col) => push_column(&mut ts, col, scope),
                    OrderTarget::Alias(alias) => {
                        ts.push(Token::Ident(alias.clone()));
                    }
                }
                ts.space().push(match key.direction {
                    SortDirection::Asc => Token::Asc,
                    SortDirection::Desc => Token::Desc,
                });
            }
        }
        let offset = if plan.offset > 0 {
            Some(plan.offset)
        } else {
            None
        };
        let page = dialect.emit_limit_offset(Some(plan.limit), offset);
        ts.space().append(&page);
    }

    ts
}

fn push_projection(ts: &mut TokenStream, projection: &Projection, scope: Scope<'_>) {
    match projection {
        Projection::Raw(cols) => {
            for (i, raw) in cols.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                push_column(ts, &raw.column, scope);
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(raw.output.clone()));
            }
        }
        Projection::Aggregated { group_by, measures } => {
            let mut first = true;
            for raw in group_by {
                if !first {
                    ts.comma().space();
                }
                first = false;
                push_column(ts, &raw.column, scope);
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(raw.output.clone()));
            }
            for planned in measures {
                if !first {
                    ts.comma().space();
                }
                first = false;
                push_measure(ts, &planned.measure, scope);
                ts.space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(planned.alias.clone()));
            }
        }
    }
}

/// Emits a dataset scan: the bare table when nothing was pushed into it,
/// otherwise a filtered sub-query with an explicit column list.
fn push_scan(ts: &mut TokenStream, scan: &TableScan) {
    if scan.pushed.is_true() {
        push_dataset(ts, &scan.dataset);
        ts.space().push(Token::Ident(scan.alias.clone()));
        return;
    }
    ts.lparen().push(Token::Select).space();
    for (i, col) in scan.columns.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.push(Token::Ident(col.clone()));
    }
    ts.space().push(Token::From).space();
    push_dataset(ts, &scan.dataset);
    ts.space().push(Token::Where).space();
    push_cond(ts, &scan.pushed, Scope::Inner);
    ts.rparen().space().push(Token::Ident(scan.alias.clone()));
}

fn push_dataset(ts: &mut TokenStream, dataset: &str) {
    match dataset.split_once('.') {
        Some((schema, table)) => {
            ts.push(Token::QualifiedIdent {
                qualifier: Some(schema.to_string()),
                name: table.to_string(),
            });
        }
        None => {
            ts.push(Token::Ident(dataset.to_string()));
        }
    }
}

// ============================================================================
// Condition rendering
// ============================================================================

/// Where a condition is being rendered. Inside a scan sub-query columns
/// are bare names against the base table; outside they are qualified
/// with the scan alias.
#[derive(Clone, Copy)]
enum Scope<'a> {
    Inner,
    Outer(&'a HashMap<String, String>),
}

fn push_column(ts: &mut TokenStream, col: &ColumnRef, scope: Scope<'_>) {
    match scope {
        Scope::Inner => {
            ts.push(Token::Ident(col.name.clone()));
        }
        Scope::Outer(aliases) => {
            ts.push(Token::QualifiedIdent {
                qualifier: aliases.get(&col.dataset).cloned(),
                name: col.name.clone(),
            });
        }
    }
}

fn push_measure(ts: &mut TokenStream, measure: &MeasureRef, scope: Scope<'_>) {
    ts.push(Token::FunctionName(measure.function.sql_name().into()));
    ts.lparen();
    if measure.function == AggregateFunction::DistinctCount {
        ts.push(Token::Distinct).space();
    }
    push_column(ts, &measure.column, scope);
    ts.rparen();
}

fn push_compare_op(ts: &mut TokenStream, op: CompareOp) {
    ts.push(match op {
        CompareOp::Eq => Token::Eq,
        CompareOp::Ne => Token::Ne,
        CompareOp::Lt => Token::Lt,
        CompareOp::Gt => Token::Gt,
        CompareOp::Le => Token::Lte,
        CompareOp::Ge => Token::Gte,
    });
}

fn push_cond(ts: &mut TokenStream, expr: &CondExpr, scope: Scope<'_>) {
    match expr {
        CondExpr::True => {
            ts.push(Token::Raw("1 = 1".into()));
        }
        CondExpr::Compare { column, op, slot } => {
            push_column(ts, column, scope);
            ts.space();
            push_compare_op(ts, *op);
            ts.space().push(Token::BindSlot(slot.0));
        }
        CondExpr::Like { column, slot } => {
            push_column(ts, column, scope);
            ts.space()
                .push(Token::Like)
                .space()
                .push(Token::BindSlot(slot.0))
                .space()
                .push(Token::Raw("ESCAPE '\\'".into()));
        }
        CondExpr::In { column, slots } => {
            push_column(ts, column, scope);
            ts.space().push(Token::In).space().lparen();
            for (i, slot) in slots.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::BindSlot(slot.0));
            }
            ts.rparen();
        }
        CondExpr::Between { column, low, high } => {
            push_column(ts, column, scope);
            ts.space()
                .push(Token::Between)
                .space()
                .push(Token::BindSlot(low.0))
                .space()
                .push(Token::And)
                .space()
                .push(Token::BindSlot(high.0));
        }
        CondExpr::IsNull { column } => {
            push_column(ts, column, scope);
            ts.space().push(Token::IsNull);
        }
        CondExpr::IsEmpty { column } => {
            ts.lparen();
            push_column(ts, column, scope);
            ts.space().push(Token::IsNull).space().push(Token::Or).space();
            push_column(ts, column, scope);
            ts.space()
                .push(Token::Eq)
                .space()
                .push(Token::Raw("''".into()));
            ts.rparen();
        }
        CondExpr::Group { logic, children } => {
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    ts.space()
                        .push(match logic {
                            Logic::And => Token::And,
                            Logic::Or => Token::Or,
                        })
                        .space();
                }
                ts.lparen();
                push_cond(ts, child, scope);
                ts.rparen();
            }
        }
        CondExpr::AggCompare { measure, op, slot } => {
            push_measure(ts, measure, scope);
            ts.space();
            push_compare_op(ts, *op);
            ts.space().push(Token::BindSlot(slot.0));
        }
        CondExpr::AggBetween { measure, low, high } => {
            push_measure(ts, measure, scope);
            ts.space()
                .push(Token::Between)
                .space()
                .push(Token::BindSlot(low.0))
                .space()
                .push(Token::And)
                .space()
                .push(Token::BindSlot(high.0));
        }
        CondExpr::AggIn { measure, slots } => {
            push_measure(ts, measure, scope);
            ts.space().push(Token::In).space().lparen();
            for (i, slot) in slots.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::BindSlot(slot.0));
            }
            ts.rparen();
        }
    }
}
