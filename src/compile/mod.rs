//! Predicate compiler: filter trees into validated condition expressions.
//!
//! Compilation walks a [`ConditionGroup`] and produces a [`CondExpr`] whose
//! leaves reference resolved [`ColumnRef`]s and numbered bind slots instead
//! of raw strings and inline literals. Everything user-controlled is either
//! validated against the catalog (identifiers) or routed through the bind
//! allocator (values); nothing else reaches the renderer.
//!
//! Validation performed here:
//! - column must resolve in the catalog (`InvalidPredicate`)
//! - operator must be allowed for the column's semantic type
//! - operand count and types must match the operator
//! - `between` bounds must not be reversed (`InvalidRange`)
//! - tree depth, leaf count and IN-list size stay under configured
//!   ceilings (`PredicateTooComplex`)

use crate::catalog::{ColumnRef, SchemaCatalog};
use crate::config::CompilerSettings;
use crate::error::{QueryError, QueryResult};
use crate::spec::{
    AggregateFunction, Condition, ConditionGroup, FilterNode, Logic, Operator, SemanticType, Value,
};

// ============================================================================
// Bind slots
// ============================================================================

/// Index into the query's ordered bind list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindSlot(pub usize);

/// Accumulates operand values in slot order across the whole plan.
#[derive(Debug, Default)]
pub struct BindAllocator {
    values: Vec<Value>,
}

impl BindAllocator {
    pub fn new() -> Self {
        BindAllocator::default()
    }

    /// Registers a value and returns its slot. Slots are dense and ordered.
    pub fn push(&mut self, value: Value) -> BindSlot {
        let slot = BindSlot(self.values.len());
        self.values.push(value);
        slot
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

// ============================================================================
// Compiled expressions
// ============================================================================

/// Plain comparison operator surviving into the compiled tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

/// A resolved aggregate reference used by HAVING predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureRef {
    pub function: AggregateFunction,
    pub column: ColumnRef,
}

impl MeasureRef {
    /// Semantic type of the aggregate's result.
    pub fn result_type(&self) -> SemanticType {
        match self.function {
            AggregateFunction::Count
            | AggregateFunction::DistinctCount
            | AggregateFunction::Sum
            | AggregateFunction::Avg => SemanticType::Number,
            AggregateFunction::Min | AggregateFunction::Max => self.column.semantic_type,
        }
    }
}

/// A compiled, validated condition expression.
///
/// All columns are resolved and all literals live in bind slots. The
/// `Agg*` variants only appear in HAVING position.
#[derive(Debug, Clone, PartialEq)]
pub enum CondExpr {
    /// Always-true predicate (an empty group). Renders as `1 = 1`.
    True,
    Compare {
        column: ColumnRef,
        op: CompareOp,
        slot: BindSlot,
    },
    /// LIKE with the wildcard pattern folded into the bound value.
    Like {
        column: ColumnRef,
        slot: BindSlot,
    },
    In {
        column: ColumnRef,
        slots: Vec<BindSlot>,
    },
    Between {
        column: ColumnRef,
        low: BindSlot,
        high: BindSlot,
    },
    IsNull {
        column: ColumnRef,
    },
    /// NULL-or-empty-string check for string columns.
    IsEmpty {
        column: ColumnRef,
    },
    Group {
        logic: Logic,
        children: Vec<CondExpr>,
    },
    AggCompare {
        measure: MeasureRef,
        op: CompareOp,
        slot: BindSlot,
    },
    AggBetween {
        measure: MeasureRef,
        low: BindSlot,
        high: BindSlot,
    },
    AggIn {
        measure: MeasureRef,
        slots: Vec<BindSlot>,
    },
}

impl CondExpr {
    pub fn is_true(&self) -> bool {
        matches!(self, CondExpr::True)
    }

    /// Leaf count, used by the join-ordering heuristic.
    pub fn leaf_count(&self) -> usize {
        match self {
            CondExpr::True => 0,
            CondExpr::Group { children, .. } => children.iter().map(CondExpr::leaf_count).sum(),
            _ => 1,
        }
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Compiles filter trees against a catalog under configured ceilings.
pub struct PredicateCompiler<'a> {
    catalog: &'a dyn SchemaCatalog,
    limits: &'a CompilerSettings,
    /// Dataset used to resolve unqualified column paths.
    default_dataset: &'a str,
}

impl<'a> PredicateCompiler<'a> {
    pub fn new(
        catalog: &'a dyn SchemaCatalog,
        limits: &'a CompilerSettings,
        default_dataset: &'a str,
    ) -> Self {
        PredicateCompiler {
            catalog,
            limits,
            default_dataset,
        }
    }

    /// Compiles a pre-aggregation filter tree.
    pub fn compile(
        &self,
        group: &ConditionGroup,
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        let mut leaves = 0usize;
        self.compile_group(group, binds, 1, &mut leaves)
    }

    /// Compiles a post-aggregation filter tree for HAVING position.
    ///
    /// Leaf columns must name either a measure alias (compiled to an
    /// aggregate comparison) or a group-by column (compiled to a plain
    /// comparison). Anything else is `UnknownAggregatedColumn`.
    pub fn compile_post_aggregation(
        &self,
        group: &ConditionGroup,
        group_by: &[ColumnRef],
        measures: &[(String, MeasureRef)],
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        let mut leaves = 0usize;
        self.compile_having_group(group, group_by, measures, binds, 1, &mut leaves)
    }

    // ------------------------------------------------------------------
    // Pre-aggregation
    // ------------------------------------------------------------------

    fn compile_group(
        &self,
        group: &ConditionGroup,
        binds: &mut BindAllocator,
        depth: usize,
        leaves: &mut usize,
    ) -> QueryResult<CondExpr> {
        self.check_depth(depth)?;
        if group.children.is_empty() {
            return Ok(CondExpr::True);
        }
        let mut children = Vec::with_capacity(group.children.len());
        for node in &group.children {
            let child = match node {
                FilterNode::Condition(cond) => {
                    self.bump_leaves(leaves)?;
                    self.compile_condition(cond, binds)?
                }
                FilterNode::Group(sub) => self.compile_group(sub, binds, depth + 1, leaves)?,
            };
            children.push(child);
        }
        if children.len() == 1 {
            return Ok(children.pop().unwrap_or(CondExpr::True));
        }
        Ok(CondExpr::Group {
            logic: group.logic,
            children,
        })
    }

    fn compile_condition(
        &self,
        cond: &Condition,
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        let column = self.resolve(cond)?;
        self.build_leaf(cond, column, binds)
    }

    fn resolve(&self, cond: &Condition) -> QueryResult<ColumnRef> {
        let dataset = cond
            .column
            .dataset
            .as_deref()
            .unwrap_or(self.default_dataset);
        self.catalog
            .resolve_column(dataset, &cond.column.name)
            .ok_or_else(|| QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: format!("references unknown column in dataset '{}'", dataset),
            })
    }

    // ------------------------------------------------------------------
    // Post-aggregation
    // ------------------------------------------------------------------

    fn compile_having_group(
        &self,
        group: &ConditionGroup,
        group_by: &[ColumnRef],
        measures: &[(String, MeasureRef)],
        binds: &mut BindAllocator,
        depth: usize,
        leaves: &mut usize,
    ) -> QueryResult<CondExpr> {
        self.check_depth(depth)?;
        if group.children.is_empty() {
            return Ok(CondExpr::True);
        }
        let mut children = Vec::with_capacity(group.children.len());
        for node in &group.children {
            let child = match node {
                FilterNode::Condition(cond) => {
                    self.bump_leaves(leaves)?;
                    self.compile_having_leaf(cond, group_by, measures, binds)?
                }
                FilterNode::Group(sub) => {
                    self.compile_having_group(sub, group_by, measures, binds, depth + 1, leaves)?
                }
            };
            children.push(child);
        }
        if children.len() == 1 {
            return Ok(children.pop().unwrap_or(CondExpr::True));
        }
        Ok(CondExpr::Group {
            logic: group.logic,
            children,
        })
    }

    fn compile_having_leaf(
        &self,
        cond: &Condition,
        group_by: &[ColumnRef],
        measures: &[(String, MeasureRef)],
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        // A bare name may address a measure alias.
        if cond.column.dataset.is_none() {
            if let Some((_, measure)) = measures.iter().find(|(a, _)| *a == cond.column.name) {
                return self.build_agg_leaf(cond, measure.clone(), binds);
            }
        }
        // Otherwise it must be one of the group-by columns.
        let dataset = cond
            .column
            .dataset
            .as_deref()
            .unwrap_or(self.default_dataset);
        if let Some(col) = group_by
            .iter()
            .find(|c| c.dataset == dataset && c.name == cond.column.name)
        {
            return self.build_leaf(cond, col.clone(), binds);
        }
        Err(QueryError::UnknownAggregatedColumn {
            column: cond.column.to_string(),
        })
    }

    fn build_agg_leaf(
        &self,
        cond: &Condition,
        measure: MeasureRef,
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        let ty = measure.result_type();
        match cond.operator {
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Gt | Operator::Le
            | Operator::Ge => {
                let value = self.single_operand(cond, ty)?;
                Ok(CondExpr::AggCompare {
                    measure,
                    op: compare_op(cond.operator),
                    slot: binds.push(value),
                })
            }
            Operator::Between => {
                let (low, high) = self.range_operands(cond, ty)?;
                Ok(CondExpr::AggBetween {
                    measure,
                    low: binds.push(low),
                    high: binds.push(high),
                })
            }
            Operator::In => {
                let values = self.in_operands(cond, ty)?;
                let slots = values.into_iter().map(|v| binds.push(v)).collect();
                Ok(CondExpr::AggIn { measure, slots })
            }
            other => Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: other.as_str(),
                reason: "is not allowed on an aggregated measure".into(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Leaf construction and operand validation
    // ------------------------------------------------------------------

    fn build_leaf(
        &self,
        cond: &Condition,
        column: ColumnRef,
        binds: &mut BindAllocator,
    ) -> QueryResult<CondExpr> {
        let ty = column.semantic_type;
        match cond.operator {
            Operator::Eq | Operator::Ne => {
                let value = self.single_operand(cond, ty)?;
                Ok(CondExpr::Compare {
                    column,
                    op: compare_op(cond.operator),
                    slot: binds.push(value),
                })
            }
            Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge => {
                self.require_type(cond, ty, &[SemanticType::Number, SemanticType::Date])?;
                let value = self.single_operand(cond, ty)?;
                Ok(CondExpr::Compare {
                    column,
                    op: compare_op(cond.operator),
                    slot: binds.push(value),
                })
            }
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                self.require_type(cond, ty, &[SemanticType::String])?;
                let value = self.single_operand(cond, ty)?;
                let raw = match value {
                    Value::Str(s) => s,
                    _ => unreachable!("operand type checked above"),
                };
                let pattern = match cond.operator {
                    Operator::Contains => format!("%{}%", escape_like(&raw)),
                    Operator::StartsWith => format!("{}%", escape_like(&raw)),
                    Operator::EndsWith => format!("%{}", escape_like(&raw)),
                    _ => unreachable!(),
                };
                Ok(CondExpr::Like {
                    column,
                    slot: binds.push(Value::Str(pattern)),
                })
            }
            Operator::In => {
                self.require_type(
                    cond,
                    ty,
                    &[SemanticType::String, SemanticType::Number, SemanticType::Date],
                )?;
                let values = self.in_operands(cond, ty)?;
                let slots = values.into_iter().map(|v| binds.push(v)).collect();
                Ok(CondExpr::In { column, slots })
            }
            Operator::Between => {
                self.require_type(cond, ty, &[SemanticType::Number, SemanticType::Date])?;
                let (low, high) = self.range_operands(cond, ty)?;
                Ok(CondExpr::Between {
                    column,
                    low: binds.push(low),
                    high: binds.push(high),
                })
            }
            Operator::IsNull => {
                self.no_operands(cond)?;
                Ok(CondExpr::IsNull { column })
            }
            Operator::IsEmpty => {
                self.no_operands(cond)?;
                match ty {
                    SemanticType::String => Ok(CondExpr::IsEmpty { column }),
                    _ => Ok(CondExpr::IsNull { column }),
                }
            }
        }
    }

    fn single_operand(&self, cond: &Condition, ty: SemanticType) -> QueryResult<Value> {
        if cond.operands.len() != 1 {
            return Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: format!("expects exactly one operand, got {}", cond.operands.len()),
            });
        }
        let value = cond.operands[0].clone();
        self.check_operand_type(cond, &value, ty)?;
        Ok(value)
    }

    fn range_operands(&self, cond: &Condition, ty: SemanticType) -> QueryResult<(Value, Value)> {
        if cond.operands.len() != 2 {
            return Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: format!("expects exactly two operands, got {}", cond.operands.len()),
            });
        }
        let low = cond.operands[0].clone();
        let high = cond.operands[1].clone();
        self.check_operand_type(cond, &low, ty)?;
        self.check_operand_type(cond, &high, ty)?;
        if range_reversed(&low, &high) {
            return Err(QueryError::InvalidRange {
                column: cond.column.to_string(),
            });
        }
        Ok((low, high))
    }

    fn in_operands(&self, cond: &Condition, ty: SemanticType) -> QueryResult<Vec<Value>> {
        if cond.operands.is_empty() {
            return Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: "expects at least one operand".into(),
            });
        }
        if cond.operands.len() > self.limits.max_in_operands {
            return Err(QueryError::PredicateTooComplex(format!(
                "in-list on '{}' has {} operands, ceiling is {}",
                cond.column,
                cond.operands.len(),
                self.limits.max_in_operands
            )));
        }
        for value in &cond.operands {
            self.check_operand_type(cond, value, ty)?;
        }
        Ok(cond.operands.clone())
    }

    fn no_operands(&self, cond: &Condition) -> QueryResult<()> {
        if !cond.operands.is_empty() {
            return Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: "takes no operands".into(),
            });
        }
        Ok(())
    }

    fn check_operand_type(
        &self,
        cond: &Condition,
        value: &Value,
        ty: SemanticType,
    ) -> QueryResult<()> {
        match value.semantic_type() {
            Some(vt) if vt == ty => Ok(()),
            Some(vt) => Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: format!("operand of type {} does not match column type {}", vt, ty),
            }),
            // Explicit nulls go through is_null, not comparison operands.
            None => Err(QueryError::InvalidPredicate {
                column: cond.column.to_string(),
                operator: cond.operator.as_str(),
                reason: "does not accept a null operand, use is_null".into(),
            }),
        }
    }

    fn require_type(
        &self,
        cond: &Condition,
        ty: SemanticType,
        allowed: &[SemanticType],
    ) -> QueryResult<()> {
        if allowed.contains(&ty) {
            return Ok(());
        }
        Err(QueryError::InvalidPredicate {
            column: cond.column.to_string(),
            operator: cond.operator.as_str(),
            reason: format!("is not applicable to a {} column", ty),
        })
    }

    fn check_depth(&self, depth: usize) -> QueryResult<()> {
        if depth > self.limits.max_depth {
            return Err(QueryError::PredicateTooComplex(format!(
                "filter nesting exceeds the maximum depth of {}",
                self.limits.max_depth
            )));
        }
        Ok(())
    }

    fn bump_leaves(&self, leaves: &mut usize) -> QueryResult<()> {
        *leaves += 1;
        if *leaves > self.limits.max_leaves {
            return Err(QueryError::PredicateTooComplex(format!(
                "filter has more than {} conditions",
                self.limits.max_leaves
            )));
        }
        Ok(())
    }
}

fn compare_op(op: Operator) -> CompareOp {
    match op {
        Operator::Eq => CompareOp::Eq,
        Operator::Ne => CompareOp::Ne,
        Operator::Lt => CompareOp::Lt,
        Operator::Gt => CompareOp::Gt,
        Operator::Le => CompareOp::Le,
        Operator::Ge => CompareOp::Ge,
        other => unreachable!("not a comparison operator: {}", other.as_str()),
    }
}

/// Escapes LIKE wildcards in a user-supplied fragment so only the
/// wildcards added by the compiler are active.
fn escape_like(fragment: &str) -> String {
    fragment
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn range_reversed(low: &Value, high: &Value) -> bool {
    match (low, high) {
        (Value::Int(a), Value::Int(b)) => a > b,
        (Value::Float(a), Value::Float(b)) => a > b,
        (Value::Int(a), Value::Float(b)) => (*a as f64) > *b,
        (Value::Float(a), Value::Int(b)) => *a > (*b as f64),
        (Value::Date(a), Value::Date(b)) => a > b,
        (Value::Timestamp(a), Value::Timestamp(b)) => a > b,
        (Value::Date(a), Value::Timestamp(b)) => a.and_hms_opt(0, 0, 0).map_or(false, |t| t > *b),
        (Value::Timestamp(a), Value::Date(b)) => {
            b.and_hms_opt(0, 0, 0).map_or(false, |t| *a > t)
        }
        _ => false,
    }
}
