//! Query plan builder: validated specs into immutable execution plans.
//!
//! Building a plan is where every structural rule is enforced and where
//! the two optimizations live:
//!
//! - **Predicate pushdown**: filter subtrees that reference a single
//!   dataset move into that dataset's scan, so joins see pre-filtered
//!   rows. AND groups split per child; an OR group moves only as a whole
//!   and only when all of its leaves target one dataset. The caller's
//!   partition filter is split first so it lands ahead of user filters.
//! - **Join ordering**: joins attached to the primary dataset are
//!   reordered most-selective-first, judged by the filters pushed into
//!   each joined dataset. Joins that hang off another join keep their
//!   relative order and always follow their dependency. The primary
//!   dataset itself never moves; it anchors FROM so outer-join semantics
//!   are preserved.

use std::collections::{HashMap, HashSet};

use crate::catalog::{ColumnRef, SchemaCatalog};
use crate::compile::{BindAllocator, CondExpr, MeasureRef, PredicateCompiler};
use crate::config::CompilerSettings;
use crate::error::{QueryError, QueryResult};
use crate::plan::{
    ExecutionPlan, JoinStep, OrderKey, OrderTarget, PlannedMeasure, Projection, RawColumn,
    TableScan,
};
use crate::spec::{
    AggregateFunction, ConditionGroup, FilterNode, JoinSpec, Logic, Operator, QuerySpec,
};

const MAX_ALIAS_LEN: usize = 64;

/// Ceilings the builder enforces.
#[derive(Debug, Clone)]
pub struct PlanLimits {
    /// Hard cap applied to the requested limit; exceeding requests are
    /// clamped and flagged, never rejected.
    pub row_ceiling: u64,
    pub predicate: CompilerSettings,
}

/// Builds [`ExecutionPlan`]s from query specs against a catalog.
pub struct PlanBuilder<'a> {
    catalog: &'a dyn SchemaCatalog,
    limits: PlanLimits,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(catalog: &'a dyn SchemaCatalog, limits: PlanLimits) -> Self {
        PlanBuilder { catalog, limits }
    }

    pub fn build(&self, spec: &QuerySpec) -> QueryResult<ExecutionPlan> {
        if !self.catalog.has_dataset(&spec.dataset) {
            return Err(QueryError::InvalidQuerySpec(format!(
                "unknown primary dataset '{}'",
                spec.dataset
            )));
        }
        let declared = self.validate_joins(spec)?;
        let aggregation = self.resolve_aggregation(spec, &declared)?;
        let raw_columns = self.resolve_raw_columns(spec, &declared, aggregation.as_ref())?;
        let (limit, limit_clamped) = self.validate_pagination(spec)?;

        // The leaf ceiling applies to the whole filter tree; per-scan
        // compilation below only ever sees a slice of it.
        let total_leaves =
            group_leaf_count(&spec.partition_filter) + group_leaf_count(&spec.filter);
        if total_leaves > self.limits.predicate.max_leaves {
            return Err(QueryError::PredicateTooComplex(format!(
                "filter has more than {} conditions",
                self.limits.predicate.max_leaves
            )));
        }

        // Split filters per dataset; partition filter first so its
        // predicates land ahead of user predicates in each scan.
        let mut split = FilterSplit::default();
        self.split_group(&spec.partition_filter, spec, &declared, &mut split)?;
        self.split_group(&spec.filter, spec, &declared, &mut split)?;

        let ordered_joins = order_joins(&spec.joins, &spec.dataset, &split);

        // Table order fixes bind compilation order: primary scan, joined
        // scans in join order, then residual WHERE, then HAVING.
        let mut table_datasets: Vec<&str> = vec![spec.dataset.as_str()];
        for join in &ordered_joins {
            table_datasets.push(join.right_dataset.as_str());
        }

        let mut binds = BindAllocator::new();
        let mut pushed: Vec<CondExpr> = Vec::with_capacity(table_datasets.len());
        for ds in &table_datasets {
            let nodes = split.pushed.get(*ds).cloned().unwrap_or_default();
            let group = ConditionGroup::and(nodes);
            let compiler = PredicateCompiler::new(self.catalog, &self.limits.predicate, ds);
            pushed.push(compiler.compile(&group, &mut binds)?);
        }

        let residual_group = ConditionGroup::and(split.residual);
        let compiler =
            PredicateCompiler::new(self.catalog, &self.limits.predicate, &spec.dataset);
        let where_filter = compiler.compile(&residual_group, &mut binds)?;

        let projection = match &aggregation {
            Some(agg) => Projection::Aggregated {
                group_by: agg
                    .group_by
                    .iter()
                    .map(|c| RawColumn {
                        column: c.clone(),
                        output: c.output_label(),
                    })
                    .collect(),
                measures: agg.measures.clone(),
            },
            None => Projection::Raw(raw_columns),
        };

        let having = match (&spec.post_aggregation_filter, &aggregation) {
            (None, _) => CondExpr::True,
            (Some(_), None) => {
                return Err(QueryError::InvalidQuerySpec(
                    "post-aggregation filter requires an aggregation".into(),
                ))
            }
            (Some(group), Some(agg)) => {
                let measures: Vec<(String, MeasureRef)> = agg
                    .measures
                    .iter()
                    .map(|m| (m.alias.clone(), m.measure.clone()))
                    .collect();
                compiler.compile_post_aggregation(group, &agg.group_by, &measures, &mut binds)?
            }
        };

        let order_by = self.resolve_sort(spec, &declared, aggregation.as_ref())?;

        // Explicit scan projections: only the columns the outer query
        // references, in catalog declaration order. Pushed predicates run
        // inside the scan and need no projection entry.
        let required = required_columns(&projection, &ordered_joins, &where_filter, &order_by);
        let mut tables = Vec::with_capacity(table_datasets.len());
        let mut taken = HashSet::new();
        for (idx, ds) in table_datasets.iter().enumerate() {
            let catalog_cols = self.catalog.list_columns(ds).ok_or_else(|| {
                QueryError::InvalidQuerySpec(format!("unknown dataset '{}'", ds))
            })?;
            let columns: Vec<String> = catalog_cols
                .iter()
                .filter(|c| required.contains(&(c.dataset.clone(), c.name.clone())))
                .map(|c| c.name.clone())
                .collect();
            tables.push(TableScan {
                dataset: (*ds).to_string(),
                alias: make_alias(ds, &mut taken),
                pushed: pushed[idx].clone(),
                columns,
            });
        }

        let joins = ordered_joins
            .iter()
            .enumerate()
            .map(|(i, join)| {
                let on = join
                    .on
                    .iter()
                    .map(|pair| {
                        let left = self.resolve_join_side(&pair.left, &join.left_dataset)?;
                        let right = self.resolve_join_side(&pair.right, &join.right_dataset)?;
                        Ok((left, right))
                    })
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(JoinStep {
                    kind: join.kind,
                    table: i + 1,
                    on,
                })
            })
            .collect::<QueryResult<Vec<_>>>()?;

        Ok(ExecutionPlan {
            tables,
            joins,
            projection,
            where_filter,
            having,
            order_by,
            offset: spec.pagination.offset,
            limit,
            limit_clamped,
            binds: binds.into_values(),
        })
    }

    // ------------------------------------------------------------------
    // Structural validation
    // ------------------------------------------------------------------

    /// Checks the join graph in spec order and returns the declared
    /// dataset set (primary first).
    fn validate_joins(&self, spec: &QuerySpec) -> QueryResult<Vec<String>> {
        let mut placed: Vec<String> = vec![spec.dataset.clone()];
        for join in &spec.joins {
            if !placed.iter().any(|d| d == &join.left_dataset) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "join references '{}' before it is declared",
                    join.left_dataset
                )));
            }
            if placed.iter().any(|d| d == &join.right_dataset) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "dataset '{}' is joined more than once",
                    join.right_dataset
                )));
            }
            if !self.catalog.has_dataset(&join.right_dataset) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "unknown dataset '{}' in join",
                    join.right_dataset
                )));
            }
            if join.on.is_empty() {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "join onto '{}' has no ON condition",
                    join.right_dataset
                )));
            }
            for pair in &join.on {
                let left = self.resolve_join_side(&pair.left, &join.left_dataset)?;
                let right = self.resolve_join_side(&pair.right, &join.right_dataset)?;
                if left.semantic_type != right.semantic_type {
                    return Err(QueryError::InvalidQuerySpec(format!(
                        "join condition compares {} '{}' with {} '{}'",
                        left.semantic_type,
                        left.output_label(),
                        right.semantic_type,
                        right.output_label()
                    )));
                }
            }
            placed.push(join.right_dataset.clone());
        }
        Ok(placed)
    }

    fn resolve_join_side(
        &self,
        path: &crate::spec::ColumnPath,
        side_dataset: &str,
    ) -> QueryResult<ColumnRef> {
        let dataset = path.dataset.as_deref().unwrap_or(side_dataset);
        if dataset != side_dataset {
            return Err(QueryError::InvalidQuerySpec(format!(
                "join column '{}' does not belong to dataset '{}'",
                path, side_dataset
            )));
        }
        self.catalog
            .resolve_column(dataset, &path.name)
            .ok_or_else(|| {
                QueryError::InvalidQuerySpec(format!("unknown join column '{}'", path))
            })
    }

    fn resolve_raw_columns(
        &self,
        spec: &QuerySpec,
        declared: &[String],
        aggregation: Option<&AggregationPlan>,
    ) -> QueryResult<Vec<RawColumn>> {
        if let Some(agg) = aggregation {
            // With an aggregation the output schema is group-by columns
            // plus measures; raw columns may only repeat group-by entries.
            for path in &spec.columns {
                let col = self.resolve_projection_column(path, spec, declared)?;
                if !agg.group_by.contains(&col) {
                    return Err(QueryError::InvalidQuerySpec(format!(
                        "column '{}' is not part of the group-by",
                        path
                    )));
                }
            }
            return Ok(Vec::new());
        }
        if spec.columns.is_empty() {
            return Err(QueryError::InvalidQuerySpec(
                "query selects no columns".into(),
            ));
        }
        let mut out = Vec::with_capacity(spec.columns.len());
        let mut seen = HashSet::new();
        for path in &spec.columns {
            let col = self.resolve_projection_column(path, spec, declared)?;
            let output = col.output_label();
            if !seen.insert(output.clone()) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "column '{}' is selected more than once",
                    output
                )));
            }
            out.push(RawColumn {
                column: col,
                output,
            });
        }
        Ok(out)
    }

    fn resolve_projection_column(
        &self,
        path: &crate::spec::ColumnPath,
        spec: &QuerySpec,
        declared: &[String],
    ) -> QueryResult<ColumnRef> {
        if path.name == "*" {
            return Err(QueryError::InvalidQuerySpec(
                "wildcard projection is not allowed".into(),
            ));
        }
        let dataset = path.dataset.as_deref().unwrap_or(&spec.dataset);
        if !declared.iter().any(|d| d == dataset) {
            return Err(QueryError::InvalidQuerySpec(format!(
                "column '{}' references undeclared dataset '{}'",
                path, dataset
            )));
        }
        self.catalog
            .resolve_column(dataset, &path.name)
            .ok_or_else(|| QueryError::InvalidQuerySpec(format!("unknown column '{}'", path)))
    }

    fn resolve_aggregation(
        &self,
        spec: &QuerySpec,
        declared: &[String],
    ) -> QueryResult<Option<AggregationPlan>> {
        let agg = match &spec.aggregation {
            Some(agg) => agg,
            None => return Ok(None),
        };
        if agg.measures.is_empty() {
            return Err(QueryError::InvalidQuerySpec(
                "aggregation declares no measures".into(),
            ));
        }
        let mut group_by = Vec::with_capacity(agg.group_by.len());
        for path in &agg.group_by {
            group_by.push(self.resolve_projection_column(path, spec, declared)?);
        }
        let mut aliases = HashSet::new();
        let mut measures = Vec::with_capacity(agg.measures.len());
        for measure in &agg.measures {
            check_alias(&measure.alias)?;
            if !aliases.insert(measure.alias.clone()) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "duplicate measure alias '{}'",
                    measure.alias
                )));
            }
            let column = self.resolve_projection_column(&measure.column, spec, declared)?;
            if matches!(
                measure.function,
                AggregateFunction::Sum | AggregateFunction::Avg
            ) && column.semantic_type != crate::spec::SemanticType::Number
            {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "{:?} requires a numeric column, '{}' is {}",
                    measure.function,
                    column.output_label(),
                    column.semantic_type
                )));
            }
            measures.push(PlannedMeasure {
                measure: MeasureRef {
                    function: measure.function,
                    column,
                },
                alias: measure.alias.clone(),
            });
        }
        Ok(Some(AggregationPlan { group_by, measures }))
    }

    fn validate_pagination(&self, spec: &QuerySpec) -> QueryResult<(u64, bool)> {
        if spec.pagination.limit == 0 {
            return Err(QueryError::InvalidQuerySpec(
                "pagination limit must be at least 1".into(),
            ));
        }
        if spec.pagination.limit > self.limits.row_ceiling {
            return Ok((self.limits.row_ceiling, true));
        }
        Ok((spec.pagination.limit, false))
    }

    fn resolve_sort(
        &self,
        spec: &QuerySpec,
        declared: &[String],
        aggregation: Option<&AggregationPlan>,
    ) -> QueryResult<Vec<OrderKey>> {
        let mut keys = Vec::with_capacity(spec.sort.len());
        for sort in &spec.sort {
            let target = match aggregation {
                Some(agg) => {
                    let alias_hit = sort.column.dataset.is_none()
                        && agg.measures.iter().any(|m| m.alias == sort.column.name);
                    if alias_hit {
                        OrderTarget::Alias(sort.column.name.clone())
                    } else {
                        let col = self.resolve_projection_column(&sort.column, spec, declared)?;
                        if !agg.group_by.contains(&col) {
                            return Err(QueryError::InvalidQuerySpec(format!(
                                "sort key '{}' is neither a measure alias nor a group-by column",
                                sort.column
                            )));
                        }
                        OrderTarget::Column(col)
                    }
                }
                None => OrderTarget::Column(self.resolve_projection_column(
                    &sort.column,
                    spec,
                    declared,
                )?),
            };
            keys.push(OrderKey {
                target,
                direction: sort.direction,
            });
        }
        Ok(keys)
    }

    // ------------------------------------------------------------------
    // Pushdown
    // ------------------------------------------------------------------

    fn split_group(
        &self,
        group: &ConditionGroup,
        spec: &QuerySpec,
        declared: &[String],
        split: &mut FilterSplit,
    ) -> QueryResult<()> {
        match group.logic {
            Logic::And => {
                for child in &group.children {
                    match child {
                        FilterNode::Group(sub) if sub.logic == Logic::And => {
                            self.split_group(sub, spec, declared, split)?;
                        }
                        node => self.place_node(node, spec, declared, split)?,
                    }
                }
                Ok(())
            }
            // An OR group only moves as a unit.
            Logic::Or => {
                if group.children.is_empty() {
                    return Ok(());
                }
                self.place_node(&FilterNode::Group(group.clone()), spec, declared, split)
            }
        }
    }

    fn place_node(
        &self,
        node: &FilterNode,
        spec: &QuerySpec,
        declared: &[String],
        split: &mut FilterSplit,
    ) -> QueryResult<()> {
        let mut targets = HashSet::new();
        collect_leaf_datasets(node, &spec.dataset, &mut targets);
        for ds in &targets {
            if !declared.iter().any(|d| d == ds) {
                return Err(QueryError::InvalidQuerySpec(format!(
                    "filter references undeclared dataset '{}'",
                    ds
                )));
            }
        }
        match targets.len() {
            0 => Ok(()),
            1 => {
                let ds = targets.into_iter().next().unwrap_or_default();
                split.pushed.entry(ds).or_default().push(node.clone());
                Ok(())
            }
            _ => {
                split.residual.push(node.clone());
                Ok(())
            }
        }
    }
}

/// Resolved aggregation held during building.
struct AggregationPlan {
    group_by: Vec<ColumnRef>,
    measures: Vec<PlannedMeasure>,
}

#[derive(Default)]
struct FilterSplit {
    pushed: HashMap<String, Vec<FilterNode>>,
    residual: Vec<FilterNode>,
}

fn group_leaf_count(group: &ConditionGroup) -> usize {
    group.children.iter().map(node_leaf_count).sum()
}

fn node_leaf_count(node: &FilterNode) -> usize {
    match node {
        FilterNode::Condition(_) => 1,
        FilterNode::Group(group) => group_leaf_count(group),
    }
}

fn collect_leaf_datasets(node: &FilterNode, primary: &str, out: &mut HashSet<String>) {
    match node {
        FilterNode::Condition(cond) => {
            let ds = cond.column.dataset.as_deref().unwrap_or(primary);
            out.insert(ds.to_string());
        }
        FilterNode::Group(group) => {
            for child in &group.children {
                collect_leaf_datasets(child, primary, out);
            }
        }
    }
}

/// Reorders primary-attached joins most-selective-first; dependent joins
/// keep their relative order and follow everything they depend on.
fn order_joins(joins: &[JoinSpec], primary: &str, split: &FilterSplit) -> Vec<JoinSpec> {
    let mut base: Vec<&JoinSpec> = Vec::new();
    let mut dependent: Vec<&JoinSpec> = Vec::new();
    for join in joins {
        if join.left_dataset == primary {
            base.push(join);
        } else {
            dependent.push(join);
        }
    }
    base.sort_by_key(|j| std::cmp::Reverse(selectivity(split, &j.right_dataset)));
    base.into_iter()
        .chain(dependent.into_iter())
        .cloned()
        .collect()
}

/// Selectivity score of the filters pushed into a dataset: equality-class
/// leaves beat range/match leaves beat nothing, ties broken by leaf count.
fn selectivity(split: &FilterSplit, dataset: &str) -> (u8, usize) {
    let nodes = match split.pushed.get(dataset) {
        Some(nodes) => nodes,
        None => return (0, 0),
    };
    let mut class = 0u8;
    let mut leaves = 0usize;
    for node in nodes {
        score_node(node, &mut class, &mut leaves);
    }
    (class, leaves)
}

fn score_node(node: &FilterNode, class: &mut u8, leaves: &mut usize) {
    match node {
        FilterNode::Condition(cond) => {
            *leaves += 1;
            let leaf_class = match cond.operator {
                Operator::Eq | Operator::In | Operator::Between => 2,
                _ => 1,
            };
            *class = (*class).max(leaf_class);
        }
        FilterNode::Group(group) => {
            for child in &group.children {
                score_node(child, class, leaves);
            }
        }
    }
}

fn check_alias(alias: &str) -> QueryResult<()> {
    let mut chars = alias.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let tail_ok = alias.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !head_ok || !tail_ok || alias.len() > MAX_ALIAS_LEN {
        return Err(QueryError::InvalidQuerySpec(format!(
            "invalid measure alias '{}'",
            alias
        )));
    }
    Ok(())
}

fn make_alias(dataset: &str, taken: &mut HashSet<String>) -> String {
    let base: String = dataset
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let mut alias = base.clone();
    let mut n = 1;
    while !taken.insert(alias.clone()) {
        n += 1;
        alias = format!("{}_{}", base, n);
    }
    alias
}

/// Every (dataset, column) the outer query references; scans project
/// exactly these.
fn required_columns(
    projection: &Projection,
    joins: &[JoinSpec],
    where_filter: &CondExpr,
    order_by: &[OrderKey],
) -> HashSet<(String, String)> {
    let mut out = HashSet::new();
    match projection {
        Projection::Raw(cols) => {
            for raw in cols {
                out.insert((raw.column.dataset.clone(), raw.column.name.clone()));
            }
        }
        Projection::Aggregated { group_by, measures } => {
            for raw in group_by {
                out.insert((raw.column.dataset.clone(), raw.column.name.clone()));
            }
            for m in measures {
                out.insert((
                    m.measure.column.dataset.clone(),
                    m.measure.column.name.clone(),
                ));
            }
        }
    }
    for join in joins {
        for pair in &join.on {
            for (path, side) in [
                (&pair.left, join.left_dataset.as_str()),
                (&pair.right, join.right_dataset.as_str()),
            ] {
                let ds = path.dataset.as_deref().unwrap_or(side);
                out.insert((ds.to_string(), path.name.clone()));
            }
        }
    }
    collect_expr_columns(where_filter, &mut out);
    for key in order_by {
        if let OrderTarget::Column(col) = &key.target {
            out.insert((col.dataset.clone(), col.name.clone()));
        }
    }
    out
}

fn collect_expr_columns(expr: &CondExpr, out: &mut HashSet<(String, String)>) {
    match expr {
        CondExpr::True => {}
        CondExpr::Compare { column, .. }
        | CondExpr::Like { column, .. }
        | CondExpr::In { column, .. }
        | CondExpr::Between { column, .. }
        | CondExpr::IsNull { column }
        | CondExpr::IsEmpty { column } => {
            out.insert((column.dataset.clone(), column.name.clone()));
        }
        CondExpr::Group { children, .. } => {
            for child in children {
                collect_expr_columns(child, out);
            }
        }
        CondExpr::AggCompare { measure, .. }
        | CondExpr::AggBetween { measure, .. }
        | CondExpr::AggIn { measure, .. } => {
            out.insert((measure.column.dataset.clone(), measure.column.name.clone()));
        }
    }
}
