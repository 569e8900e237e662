//! The Join node: an internal plan node combining two children that cannot
//! be satisfied by a single backend.
//!
//! Holds the equi-join keys, residual comparisons, left-join null handling,
//! synthesized temporary columns, and the join strategy. The signed `cols`
//! encoding describes client-side row assembly: `-(i+1)` takes field `i`
//! from the left row, `+(i+1)` from the right.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::ast::{
    ColumnRef, Expr, JoinKind, OrderByExpr, SelectItem, SelectStatement,
};
use crate::error::{PlanError, PlanResult};
use crate::planner::aggregate::AggregatePlan;
use crate::planner::exprs::{
    check_is_with_null, check_tb_in_node, expr_refer_tables, find_column_index, FilterTuple,
    JoinTuple, SelectTuple,
};
use crate::planner::limit::LimitPlan;
use crate::planner::merge::key_value;
use crate::planner::node::{NodeId, PlanCtx};
use crate::planner::orderby::OrderByPlan;
use crate::planner::tree::{PlanTree, SubPlan};

/// How the two sides are combined client-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum JoinStrategy {
    /// Nested cartesian product.
    #[default]
    Cartesian,
    /// Sort-merge join over the equi-join keys.
    SortMerge,
}

/// One equi-join key column: its table, field name, and position in the
/// owning child's projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinKey {
    /// The column's field name.
    pub field: String,
    /// The column's table.
    pub table: String,
    /// The column's index in the child node's fields.
    pub index: usize,
}

/// A residual comparison evaluated after the join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comparison {
    /// Operand index in the left child's fields.
    pub left: usize,
    /// Operand index in the right child's fields.
    pub right: usize,
    /// The comparison operator.
    pub operator: String,
    /// Whether the expression's operands belong to the opposite children,
    /// so evaluation must swap them.
    pub exchange: bool,
}

/// The FROM-clause join this node was built from; `None` marks an implicit
/// comma join.
#[derive(Debug, Clone)]
pub struct JoinInfo {
    /// Inner or left.
    pub kind: JoinKind,
    /// The accumulated ON expression.
    pub on: Option<Expr>,
}

/// LEFT JOIN ON-clause predicates beyond the equi-keys, partitioned by side.
#[derive(Debug, Clone, Default)]
pub struct OtherJoin {
    /// Table-independent predicates, gating the right side.
    pub no_tables: Vec<Expr>,
    /// Cross-side residuals.
    pub others: Vec<Expr>,
    /// Left-only predicates, projected as `tmpc_i` booleans.
    pub left: Vec<SelectTuple>,
    /// Right-only predicates, pushed as right-side filters.
    pub right: Vec<FilterTuple>,
}

/// An internal node joining two children client-side.
#[derive(Debug)]
pub struct JoinNode {
    /// The left child.
    pub left: NodeId,
    /// The right child.
    pub right: NodeId,
    /// The chosen strategy, set by `build_query`.
    pub strategy: JoinStrategy,
    /// The originating FROM join; `None` for comma joins.
    pub join_expr: Option<JoinInfo>,
    /// Tables referred to under this node.
    pub referred: BTreeSet<String>,
    /// Whether the FROM operand was parenthesized.
    pub has_paren: bool,
    /// Parent node in the plan tree.
    pub parent: Option<NodeId>,
    /// Client-side child plans.
    pub children: PlanTree,
    /// Signed row-assembly encoding; `-(i+1)` = left field i, `+(i+1)` =
    /// right field i.
    pub cols: Vec<i64>,
    /// The projection tuples pushed so far.
    pub fields: Vec<SelectTuple>,
    /// The equi-join conditions.
    pub join_on: Vec<JoinTuple>,
    /// Per-condition key columns on the left side.
    pub left_keys: Vec<JoinKey>,
    /// Per-condition key columns on the right side.
    pub right_keys: Vec<JoinKey>,
    /// Residual comparisons evaluated after the join.
    pub cmp_filter: Vec<Comparison>,
    /// Whether the left keys include a shard key on a Merge side.
    pub left_unique: bool,
    /// Whether the right keys include a shard key on a Merge side.
    pub right_unique: bool,
    /// Single-table column-vs-literal filters, kept for key-filter building.
    pub table_filter: Vec<FilterTuple>,
    /// Residual predicates evaluated after the join.
    pub other_filter: Vec<Expr>,
    /// Table-independent predicates, broadcast to both children.
    pub no_table_filter: Vec<Expr>,
    /// LEFT JOIN ON residuals.
    pub other_join_on: Option<OtherJoin>,
    /// `IS NULL` tests on right-side columns, evaluated post-join.
    pub right_null: Vec<FilterTuple>,
    /// Whether this is a LEFT JOIN.
    pub is_left_join: bool,
    /// Whether any WHERE filter touches the right side of a LEFT JOIN.
    pub has_right_filter: bool,
    /// Indexes of `tmpc_` columns in the left child's fields.
    pub left_tmp_cols: Vec<usize>,
    /// Indexes of right-null columns in the right child's fields.
    pub right_tmp_cols: Vec<usize>,
    /// Filters constraining a join key, keyed by join-on index.
    pub key_filters: BTreeMap<usize, Vec<FilterTuple>>,
}

impl JoinNode {
    pub(crate) fn new(
        left: NodeId,
        right: NodeId,
        join_expr: Option<JoinInfo>,
        join_on: Vec<JoinTuple>,
        referred: BTreeSet<String>,
    ) -> Self {
        let is_left_join =
            matches!(&join_expr, Some(info) if info.kind == JoinKind::Left);
        Self {
            left,
            right,
            strategy: JoinStrategy::default(),
            join_expr,
            referred,
            has_paren: false,
            parent: None,
            children: PlanTree::default(),
            cols: Vec::new(),
            fields: Vec::new(),
            join_on,
            left_keys: Vec::new(),
            right_keys: Vec::new(),
            cmp_filter: Vec::new(),
            left_unique: false,
            right_unique: false,
            table_filter: Vec::new(),
            other_filter: Vec::new(),
            no_table_filter: Vec::new(),
            other_join_on: None,
            right_null: Vec::new(),
            is_left_join,
            has_right_filter: false,
            left_tmp_cols: Vec::new(),
            right_tmp_cols: Vec::new(),
            key_filters: BTreeMap::new(),
        }
    }
}

/// Replaces every occurrence of one column with another.
pub(crate) fn rewrite_column(expr: &Expr, from: &ColumnRef, to: &ColumnRef) -> Expr {
    match expr {
        Expr::Column(col) if col == from => Expr::Column(to.clone()),
        Expr::Column(_) | Expr::Literal(_) | Expr::Wildcard => expr.clone(),
        Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
            left: Box::new(rewrite_column(left, from, to)),
            op: *op,
            right: Box::new(rewrite_column(right, from, to)),
        },
        Expr::UnaryOp { op, operand } => Expr::UnaryOp {
            op: *op,
            operand: Box::new(rewrite_column(operand, from, to)),
        },
        Expr::IsNull { operand, negated } => Expr::IsNull {
            operand: Box::new(rewrite_column(operand, from, to)),
            negated: *negated,
        },
        Expr::Between { operand, low, high, negated } => Expr::Between {
            operand: Box::new(rewrite_column(operand, from, to)),
            low: Box::new(rewrite_column(low, from, to)),
            high: Box::new(rewrite_column(high, from, to)),
            negated: *negated,
        },
        Expr::InList { operand, list, negated } => Expr::InList {
            operand: Box::new(rewrite_column(operand, from, to)),
            list: list.iter().map(|e| rewrite_column(e, from, to)).collect(),
            negated: *negated,
        },
        Expr::Function(func) => {
            let mut func = func.clone();
            func.args = func.args.iter().map(|e| rewrite_column(e, from, to)).collect();
            Expr::Function(func)
        }
        Expr::Tuple(items) => {
            Expr::Tuple(items.iter().map(|e| rewrite_column(e, from, to)).collect())
        }
    }
}

impl PlanCtx<'_> {
    fn owner_of(&self, table: &str) -> PlanResult<NodeId> {
        self.tables
            .get(table)
            .map(|info| info.parent)
            .ok_or_else(|| PlanError::UnknownTable(table.to_string()))
    }

    /// The lowest common ancestor of a filter's tables under `head`.
    fn filter_lca(&self, head: NodeId, tables: &[String]) -> PlanResult<Option<NodeId>> {
        let mut parent: Option<NodeId> = None;
        for table in tables {
            let owner = self.owner_of(table)?;
            parent = match parent {
                None => Some(owner),
                Some(current) if current != owner => self.find_lca(head, current, owner),
                same => same,
            };
        }
        Ok(parent)
    }

    pub(crate) fn join_push_filter(
        &mut self,
        id: NodeId,
        filters: Vec<FilterTuple>,
    ) -> PlanResult<()> {
        let (right_id, is_left_join) = match self.arena.join(id) {
            Some(j) => (j.right, j.is_left_join),
            None => return Ok(()),
        };
        let right_tbs = self.referred(right_id).clone();
        for filter in filters {
            if filter.refer_tables.is_empty() {
                if let Some(j) = self.arena.join_mut(id) {
                    j.no_table_filter.push(filter.expr);
                }
                continue;
            }
            if is_left_join && check_is_with_null(&filter, &right_tbs) {
                if let Some(j) = self.arena.join_mut(id) {
                    j.right_null.push(filter);
                }
                continue;
            }
            if filter.refer_tables.len() == 1 {
                let owner = self.owner_of(&filter.refer_tables[0])?;
                if filter.col.is_none() {
                    self.set_where_filter(owner, filter.expr.clone());
                } else {
                    self.try_bind_route(owner, &filter)?;
                    if let Some(j) = self.arena.join_mut(id) {
                        j.table_filter.push(filter.clone());
                    }
                }
            } else if let Some(parent) = self.filter_lca(id, &filter.refer_tables)? {
                self.set_where_filter(parent, filter.expr.clone());
            }
            if is_left_join {
                let touched_right = filter.refer_tables.iter().any(|t| right_tbs.contains(t));
                if touched_right {
                    if let Some(j) = self.arena.join_mut(id) {
                        j.has_right_filter = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// Partitions a LEFT JOIN's non-equi ON predicates by side.
    pub(crate) fn set_other_join(&mut self, id: NodeId, filters: Vec<FilterTuple>) {
        let (left_set, right_set) = match self.arena.join(id) {
            Some(j) => (self.referred(j.left).clone(), self.referred(j.right).clone()),
            None => return,
        };
        let mut other = OtherJoin::default();
        let mut i = 0;
        for filter in filters {
            if filter.refer_tables.is_empty() {
                other.no_tables.push(filter.expr);
            } else if check_tb_in_node(&filter.refer_tables, &left_set) {
                let alias = format!("tmpc_{i}");
                other.left.push(SelectTuple {
                    item: SelectItem::Expr { expr: filter.expr, alias: Some(alias.clone()) },
                    field: alias,
                    refer_tables: filter.refer_tables,
                });
                i += 1;
            } else if check_tb_in_node(&filter.refer_tables, &right_set) {
                other.right.push(filter);
            } else {
                other.others.push(filter.expr);
            }
        }
        if let Some(j) = self.arena.join_mut(id) {
            j.other_join_on = Some(other);
        }
    }

    pub(crate) fn do_push_equal_cmpr(
        &mut self,
        mut root: NodeId,
        joins: &[JoinTuple],
    ) -> PlanResult<NodeId> {
        for join in joins {
            if let Some(m) = self.arena.merge_mut(root) {
                m.add_filter(join.expr.clone());
                continue;
            }
            let ltable = join.left.table.as_deref().unwrap_or_default();
            let rtable = join.right.table.as_deref().unwrap_or_default();
            let lp = self.owner_of(ltable)?;
            let rp = self.owner_of(rtable)?;
            let Some(parent) = self.find_lca(root, lp, rp) else {
                continue;
            };
            if let Some(m) = self.arena.merge_mut(parent) {
                m.add_filter(join.expr.clone());
                continue;
            }

            let (left_id, right_id) = match self.arena.join(parent) {
                Some(j) => (j.left, j.right),
                None => continue,
            };
            let oriented = self.check_join_on(left_id, right_id, join)?;

            let both_merges = self.arena.is_merge(left_id) && self.arena.is_merge(right_id);
            if both_merges && self.is_same_shard(&oriented) {
                let (join_expr, table_filter, other_filter, no_table_filter, join_on, node_parent, node_paren) =
                    match self.arena.join(parent) {
                        Some(j) => (
                            j.join_expr.clone(),
                            j.table_filter.clone(),
                            j.other_filter.clone(),
                            j.no_table_filter.clone(),
                            j.join_on.clone(),
                            j.parent,
                            j.has_paren,
                        ),
                        None => continue,
                    };
                let merged = self.merge_routes(left_id, right_id, join_expr.clone(), vec![])?;
                self.set_parent(merged, node_parent);
                self.set_parenthese(merged, node_paren);
                for filter in table_filter {
                    self.set_where_filter(merged, filter.expr);
                }
                for filter in other_filter {
                    self.set_where_filter(merged, filter);
                }
                for filter in no_table_filter {
                    self.set_where_filter(merged, filter);
                }
                if join_expr.is_none() {
                    for on in join_on {
                        self.set_where_filter(merged, on.expr);
                    }
                }
                self.set_where_filter(merged, oriented.expr.clone());

                match node_parent {
                    None => root = merged,
                    Some(grandparent) => {
                        if let Some(gp) = self.arena.join_mut(grandparent) {
                            if gp.left == parent {
                                gp.left = merged;
                            } else if gp.right == parent {
                                gp.right = merged;
                            }
                        }
                    }
                }
                continue;
            }

            if let Some(j) = self.arena.join_mut(parent) {
                if j.is_left_join {
                    // The equality came from WHERE: it must not become a join
                    // key, or it would drop null-padded rows.
                    j.other_filter.push(oriented.expr.clone());
                } else {
                    if let Some(info) = &mut j.join_expr {
                        info.on = Some(Expr::conjoin(info.on.take(), oriented.expr.clone()));
                    }
                    j.join_on.push(oriented);
                }
            }
        }
        Ok(root)
    }

    /// Orients an equality so its left column lives under the left child.
    pub(crate) fn check_join_on(
        &self,
        left_id: NodeId,
        right_id: NodeId,
        join: &JoinTuple,
    ) -> PlanResult<JoinTuple> {
        let ltable = join.left.table.as_deref().unwrap_or_default();
        let rtable = join.right.table.as_deref().unwrap_or_default();
        let left_set = self.referred(left_id);
        let right_set = self.referred(right_id);
        if left_set.contains(ltable) && right_set.contains(rtable) {
            Ok(join.clone())
        } else if left_set.contains(rtable) && right_set.contains(ltable) {
            Ok(JoinTuple {
                expr: join.expr.clone(),
                left: join.right.clone(),
                right: join.left.clone(),
            })
        } else {
            Err(PlanError::ClauseInCrossShardJoin(join.expr.to_string()))
        }
    }

    /// Whether the two sides of an oriented equality are co-sharded: both
    /// hash tables, the equality binds both shard keys, and the partition
    /// layouts are identical.
    pub(crate) fn is_same_shard(&self, join: &JoinTuple) -> bool {
        let (Some(ltable), Some(rtable)) = (&join.left.table, &join.right.table) else {
            return false;
        };
        let (Some(l), Some(r)) = (self.tables.get(ltable), self.tables.get(rtable)) else {
            return false;
        };
        l.shard_count > 0
            && r.shard_count > 0
            && l.shard_key.as_deref() == Some(join.left.name.as_str())
            && r.shard_key.as_deref() == Some(join.right.name.as_str())
            && l.segments.len() == r.segments.len()
            && l.segments
                .iter()
                .zip(r.segments.iter())
                .all(|(a, b)| a.backend == b.backend)
    }

    pub(crate) fn join_calc_route(&mut self, id: NodeId) -> PlanResult<NodeId> {
        let table_filter = match self.arena.join(id) {
            Some(j) => j.table_filter.clone(),
            None => return Ok(id),
        };
        for filter in &table_filter {
            if !self.build_key_filter(id, filter, false)? {
                let owner = self.owner_of(&filter.refer_tables[0])?;
                self.set_where_filter(owner, filter.expr.clone());
            }
        }

        let (old_left, old_right) = match self.arena.join(id) {
            Some(j) => (j.left, j.right),
            None => return Ok(id),
        };
        let new_left = self.calc_route(old_left)?;
        let new_right = self.calc_route(old_right)?;
        if let Some(j) = self.arena.join_mut(id) {
            j.left = new_left;
            j.right = new_right;
        }

        let collapse = match (self.arena.merge(new_left), self.arena.merge(new_right)) {
            (Some(l), Some(r)) => {
                (l.backend.is_some() && l.backend == r.backend)
                    || l.shard_count == 0
                    || r.shard_count == 0
            }
            _ => false,
        };
        if !collapse {
            return Ok(id);
        }

        let (join_expr, other_filter, key_filters, no_table_filter, join_on, node_parent, node_paren) =
            match self.arena.join(id) {
                Some(j) => (
                    j.join_expr.clone(),
                    j.other_filter.clone(),
                    j.key_filters.clone(),
                    j.no_table_filter.clone(),
                    j.join_on.clone(),
                    j.parent,
                    j.has_paren,
                ),
                None => return Ok(id),
            };
        let merged = self.merge_routes(new_left, new_right, join_expr.clone(), vec![])?;
        self.set_parent(merged, node_parent);
        self.set_parenthese(merged, node_paren);
        for filter in other_filter {
            self.set_where_filter(merged, filter);
        }
        for filters in key_filters.values() {
            for filter in filters {
                self.set_where_filter(merged, filter.expr.clone());
            }
        }
        for filter in no_table_filter {
            self.set_where_filter(merged, filter);
        }
        if join_expr.is_none() {
            for on in join_on {
                self.set_where_filter(merged, on.expr);
            }
        }
        Ok(merged)
    }

    /// Locates the join-on slot a single-table filter constrains, recording
    /// it under that index; a bound literal also resolves the other side's
    /// shard when the opposite column is its shard key.
    pub(crate) fn build_key_filter(
        &mut self,
        id: NodeId,
        filter: &FilterTuple,
        is_find: bool,
    ) -> PlanResult<bool> {
        let Some(col) = &filter.col else {
            return Ok(is_find);
        };
        let table = col.table.as_deref().unwrap_or(filter.refer_tables[0].as_str());
        let field = col.name.as_str();

        let (left_id, right_id, join_on) = match self.arena.join(id) {
            Some(j) => (j.left, j.right, j.join_on.clone()),
            None => return Ok(is_find),
        };
        let in_left = self.referred(left_id).contains(&filter.refer_tables[0]);
        let mut find = false;

        for (i, on) in join_on.iter().enumerate() {
            let (own, other) = if in_left { (&on.left, &on.right) } else { (&on.right, &on.left) };
            if own.table.as_deref() == Some(table) && own.name == field {
                if let Some(j) = self.arena.join_mut(id) {
                    j.key_filters.entry(i).or_default().push(filter.clone());
                }
                if let Some(val) = &filter.val {
                    self.bind_other_side(other, val)?;
                }
                find = true;
                break;
            }
        }

        let next = if in_left { left_id } else { right_id };
        if !self.arena.is_merge(next) {
            return self.build_key_filter(next, filter, find || is_find);
        }
        Ok(find || is_find)
    }

    /// Resolves the shard index of the opposite join-key column's table.
    fn bind_other_side(&mut self, col: &ColumnRef, val: &crate::ast::Literal) -> PlanResult<()> {
        let Some(table) = &col.table else {
            return Ok(());
        };
        let Some(info) = self.tables.get(table) else {
            return Ok(());
        };
        if info.shard_key.as_deref() != Some(col.name.as_str()) {
            return Ok(());
        }
        let owner = info.parent;
        let routed = self.arena.merge(owner).is_some_and(|m| m.route_index.is_some());
        if routed {
            return Ok(());
        }
        let (database, table_name) = (info.database.clone(), info.table_name.clone());
        let Some(key) = key_value(val) else {
            return Ok(());
        };
        let index = self.router.get_index(&database, &table_name, &key)?;
        if let Some(m) = self.arena.merge_mut(owner) {
            m.route_index = Some(index);
        }
        if let Some(info) = self.tables.get_mut(table) {
            info.bound_index = Some(index);
        }
        Ok(())
    }

    pub(crate) fn join_push_select_exprs(
        &mut self,
        id: NodeId,
        fields: &[SelectTuple],
        groups: &[SelectTuple],
        sel: &SelectStatement,
        has_aggregates: bool,
    ) -> PlanResult<()> {
        if has_aggregates {
            return Err(PlanError::CrossShardAggregates);
        }
        if sel.distinct {
            return Err(PlanError::DistinctInCrossShard);
        }
        if !groups.is_empty() {
            let (plan, _) = AggregatePlan::build(fields, groups)?;
            if let Some(j) = self.arena.join_mut(id) {
                j.children.add(SubPlan::Aggregate(plan));
            }
        }
        self.push_other_join_left(id)?;
        for tuple in fields {
            self.push_select_expr(id, tuple.clone())?;
        }
        self.handle_join_on(id)?;
        self.handle_others(id)
    }

    /// Pushes left-side ON booleans (`tmpc_i`) into left children, pre-order,
    /// so they precede the query's own select fields.
    fn push_other_join_left(&mut self, id: NodeId) -> PlanResult<()> {
        let (left_id, right_id, left_tuples) = match self.arena.join(id) {
            Some(j) => (
                j.left,
                j.right,
                j.other_join_on.as_ref().map(|o| o.left.clone()).unwrap_or_default(),
            ),
            None => return Ok(()),
        };
        for tuple in left_tuples {
            let index = self.push_select_expr(left_id, tuple)?;
            if let Some(j) = self.arena.join_mut(id) {
                j.left_tmp_cols.push(index);
            }
        }
        if !self.arena.is_merge(left_id) {
            self.push_other_join_left(left_id)?;
        }
        if !self.arena.is_merge(right_id) {
            self.push_other_join_left(right_id)?;
        }
        Ok(())
    }

    pub(crate) fn join_push_select_expr(
        &mut self,
        id: NodeId,
        tuple: SelectTuple,
    ) -> PlanResult<usize> {
        let (left_id, right_id) = match self.arena.join(id) {
            Some(j) => (j.left, j.right),
            None => return Err(PlanError::ExprInCrossShardJoin(String::new())),
        };
        let left_set = self.referred(left_id).clone();
        let right_set = self.referred(right_id).clone();

        let signed = if check_tb_in_node(&tuple.refer_tables, &left_set) {
            let index = self.push_select_expr(left_id, tuple.clone())?;
            -(index as i64) - 1
        } else if check_tb_in_node(&tuple.refer_tables, &right_set) {
            let index = self.push_select_expr(right_id, tuple.clone())?;
            index as i64 + 1
        } else {
            return Err(match &tuple.item {
                SelectItem::Wildcard => PlanError::WildcardInCrossShard,
                SelectItem::QualifiedWildcard(t) => {
                    PlanError::ExprInCrossShardJoin(format!("{t}.*"))
                }
                SelectItem::Expr { expr, .. } => {
                    PlanError::ExprInCrossShardJoin(expr.to_string())
                }
            });
        };

        let Some(j) = self.arena.join_mut(id) else {
            return Err(PlanError::ExprInCrossShardJoin(String::new()));
        };
        j.cols.push(signed);
        j.fields.push(tuple);
        Ok(j.fields.len() - 1)
    }

    /// Projects both columns of every join-on equality and records the key
    /// slots; Merge children also get an ascending ORDER BY per key.
    pub(crate) fn handle_join_on(&mut self, id: NodeId) -> PlanResult<()> {
        let (left_id, right_id, join_on) = match self.arena.join(id) {
            Some(j) => (j.left, j.right, j.join_on.clone()),
            None => return Ok(()),
        };
        if !self.arena.is_merge(left_id) {
            self.handle_join_on(left_id)?;
        }
        if !self.arena.is_merge(right_id) {
            self.handle_join_on(right_id)?;
        }

        for on in join_on {
            let left_key = self.build_order_by_key(&on.left, left_id)?;
            if self.arena.is_merge(left_id) {
                let unique = self
                    .tables
                    .get(&left_key.table)
                    .map_or(false, |t| t.shard_key.as_deref() == Some(left_key.field.as_str()));
                if unique {
                    if let Some(j) = self.arena.join_mut(id) {
                        j.left_unique = true;
                    }
                }
            }
            let right_key = self.build_order_by_key(&on.right, right_id)?;
            if self.arena.is_merge(right_id) {
                let unique = self
                    .tables
                    .get(&right_key.table)
                    .map_or(false, |t| t.shard_key.as_deref() == Some(right_key.field.as_str()));
                if unique {
                    if let Some(j) = self.arena.join_mut(id) {
                        j.right_unique = true;
                    }
                }
            }
            if let Some(j) = self.arena.join_mut(id) {
                j.left_keys.push(left_key);
                j.right_keys.push(right_key);
            }
        }
        Ok(())
    }

    /// Ensures the key column is projected by the child (synthesizing it if
    /// absent) and, on a Merge child, appends an ascending ORDER BY on it.
    fn build_order_by_key(&mut self, col: &ColumnRef, node_id: NodeId) -> PlanResult<JoinKey> {
        let index = match find_column_index(self.fields(node_id), col) {
            Some(index) => index,
            None => {
                let tuple = SelectTuple {
                    item: SelectItem::Expr { expr: Expr::Column(col.clone()), alias: None },
                    field: col.name.clone(),
                    refer_tables: vec![col.table.clone().unwrap_or_default()],
                };
                self.push_select_expr(node_id, tuple)?
            }
        };
        if let Some(m) = self.arena.merge_mut(node_id) {
            m.sel.order_by.push(OrderByExpr { expr: Expr::Column(col.clone()), asc: true });
        }
        Ok(JoinKey {
            field: col.name.clone(),
            table: col.table.clone().unwrap_or_default(),
            index,
        })
    }

    /// Handles left-join ON residuals, right-null tests and general residual
    /// comparisons, children first.
    pub(crate) fn handle_others(&mut self, id: NodeId) -> PlanResult<()> {
        let (left_id, right_id) = match self.arena.join(id) {
            Some(j) => (j.left, j.right),
            None => return Ok(()),
        };
        if !self.arena.is_merge(left_id) {
            self.handle_others(left_id)?;
        }
        if !self.arena.is_merge(right_id) {
            self.handle_others(right_id)?;
        }

        let mut idx = 0;
        self.push_other_join(id, &mut idx)?;
        self.push_null_exprs(id, &mut idx)?;
        let others = match self.arena.join(id) {
            Some(j) => j.other_filter.clone(),
            None => return Ok(()),
        };
        self.push_other_filters(id, &others, &mut idx)
    }

    fn push_other_join(&mut self, id: NodeId, idx: &mut usize) -> PlanResult<()> {
        let (right_id, other) = match self.arena.join(id) {
            Some(j) => (j.right, j.other_join_on.clone()),
            None => return Ok(()),
        };
        let Some(other) = other else {
            return Ok(());
        };
        if !other.others.is_empty() {
            self.push_other_filters(id, &other.others, idx)?;
        }
        if !other.no_tables.is_empty() {
            self.set_no_table_filter(right_id, other.no_tables);
        }
        for filter in other.right {
            let parent = self.filter_lca(right_id, &filter.refer_tables)?;
            match parent {
                Some(p) if self.arena.is_merge(p) => {
                    if let Some(m) = self.arena.merge_mut(p) {
                        m.add_filter(filter.expr);
                    }
                }
                _ => {
                    return Err(PlanError::OnClauseInCrossShardJoin(filter.expr.to_string()));
                }
            }
        }
        Ok(())
    }

    fn push_null_exprs(&mut self, id: NodeId, idx: &mut usize) -> PlanResult<()> {
        let (right_id, nulls) = match self.arena.join(id) {
            Some(j) => (j.right, j.right_null.clone()),
            None => return Ok(()),
        };
        for tuple in nulls {
            let index = self.push_other_filter_operand(
                tuple.expr.clone(),
                right_id,
                tuple.refer_tables.clone(),
                idx,
            )?;
            if let Some(j) = self.arena.join_mut(id) {
                j.right_tmp_cols.push(index);
            }
        }
        Ok(())
    }

    /// Splits residual binary comparisons into per-side projected operands.
    fn push_other_filters(
        &mut self,
        id: NodeId,
        exprs: &[Expr],
        idx: &mut usize,
    ) -> PlanResult<()> {
        let (left_id, right_id) = match self.arena.join(id) {
            Some(j) => (j.left, j.right),
            None => return Ok(()),
        };
        for expr in exprs {
            let Expr::BinaryOp { left, op, right } = expr else {
                return Err(PlanError::ClauseInCrossShardJoin(expr.to_string()));
            };
            if !op.is_comparison() {
                return Err(PlanError::ClauseInCrossShardJoin(expr.to_string()));
            }
            let left_tables = expr_refer_tables(left);
            let right_tables = expr_refer_tables(right);
            let left_set = self.referred(left_id).clone();
            let right_set = self.referred(right_id).clone();

            let (lidx, ridx, exchange) = if check_tb_in_node(&left_tables, &left_set)
                && check_tb_in_node(&right_tables, &right_set)
            {
                let lidx =
                    self.push_other_filter_operand((**left).clone(), left_id, left_tables, idx)?;
                let ridx = self.push_other_filter_operand(
                    (**right).clone(),
                    right_id,
                    right_tables,
                    idx,
                )?;
                (lidx, ridx, false)
            } else if check_tb_in_node(&left_tables, &right_set)
                && check_tb_in_node(&right_tables, &left_set)
            {
                let lidx =
                    self.push_other_filter_operand((**right).clone(), left_id, right_tables, idx)?;
                let ridx =
                    self.push_other_filter_operand((**left).clone(), right_id, left_tables, idx)?;
                (lidx, ridx, true)
            } else {
                return Err(PlanError::ClauseInCrossShardJoin(expr.to_string()));
            };

            if let Some(j) = self.arena.join_mut(id) {
                j.cmp_filter.push(Comparison {
                    left: lidx,
                    right: ridx,
                    operator: op.to_string(),
                    exchange,
                });
            }
        }
        Ok(())
    }

    /// Projects one residual operand on its side, reusing an existing column
    /// or synthesizing a `tmpo_k` alias.
    fn push_other_filter_operand(
        &mut self,
        expr: Expr,
        node_id: NodeId,
        tables: Vec<String>,
        idx: &mut usize,
    ) -> PlanResult<usize> {
        if let Expr::Column(col) = &expr {
            if let Some(index) = find_column_index(self.fields(node_id), col) {
                return Ok(index);
            }
        }
        let alias = format!("tmpo_{}", *idx);
        let tuple = SelectTuple {
            item: SelectItem::Expr { expr, alias: Some(alias.clone()) },
            field: alias,
            refer_tables: tables,
        };
        let index = self.push_select_expr(node_id, tuple)?;
        *idx += 1;
        Ok(index)
    }

    pub(crate) fn join_push_having(
        &mut self,
        id: NodeId,
        filters: Vec<FilterTuple>,
    ) -> PlanResult<()> {
        let (left_id, right_id) = match self.arena.join(id) {
            Some(j) => (j.left, j.right),
            None => return Ok(()),
        };
        for filter in filters {
            match filter.refer_tables.len() {
                0 => {
                    self.push_having(left_id, vec![filter.clone()])?;
                    self.push_having(right_id, vec![filter])?;
                }
                1 => {
                    let owner = self.owner_of(&filter.refer_tables[0])?;
                    if let Some(m) = self.arena.merge_mut(owner) {
                        m.sel.add_having(filter.expr);
                    }
                }
                _ => {
                    let parent = self.filter_lca(id, &filter.refer_tables)?;
                    match parent {
                        Some(p) if self.arena.is_merge(p) => {
                            if let Some(m) = self.arena.merge_mut(p) {
                                m.sel.add_having(filter.expr);
                            }
                        }
                        _ => {
                            return Err(PlanError::HavingInCrossShardJoin(
                                filter.expr.to_string(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn join_push_order_by(
        &mut self,
        id: NodeId,
        order_bys: &[OrderByExpr],
        tuples: &[SelectTuple],
    ) -> PlanResult<()> {
        if order_bys.is_empty() {
            return Ok(());
        }
        let aliases: BTreeSet<String> = self.tables.keys().cloned().collect();
        let plan = OrderByPlan::build(order_bys.to_vec(), tuples, &aliases)?;
        if let Some(j) = self.arena.join_mut(id) {
            j.children.add(SubPlan::OrderBy(plan));
        }
        Ok(())
    }

    pub(crate) fn join_push_limit(&mut self, id: NodeId, sel: &SelectStatement) -> PlanResult<()> {
        let Some(limit) = &sel.limit else {
            return Ok(());
        };
        let plan = LimitPlan::build(limit)?;
        if let Some(j) = self.arena.join_mut(id) {
            j.children.add(SubPlan::Limit(plan));
        }
        Ok(())
    }

    pub(crate) fn join_build_query(&mut self, id: NodeId) -> PlanResult<()> {
        let (left_id, right_id, left_keys, right_keys, key_filters, no_table_filter) =
            match self.arena.join_mut(id) {
                Some(j) => {
                    j.strategy = if j.left_keys.is_empty() && j.cmp_filter.is_empty() {
                        JoinStrategy::Cartesian
                    } else {
                        JoinStrategy::SortMerge
                    };
                    (
                        j.left,
                        j.right,
                        j.left_keys.clone(),
                        j.right_keys.clone(),
                        j.key_filters.clone(),
                        j.no_table_filter.clone(),
                    )
                }
                None => return Ok(()),
            };

        self.set_no_table_filter(left_id, no_table_filter.clone());
        self.attach_key_filters(&key_filters, &left_keys)?;
        self.build_query(left_id)?;

        self.set_no_table_filter(right_id, no_table_filter);
        self.attach_key_filters(&key_filters, &right_keys)?;
        self.build_query(right_id)
    }

    /// Rewrites each key filter's column to the side-local key column and
    /// attaches it to the owning Merge; this is how `t1.a = 1` gated on
    /// `t1.a = t2.a` also restricts `t2.a`.
    fn attach_key_filters(
        &mut self,
        key_filters: &BTreeMap<usize, Vec<FilterTuple>>,
        keys: &[JoinKey],
    ) -> PlanResult<()> {
        for (&slot, filters) in key_filters {
            let Some(key) = keys.get(slot) else {
                continue;
            };
            let target = ColumnRef::qualified(key.table.clone(), key.field.clone());
            let owner = self.owner_of(&key.table)?;
            for filter in filters {
                let Some(col) = &filter.col else {
                    continue;
                };
                let rewritten = rewrite_column(&filter.expr, col, &target);
                if let Some(m) = self.arena.merge_mut(owner) {
                    m.add_filter(rewritten);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn rewrite_column_replaces_qualifier() {
        let expr = Expr::column("t1", "a").eq(Expr::integer(1));
        let from = ColumnRef::qualified("t1", "a");
        let to = ColumnRef::qualified("t2", "a");
        assert_eq!(rewrite_column(&expr, &from, &to).to_string(), "t2.a = 1");
    }

    #[test]
    fn rewrite_column_leaves_other_columns() {
        let expr = Expr::column("t1", "a").eq(Expr::column("t1", "b"));
        let from = ColumnRef::qualified("t1", "a");
        let to = ColumnRef::qualified("t2", "a");
        assert_eq!(rewrite_column(&expr, &from, &to).to_string(), "t2.a = t1.b");
    }
}
