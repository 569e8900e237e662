//! The Merge node: a plan leaf whose whole query routes to one backend or a
//! co-located set of shards.
//!
//! A Merge accumulates WHERE filters, projections, ORDER BY, HAVING and
//! LIMIT, and finally emits one `SELECT` per targeted shard with table
//! factors rewritten to their partition names.

use std::collections::BTreeSet;

use quilt_router::KeyValue;

use crate::ast::{
    ColumnRef, Expr, JoinClause, Limit, Literal, OrderByExpr, SelectStatement, TableRef,
};
use crate::error::{PlanError, PlanResult};
use crate::planner::aggregate::AggregatePlan;
use crate::planner::exprs::{FilterTuple, SelectTuple};
use crate::planner::join::JoinInfo;
use crate::planner::limit::LimitPlan;
use crate::planner::node::{NodeId, PlanCtx, PlanNode, QueryTuple, TableInfo};
use crate::planner::orderby::OrderByPlan;
use crate::planner::tree::{PlanTree, SubPlan};

/// A plan leaf targeting one backend or one co-located shard set.
#[derive(Debug)]
pub struct MergeNode {
    /// The accumulating pushdown query.
    pub sel: SelectStatement,
    /// Tables owned by this leaf.
    pub referred: BTreeSet<String>,
    /// Hash partition count; `0` for global/unresolved.
    pub shard_count: usize,
    /// The partition index a shard-key equality bound this leaf to.
    pub route_index: Option<usize>,
    /// Number of routes to emit; set by route calculation.
    pub route_len: usize,
    /// The single backend, once the leaf routes to exactly one.
    pub backend: Option<String>,
    /// Whether the FROM operand was parenthesized.
    pub has_paren: bool,
    /// Parent node in the plan tree.
    pub parent: Option<NodeId>,
    /// Client-side child plans.
    pub children: PlanTree,
    /// The projection tuples pushed so far.
    pub fields: Vec<SelectTuple>,
    /// Accumulated WHERE predicates (a set: duplicates are dropped).
    pub filters: Vec<Expr>,
    /// The emitted queries, filled by `build_query`.
    pub querys: Vec<QueryTuple>,
}

impl MergeNode {
    pub(crate) fn new(sel: SelectStatement, referred: BTreeSet<String>, shard_count: usize) -> Self {
        Self {
            sel,
            referred,
            shard_count,
            route_index: None,
            route_len: 0,
            backend: None,
            has_paren: false,
            parent: None,
            children: PlanTree::default(),
            fields: Vec::new(),
            filters: Vec::new(),
            querys: Vec::new(),
        }
    }

    /// Adds a WHERE predicate, dropping structural duplicates.
    pub(crate) fn add_filter(&mut self, expr: Expr) {
        if !self.filters.contains(&expr) {
            self.filters.push(expr);
        }
    }
}

/// Converts a literal into a routable key value; `None` when the literal
/// cannot address a shard (e.g. NULL).
pub(crate) fn key_value(literal: &Literal) -> Option<KeyValue> {
    match literal {
        Literal::Integer(i) => Some(KeyValue::Integer(*i)),
        Literal::Float(f) => Some(KeyValue::Float(*f)),
        Literal::String(s) => Some(KeyValue::String(s.clone())),
        Literal::Boolean(b) => Some(KeyValue::Integer(i64::from(*b))),
        Literal::Null => None,
    }
}

/// Whether a filter column names the table's shard key.
pub(crate) fn name_match(col: &ColumnRef, table: &str, shard_key: &str) -> bool {
    col.name == shard_key && col.table.as_deref().map_or(true, |t| t == table)
}

impl PlanCtx<'_> {
    pub(crate) fn merge_push_filter(
        &mut self,
        id: NodeId,
        filters: Vec<FilterTuple>,
    ) -> PlanResult<()> {
        for filter in filters {
            self.try_bind_route(id, &filter)?;
            if let Some(m) = self.arena.merge_mut(id) {
                m.add_filter(filter.expr);
            }
        }
        Ok(())
    }

    /// Binds the merge to a shard when the filter is an equality on a
    /// still-unrouted table's shard key.
    pub(crate) fn try_bind_route(&mut self, id: NodeId, filter: &FilterTuple) -> PlanResult<()> {
        if filter.refer_tables.len() != 1 {
            return Ok(());
        }
        let (Some(col), Some(val)) = (&filter.col, &filter.val) else {
            return Ok(());
        };
        let table = &filter.refer_tables[0];
        let Some(info) = self.tables.get(table) else {
            return Ok(());
        };
        let Some(shard_key) = info.shard_key.clone() else {
            return Ok(());
        };
        let already_routed = self.arena.merge(id).is_some_and(|m| m.route_index.is_some());
        if already_routed || !name_match(col, table, &shard_key) {
            return Ok(());
        }
        let Some(key) = key_value(val) else {
            return Ok(());
        };
        let index = self.router.get_index(&info.database, &info.table_name, &key)?;
        if let Some(m) = self.arena.merge_mut(id) {
            m.route_index = Some(index);
        }
        if let Some(info) = self.tables.get_mut(table) {
            info.bound_index = Some(index);
        }
        Ok(())
    }

    pub(crate) fn merge_calc_route(&mut self, id: NodeId) -> PlanResult<()> {
        let primary = self.merge_primary_table(id).cloned();
        let Some(m) = self.arena.merge_mut(id) else {
            return Ok(());
        };
        match (m.route_index, m.shard_count) {
            (Some(index), _) => {
                m.route_len = 1;
                if let Some(info) = &primary {
                    m.backend = info.segments.get(index).map(|s| s.backend.clone());
                }
            }
            (None, 0) => {
                m.route_len = 1;
                if m.backend.is_none() {
                    if let Some(info) = &primary {
                        m.backend = info.segments.first().map(|s| s.backend.clone());
                    }
                }
            }
            (None, count) => {
                m.route_len = count;
                if count == 1 {
                    if let Some(info) = &primary {
                        m.backend = info.segments.first().map(|s| s.backend.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// The first sharded table owned by the merge, falling back to the first
    /// table.
    pub(crate) fn merge_primary_table(&self, id: NodeId) -> Option<&TableInfo> {
        let m = self.arena.merge(id)?;
        m.referred
            .iter()
            .filter_map(|t| self.tables.get(t))
            .find(|info| info.shard_count > 0)
            .or_else(|| m.referred.iter().filter_map(|t| self.tables.get(t)).next())
    }

    pub(crate) fn merge_push_select_expr(
        &mut self,
        id: NodeId,
        tuple: SelectTuple,
    ) -> PlanResult<usize> {
        let Some(m) = self.arena.merge_mut(id) else {
            return Err(PlanError::ExprInCrossShardJoin(String::new()));
        };
        m.sel.projection.push(tuple.item.clone());
        m.fields.push(tuple);
        Ok(m.fields.len() - 1)
    }

    pub(crate) fn merge_push_select_exprs(
        &mut self,
        id: NodeId,
        fields: &[SelectTuple],
        groups: &[SelectTuple],
        sel: &SelectStatement,
        has_aggregates: bool,
    ) -> PlanResult<()> {
        let route_len = self.arena.merge(id).map_or(0, |m| m.route_len);
        let multi = route_len > 1;
        if multi && sel.distinct {
            return Err(PlanError::DistinctInCrossShard);
        }

        let mut fields = fields.to_vec();
        let mut aggregate = None;
        if multi && (has_aggregates || !groups.is_empty()) {
            let (plan, rewritten) = AggregatePlan::build(&fields, groups)?;
            fields = rewritten;
            aggregate = Some(plan);
        }

        let Some(m) = self.arena.merge_mut(id) else {
            return Ok(());
        };
        m.sel.distinct = sel.distinct;
        m.sel.projection = fields.iter().map(|t| t.item.clone()).collect();
        m.sel.group_by = sel.group_by.clone();
        m.fields = fields;
        if let Some(plan) = aggregate {
            m.children.add(SubPlan::Aggregate(plan));
        }
        Ok(())
    }

    pub(crate) fn merge_push_having(
        &mut self,
        id: NodeId,
        filters: Vec<FilterTuple>,
    ) -> PlanResult<()> {
        if let Some(m) = self.arena.merge_mut(id) {
            for filter in filters {
                m.sel.add_having(filter.expr);
            }
        }
        Ok(())
    }

    pub(crate) fn merge_push_order_by(
        &mut self,
        id: NodeId,
        order_bys: &[OrderByExpr],
        tuples: &[SelectTuple],
    ) -> PlanResult<()> {
        if order_bys.is_empty() {
            return Ok(());
        }
        let route_len = self.arena.merge(id).map_or(0, |m| m.route_len);
        let plan = if route_len > 1 {
            let aliases: BTreeSet<String> = self.tables.keys().cloned().collect();
            Some(OrderByPlan::build(order_bys.to_vec(), tuples, &aliases)?)
        } else {
            None
        };
        if let Some(m) = self.arena.merge_mut(id) {
            m.sel.order_by.extend(order_bys.iter().cloned());
            if let Some(plan) = plan {
                m.children.add(SubPlan::OrderBy(plan));
            }
        }
        Ok(())
    }

    pub(crate) fn merge_push_limit(
        &mut self,
        id: NodeId,
        sel: &SelectStatement,
    ) -> PlanResult<()> {
        let Some(limit) = &sel.limit else {
            return Ok(());
        };
        let route_len = self.arena.merge(id).map_or(0, |m| m.route_len);
        if route_len > 1 {
            let plan = LimitPlan::build(limit)?;
            let pushed = plan.pushdown_limit();
            if let Some(m) = self.arena.merge_mut(id) {
                m.sel.limit = Some(Limit { offset: None, count: Expr::integer(pushed) });
                m.children.add(SubPlan::Limit(plan));
            }
        } else if let Some(m) = self.arena.merge_mut(id) {
            m.sel.limit = Some(limit.clone());
        }
        Ok(())
    }

    pub(crate) fn merge_push_misc(&mut self, id: NodeId, sel: &SelectStatement) {
        if let Some(m) = self.arena.merge_mut(id) {
            m.sel.lock = sel.lock;
        }
    }

    pub(crate) fn merge_build_query(&mut self, id: NodeId) -> PlanResult<()> {
        let (filters, routes) = {
            let Some(m) = self.arena.merge(id) else {
                return Ok(());
            };
            let routes: Vec<usize> = match (m.route_index, m.shard_count) {
                (Some(index), _) => vec![index],
                (None, 0) => vec![0],
                (None, count) => (0..count).collect(),
            };
            (m.filters.clone(), routes)
        };
        if let Some(m) = self.arena.merge_mut(id) {
            for filter in filters {
                m.sel.add_where(filter);
            }
        }

        let primary = self.merge_primary_table(id).cloned();
        let Some(m) = self.arena.merge(id) else {
            return Ok(());
        };
        let mut querys = Vec::with_capacity(routes.len());
        for slot in routes {
            let mut sel = m.sel.clone();
            sel.from = sel.from.iter().map(|r| self.rewrite_table_ref(r, slot)).collect();
            let backend = match (&m.backend, &primary) {
                (Some(backend), _) if m.route_len == 1 => backend.clone(),
                (_, Some(info)) => info
                    .segments
                    .get(slot)
                    .map(|s| s.backend.clone())
                    .unwrap_or_default(),
                _ => String::new(),
            };
            querys.push(QueryTuple {
                query: sel.to_string(),
                backend,
                table: primary.as_ref().map(|p| p.table_name.clone()).unwrap_or_default(),
            });
        }
        if let Some(m) = self.arena.merge_mut(id) {
            m.querys = querys;
        }
        Ok(())
    }

    /// Rewrites a FROM operand for one route slot: sharded tables become
    /// their partition table aliased to the original name, global tables
    /// keep theirs.
    fn rewrite_table_ref(&self, table_ref: &TableRef, slot: usize) -> TableRef {
        match table_ref {
            TableRef::Table { database, name, alias } => {
                let key = alias.as_deref().unwrap_or(name);
                let Some(info) = self.tables.get(key) else {
                    return table_ref.clone();
                };
                if info.shard_count > 0 {
                    let index = info.bound_index.unwrap_or(slot);
                    let partition = info
                        .segments
                        .get(index)
                        .map_or_else(|| info.table_name.clone(), |s| s.table.clone());
                    TableRef::Table {
                        database: Some(info.database.clone()),
                        name: partition,
                        alias: Some(info.alias.clone()),
                    }
                } else {
                    TableRef::Table {
                        database: Some(info.database.clone()),
                        name: info.table_name.clone(),
                        alias: alias.clone(),
                    }
                }
            }
            TableRef::Join(join) => TableRef::Join(Box::new(JoinClause {
                left: self.rewrite_table_ref(&join.left, slot),
                right: self.rewrite_table_ref(&join.right, slot),
                kind: join.kind,
                on: join.on.clone(),
            })),
            TableRef::Nested(inner) => {
                TableRef::Nested(Box::new(self.rewrite_table_ref(inner, slot)))
            }
        }
    }

    /// Fuses two co-routed merges into one, rebuilding FROM and adopting
    /// both sides' tables, filters and route.
    pub(crate) fn merge_routes(
        &mut self,
        left: NodeId,
        right: NodeId,
        join_info: Option<JoinInfo>,
        wheres: Vec<Expr>,
    ) -> PlanResult<NodeId> {
        struct Side {
            from: Vec<TableRef>,
            referred: BTreeSet<String>,
            filters: Vec<Expr>,
            fields: Vec<SelectTuple>,
            shard_count: usize,
            route_index: Option<usize>,
            route_len: usize,
            backend: Option<String>,
            has_paren: bool,
            parent: Option<NodeId>,
        }
        let snapshot = |m: &MergeNode| Side {
            from: m.sel.from.clone(),
            referred: m.referred.clone(),
            filters: m.filters.clone(),
            fields: m.fields.clone(),
            shard_count: m.shard_count,
            route_index: m.route_index,
            route_len: m.route_len,
            backend: m.backend.clone(),
            has_paren: m.has_paren,
            parent: m.parent,
        };
        let (l, r) = match (self.arena.merge(left), self.arena.merge(right)) {
            (Some(l), Some(r)) => (snapshot(l), snapshot(r)),
            _ => return Err(PlanError::ClauseInCrossShardJoin(String::new())),
        };

        let from = match join_info {
            None => {
                let mut from = l.from.clone();
                from.extend(r.from.clone());
                from
            }
            Some(info) => vec![TableRef::Join(Box::new(JoinClause {
                left: join_operand(l.from.clone(), l.has_paren),
                right: join_operand(r.from.clone(), r.has_paren),
                kind: info.kind,
                on: info.on,
            }))],
        };

        // A global side inherits the sharded side's route.
        let (shard_count, route_index, route_len, backend) = if l.shard_count == 0 {
            (r.shard_count, r.route_index, r.route_len, r.backend.or(l.backend))
        } else if r.shard_count == 0 {
            (l.shard_count, l.route_index, l.route_len, l.backend.or(r.backend))
        } else {
            (l.shard_count, l.route_index.or(r.route_index), l.route_len, l.backend.or(r.backend))
        };

        let mut referred = l.referred.clone();
        referred.extend(r.referred.iter().cloned());

        let sel = SelectStatement { from, ..SelectStatement::default() };
        let mut merged = MergeNode::new(sel, referred.clone(), shard_count);
        merged.route_index = route_index;
        merged.route_len = route_len;
        merged.backend = backend;
        // Inherit the collapsed subtree's position; callers relink when the
        // grandparent slot differs.
        merged.parent = l.parent;
        for expr in l.filters.into_iter().chain(r.filters).chain(wheres) {
            merged.add_filter(expr);
        }
        merged.fields = l.fields.into_iter().chain(r.fields).collect();

        let id = self.arena.alloc(PlanNode::Merge(merged));
        for table in &referred {
            if let Some(info) = self.tables.get_mut(table) {
                info.parent = id;
            }
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::LockClause;
    use quilt_router::{hash_segments, Router, TableConfig};

    #[test]
    fn push_misc_is_idempotent() {
        let mut router = Router::new();
        router.add_table(TableConfig::hash(
            "sbtest",
            "t1",
            "id",
            hash_segments("t1", &["backend0"], 2),
        ));
        let mut ctx = PlanCtx::new(&router, "sbtest");
        let root = ctx.scan_table_refs(&[TableRef::table("t1")]).unwrap();

        let sel = SelectStatement {
            lock: Some(LockClause::ForUpdate),
            ..SelectStatement::default()
        };
        ctx.push_misc(root, &sel);
        ctx.push_misc(root, &sel);

        let node = ctx.arena.merge(root).expect("single-table plan is a merge");
        assert_eq!(node.sel.lock, Some(LockClause::ForUpdate));
        assert_eq!(node.sel.to_string().matches("FOR UPDATE").count(), 1);
    }
}

/// Unwraps a merge's FROM list into a single join operand, re-adding the
/// parentheses the source had.
fn join_operand(mut from: Vec<TableRef>, has_paren: bool) -> TableRef {
    debug_assert_eq!(from.len(), 1, "join operands cover exactly one factor");
    let first = if from.is_empty() {
        TableRef::table("")
    } else {
        from.remove(0)
    };
    if has_paren && !matches!(first, TableRef::Nested(_)) {
        TableRef::Nested(Box::new(first))
    } else {
        first
    }
}
