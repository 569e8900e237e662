//! Plan-node arena and the common node operation table.
//!
//! The plan tree is stored as an arena of node records with stable indices;
//! parent back-links and table ownership are `NodeId`s, so a collapse is an
//! index rewrite. Slots abandoned by a collapse stay in the arena but are
//! never referenced again.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use quilt_router::{Router, Segment};

use crate::ast::Expr;
use crate::error::PlanResult;
use crate::planner::exprs::{FilterTuple, JoinTuple, SelectTuple};
use crate::planner::join::JoinNode;
use crate::planner::merge::MergeNode;
use crate::planner::tree::PlanTree;

/// A stable index into the plan-node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Metadata for one referenced table.
///
/// Every table name (alias) appearing in the query maps to exactly one
/// `TableInfo`; `parent` always points at the Merge node currently owning
/// the table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    /// The logical database holding the table.
    pub database: String,
    /// The real table name (not the alias).
    pub table_name: String,
    /// The name the query refers to the table by (alias, or the name).
    pub alias: String,
    /// The sharding column; `None` for global tables.
    pub shard_key: Option<String>,
    /// Number of hash partitions; `0` for global tables.
    pub shard_count: usize,
    /// The table's partition segments, in index order.
    pub segments: Vec<Segment>,
    /// The Merge node currently owning this table.
    pub parent: NodeId,
    /// The partition index a shard-key equality bound this table to.
    pub bound_index: Option<usize>,
}

/// One backend query produced by the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTuple {
    /// The rendered SQL text.
    pub query: String,
    /// The backend to dispatch it to.
    pub backend: String,
    /// The originating logical table.
    pub table: String,
}

/// A plan node: either a pushdown leaf or a client-side join.
#[derive(Debug)]
pub enum PlanNode {
    /// A leaf targeting one backend (or a co-located set of shards).
    Merge(MergeNode),
    /// An internal node joining two children client-side.
    Join(JoinNode),
}

/// The node arena.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: Vec<PlanNode>,
}

impl NodeArena {
    pub(crate) fn alloc(&mut self, node: PlanNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub(crate) fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    pub(crate) fn is_merge(&self, id: NodeId) -> bool {
        matches!(self.node(id), PlanNode::Merge(_))
    }

    pub(crate) fn merge(&self, id: NodeId) -> Option<&MergeNode> {
        match self.node(id) {
            PlanNode::Merge(m) => Some(m),
            PlanNode::Join(_) => None,
        }
    }

    pub(crate) fn merge_mut(&mut self, id: NodeId) -> Option<&mut MergeNode> {
        match self.node_mut(id) {
            PlanNode::Merge(m) => Some(m),
            PlanNode::Join(_) => None,
        }
    }

    pub(crate) fn join(&self, id: NodeId) -> Option<&JoinNode> {
        match self.node(id) {
            PlanNode::Join(j) => Some(j),
            PlanNode::Merge(_) => None,
        }
    }

    pub(crate) fn join_mut(&mut self, id: NodeId) -> Option<&mut JoinNode> {
        match self.node_mut(id) {
            PlanNode::Join(j) => Some(j),
            PlanNode::Merge(_) => None,
        }
    }
}

/// The planning context: arena, table catalog, and the route oracle.
///
/// Every pushdown pass is a method here taking a [`NodeId`]; dispatch over
/// the two node variants is the closed operation table.
pub(crate) struct PlanCtx<'a> {
    pub router: &'a Router,
    pub database: String,
    pub arena: NodeArena,
    pub tables: HashMap<String, TableInfo>,
}

impl<'a> PlanCtx<'a> {
    pub(crate) fn new(router: &'a Router, database: &str) -> Self {
        Self {
            router,
            database: database.to_string(),
            arena: NodeArena::default(),
            tables: HashMap::new(),
        }
    }

    /// The tables referred to under a node.
    pub(crate) fn referred(&self, id: NodeId) -> &BTreeSet<String> {
        match self.arena.node(id) {
            PlanNode::Merge(m) => &m.referred,
            PlanNode::Join(j) => &j.referred,
        }
    }

    /// The node's current projection tuples.
    pub(crate) fn fields(&self, id: NodeId) -> &[SelectTuple] {
        match self.arena.node(id) {
            PlanNode::Merge(m) => &m.fields,
            PlanNode::Join(j) => &j.fields,
        }
    }

    pub(crate) fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) {
        match self.arena.node_mut(id) {
            PlanNode::Merge(m) => m.parent = parent,
            PlanNode::Join(j) => j.parent = parent,
        }
    }

    pub(crate) fn set_parenthese(&mut self, id: NodeId, has_paren: bool) {
        match self.arena.node_mut(id) {
            PlanNode::Merge(m) => m.has_paren = has_paren,
            PlanNode::Join(j) => j.has_paren = has_paren,
        }
    }

    pub(crate) fn children(&self, id: NodeId) -> &PlanTree {
        match self.arena.node(id) {
            PlanNode::Merge(m) => &m.children,
            PlanNode::Join(j) => &j.children,
        }
    }

    /// Attaches a WHERE predicate: Merge nodes collect it for pushdown, Join
    /// nodes keep it as a post-join residual.
    pub(crate) fn set_where_filter(&mut self, id: NodeId, expr: Expr) {
        match self.arena.node_mut(id) {
            PlanNode::Merge(m) => m.add_filter(expr),
            PlanNode::Join(j) => j.other_filter.push(expr),
        }
    }

    /// Attaches table-independent predicates.
    pub(crate) fn set_no_table_filter(&mut self, id: NodeId, exprs: Vec<Expr>) {
        match self.arena.node_mut(id) {
            PlanNode::Merge(m) => {
                for expr in exprs {
                    m.add_filter(expr);
                }
            }
            PlanNode::Join(j) => j.no_table_filter.extend(exprs),
        }
    }

    /// Pushes classified WHERE filters (first pipeline phase).
    pub(crate) fn push_filter(&mut self, id: NodeId, filters: Vec<FilterTuple>) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_push_filter(id, filters)
        } else {
            self.join_push_filter(id, filters)
        }
    }

    /// Pushes cross-table equalities, possibly replacing the root (phase 2).
    pub(crate) fn push_equal_cmpr(
        &mut self,
        root: NodeId,
        joins: &[JoinTuple],
    ) -> PlanResult<NodeId> {
        self.do_push_equal_cmpr(root, joins)
    }

    /// Computes routes, collapsing co-routed joins (phase 3).
    pub(crate) fn calc_route(&mut self, id: NodeId) -> PlanResult<NodeId> {
        if self.arena.is_merge(id) {
            self.merge_calc_route(id)?;
            Ok(id)
        } else {
            self.join_calc_route(id)
        }
    }

    /// Pushes one projected tuple, returning its index in the node's fields.
    pub(crate) fn push_select_expr(
        &mut self,
        id: NodeId,
        tuple: SelectTuple,
    ) -> PlanResult<usize> {
        if self.arena.is_merge(id) {
            self.merge_push_select_expr(id, tuple)
        } else {
            self.join_push_select_expr(id, tuple)
        }
    }

    /// Pushes the parsed select list (fourth pipeline phase).
    pub(crate) fn push_select_exprs(
        &mut self,
        id: NodeId,
        fields: &[SelectTuple],
        groups: &[SelectTuple],
        sel: &crate::ast::SelectStatement,
        has_aggregates: bool,
    ) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_push_select_exprs(id, fields, groups, sel, has_aggregates)
        } else {
            self.join_push_select_exprs(id, fields, groups, sel, has_aggregates)
        }
    }

    /// Pushes the ordering; with no ORDER BY, GROUP BY columns are promoted
    /// to an ascending ordering on join plans.
    pub(crate) fn push_order_by(
        &mut self,
        id: NodeId,
        sel: &crate::ast::SelectStatement,
        tuples: &[SelectTuple],
    ) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_push_order_by(id, &sel.order_by, tuples)
        } else {
            let mut order_bys = sel.order_by.clone();
            if order_bys.is_empty() {
                for group in &sel.group_by {
                    order_bys.push(crate::ast::OrderByExpr { expr: group.clone(), asc: true });
                }
            }
            self.join_push_order_by(id, &order_bys, tuples)
        }
    }

    /// Pushes the LIMIT clause.
    pub(crate) fn push_limit(
        &mut self,
        id: NodeId,
        sel: &crate::ast::SelectStatement,
    ) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_push_limit(id, sel)
        } else {
            self.join_push_limit(id, sel)
        }
    }

    /// Broadcasts miscellaneous trailing clauses (locking) to the leaves.
    pub(crate) fn push_misc(&mut self, id: NodeId, sel: &crate::ast::SelectStatement) {
        let children = match self.arena.node(id) {
            PlanNode::Merge(_) => None,
            PlanNode::Join(j) => Some((j.left, j.right)),
        };
        match children {
            None => self.merge_push_misc(id, sel),
            Some((left, right)) => {
                self.push_misc(left, sel);
                self.push_misc(right, sel);
            }
        }
    }

    /// Pushes HAVING predicates.
    pub(crate) fn push_having(&mut self, id: NodeId, filters: Vec<FilterTuple>) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_push_having(id, filters)
        } else {
            self.join_push_having(id, filters)
        }
    }

    /// Emits the backend query tuples (final phase).
    pub(crate) fn build_query(&mut self, id: NodeId) -> PlanResult<()> {
        if self.arena.is_merge(id) {
            self.merge_build_query(id)
        } else {
            self.join_build_query(id)
        }
    }

    /// Collects the emitted queries, left subtree first.
    pub(crate) fn query_tuples(&self, id: NodeId) -> Vec<QueryTuple> {
        match self.arena.node(id) {
            PlanNode::Merge(m) => m.querys.clone(),
            PlanNode::Join(j) => {
                let mut tuples = self.query_tuples(j.left);
                tuples.extend(self.query_tuples(j.right));
                tuples
            }
        }
    }

    /// Finds the lowest common ancestor of `p1` and `p2` under `head`.
    pub(crate) fn find_lca(&self, head: NodeId, p1: NodeId, p2: NodeId) -> Option<NodeId> {
        if p1 == head || p2 == head {
            return Some(head);
        }
        let join = self.arena.join(head)?;
        let left = self.find_lca(join.left, p1, p2);
        let right = self.find_lca(join.right, p1, p2);
        match (left, right) {
            (Some(_), Some(_)) => Some(head),
            (None, found) => found,
            (found, None) => found,
        }
    }
}
