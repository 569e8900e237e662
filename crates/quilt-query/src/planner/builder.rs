//! The planner driver: FROM scanning and the fixed phase pipeline.
//!
//! `SelectPlan::build` walks the FROM clause into the initial node tree,
//! then runs the passes in order: filters, cross-table equalities, route
//! calculation, select expressions, HAVING, ORDER BY, LIMIT, misc, and
//! finally query emission. The tree is read-only afterwards.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::debug;

use quilt_router::Router;

use crate::ast::{JoinClause, SelectStatement, TableRef};
use crate::error::{ParseError, PlanError, PlanResult};
use crate::parser;
use crate::planner::exprs::{FilterTuple, JoinTuple};
use crate::planner::join::{JoinInfo, JoinNode, JoinStrategy};
use crate::planner::merge::MergeNode;
use crate::planner::node::{NodeId, PlanCtx, PlanNode, QueryTuple, TableInfo};
use crate::planner::tree::PlanTree;

impl PlanCtx<'_> {
    /// Builds the initial node tree from the FROM clause.
    pub(crate) fn scan_table_refs(&mut self, from: &[TableRef]) -> PlanResult<NodeId> {
        let mut refs = from.iter();
        let Some(first) = refs.next() else {
            return Err(ParseError::EmptyQuery.into());
        };
        let mut node = self.scan_table_ref(first)?;
        for table_ref in refs {
            let right = self.scan_table_ref(table_ref)?;
            node = self.join_nodes(node, right, None)?;
        }
        Ok(node)
    }

    fn scan_table_ref(&mut self, table_ref: &TableRef) -> PlanResult<NodeId> {
        match table_ref {
            TableRef::Table { database, name, alias } => {
                let db = database.clone().unwrap_or_else(|| self.database.clone());
                let shard_key = self.router.shard_key(&db, name)?.map(str::to_string);
                let shard_count = self.router.shard_count(&db, name)?;
                let segments = self.router.segments(&db, name)?.to_vec();

                let key = alias.clone().unwrap_or_else(|| name.clone());
                if self.tables.contains_key(&key) {
                    return Err(PlanError::DuplicateTableAlias(key));
                }

                let mut referred = BTreeSet::new();
                referred.insert(key.clone());
                let sel = SelectStatement {
                    from: vec![table_ref.clone()],
                    ..SelectStatement::default()
                };
                let id = self.arena.alloc(PlanNode::Merge(MergeNode::new(
                    sel,
                    referred,
                    shard_count,
                )));
                self.tables.insert(
                    key.clone(),
                    TableInfo {
                        database: db,
                        table_name: name.clone(),
                        alias: key,
                        shard_key,
                        shard_count,
                        segments,
                        parent: id,
                        bound_index: None,
                    },
                );
                Ok(id)
            }
            TableRef::Nested(inner) => {
                let id = self.scan_table_ref(inner)?;
                self.set_parenthese(id, true);
                Ok(id)
            }
            TableRef::Join(clause) => self.scan_join(clause),
        }
    }

    fn scan_join(&mut self, clause: &JoinClause) -> PlanResult<NodeId> {
        let left = self.scan_table_ref(&clause.left)?;
        let right = self.scan_table_ref(&clause.right)?;
        let info = JoinInfo { kind: clause.kind, on: clause.on.clone() };
        self.join_nodes(left, right, Some(info))
    }

    /// Combines two scanned nodes: co-sharded sides fuse immediately, the
    /// rest become a Join node with the ON clause split into equi-join
    /// tuples and side filters.
    fn join_nodes(
        &mut self,
        left: NodeId,
        right: NodeId,
        join_info: Option<JoinInfo>,
    ) -> PlanResult<NodeId> {
        let mut joins: Vec<JoinTuple> = Vec::new();
        let mut others: Vec<FilterTuple> = Vec::new();
        if let Some(info) = &join_info {
            if let Some(on) = &info.on {
                let (filters, raw_joins) = self.parse_where_or_join(on.clone())?;
                others = filters;
                for tuple in raw_joins {
                    // An equality within one side is an ordinary filter.
                    match self.check_join_on(left, right, &tuple) {
                        Ok(oriented) => joins.push(oriented),
                        Err(_) => others.push(self.filter_tuple(tuple.expr)?),
                    }
                }
            }
        }

        let both_merges = self.arena.is_merge(left) && self.arena.is_merge(right);
        if both_merges && joins.iter().any(|join| self.is_same_shard(join)) {
            // The ON clause stays embedded in the rebuilt FROM.
            return self.merge_routes(left, right, join_info, vec![]);
        }

        let mut referred = self.referred(left).clone();
        referred.extend(self.referred(right).iter().cloned());
        let node = JoinNode::new(left, right, join_info, joins, referred);
        let is_left_join = node.is_left_join;
        let id = self.arena.alloc(PlanNode::Join(node));
        self.set_parent(left, Some(id));
        self.set_parent(right, Some(id));

        if !others.is_empty() {
            if is_left_join {
                self.set_other_join(id, others);
            } else {
                self.join_push_filter(id, others)?;
            }
        }
        Ok(id)
    }
}

/// A planned cross-shard SELECT: the node tree plus its child plans, frozen
/// after query emission.
pub struct SelectPlan<'a> {
    ctx: PlanCtx<'a>,
    root: NodeId,
    raw: String,
}

impl<'a> SelectPlan<'a> {
    /// Parses and plans a SELECT against the given router and default
    /// database.
    ///
    /// # Errors
    ///
    /// Returns a parse error, a routing error, or an `unsupported:` planning
    /// error; no partial plan is returned.
    pub fn build(router: &'a Router, database: &str, sql: &str) -> PlanResult<Self> {
        let select = parser::parse_select(sql)?;
        Self::build_from_select(router, database, select, sql.to_string())
    }

    /// Plans an already-parsed SELECT.
    ///
    /// # Errors
    ///
    /// Returns a routing error or an `unsupported:` planning error.
    pub fn build_from_select(
        router: &'a Router,
        database: &str,
        select: SelectStatement,
        raw: String,
    ) -> PlanResult<Self> {
        let mut ctx = PlanCtx::new(router, database);
        let mut root = ctx.scan_table_refs(&select.from)?;

        let (filters, joins) = match select.where_clause.clone() {
            Some(where_clause) => ctx.parse_where_or_join(where_clause)?,
            None => (Vec::new(), Vec::new()),
        };
        ctx.push_filter(root, filters)?;
        root = ctx.push_equal_cmpr(root, &joins)?;
        root = ctx.calc_route(root)?;

        let (fields, has_aggregates) = ctx.parse_select_items(&select.projection)?;
        let groups = ctx.check_group_by(&select.group_by, &fields)?;
        ctx.push_select_exprs(root, &fields, &groups, &select, has_aggregates)?;

        if let Some(having) = select.having.clone() {
            let havings = ctx.parse_having(having)?;
            ctx.push_having(root, havings)?;
        }
        ctx.push_order_by(root, &select, &fields)?;
        ctx.push_limit(root, &select)?;
        ctx.push_misc(root, &select);
        ctx.build_query(root)?;

        let root_kind = match ctx.arena.node(root) {
            PlanNode::Merge(_) => "merge",
            PlanNode::Join(_) => "join",
        };
        debug!(root = root_kind, queries = ctx.query_tuples(root).len(), "select plan built");
        Ok(Self { ctx, root, raw })
    }

    /// The emitted backend queries, left subtree first.
    #[must_use]
    pub fn query_tuples(&self) -> Vec<QueryTuple> {
        self.ctx.query_tuples(self.root)
    }

    /// The client-side child plans attached to the root.
    #[must_use]
    pub fn children(&self) -> &PlanTree {
        self.ctx.children(self.root)
    }

    /// The root join strategy; `None` when the whole query collapsed into a
    /// single Merge.
    #[must_use]
    pub fn strategy(&self) -> Option<JoinStrategy> {
        self.ctx.arena.join(self.root).map(|j| j.strategy)
    }

    /// A JSON description of the plan tree.
    #[must_use]
    pub fn explain(&self) -> Value {
        json!({
            "rawquery": self.raw,
            "plan": self.node_json(self.root),
            "children": self.ctx.children(self.root).json(),
        })
    }

    fn node_json(&self, id: NodeId) -> Value {
        match self.ctx.arena.node(id) {
            PlanNode::Merge(m) => json!({
                "type": "merge",
                "backend": m.backend,
                "routes": m.route_len,
                "fields": m.fields.iter().map(|f| f.field.clone()).collect::<Vec<_>>(),
                "querys": m.querys,
            }),
            PlanNode::Join(j) => json!({
                "type": "join",
                "strategy": j.strategy,
                "cols": j.cols,
                "fields": j.fields.iter().map(|f| f.field.clone()).collect::<Vec<_>>(),
                "leftkeys": j.left_keys,
                "rightkeys": j.right_keys,
                "cmpfilter": j.cmp_filter,
                "leftunique": j.left_unique,
                "rightunique": j.right_unique,
                "hasrightfilter": j.has_right_filter,
                "lefttmpcols": j.left_tmp_cols,
                "righttmpcols": j.right_tmp_cols,
                "left": self.node_json(j.left),
                "right": self.node_json(j.right),
            }),
        }
    }
}
