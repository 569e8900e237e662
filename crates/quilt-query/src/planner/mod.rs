//! The cross-shard query planner.
//!
//! # Overview
//!
//! A parsed SELECT becomes a tree of plan nodes: Merge leaves whose queries
//! route to one backend or a co-located shard set, and Join internals
//! combined client-side. A fixed sequence of pushdown passes
//! distributes predicates and projections over the tree, collapses co-routed
//! joins into single leaves, and finally emits one SQL string per targeted
//! shard plus the client-side merge pipeline (aggregate, order-by, limit).
//!
//! Phase order: `push_filter` → `push_equal_cmpr` → `calc_route` →
//! `push_select_exprs` → `push_having` → `push_order_by` → `push_limit` →
//! `push_misc` → `build_query`.

mod aggregate;
mod builder;
mod exprs;
mod insert;
mod join;
mod limit;
mod merge;
mod node;
mod orderby;
mod tree;

pub use aggregate::{AggrType, AggregatePlan, Aggregator};
pub use builder::SelectPlan;
pub use insert::InsertPlan;
pub use join::{Comparison, JoinKey, JoinStrategy};
pub use limit::LimitPlan;
pub use node::QueryTuple;
pub use orderby::{Direction, OrderBy, OrderByPlan};
pub use tree::{PlanTree, PlanType, SubPlan};
