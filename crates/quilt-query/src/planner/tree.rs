//! The ordered child-plan list attached to a plan node.
//!
//! Child plans transform the joined stream before it returns to the client,
//! applied in append order: aggregation first (it must see raw rows), then
//! ordering, then limit.

use std::fmt;

use serde_json::Value;

use crate::planner::aggregate::AggregatePlan;
use crate::planner::limit::LimitPlan;
use crate::planner::orderby::OrderByPlan;

/// The kind of a child plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanType {
    /// Client-side aggregation.
    Aggregate,
    /// Client-side ordering.
    OrderBy,
    /// Client-side limit/offset.
    Limit,
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aggregate => write!(f, "aggregate"),
            Self::OrderBy => write!(f, "orderby"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// One client-side transformation plan.
#[derive(Debug)]
pub enum SubPlan {
    /// Aggregation over the merged stream.
    Aggregate(AggregatePlan),
    /// Ordering of the merged stream.
    OrderBy(OrderByPlan),
    /// Limit/offset applied last.
    Limit(LimitPlan),
}

impl SubPlan {
    /// The plan's kind.
    #[must_use]
    pub const fn plan_type(&self) -> PlanType {
        match self {
            Self::Aggregate(_) => PlanType::Aggregate,
            Self::OrderBy(_) => PlanType::OrderBy,
            Self::Limit(_) => PlanType::Limit,
        }
    }

    /// A JSON description of the plan.
    #[must_use]
    pub fn json(&self) -> Value {
        match self {
            Self::Aggregate(p) => p.json(),
            Self::OrderBy(p) => p.json(),
            Self::Limit(p) => p.json(),
        }
    }
}

/// An ordered, append-only list of child plans.
#[derive(Debug, Default)]
pub struct PlanTree {
    plans: Vec<SubPlan>,
}

impl PlanTree {
    /// Appends a plan.
    pub fn add(&mut self, plan: SubPlan) {
        self.plans.push(plan);
    }

    /// The plans, in application order.
    #[must_use]
    pub fn plans(&self) -> &[SubPlan] {
        &self.plans
    }

    /// Whether any child plan is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// A JSON description of every child plan, in order.
    #[must_use]
    pub fn json(&self) -> Value {
        Value::Array(self.plans.iter().map(SubPlan::json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Limit};

    #[test]
    fn plans_keep_append_order() {
        let mut tree = PlanTree::default();
        assert!(tree.is_empty());
        let limit = Limit { offset: None, count: Expr::integer(5) };
        tree.add(SubPlan::Limit(LimitPlan::build(&limit).unwrap()));
        assert_eq!(tree.plans().len(), 1);
        assert_eq!(tree.plans()[0].plan_type(), PlanType::Limit);
    }
}
