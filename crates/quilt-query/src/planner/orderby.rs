//! Client-side ordering of the merged stream.
//!
//! Only plain column orderings are supported, and every ordered column must
//! be present in the select list so the executor can sort on it.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::ast::{Expr, OrderByExpr};
use crate::error::{PlanError, PlanResult};
use crate::planner::exprs::{find_tuple, SelectTuple};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One ordering column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderBy {
    /// The ordered field name.
    pub field: String,
    /// The qualifying table, empty when unqualified.
    pub table: String,
    /// Sort direction.
    pub direction: Direction,
}

/// The client-side order-by plan.
#[derive(Debug, Serialize)]
pub struct OrderByPlan {
    /// The ordering columns, major first.
    #[serde(rename = "OrderBy(s)")]
    order_bys: Vec<OrderBy>,
}

impl OrderByPlan {
    /// Validates the ordering against the select list and known tables.
    pub(crate) fn build(
        order_bys: Vec<OrderByExpr>,
        tuples: &[SelectTuple],
        aliases: &BTreeSet<String>,
    ) -> PlanResult<Self> {
        let mut entries = Vec::with_capacity(order_bys.len());
        for order in order_bys {
            let Expr::Column(col) = &order.expr else {
                return Err(PlanError::OrderByExpression(order.expr.to_string()));
            };
            if let Some(table) = &col.table {
                if !aliases.contains(table) {
                    return Err(PlanError::UnknownTableInOrderBy {
                        table: table.clone(),
                        field: col.name.clone(),
                    });
                }
            }
            if find_tuple(tuples, col).is_none() {
                return Err(PlanError::OrderByNotInSelectList(col.name.clone()));
            }
            entries.push(OrderBy {
                field: col.name.clone(),
                table: col.table.clone().unwrap_or_default(),
                direction: if order.asc { Direction::Asc } else { Direction::Desc },
            });
        }
        Ok(Self { order_bys: entries })
    }

    /// The ordering columns.
    #[must_use]
    pub fn order_bys(&self) -> &[OrderBy] {
        &self.order_bys
    }

    /// A JSON description of the plan.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::json!({ "type": "orderby", "plan": self })
    }
}
