//! Client-side aggregation over a multi-shard merge stream.
//!
//! Each select-list aggregate is classified into an aggregator the executor
//! combines across shards. `avg` cannot be merged directly, so companion
//! `sum`/`count` columns are pushed right after it and the executor divides.

use serde::Serialize;
use serde_json::Value;

use crate::ast::{Expr, FunctionCall, SelectItem};
use crate::error::{PlanError, PlanResult};
use crate::planner::exprs::{has_aggregates, SelectTuple};

/// How one output column is combined across shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggrType {
    /// Sum of per-shard counts.
    Count,
    /// Sum of per-shard sums.
    Sum,
    /// Minimum of per-shard minimums.
    Min,
    /// Maximum of per-shard maximums.
    Max,
    /// Combined from the companion sum and count columns.
    Avg,
    /// A grouping column.
    Group,
}

/// One aggregated (or grouping) output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Aggregator {
    /// The output field name.
    pub field: String,
    /// The column's index in the pushed projection.
    pub index: usize,
    /// The combination rule.
    #[serde(rename = "type")]
    pub kind: AggrType,
}

/// The client-side aggregation plan.
#[derive(Debug, Serialize)]
pub struct AggregatePlan {
    /// Aggregated columns.
    #[serde(rename = "Aggrs")]
    aggrs: Vec<Aggregator>,
    /// Grouping columns.
    #[serde(rename = "GroupBys")]
    groups: Vec<Aggregator>,
}

impl AggregatePlan {
    /// Classifies the select list, returning the plan and the projection to
    /// push down (with `avg` companions inserted).
    pub(crate) fn build(
        tuples: &[SelectTuple],
        groups: &[SelectTuple],
    ) -> PlanResult<(Self, Vec<SelectTuple>)> {
        let mut aggrs = Vec::new();
        let mut rewritten: Vec<SelectTuple> = Vec::new();

        for tuple in tuples {
            let func = match &tuple.item {
                SelectItem::Expr { expr: Expr::Function(func), .. }
                    if is_aggregate_name(&func.name) =>
                {
                    Some(func.clone())
                }
                SelectItem::Expr { expr, .. } if has_aggregates(expr) => {
                    return Err(PlanError::AggregateExpr(expr.to_string()));
                }
                _ => None,
            };

            let Some(func) = func else {
                rewritten.push(tuple.clone());
                continue;
            };
            if func.distinct {
                return Err(PlanError::FunctionInCrossShard(func.name.clone()));
            }
            let kind = match func.name.as_str() {
                "count" => AggrType::Count,
                "sum" => AggrType::Sum,
                "min" => AggrType::Min,
                "max" => AggrType::Max,
                "avg" => AggrType::Avg,
                other => return Err(PlanError::FunctionInCrossShard(other.to_string())),
            };

            let index = rewritten.len();
            aggrs.push(Aggregator { field: tuple.field.clone(), index, kind });
            rewritten.push(tuple.clone());

            if kind == AggrType::Avg {
                for (companion, companion_kind) in
                    [("sum", AggrType::Sum), ("count", AggrType::Count)]
                {
                    let call = FunctionCall {
                        name: companion.to_string(),
                        args: func.args.clone(),
                        distinct: false,
                    };
                    let expr = Expr::Function(call);
                    let field = expr.to_string();
                    aggrs.push(Aggregator {
                        field: field.clone(),
                        index: rewritten.len(),
                        kind: companion_kind,
                    });
                    rewritten.push(SelectTuple {
                        item: SelectItem::Expr { expr, alias: None },
                        field,
                        refer_tables: tuple.refer_tables.clone(),
                    });
                }
            }
        }

        let mut group_aggrs = Vec::new();
        for group in groups {
            let index = rewritten
                .iter()
                .position(|t| t.field == group.field && t.refer_tables == group.refer_tables)
                .ok_or_else(|| PlanError::GroupByNotInSelectList(group.field.clone()))?;
            group_aggrs.push(Aggregator {
                field: group.field.clone(),
                index,
                kind: AggrType::Group,
            });
        }

        Ok((Self { aggrs, groups: group_aggrs }, rewritten))
    }

    /// The aggregated columns.
    #[must_use]
    pub fn aggregators(&self) -> &[Aggregator] {
        &self.aggrs
    }

    /// The grouping columns.
    #[must_use]
    pub fn groups(&self) -> &[Aggregator] {
        &self.groups
    }

    /// A JSON description of the plan.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::json!({ "type": "aggregate", "plan": self })
    }
}

fn is_aggregate_name(name: &str) -> bool {
    matches!(name, "avg" | "count" | "group_concat" | "max" | "min" | "sum")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    fn tuple_of(expr: Expr, field: &str) -> SelectTuple {
        SelectTuple {
            item: SelectItem::Expr { expr, alias: None },
            field: field.to_string(),
            refer_tables: vec!["t1".to_string()],
        }
    }

    #[test]
    fn classifies_simple_aggregates() {
        let tuples = vec![
            tuple_of(Expr::Function(FunctionCall::new("sum", vec![Expr::column("t1", "a")])), "sum(t1.a)"),
            tuple_of(Expr::column("t1", "b"), "b"),
        ];
        let (plan, rewritten) = AggregatePlan::build(&tuples, &[]).unwrap();
        assert_eq!(plan.aggregators().len(), 1);
        assert_eq!(plan.aggregators()[0].kind, AggrType::Sum);
        assert_eq!(rewritten.len(), 2);
    }

    #[test]
    fn avg_gets_sum_and_count_companions() {
        let tuples =
            vec![tuple_of(Expr::Function(FunctionCall::new("avg", vec![Expr::column("t1", "a")])), "avg(t1.a)")];
        let (plan, rewritten) = AggregatePlan::build(&tuples, &[]).unwrap();
        assert_eq!(rewritten.len(), 3);
        assert_eq!(rewritten[1].field, "sum(t1.a)");
        assert_eq!(rewritten[2].field, "count(t1.a)");
        let kinds: Vec<AggrType> = plan.aggregators().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AggrType::Avg, AggrType::Sum, AggrType::Count]);
    }

    #[test]
    fn group_concat_is_rejected() {
        let tuples = vec![tuple_of(
            Expr::Function(FunctionCall::new("group_concat", vec![Expr::column("t1", "a")])),
            "group_concat(t1.a)",
        )];
        let err = AggregatePlan::build(&tuples, &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unsupported: function.'group_concat'.in.cross-shard.query"
        );
    }

    #[test]
    fn aggregate_inside_expression_is_rejected() {
        let expr = Expr::binary(
            Expr::Function(FunctionCall::new("sum", vec![Expr::column("t1", "a")])),
            crate::ast::BinaryOp::Add,
            Expr::integer(1),
        );
        let tuples = vec![tuple_of(expr, "x")];
        assert!(AggregatePlan::build(&tuples, &[]).is_err());
    }

    #[test]
    fn groups_resolve_to_indexes() {
        let tuples = vec![
            tuple_of(Expr::column("t1", "b"), "b"),
            tuple_of(Expr::Function(FunctionCall::new("count", vec![Expr::Wildcard])), "count(*)"),
        ];
        let groups = vec![tuples[0].clone()];
        let (plan, _) = AggregatePlan::build(&tuples, &groups).unwrap();
        assert_eq!(plan.groups().len(), 1);
        assert_eq!(plan.groups()[0].index, 0);
    }
}
