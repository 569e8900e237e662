//! Client-side limit/offset.
//!
//! Offset and count must be integer literals. When the query fans out, each
//! backend is asked for `offset + count` rows and the executor applies the
//! real offset after merging.

use serde::Serialize;
use serde_json::Value;

use crate::ast::{Expr, Limit, Literal};
use crate::error::{PlanError, PlanResult};

/// The client-side limit plan.
#[derive(Debug, Serialize)]
pub struct LimitPlan {
    /// Rows to skip after merging.
    #[serde(rename = "Offset")]
    offset: i64,
    /// Rows to return.
    #[serde(rename = "Limit")]
    count: i64,
}

impl LimitPlan {
    /// Extracts integer offset/count from the LIMIT clause.
    pub(crate) fn build(limit: &Limit) -> PlanResult<Self> {
        Ok(Self { offset: int_value(limit.offset.as_ref())?, count: int_value(Some(&limit.count))? })
    }

    /// Rows to skip after merging.
    #[must_use]
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Rows to return after the offset.
    #[must_use]
    pub const fn count(&self) -> i64 {
        self.count
    }

    /// The row count pushed to every backend.
    #[must_use]
    pub const fn pushdown_limit(&self) -> i64 {
        self.offset + self.count
    }

    /// A JSON description of the plan.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::json!({ "type": "limit", "plan": self })
    }
}

fn int_value(expr: Option<&Expr>) -> PlanResult<i64> {
    match expr {
        None => Ok(0),
        Some(Expr::Literal(Literal::Integer(i))) if *i >= 0 => Ok(*i),
        Some(_) => Err(PlanError::LimitNotInt),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_count_extracted() {
        let limit = Limit { offset: Some(Expr::integer(5)), count: Expr::integer(10) };
        let plan = LimitPlan::build(&limit).unwrap();
        assert_eq!(plan.offset(), 5);
        assert_eq!(plan.count(), 10);
        assert_eq!(plan.pushdown_limit(), 15);
    }

    #[test]
    fn non_integer_limit_is_rejected() {
        let limit = Limit { offset: None, count: Expr::column("t", "a") };
        let err = LimitPlan::build(&limit).unwrap_err();
        assert_eq!(err.to_string(), "unsupported: limit.offset.or.counts.should.be.IntVal");
    }
}
