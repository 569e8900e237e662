//! Error types for parsing and planning.
//!
//! Planner failures carry a stable `unsupported:` code followed by a
//! machine-parseable reason; the offending SQL fragment is embedded verbatim.

use thiserror::Error;

use quilt_router::RouterError;

/// Errors that can occur while parsing a query.
#[derive(Debug, Error)]
pub enum ParseError {
    /// An error from the underlying SQL parser.
    #[error("SQL syntax error: {0}")]
    SqlSyntax(String),

    /// A construct outside the planned subset.
    #[error("unsupported feature: {0}")]
    Unsupported(String),

    /// Empty query string.
    #[error("empty query")]
    EmptyQuery,

    /// More than one statement in the input.
    #[error("expected 1 statement, found {0}")]
    MultipleStatements(usize),

    /// The statement kind cannot be planned by this entry point.
    #[error("expected {expected} statement, found {found}")]
    WrongStatement {
        /// The expected statement kind.
        expected: &'static str,
        /// The statement kind actually parsed.
        found: &'static str,
    },
}

impl From<sqlparser::parser::ParserError> for ParseError {
    fn from(err: sqlparser::parser::ParserError) -> Self {
        Self::SqlSyntax(err.to_string())
    }
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors that can occur while planning a query.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Aggregates in a cross-shard join.
    #[error("unsupported: cross-shard.query.with.aggregates")]
    CrossShardAggregates,

    /// A residual filter that cannot be split across the join.
    #[error("unsupported: clause.'{0}'.in.cross-shard.join")]
    ClauseInCrossShardJoin(String),

    /// A left-join ON filter whose target side is itself cross-shard.
    #[error("unsupported: on.clause.'{0}'.in.cross-shard.join")]
    OnClauseInCrossShardJoin(String),

    /// A projected expression straddling both join sides.
    #[error("unsupported: expr.'{0}'.in.cross-shard.join")]
    ExprInCrossShardJoin(String),

    /// A HAVING predicate whose lowest common ancestor is a cross-shard join.
    #[error("unsupported: havings.'{0}'.in.cross-shard.join")]
    HavingInCrossShardJoin(String),

    /// An ORDER BY column missing from the select list.
    #[error("unsupported: orderby[{0}].should.in.select.list")]
    OrderByNotInSelectList(String),

    /// An ORDER BY column qualified by an unknown table.
    #[error("unsupported: unknow.table.in.order.by.field[{table}.{field}]")]
    UnknownTableInOrderBy {
        /// The unknown qualifier.
        table: String,
        /// The ordered column.
        field: String,
    },

    /// A non-column ORDER BY expression.
    #[error("unsupported: orderby.expression.'{0}'")]
    OrderByExpression(String),

    /// A GROUP BY column missing from the select list.
    #[error("unsupported: group.by[{0}].should.in.select.list")]
    GroupByNotInSelectList(String),

    /// A bare `*` projection in a cross-shard query.
    #[error("unsupported: '*'.expression.in.cross-shard.query")]
    WildcardInCrossShard,

    /// An unqualified column in a multi-table clause.
    #[error("unsupported: unknow.column.'{0}'.in.clause")]
    UnknownColumn(String),

    /// A column qualified by a table missing from the FROM clause.
    #[error("unsupported: unknow.table.'{0}'.in.clause")]
    UnknownTable(String),

    /// DISTINCT in a plan spanning shards.
    #[error("unsupported: distinct.in.cross-shard.query")]
    DistinctInCrossShard,

    /// An aggregate that cannot be merged client-side.
    #[error("unsupported: function.'{0}'.in.cross-shard.query")]
    FunctionInCrossShard(String),

    /// An aggregate buried inside a larger expression in a fanned-out query.
    #[error("unsupported: aggregate.expr.'{0}'.in.cross-shard.query")]
    AggregateExpr(String),

    /// An aggregate inside HAVING.
    #[error("unsupported: expr[{0}].in.having.clause")]
    ExprInHavingClause(String),

    /// A table referenced twice under the same name.
    #[error("unsupported: duplicate.table.alias.'{0}'")]
    DuplicateTableAlias(String),

    /// LIMIT/OFFSET with non-integer operands.
    #[error("unsupported: limit.offset.or.counts.should.be.IntVal")]
    LimitNotInt,

    /// INSERT without a column list.
    #[error("unsupported: missing.column.list.in.insert")]
    InsertMissingColumns,

    /// INSERT whose column list omits the shard key.
    #[error("unsupported: shardkey[{0}].missing.in.insert.column.list")]
    InsertMissingShardKey(String),

    /// An INSERT row whose shard-key value is not a literal.
    #[error("unsupported: shardkey.value.in.insert.row[{0}]")]
    InsertBadShardKeyValue(usize),

    /// An INSERT row with the wrong number of values.
    #[error("unsupported: insert.row[{0}].column.count.mismatch")]
    InsertRowArityMismatch(usize),

    /// A parse failure surfaced through planning.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// A route resolution failure.
    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Result type for planning operations.
pub type PlanResult<T> = Result<T, PlanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_unsupported_codes() {
        assert_eq!(
            PlanError::CrossShardAggregates.to_string(),
            "unsupported: cross-shard.query.with.aggregates"
        );
        assert_eq!(
            PlanError::OrderByNotInSelectList("b".to_string()).to_string(),
            "unsupported: orderby[b].should.in.select.list"
        );
        assert_eq!(
            PlanError::UnknownTableInOrderBy { table: "t9".to_string(), field: "a".to_string() }
                .to_string(),
            "unsupported: unknow.table.in.order.by.field[t9.a]"
        );
        assert_eq!(
            PlanError::ClauseInCrossShardJoin("t1.a + t2.a = 3".to_string()).to_string(),
            "unsupported: clause.'t1.a + t2.a = 3'.in.cross-shard.join"
        );
    }
}
