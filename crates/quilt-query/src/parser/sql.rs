//! Lowering from the `sqlparser` AST to the crate-owned AST.

use sqlparser::ast as sp;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::ast::{
    BinaryOp, ColumnRef, Expr, FunctionCall, InsertStatement, JoinClause, JoinKind, Limit, Literal,
    LockClause, OrderByExpr, SelectItem, SelectStatement, Statement, TableRef, UnaryOp,
};
use crate::error::{ParseError, ParseResult};

/// Parses a single SQL statement.
///
/// # Errors
///
/// Returns an error if the SQL is syntactically invalid, contains multiple
/// statements, or uses a construct outside the planned subset.
pub fn parse_statement(sql: &str) -> ParseResult<Statement> {
    if sql.trim().is_empty() {
        return Err(ParseError::EmptyQuery);
    }
    let dialect = MySqlDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)?;
    if statements.len() != 1 {
        return Err(ParseError::MultipleStatements(statements.len()));
    }
    convert_statement(statements.remove(0))
}

/// Parses a single SELECT statement.
///
/// # Errors
///
/// Returns an error if the input is not a supported SELECT.
pub fn parse_select(sql: &str) -> ParseResult<SelectStatement> {
    match parse_statement(sql)? {
        Statement::Select(select) => Ok(*select),
        other => {
            Err(ParseError::WrongStatement { expected: "SELECT", found: other.kind() })
        }
    }
}

/// Parses a single `INSERT … VALUES` statement.
///
/// # Errors
///
/// Returns an error if the input is not a supported INSERT.
pub fn parse_insert(sql: &str) -> ParseResult<InsertStatement> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => Ok(*insert),
        other => {
            Err(ParseError::WrongStatement { expected: "INSERT", found: other.kind() })
        }
    }
}

fn convert_statement(stmt: sp::Statement) -> ParseResult<Statement> {
    match stmt {
        sp::Statement::Query(query) => {
            Ok(Statement::Select(Box::new(convert_query(*query)?)))
        }
        sp::Statement::Insert(insert) => {
            Ok(Statement::Insert(Box::new(convert_insert(insert)?)))
        }
        other => Err(ParseError::Unsupported(format!("statement: {other}"))),
    }
}

fn convert_query(query: sp::Query) -> ParseResult<SelectStatement> {
    if query.with.is_some() {
        return Err(ParseError::Unsupported("WITH clause".to_string()));
    }

    let mut select = match *query.body {
        sp::SetExpr::Select(select) => convert_select(*select)?,
        other => return Err(ParseError::Unsupported(format!("set expression: {other}"))),
    };

    if let Some(order_by) = query.order_by {
        match order_by.kind {
            sp::OrderByKind::Expressions(exprs) => {
                select.order_by = exprs
                    .into_iter()
                    .map(convert_order_by_expr)
                    .collect::<ParseResult<Vec<_>>>()?;
            }
            sp::OrderByKind::All(_) => {
                return Err(ParseError::Unsupported("ORDER BY ALL".to_string()));
            }
        }
    }

    if let Some(limit_clause) = query.limit_clause {
        select.limit = Some(match limit_clause {
            sp::LimitClause::LimitOffset { limit, offset, .. } => {
                let Some(count) = limit else {
                    return Err(ParseError::Unsupported("OFFSET without LIMIT".to_string()));
                };
                Limit {
                    offset: offset.map(|o| convert_expr(o.value)).transpose()?,
                    count: convert_expr(count)?,
                }
            }
            sp::LimitClause::OffsetCommaLimit { offset, limit } => Limit {
                offset: Some(convert_expr(offset)?),
                count: convert_expr(limit)?,
            },
        });
    }

    if let Some(lock) = query.locks.first() {
        select.lock = Some(match lock.lock_type {
            sp::LockType::Update => LockClause::ForUpdate,
            sp::LockType::Share => LockClause::Share,
        });
    }

    Ok(select)
}

fn convert_select(select: sp::Select) -> ParseResult<SelectStatement> {
    let distinct = match select.distinct {
        None => false,
        Some(sp::Distinct::Distinct) => true,
        Some(sp::Distinct::On(_)) => {
            return Err(ParseError::Unsupported("DISTINCT ON".to_string()));
        }
    };

    let projection = select
        .projection
        .into_iter()
        .map(convert_select_item)
        .collect::<ParseResult<Vec<_>>>()?;

    let from = select
        .from
        .into_iter()
        .map(convert_table_with_joins)
        .collect::<ParseResult<Vec<_>>>()?;

    let where_clause = select.selection.map(convert_expr).transpose()?;

    let group_by = match select.group_by {
        sp::GroupByExpr::Expressions(exprs, _) => {
            exprs.into_iter().map(convert_expr).collect::<ParseResult<Vec<_>>>()?
        }
        sp::GroupByExpr::All(_) => {
            return Err(ParseError::Unsupported("GROUP BY ALL".to_string()));
        }
    };

    let having = select.having.map(convert_expr).transpose()?;

    Ok(SelectStatement {
        distinct,
        projection,
        from,
        where_clause,
        group_by,
        having,
        order_by: vec![],
        limit: None,
        lock: None,
    })
}

fn convert_select_item(item: sp::SelectItem) -> ParseResult<SelectItem> {
    match item {
        sp::SelectItem::UnnamedExpr(expr) => {
            Ok(SelectItem::Expr { expr: convert_expr(expr)?, alias: None })
        }
        sp::SelectItem::ExprWithAlias { expr, alias } => {
            Ok(SelectItem::Expr { expr: convert_expr(expr)?, alias: Some(alias.value) })
        }
        sp::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sp::SelectItem::QualifiedWildcard(kind, _) => match kind {
            sp::SelectItemQualifiedWildcardKind::ObjectName(name) => {
                Ok(SelectItem::QualifiedWildcard(object_name_tail(&name)?))
            }
            sp::SelectItemQualifiedWildcardKind::Expr(_) => {
                Err(ParseError::Unsupported("qualified wildcard on expression".to_string()))
            }
        },
    }
}

fn convert_table_with_joins(twj: sp::TableWithJoins) -> ParseResult<TableRef> {
    let mut result = convert_table_factor(twj.relation)?;

    for join in twj.joins {
        let right = convert_table_factor(join.relation)?;
        let (kind, constraint) = match join.join_operator {
            sp::JoinOperator::Join(c) | sp::JoinOperator::Inner(c) => (JoinKind::Inner, c),
            sp::JoinOperator::Left(c) | sp::JoinOperator::LeftOuter(c) => (JoinKind::Left, c),
            other => {
                return Err(ParseError::Unsupported(format!("join type: {other:?}")));
            }
        };
        let on = match constraint {
            sp::JoinConstraint::On(expr) => Some(convert_expr(expr)?),
            sp::JoinConstraint::None => None,
            sp::JoinConstraint::Using(_) => {
                return Err(ParseError::Unsupported("JOIN … USING".to_string()));
            }
            sp::JoinConstraint::Natural => {
                return Err(ParseError::Unsupported("NATURAL JOIN".to_string()));
            }
        };
        result = TableRef::Join(Box::new(JoinClause { left: result, right, kind, on }));
    }

    Ok(result)
}

fn convert_table_factor(factor: sp::TableFactor) -> ParseResult<TableRef> {
    match factor {
        sp::TableFactor::Table { name, alias, .. } => {
            let alias = match alias {
                Some(alias) if alias.columns.is_empty() => Some(alias.name.value),
                Some(_) => {
                    return Err(ParseError::Unsupported("table alias column list".to_string()));
                }
                None => None,
            };
            let mut parts: Vec<String> = name
                .0
                .into_iter()
                .map(|part| {
                    part.as_ident()
                        .map(|ident| ident.value.clone())
                        .ok_or_else(|| ParseError::Unsupported("table name part".to_string()))
                })
                .collect::<ParseResult<Vec<_>>>()?;
            let (database, table) = match parts.len() {
                1 => (None, parts.remove(0)),
                2 => {
                    let table = parts.remove(1);
                    (Some(parts.remove(0)), table)
                }
                _ => {
                    return Err(ParseError::Unsupported("deeply qualified table".to_string()));
                }
            };
            Ok(TableRef::Table { database, name: table, alias })
        }
        sp::TableFactor::NestedJoin { table_with_joins, alias } => {
            if alias.is_some() {
                return Err(ParseError::Unsupported("alias on nested join".to_string()));
            }
            Ok(TableRef::Nested(Box::new(convert_table_with_joins(*table_with_joins)?)))
        }
        sp::TableFactor::Derived { .. } => {
            Err(ParseError::Unsupported("derived table".to_string()))
        }
        other => Err(ParseError::Unsupported(format!("table factor: {other}"))),
    }
}

fn convert_order_by_expr(expr: sp::OrderByExpr) -> ParseResult<OrderByExpr> {
    Ok(OrderByExpr {
        expr: convert_expr(expr.expr)?,
        asc: expr.options.asc.unwrap_or(true),
    })
}

fn convert_expr(expr: sp::Expr) -> ParseResult<Expr> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Expr::Column(ColumnRef::simple(ident.value))),
        sp::Expr::CompoundIdentifier(idents) => {
            if idents.len() != 2 {
                return Err(ParseError::Unsupported("deeply qualified column".to_string()));
            }
            let mut idents = idents;
            let name = idents.remove(1).value;
            Ok(Expr::Column(ColumnRef { table: Some(idents.remove(0).value), name }))
        }
        sp::Expr::Value(value) => convert_value(value.value),
        sp::Expr::BinaryOp { left, op, right } => Ok(Expr::BinaryOp {
            left: Box::new(convert_expr(*left)?),
            op: convert_binary_op(&op)?,
            right: Box::new(convert_expr(*right)?),
        }),
        sp::Expr::UnaryOp { op, expr } => {
            let operand = convert_expr(*expr)?;
            match op {
                sp::UnaryOperator::Not => {
                    Ok(Expr::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) })
                }
                sp::UnaryOperator::Minus => {
                    Ok(Expr::UnaryOp { op: UnaryOp::Neg, operand: Box::new(operand) })
                }
                // Unary plus is the identity.
                sp::UnaryOperator::Plus => Ok(operand),
                other => Err(ParseError::Unsupported(format!("unary operator: {other}"))),
            }
        }
        sp::Expr::Nested(inner) => convert_expr(*inner),
        sp::Expr::IsNull(inner) => {
            Ok(Expr::IsNull { operand: Box::new(convert_expr(*inner)?), negated: false })
        }
        sp::Expr::IsNotNull(inner) => {
            Ok(Expr::IsNull { operand: Box::new(convert_expr(*inner)?), negated: true })
        }
        sp::Expr::Between { expr, negated, low, high } => Ok(Expr::Between {
            operand: Box::new(convert_expr(*expr)?),
            low: Box::new(convert_expr(*low)?),
            high: Box::new(convert_expr(*high)?),
            negated,
        }),
        sp::Expr::InList { expr, list, negated } => Ok(Expr::InList {
            operand: Box::new(convert_expr(*expr)?),
            list: list.into_iter().map(convert_expr).collect::<ParseResult<Vec<_>>>()?,
            negated,
        }),
        sp::Expr::Like { negated, expr, pattern, .. } => Ok(Expr::BinaryOp {
            left: Box::new(convert_expr(*expr)?),
            op: if negated { BinaryOp::NotLike } else { BinaryOp::Like },
            right: Box::new(convert_expr(*pattern)?),
        }),
        sp::Expr::Function(func) => convert_function(func),
        sp::Expr::Tuple(exprs) => Ok(Expr::Tuple(
            exprs.into_iter().map(convert_expr).collect::<ParseResult<Vec<_>>>()?,
        )),
        other => Err(ParseError::Unsupported(format!("expression: {other}"))),
    }
}

fn convert_value(value: sp::Value) -> ParseResult<Expr> {
    match value {
        sp::Value::Null => Ok(Expr::Literal(Literal::Null)),
        sp::Value::Boolean(b) => Ok(Expr::Literal(Literal::Boolean(b))),
        sp::Value::Number(n, _) => {
            if let Ok(i) = n.parse::<i64>() {
                Ok(Expr::Literal(Literal::Integer(i)))
            } else {
                n.parse::<f64>()
                    .map(|f| Expr::Literal(Literal::Float(f)))
                    .map_err(|_| ParseError::Unsupported(format!("numeric literal: {n}")))
            }
        }
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
            Ok(Expr::Literal(Literal::String(s)))
        }
        other => Err(ParseError::Unsupported(format!("literal: {other}"))),
    }
}

fn convert_binary_op(op: &sp::BinaryOperator) -> ParseResult<BinaryOp> {
    match op {
        sp::BinaryOperator::Plus => Ok(BinaryOp::Add),
        sp::BinaryOperator::Minus => Ok(BinaryOp::Sub),
        sp::BinaryOperator::Multiply => Ok(BinaryOp::Mul),
        sp::BinaryOperator::Divide => Ok(BinaryOp::Div),
        sp::BinaryOperator::Modulo => Ok(BinaryOp::Mod),
        sp::BinaryOperator::Eq => Ok(BinaryOp::Eq),
        sp::BinaryOperator::NotEq => Ok(BinaryOp::NotEq),
        sp::BinaryOperator::Lt => Ok(BinaryOp::Lt),
        sp::BinaryOperator::LtEq => Ok(BinaryOp::LtEq),
        sp::BinaryOperator::Gt => Ok(BinaryOp::Gt),
        sp::BinaryOperator::GtEq => Ok(BinaryOp::GtEq),
        sp::BinaryOperator::And => Ok(BinaryOp::And),
        sp::BinaryOperator::Or => Ok(BinaryOp::Or),
        other => Err(ParseError::Unsupported(format!("binary operator: {other}"))),
    }
}

fn convert_function(func: sp::Function) -> ParseResult<Expr> {
    let name = object_name_tail(&func.name)?.to_lowercase();

    let (args, distinct) = match func.args {
        sp::FunctionArguments::None => (vec![], false),
        sp::FunctionArguments::Subquery(_) => {
            return Err(ParseError::Unsupported("subquery function argument".to_string()));
        }
        sp::FunctionArguments::List(arg_list) => {
            let distinct = matches!(
                arg_list.duplicate_treatment,
                Some(sp::DuplicateTreatment::Distinct)
            );
            let args = arg_list
                .args
                .into_iter()
                .map(|arg| match arg {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => convert_expr(e),
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => Ok(Expr::Wildcard),
                    other => {
                        Err(ParseError::Unsupported(format!("function argument: {other}")))
                    }
                })
                .collect::<ParseResult<Vec<_>>>()?;
            (args, distinct)
        }
    };

    Ok(Expr::Function(FunctionCall { name, args, distinct }))
}

fn convert_insert(insert: sp::Insert) -> ParseResult<InsertStatement> {
    let name = match insert.table {
        sp::TableObject::TableName(name) => name,
        sp::TableObject::TableFunction(_) => {
            return Err(ParseError::Unsupported("INSERT into table function".to_string()));
        }
    };
    let mut parts: Vec<String> = name
        .0
        .into_iter()
        .map(|part| {
            part.as_ident()
                .map(|ident| ident.value.clone())
                .ok_or_else(|| ParseError::Unsupported("table name part".to_string()))
        })
        .collect::<ParseResult<Vec<_>>>()?;
    let (database, table) = match parts.len() {
        1 => (None, parts.remove(0)),
        2 => {
            let table = parts.remove(1);
            (Some(parts.remove(0)), table)
        }
        _ => return Err(ParseError::Unsupported("deeply qualified table".to_string())),
    };

    let columns: Vec<String> = insert.columns.into_iter().map(|c| c.value).collect();

    let Some(source) = insert.source else {
        return Err(ParseError::Unsupported("INSERT without VALUES".to_string()));
    };
    let rows = match *source.body {
        sp::SetExpr::Values(values) => values
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(convert_expr).collect::<ParseResult<Vec<_>>>())
            .collect::<ParseResult<Vec<_>>>()?,
        _ => return Err(ParseError::Unsupported("INSERT … SELECT".to_string())),
    };

    Ok(InsertStatement { database, table, columns, rows })
}

fn object_name_tail(name: &sp::ObjectName) -> ParseResult<String> {
    name.0
        .last()
        .and_then(|part| part.as_ident())
        .map(|ident| ident.value.clone())
        .ok_or_else(|| ParseError::Unsupported("object name".to_string()))
}
