//! Statement AST types.
//!
//! Only the statements the proxy plans are modeled: `SELECT` (the join
//! planner's input) and `INSERT … VALUES` (the insert router's input).

use std::fmt;

use super::expr::Expr;

/// One item of a SELECT projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`.
    Wildcard,
    /// `table.*`.
    QualifiedWildcard(String),
    /// An expression, optionally aliased.
    Expr {
        /// The projected expression.
        expr: Expr,
        /// The output alias, if written.
        alias: Option<String>,
    },
}

impl fmt::Display for SelectItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => write!(f, "*"),
            Self::QualifiedWildcard(table) => write!(f, "{table}.*"),
            Self::Expr { expr, alias: Some(alias) } => write!(f, "{expr} AS {alias}"),
            Self::Expr { expr, alias: None } => write!(f, "{expr}"),
        }
    }
}

/// The kind of an explicit join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN (or bare JOIN).
    Inner,
    /// LEFT [OUTER] JOIN.
    Left,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "JOIN"),
            Self::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// An explicit join between two table references.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    /// The left operand.
    pub left: TableRef,
    /// The right operand.
    pub right: TableRef,
    /// Inner or left.
    pub kind: JoinKind,
    /// The ON condition, if written.
    pub on: Option<Expr>,
}

/// A FROM-clause table reference.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// A table factor, optionally database-qualified and aliased.
    Table {
        /// The database qualifier, if written.
        database: Option<String>,
        /// The table name.
        name: String,
        /// The alias, if written.
        alias: Option<String>,
    },
    /// An explicit join.
    Join(Box<JoinClause>),
    /// A parenthesized join operand.
    Nested(Box<TableRef>),
}

impl TableRef {
    /// Creates a plain table factor.
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table { database: None, name: name.into(), alias: None }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Table { database, name, alias } => {
                if let Some(db) = database {
                    write!(f, "{db}.")?;
                }
                write!(f, "{name}")?;
                if let Some(alias) = alias {
                    write!(f, " AS {alias}")?;
                }
                Ok(())
            }
            Self::Join(join) => {
                write!(f, "{} {} {}", join.left, join.kind, join.right)?;
                if let Some(on) = &join.on {
                    write!(f, " ON {on}")?;
                }
                Ok(())
            }
            Self::Nested(inner) => write!(f, "({inner})"),
        }
    }
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    /// The ordered expression.
    pub expr: Expr,
    /// Ascending (`true`) or descending.
    pub asc: bool,
}

impl fmt::Display for OrderByExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.asc { "ASC" } else { "DESC" })
    }
}

/// A LIMIT clause.
#[derive(Debug, Clone, PartialEq)]
pub struct Limit {
    /// The OFFSET expression, if written.
    pub offset: Option<Expr>,
    /// The row-count expression.
    pub count: Expr,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.offset {
            Some(offset) => write!(f, "LIMIT {offset}, {}", self.count),
            None => write!(f, "LIMIT {}", self.count),
        }
    }
}

/// A row-locking clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockClause {
    /// `FOR UPDATE`.
    ForUpdate,
    /// `FOR SHARE` / `LOCK IN SHARE MODE`.
    Share,
}

impl fmt::Display for LockClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForUpdate => write!(f, "FOR UPDATE"),
            Self::Share => write!(f, "FOR SHARE"),
        }
    }
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    /// Whether DISTINCT was written.
    pub distinct: bool,
    /// The projection list.
    pub projection: Vec<SelectItem>,
    /// The FROM list (comma-separated references).
    pub from: Vec<TableRef>,
    /// The WHERE clause.
    pub where_clause: Option<Expr>,
    /// GROUP BY expressions.
    pub group_by: Vec<Expr>,
    /// The HAVING clause.
    pub having: Option<Expr>,
    /// ORDER BY entries.
    pub order_by: Vec<OrderByExpr>,
    /// The LIMIT clause.
    pub limit: Option<Limit>,
    /// A trailing locking clause.
    pub lock: Option<LockClause>,
}

impl SelectStatement {
    /// Conjoins a predicate onto the WHERE clause.
    pub fn add_where(&mut self, expr: Expr) {
        self.where_clause = Some(Expr::conjoin(self.where_clause.take(), expr));
    }

    /// Conjoins a predicate onto the HAVING clause.
    pub fn add_having(&mut self, expr: Expr) {
        self.having = Some(Expr::conjoin(self.having.take(), expr));
    }
}

impl fmt::Display for SelectStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        for (i, item) in self.projection.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        if !self.from.is_empty() {
            write!(f, " FROM ")?;
            for (i, table) in self.from.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{table}")?;
            }
        }
        if let Some(where_clause) = &self.where_clause {
            write!(f, " WHERE {where_clause}")?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY ")?;
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{expr}")?;
            }
        }
        if let Some(having) = &self.having {
            write!(f, " HAVING {having}")?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, order) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{order}")?;
            }
        }
        if let Some(limit) = &self.limit {
            write!(f, " {limit}")?;
        }
        if let Some(lock) = &self.lock {
            write!(f, " {lock}")?;
        }
        Ok(())
    }
}

/// A parsed statement the proxy knows how to plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// A SELECT statement.
    Select(Box<SelectStatement>),
    /// An INSERT statement.
    Insert(Box<InsertStatement>),
}

impl Statement {
    /// The statement kind, for error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Select(_) => "SELECT",
            Self::Insert(_) => "INSERT",
        }
    }
}

/// An `INSERT … VALUES` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// The database qualifier, if written.
    pub database: Option<String>,
    /// The target table.
    pub table: String,
    /// The column list.
    pub columns: Vec<String>,
    /// The VALUES rows.
    pub rows: Vec<Vec<Expr>>,
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "INSERT INTO ")?;
        if let Some(db) = &self.database {
            write!(f, "{db}.")?;
        }
        write!(f, "{}", self.table)?;
        if !self.columns.is_empty() {
            write!(f, "(")?;
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{col}")?;
            }
            write!(f, ")")?;
        }
        write!(f, " VALUES ")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "(")?;
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::expr::Expr;

    #[test]
    fn render_select() {
        let mut sel = SelectStatement {
            projection: vec![
                SelectItem::Expr { expr: Expr::column("t1", "a"), alias: None },
                SelectItem::Expr { expr: Expr::column("t1", "b"), alias: Some("x".to_string()) },
            ],
            from: vec![TableRef::Table {
                database: Some("sbtest".to_string()),
                name: "t1_0002".to_string(),
                alias: Some("t1".to_string()),
            }],
            ..Default::default()
        };
        sel.add_where(Expr::column("t1", "a").eq(Expr::integer(1)));
        sel.order_by.push(OrderByExpr { expr: Expr::column("t1", "a"), asc: true });
        assert_eq!(
            sel.to_string(),
            "SELECT t1.a, t1.b AS x FROM sbtest.t1_0002 AS t1 WHERE t1.a = 1 ORDER BY t1.a ASC"
        );
    }

    #[test]
    fn render_join_from() {
        let sel = SelectStatement {
            projection: vec![SelectItem::Wildcard],
            from: vec![TableRef::Join(Box::new(JoinClause {
                left: TableRef::table("t1"),
                right: TableRef::table("t2"),
                kind: JoinKind::Inner,
                on: Some(Expr::column("t1", "a").eq(Expr::column("t2", "a"))),
            }))],
            ..Default::default()
        };
        assert_eq!(sel.to_string(), "SELECT * FROM t1 JOIN t2 ON t1.a = t2.a");
    }

    #[test]
    fn render_limit_forms() {
        let no_offset = Limit { offset: None, count: Expr::integer(10) };
        assert_eq!(no_offset.to_string(), "LIMIT 10");
        let with_offset = Limit { offset: Some(Expr::integer(5)), count: Expr::integer(10) };
        assert_eq!(with_offset.to_string(), "LIMIT 5, 10");
    }

    #[test]
    fn render_insert() {
        let insert = InsertStatement {
            database: Some("sbtest".to_string()),
            table: "t1_0001".to_string(),
            columns: vec!["id".to_string(), "b".to_string()],
            rows: vec![
                vec![Expr::integer(1), Expr::integer(2)],
                vec![Expr::integer(3), Expr::integer(4)],
            ],
        };
        assert_eq!(
            insert.to_string(),
            "INSERT INTO sbtest.t1_0001(id, b) VALUES (1, 2), (3, 4)"
        );
    }
}
