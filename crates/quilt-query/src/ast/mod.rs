//! Query abstract syntax tree.
//!
//! A crate-owned MySQL AST, lowered from `sqlparser` by the [`crate::parser`]
//! module. The planner mutates these types in place and renders them with
//! `Display` to produce the per-backend SQL text.

mod expr;
mod statement;

pub use expr::{BinaryOp, ColumnRef, Expr, FunctionCall, Literal, UnaryOp};
pub use statement::{
    InsertStatement, JoinClause, JoinKind, Limit, LockClause, OrderByExpr, SelectItem,
    SelectStatement, Statement, TableRef,
};
