//! MySQL parser front-end.
//!
//! Parsing proper is delegated to `sqlparser` with the MySQL dialect; this
//! module lowers the resulting AST into the crate-owned [`crate::ast`] types
//! the planner consumes. Constructs outside the planned subset are rejected
//! with a named [`crate::error::ParseError::Unsupported`].

mod sql;

pub use sql::{parse_insert, parse_select, parse_statement};
