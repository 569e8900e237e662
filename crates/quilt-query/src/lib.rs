//! Quilt Query
//!
//! MySQL parsing and cross-shard query planning for the Quilt proxy.
//!
//! # Overview
//!
//! - [`ast`] - Crate-owned MySQL AST; `Display` renders backend SQL
//! - [`parser`] - `sqlparser`-based front-end lowering into the AST
//! - [`planner`] - The cross-shard join planner and INSERT router
//! - [`error`] - Parse and plan error types
//!
//! # Quick Start
//!
//! ```
//! use quilt_query::planner::SelectPlan;
//! use quilt_router::{hash_segments, Router, TableConfig};
//!
//! let mut router = Router::new();
//! router.add_table(TableConfig::hash(
//!     "sbtest",
//!     "t1",
//!     "id",
//!     hash_segments("t1", &["backend0", "backend1"], 4),
//! ));
//!
//! let plan = SelectPlan::build(&router, "sbtest", "SELECT id FROM t1 WHERE id = 3").unwrap();
//! assert_eq!(plan.query_tuples().len(), 1);
//! ```

pub mod ast;
pub mod error;
pub mod parser;
pub mod planner;

pub use error::{ParseError, ParseResult, PlanError, PlanResult};
pub use planner::{InsertPlan, QueryTuple, SelectPlan};
