//! INSERT routing.
//!
//! Rows are routed by the shard-key column in the VALUES list: each row's
//! key literal resolves to a partition, rows are grouped per partition, and
//! one rewritten INSERT is emitted per target backend. Global tables
//! broadcast the whole statement to every backend.

use std::collections::BTreeMap;

use quilt_router::Router;

use crate::ast::{Expr, InsertStatement};
use crate::error::{PlanError, PlanResult};
use crate::parser;
use crate::planner::merge::key_value;
use crate::planner::node::QueryTuple;

/// A planned INSERT: one query tuple per targeted backend.
#[derive(Debug)]
pub struct InsertPlan {
    querys: Vec<QueryTuple>,
}

impl InsertPlan {
    /// Parses and routes an `INSERT … VALUES` statement.
    ///
    /// # Errors
    ///
    /// Returns a parse error, a routing error, or an `unsupported:` error
    /// when the statement cannot be routed.
    pub fn build(router: &Router, database: &str, sql: &str) -> PlanResult<Self> {
        let insert = parser::parse_insert(sql)?;
        Self::build_from_insert(router, database, insert)
    }

    /// Routes an already-parsed INSERT.
    ///
    /// # Errors
    ///
    /// Returns a routing error or an `unsupported:` error when the statement
    /// cannot be routed.
    pub fn build_from_insert(
        router: &Router,
        database: &str,
        insert: InsertStatement,
    ) -> PlanResult<Self> {
        let db = insert.database.clone().unwrap_or_else(|| database.to_string());
        let segments = router.segments(&db, &insert.table)?.to_vec();
        let shard_key = router.shard_key(&db, &insert.table)?.map(str::to_string);

        if !insert.columns.is_empty() {
            for (i, row) in insert.rows.iter().enumerate() {
                if row.len() != insert.columns.len() {
                    return Err(PlanError::InsertRowArityMismatch(i));
                }
            }
        }

        let Some(shard_key) = shard_key else {
            // Global table: replicate the statement to every backend.
            let querys = segments
                .iter()
                .map(|segment| {
                    let mut stmt = insert.clone();
                    stmt.database = Some(db.clone());
                    QueryTuple {
                        query: stmt.to_string(),
                        backend: segment.backend.clone(),
                        table: insert.table.clone(),
                    }
                })
                .collect();
            return Ok(Self { querys });
        };

        if insert.columns.is_empty() {
            return Err(PlanError::InsertMissingColumns);
        }
        let key_column = insert
            .columns
            .iter()
            .position(|c| *c == shard_key)
            .ok_or_else(|| PlanError::InsertMissingShardKey(shard_key.clone()))?;

        let mut grouped: BTreeMap<usize, Vec<Vec<Expr>>> = BTreeMap::new();
        for (i, row) in insert.rows.iter().enumerate() {
            let Expr::Literal(literal) = &row[key_column] else {
                return Err(PlanError::InsertBadShardKeyValue(i));
            };
            let Some(key) = key_value(literal) else {
                return Err(PlanError::InsertBadShardKeyValue(i));
            };
            let index = router.get_index(&db, &insert.table, &key)?;
            grouped.entry(index).or_default().push(row.clone());
        }

        let mut querys = Vec::with_capacity(grouped.len());
        for (index, rows) in grouped {
            let Some(segment) = segments.get(index) else {
                continue;
            };
            let stmt = InsertStatement {
                database: Some(db.clone()),
                table: segment.table.clone(),
                columns: insert.columns.clone(),
                rows,
            };
            querys.push(QueryTuple {
                query: stmt.to_string(),
                backend: segment.backend.clone(),
                table: insert.table.clone(),
            });
        }
        Ok(Self { querys })
    }

    /// The emitted backend statements, in partition-index order.
    #[must_use]
    pub fn query_tuples(&self) -> &[QueryTuple] {
        &self.querys
    }
}
