//! Predicate and projection classification.
//!
//! WHERE/ON/HAVING clauses are split into conjuncts and classified into the
//! tuple forms the pushdown passes work with; the select list is parsed into
//! projection tuples with aggregate detection.

use std::collections::BTreeSet;

use crate::ast::{BinaryOp, ColumnRef, Expr, Literal, SelectItem};
use crate::error::{PlanError, PlanResult};
use crate::planner::node::PlanCtx;

/// Aggregate function names the planner recognizes.
const AGGREGATES: &[&str] = &["avg", "count", "group_concat", "max", "min", "sum"];

/// One projected expression.
#[derive(Debug, Clone)]
pub struct SelectTuple {
    /// The projection item as written (expression + alias).
    pub item: SelectItem,
    /// The output field name (alias, column name, or rendered text).
    pub field: String,
    /// The tables the expression references.
    pub refer_tables: Vec<String>,
}

/// One WHERE/ON predicate.
#[derive(Debug, Clone)]
pub struct FilterTuple {
    /// The predicate expression.
    pub expr: Expr,
    /// The tables the predicate references.
    pub refer_tables: Vec<String>,
    /// The compared column, when the predicate is column-vs-literal.
    pub col: Option<ColumnRef>,
    /// The literal, when the predicate is a column-vs-literal equality.
    pub val: Option<Literal>,
}

/// An equality `left.col = right.col` across two tables.
#[derive(Debug, Clone)]
pub struct JoinTuple {
    /// The original expression.
    pub expr: Expr,
    /// The left column.
    pub left: ColumnRef,
    /// The right column.
    pub right: ColumnRef,
}

/// Splits an expression on top-level `AND`.
pub fn split_and(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::BinaryOp { left, op: BinaryOp::And, right } => {
            let mut exprs = split_and(*left);
            exprs.extend(split_and(*right));
            exprs
        }
        other => vec![other],
    }
}

/// Collects the table qualifiers referenced by an expression, in first-use
/// order without duplicates.
pub fn expr_refer_tables(expr: &Expr) -> Vec<String> {
    let mut tables = Vec::new();
    walk_columns(expr, &mut |col| {
        if let Some(table) = &col.table {
            if !tables.contains(table) {
                tables.push(table.clone());
            }
        }
    });
    tables
}

fn has_unqualified_column(expr: &Expr) -> Option<String> {
    let mut found = None;
    walk_columns(expr, &mut |col| {
        if col.table.is_none() && found.is_none() {
            found = Some(col.name.clone());
        }
    });
    found
}

fn walk_columns(expr: &Expr, visit: &mut impl FnMut(&ColumnRef)) {
    match expr {
        Expr::Column(col) => visit(col),
        Expr::Literal(_) | Expr::Wildcard => {}
        Expr::BinaryOp { left, right, .. } => {
            walk_columns(left, visit);
            walk_columns(right, visit);
        }
        Expr::UnaryOp { operand, .. } | Expr::IsNull { operand, .. } => {
            walk_columns(operand, visit);
        }
        Expr::Between { operand, low, high, .. } => {
            walk_columns(operand, visit);
            walk_columns(low, visit);
            walk_columns(high, visit);
        }
        Expr::InList { operand, list, .. } => {
            walk_columns(operand, visit);
            for item in list {
                walk_columns(item, visit);
            }
        }
        Expr::Function(func) => {
            for arg in &func.args {
                walk_columns(arg, visit);
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                walk_columns(item, visit);
            }
        }
    }
}

/// Returns whether the expression contains an aggregate function call.
pub fn has_aggregates(expr: &Expr) -> bool {
    match expr {
        Expr::Function(func) => {
            AGGREGATES.contains(&func.name.as_str()) || func.args.iter().any(has_aggregates)
        }
        Expr::BinaryOp { left, right, .. } => has_aggregates(left) || has_aggregates(right),
        Expr::UnaryOp { operand, .. } | Expr::IsNull { operand, .. } => has_aggregates(operand),
        Expr::Between { operand, low, high, .. } => {
            has_aggregates(operand) || has_aggregates(low) || has_aggregates(high)
        }
        Expr::InList { operand, list, .. } => {
            has_aggregates(operand) || list.iter().any(has_aggregates)
        }
        Expr::Tuple(items) => items.iter().any(has_aggregates),
        Expr::Column(_) | Expr::Literal(_) | Expr::Wildcard => false,
    }
}

/// Returns whether all of `tables` (nonempty) live under the given node
/// table set.
pub fn check_tb_in_node(tables: &[String], node_tables: &BTreeSet<String>) -> bool {
    !tables.is_empty() && tables.iter().all(|t| node_tables.contains(t))
}

impl PlanCtx<'_> {
    /// Resolves an expression's referred tables against the catalog.
    ///
    /// Unqualified columns resolve to the only table in scope; with several
    /// tables in scope they are an error, as is an unknown qualifier.
    fn resolve_refer_tables(&self, expr: &Expr) -> PlanResult<Vec<String>> {
        let mut tables = expr_refer_tables(expr);
        for table in &tables {
            if !self.tables.contains_key(table) {
                return Err(PlanError::UnknownTable(table.clone()));
            }
        }
        if let Some(column) = has_unqualified_column(expr) {
            if self.tables.len() > 1 {
                return Err(PlanError::UnknownColumn(column));
            }
            if let Some(only) = self.tables.keys().next() {
                if !tables.contains(only) {
                    tables.push(only.clone());
                }
            }
        }
        Ok(tables)
    }

    /// Like `resolve_refer_tables`, but tolerant of unqualified columns in a
    /// multi-table scope: they contribute no table, and the pushdown passes
    /// report the offending expression themselves.
    fn resolve_refer_tables_lenient(&self, expr: &Expr) -> PlanResult<Vec<String>> {
        let tables = expr_refer_tables(expr);
        for table in &tables {
            if !self.tables.contains_key(table) {
                return Err(PlanError::UnknownTable(table.clone()));
            }
        }
        let mut tables = tables;
        if self.tables.len() == 1 && has_unqualified_column(expr).is_some() {
            if let Some(only) = self.tables.keys().next() {
                if !tables.contains(only) {
                    tables.push(only.clone());
                }
            }
        }
        Ok(tables)
    }

    /// Classifies one conjunct into a filter tuple.
    pub(crate) fn filter_tuple(&self, expr: Expr) -> PlanResult<FilterTuple> {
        let refer_tables = self.resolve_refer_tables(&expr)?;
        let mut col = None;
        let mut val = None;
        if let Expr::BinaryOp { left, op, right } = &expr {
            if op.is_comparison() {
                match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(c), Expr::Literal(l)) => {
                        col = Some(c.clone());
                        if *op == BinaryOp::Eq {
                            val = Some(l.clone());
                        }
                    }
                    (Expr::Literal(l), Expr::Column(c)) => {
                        col = Some(c.clone());
                        if *op == BinaryOp::Eq {
                            val = Some(l.clone());
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(FilterTuple { expr, refer_tables, col, val })
    }

    /// Splits a WHERE (or inner-join ON) expression into plain filters and
    /// cross-table equality join tuples.
    pub(crate) fn parse_where_or_join(
        &self,
        expr: Expr,
    ) -> PlanResult<(Vec<FilterTuple>, Vec<JoinTuple>)> {
        let mut filters = Vec::new();
        let mut joins = Vec::new();
        for conjunct in split_and(expr) {
            match as_join_tuple(&conjunct) {
                Some(join) => joins.push(join),
                None => filters.push(self.filter_tuple(conjunct)?),
            }
        }
        Ok((filters, joins))
    }

    /// Parses the select list into projection tuples, reporting whether any
    /// expression aggregates.
    pub(crate) fn parse_select_items(
        &self,
        items: &[SelectItem],
    ) -> PlanResult<(Vec<SelectTuple>, bool)> {
        let mut tuples = Vec::new();
        let mut aggregates = false;
        for item in items {
            let tuple = match item {
                SelectItem::Wildcard => SelectTuple {
                    item: item.clone(),
                    field: "*".to_string(),
                    refer_tables: self.tables.keys().cloned().collect(),
                },
                SelectItem::QualifiedWildcard(table) => {
                    if !self.tables.contains_key(table) {
                        return Err(PlanError::UnknownTable(table.clone()));
                    }
                    SelectTuple {
                        item: item.clone(),
                        field: "*".to_string(),
                        refer_tables: vec![table.clone()],
                    }
                }
                SelectItem::Expr { expr, alias } => {
                    aggregates |= has_aggregates(expr);
                    let field = alias.clone().unwrap_or_else(|| match expr {
                        Expr::Column(col) => col.name.clone(),
                        other => other.to_string(),
                    });
                    SelectTuple {
                        item: item.clone(),
                        field,
                        refer_tables: self.resolve_refer_tables_lenient(expr)?,
                    }
                }
            };
            tuples.push(tuple);
        }
        Ok((tuples, aggregates))
    }

    /// Validates GROUP BY columns against the select list, returning their
    /// tuples.
    pub(crate) fn check_group_by(
        &self,
        group_by: &[Expr],
        tuples: &[SelectTuple],
    ) -> PlanResult<Vec<SelectTuple>> {
        let mut groups = Vec::new();
        for expr in group_by {
            let Expr::Column(col) = expr else {
                return Err(PlanError::GroupByNotInSelectList(expr.to_string()));
            };
            if let Some(table) = &col.table {
                if !self.tables.contains_key(table) {
                    return Err(PlanError::UnknownTable(table.clone()));
                }
            }
            match find_tuple(tuples, col) {
                Some(tuple) => groups.push(tuple.clone()),
                None => return Err(PlanError::GroupByNotInSelectList(col.name.clone())),
            }
        }
        Ok(groups)
    }

    /// Splits a HAVING expression into filter tuples; aggregates are not
    /// evaluable client-side and are rejected.
    pub(crate) fn parse_having(&self, expr: Expr) -> PlanResult<Vec<FilterTuple>> {
        let mut filters = Vec::new();
        for conjunct in split_and(expr) {
            if has_aggregates(&conjunct) {
                return Err(PlanError::ExprInHavingClause(conjunct.to_string()));
            }
            filters.push(self.filter_tuple(conjunct)?);
        }
        Ok(filters)
    }
}

/// Recognizes `a.x = b.y` with distinct qualifiers as a join tuple.
fn as_join_tuple(expr: &Expr) -> Option<JoinTuple> {
    let Expr::BinaryOp { left, op: BinaryOp::Eq, right } = expr else {
        return None;
    };
    let (Expr::Column(lcol), Expr::Column(rcol)) = (left.as_ref(), right.as_ref()) else {
        return None;
    };
    let (Some(ltable), Some(rtable)) = (&lcol.table, &rcol.table) else {
        return None;
    };
    if ltable == rtable {
        return None;
    }
    Some(JoinTuple { expr: expr.clone(), left: lcol.clone(), right: rcol.clone() })
}

/// Finds a projection tuple matching a column (by field name, honoring the
/// qualifier when present).
pub(crate) fn find_tuple<'t>(tuples: &'t [SelectTuple], col: &ColumnRef) -> Option<&'t SelectTuple> {
    tuples.iter().find(|tuple| {
        tuple.field == col.name
            && match &col.table {
                Some(table) => tuple.refer_tables.len() == 1 && tuple.refer_tables[0] == *table,
                None => true,
            }
    })
}

/// Finds the index of a single-table column in a node's projection.
pub(crate) fn find_column_index(tuples: &[SelectTuple], col: &ColumnRef) -> Option<usize> {
    let table = col.table.as_deref()?;
    tuples.iter().position(|tuple| {
        tuple.refer_tables.len() == 1
            && tuple.refer_tables[0] == table
            && tuple.field == col.name
    })
}

/// Recognizes a conservative `column IS NULL` test whose tables all live in
/// the given (right) side.
pub(crate) fn check_is_with_null(filter: &FilterTuple, right: &BTreeSet<String>) -> bool {
    matches!(
        &filter.expr,
        Expr::IsNull { operand, negated: false } if matches!(operand.as_ref(), Expr::Column(_))
    ) && check_tb_in_node(&filter.refer_tables, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;

    #[test]
    fn split_and_flattens() {
        let expr = Expr::column("t1", "a")
            .eq(Expr::integer(1))
            .and(Expr::column("t1", "b").eq(Expr::integer(2)))
            .and(Expr::column("t2", "c").eq(Expr::integer(3)));
        assert_eq!(split_and(expr).len(), 3);
    }

    #[test]
    fn join_tuple_requires_distinct_tables() {
        let cross = Expr::column("t1", "a").eq(Expr::column("t2", "a"));
        assert!(as_join_tuple(&cross).is_some());
        let local = Expr::column("t1", "a").eq(Expr::column("t1", "b"));
        assert!(as_join_tuple(&local).is_none());
        let literal = Expr::column("t1", "a").eq(Expr::integer(3));
        assert!(as_join_tuple(&literal).is_none());
    }

    #[test]
    fn aggregate_detection_recurses() {
        let plain = Expr::column("t1", "a");
        assert!(!has_aggregates(&plain));
        let nested = Expr::binary(
            Expr::Function(crate::ast::FunctionCall::new("sum", vec![Expr::column("t1", "a")])),
            BinaryOp::Add,
            Expr::integer(1),
        );
        assert!(has_aggregates(&nested));
    }

    #[test]
    fn refer_tables_deduplicated() {
        let expr = Expr::column("t1", "a")
            .eq(Expr::column("t2", "a"))
            .and(Expr::column("t1", "b").eq(Expr::integer(2)));
        assert_eq!(expr_refer_tables(&expr), vec!["t1".to_string(), "t2".to_string()]);
    }

    #[test]
    fn null_check_is_conservative() {
        let mut right = BTreeSet::new();
        right.insert("t2".to_string());
        let is_null = FilterTuple {
            expr: Expr::IsNull { operand: Box::new(Expr::column("t2", "str")), negated: false },
            refer_tables: vec!["t2".to_string()],
            col: None,
            val: None,
        };
        assert!(check_is_with_null(&is_null, &right));
        let not_null = FilterTuple {
            expr: Expr::IsNull { operand: Box::new(Expr::column("t2", "str")), negated: true },
            refer_tables: vec!["t2".to_string()],
            col: None,
            val: None,
        };
        assert!(!check_is_with_null(&not_null, &right));
    }
}
