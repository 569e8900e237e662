//! Expression AST types.
//!
//! The planner classifies, splits, and synthesizes these expressions; their
//! `Display` impls render the MySQL text sent to the backends.

use std::fmt;

/// A literal value in a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// Null value.
    Null,
    /// Boolean value.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(fl) => write!(f, "{fl}"),
            Self::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// A column reference, optionally qualified by a table name or alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    /// The qualifying table name or alias, if written.
    pub table: Option<String>,
    /// The column name.
    pub name: String,
}

impl ColumnRef {
    /// Creates a qualified column reference.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self { table: Some(table.into()), name: name.into() }
    }

    /// Creates an unqualified column reference.
    pub fn simple(name: impl Into<String>) -> Self {
        Self { table: None, name: name.into() }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(table) = &self.table {
            write!(f, "{table}.")?;
        }
        write!(f, "{}", self.name)
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition (+).
    Add,
    /// Subtraction (-).
    Sub,
    /// Multiplication (*).
    Mul,
    /// Division (/).
    Div,
    /// Modulo (%).
    Mod,
    /// Equal (=).
    Eq,
    /// Not equal (!=).
    NotEq,
    /// Less than (<).
    Lt,
    /// Less than or equal (<=).
    LtEq,
    /// Greater than (>).
    Gt,
    /// Greater than or equal (>=).
    GtEq,
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
    /// LIKE pattern matching.
    Like,
    /// NOT LIKE pattern matching.
    NotLike,
}

impl BinaryOp {
    /// Returns whether this is a comparison operator usable in a residual
    /// cross-shard filter.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    /// Binding strength used by the renderer to decide parenthesization.
    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq
            | Self::NotEq
            | Self::Lt
            | Self::LtEq
            | Self::Gt
            | Self::GtEq
            | Self::Like
            | Self::NotLike => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Mod => 6,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        };
        write!(f, "{op}")
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical NOT.
    Not,
    /// Numeric negation (-).
    Neg,
}

/// A function call expression.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// The function name, lowercased.
    pub name: String,
    /// The function arguments.
    pub args: Vec<Expr>,
    /// Whether DISTINCT was written (for aggregates).
    pub distinct: bool,
}

impl FunctionCall {
    /// Creates a new function call.
    pub fn new(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self { name: name.into().to_lowercase(), args, distinct: false }
    }
}

impl fmt::Display for FunctionCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        if self.distinct {
            write!(f, "DISTINCT ")?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column reference.
    Column(ColumnRef),
    /// A literal value.
    Literal(Literal),
    /// A binary operation.
    BinaryOp {
        /// Left operand.
        left: Box<Expr>,
        /// The operator.
        op: BinaryOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// A unary operation.
    UnaryOp {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: Box<Expr>,
    },
    /// `expr IS [NOT] NULL`.
    IsNull {
        /// The tested expression.
        operand: Box<Expr>,
        /// Whether NOT was written.
        negated: bool,
    },
    /// `expr [NOT] BETWEEN low AND high`.
    Between {
        /// The tested expression.
        operand: Box<Expr>,
        /// Lower bound.
        low: Box<Expr>,
        /// Upper bound.
        high: Box<Expr>,
        /// Whether NOT was written.
        negated: bool,
    },
    /// `expr [NOT] IN (list…)`.
    InList {
        /// The tested expression.
        operand: Box<Expr>,
        /// The candidate values.
        list: Vec<Expr>,
        /// Whether NOT was written.
        negated: bool,
    },
    /// A function call.
    Function(FunctionCall),
    /// A row constructor `(a, b, …)`.
    Tuple(Vec<Expr>),
    /// A bare `*` (only valid as a function argument, e.g. `count(*)`).
    Wildcard,
}

impl Expr {
    /// Creates a qualified column expression.
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Column(ColumnRef::qualified(table, name))
    }

    /// Creates an integer literal expression.
    #[must_use]
    pub const fn integer(value: i64) -> Self {
        Self::Literal(Literal::Integer(value))
    }

    /// Creates a string literal expression.
    pub fn string(value: impl Into<String>) -> Self {
        Self::Literal(Literal::String(value.into()))
    }

    /// Combines two expressions with a binary operator.
    #[must_use]
    pub fn binary(left: Self, op: BinaryOp, right: Self) -> Self {
        Self::BinaryOp { left: Box::new(left), op, right: Box::new(right) }
    }

    /// `self = other`.
    #[must_use]
    pub fn eq(self, other: Self) -> Self {
        Self::binary(self, BinaryOp::Eq, other)
    }

    /// `self AND other`.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::binary(self, BinaryOp::And, other)
    }

    /// Conjoins an expression onto an optional one.
    #[must_use]
    pub fn conjoin(current: Option<Self>, next: Self) -> Self {
        match current {
            Some(expr) => expr.and(next),
            None => next,
        }
    }

    const fn precedence(&self) -> u8 {
        match self {
            Self::BinaryOp { op, .. } => op.precedence(),
            Self::UnaryOp { .. } => 3,
            Self::IsNull { .. } | Self::Between { .. } | Self::InList { .. } => 4,
            _ => u8::MAX,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(col) => write!(f, "{col}"),
            Self::Literal(lit) => write!(f, "{lit}"),
            Self::BinaryOp { left, op, right } => {
                left.fmt_child(f, op.precedence())?;
                write!(f, " {op} ")?;
                // Right side of a non-associative operator keeps its parens.
                let min = match op {
                    BinaryOp::Sub | BinaryOp::Div | BinaryOp::Mod => op.precedence() + 1,
                    _ => op.precedence(),
                };
                right.fmt_child(f, min)
            }
            Self::UnaryOp { op, operand } => {
                match op {
                    UnaryOp::Not => write!(f, "NOT ")?,
                    UnaryOp::Neg => write!(f, "-")?,
                }
                operand.fmt_child(f, 3)
            }
            Self::IsNull { operand, negated } => {
                operand.fmt_child(f, 5)?;
                write!(f, " IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Self::Between { operand, low, high, negated } => {
                operand.fmt_child(f, 5)?;
                write!(f, " {}BETWEEN ", if *negated { "NOT " } else { "" })?;
                low.fmt_child(f, 5)?;
                write!(f, " AND ")?;
                high.fmt_child(f, 5)
            }
            Self::InList { operand, list, negated } => {
                operand.fmt_child(f, 5)?;
                write!(f, " {}IN (", if *negated { "NOT " } else { "" })?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Function(func) => write!(f, "{func}"),
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Self::Wildcard => write!(f, "*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_comparison() {
        let expr = Expr::column("t1", "a").eq(Expr::integer(1));
        assert_eq!(expr.to_string(), "t1.a = 1");
    }

    #[test]
    fn render_and_chain() {
        let expr = Expr::column("t1", "a")
            .eq(Expr::column("t2", "a"))
            .and(Expr::column("t1", "b").eq(Expr::integer(2)));
        assert_eq!(expr.to_string(), "t1.a = t2.a AND t1.b = 2");
    }

    #[test]
    fn render_or_under_and_parenthesized() {
        let or = Expr::binary(
            Expr::column("t1", "a").eq(Expr::integer(1)),
            BinaryOp::Or,
            Expr::column("t1", "a").eq(Expr::integer(2)),
        );
        let expr = or.and(Expr::column("t1", "b").eq(Expr::integer(3)));
        assert_eq!(expr.to_string(), "(t1.a = 1 OR t1.a = 2) AND t1.b = 3");
    }

    #[test]
    fn render_is_null() {
        let expr = Expr::IsNull {
            operand: Box::new(Expr::column("t2", "str")),
            negated: false,
        };
        assert_eq!(expr.to_string(), "t2.str IS NULL");
    }

    #[test]
    fn render_function() {
        let expr = Expr::Function(FunctionCall::new("COUNT", vec![Expr::Wildcard]));
        assert_eq!(expr.to_string(), "count(*)");
    }

    #[test]
    fn render_string_escapes_quotes() {
        assert_eq!(Expr::string("a'b").to_string(), "'a''b'");
    }
}
