use crate::query::sql::{BinaryExpr, BinaryOp, SqlExpr};
use crate::value::Value;

enum Simplified {
    True,
    False,
    Expr(SqlExpr),
}

impl Simplified {
    fn into_expr(self) -> SqlExpr {
        match self {
            Simplified::True => SqlExpr::bool(true),
            Simplified::False => SqlExpr::bool(false),
            Simplified::Expr(expr) => expr,
        }
    }
}

fn classify(expr: SqlExpr) -> Simplified {
    match expr {
        SqlExpr::Constant(Value::Bool(true)) => Simplified::True,
        SqlExpr::Constant(Value::Bool(false)) => Simplified::False,
        other => Simplified::Expr(other),
    }
}

/// Folds boolean literals out of `AND`, `OR` and `NOT`, bottom-up.
///
/// `TRUE AND x` and `FALSE OR x` reduce to `x`; `FALSE AND x` reduces to
/// `FALSE` and `TRUE OR x` to `TRUE`, in either operand order.
pub fn reduce_constants(predicate: SqlExpr) -> SqlExpr {
    predicate.transform_up(&mut fold)
}

fn fold(expr: SqlExpr) -> SqlExpr {
    match expr {
        SqlExpr::Binary(BinaryExpr {
            op: BinaryOp::And,
            left,
            right,
        }) => match (classify(*left), classify(*right)) {
            (Simplified::False, _) | (_, Simplified::False) => SqlExpr::bool(false),
            (Simplified::True, other) | (other, Simplified::True) => other.into_expr(),
            (Simplified::Expr(left), Simplified::Expr(right)) => SqlExpr::and(left, right),
        },
        SqlExpr::Binary(BinaryExpr {
            op: BinaryOp::Or,
            left,
            right,
        }) => match (classify(*left), classify(*right)) {
            (Simplified::True, _) | (_, Simplified::True) => SqlExpr::bool(true),
            (Simplified::False, other) | (other, Simplified::False) => other.into_expr(),
            (Simplified::Expr(left), Simplified::Expr(right)) => SqlExpr::or(left, right),
        },
        SqlExpr::Not(operand) => match classify(*operand) {
            Simplified::True => SqlExpr::bool(false),
            Simplified::False => SqlExpr::bool(true),
            Simplified::Expr(expr) => SqlExpr::not(expr),
        },
        other => other,
    }
}
