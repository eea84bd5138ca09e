use crate::query::sql::{BinaryExpr, BinaryOp, SqlExpr};

/// Materializes non-simple boolean operands of `=` and `<>` as
/// `CASE WHEN operand THEN TRUE ELSE FALSE END`.
pub fn expand_equality(predicate: SqlExpr) -> SqlExpr {
    predicate.transform_up(&mut expand)
}

fn is_simple(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Column(_) | SqlExpr::Constant(_) | SqlExpr::Parameter(_) | SqlExpr::Case(_) => {
            true
        }
        SqlExpr::Alias(alias) => is_simple(&alias.expr),
        _ => false,
    }
}

fn materialize(expr: SqlExpr) -> SqlExpr {
    if is_simple(&expr) {
        expr
    } else {
        SqlExpr::case_bool(expr)
    }
}

fn expand(expr: SqlExpr) -> SqlExpr {
    match expr {
        SqlExpr::Binary(BinaryExpr { op, left, right })
            if matches!(op, BinaryOp::Eq | BinaryOp::Ne)
                && left.is_boolean()
                && right.is_boolean()
                && !(is_simple(&left) && is_simple(&right)) =>
        {
            SqlExpr::binary(op, materialize(*left), materialize(*right))
        }
        other => other,
    }
}
