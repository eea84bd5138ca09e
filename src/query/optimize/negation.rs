use crate::query::sql::{BinaryExpr, BinaryOp, SqlExpr};
use crate::value::Value;

/// Pushes `NOT` through `AND`, `OR`, double negations and comparisons.
///
/// Ordering comparisons are only complemented when neither operand is
/// nullable: `NOT (a < b)` holds for a null `a`, while `a >= b` does not.
/// `NOT (x IS NULL)` and `NOT (x IN (...))` are left in place.
pub fn normalize_negation(predicate: SqlExpr) -> SqlExpr {
    match predicate {
        SqlExpr::Not(operand) => negate(*operand),
        other => other.map_children(&mut normalize_negation),
    }
}

fn negate(operand: SqlExpr) -> SqlExpr {
    match operand {
        SqlExpr::Not(inner) => normalize_negation(*inner),
        SqlExpr::Constant(Value::Bool(value)) => SqlExpr::bool(!value),
        SqlExpr::Binary(BinaryExpr { op, left, right }) => match op {
            BinaryOp::And => SqlExpr::or(negate(*left), negate(*right)),
            BinaryOp::Or => SqlExpr::and(negate(*left), negate(*right)),
            BinaryOp::Eq | BinaryOp::Ne => {
                let flipped = if op == BinaryOp::Eq {
                    BinaryOp::Ne
                } else {
                    BinaryOp::Eq
                };
                SqlExpr::binary(
                    flipped,
                    normalize_negation(*left),
                    normalize_negation(*right),
                )
            }
            _ => {
                let complement = op
                    .negated()
                    .filter(|_| !left.is_nullable() && !right.is_nullable());
                match complement {
                    Some(complement) => SqlExpr::binary(
                        complement,
                        normalize_negation(*left),
                        normalize_negation(*right),
                    ),
                    None => SqlExpr::not(
                        SqlExpr::binary(op, *left, *right).map_children(&mut normalize_negation),
                    ),
                }
            }
        },
        other => SqlExpr::not(normalize_negation(other)),
    }
}
