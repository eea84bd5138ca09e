use crate::query::sql::{BinaryExpr, BinaryOp, InExpr, SqlExpr};

/// Collapses equality disjunctions and inequality conjunctions over one
/// operand into `IN` lists.
///
/// `a = 1 OR a = 2` becomes `a IN (1, 2)` and `a <> 1 AND a <> 2` becomes
/// `NOT (a IN (1, 2))`. Both sides must test the same column or alias
/// against a non-null constant or a parameter.
pub fn collapse_in_lists(predicate: SqlExpr) -> SqlExpr {
    predicate.transform_up(&mut collapse)
}

fn collapse(expr: SqlExpr) -> SqlExpr {
    match expr {
        SqlExpr::Binary(BinaryExpr {
            op: BinaryOp::Or,
            left,
            right,
        }) => {
            let merged = match (positive(&left), positive(&right)) {
                (Some((a, mut lv)), Some((b, rv))) if a == b => {
                    lv.extend(rv);
                    Some(SqlExpr::in_list(a.clone(), lv))
                }
                _ => None,
            };
            merged.unwrap_or_else(|| SqlExpr::binary(BinaryOp::Or, *left, *right))
        }
        SqlExpr::Binary(BinaryExpr {
            op: BinaryOp::And,
            left,
            right,
        }) => {
            let merged = match (negative(&left), negative(&right)) {
                (Some((a, mut lv)), Some((b, rv))) if a == b => {
                    lv.extend(rv);
                    Some(SqlExpr::not(SqlExpr::in_list(a.clone(), lv)))
                }
                _ => None,
            };
            merged.unwrap_or_else(|| SqlExpr::binary(BinaryOp::And, *left, *right))
        }
        other => other,
    }
}

fn is_operand(expr: &SqlExpr) -> bool {
    matches!(expr, SqlExpr::Column(_) | SqlExpr::Alias(_))
}

fn is_candidate_value(expr: &SqlExpr) -> bool {
    match expr {
        SqlExpr::Constant(value) => !value.is_null(),
        SqlExpr::Parameter(_) => true,
        _ => false,
    }
}

/// Splits `operand op value` in either order.
fn comparison(expr: &SqlExpr, op: BinaryOp) -> Option<(&SqlExpr, Vec<SqlExpr>)> {
    let SqlExpr::Binary(bin) = expr else {
        return None;
    };
    if bin.op != op {
        return None;
    }
    if is_operand(&bin.left) && is_candidate_value(&bin.right) {
        Some((bin.left.as_ref(), vec![bin.right.as_ref().clone()]))
    } else if is_operand(&bin.right) && is_candidate_value(&bin.left) {
        Some((bin.right.as_ref(), vec![bin.left.as_ref().clone()]))
    } else {
        None
    }
}

fn positive(expr: &SqlExpr) -> Option<(&SqlExpr, Vec<SqlExpr>)> {
    match expr {
        SqlExpr::In(InExpr { operand, values }) if is_operand(operand) => {
            Some((operand.as_ref(), values.clone()))
        }
        other => comparison(other, BinaryOp::Eq),
    }
}

fn negative(expr: &SqlExpr) -> Option<(&SqlExpr, Vec<SqlExpr>)> {
    match expr {
        SqlExpr::Not(inner) => match inner.as_ref() {
            SqlExpr::In(InExpr { operand, values }) if is_operand(operand) => {
                Some((operand.as_ref(), values.clone()))
            }
            _ => None,
        },
        other => comparison(other, BinaryOp::Ne),
    }
}
