//! Null-semantics expansion.
//!
//! Predicates are written with two-valued null semantics: `a = b` holds when
//! both sides are null, `a <> b` holds when exactly one is. SQL compares
//! nulls as unknown, so comparisons over nullable operands are rewritten
//! until the SQL result matches.
//!
//! [`OptimizedNullExpander`] produces the short form and is only sound where
//! an unknown result behaves like false, i.e. outside any negation. It gives
//! up on the first `NOT` or nullable `<>` it meets. [`expand_nulls`] then
//! discards its output and applies [`expand_nulls_fallback`] to the original
//! predicate instead, which makes every comparison two-valued.

use tracing::trace;

use crate::query::sql::{BinaryExpr, BinaryOp, InExpr, SqlExpr};

/// Rewrites comparisons against a `NULL` literal into `IS [NOT] NULL` tests.
fn null_literal_comparison(op: BinaryOp, left: &SqlExpr, right: &SqlExpr) -> Option<SqlExpr> {
    let negated = match op {
        BinaryOp::Eq => false,
        BinaryOp::Ne => true,
        _ => return None,
    };
    let tested = match (left.is_null_constant(), right.is_null_constant()) {
        (true, true) => return Some(SqlExpr::bool(!negated)),
        (true, false) => right,
        (false, true) => left,
        (false, false) => return None,
    };
    let test = SqlExpr::is_null(tested.clone());
    Some(if negated { SqlExpr::not(test) } else { test })
}

/// Optimistic expander for predicates that contain no negation.
#[derive(Debug)]
pub struct OptimizedNullExpander {
    optimal: bool,
}

impl Default for OptimizedNullExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimizedNullExpander {
    /// Fresh expander, optimal until proven otherwise.
    pub fn new() -> Self {
        Self { optimal: true }
    }

    /// False once a construct the short form cannot express was met.
    pub fn is_optimal(&self) -> bool {
        self.optimal
    }

    /// Rewrites `expr`. Subtrees met after the expander became non-optimal
    /// are returned untouched.
    pub fn rewrite(&mut self, expr: SqlExpr) -> SqlExpr {
        if !self.optimal {
            return expr;
        }
        match expr {
            SqlExpr::NotNullable(_) => expr,
            SqlExpr::Not(operand) => {
                if matches!(operand.as_ref(), SqlExpr::IsNull(_)) {
                    SqlExpr::Not(operand)
                } else {
                    self.optimal = false;
                    trace!("optimizer.null_expansion.negation");
                    SqlExpr::Not(operand)
                }
            }
            SqlExpr::Binary(BinaryExpr { op, left, right }) if op.is_comparison() => {
                if let Some(test) = null_literal_comparison(op, &left, &right) {
                    return test;
                }
                let left = self.rewrite(*left);
                let right = self.rewrite(*right);
                if !self.optimal {
                    return SqlExpr::binary(op, left, right);
                }
                match (op, left.is_nullable(), right.is_nullable()) {
                    (BinaryOp::Eq, true, true) => SqlExpr::or(
                        SqlExpr::eq(left.clone(), right.clone()),
                        SqlExpr::and(SqlExpr::is_null(left), SqlExpr::is_null(right)),
                    ),
                    (BinaryOp::Ne, true, _) | (BinaryOp::Ne, _, true) => {
                        self.optimal = false;
                        trace!("optimizer.null_expansion.nullable_inequality");
                        SqlExpr::binary(op, left, right)
                    }
                    _ => SqlExpr::binary(op, left, right),
                }
            }
            other => other.map_children(&mut |child| self.rewrite(child)),
        }
    }
}

/// Expansion sound under any nesting: each comparison over nullable
/// operands becomes a predicate that is never unknown.
pub fn expand_nulls_fallback(expr: SqlExpr) -> SqlExpr {
    match expr {
        SqlExpr::NotNullable(_) => expr,
        SqlExpr::Binary(BinaryExpr { op, left, right }) if op.is_comparison() => {
            if let Some(test) = null_literal_comparison(op, &left, &right) {
                return test;
            }
            let left = expand_nulls_fallback(*left);
            let right = expand_nulls_fallback(*right);
            expand_comparison(op, left, right)
        }
        SqlExpr::In(InExpr { operand, values }) => {
            let operand = expand_nulls_fallback(*operand);
            let values = values.into_iter().map(expand_nulls_fallback).collect();
            let nullable = operand.is_nullable();
            let list = SqlExpr::in_list(operand.clone(), values);
            if nullable {
                SqlExpr::and(list, SqlExpr::is_not_null(operand))
            } else {
                list
            }
        }
        other => other.map_children(&mut expand_nulls_fallback),
    }
}

fn expand_comparison(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
    let (left_nullable, right_nullable) = (left.is_nullable(), right.is_nullable());
    if !left_nullable && !right_nullable {
        return SqlExpr::binary(op, left, right);
    }
    let compared = SqlExpr::binary(op, left.clone(), right.clone());
    match op {
        BinaryOp::Eq if left_nullable && right_nullable => SqlExpr::or(
            SqlExpr::and(
                SqlExpr::and(compared, SqlExpr::is_not_null(left.clone())),
                SqlExpr::is_not_null(right.clone()),
            ),
            SqlExpr::and(SqlExpr::is_null(left), SqlExpr::is_null(right)),
        ),
        BinaryOp::Ne if left_nullable && right_nullable => SqlExpr::and(
            SqlExpr::or(
                SqlExpr::or(compared, SqlExpr::is_null(left.clone())),
                SqlExpr::is_null(right.clone()),
            ),
            SqlExpr::or(SqlExpr::is_not_null(left), SqlExpr::is_not_null(right)),
        ),
        BinaryOp::Ne => {
            let nullable = if left_nullable { left } else { right };
            SqlExpr::or(compared, SqlExpr::is_null(nullable))
        }
        _ => {
            let mut guarded = compared;
            if left_nullable {
                guarded = SqlExpr::and(guarded, SqlExpr::is_not_null(left));
            }
            if right_nullable {
                guarded = SqlExpr::and(guarded, SqlExpr::is_not_null(right));
            }
            guarded
        }
    }
}

/// Runs the optimized expander on a copy of `predicate` and falls back to
/// [`expand_nulls_fallback`] on the untouched input when it gives up.
pub fn expand_nulls(predicate: SqlExpr) -> SqlExpr {
    let mut expander = OptimizedNullExpander::new();
    let optimized = expander.rewrite(predicate.clone());
    if expander.is_optimal() {
        optimized
    } else {
        trace!("optimizer.null_expansion.fallback");
        expand_nulls_fallback(predicate)
    }
}
