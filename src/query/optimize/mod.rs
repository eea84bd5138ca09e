//! Predicate optimizer pipeline.
//!
//! Every predicate placed in a statement runs through the same fixed
//! sequence of rewrites exactly once:
//!
//! 1. equality chains collapse into `IN` lists,
//! 2. negations are pushed inward,
//! 3. boolean literals are folded away,
//! 4. boolean comparison operands are materialized as `CASE`,
//! 5. negations are pushed inward again,
//! 6. null semantics are expanded, unless relational nulls were requested,
//!    in which case the predicate is wrapped in a marker instead.

mod constants;
mod equality;
mod in_list;
mod negation;
mod nulls;

pub use constants::reduce_constants;
pub use equality::expand_equality;
pub use in_list::collapse_in_lists;
pub use negation::normalize_negation;
pub use nulls::{expand_nulls, expand_nulls_fallback, OptimizedNullExpander};

use crate::config::CompilerOptions;
use crate::query::profile::{profile_timer, record_optimize_timer};
use crate::query::sql::{SelectExpression, SqlExpr, TableExpr};

/// Runs the predicate pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredicateOptimizer {
    use_relational_nulls: bool,
}

impl PredicateOptimizer {
    /// Optimizer with the given null semantics.
    pub fn new(use_relational_nulls: bool) -> Self {
        Self {
            use_relational_nulls,
        }
    }

    /// Optimizer configured from compiler options.
    pub fn from_options(options: &CompilerOptions) -> Self {
        Self::new(options.use_relational_nulls)
    }

    /// Optimizes one predicate.
    pub fn optimize(&self, predicate: SqlExpr) -> SqlExpr {
        let start = profile_timer();
        let predicate = collapse_in_lists(predicate);
        let predicate = normalize_negation(predicate);
        let predicate = reduce_constants(predicate);
        let predicate = expand_equality(predicate);
        let predicate = normalize_negation(predicate);
        let predicate = if self.use_relational_nulls {
            SqlExpr::NotNullable(Box::new(predicate))
        } else {
            expand_nulls(predicate)
        };
        record_optimize_timer(start);
        predicate
    }

    /// Optimizes the `WHERE` and join predicates of `select` and of every
    /// derived table beneath it.
    pub fn optimize_select(&self, select: &mut SelectExpression) {
        if let Some(predicate) = select.take_predicate() {
            select.set_predicate(Some(self.optimize(predicate)));
        }
        for index in 0..select.tables().len() {
            if let Some(table) = select.table_mut(index) {
                self.optimize_table(table);
            }
        }
    }

    fn optimize_table(&self, table: &mut TableExpr) {
        match table {
            TableExpr::Table(_) => {}
            TableExpr::Select(select) => self.optimize_select(select),
            TableExpr::Join(join) => {
                if let Some(predicate) = join.predicate.take() {
                    join.predicate = Some(self.optimize(predicate));
                }
                self.optimize_table(&mut join.table);
            }
        }
    }
}
