//! Mutable SELECT statement builder.
//!
//! A [`SelectExpression`] is created per query source or subquery boundary and
//! mutated incrementally while operators are applied. The setters for limit,
//! offset and distinct keep LIMIT/OFFSET semantics intact by pushing the
//! current body down into a subquery when a later clause would otherwise
//! change its meaning.
//!
//! When [`SelectExpression::is_project_star`] is set, the columns exposed by
//! the star are tracked in a separate star list so that value buffer indexes
//! stay meaningful. [`SelectExpression::projection`] always returns the
//! effective projection, in buffer order.

use std::mem;

use tracing::debug;

use super::{
    lift_expression_from_subquery, AliasExpr, JoinExpr, JoinKind, Ordering, SqlExpr, TableExpr,
    COLUMN_ALIAS_PREFIX, SUBQUERY_ALIAS_PREFIX,
};
use crate::error::{PenumbraError, Result};
use crate::metadata::Property;
use crate::query::profile::{profile_counter, ProfileCounter};
use crate::query::source::QuerySource;
use crate::query::sql::ColumnExpr;
use crate::value::SqlType;

/// SQL SELECT statement under construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectExpression {
    alias: Option<String>,
    query_source: Option<QuerySource>,
    projection: Vec<SqlExpr>,
    star_projection: Vec<SqlExpr>,
    tables: Vec<TableExpr>,
    predicate: Option<SqlExpr>,
    order_by: Vec<Ordering>,
    limit: Option<SqlExpr>,
    offset: Option<SqlExpr>,
    is_distinct: bool,
    is_project_star: bool,
}

pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl SelectExpression {
    /// Creates an empty top-level select.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty select serving `source`.
    pub fn for_query_source(source: QuerySource) -> Self {
        Self {
            query_source: Some(source),
            ..Self::default()
        }
    }

    /// Alias when the select is used as a derived table.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Sets the derived-table alias.
    pub fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    /// Query source the select was created for.
    pub fn query_source(&self) -> Option<QuerySource> {
        self.query_source
    }

    /// Tags the select with a query source.
    pub fn set_query_source(&mut self, source: Option<QuerySource>) {
        self.query_source = source;
    }

    /// Effective projection, in value buffer order.
    pub fn projection(&self) -> &[SqlExpr] {
        if self.is_project_star && !self.star_projection.is_empty() {
            &self.star_projection
        } else {
            &self.projection
        }
    }

    /// Explicit projection entries emitted after any star.
    pub fn explicit_projection(&self) -> &[SqlExpr] {
        &self.projection
    }

    /// Columns known to be exposed by the star projection.
    pub fn star_projection(&self) -> &[SqlExpr] {
        &self.star_projection
    }

    /// `FROM` list.
    pub fn tables(&self) -> &[TableExpr] {
        &self.tables
    }

    /// Mutable access to one `FROM` entry.
    pub fn table_mut(&mut self, index: usize) -> Option<&mut TableExpr> {
        self.tables.get_mut(index)
    }

    /// Mutable access to a join entry.
    pub fn join_mut(&mut self, index: usize) -> Option<&mut JoinExpr> {
        match self.tables.get_mut(index) {
            Some(TableExpr::Join(join)) => Some(join),
            _ => None,
        }
    }

    /// `WHERE` predicate.
    pub fn predicate(&self) -> Option<&SqlExpr> {
        self.predicate.as_ref()
    }

    /// Replaces the `WHERE` predicate.
    pub fn set_predicate(&mut self, predicate: Option<SqlExpr>) {
        self.predicate = predicate;
    }

    /// Removes and returns the `WHERE` predicate.
    pub fn take_predicate(&mut self) -> Option<SqlExpr> {
        self.predicate.take()
    }

    /// ANDs `predicate` onto the current predicate.
    pub fn add_to_predicate(&mut self, predicate: SqlExpr) {
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => SqlExpr::and(existing, predicate),
            None => predicate,
        });
    }

    /// `ORDER BY` list.
    pub fn order_by(&self) -> &[Ordering] {
        &self.order_by
    }

    /// `LIMIT` expression.
    pub fn limit(&self) -> Option<&SqlExpr> {
        self.limit.as_ref()
    }

    /// `OFFSET` expression.
    pub fn offset(&self) -> Option<&SqlExpr> {
        self.offset.as_ref()
    }

    /// Whether the select is `DISTINCT`.
    pub fn is_distinct(&self) -> bool {
        self.is_distinct
    }

    /// Whether the select projects every column of its star table.
    pub fn is_project_star(&self) -> bool {
        self.is_project_star
    }

    /// Sets `LIMIT`. Setting a limit over an existing one pushes the current
    /// body down first.
    pub fn set_limit(&mut self, limit: Option<SqlExpr>) -> Result<()> {
        if limit.is_some() && self.limit.is_some() {
            self.push_down_subquery()?;
            self.lift_order_by()?;
        }
        self.limit = limit;
        Ok(())
    }

    /// Sets `OFFSET`. Setting an offset under an existing limit pushes the
    /// current body down first.
    pub fn set_offset(&mut self, offset: Option<SqlExpr>) -> Result<()> {
        if self.limit.is_some() && offset.is_some() {
            self.push_down_subquery()?;
            self.lift_order_by()?;
        }
        self.offset = offset;
        Ok(())
    }

    /// Sets `DISTINCT`, pushing down first when a limit or offset is present.
    /// Orderings that are not projected are dropped when turning distinct on.
    pub fn set_distinct(&mut self, distinct: bool) -> Result<()> {
        if self.offset.is_some() || self.limit.is_some() {
            self.push_down_subquery()?;
        }
        if distinct {
            let projection = self.projection();
            let unprojected = self.order_by.iter().any(|ordering| {
                let key = ordering.expr.unwrap_alias();
                !projection
                    .iter()
                    .any(|p| p == &ordering.expr || p.unwrap_alias() == key)
            });
            if unprojected {
                self.order_by.clear();
            }
        }
        self.is_distinct = distinct;
        Ok(())
    }

    /// Toggles the star projection. Enabling moves the explicit projection into
    /// the star list; disabling forgets the star list.
    pub fn set_project_star(&mut self, project_star: bool) {
        self.is_project_star = project_star;
        if project_star {
            let moved = mem::take(&mut self.projection);
            self.star_projection.extend(moved);
        } else {
            self.star_projection.clear();
        }
    }

    /// Replaces the star with the explicit columns it stands for.
    pub fn explode_star_projection(&mut self) {
        if self.is_project_star {
            let mut exploded = mem::take(&mut self.star_projection);
            exploded.append(&mut self.projection);
            self.projection = exploded;
            self.is_project_star = false;
        }
    }

    /// Appends a table to the `FROM` list.
    pub fn add_table(&mut self, table: TableExpr) {
        self.tables.push(table);
    }

    /// Removes every table.
    pub fn clear_tables(&mut self) {
        self.tables.clear();
    }

    /// Removes every explicit and star projection entry.
    pub fn clear_projection(&mut self) {
        self.projection.clear();
        self.star_projection.clear();
        self.is_project_star = false;
    }

    /// Drops projection entries from `index` onwards.
    pub fn remove_range_from_projection(&mut self, index: usize) {
        if self.is_project_star && !self.star_projection.is_empty() {
            self.star_projection.truncate(index);
        } else {
            self.projection.truncate(index);
        }
    }

    /// Drops every clause.
    pub fn clear(&mut self) {
        self.tables.clear();
        self.projection.clear();
        self.star_projection.clear();
        self.order_by.clear();
        self.predicate = None;
        self.limit = None;
        self.offset = None;
        self.is_distinct = false;
        self.is_project_star = false;
    }

    /// True for a bare single-table select with no clauses applied.
    pub fn is_identity_query(&self) -> bool {
        !self.is_project_star
            && !self.is_distinct
            && self.predicate.is_none()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.projection.is_empty()
            && self.order_by.is_empty()
            && self.tables.len() == 1
    }

    /// Adds an ordering unless an equivalent one is already present.
    pub fn add_to_order_by(&mut self, ordering: Ordering) -> &Ordering {
        let key = ordering.expr.unwrap_alias().clone();
        let position = self
            .order_by
            .iter()
            .position(|o| o.expr.unwrap_alias() == &key);
        let index = match position {
            Some(index) => index,
            None => {
                self.order_by.push(ordering);
                self.order_by.len() - 1
            }
        };
        &self.order_by[index]
    }

    /// Puts `orderings` ahead of the current ordering, dropping duplicates.
    pub fn prepend_to_order_by(&mut self, orderings: impl IntoIterator<Item = Ordering>) {
        let existing = mem::take(&mut self.order_by);
        for ordering in orderings.into_iter().chain(existing) {
            self.add_to_order_by(ordering);
        }
    }

    /// Replaces the ordering wholesale.
    pub fn replace_order_by(&mut self, orderings: Vec<Ordering>) {
        self.order_by = orderings;
    }

    /// Removes every ordering.
    pub fn clear_order_by(&mut self) {
        self.order_by.clear();
    }

    /// Position of `expr` in the effective projection, matching through aliases.
    pub fn get_projection_index(&self, expr: &SqlExpr) -> Option<usize> {
        self.projection().iter().position(|p| {
            p == expr || matches!(p, SqlExpr::Alias(alias) if alias.expr.as_ref() == expr)
        })
    }

    /// Adds `expr` to the projection and returns its buffer index.
    ///
    /// Structurally equal entries are reused. Aliases are made unique,
    /// case-insensitively, when this select is a derived table or `expr` is
    /// itself an alias. A known star is exploded first so earlier indexes
    /// stay valid.
    pub fn add_to_projection(&mut self, expr: SqlExpr) -> usize {
        if let Some(index) = self.get_projection_index(&expr) {
            return index;
        }
        if self.is_project_star && !self.star_projection.is_empty() {
            self.explode_star_projection();
        }

        let ordered = !matches!(expr, SqlExpr::Column(_))
            && self.order_by.iter().any(|o| o.expr == expr);
        let to_add = if self.alias.is_some() || matches!(expr, SqlExpr::Alias(_)) {
            self.create_unique_projection(&expr, None)
        } else if ordered {
            self.create_unique_projection(&expr, Some(COLUMN_ALIAS_PREFIX))
        } else {
            expr
        };

        self.projection.push(to_add);
        self.is_project_star = false;
        self.projection.len() - 1
    }

    /// Returns `expr` renamed so that no projected name collides with it.
    ///
    /// A natural name is tried as is, then with `0`, `1`, ... appended. An
    /// explicit prefix always gets a numeric suffix.
    fn create_unique_projection(&mut self, expr: &SqlExpr, prefix: Option<&str>) -> SqlExpr {
        let current = expr.column_name().map(str::to_owned);
        let (base, mut candidate, mut counter) = match (prefix, current.as_deref()) {
            (Some(prefix), _) => (prefix.to_owned(), format!("{prefix}0"), 1),
            (None, Some(name)) => (name.to_owned(), name.to_owned(), 0),
            (None, None) => (
                COLUMN_ALIAS_PREFIX.to_owned(),
                format!("{COLUMN_ALIAS_PREFIX}0"),
                1,
            ),
        };
        while self
            .projection()
            .iter()
            .filter_map(SqlExpr::column_name)
            .any(|name| same_name(name, &candidate))
        {
            candidate = format!("{base}{counter}");
            counter += 1;
        }

        let keeps_name = matches!(expr, SqlExpr::Column(_) | SqlExpr::Alias(_))
            && current.as_deref().is_some_and(|name| same_name(name, &candidate));
        let updated = if keeps_name {
            expr.clone()
        } else {
            let inner = match expr {
                SqlExpr::Alias(alias) => alias.expr.as_ref().clone(),
                other => other.clone(),
            };
            SqlExpr::Alias(AliasExpr {
                alias: Some(candidate),
                expr: Box::new(inner),
            })
        };

        if let Some(ordering) = self.order_by.iter_mut().find(|o| &o.expr == expr) {
            ordering.expr = updated.clone();
        }
        updated
    }

    /// Moves the whole current body into a fresh derived table that becomes
    /// the only `FROM` entry, and returns it.
    ///
    /// The outer select projects the child's columns through a star. The
    /// child keeps its ordering only when a limit or offset gives it meaning.
    pub fn push_down_subquery(&mut self) -> Result<&mut SelectExpression> {
        let alias = self.next_subquery_alias();
        let mut child = SelectExpression {
            alias: Some(alias.clone()),
            query_source: self.query_source,
            is_project_star: self.is_project_star || self.projection().is_empty(),
            ..SelectExpression::default()
        };

        let to_move = if self.is_project_star {
            mem::take(&mut self.star_projection)
        } else {
            mem::take(&mut self.projection)
        };
        let mut outer_projection = Vec::with_capacity(to_move.len());
        let mut renamed: Vec<(SqlExpr, SqlExpr)> = Vec::new();
        for expr in to_move {
            let added = child.create_unique_projection(&expr, None);
            if matches!(expr, SqlExpr::Alias(_)) {
                renamed.push((expr, added.clone()));
            }
            let lifted = lift_expression_from_subquery(&added, &alias)
                .ok_or_else(|| PenumbraError::invariant("pushed-down projection has no name"))?;
            if child.is_project_star {
                child.star_projection.push(added);
            } else {
                child.projection.push(added);
            }
            outer_projection.push(lifted);
        }

        child.tables = mem::take(&mut self.tables);
        for ordering in mem::take(&mut self.order_by) {
            let expr = renamed
                .iter()
                .find(|(old, _)| old == &ordering.expr)
                .map(|(_, new)| new.clone())
                .unwrap_or(ordering.expr);
            child.add_to_order_by(Ordering {
                expr,
                direction: ordering.direction,
            });
        }
        child.predicate = self.predicate.take();
        child.limit = self.limit.take();
        child.offset = self.offset.take();
        child.is_distinct = self.is_distinct;

        if child.limit.is_none() && child.offset.is_none() {
            child.order_by.clear();
        }

        self.clear();
        self.projection = outer_projection;
        self.set_project_star(true);
        self.tables.push(TableExpr::Select(Box::new(child)));

        profile_counter(ProfileCounter::PushDown);
        debug!(alias = %alias, "select.push_down");

        match self.tables.last_mut() {
            Some(TableExpr::Select(child)) => Ok(child),
            _ => Err(PenumbraError::invariant("push-down lost its subquery")),
        }
    }

    /// Copies the ordering of the leading derived table outward, re-expressed
    /// against that table's alias.
    pub fn lift_order_by(&mut self) -> Result<()> {
        let mirror_star = self.is_project_star && !self.star_projection.is_empty();
        let Some(TableExpr::Select(subquery)) = self.tables.first_mut() else {
            return Ok(());
        };
        if subquery.order_by.is_empty() {
            subquery.lift_order_by()?;
        }
        let sub_alias = subquery
            .alias
            .clone()
            .ok_or_else(|| PenumbraError::invariant("derived table without alias"))?;
        let unknown_star = subquery.is_project_star && subquery.star_projection.is_empty();

        let mut lifted = Vec::with_capacity(subquery.order_by.len());
        let mut exposed = Vec::new();
        for ordering in subquery.order_by.clone() {
            let expr = if unknown_star {
                lift_expression_from_subquery(&ordering.expr, &sub_alias)
            } else {
                let before = subquery.projection().len();
                let index = subquery.add_to_projection(ordering.expr.clone());
                let column = lift_expression_from_subquery(&subquery.projection()[index], &sub_alias);
                if index >= before {
                    exposed.extend(column.clone());
                }
                column
            };
            let expr = expr.ok_or_else(|| PenumbraError::invariant("lifted ordering has no name"))?;
            lifted.push(Ordering {
                expr,
                direction: ordering.direction,
            });
        }
        if subquery.limit.is_none() && subquery.offset.is_none() {
            subquery.order_by.clear();
        }

        if mirror_star {
            self.star_projection.extend(exposed);
        }
        self.order_by.extend(lifted);
        Ok(())
    }

    /// Projects `inner` through the derived table at `index` and returns the
    /// outer reference to it.
    pub(crate) fn lift_through(&mut self, index: usize, inner: SqlExpr) -> Result<SqlExpr> {
        let mirror_star =
            self.is_project_star && !self.star_projection.is_empty() && index == 0;
        let subquery = match self.tables.get_mut(index).map(TableExpr::unwrap_join_mut) {
            Some(TableExpr::Select(subquery)) => subquery,
            Some(_) => return Ok(inner),
            None => return Err(PenumbraError::invariant("table index out of range")),
        };
        let sub_alias = subquery
            .alias
            .clone()
            .ok_or_else(|| PenumbraError::invariant("derived table without alias"))?;

        if subquery.is_project_star && subquery.star_projection.is_empty() {
            let name = inner
                .column_name()
                .ok_or_else(|| PenumbraError::invariant("star column has no name"))?;
            return Ok(SqlExpr::source_column(
                name,
                sub_alias,
                inner.sql_type(),
                inner.query_source(),
            ));
        }

        let before = subquery.projection().len();
        let position = subquery.add_to_projection(inner);
        let lifted = lift_expression_from_subquery(&subquery.projection()[position], &sub_alias)
            .ok_or_else(|| PenumbraError::invariant("projected column has no name"))?;
        if position >= before && mirror_star {
            self.star_projection.push(lifted.clone());
        }
        Ok(lifted)
    }

    /// Expression referring to `property` of the table serving `source`,
    /// projected outward through any derived tables in between.
    pub fn bind_property(&mut self, property: &Property, source: QuerySource) -> Result<SqlExpr> {
        let index = self
            .get_table_for_query_source(source)
            .ok_or_else(|| PenumbraError::invariant("no table serves the query source"))?;
        let inner = match self.tables[index].unwrap_join_mut() {
            TableExpr::Table(table) => {
                return Ok(SqlExpr::source_column(
                    property.column.clone(),
                    table.alias.clone(),
                    property.sql_type(),
                    Some(source),
                ))
            }
            TableExpr::Select(subquery) => subquery.bind_property(property, source)?,
            TableExpr::Join(_) => return Err(PenumbraError::invariant("nested join wrapper")),
        };
        self.lift_through(index, inner)
    }

    /// Expression referring to `column` of the table aliased `table_alias`,
    /// which may be nested inside derived tables.
    pub fn bind_column(&mut self, table_alias: &str, column: &str, ty: SqlType) -> Result<SqlExpr> {
        for table in &self.tables {
            if table.alias() == Some(table_alias) {
                return Ok(SqlExpr::source_column(
                    column,
                    table_alias,
                    ty,
                    table.query_source(),
                ));
            }
        }
        let index = self
            .tables
            .iter()
            .position(|table| {
                let mut aliases = Vec::new();
                table.collect_aliases(&mut aliases);
                aliases.iter().any(|a| a == table_alias)
            })
            .ok_or_else(|| PenumbraError::invariant("unknown table alias"))?;
        let inner = match self.tables[index].unwrap_join_mut() {
            TableExpr::Select(subquery) => subquery.bind_column(table_alias, column, ty)?,
            _ => return Err(PenumbraError::invariant("alias nested in a base table")),
        };
        self.lift_through(index, inner)
    }

    /// True when this select, or anything nested in it, serves `source`.
    pub fn handles_query_source(&self, source: QuerySource) -> bool {
        self.query_source == Some(source)
            || self.tables.iter().any(|t| t.handles_query_source(source))
    }

    /// Index of the table serving `source`, falling back to the star table.
    pub fn get_table_for_query_source(&self, source: QuerySource) -> Option<usize> {
        self.tables
            .iter()
            .position(|t| t.query_source() == Some(source) || t.handles_query_source(source))
            .or_else(|| (self.is_project_star && !self.tables.is_empty()).then_some(0))
    }

    /// Appends every table alias declared in this select, recursively.
    pub fn collect_table_aliases(&self, out: &mut Vec<String>) {
        for table in &self.tables {
            table.collect_aliases(out);
        }
    }

    /// Every table alias in scope of this select, including its own.
    pub fn table_aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        if let Some(alias) = &self.alias {
            aliases.push(alias.clone());
        }
        self.collect_table_aliases(&mut aliases);
        aliases
    }

    /// Returns `base`, or `base` with a numeric suffix, unused in this tree.
    pub fn unique_table_alias(&self, base: &str) -> String {
        let taken = self.table_aliases();
        let mut candidate = base.to_owned();
        let mut counter = 0usize;
        while taken.iter().any(|a| same_name(a, &candidate)) {
            candidate = format!("{base}{counter}");
            counter += 1;
        }
        candidate
    }

    /// Next free `t0`, `t1`, ... alias in this tree.
    pub fn next_subquery_alias(&self) -> String {
        let taken = self.table_aliases();
        (0usize..)
            .map(|n| format!("{SUBQUERY_ALIAS_PREFIX}{n}"))
            .find(|candidate| !taken.iter().any(|a| same_name(a, candidate)))
            .unwrap_or_else(|| SUBQUERY_ALIAS_PREFIX.to_owned())
    }

    /// Renames table alias `old` to `new` in declarations and column references.
    pub fn rename_table_alias(&mut self, old: &str, new: &str) {
        self.for_each_column_mut(&mut |col| {
            if col.table_alias == old {
                col.table_alias = new.to_owned();
            }
        });
        if self.alias.as_deref() == Some(old) {
            self.alias = Some(new.to_owned());
        }
        self.rename_declarations(old, new);
    }

    pub(crate) fn rename_declarations(&mut self, old: &str, new: &str) {
        for table in &mut self.tables {
            table.rename_declarations(old, new);
        }
    }

    /// True when some column reference points at a table outside this select.
    pub fn is_correlated(&self) -> bool {
        let mut aliases = Vec::new();
        self.collect_table_aliases(&mut aliases);
        let mut correlated = false;
        self.for_each_column(&mut |col| {
            if !aliases.iter().any(|a| a == &col.table_alias) {
                correlated = true;
            }
        });
        correlated
    }

    /// Calls `f` on every column reference in every clause, recursively.
    pub fn for_each_column(&self, f: &mut dyn FnMut(&ColumnExpr)) {
        let scalars = self
            .projection
            .iter()
            .chain(&self.star_projection)
            .chain(self.predicate.iter())
            .chain(self.order_by.iter().map(|o| &o.expr))
            .chain(self.limit.iter())
            .chain(self.offset.iter());
        for expr in scalars {
            expr.for_each_column(f);
        }
        for table in &self.tables {
            table.for_each_column(f);
        }
    }

    /// Applies `f` to every column reference in every clause, recursively.
    pub fn for_each_column_mut(&mut self, f: &mut dyn FnMut(&mut ColumnExpr)) {
        let scalars = self
            .projection
            .iter_mut()
            .chain(self.star_projection.iter_mut())
            .chain(self.predicate.iter_mut())
            .chain(self.order_by.iter_mut().map(|o| &mut o.expr))
            .chain(self.limit.iter_mut())
            .chain(self.offset.iter_mut());
        for expr in scalars {
            expr.for_each_column_mut(f);
        }
        for table in &mut self.tables {
            table.for_each_column_mut(f);
        }
    }

    /// Copy sharing nothing with the original, under a new alias.
    pub fn clone_with_alias(&self, alias: Option<String>) -> SelectExpression {
        let mut copy = self.clone();
        copy.alias = alias;
        copy
    }

    fn add_join(
        &mut self,
        kind: JoinKind,
        table: TableExpr,
        projection: Vec<SqlExpr>,
    ) -> usize {
        if !projection.is_empty() {
            if self.is_project_star && !self.star_projection.is_empty() {
                self.explode_star_projection();
            }
            self.projection.extend(projection);
        }
        self.tables.push(TableExpr::Join(JoinExpr::new(kind, table)));
        self.tables.len() - 1
    }

    /// Adds a `CROSS JOIN`, appending `projection` verbatim. Returns the table index.
    pub fn add_cross_join(&mut self, table: TableExpr, projection: Vec<SqlExpr>) -> usize {
        self.add_join(JoinKind::Cross, table, projection)
    }

    /// Adds a `CROSS JOIN LATERAL`, appending `projection` verbatim.
    pub fn add_cross_join_lateral(&mut self, table: TableExpr, projection: Vec<SqlExpr>) -> usize {
        self.add_join(JoinKind::CrossLateral, table, projection)
    }

    /// Adds an `INNER JOIN`. `inner_predicate` is ANDed onto the `WHERE` clause.
    pub fn add_inner_join(
        &mut self,
        table: TableExpr,
        projection: Vec<SqlExpr>,
        inner_predicate: Option<SqlExpr>,
    ) -> usize {
        let index = self.add_join(JoinKind::Inner, table, projection);
        if let Some(predicate) = inner_predicate {
            self.add_to_predicate(predicate);
        }
        index
    }

    /// Adds a `LEFT JOIN`, appending `projection` verbatim.
    pub fn add_left_outer_join(&mut self, table: TableExpr, projection: Vec<SqlExpr>) -> usize {
        self.add_join(JoinKind::LeftOuter, table, projection)
    }
}
