//! Flattens composed operators into a single relational command.
//!
//! A `SelectMany`, `Join` or `GroupJoin` whose two sides are single
//! commands becomes one select with a join, plus a composite shaper that
//! reads the inner side past the outer columns. A `Project` over a single
//! command becomes a projection shaper on that command.
//!
//! When a side is not a single command the operator stays client-evaluated
//! over its flattened children, as long as its inner side can run on its
//! own. A correlated inner is rejected with `Unsupported`, except for a
//! `SelectMany` when lateral joins are enabled.

use tracing::debug;

use crate::config::CompilerOptions;
use crate::error::{PenumbraError, Result};
use crate::metadata::ModelMetadata;
use crate::query::operators::QueryOperator;
use crate::query::profile::{profile_counter, ProfileCounter};
use crate::query::shaper::{GroupingShaper, ProjectionShaper, ResultSelector, Shaper};
use crate::query::source::{QuerySource, QuerySourceMapping};
use crate::query::sql::select::same_name;
use crate::query::sql::{Ordering, SelectExpression, SqlExpr, TableExpr};

/// Which join a composed clause becomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Composition {
    SelectMany,
    OuterApply,
    Join,
    GroupJoin,
}

/// Inner side, ready to be joined.
struct PreparedInner {
    table: TableExpr,
    columns: Vec<SqlExpr>,
    correlated: bool,
    key: Option<SqlExpr>,
}

/// Rewrites composed operators into joined commands.
pub struct QueryFlattener<'a> {
    model: &'a dyn ModelMetadata,
    options: &'a CompilerOptions,
}

impl<'a> QueryFlattener<'a> {
    /// Flattener resolving keys through `model`.
    pub fn new(model: &'a dyn ModelMetadata, options: &'a CompilerOptions) -> Self {
        Self { model, options }
    }

    /// Flattens `op` bottom-up, updating `mapping` with the new location of
    /// every source whose value moves inside a composed result.
    pub fn flatten(
        &self,
        op: QueryOperator,
        mapping: &mut QuerySourceMapping,
    ) -> Result<QueryOperator> {
        match op {
            QueryOperator::ShapedQuery { .. }
            | QueryOperator::GroupJoinQuery { .. }
            | QueryOperator::IncludeCompiled { .. } => Ok(op),
            QueryOperator::DefaultIfEmpty(inner) => Ok(QueryOperator::DefaultIfEmpty(Box::new(
                self.flatten(*inner, mapping)?,
            ))),
            QueryOperator::Project {
                source,
                query_source,
                projector,
            } => match self.flatten(*source, mapping)? {
                QueryOperator::ShapedQuery { select, shaper } => {
                    for hidden in shaper.addressable_query_sources() {
                        mapping.remove(hidden);
                    }
                    mapping.add_root(query_source);
                    debug!(%query_source, "flatten.projection");
                    Ok(QueryOperator::ShapedQuery {
                        select,
                        shaper: Shaper::Projection(ProjectionShaper::new(
                            query_source,
                            shaper,
                            projector,
                        )),
                    })
                }
                other => {
                    debug!(%query_source, "flatten.client_projection");
                    Ok(QueryOperator::Project {
                        source: Box::new(other),
                        query_source,
                        projector,
                    })
                }
            },
            QueryOperator::Include {
                source,
                specifications,
            } => Ok(QueryOperator::Include {
                source: Box::new(self.flatten(*source, mapping)?),
                specifications,
            }),
            QueryOperator::SelectMany {
                outer,
                inner,
                query_source,
                result_selector,
            } => {
                let outer = self.flatten(*outer, mapping)?;
                let (inner, outer_apply) = match self.flatten(*inner, mapping)? {
                    QueryOperator::DefaultIfEmpty(inner)
                        if matches!(inner.as_ref(), QueryOperator::ShapedQuery { .. }) =>
                    {
                        (*inner, true)
                    }
                    other => (other, false),
                };
                let composition = if outer_apply {
                    Composition::OuterApply
                } else {
                    Composition::SelectMany
                };
                match (outer, inner) {
                    (
                        QueryOperator::ShapedQuery {
                            select: outer_select,
                            shaper: outer_shaper,
                        },
                        QueryOperator::ShapedQuery {
                            select: inner_select,
                            shaper: inner_shaper,
                        },
                    ) => self.compose(
                        composition,
                        (outer_select, outer_shaper),
                        (inner_select, inner_shaper),
                        None,
                        query_source,
                        result_selector,
                        mapping,
                    ),
                    (outer, inner) => {
                        debug!(%query_source, "flatten.client_select_many");
                        let inner = if outer_apply {
                            QueryOperator::DefaultIfEmpty(Box::new(inner))
                        } else {
                            inner
                        };
                        Ok(QueryOperator::SelectMany {
                            outer: Box::new(outer),
                            inner: Box::new(inner),
                            query_source,
                            result_selector,
                        })
                    }
                }
            }
            QueryOperator::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                query_source,
                result_selector,
            } => {
                let outer = self.flatten(*outer, mapping)?;
                let inner = self.flatten(*inner, mapping)?;
                match (outer, inner) {
                    (
                        QueryOperator::ShapedQuery {
                            select: outer_select,
                            shaper: outer_shaper,
                        },
                        QueryOperator::ShapedQuery {
                            select: inner_select,
                            shaper: inner_shaper,
                        },
                    ) => self.compose(
                        Composition::Join,
                        (outer_select, outer_shaper),
                        (inner_select, inner_shaper),
                        Some((outer_key.sql, inner_key.sql)),
                        query_source,
                        result_selector,
                        mapping,
                    ),
                    (outer, inner) => {
                        debug!(%query_source, "flatten.client_join");
                        Ok(QueryOperator::Join {
                            outer: Box::new(outer),
                            inner: Box::new(inner),
                            outer_key,
                            inner_key,
                            query_source,
                            result_selector,
                        })
                    }
                }
            }
            QueryOperator::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                query_source,
                result_selector,
            } => {
                let outer = self.flatten(*outer, mapping)?;
                let inner = self.flatten(*inner, mapping)?;
                match (outer, inner) {
                    (
                        QueryOperator::ShapedQuery {
                            select: outer_select,
                            shaper: outer_shaper,
                        },
                        QueryOperator::ShapedQuery {
                            select: inner_select,
                            shaper: inner_shaper,
                        },
                    ) => self.compose(
                        Composition::GroupJoin,
                        (outer_select, outer_shaper),
                        (inner_select, inner_shaper),
                        Some((outer_key.sql, inner_key.sql)),
                        query_source,
                        result_selector,
                        mapping,
                    ),
                    (outer, inner) => {
                        debug!(%query_source, "flatten.client_group_join");
                        Ok(QueryOperator::GroupJoin {
                            outer: Box::new(outer),
                            inner: Box::new(inner),
                            outer_key,
                            inner_key,
                            query_source,
                            result_selector,
                        })
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compose(
        &self,
        composition: Composition,
        (mut select, outer_shaper): (SelectExpression, Shaper),
        (mut inner_select, inner_shaper): (SelectExpression, Shaper),
        keys: Option<(SqlExpr, SqlExpr)>,
        query_source: QuerySource,
        result_selector: ResultSelector,
        mapping: &mut QuerySourceMapping,
    ) -> Result<QueryOperator> {
        profile_counter(ProfileCounter::Flatten);
        let (outer_key, inner_key) = match keys {
            Some((outer, inner)) => (Some(outer), Some(inner)),
            None => (None, None),
        };
        let outer_key = prepare_outer(&mut select, outer_key)?;
        let inner = prepare_inner(&select, &mut inner_select, inner_key)?;
        let reader_offset = select.projection().len();

        match composition {
            Composition::SelectMany if inner.correlated => {
                if !self.options.lateral_joins {
                    return Err(PenumbraError::Unsupported(
                        "correlated SelectMany needs lateral joins",
                    ));
                }
                select.add_cross_join_lateral(inner.table, inner.columns);
            }
            Composition::SelectMany => {
                select.add_cross_join(inner.table, inner.columns);
            }
            Composition::OuterApply => {
                if inner.correlated {
                    return Err(PenumbraError::Unsupported(
                        "correlated DefaultIfEmpty cannot be flattened",
                    ));
                }
                select.add_left_outer_join(inner.table, inner.columns);
            }
            Composition::Join | Composition::GroupJoin => {
                if inner.correlated {
                    return Err(PenumbraError::Unsupported(
                        "join inner sequence refers to the outer query",
                    ));
                }
                let (Some(outer_key), Some(inner_key)) = (outer_key.clone(), inner.key) else {
                    return Err(PenumbraError::invariant("join without keys"));
                };
                let index = if composition == Composition::Join {
                    select.add_inner_join(inner.table, inner.columns, None)
                } else {
                    select.add_left_outer_join(inner.table, inner.columns)
                };
                let join = select
                    .join_mut(index)
                    .ok_or_else(|| PenumbraError::invariant("join was not added"))?;
                // Null keys never match, as with a client-side hash join.
                join.predicate = Some(SqlExpr::NotNullable(Box::new(SqlExpr::eq(
                    outer_key, inner_key,
                ))));
            }
        }

        let mut inner_shaper = inner_shaper.with_offset(reader_offset);
        inner_shaper.update_query_source(query_source);
        let outer_sources = outer_shaper.addressable_query_sources();
        let inner_sources = inner_shaper.addressable_query_sources();
        debug!(
            ?composition,
            %query_source,
            reader_offset,
            "flatten.composed"
        );

        if composition == Composition::GroupJoin {
            if let Some(key) = outer_key {
                select.add_to_order_by(Ordering::asc(key));
            }
            for ordering in self.outer_key_orderings(&select, &outer_shaper)? {
                select.add_to_order_by(ordering);
            }
            result_selector.remap(mapping, &outer_sources, &inner_sources);
            for source in &inner_sources {
                mapping.remove(*source);
            }
            return Ok(QueryOperator::GroupJoinQuery {
                select,
                shaper: Shaper::Grouping(GroupingShaper {
                    query_source,
                    key: Box::new(outer_shaper),
                    element: Box::new(inner_shaper),
                }),
                result_selector,
                outer_includes: Vec::new(),
                inner_includes: Vec::new(),
            });
        }

        result_selector.remap(mapping, &outer_sources, &inner_sources);
        Ok(QueryOperator::ShapedQuery {
            select,
            shaper: Shaper::composite(query_source, outer_shaper, inner_shaper, result_selector),
        })
    }

    /// Orderings over the primary key of every outer entity, so that rows of
    /// one outer stay consecutive.
    fn outer_key_orderings(
        &self,
        select: &SelectExpression,
        outer_shaper: &Shaper,
    ) -> Result<Vec<Ordering>> {
        let mut orderings = Vec::new();
        for source in outer_shaper.query_sources() {
            let Some(entity) = outer_shaper.find_entity_shaper(source) else {
                continue;
            };
            for property in self.model.primary_key(entity.entity_type())? {
                let index = entity
                    .absolute_index_of(&property.name)
                    .ok_or_else(|| PenumbraError::invariant("key property was not projected"))?;
                let expr = select
                    .projection()
                    .get(index)
                    .ok_or_else(|| PenumbraError::invariant("key index outside projection"))?
                    .unwrap_alias()
                    .clone();
                orderings.push(Ordering::asc(expr));
            }
        }
        Ok(orderings)
    }
}

/// Pushes the outer down when joining would change what its limit, offset
/// or distinct apply to, and rebases its key.
fn prepare_outer(select: &mut SelectExpression, key: Option<SqlExpr>) -> Result<Option<SqlExpr>> {
    let pushed = select.limit().is_some() || select.offset().is_some() || select.is_distinct();
    if pushed {
        select.push_down_subquery()?;
    }
    select.explode_star_projection();
    match key {
        Some(key) if pushed => Ok(Some(select.lift_through(0, key)?)),
        other => Ok(other),
    }
}

fn is_simple_table(select: &SelectExpression) -> bool {
    select.tables().len() == 1
        && matches!(select.tables()[0], TableExpr::Table(_))
        && select.predicate().is_none()
        && select.limit().is_none()
        && select.offset().is_none()
        && !select.is_distinct()
        && select.order_by().is_empty()
}

/// Turns the inner select into a joinable table whose aliases do not clash
/// with the outer's.
fn prepare_inner(
    outer: &SelectExpression,
    inner: &mut SelectExpression,
    key: Option<SqlExpr>,
) -> Result<PreparedInner> {
    let correlated = inner.is_correlated();
    let simple = is_simple_table(inner);
    if !simple {
        inner.push_down_subquery()?;
    }
    inner.explode_star_projection();
    let mut key = match key {
        Some(key) if !simple => Some(inner.lift_through(0, key)?),
        other => other,
    };

    let outer_aliases = outer.table_aliases();
    let mut taken = outer_aliases.clone();
    let mut declared = Vec::new();
    inner.collect_table_aliases(&mut declared);
    taken.extend(declared.iter().cloned());
    for alias in declared {
        if !outer_aliases.iter().any(|a| same_name(a, &alias)) {
            continue;
        }
        let fresh = fresh_alias(&alias, &taken);
        inner.rename_table_alias(&alias, &fresh);
        if let Some(key) = key.as_mut() {
            key.for_each_column_mut(&mut |col| {
                if col.table_alias == alias {
                    col.table_alias = fresh.clone();
                }
            });
        }
        taken.push(fresh);
    }

    let table = inner
        .tables()
        .first()
        .cloned()
        .ok_or_else(|| PenumbraError::invariant("inner select has no table"))?;
    Ok(PreparedInner {
        table,
        columns: inner.projection().to_vec(),
        correlated,
        key,
    })
}

/// `alias` with its numeric suffix replaced by the first free number.
fn fresh_alias(alias: &str, taken: &[String]) -> String {
    let base = alias.trim_end_matches(|c: char| c.is_ascii_digit());
    let base = if base.is_empty() { alias } else { base };
    (0usize..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken.iter().any(|a| same_name(a, candidate)))
        .unwrap_or_else(|| format!("{alias}_"))
}
