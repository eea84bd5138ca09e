//! Rewrites include requests into joins and related commands.
//!
//! Reference steps join the related table into the owner's command and
//! shape the related entity from the same row. Collection steps build a
//! separate command that joins the related table to a distinct copy of the
//! owner's command, ordered so results line up with the owner's rows.

use tracing::debug;

use crate::config::CompilerOptions;
use crate::error::{PenumbraError, Result};
use crate::metadata::{ModelMetadata, Navigation};
use crate::query::materializer::{Materializer, MaterializerFactory};
use crate::query::operators::{CompiledInclude, IncludeSpecification, QueryOperator, RelatedLoader};
use crate::query::optimize::PredicateOptimizer;
use crate::query::profile::{profile_counter, ProfileCounter};
use crate::query::shaper::{Buffering, EntityShaper, Shaper};
use crate::query::source::{Accessor, QuerySource};
use crate::query::sql::{
    lift_expression_from_subquery, Ordering, SelectExpression, SqlExpr, TableExpr,
    TableExpression,
};

/// Key equality between related tables.
///
/// Pairs are compared with relational null semantics, so a null foreign key
/// never matches. When only one side is nullable the other is cast to the
/// nullable type.
pub fn build_join_equality(pairs: Vec<(SqlExpr, SqlExpr)>) -> Result<SqlExpr> {
    let equalities = pairs.into_iter().map(|(left, right)| {
        let (left, right) = match (left.is_nullable(), right.is_nullable()) {
            (true, false) => {
                let ty = right.sql_type().as_nullable();
                (left, SqlExpr::cast(right, ty))
            }
            (false, true) => {
                let ty = left.sql_type().as_nullable();
                (SqlExpr::cast(left, ty), right)
            }
            _ => (left, right),
        };
        SqlExpr::NotNullable(Box::new(SqlExpr::eq(left, right)))
    });
    SqlExpr::and_all(equalities).ok_or(PenumbraError::Invalid("relationship has no key properties"))
}

/// Lowercased first letter of `table`, the default alias of its rows.
pub(crate) fn alias_base(table: &str) -> String {
    table
        .chars()
        .next()
        .map(|c| c.to_lowercase().collect())
        .unwrap_or_else(|| "t".to_owned())
}

/// Column of `property` of the entity `owner` shapes, as projected by `select`.
fn owner_column(select: &SelectExpression, owner: &EntityShaper, property: &str) -> Result<SqlExpr> {
    let index = owner
        .absolute_index_of(property)
        .ok_or_else(|| PenumbraError::invariant("owner property was not projected"))?;
    select
        .projection()
        .get(index)
        .map(|expr| expr.unwrap_alias().clone())
        .ok_or_else(|| PenumbraError::invariant("owner index outside projection"))
}

/// Compiles include requests.
pub struct IncludeRewriter<'a> {
    model: &'a dyn ModelMetadata,
    options: &'a CompilerOptions,
    optimizer: PredicateOptimizer,
    query_index: usize,
}

impl<'a> IncludeRewriter<'a> {
    /// Rewriter resolving navigations through `model`.
    pub fn new(model: &'a dyn ModelMetadata, options: &'a CompilerOptions) -> Self {
        Self {
            model,
            options,
            optimizer: PredicateOptimizer::from_options(options),
            query_index: 0,
        }
    }

    /// Replaces every [`QueryOperator::Include`] in `op` with its compiled form.
    pub fn rewrite(&mut self, op: QueryOperator) -> Result<QueryOperator> {
        match op {
            QueryOperator::Include {
                source,
                specifications,
            } => {
                let source = self.rewrite(*source)?;
                self.apply(source, &specifications)
            }
            QueryOperator::DefaultIfEmpty(inner) => {
                Ok(QueryOperator::DefaultIfEmpty(Box::new(self.rewrite(*inner)?)))
            }
            QueryOperator::Project {
                source,
                query_source,
                projector,
            } => Ok(QueryOperator::Project {
                source: Box::new(self.rewrite(*source)?),
                query_source,
                projector,
            }),
            QueryOperator::SelectMany {
                outer,
                inner,
                query_source,
                result_selector,
            } => Ok(QueryOperator::SelectMany {
                outer: Box::new(self.rewrite(*outer)?),
                inner: Box::new(self.rewrite(*inner)?),
                query_source,
                result_selector,
            }),
            QueryOperator::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                query_source,
                result_selector,
            } => Ok(QueryOperator::Join {
                outer: Box::new(self.rewrite(*outer)?),
                inner: Box::new(self.rewrite(*inner)?),
                outer_key,
                inner_key,
                query_source,
                result_selector,
            }),
            QueryOperator::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                query_source,
                result_selector,
            } => Ok(QueryOperator::GroupJoin {
                outer: Box::new(self.rewrite(*outer)?),
                inner: Box::new(self.rewrite(*inner)?),
                outer_key,
                inner_key,
                query_source,
                result_selector,
            }),
            other => Ok(other),
        }
    }

    fn apply(
        &mut self,
        source: QueryOperator,
        specifications: &[IncludeSpecification],
    ) -> Result<QueryOperator> {
        match source {
            QueryOperator::ShapedQuery { mut select, shaper } => {
                let mut includes = Vec::with_capacity(specifications.len());
                for spec in specifications {
                    includes.push(self.compile_shaped(&mut select, &shaper, spec)?);
                }
                Ok(QueryOperator::IncludeCompiled {
                    source: Box::new(QueryOperator::ShapedQuery { select, shaper }),
                    includes,
                })
            }
            QueryOperator::IncludeCompiled {
                source,
                mut includes,
            } => match self.apply(*source, specifications)? {
                QueryOperator::IncludeCompiled {
                    source,
                    includes: added,
                } => {
                    includes.extend(added);
                    Ok(QueryOperator::IncludeCompiled { source, includes })
                }
                other => Ok(QueryOperator::IncludeCompiled {
                    source: Box::new(other),
                    includes,
                }),
            },
            QueryOperator::GroupJoinQuery {
                mut select,
                shaper,
                result_selector,
                mut outer_includes,
                mut inner_includes,
            } => {
                let Shaper::Grouping(grouping) = &shaper else {
                    return Err(PenumbraError::invariant("group join without grouping shaper"));
                };
                for spec in specifications {
                    let (side, owner) = if let Some(owner) =
                        grouping.key.find_entity_shaper(spec.query_source)
                    {
                        (&mut outer_includes, owner)
                    } else if let Some(owner) = grouping.element.find_entity_shaper(spec.query_source) {
                        (&mut inner_includes, owner)
                    } else {
                        return Err(PenumbraError::Invalid("include source is not an entity"));
                    };
                    let loader = self.compile_path(&mut select, owner, spec)?;
                    side.push(CompiledInclude {
                        query_source: spec.query_source,
                        accessor: Accessor::root(),
                        loader,
                    });
                }
                Ok(QueryOperator::GroupJoinQuery {
                    select,
                    shaper,
                    result_selector,
                    outer_includes,
                    inner_includes,
                })
            }
            _ => Err(PenumbraError::Unsupported(
                "include on a client-evaluated operator",
            )),
        }
    }

    fn compile_shaped(
        &mut self,
        select: &mut SelectExpression,
        shaper: &Shaper,
        spec: &IncludeSpecification,
    ) -> Result<CompiledInclude> {
        let owner = shaper
            .find_entity_shaper(spec.query_source)
            .ok_or(PenumbraError::Invalid("include source is not an entity"))?;
        let accessor = shaper
            .get_accessor_expression(spec.query_source)
            .ok_or(PenumbraError::Unsupported(
                "included entity is not reachable from the result",
            ))?;
        let loader = self.compile_path(select, owner, spec)?;
        Ok(CompiledInclude {
            query_source: spec.query_source,
            accessor,
            loader,
        })
    }

    fn compile_path(
        &mut self,
        select: &mut SelectExpression,
        owner: &EntityShaper,
        spec: &IncludeSpecification,
    ) -> Result<RelatedLoader> {
        if spec.navigation_path.is_empty() {
            return Err(PenumbraError::Invalid("empty include path"));
        }
        // Entities on the nullable side of an outer join must not filter rows.
        let can_inner = !owner.allow_null_result();
        self.compile_step(select, owner, &spec.navigation_path, can_inner, spec.query_source)
    }

    fn compile_step(
        &mut self,
        select: &mut SelectExpression,
        owner: &EntityShaper,
        path: &[String],
        can_inner: bool,
        source: QuerySource,
    ) -> Result<RelatedLoader> {
        let (name, rest) = path
            .split_first()
            .ok_or(PenumbraError::Invalid("empty include path"))?;
        let navigation = self.model.navigation(owner.entity_type(), name)?;
        profile_counter(ProfileCounter::IncludeStep);
        if navigation.is_collection {
            self.collection_step(select, owner, navigation, rest, source)
        } else {
            self.reference_step(select, owner, navigation, rest, can_inner, source)
        }
    }

    fn reference_step(
        &mut self,
        select: &mut SelectExpression,
        owner: &EntityShaper,
        navigation: Navigation,
        rest: &[String],
        can_inner: bool,
        source: QuerySource,
    ) -> Result<RelatedLoader> {
        let fk = &navigation.foreign_key;
        let can_inner = can_inner && fk.is_required && navigation.is_dependent_to_principal;
        let target = navigation.target.clone();
        let table = self.model.table(&target)?;
        let alias = select.unique_table_alias(&alias_base(&table.name));
        let offset = select.projection().len();

        let previous = select.take_predicate();
        let column_alias = alias.clone();
        let materializer = MaterializerFactory::new(self.model).create_materializer(
            &target,
            select,
            |property, se| {
                let index = se.add_to_projection(SqlExpr::column(
                    property.column.clone(),
                    column_alias.clone(),
                    property.sql_type(),
                ));
                index
                    .checked_sub(offset)
                    .ok_or_else(|| PenumbraError::invariant("related column reused an owner column"))
            },
            None,
        )?;
        let discriminator = select.take_predicate();
        select.set_predicate(previous);

        let mut joined = TableExpr::Table(TableExpression {
            name: table.name,
            schema: table.schema,
            alias: alias.clone(),
            query_source: None,
        });
        if let Some(predicate) = discriminator {
            let mut filtered = SelectExpression::new();
            filtered.set_alias(Some(alias.clone()));
            filtered.add_table(joined);
            filtered.set_project_star(true);
            filtered.set_predicate(Some(self.optimizer.optimize(predicate)));
            joined = TableExpr::Select(Box::new(filtered));
        }

        let (owner_props, target_props) = if navigation.is_dependent_to_principal {
            (&fk.properties, &fk.principal_key)
        } else {
            (&fk.principal_key, &fk.properties)
        };
        let mut pairs = Vec::with_capacity(owner_props.len());
        for (owner_prop, target_prop) in owner_props.iter().zip(target_props) {
            let left = owner_column(select, owner, owner_prop)?;
            let property = self.model.property(&target, target_prop)?;
            let ty = property.sql_type();
            let right = SqlExpr::column(property.column, alias.clone(), ty);
            pairs.push((left, right));
        }
        let predicate = self.optimizer.optimize(build_join_equality(pairs)?);
        let index = if can_inner {
            select.add_inner_join(joined, Vec::new(), None)
        } else {
            select.add_left_outer_join(joined, Vec::new())
        };
        select
            .join_mut(index)
            .ok_or_else(|| PenumbraError::invariant("join was not added"))?
            .predicate = Some(predicate);
        debug!(
            navigation = %navigation.name,
            %alias,
            inner = can_inner,
            "include.reference_join"
        );

        let shaper = self.related_shaper(&target, materializer, source)?.with_offset(offset);
        let next = match rest {
            [] => None,
            _ => Some(Box::new(self.compile_step(select, &shaper, rest, can_inner, source)?)),
        };
        Ok(RelatedLoader::Reference {
            navigation,
            shaper,
            next,
        })
    }

    fn collection_step(
        &mut self,
        select: &mut SelectExpression,
        owner: &EntityShaper,
        navigation: Navigation,
        rest: &[String],
        source: QuerySource,
    ) -> Result<RelatedLoader> {
        let fk = navigation.foreign_key.clone();
        let target = navigation.target.clone();

        let mut principal_columns = Vec::with_capacity(fk.principal_key.len());
        for property in &fk.principal_key {
            principal_columns.push(owner_column(select, owner, property)?);
        }
        for column in &principal_columns {
            select.add_to_order_by(Ordering::asc(column.clone()));
        }

        let table = self.model.table(&target)?;
        let target_alias = alias_base(&table.name);
        let mut related = SelectExpression::new();
        related.add_table(TableExpr::Table(TableExpression {
            name: table.name,
            schema: table.schema,
            alias: target_alias.clone(),
            query_source: None,
        }));
        let column_alias = target_alias.clone();
        let materializer = MaterializerFactory::new(self.model).create_materializer(
            &target,
            &mut related,
            |property, se| {
                Ok(se.add_to_projection(SqlExpr::column(
                    property.column.clone(),
                    column_alias.clone(),
                    property.sql_type(),
                )))
            },
            None,
        )?;
        if let Some(predicate) = related.take_predicate() {
            related.set_predicate(Some(self.optimizer.optimize(predicate)));
        }

        let principal_base = principal_columns
            .first()
            .and_then(|column| match column {
                SqlExpr::Column(col) => Some(col.table_alias.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "t".to_owned());
        let principal_alias = related.unique_table_alias(&principal_base);
        let mut principal = select.clone_with_alias(Some(principal_alias.clone()));
        principal.clear_projection();
        let mut principal_key = Vec::with_capacity(principal_columns.len());
        for column in principal_columns {
            let index = principal.add_to_projection(column);
            principal_key.push(lift(&principal, index, &principal_alias)?);
        }
        for ordering in principal.order_by().to_vec() {
            let index = principal.add_to_projection(ordering.expr);
            related.add_to_order_by(Ordering {
                expr: lift(&principal, index, &principal_alias)?,
                direction: ordering.direction,
            });
        }
        if principal.limit().is_none() && principal.offset().is_none() {
            principal.clear_order_by();
        }
        principal.set_distinct(true)?;

        let mut pairs = Vec::with_capacity(fk.properties.len());
        let mut foreign_key_columns = Vec::with_capacity(fk.properties.len());
        for (fk_prop, key) in fk.properties.iter().zip(principal_key) {
            let property = self.model.property(&target, fk_prop)?;
            let ty = property.sql_type();
            let column = SqlExpr::column(property.column, target_alias.clone(), ty);
            foreign_key_columns.push(column.clone());
            pairs.push((column, key));
        }
        let predicate = self.optimizer.optimize(build_join_equality(pairs)?);
        let index = related.add_inner_join(TableExpr::Select(Box::new(principal)), Vec::new(), None);
        related
            .join_mut(index)
            .ok_or_else(|| PenumbraError::invariant("join was not added"))?
            .predicate = Some(predicate);

        let mut correlation_indexes = Vec::with_capacity(foreign_key_columns.len());
        for column in &foreign_key_columns {
            correlation_indexes.push(
                related
                    .get_projection_index(column)
                    .ok_or_else(|| PenumbraError::invariant("foreign key was not projected"))?,
            );
        }

        let query_index = self.query_index;
        self.query_index += 1;
        let buffering = if self.options.buffer_collections {
            Buffering::Buffered
        } else {
            Buffering::Unbuffered
        };
        let shaper = self
            .related_shaper(&target, materializer, source)?
            .with_buffering(buffering);
        debug!(
            navigation = %navigation.name,
            query_index,
            "include.collection_query"
        );
        let next = match rest {
            [] => None,
            _ => Some(Box::new(self.compile_step(&mut related, &shaper, rest, true, source)?)),
        };
        Ok(RelatedLoader::Collection {
            navigation,
            query_index,
            select: related,
            shaper,
            principal_key: fk.principal_key,
            correlation_indexes,
            next,
        })
    }

    fn related_shaper(
        &self,
        target: &str,
        materializer: Materializer,
        source: QuerySource,
    ) -> Result<EntityShaper> {
        let root = self.model.root_type(target)?;
        let mut key_indexes = Vec::new();
        for property in self.model.primary_key(target)? {
            key_indexes.push(
                materializer
                    .index_of(&property.name)
                    .ok_or_else(|| PenumbraError::invariant("key property was not projected"))?,
            );
        }
        Ok(EntityShaper::new(
            source,
            target,
            root.name.clone(),
            key_indexes,
            self.options.is_tracking(),
            materializer,
        ))
    }
}

fn lift(select: &SelectExpression, index: usize, alias: &str) -> Result<SqlExpr> {
    select
        .projection()
        .get(index)
        .and_then(|expr| lift_expression_from_subquery(expr, alias))
        .ok_or_else(|| PenumbraError::invariant("projected expression has no name"))
}
