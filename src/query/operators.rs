//! Operator tree handed to the compiler and produced by it.

use crate::error::{PenumbraError, Result};
use crate::metadata::Navigation;
use crate::query::shaper::{EntityShaper, Projector, ResultSelector, Shaped, Shaper};
use crate::query::source::{Accessor, QuerySource};
use crate::query::sql::{SelectExpression, SqlExpr};
use crate::value::KeyValue;

/// Reads a key property of the entity at `accessor` in a shaped result.
#[derive(Clone, Debug, PartialEq)]
pub struct KeySelector {
    /// Location of the entity within the result.
    pub accessor: Accessor,
    /// Property read as key.
    pub property: String,
}

impl KeySelector {
    /// Key of the root entity's `property`.
    pub fn root(property: impl Into<String>) -> Self {
        Self {
            accessor: Accessor::root(),
            property: property.into(),
        }
    }

    /// Reads the key. `None` for a null key, which never matches.
    pub fn select(&self, shaped: &Shaped) -> Result<Option<KeyValue>> {
        match shaped.get(&self.accessor) {
            Some(Shaped::Entity(entity)) => {
                Ok(entity.get(&self.property).and_then(|value| value.key()))
            }
            Some(Shaped::Null) => Ok(None),
            _ => Err(PenumbraError::Invalid("join key does not address an entity")),
        }
    }
}

/// Join key in both of its forms.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinKey {
    /// Translated expression over the side's select.
    pub sql: SqlExpr,
    /// Client evaluation, used when the join cannot be flattened.
    pub client: KeySelector,
}

/// Request to eagerly load `navigation_path` for `query_source`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncludeSpecification {
    /// Source whose entities receive the related data.
    pub query_source: QuerySource,
    /// Navigation names, outermost first.
    pub navigation_path: Vec<String>,
}

impl IncludeSpecification {
    /// Includes `path` on `query_source`.
    pub fn new<I>(query_source: QuerySource, path: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            query_source,
            navigation_path: path.into_iter().map(Into::into).collect(),
        }
    }
}

/// Loads one navigation step and, optionally, the steps below it.
#[derive(Clone, Debug)]
pub enum RelatedLoader {
    /// To-one step read from the same row.
    Reference {
        /// Navigation fixed up.
        navigation: Navigation,
        /// Shapes the related entity from its window of the row.
        shaper: EntityShaper,
        /// Next step, applied to the related entity.
        next: Option<Box<RelatedLoader>>,
    },
    /// To-many step read from its own command.
    Collection {
        /// Navigation fixed up.
        navigation: Navigation,
        /// Position of the command among the query's related commands.
        query_index: usize,
        /// Related command.
        select: SelectExpression,
        /// Shapes the related entities from the related command's rows.
        shaper: EntityShaper,
        /// Principal key properties of the owning entity, in key order.
        principal_key: Vec<String>,
        /// Row indexes of the foreign key columns in the related command.
        correlation_indexes: Vec<usize>,
        /// Next step, applied to every related entity.
        next: Option<Box<RelatedLoader>>,
    },
}

impl RelatedLoader {
    /// Navigation loaded by this step.
    pub fn navigation(&self) -> &Navigation {
        match self {
            RelatedLoader::Reference { navigation, .. }
            | RelatedLoader::Collection { navigation, .. } => navigation,
        }
    }

    /// Next step, if any.
    pub fn next(&self) -> Option<&RelatedLoader> {
        match self {
            RelatedLoader::Reference { next, .. } | RelatedLoader::Collection { next, .. } => {
                next.as_deref()
            }
        }
    }

    /// Related commands issued by this step and the ones below it.
    pub fn commands(&self) -> Vec<&SelectExpression> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(loader) = current {
            if let RelatedLoader::Collection { select, .. } = loader {
                out.push(select);
            }
            current = loader.next();
        }
        out
    }
}

/// Rewritten include: where the owning entity sits and how to load the path.
#[derive(Clone, Debug)]
pub struct CompiledInclude {
    /// Source the include was requested on.
    pub query_source: QuerySource,
    /// Location of the owning entity in each shaped result.
    pub accessor: Accessor,
    /// First navigation step.
    pub loader: RelatedLoader,
}

/// Operator tree node.
#[derive(Clone, Debug)]
pub enum QueryOperator {
    /// One relational command plus the shaper of its rows.
    ShapedQuery {
        /// The command.
        select: SelectExpression,
        /// Row shaper.
        shaper: Shaper,
    },
    /// Inner yields one null result when empty.
    DefaultIfEmpty(Box<QueryOperator>),
    /// Every inner result for every outer result.
    SelectMany {
        /// Outer sequence.
        outer: Box<QueryOperator>,
        /// Inner sequence.
        inner: Box<QueryOperator>,
        /// Source of the inner clause.
        query_source: QuerySource,
        /// Combines outer and inner.
        result_selector: ResultSelector,
    },
    /// Key-equality join.
    Join {
        /// Outer sequence.
        outer: Box<QueryOperator>,
        /// Inner sequence.
        inner: Box<QueryOperator>,
        /// Outer key.
        outer_key: JoinKey,
        /// Inner key.
        inner_key: JoinKey,
        /// Source of the join clause.
        query_source: QuerySource,
        /// Combines outer and inner.
        result_selector: ResultSelector,
    },
    /// Key-equality join delivering each outer with all its matches.
    GroupJoin {
        /// Outer sequence.
        outer: Box<QueryOperator>,
        /// Inner sequence.
        inner: Box<QueryOperator>,
        /// Outer key.
        outer_key: JoinKey,
        /// Inner key.
        inner_key: JoinKey,
        /// Source of the join clause.
        query_source: QuerySource,
        /// Receives the outer and a [`Shaped::Sequence`] of matches.
        result_selector: ResultSelector,
    },
    /// Flattened group join: a left join ordered so that each outer's rows
    /// are consecutive.
    GroupJoinQuery {
        /// The command.
        select: SelectExpression,
        /// Grouping shaper over each row.
        shaper: Shaper,
        /// Receives the outer and a [`Shaped::Sequence`] of matches.
        result_selector: ResultSelector,
        /// Includes on the outer entity.
        outer_includes: Vec<CompiledInclude>,
        /// Includes on each inner entity.
        inner_includes: Vec<CompiledInclude>,
    },
    /// Client transform of every result of `source`. The sources inside
    /// `source` are not addressable from the projected results.
    Project {
        /// Projected sequence.
        source: Box<QueryOperator>,
        /// Source of the projecting clause.
        query_source: QuerySource,
        /// Transform applied per result.
        projector: Projector,
    },
    /// Eager loading request, before compilation.
    Include {
        /// Operator whose results own the navigations.
        source: Box<QueryOperator>,
        /// Requested paths.
        specifications: Vec<IncludeSpecification>,
    },
    /// Eager loading, compiled.
    IncludeCompiled {
        /// Operator whose results own the navigations.
        source: Box<QueryOperator>,
        /// Compiled paths.
        includes: Vec<CompiledInclude>,
    },
}

impl QueryOperator {
    /// Select of a single-command operator.
    pub fn select(&self) -> Option<&SelectExpression> {
        match self {
            QueryOperator::ShapedQuery { select, .. }
            | QueryOperator::GroupJoinQuery { select, .. } => Some(select),
            QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
                source.select()
            }
            _ => None,
        }
    }

    /// Mutable select of a single-command operator.
    pub fn select_mut(&mut self) -> Option<&mut SelectExpression> {
        match self {
            QueryOperator::ShapedQuery { select, .. }
            | QueryOperator::GroupJoinQuery { select, .. } => Some(select),
            QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
                source.select_mut()
            }
            _ => None,
        }
    }

    /// Shaper of a single-command operator.
    pub fn shaper(&self) -> Option<&Shaper> {
        match self {
            QueryOperator::ShapedQuery { shaper, .. }
            | QueryOperator::GroupJoinQuery { shaper, .. } => Some(shaper),
            QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
                source.shaper()
            }
            _ => None,
        }
    }

    /// Mutable shaper of a single-command operator.
    pub fn shaper_mut(&mut self) -> Option<&mut Shaper> {
        match self {
            QueryOperator::ShapedQuery { shaper, .. }
            | QueryOperator::GroupJoinQuery { shaper, .. } => Some(shaper),
            QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
                source.shaper_mut()
            }
            _ => None,
        }
    }

    /// Calls `f` on every select in the tree, related commands excluded.
    pub fn for_each_select_mut(&mut self, f: &mut dyn FnMut(&mut SelectExpression)) {
        match self {
            QueryOperator::ShapedQuery { select, .. }
            | QueryOperator::GroupJoinQuery { select, .. } => f(select),
            QueryOperator::DefaultIfEmpty(inner) => inner.for_each_select_mut(f),
            QueryOperator::Project { source, .. } => source.for_each_select_mut(f),
            QueryOperator::SelectMany { outer, inner, .. }
            | QueryOperator::Join { outer, inner, .. }
            | QueryOperator::GroupJoin { outer, inner, .. } => {
                outer.for_each_select_mut(f);
                inner.for_each_select_mut(f);
            }
            QueryOperator::Include { source, .. } | QueryOperator::IncludeCompiled { source, .. } => {
                source.for_each_select_mut(f)
            }
        }
    }

    /// Every command the tree issues, main commands before related ones.
    pub fn commands(&self) -> Vec<&SelectExpression> {
        let mut main = Vec::new();
        let mut related = Vec::new();
        self.collect_commands(&mut main, &mut related);
        main.extend(related);
        main
    }

    fn collect_commands<'a>(
        &'a self,
        main: &mut Vec<&'a SelectExpression>,
        related: &mut Vec<&'a SelectExpression>,
    ) {
        let includes = |list: &'a [CompiledInclude], related: &mut Vec<&'a SelectExpression>| {
            for include in list {
                related.extend(include.loader.commands());
            }
        };
        match self {
            QueryOperator::ShapedQuery { select, .. } => main.push(select),
            QueryOperator::GroupJoinQuery {
                select,
                outer_includes,
                inner_includes,
                ..
            } => {
                main.push(select);
                includes(outer_includes, related);
                includes(inner_includes, related);
            }
            QueryOperator::DefaultIfEmpty(inner) => inner.collect_commands(main, related),
            QueryOperator::Project { source, .. } => source.collect_commands(main, related),
            QueryOperator::SelectMany { outer, inner, .. }
            | QueryOperator::Join { outer, inner, .. }
            | QueryOperator::GroupJoin { outer, inner, .. } => {
                outer.collect_commands(main, related);
                inner.collect_commands(main, related);
            }
            QueryOperator::Include { source, .. } => source.collect_commands(main, related),
            QueryOperator::IncludeCompiled { source, includes: list } => {
                source.collect_commands(main, related);
                includes(list, related);
            }
        }
    }
}
