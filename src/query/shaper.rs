//! Shapers turn value buffers into client results.
//!
//! Each shaper owns a window of the row (its offset) and knows the query
//! source it serves. Flattening combines shapers into composites whose
//! result selectors decide how the two halves of a joined row are exposed.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::query::entity::{EntityKey, EntityRef, QueryContext};
use crate::query::materializer::Materializer;
use crate::query::source::{Accessor, QuerySource, QuerySourceMapping};
use crate::value::{Value, ValueBuffer};

/// A shaped client result.
#[derive(Clone, Debug, PartialEq)]
pub enum Shaped {
    /// No value, e.g. the inner side of an unmatched outer join.
    Null,
    /// Scalar.
    Value(Value),
    /// Entity instance.
    Entity(EntityRef),
    /// Raw window of a row.
    Buffer(ValueBuffer),
    /// Pair or wider tuple produced by a result selector.
    Tuple(Vec<Shaped>),
    /// Ordered sequence, e.g. the inner side of a group join.
    Sequence(Vec<Shaped>),
    /// Key with the elements grouped under it.
    Grouping {
        /// Grouping key.
        key: Box<Shaped>,
        /// Elements, in row order.
        elements: Vec<Shaped>,
    },
}

impl Shaped {
    /// Component at `accessor`.
    pub fn get(&self, accessor: &Accessor) -> Option<&Shaped> {
        let mut current = self;
        for &step in accessor.steps() {
            current = match current {
                Shaped::Tuple(items) => items.get(step)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Entity held by this result, if it is one.
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            Shaped::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Returns true for [`Shaped::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Shaped::Null)
    }
}

type SelectorFn = dyn Fn(Shaped, Shaped) -> Result<Shaped> + Send + Sync;
type ProjectorFn = dyn Fn(Shaped) -> Result<Shaped> + Send + Sync;

/// Client transform applied to each result of a projecting clause.
#[derive(Clone)]
pub struct Projector(Arc<ProjectorFn>);

impl Projector {
    /// Wraps a client function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Shaped) -> Result<Shaped> + Send + Sync + 'static,
    {
        Projector(Arc::new(f))
    }

    /// Applies the transform.
    pub fn apply(&self, input: Shaped) -> Result<Shaped> {
        (self.0)(input)
    }
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Projector(..)")
    }
}

/// Combines the outer and inner results of a composed clause.
#[derive(Clone)]
pub enum ResultSelector {
    /// `(outer, inner)` as a two element tuple.
    Pair,
    /// Outer result only.
    Outer,
    /// Inner result only.
    Inner,
    /// Client function; the sources it consumes are not addressable after it.
    Custom(Arc<SelectorFn>),
}

impl ResultSelector {
    /// Wraps a client function.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Shaped, Shaped) -> Result<Shaped> + Send + Sync + 'static,
    {
        ResultSelector::Custom(Arc::new(f))
    }

    /// Applies the selector.
    pub fn apply(&self, outer: Shaped, inner: Shaped) -> Result<Shaped> {
        match self {
            ResultSelector::Pair => Ok(Shaped::Tuple(vec![outer, inner])),
            ResultSelector::Outer => Ok(outer),
            ResultSelector::Inner => Ok(inner),
            ResultSelector::Custom(f) => f(outer, inner),
        }
    }

    /// Records where the sources on each side end up in the selector's result.
    pub(crate) fn remap(
        &self,
        mapping: &mut QuerySourceMapping,
        outer: &[QuerySource],
        inner: &[QuerySource],
    ) {
        let forget = |mapping: &mut QuerySourceMapping, sources: &[QuerySource]| {
            for source in sources {
                mapping.remove(*source);
            }
        };
        match self {
            ResultSelector::Pair => {
                mapping.nest(outer, 0);
                mapping.nest(inner, 1);
            }
            ResultSelector::Outer => forget(mapping, inner),
            ResultSelector::Inner => forget(mapping, outer),
            ResultSelector::Custom(_) => {
                forget(mapping, outer);
                forget(mapping, inner);
            }
        }
    }
}

impl fmt::Debug for ResultSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultSelector::Pair => f.write_str("Pair"),
            ResultSelector::Outer => f.write_str("Outer"),
            ResultSelector::Inner => f.write_str("Inner"),
            ResultSelector::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Whether an entity shaper copies its window out of the row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Buffering {
    /// Reads straight from the shared row.
    #[default]
    Unbuffered,
    /// Copies its window so it may outlive the row it came from.
    Buffered,
}

/// Shapes one entity out of its window of the row.
#[derive(Clone, Debug)]
pub struct EntityShaper {
    query_source: QuerySource,
    entity_type: String,
    key_root: String,
    key_indexes: Vec<usize>,
    is_tracking: bool,
    materializer: Arc<Materializer>,
    value_buffer_offset: usize,
    allow_null_result: bool,
    buffering: Buffering,
    accessor: Option<Accessor>,
}

impl EntityShaper {
    /// Shaper for `entity_type`, keyed by the hierarchy root and the buffer
    /// indexes of its primary key columns.
    pub fn new(
        query_source: QuerySource,
        entity_type: impl Into<String>,
        key_root: impl Into<String>,
        key_indexes: Vec<usize>,
        is_tracking: bool,
        materializer: Materializer,
    ) -> Self {
        Self {
            query_source,
            entity_type: entity_type.into(),
            key_root: key_root.into(),
            key_indexes,
            is_tracking,
            materializer: Arc::new(materializer),
            value_buffer_offset: 0,
            allow_null_result: false,
            buffering: Buffering::Unbuffered,
            accessor: None,
        }
    }

    /// Same shaper with the given buffering.
    pub fn with_buffering(mut self, buffering: Buffering) -> Self {
        self.buffering = buffering;
        self
    }

    /// Same shaper reading from `offset` onwards. A null key then yields no
    /// entity instead of an error.
    pub fn with_offset(&self, offset: usize) -> Self {
        let mut shifted = self.clone();
        shifted.value_buffer_offset += offset;
        shifted.allow_null_result = true;
        shifted
    }

    /// Query source served.
    pub fn query_source(&self) -> QuerySource {
        self.query_source
    }

    /// Declared entity type.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Materializer used for new instances.
    pub fn materializer(&self) -> &Materializer {
        &self.materializer
    }

    /// Start of this shaper's window.
    pub fn value_buffer_offset(&self) -> usize {
        self.value_buffer_offset
    }

    /// Whether a null key produces no entity.
    pub fn allow_null_result(&self) -> bool {
        self.allow_null_result
    }

    /// Buffering mode.
    pub fn buffering(&self) -> Buffering {
        self.buffering
    }

    /// Row index of `property`, counting from the start of the whole row.
    pub fn absolute_index_of(&self, property: &str) -> Option<usize> {
        self.materializer
            .index_of(property)
            .map(|index| index + self.value_buffer_offset)
    }

    /// Shapes the entity, resolving identity through the state manager when
    /// tracking.
    pub fn shape_entity(
        &self,
        ctx: &mut QueryContext,
        row: &ValueBuffer,
    ) -> Result<Option<EntityRef>> {
        let window = match self.buffering {
            Buffering::Unbuffered => row.with_offset(self.value_buffer_offset),
            Buffering::Buffered => row.with_offset(self.value_buffer_offset).detach(),
        };
        let Some(key) = EntityKey::from_buffer(
            &self.key_root,
            &window,
            &self.key_indexes,
            !self.allow_null_result,
        )?
        else {
            return Ok(None);
        };
        if self.is_tracking {
            if let Some(existing) = ctx.state_manager().try_get_entry(&key) {
                return Ok(Some(existing));
            }
        }
        let entity = Arc::new(self.materializer.materialize(&window)?);
        if self.is_tracking {
            ctx.state_manager_mut().start_tracking(key, Arc::clone(&entity));
        }
        Ok(Some(entity))
    }
}

/// Exposes a window of the row as is.
#[derive(Clone, Debug)]
pub struct ValueBufferShaper {
    query_source: QuerySource,
    offset: usize,
    width: usize,
}

impl ValueBufferShaper {
    /// Shaper for `query_source` exposing the first `width` values of the row.
    pub fn new(query_source: QuerySource, width: usize) -> Self {
        Self {
            query_source,
            offset: 0,
            width,
        }
    }

    /// Start of the window.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of values exposed.
    pub fn width(&self) -> usize {
        self.width
    }
}

/// Joined row: outer and inner shaped from the same buffer.
#[derive(Clone, Debug)]
pub struct CompositeShaper {
    /// Source of the clause that produced the composite.
    pub query_source: QuerySource,
    /// Outer half.
    pub outer: Box<Shaper>,
    /// Inner half, offset past the outer columns.
    pub inner: Box<Shaper>,
    /// Combines the halves.
    pub selector: ResultSelector,
}

/// Client projection applied on top of another shaper.
#[derive(Clone, Debug)]
pub struct ProjectionShaper {
    /// Source of the projecting clause.
    pub query_source: QuerySource,
    /// Shaper producing the projection's input.
    pub inner: Box<Shaper>,
    /// Transform applied to the input.
    pub projector: Projector,
}

impl ProjectionShaper {
    /// Projects `inner`'s result through `projector`.
    pub fn new(query_source: QuerySource, inner: Shaper, projector: Projector) -> Self {
        Self {
            query_source,
            inner: Box::new(inner),
            projector,
        }
    }
}

/// One row of a group join: the outer key with at most one element.
#[derive(Clone, Debug)]
pub struct GroupingShaper {
    /// Source of the group join clause.
    pub query_source: QuerySource,
    /// Shapes the outer side.
    pub key: Box<Shaper>,
    /// Shapes the inner side. A null element means the outer had no match.
    pub element: Box<Shaper>,
}

/// Every shaper variant.
#[derive(Clone, Debug)]
pub enum Shaper {
    /// Entity.
    Entity(EntityShaper),
    /// Raw row window.
    ValueBuffer(ValueBufferShaper),
    /// Outer and inner of a flattened join.
    Composite(CompositeShaper),
    /// Client projection.
    Projection(ProjectionShaper),
    /// Group join row.
    Grouping(GroupingShaper),
}

impl Shaper {
    /// Builds a composite over `outer` and `inner`.
    pub fn composite(
        query_source: QuerySource,
        outer: Shaper,
        inner: Shaper,
        selector: ResultSelector,
    ) -> Self {
        Shaper::Composite(CompositeShaper {
            query_source,
            outer: Box::new(outer),
            inner: Box::new(inner),
            selector,
        })
    }

    /// Query source this shaper was built for.
    pub fn query_source(&self) -> QuerySource {
        match self {
            Shaper::Entity(s) => s.query_source,
            Shaper::ValueBuffer(s) => s.query_source,
            Shaper::Composite(s) => s.query_source,
            Shaper::Projection(s) => s.query_source,
            Shaper::Grouping(s) => s.query_source,
        }
    }

    /// Retargets the shaper at `source`.
    pub fn update_query_source(&mut self, source: QuerySource) {
        match self {
            Shaper::Entity(s) => s.query_source = source,
            Shaper::ValueBuffer(s) => s.query_source = source,
            Shaper::Composite(s) => s.query_source = source,
            Shaper::Projection(s) => s.query_source = source,
            Shaper::Grouping(s) => s.query_source = source,
        }
    }

    /// True when this shaper or a child serves `source`.
    pub fn is_shaper_for_query_source(&self, source: QuerySource) -> bool {
        if self.query_source() == source {
            return true;
        }
        match self {
            Shaper::Entity(_) | Shaper::ValueBuffer(_) => false,
            Shaper::Composite(s) => {
                s.outer.is_shaper_for_query_source(source)
                    || s.inner.is_shaper_for_query_source(source)
            }
            Shaper::Projection(s) => s.inner.is_shaper_for_query_source(source),
            Shaper::Grouping(s) => {
                s.key.is_shaper_for_query_source(source)
                    || s.element.is_shaper_for_query_source(source)
            }
        }
    }

    /// Every source served by this shaper tree.
    pub fn query_sources(&self) -> Vec<QuerySource> {
        let mut out = Vec::new();
        self.collect_query_sources(&mut out);
        out
    }

    /// Sources whose values can still be located in this shaper's results.
    /// A projection exposes only its own source.
    pub fn addressable_query_sources(&self) -> Vec<QuerySource> {
        let mut out = Vec::new();
        self.collect_addressable(&mut out);
        out
    }

    fn collect_addressable(&self, out: &mut Vec<QuerySource>) {
        let own = self.query_source();
        if !out.contains(&own) {
            out.push(own);
        }
        match self {
            Shaper::Entity(_) | Shaper::ValueBuffer(_) | Shaper::Projection(_) => {}
            Shaper::Composite(s) => {
                s.outer.collect_addressable(out);
                s.inner.collect_addressable(out);
            }
            Shaper::Grouping(s) => {
                s.key.collect_addressable(out);
                s.element.collect_addressable(out);
            }
        }
    }

    fn collect_query_sources(&self, out: &mut Vec<QuerySource>) {
        let own = self.query_source();
        if !out.contains(&own) {
            out.push(own);
        }
        match self {
            Shaper::Entity(_) | Shaper::ValueBuffer(_) => {}
            Shaper::Composite(s) => {
                s.outer.collect_query_sources(out);
                s.inner.collect_query_sources(out);
            }
            Shaper::Projection(s) => s.inner.collect_query_sources(out),
            Shaper::Grouping(s) => {
                s.key.collect_query_sources(out);
                s.element.collect_query_sources(out);
            }
        }
    }

    /// New shaper reading `offset` values further into the row. Entity
    /// shapers in the result accept null keys.
    pub fn with_offset(&self, offset: usize) -> Shaper {
        match self {
            Shaper::Entity(s) => Shaper::Entity(s.with_offset(offset)),
            Shaper::ValueBuffer(s) => Shaper::ValueBuffer(ValueBufferShaper {
                query_source: s.query_source,
                offset: s.offset + offset,
                width: s.width,
            }),
            Shaper::Composite(s) => Shaper::Composite(CompositeShaper {
                query_source: s.query_source,
                outer: Box::new(s.outer.with_offset(offset)),
                inner: Box::new(s.inner.with_offset(offset)),
                selector: s.selector.clone(),
            }),
            Shaper::Projection(s) => Shaper::Projection(ProjectionShaper {
                query_source: s.query_source,
                inner: Box::new(s.inner.with_offset(offset)),
                projector: s.projector.clone(),
            }),
            Shaper::Grouping(s) => Shaper::Grouping(GroupingShaper {
                query_source: s.query_source,
                key: Box::new(s.key.with_offset(offset)),
                element: Box::new(s.element.with_offset(offset)),
            }),
        }
    }

    /// Records, on every entity shaper, where its value lives in the final
    /// result according to `mapping`.
    pub fn save_accessor_expression(&mut self, mapping: &QuerySourceMapping) {
        match self {
            Shaper::Entity(s) => s.accessor = mapping.get(s.query_source).cloned(),
            Shaper::ValueBuffer(_) => {}
            Shaper::Composite(s) => {
                s.outer.save_accessor_expression(mapping);
                s.inner.save_accessor_expression(mapping);
            }
            Shaper::Projection(s) => s.inner.save_accessor_expression(mapping),
            Shaper::Grouping(s) => {
                s.key.save_accessor_expression(mapping);
                s.element.save_accessor_expression(mapping);
            }
        }
    }

    /// Accessor recorded for the entity shaper serving `source`.
    pub fn get_accessor_expression(&self, source: QuerySource) -> Option<Accessor> {
        self.find_entity_shaper(source)
            .and_then(|shaper| shaper.accessor.clone())
    }

    /// Entity shaper serving `source`.
    pub fn find_entity_shaper(&self, source: QuerySource) -> Option<&EntityShaper> {
        match self {
            Shaper::Entity(s) => (s.query_source == source).then_some(s),
            Shaper::ValueBuffer(_) => None,
            Shaper::Composite(s) => s
                .outer
                .find_entity_shaper(source)
                .or_else(|| s.inner.find_entity_shaper(source)),
            Shaper::Projection(s) => s.inner.find_entity_shaper(source),
            Shaper::Grouping(s) => s
                .key
                .find_entity_shaper(source)
                .or_else(|| s.element.find_entity_shaper(source)),
        }
    }

    /// Shapes one row.
    pub fn shape(&self, ctx: &mut QueryContext, row: &ValueBuffer) -> Result<Shaped> {
        match self {
            Shaper::Entity(s) => Ok(s
                .shape_entity(ctx, row)?
                .map_or(Shaped::Null, Shaped::Entity)),
            Shaper::ValueBuffer(s) => Ok(Shaped::Buffer(row.window(s.offset, s.width))),
            Shaper::Composite(s) => {
                let outer = s.outer.shape(ctx, row)?;
                let inner = s.inner.shape(ctx, row)?;
                s.selector.apply(outer, inner)
            }
            Shaper::Projection(s) => {
                let input = s.inner.shape(ctx, row)?;
                s.projector.apply(input)
            }
            Shaper::Grouping(s) => {
                let key = s.key.shape(ctx, row)?;
                let element = s.element.shape(ctx, row)?;
                let elements = if element.is_null() {
                    Vec::new()
                } else {
                    vec![element]
                };
                Ok(Shaped::Grouping {
                    key: Box::new(key),
                    elements,
                })
            }
        }
    }
}
