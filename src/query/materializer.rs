//! Entity materializers and the factory that projects their columns.
//!
//! A materializer is built while its columns are added to a select. When
//! the entity type belongs to a hierarchy, the factory also narrows the
//! select to the concrete types it can produce and dispatches on the
//! discriminator value at run time.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{PenumbraError, Result};
use crate::metadata::{EntityType, ModelMetadata, Property};
use crate::query::entity::EntityInstance;
use crate::query::profile::{profile_counter, ProfileCounter};
use crate::query::source::QuerySource;
use crate::query::sql::{DiscriminatorPredicate, SelectExpression, SqlExpr};
use crate::value::{Value, ValueBuffer};

/// Reads one concrete entity type out of a value buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityMaterializer {
    entity_type: String,
    slots: Vec<(String, usize)>,
}

impl EntityMaterializer {
    /// Concrete type produced.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Buffer index of `property`, relative to the materializer's window.
    pub fn index_of(&self, property: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|(name, _)| name == property)
            .map(|(_, index)| *index)
    }

    fn materialize(&self, buffer: &ValueBuffer) -> Result<EntityInstance> {
        let mut values = BTreeMap::new();
        for (name, index) in &self.slots {
            values.insert(name.clone(), buffer.get(*index)?.clone());
        }
        Ok(EntityInstance::new(self.entity_type.clone(), values))
    }
}

/// Materializer for one entity type, possibly spanning a hierarchy.
#[derive(Clone, Debug, PartialEq)]
pub enum Materializer {
    /// Only one concrete type can appear.
    Entity(EntityMaterializer),
    /// Several concrete types share the rows; the discriminator decides.
    Discriminated {
        /// Hierarchy root, reported when no arm matches.
        root: String,
        /// Buffer index of the discriminator column.
        discriminator_index: usize,
        /// Discriminator value and materializer per concrete type.
        arms: Vec<(Value, EntityMaterializer)>,
    },
}

impl Materializer {
    /// Materializes the row visible through `buffer`.
    pub fn materialize(&self, buffer: &ValueBuffer) -> Result<EntityInstance> {
        match self {
            Materializer::Entity(entity) => entity.materialize(buffer),
            Materializer::Discriminated {
                root,
                discriminator_index,
                arms,
            } => {
                let value = buffer.get(*discriminator_index)?;
                let arm = arms
                    .iter()
                    .find(|(expected, _)| expected == value)
                    .map(|(_, materializer)| materializer)
                    .ok_or_else(|| PenumbraError::UnableToDiscriminate {
                        entity_type: root.clone(),
                        value: value.to_string(),
                    })?;
                arm.materialize(buffer)
            }
        }
    }

    /// Buffer index of `property` in any produced type.
    pub fn index_of(&self, property: &str) -> Option<usize> {
        match self {
            Materializer::Entity(entity) => entity.index_of(property),
            Materializer::Discriminated { arms, .. } => arms
                .iter()
                .find_map(|(_, materializer)| materializer.index_of(property)),
        }
    }

    /// Concrete types this materializer can produce.
    pub fn entity_types(&self) -> Vec<&str> {
        match self {
            Materializer::Entity(entity) => vec![entity.entity_type()],
            Materializer::Discriminated { arms, .. } => {
                arms.iter().map(|(_, m)| m.entity_type()).collect()
            }
        }
    }
}

/// Builds materializers against the model.
pub struct MaterializerFactory<'a> {
    model: &'a dyn ModelMetadata,
}

impl<'a> MaterializerFactory<'a> {
    /// Factory resolving types through `model`.
    pub fn new(model: &'a dyn ModelMetadata) -> Self {
        Self { model }
    }

    /// Creates the materializer for `entity_type`.
    ///
    /// `projection_adder` places a property's column in the select and
    /// returns its buffer index. When the type is part of a hierarchy the
    /// select's predicate is replaced by a discriminator predicate covering
    /// exactly the concrete types that can be produced.
    pub fn create_materializer<F>(
        &self,
        entity_type: &str,
        select: &mut SelectExpression,
        mut projection_adder: F,
        query_source: Option<QuerySource>,
    ) -> Result<Materializer>
    where
        F: FnMut(&Property, &mut SelectExpression) -> Result<usize>,
    {
        profile_counter(ProfileCounter::MaterializerBuild);
        let concrete = self.model.concrete_types_in_hierarchy(entity_type)?;
        let Some(first) = concrete.first() else {
            return Err(PenumbraError::NoConcreteTypes(entity_type.to_owned()));
        };

        if !self.model.is_hierarchical(entity_type)? {
            let materializer = self.entity_materializer(first, select, &mut projection_adder)?;
            return Ok(Materializer::Entity(materializer));
        }

        let root = self.model.root_type(entity_type)?;
        let discriminator = self
            .model
            .discriminator(&root.name)?
            .ok_or_else(|| PenumbraError::Invalid("hierarchy has no discriminator property"))?;

        if concrete.len() == 1 {
            let materializer = self.entity_materializer(first, select, &mut projection_adder)?;
            let column = discriminator_column(select, &discriminator)?;
            let predicate = SqlExpr::eq(column, SqlExpr::constant(discriminator_value(first)?));
            set_discriminator_predicate(select, predicate, query_source);
            return Ok(Materializer::Entity(materializer));
        }

        let discriminator_index = projection_adder(&discriminator, select)?;
        let column = discriminator_column(select, &discriminator)?;
        let mut arms = Vec::with_capacity(concrete.len());
        let mut predicate: Option<SqlExpr> = None;
        for ty in &concrete {
            let value = discriminator_value(ty)?;
            let test = SqlExpr::eq(column.clone(), SqlExpr::constant(value.clone()));
            predicate = Some(match predicate {
                Some(existing) => SqlExpr::or(existing, test),
                None => test,
            });
            let materializer = self.entity_materializer(ty, select, &mut projection_adder)?;
            arms.push((value, materializer));
        }
        if let Some(predicate) = predicate {
            set_discriminator_predicate(select, predicate, query_source);
        }
        trace!(
            entity_type,
            arms = arms.len(),
            "materializer.discriminated"
        );
        Ok(Materializer::Discriminated {
            root: root.name.clone(),
            discriminator_index,
            arms,
        })
    }

    fn entity_materializer<F>(
        &self,
        ty: &EntityType,
        select: &mut SelectExpression,
        projection_adder: &mut F,
    ) -> Result<EntityMaterializer>
    where
        F: FnMut(&Property, &mut SelectExpression) -> Result<usize>,
    {
        let mut slots = Vec::new();
        for property in self.model.properties(&ty.name)? {
            let index = projection_adder(&property, select)?;
            slots.push((property.name, index));
        }
        Ok(EntityMaterializer {
            entity_type: ty.name.clone(),
            slots,
        })
    }
}

fn discriminator_value(ty: &EntityType) -> Result<Value> {
    ty.discriminator_value
        .clone()
        .ok_or_else(|| PenumbraError::Invalid("concrete type has no discriminator value"))
}

/// The most recently projected column carrying the discriminator.
fn discriminator_column(select: &SelectExpression, discriminator: &Property) -> Result<SqlExpr> {
    select
        .projection()
        .iter()
        .rev()
        .map(SqlExpr::unwrap_alias)
        .find(|expr| {
            matches!(expr, SqlExpr::Column(col) if col.name == discriminator.column)
        })
        .cloned()
        .ok_or_else(|| PenumbraError::invariant("discriminator column was not projected"))
}

fn set_discriminator_predicate(
    select: &mut SelectExpression,
    predicate: SqlExpr,
    query_source: Option<QuerySource>,
) {
    select.set_predicate(Some(SqlExpr::Discriminator(DiscriminatorPredicate {
        predicate: Box::new(predicate),
        query_source,
    })));
}
