//! Read-only model catalog consulted while compiling queries.
//!
//! The compiler only ever asks the model questions (which table, which key,
//! which concrete subtypes); it never mutates it. [`InMemoryModel`] is a
//! builder-style catalog used by tests and embedders that assemble their
//! model in code.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{PenumbraError, Result};
use crate::value::{SqlType, Value, ValueKind};

/// Mapped scalar property.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    /// Property name on the entity.
    pub name: String,
    /// Column the property is stored in.
    pub column: String,
    /// Storage kind.
    pub kind: ValueKind,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl Property {
    /// Declares a required property stored in a column of the same name.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            nullable: false,
        }
    }

    /// Stores the property in a differently named column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks the property nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Relational type of the property's column.
    pub fn sql_type(&self) -> SqlType {
        SqlType {
            kind: self.kind,
            nullable: self.nullable,
        }
    }
}

/// Table a hierarchy is stored in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableMapping {
    /// Table name.
    pub name: String,
    /// Optional schema.
    pub schema: Option<String>,
}

/// Foreign key between a dependent and a principal entity type.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeignKey {
    /// Entity type holding the foreign key columns.
    pub dependent: String,
    /// Foreign key properties, in key order.
    pub properties: Vec<String>,
    /// Entity type the key refers to.
    pub principal: String,
    /// Referenced principal key properties, in key order.
    pub principal_key: Vec<String>,
    /// Whether every dependent must have a principal.
    pub is_required: bool,
}

impl ForeignKey {
    /// Declares an optional foreign key.
    pub fn new<D, P>(
        dependent: impl Into<String>,
        properties: D,
        principal: impl Into<String>,
        principal_key: P,
    ) -> Self
    where
        D: IntoIterator,
        D::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            dependent: dependent.into(),
            properties: properties.into_iter().map(Into::into).collect(),
            principal: principal.into(),
            principal_key: principal_key.into_iter().map(Into::into).collect(),
            is_required: false,
        }
    }

    /// Marks the relationship required.
    pub fn required(mut self) -> Self {
        self.is_required = true;
        self
    }
}

/// Navigation property from one entity type to related instances.
#[derive(Clone, Debug, PartialEq)]
pub struct Navigation {
    /// Navigation name on the declaring entity type.
    pub name: String,
    /// Entity type reached through the navigation.
    pub target: String,
    /// Relationship the navigation travels.
    pub foreign_key: ForeignKey,
    /// True for to-many navigations.
    pub is_collection: bool,
    /// True when the declaring type is the dependent side.
    pub is_dependent_to_principal: bool,
}

impl Navigation {
    /// Reference from a dependent to its principal.
    pub fn to_principal(name: impl Into<String>, foreign_key: ForeignKey) -> Self {
        Self {
            name: name.into(),
            target: foreign_key.principal.clone(),
            foreign_key,
            is_collection: false,
            is_dependent_to_principal: true,
        }
    }

    /// Reference from a principal to its single dependent.
    pub fn to_dependent(name: impl Into<String>, foreign_key: ForeignKey) -> Self {
        Self {
            name: name.into(),
            target: foreign_key.dependent.clone(),
            foreign_key,
            is_collection: false,
            is_dependent_to_principal: false,
        }
    }

    /// Collection from a principal to all of its dependents.
    pub fn to_dependents(name: impl Into<String>, foreign_key: ForeignKey) -> Self {
        Self {
            is_collection: true,
            ..Self::to_dependent(name, foreign_key)
        }
    }
}

/// Mapped entity type.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct EntityType {
    /// Type name.
    pub name: String,
    /// Base type for single-table inheritance.
    pub base: Option<String>,
    /// Table mapping. Only consulted on hierarchy roots.
    pub table: Option<TableMapping>,
    /// Properties declared on this type, excluding inherited ones.
    pub properties: Vec<Property>,
    /// Primary key property names. Only consulted on hierarchy roots.
    pub key: Vec<String>,
    /// Navigations declared on this type.
    pub navigations: Vec<Navigation>,
    /// Discriminator property name. Only consulted on hierarchy roots.
    pub discriminator: Option<String>,
    /// Discriminator value identifying rows of this type.
    pub discriminator_value: Option<Value>,
    /// Abstract types are never materialized.
    pub is_abstract: bool,
}

impl EntityType {
    /// Starts declaring an entity type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Derives this type from `base`.
    pub fn derives_from(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Maps the type to a table in the default schema.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(TableMapping {
            name: name.into(),
            schema: None,
        });
        self
    }

    /// Maps the type to a table in `schema`.
    pub fn table_in_schema(mut self, name: impl Into<String>, schema: impl Into<String>) -> Self {
        self.table = Some(TableMapping {
            name: name.into(),
            schema: Some(schema.into()),
        });
        self
    }

    /// Declares a property.
    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Declares the primary key.
    pub fn key<I>(mut self, properties: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.key = properties.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a navigation.
    pub fn navigation(mut self, navigation: Navigation) -> Self {
        self.navigations.push(navigation);
        self
    }

    /// Names the discriminator property of the hierarchy.
    pub fn discriminator(mut self, property: impl Into<String>) -> Self {
        self.discriminator = Some(property.into());
        self
    }

    /// Sets the discriminator value of this type.
    pub fn discriminator_value(mut self, value: impl Into<Value>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    /// Marks the type abstract.
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }
}

/// Read-only lookups the query compiler needs from the model.
pub trait ModelMetadata: Send + Sync {
    /// Resolves an entity type by name.
    fn entity_type(&self, name: &str) -> Result<Arc<EntityType>>;

    /// Returns the types deriving directly from `name`, in declaration order.
    fn derived_types(&self, name: &str) -> Result<Vec<Arc<EntityType>>>;

    /// Walks the base chain up to the hierarchy root.
    fn root_type(&self, name: &str) -> Result<Arc<EntityType>> {
        let mut current = self.entity_type(name)?;
        while let Some(base) = current.base.clone() {
            current = self.entity_type(&base)?;
        }
        Ok(current)
    }

    /// Returns `name` and every type below it that can be materialized,
    /// in declaration order.
    fn concrete_types_in_hierarchy(&self, name: &str) -> Result<Vec<Arc<EntityType>>> {
        let mut out = Vec::new();
        let mut pending = vec![self.entity_type(name)?];
        while let Some(ty) = pending.pop() {
            let children = self.derived_types(&ty.name)?;
            if !ty.is_abstract {
                out.push(Arc::clone(&ty));
            }
            pending.extend(children.into_iter().rev());
        }
        Ok(out)
    }

    /// Returns true when `name` belongs to an inheritance hierarchy.
    fn is_hierarchical(&self, name: &str) -> Result<bool> {
        let root = self.root_type(name)?;
        Ok(!self.derived_types(&root.name)?.is_empty())
    }

    /// Returns every property of `name`, inherited ones first.
    fn properties(&self, name: &str) -> Result<Vec<Property>> {
        let mut chain = vec![self.entity_type(name)?];
        while let Some(base) = chain.last().and_then(|ty| ty.base.clone()) {
            chain.push(self.entity_type(&base)?);
        }
        Ok(chain
            .iter()
            .rev()
            .flat_map(|ty| ty.properties.iter().cloned())
            .collect())
    }

    /// Resolves one property of `entity`, searching the base chain.
    fn property(&self, entity: &str, property: &str) -> Result<Property> {
        self.properties(entity)?
            .into_iter()
            .find(|p| p.name == property)
            .ok_or_else(|| PenumbraError::UnknownProperty {
                entity_type: entity.to_owned(),
                property: property.to_owned(),
            })
    }

    /// Returns the primary key properties of the hierarchy `name` belongs to.
    fn primary_key(&self, name: &str) -> Result<Vec<Property>> {
        let root = self.root_type(name)?;
        if root.key.is_empty() {
            return Err(PenumbraError::MissingKey(root.name.clone()));
        }
        root.key
            .iter()
            .map(|prop| self.property(&root.name, prop))
            .collect()
    }

    /// Resolves a navigation of `entity`, searching the base chain.
    fn navigation(&self, entity: &str, navigation: &str) -> Result<Navigation> {
        let mut current = Some(self.entity_type(entity)?);
        while let Some(ty) = current {
            if let Some(nav) = ty.navigations.iter().find(|n| n.name == navigation) {
                return Ok(nav.clone());
            }
            current = match &ty.base {
                Some(base) => Some(self.entity_type(base)?),
                None => None,
            };
        }
        Err(PenumbraError::UnknownNavigation {
            entity_type: entity.to_owned(),
            navigation: navigation.to_owned(),
        })
    }

    /// Returns the discriminator property of the hierarchy, if it has one.
    fn discriminator(&self, name: &str) -> Result<Option<Property>> {
        let root = self.root_type(name)?;
        root.discriminator
            .as_deref()
            .map(|prop| self.property(&root.name, prop))
            .transpose()
    }

    /// Returns the table the hierarchy is stored in.
    fn table(&self, name: &str) -> Result<TableMapping> {
        let root = self.root_type(name)?;
        root.table
            .clone()
            .ok_or_else(|| PenumbraError::UnmappedEntityType(root.name.clone()))
    }
}

/// Simple in-memory model used for tests or models assembled in code.
#[derive(Default)]
pub struct InMemoryModel {
    types: FxHashMap<String, Arc<EntityType>>,
    order: Vec<String>,
}

impl InMemoryModel {
    /// Creates an empty model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity type. Re-registering a name replaces it in place.
    pub fn with_entity(mut self, entity: EntityType) -> Self {
        if !self.types.contains_key(&entity.name) {
            self.order.push(entity.name.clone());
        }
        self.types.insert(entity.name.clone(), Arc::new(entity));
        self
    }

    /// Names of every registered type, in declaration order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl ModelMetadata for InMemoryModel {
    fn entity_type(&self, name: &str) -> Result<Arc<EntityType>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| PenumbraError::UnknownEntityType(name.to_owned()))
    }

    fn derived_types(&self, name: &str) -> Result<Vec<Arc<EntityType>>> {
        if !self.types.contains_key(name) {
            return Err(PenumbraError::UnknownEntityType(name.to_owned()));
        }
        Ok(self
            .order
            .iter()
            .filter_map(|n| self.types.get(n))
            .filter(|ty| ty.base.as_deref() == Some(name))
            .cloned()
            .collect())
    }
}
