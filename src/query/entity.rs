//! Materialized entities, identity keys and the per-query execution context.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{PenumbraError, Result};
use crate::value::{KeyValue, Value, ValueBuffer};

/// Shared handle to a materialized entity.
pub type EntityRef = Arc<EntityInstance>;

/// Loaded value of one navigation.
#[derive(Clone, Debug)]
pub enum NavigationValue {
    /// To-one navigation. `None` when no related row exists.
    Reference(Option<EntityRef>),
    /// To-many navigation.
    Collection(Vec<EntityRef>),
}

/// Entity read from a value buffer.
///
/// Scalar values are fixed at materialization. Navigations are filled in
/// afterwards by include loaders, so they sit behind a lock.
pub struct EntityInstance {
    entity_type: String,
    values: BTreeMap<String, Value>,
    navigations: RwLock<BTreeMap<String, NavigationValue>>,
}

impl EntityInstance {
    /// Creates an instance of `entity_type` with the given property values.
    pub fn new(entity_type: impl Into<String>, values: BTreeMap<String, Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            values,
            navigations: RwLock::new(BTreeMap::new()),
        }
    }

    /// Concrete entity type name.
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Property value, if the type declares the property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.values.get(property)
    }

    /// Every property value, by property name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Related entity of a loaded reference navigation.
    pub fn reference(&self, navigation: &str) -> Option<EntityRef> {
        match self.navigations.read().get(navigation) {
            Some(NavigationValue::Reference(target)) => target.clone(),
            _ => None,
        }
    }

    /// Entities of a loaded collection navigation. Empty when not loaded.
    pub fn collection(&self, navigation: &str) -> Vec<EntityRef> {
        match self.navigations.read().get(navigation) {
            Some(NavigationValue::Collection(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// True once `navigation` has been loaded.
    pub fn is_loaded(&self, navigation: &str) -> bool {
        self.navigations.read().contains_key(navigation)
    }

    /// Fixes up a reference navigation.
    pub fn set_reference(&self, navigation: &str, target: Option<EntityRef>) {
        self.navigations
            .write()
            .insert(navigation.to_owned(), NavigationValue::Reference(target));
    }

    /// Marks a collection navigation loaded, leaving existing members alone.
    pub fn ensure_collection(&self, navigation: &str) {
        self.navigations
            .write()
            .entry(navigation.to_owned())
            .or_insert_with(|| NavigationValue::Collection(Vec::new()));
    }

    /// Adds `item` to a collection navigation. Returns false when the same
    /// instance is already a member.
    pub fn add_to_collection(&self, navigation: &str, item: EntityRef) -> bool {
        let mut navigations = self.navigations.write();
        let entry = navigations
            .entry(navigation.to_owned())
            .or_insert_with(|| NavigationValue::Collection(Vec::new()));
        match entry {
            NavigationValue::Collection(items) => {
                if items.iter().any(|existing| Arc::ptr_eq(existing, &item)) {
                    return false;
                }
                items.push(item);
                true
            }
            NavigationValue::Reference(_) => {
                *entry = NavigationValue::Collection(vec![item]);
                true
            }
        }
    }
}

impl PartialEq for EntityInstance {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type == other.entity_type && self.values == other.values
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let loaded: Vec<String> = self.navigations.read().keys().cloned().collect();
        f.debug_struct("EntityInstance")
            .field("entity_type", &self.entity_type)
            .field("values", &self.values)
            .field("loaded", &loaded)
            .finish()
    }
}

/// Identity of an entity: the hierarchy root plus its key values.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityKey {
    root: String,
    values: SmallVec<[KeyValue; 2]>,
}

impl EntityKey {
    /// Key of the hierarchy `root` with the given values.
    pub fn new(root: impl Into<String>, values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self {
            root: root.into(),
            values: values.into_iter().collect(),
        }
    }

    /// Reads a key from `buffer` at `indexes`.
    ///
    /// A null key value yields `Ok(None)`, or [`PenumbraError::NullKey`] when
    /// `throw_on_null` is set.
    pub fn from_buffer(
        root: &str,
        buffer: &ValueBuffer,
        indexes: &[usize],
        throw_on_null: bool,
    ) -> Result<Option<Self>> {
        let mut values = SmallVec::with_capacity(indexes.len());
        for &index in indexes {
            match buffer.get(index)?.key() {
                Some(value) => values.push(value),
                None if throw_on_null => return Err(PenumbraError::NullKey(root.to_owned())),
                None => return Ok(None),
            }
        }
        Ok(Some(Self {
            root: root.to_owned(),
            values,
        }))
    }

    /// Hierarchy root the key belongs to.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Key values, in key order.
    pub fn values(&self) -> &[KeyValue] {
        &self.values
    }
}

/// Identity-tracking collaborator.
pub trait StateManager: Send + Sync {
    /// Tracked instance for `key`, if any.
    fn try_get_entry(&self, key: &EntityKey) -> Option<EntityRef>;

    /// Starts tracking `entity` under `key`.
    fn start_tracking(&mut self, key: EntityKey, entity: EntityRef);

    /// Number of tracked instances.
    fn tracked_count(&self) -> usize;
}

/// Default state manager: one instance per key.
#[derive(Default)]
pub struct IdentityMap {
    entries: FxHashMap<EntityKey, EntityRef>,
}

impl IdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateManager for IdentityMap {
    fn try_get_entry(&self, key: &EntityKey) -> Option<EntityRef> {
        self.entries.get(key).cloned()
    }

    fn start_tracking(&mut self, key: EntityKey, entity: EntityRef) {
        self.entries.entry(key).or_insert(entity);
    }

    fn tracked_count(&self) -> usize {
        self.entries.len()
    }
}

/// Related entities loaded by one collection command, grouped by the
/// foreign key values that point at their principal.
pub type RelatedGroups = FxHashMap<SmallVec<[KeyValue; 2]>, Vec<EntityRef>>;

/// Results of related-entity commands, cached for the lifetime of one query.
#[derive(Default)]
pub struct QueryBuffer {
    related: FxHashMap<usize, Arc<RelatedGroups>>,
}

impl QueryBuffer {
    /// Groups loaded for `query_index`, if that command already ran.
    pub fn related(&self, query_index: usize) -> Option<Arc<RelatedGroups>> {
        self.related.get(&query_index).cloned()
    }

    /// Stores the groups loaded for `query_index`.
    pub fn store_related(&mut self, query_index: usize, groups: RelatedGroups) -> Arc<RelatedGroups> {
        let groups = Arc::new(groups);
        self.related.insert(query_index, Arc::clone(&groups));
        groups
    }

    /// Forgets every cached result.
    pub fn clear(&mut self) {
        self.related.clear();
    }
}

/// Per-execution state handed to every shaper.
pub struct QueryContext {
    state_manager: Box<dyn StateManager>,
    parameters: BTreeMap<String, Value>,
    buffer: QueryBuffer,
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new(Box::new(IdentityMap::new()))
    }
}

impl QueryContext {
    /// Context tracking through `state_manager`.
    pub fn new(state_manager: Box<dyn StateManager>) -> Self {
        Self {
            state_manager,
            parameters: BTreeMap::new(),
            buffer: QueryBuffer::default(),
        }
    }

    /// Binds a command parameter.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Bound command parameters.
    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    /// Identity-tracking collaborator.
    pub fn state_manager(&self) -> &dyn StateManager {
        self.state_manager.as_ref()
    }

    /// Mutable identity-tracking collaborator.
    pub fn state_manager_mut(&mut self) -> &mut dyn StateManager {
        self.state_manager.as_mut()
    }

    /// Related-entity results of the running query.
    pub fn buffer(&self) -> &QueryBuffer {
        &self.buffer
    }

    /// Mutable related-entity results of the running query.
    pub fn buffer_mut(&mut self) -> &mut QueryBuffer {
        &mut self.buffer
    }
}
