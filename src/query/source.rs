//! Query source tokens and accessor paths into composed results.
use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Opaque token identifying one clause of the logical query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuerySource(pub u32);

impl fmt::Display for QuerySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qs{}", self.0)
    }
}

/// Path from a composed result down to one component.
///
/// Each step selects an element of a tuple produced by a pairwise result
/// selector. The empty path is the result itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Accessor(SmallVec<[usize; 4]>);

impl Accessor {
    /// The whole result.
    pub fn root() -> Self {
        Self::default()
    }

    /// Builds an accessor from explicit steps.
    pub fn from_steps(steps: impl IntoIterator<Item = usize>) -> Self {
        Self(steps.into_iter().collect())
    }

    /// Returns this path with `step` prepended.
    pub fn nested_under(&self, step: usize) -> Self {
        let mut steps = SmallVec::with_capacity(self.0.len() + 1);
        steps.push(step);
        steps.extend_from_slice(&self.0);
        Self(steps)
    }

    /// Steps, outermost first.
    pub fn steps(&self) -> &[usize] {
        &self.0
    }

    /// Returns true for the empty path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

/// External mapping from query sources to where their value lives in the
/// final result shape.
#[derive(Clone, Debug, Default)]
pub struct QuerySourceMapping {
    entries: FxHashMap<QuerySource, Accessor>,
}

impl QuerySourceMapping {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a source at the root of the result.
    pub fn add_root(&mut self, source: QuerySource) {
        self.entries.insert(source, Accessor::root());
    }

    /// Records or replaces the accessor for `source`.
    pub fn insert(&mut self, source: QuerySource, accessor: Accessor) {
        self.entries.insert(source, accessor);
    }

    /// Looks up the accessor for `source`.
    pub fn get(&self, source: QuerySource) -> Option<&Accessor> {
        self.entries.get(&source)
    }

    /// Returns true when `source` is mapped.
    pub fn contains(&self, source: QuerySource) -> bool {
        self.entries.contains_key(&source)
    }

    /// Forgets `source`, whose value is no longer reachable from the result.
    pub fn remove(&mut self, source: QuerySource) {
        self.entries.remove(&source);
    }

    /// Moves each of `sources` one tuple level deeper, under element `step`.
    /// Unmapped sources are mapped directly to `step`.
    pub fn nest(&mut self, sources: &[QuerySource], step: usize) {
        for source in sources {
            let nested = match self.entries.get(source) {
                Some(existing) => existing.nested_under(step),
                None => Accessor::root().nested_under(step),
            };
            self.entries.insert(*source, nested);
        }
    }
}
