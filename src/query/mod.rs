#![forbid(unsafe_code)]

//! Query compilation and execution.
//!
//! An operator tree built over [`QuerySource`]s is flattened into as few
//! relational commands as possible, its predicates are optimized, and its
//! include requests become related loaders. The executor then runs the
//! commands and shapes rows into entities.

/// Compiler entry point.
pub mod compiler;

/// Entity instances, identity resolution and per-query state.
pub mod entity;

/// Runs compiled queries over a [`executor::RelationalConnection`].
pub mod executor;

/// Folds composed operators into joins.
pub mod flatten;

/// Rewrites include requests into joins and related commands.
pub mod include;

/// Per-type column readers, including discriminated hierarchies.
pub mod materializer;

/// Operator tree.
pub mod operators;

/// Predicate rewriting passes.
pub mod optimize;

/// Compile-time counters.
pub mod profile;

/// Builds client results from rows.
pub mod shaper;

/// Query sources and accessors.
pub mod source;

/// SQL expression model and rendering.
pub mod sql;

pub use compiler::{CompiledQuery, QueryCompiler};
pub use entity::{EntityInstance, EntityKey, EntityRef, IdentityMap, QueryContext, StateManager};
pub use executor::{QueryExecutor, RelationalConnection};
pub use operators::{IncludeSpecification, JoinKey, KeySelector, QueryOperator};
pub use optimize::PredicateOptimizer;
pub use shaper::{Projector, ResultSelector, Shaped, Shaper};
pub use source::{Accessor, QuerySource, QuerySourceMapping};
