//! Relational query-translation core.
//!
//! Penumbra turns an operator tree over mapped entity types into SQL
//! commands plus the shapers that rebuild entities from their rows:
//!
//! - [`metadata`] describes entity types, keys, hierarchies and navigations.
//! - [`query::sql`] holds the expression model and the SQL generator.
//! - [`query::optimize`] rewrites predicates, including null expansion.
//! - [`query::compiler`] flattens joins and compiles includes.
//! - [`query::executor`] runs the result over a connection.

#![warn(missing_docs)]

pub mod config;
/// Error type shared by every fallible operation.
pub mod error;
pub mod metadata;
pub mod query;
pub mod value;

pub use config::{CompilerOptions, TrackingBehavior};
pub use error::{PenumbraError, Result};
pub use metadata::{EntityType, ForeignKey, InMemoryModel, ModelMetadata, Navigation, Property};
pub use value::{KeyValue, SqlType, Value, ValueBuffer, ValueKind};
