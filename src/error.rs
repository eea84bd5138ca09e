use std::io;

use thiserror::Error;
use tracing::error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PenumbraError>;

/// Errors surfaced while compiling, shaping, or executing a query.
#[derive(Debug, Error)]
pub enum PenumbraError {
    /// A row carried a discriminator value that matches no concrete type of the hierarchy.
    #[error("unable to discriminate '{entity_type}': no concrete type matches discriminator value {value}")]
    UnableToDiscriminate {
        /// Root entity type of the hierarchy.
        entity_type: String,
        /// Discriminator value read from the row.
        value: String,
    },
    /// The model has no entity type with this name.
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),
    /// The entity type declares no property with this name.
    #[error("entity type '{entity_type}' has no property '{property}'")]
    UnknownProperty {
        /// Entity type that was searched.
        entity_type: String,
        /// Requested property.
        property: String,
    },
    /// The entity type declares no navigation with this name.
    #[error("entity type '{entity_type}' has no navigation '{navigation}'")]
    UnknownNavigation {
        /// Entity type that was searched.
        entity_type: String,
        /// Requested navigation.
        navigation: String,
    },
    /// The hierarchy root is not mapped to a table.
    #[error("entity type '{0}' is not mapped to a table")]
    UnmappedEntityType(String),
    /// The hierarchy root has no primary key.
    #[error("entity type '{0}' has no primary key")]
    MissingKey(String),
    /// Every type in the hierarchy is abstract.
    #[error("no concrete entity types in the hierarchy of '{0}'")]
    NoConcreteTypes(String),
    /// A key column read as null where a value was required.
    #[error("key value for '{0}' is null")]
    NullKey(String),
    /// A value buffer was indexed past its end.
    #[error("value buffer index {index} out of range ({len} values)")]
    BufferIndex {
        /// Requested index, relative to the buffer window.
        index: usize,
        /// Window length.
        len: usize,
    },
    /// A public entry point rejected its arguments before mutating anything.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An operator tree did not have the structure the compiler produces.
    #[error("query invariant violated: {0}")]
    Invariant(&'static str),
    /// The query uses a construct this core cannot translate.
    #[error("unsupported query construct: {0}")]
    Unsupported(&'static str),
    /// The row source failed.
    #[error("connection error: {0}")]
    Connection(String),
    /// Compiler options could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// I/O failure while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PenumbraError {
    /// Returns a stable short code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            PenumbraError::UnableToDiscriminate { .. } => "UnableToDiscriminate",
            PenumbraError::UnknownEntityType(_) => "UnknownEntityType",
            PenumbraError::UnknownProperty { .. } => "UnknownProperty",
            PenumbraError::UnknownNavigation { .. } => "UnknownNavigation",
            PenumbraError::UnmappedEntityType(_) => "UnmappedEntityType",
            PenumbraError::MissingKey(_) => "MissingKey",
            PenumbraError::NoConcreteTypes(_) => "NoConcreteTypes",
            PenumbraError::NullKey(_) => "NullKey",
            PenumbraError::BufferIndex { .. } => "BufferIndex",
            PenumbraError::Invalid(_) => "Invalid",
            PenumbraError::Invariant(_) => "Invariant",
            PenumbraError::Unsupported(_) => "Unsupported",
            PenumbraError::Connection(_) => "Connection",
            PenumbraError::Config(_) => "Config",
            PenumbraError::Io(_) => "Io",
        }
    }

    /// Builds an invariant violation and logs it.
    ///
    /// Operator shapes are produced by the compiler itself, so a mismatch is a
    /// bug in the lowering stage rather than a user error.
    pub(crate) fn invariant(message: &'static str) -> Self {
        error!(reason = message, "query.invariant_violated");
        PenumbraError::Invariant(message)
    }
}
