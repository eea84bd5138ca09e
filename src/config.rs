//! Compiler options and their TOML loader.
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::PenumbraError;

/// Whether shaped entities are registered with the state manager.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBehavior {
    /// Resolve identities against, and register with, the state manager.
    #[default]
    TrackAll,
    /// Materialize fresh instances for every row.
    NoTracking,
}

/// Options that change how queries are translated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Keep SQL three-valued null semantics instead of expanding comparisons.
    pub use_relational_nulls: bool,
    /// Default tracking behaviour for entity shapers.
    pub tracking: TrackingBehavior,
    /// Allow correlated SelectMany to flatten into a lateral join.
    pub lateral_joins: bool,
    /// Use buffered shapers for collection include loaders.
    pub buffer_collections: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            use_relational_nulls: false,
            tracking: TrackingBehavior::TrackAll,
            lateral_joins: false,
            buffer_collections: true,
        }
    }
}

impl CompilerOptions {
    /// Returns true when entity shapers should track.
    pub fn is_tracking(&self) -> bool {
        self.tracking == TrackingBehavior::TrackAll
    }

    /// Parses options from a TOML document with an optional `[compiler]` table.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(input)?;
        Ok(raw.compiler)
    }

    /// Loads options from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Serializes the options back into a `[compiler]` document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        let raw = RawConfig {
            compiler: self.clone(),
        };
        Ok(toml::to_string_pretty(&raw)?)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RawConfig {
    #[serde(default)]
    compiler: CompilerOptions,
}

/// Failures while loading compiler options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The document is not valid TOML for these options.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The options could not be rendered.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl From<ConfigError> for PenumbraError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io(io) => PenumbraError::Io(io),
            other => PenumbraError::Config(other.to_string()),
        }
    }
}
