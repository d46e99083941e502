// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine configuration, stored as RON.

use crate::dump::DumpMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error loading or saving an [`EngineConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid RON for this structure
    #[error("config parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The configuration could not be rendered
    #[error("config serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// A field holds a value the engine cannot work with
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables of a graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Elements per chunk handed to chunked node bodies
    pub chunk_size: usize,
    /// Slots reserved up front in every bus
    pub initial_bus_capacity: usize,
    /// Rendering used when a project is saved without an explicit mode
    pub dump_mode: DumpMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 4096,
            initial_bus_capacity: 1024,
            dump_mode: DumpMode::Human,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from RON text; missing fields take defaults
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = ron::from_str(text)?;
        if config.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".to_string()));
        }
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Render as pretty RON
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Save to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_takes_defaults() {
        let config = EngineConfig::from_ron("(chunk_size: 16)").unwrap();
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.initial_bus_capacity, 1024);
        assert_eq!(config.dump_mode, DumpMode::Human);
    }

    #[test]
    fn test_zero_chunk_size_is_invalid() {
        assert!(matches!(
            EngineConfig::from_ron("(chunk_size: 0)"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        let config = EngineConfig {
            chunk_size: 1,
            initial_bus_capacity: 8,
            dump_mode: DumpMode::Compact,
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
