//! Store Configuration
//!
//! Tunables for a [`Store`](crate::Store). Every field has a default, so a
//! partial JSON document (or `{}`) is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How settlement of async atom values is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AsyncDriver {
    /// Spawn a settlement task on the tokio runtime entered by the caller,
    /// if there is one. Without a runtime this behaves like `Manual`.
    #[default]
    Ambient,

    /// Never spawn. An async value settles when some consumer awaits it.
    Manual,
}

/// Configuration for a store instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum nesting of write calls before a write fails with
    /// [`AtomError::WriteDepthExceeded`](crate::AtomError::WriteDepthExceeded).
    pub max_write_depth: usize,

    /// Record count at which the store sweeps records of dropped atoms.
    pub gc_threshold: usize,

    /// Settlement strategy for async atoms.
    pub async_driver: AsyncDriver,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_write_depth: 100,
            gc_threshold: 1024,
            async_driver: AsyncDriver::Ambient,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_write_depth == 0 {
            return Err(ConfigError::ZeroWriteDepth);
        }
        Ok(())
    }

    pub fn with_max_write_depth(mut self, depth: usize) -> Self {
        self.max_write_depth = depth;
        self
    }

    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    pub fn with_async_driver(mut self, driver: AsyncDriver) -> Self {
        self.async_driver = driver;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let config = StoreConfig::from_json("{}").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn partial_json_overrides_fields() {
        let config =
            StoreConfig::from_json(r#"{"max_write_depth": 8, "async_driver": "manual"}"#).unwrap();
        assert_eq!(config.max_write_depth, 8);
        assert_eq!(config.async_driver, AsyncDriver::Manual);
        assert_eq!(config.gc_threshold, 1024);
    }

    #[test]
    fn zero_write_depth_is_rejected() {
        let err = StoreConfig::from_json(r#"{"max_write_depth": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWriteDepth));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = StoreConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
