//! Runtime configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Schema version written into persisted ledgers.
pub const SCHEMA_VERSION: u32 = 1;

/// Configuration for a runtime and the ledgers it drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Package mutations into patches and rebuild the graph from records on load.
    pub event_sourced: bool,

    /// Steps between full snapshots.
    pub snapshot_cadence: u64,

    /// Raise on equally specific template matches instead of taking the first.
    pub strict_templates: bool,

    /// Maximum number of redirects followed within one step.
    pub max_redirects: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_sourced: true,
            snapshot_cadence: 10,
            strict_templates: true,
            max_redirects: 32,
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> Result<()> {
        if self.snapshot_cadence == 0 {
            return Err(Error::Config("snapshot_cadence must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(config.event_sourced);
        assert_eq!(config.snapshot_cadence, 10);
        assert!(config.strict_templates);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            event_sourced = false
            snapshot_cadence = 3
            "#,
        )
        .unwrap();

        assert!(!config.event_sourced);
        assert_eq!(config.snapshot_cadence, 3);
        assert_eq!(config.max_redirects, 32);
    }

    #[test]
    fn test_rejects_zero_cadence() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("snapshot_cadence = 0"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(RuntimeConfig::from_toml_str("event_sourced = maybe").is_err());
    }
}
