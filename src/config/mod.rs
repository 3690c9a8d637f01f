//! QC Configuration Module
//!
//! Laboratory-level configuration loaded from TOML, covering the rule
//! engine's operational knobs: the excluded-test blacklist, storage
//! location, and lab identification.
//!
//! ## Loading Order
//!
//! 1. `LABSENTRY_CONFIG` environment variable (path to TOML file)
//! 2. `qc_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! Unlike a global singleton, the loaded config is passed explicitly into
//! the components that need it (store, validator, pipeline); the blacklist
//! is injected configuration data, not shared static state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a laboratory deployment.
///
/// Load with [`QcConfig::load`], which searches:
/// 1. `$LABSENTRY_CONFIG` env var
/// 2. `./qc_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QcConfig {
    /// Laboratory identification
    #[serde(default)]
    pub laboratory: LaboratoryInfo,

    /// Rule evaluation settings
    #[serde(default)]
    pub rules: RuleSettings,

    /// Measurement store settings
    #[serde(default)]
    pub storage: StorageSettings,
}

impl QcConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("LABSENTRY_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), lab = %config.laboratory.name, "Loaded config from LABSENTRY_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from LABSENTRY_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "LABSENTRY_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("qc_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(lab = %config.laboratory.name, "Loaded config from ./qc_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./qc_config.toml, using defaults");
                }
            }
        }

        info!("No qc_config.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Laboratory identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaboratoryInfo {
    /// Laboratory display name
    #[serde(default = "default_lab_name")]
    pub name: String,
}

fn default_lab_name() -> String {
    "default-lab".to_string()
}

impl Default for LaboratoryInfo {
    fn default() -> Self {
        Self {
            name: default_lab_name(),
        }
    }
}

/// Rule evaluation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSettings {
    /// Test names excluded from multi-rule evaluation entirely.
    /// Matched case-insensitively against normalized measurement names.
    #[serde(default)]
    pub excluded_tests: Vec<String>,
}

impl RuleSettings {
    /// Uppercase-normalized exclusion set, ready for injection into the
    /// store and validator.
    pub fn excluded_set(&self) -> HashSet<String> {
        self.excluded_tests
            .iter()
            .map(|t| t.to_uppercase())
            .collect()
    }
}

/// Measurement store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Path to the sled database directory
    #[serde(default = "default_data_path")]
    pub data_path: String,
}

fn default_data_path() -> String {
    crate::store::DEFAULT_DB_PATH.to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QcConfig::default();
        assert_eq!(config.laboratory.name, "default-lab");
        assert!(config.rules.excluded_tests.is_empty());
        assert!(!config.storage.data_path.is_empty());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: QcConfig = toml::from_str(
            r#"
            [laboratory]
            name = "central-lab"

            [rules]
            excluded_tests = ["hba1c", "Troponin"]
            "#,
        )
        .unwrap();

        assert_eq!(config.laboratory.name, "central-lab");
        let excluded = config.rules.excluded_set();
        assert!(excluded.contains("HBA1C"));
        assert!(excluded.contains("TROPONIN"));
        // Unspecified section falls back to defaults
        assert!(!config.storage.data_path.is_empty());
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let config: QcConfig = toml::from_str("").unwrap();
        assert!(config.rules.excluded_set().is_empty());
    }
}
