//! Engine configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::{create_backend_from_config, DatabaseBackend, DatabaseConfig};

/// Settings for the notification dispatcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationsConfig {
    /// Prefix of the action link attached to request notifications
    #[serde(default = "default_action_base_path")]
    pub action_base_path: String,
}

fn default_action_base_path() -> String {
    "/requests".to_string()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            action_base_path: default_action_base_path(),
        }
    }
}

/// Settings for incident attribution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributionConfig {
    /// Run a claim pass whenever an administrator lists their incidents
    #[serde(default = "default_claim_on_list")]
    pub claim_on_list: bool,
}

fn default_claim_on_list() -> bool {
    true
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            claim_on_list: default_claim_on_list(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub attribution: AttributionConfig,
}

impl EngineConfig {
    /// Loads the config from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Loads the config, falling back to defaults when the file does not exist
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves the config to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(&self)?;

        // Ensure parent directories exist
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        fs::write(&path, content)
            .with_context(|| format!("Failed to write config to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Opens the configured backend, creating an empty store if needed
    pub fn open_backend(&self) -> Result<Arc<dyn DatabaseBackend>> {
        let backend = create_backend_from_config(&self.database)?;
        backend.create_if_not_exists()?;
        Ok(backend)
    }
}

/// Gets the path to the engine config file
pub fn get_config_path() -> Result<PathBuf> {
    // Check if PROPMAN_CONFIG environment variable is set
    if let Ok(path) = std::env::var("PROPMAN_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    let config_dir = dirs::config_dir().context("Failed to determine config directory")?;

    Ok(config_dir.join("propman").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BackendType;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.notifications.action_base_path, "/requests");
        assert!(config.attribution.claim_on_list);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "attribution:\n  claim_on_list: false\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert!(!config.attribution.claim_on_list);
        assert_eq!(config.database, DatabaseConfig::default());
    }

    #[test]
    fn test_save_creates_parent_and_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = EngineConfig::default();
        config.database.path = dir.path().join("ledger.yaml");
        config.database.backend_type = Some(BackendType::Yaml);
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let backend = loaded.open_backend().unwrap();
        assert_eq!(backend.backend_type(), BackendType::Yaml);
        assert!(config.database.path.exists());
    }
}
