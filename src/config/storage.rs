//! Configuration Storage
//!
//! This module handles persistent storage of named connection
//! configurations in a TOML file.

use crate::config::ConnectionConfig;
use crate::error::{DbxError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration file name
const CONFIG_FILE: &str = "connections.toml";

/// Named connection configurations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Connection settings keyed by connection id
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

impl ConfigFile {
    /// Create a new empty configuration file
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| DbxError::Config("Could not find configuration directory".to_string()))?
            .join("dbx");

        Ok(config_dir)
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Load the configuration file from its default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    /// Load a configuration file
    ///
    /// A missing file yields an empty configuration.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let config: ConfigFile = toml::from_str(&content)?;

        tracing::debug!(
            path = %path.display(),
            connections = config.connections.len(),
            "Loaded connection config"
        );

        Ok(config)
    }

    /// Save the configuration file to its default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    /// Save the configuration file, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| DbxError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, content)?;
        Ok(())
    }

    /// Get a connection configuration by id
    pub fn connection(&self, id: &str) -> Option<&ConnectionConfig> {
        self.connections.get(id)
    }

    /// Add or replace a connection configuration
    pub fn set_connection(&mut self, id: impl Into<String>, config: ConnectionConfig) {
        self.connections.insert(id.into(), config);
    }

    /// Remove a connection configuration
    pub fn remove_connection(&mut self, id: &str) -> Option<ConnectionConfig> {
        self.connections.remove(id)
    }

    /// List configured connection ids
    pub fn connection_ids(&self) -> Vec<&str> {
        self.connections.keys().map(|k| k.as_str()).collect()
    }
}
