//! Configuration module
//!
//! This module handles connection configuration: the settings a
//! `Connection` is built from, environment overrides, and the
//! on-disk file of named connections.

pub mod storage;

use crate::database::cache::CacheOptions;
use crate::error::{DbxError, Result};
use serde::{Deserialize, Serialize};

/// Default driver name
pub const DEFAULT_DRIVER: &str = "memory";

/// Default host name
pub const DEFAULT_HOST: &str = "localhost";

/// Settings for a single database endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Driver name (e.g. "memory")
    pub driver: String,
    /// Database host
    pub host: String,
    /// Database port
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Database name
    pub database: String,
    /// Username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password (never written back to disk)
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Query cache settings; no cache when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheOptions>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: None,
            database: String::new(),
            user: None,
            password: None,
            cache: None,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration for the given driver with default settings
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Default::default()
        }
    }

    /// Set the host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the database name
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set the credentials
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Enable the query cache
    pub fn with_cache(mut self, options: CacheOptions) -> Self {
        self.cache = Some(options);
        self
    }

    /// Load a configuration from `DBX_*` environment variables
    ///
    /// A `.env` file in the working directory is read first, if present.
    /// Variables that are not set keep their defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(driver) = lookup("DBX_DRIVER") {
            config.driver = driver;
        }
        if let Some(host) = lookup("DBX_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("DBX_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| DbxError::Config(format!("Invalid DBX_PORT '{}': {}", port, e)))?;
            config.port = Some(port);
        }
        if let Some(database) = lookup("DBX_DATABASE") {
            config.database = database;
        }
        config.user = lookup("DBX_USER");
        config.password = lookup("DBX_PASSWORD");

        Ok(config)
    }

    /// Endpoint string for logs, without the password
    pub fn endpoint(&self) -> String {
        let mut endpoint = format!("{}://", self.driver);
        if let Some(ref user) = self.user {
            endpoint.push_str(user);
            endpoint.push('@');
        }
        endpoint.push_str(&self.host);
        if let Some(port) = self.port {
            endpoint.push_str(&format!(":{}", port));
        }
        if !self.database.is_empty() {
            endpoint.push('/');
            endpoint.push_str(&self.database);
        }
        endpoint
    }
}
