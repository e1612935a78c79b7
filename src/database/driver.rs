//! Driver abstraction
//!
//! A driver is the adapter between a connection and a concrete storage
//! backend. Rows cross this boundary as JSON maps that include the
//! built-in `id`, `dateCreated` and `dateUpdated` fields.

use crate::config::ConnectionConfig;
use crate::database::memory::MemoryDriver;
use crate::error::{DbxError, Result};
use crate::model::query::Query;
use crate::model::schema::ModelSchema;
use crate::model::Row;
use async_trait::async_trait;
use std::sync::Arc;

/// Storage backend used by a connection
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name (e.g. "memory")
    fn name(&self) -> &str;

    /// Open the backend
    async fn connect(&self, config: &ConnectionConfig) -> Result<()>;

    /// Close the backend
    async fn disconnect(&self) -> Result<()>;

    /// Make sure storage for a model exists; existing data is kept
    async fn ensure_collection(&self, schema: &ModelSchema) -> Result<()>;

    /// Store a new row and return its assigned id
    async fn insert(&self, model: &str, row: Row) -> Result<u64>;

    /// Replace a stored row; returns false if no row has this id
    async fn update(&self, model: &str, id: u64, row: Row) -> Result<bool>;

    /// Delete a stored row; returns false if no row has this id
    async fn delete(&self, model: &str, id: u64) -> Result<bool>;

    /// Fetch rows by id, in the order given, skipping missing ids
    async fn fetch(&self, model: &str, ids: &[u64]) -> Result<Vec<Row>>;

    /// Rows matching a query
    async fn select(&self, model: &str, query: &Query) -> Result<Vec<Row>>;

    /// Number of rows matching a query, ignoring its paging
    async fn count(&self, model: &str, query: &Query) -> Result<u64>;

    /// Run a raw statement
    async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        let _ = sql;
        Err(DbxError::unsupported(self.name(), "raw statements"))
    }
}

/// Build the driver named in a configuration
pub fn from_config(config: &ConnectionConfig) -> Result<Arc<dyn Driver>> {
    match config.driver.trim().to_lowercase().as_str() {
        "memory" | "mem" => Ok(Arc::new(MemoryDriver::new())),
        other => Err(DbxError::UnsupportedDriver(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let driver = from_config(&ConnectionConfig::new("Memory")).unwrap();
        assert_eq!(driver.name(), "memory");

        assert!(matches!(
            from_config(&ConnectionConfig::new("postgres")),
            Err(DbxError::UnsupportedDriver(name)) if name == "postgres"
        ));
    }

    #[tokio::test]
    async fn test_raw_statements_unsupported_by_default() {
        let driver = MemoryDriver::new();
        let result = driver.execute("SELECT 1").await;
        assert!(matches!(result, Err(DbxError::Unsupported { .. })));
    }
}
