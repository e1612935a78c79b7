//! In-memory driver
//!
//! Keeps every model's rows in a map behind an async lock. Data lives
//! as long as the driver and is shared by clones of its connection.

use crate::config::ConnectionConfig;
use crate::database::driver::Driver;
use crate::error::{DbxError, Result};
use crate::model::query::Query;
use crate::model::schema::{ModelSchema, FIELD_ID};
use crate::model::Row;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug)]
struct MemoryTable {
    next_id: u64,
    rows: BTreeMap<u64, Row>,
}

impl MemoryTable {
    fn new() -> Self {
        Self {
            next_id: 1,
            rows: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    tables: HashMap<String, MemoryTable>,
}

/// Driver that stores rows in process memory
#[derive(Debug, Default)]
pub struct MemoryDriver {
    state: RwLock<MemoryState>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows stored for a model
    pub async fn len(&self, model: &str) -> usize {
        self.state
            .read()
            .await
            .tables
            .get(model)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }
}

fn ensure_connected(state: &MemoryState) -> Result<()> {
    if state.connected {
        Ok(())
    } else {
        Err(DbxError::NotConnected("memory".to_string()))
    }
}

fn table<'a>(state: &'a MemoryState, model: &str) -> Result<&'a MemoryTable> {
    ensure_connected(state)?;
    state
        .tables
        .get(model)
        .ok_or_else(|| DbxError::Driver(format!("No storage for model '{}'", model)))
}

fn table_mut<'a>(state: &'a mut MemoryState, model: &str) -> Result<&'a mut MemoryTable> {
    ensure_connected(state)?;
    state
        .tables
        .get_mut(model)
        .ok_or_else(|| DbxError::Driver(format!("No storage for model '{}'", model)))
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<()> {
        let mut state = self.state.write().await;
        state.connected = true;
        tracing::debug!(endpoint = %config.endpoint(), "Memory driver opened");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.write().await.connected = false;
        Ok(())
    }

    async fn ensure_collection(&self, schema: &ModelSchema) -> Result<()> {
        let mut state = self.state.write().await;
        ensure_connected(&state)?;
        if !state.tables.contains_key(schema.name()) {
            tracing::debug!(model = %schema.name(), "Creating in-memory table");
            state
                .tables
                .insert(schema.name().to_string(), MemoryTable::new());
        }
        Ok(())
    }

    async fn insert(&self, model: &str, mut row: Row) -> Result<u64> {
        let mut state = self.state.write().await;
        let table = table_mut(&mut state, model)?;

        let id = table.next_id;
        table.next_id += 1;
        row.insert(FIELD_ID.to_string(), Value::from(id));
        table.rows.insert(id, row);
        Ok(id)
    }

    async fn update(&self, model: &str, id: u64, mut row: Row) -> Result<bool> {
        let mut state = self.state.write().await;
        let table = table_mut(&mut state, model)?;

        match table.rows.get_mut(&id) {
            Some(stored) => {
                row.insert(FIELD_ID.to_string(), Value::from(id));
                *stored = row;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, model: &str, id: u64) -> Result<bool> {
        let mut state = self.state.write().await;
        let table = table_mut(&mut state, model)?;
        Ok(table.rows.remove(&id).is_some())
    }

    async fn fetch(&self, model: &str, ids: &[u64]) -> Result<Vec<Row>> {
        let state = self.state.read().await;
        let table = table(&state, model)?;
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect())
    }

    async fn select(&self, model: &str, query: &Query) -> Result<Vec<Row>> {
        let state = self.state.read().await;
        let table = table(&state, model)?;
        Ok(query.apply(table.rows.values().cloned()))
    }

    async fn count(&self, model: &str, query: &Query) -> Result<u64> {
        let state = self.state.read().await;
        let table = table(&state, model)?;
        Ok(table.rows.values().filter(|r| query.matches(r)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::query::{Direction, Op};
    use crate::model::schema::{FieldType, ModelField};
    use serde_json::json;

    async fn open() -> (MemoryDriver, ModelSchema) {
        let driver = MemoryDriver::new();
        driver.connect(&ConnectionConfig::default()).await.unwrap();
        let schema = ModelSchema::new("item", vec![ModelField::new("name", FieldType::String)]).unwrap();
        driver.ensure_collection(&schema).await.unwrap();
        (driver, schema)
    }

    fn item(name: &str) -> Row {
        let mut row = Row::new();
        row.insert("name".to_string(), json!(name));
        row
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let driver = MemoryDriver::new();
        let schema = ModelSchema::new("item", vec![]).unwrap();
        assert!(matches!(
            driver.ensure_collection(&schema).await,
            Err(DbxError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_sequential_ids() {
        let (driver, _) = open().await;
        assert_eq!(driver.insert("item", item("a")).await.unwrap(), 1);
        assert_eq!(driver.insert("item", item("b")).await.unwrap(), 2);

        assert!(driver.delete("item", 2).await.unwrap());
        assert_eq!(driver.insert("item", item("c")).await.unwrap(), 3);
        assert_eq!(driver.len("item").await, 2);
    }

    #[tokio::test]
    async fn test_unknown_model() {
        let (driver, _) = open().await;
        assert!(matches!(
            driver.insert("ghost", item("a")).await,
            Err(DbxError::Driver(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_update_delete() {
        let (driver, schema) = open().await;
        driver.insert("item", item("a")).await.unwrap();
        driver.insert("item", item("b")).await.unwrap();

        let rows = driver.fetch("item", &[2, 9, 1]).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("b"), json!("a")]);
        assert_eq!(rows[0]["id"], json!(2));

        assert!(driver.update("item", 1, item("z")).await.unwrap());
        assert!(!driver.update("item", 7, item("z")).await.unwrap());
        assert_eq!(driver.fetch("item", &[1]).await.unwrap()[0]["name"], json!("z"));

        assert!(driver.delete("item", 1).await.unwrap());
        assert!(!driver.delete("item", 1).await.unwrap());

        // Re-ensuring keeps data
        driver.ensure_collection(&schema).await.unwrap();
        assert_eq!(driver.len("item").await, 1);
    }

    #[tokio::test]
    async fn test_select_and_count() {
        let (driver, _) = open().await;
        for name in ["pear", "apple", "plum"] {
            driver.insert("item", item(name)).await.unwrap();
        }

        let query = Query::new()
            .filter("name", Op::Contains, "p")
            .order_by("name", Direction::Asc)
            .limit(2);
        let rows = driver.select("item", &query).await.unwrap();
        let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("apple"), json!("pear")]);

        assert_eq!(driver.count("item", &query).await.unwrap(), 3);
        assert_eq!(driver.count("item", &Query::new().eq("name", "plum")).await.unwrap(), 1);
    }
}
