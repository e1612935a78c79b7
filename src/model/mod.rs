//! Model module
//!
//! A `Model` is a handle to a schema defined on a connection. It runs
//! the CRUD-style operations, consulting the connection's cache engine
//! for reads and invalidating it on writes.

pub mod query;
pub mod record;
pub mod schema;

use crate::database::connection::Connection;
use crate::error::{DbxError, Result};
use chrono::{DateTime, Utc};
use query::Query;
use record::Record;
use schema::ModelSchema;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A row of field values keyed by field name
pub type Row = BTreeMap<String, Value>;

/// Convert a JSON object into a row
pub fn row_from_json(value: Value) -> Result<Row> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(DbxError::Config(format!("Expected a JSON object, got {}", other))),
    }
}

/// Current time at the second resolution rows store
fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}

/// Handle to a model defined on a connection
#[derive(Clone, Debug)]
pub struct Model {
    connection: Connection,
    schema: Arc<ModelSchema>,
}

impl Model {
    pub(crate) fn new(connection: Connection, schema: Arc<ModelSchema>) -> Self {
        Self { connection, schema }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    fn cache_key(&self, operation: &str, suffix: &str) -> String {
        format!("{}:{}:{}", self.name(), operation, suffix)
    }

    fn to_record(&self, row: Row, in_cache: bool) -> Result<Record> {
        let mut record = Record::from_row(self.name(), row)?;
        record.in_cache = in_cache;
        Ok(record)
    }

    /// An unsaved record filled with field defaults
    pub fn new_record(&self) -> Record {
        let mut record = Record::new(self.name());
        let values = record.values_mut();
        for field in self.schema.user_fields() {
            values.insert(field.name.clone(), field.default.clone());
        }
        record
    }

    /// Validate a query against the schema and build its cache key
    fn query_key(&self, operation: &str, query: &Query) -> Result<String> {
        let checked = query
            .validate(&self.schema)
            .and_then(|()| query.cache_key());
        match checked {
            Ok(suffix) => Ok(self.cache_key(operation, &suffix)),
            Err(e) => {
                self.connection.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Count records matching a query
    pub async fn count(&self, query: &Query, from_cache: bool) -> Result<u64> {
        let key = self.query_key("count", query)?;
        let driver = self.connection.driver();

        let (count, _) = self
            .connection
            .read_through(Some(self.name()), "count", key, from_cache, || async move {
                driver.count(self.name(), query).await
            })
            .await?;
        Ok(count)
    }

    /// Validate and store a new record
    pub async fn create(&self, values: Row) -> Result<Record> {
        let mut record = Record::new(self.name());
        *record.values_mut() = values;
        self.save_record(&mut record).await?;
        Ok(record)
    }

    /// Create a record from a JSON object
    pub async fn create_json(&self, values: Value) -> Result<Record> {
        self.create(row_from_json(values)?).await
    }

    /// Fetch a record by id
    pub async fn get(&self, id: u64, from_cache: bool) -> Result<Option<Record>> {
        let key = self.cache_key("get", &id.to_string());
        let driver = self.connection.driver();

        let (row, in_cache) = self
            .connection
            .read_through(Some(self.name()), "get", key, from_cache, || async move {
                let mut rows = driver.fetch(self.name(), &[id]).await?;
                Ok::<_, DbxError>(rows.pop())
            })
            .await?;

        row.map(|row| self.to_record(row, in_cache)).transpose()
    }

    /// Fetch several records by id
    ///
    /// Records come back in the order of `ids`; ids with no record are
    /// skipped. With `from_cache`, each id is looked up in the cache and
    /// only the misses go to the driver.
    pub async fn get_all(&self, ids: &[u64], from_cache: bool) -> Result<Vec<Record>> {
        self.connection.ensure_connected().await?;
        let started = std::time::Instant::now();

        let cache = if from_cache {
            self.connection.cache_engine().await
        } else {
            None
        };

        let mut found: BTreeMap<u64, (Row, bool)> = BTreeMap::new();
        if let Some(ref cache) = cache {
            for &id in ids {
                let key = self.cache_key("get", &id.to_string());
                if let Some(Some(row)) = self.connection.cache_get::<Option<Row>>(cache.as_ref(), &key).await {
                    found.insert(id, (row, true));
                }
            }
        }

        let mut missing: Vec<u64> = ids.iter().copied().filter(|id| !found.contains_key(id)).collect();
        missing.sort_unstable();
        missing.dedup();

        if !missing.is_empty() {
            let _gate = if cache.is_some() {
                Some(self.connection.cache_read_gate().await)
            } else {
                None
            };

            let rows = match self.connection.driver().fetch(self.name(), &missing).await {
                Ok(rows) => rows,
                Err(e) => {
                    self.connection.emit_error(&e);
                    return Err(e);
                }
            };

            for row in rows {
                let Some(id) = row.get(schema::FIELD_ID).and_then(Value::as_u64) else {
                    continue;
                };
                if let Some(ref cache) = cache {
                    let key = self.cache_key("get", &id.to_string());
                    self.connection.cache_set(cache.as_ref(), &key, &Some(&row)).await;
                }
                found.insert(id, (row, false));
            }
        }

        let records = ids
            .iter()
            .filter_map(|id| found.get(id))
            .map(|(row, in_cache)| self.to_record(row.clone(), *in_cache))
            .collect::<Result<Vec<_>>>()?;

        let all_cached = missing.is_empty() && !ids.is_empty();
        self.connection.emit_query(
            Some(self.name()),
            "get_all",
            all_cached,
            records.len() as u64,
            started,
        );
        Ok(records)
    }

    /// Find records matching a query
    pub async fn search(&self, query: &Query, from_cache: bool) -> Result<Vec<Record>> {
        let key = self.query_key("search", query)?;
        let driver = self.connection.driver();

        let (rows, in_cache) = self
            .connection
            .read_through(Some(self.name()), "search", key, from_cache, || async move {
                driver.select(self.name(), query).await
            })
            .await?;

        rows.into_iter()
            .map(|row| self.to_record(row, in_cache))
            .collect()
    }

    /// Run a raw statement and map its rows to records of this model
    pub async fn query(&self, sql: &str, from_cache: bool) -> Result<Vec<Record>> {
        let key = self.cache_key("sql", sql);
        let driver = self.connection.driver();

        let (rows, in_cache) = self
            .connection
            .read_through(Some(self.name()), "sql", key, from_cache, || async move {
                driver.execute(sql).await
            })
            .await?;

        rows.into_iter()
            .map(|row| self.to_record(row, in_cache))
            .collect()
    }

    fn check_owner(&self, record: &Record) -> Result<()> {
        if record.model == self.name() {
            Ok(())
        } else {
            Err(DbxError::ModelMismatch {
                expected: self.name().to_string(),
                found: record.model.clone(),
            })
        }
    }

    /// Insert an unsaved record or update a stored one
    pub(crate) async fn save_record(&self, record: &mut Record) -> Result<()> {
        self.check_owner(record)?;
        let values = match self.schema.prepare_values(record.values().clone()) {
            Ok(values) => values,
            Err(e) => {
                self.connection.emit_error(&e);
                return Err(e);
            }
        };
        let timestamp = now();

        if record.exists {
            let mut row = record.to_row();
            row.extend(values.clone());
            row.insert(schema::FIELD_DATE_UPDATED.to_string(), Value::from(timestamp.timestamp()));

            let driver = self.connection.driver();
            let id = record.id;
            let updated = self
                .connection
                .write_through(
                    self.name(),
                    "update",
                    async move { driver.update(self.name(), id, row).await },
                    |updated: &bool| u64::from(*updated),
                )
                .await?;

            if !updated {
                record.exists = false;
                let err = DbxError::RecordNotFound {
                    model: self.name().to_string(),
                    id,
                };
                self.connection.emit_error(&err);
                return Err(err);
            }
            record.date_updated = timestamp;
        } else {
            let mut row = values.clone();
            row.insert(schema::FIELD_DATE_CREATED.to_string(), Value::from(timestamp.timestamp()));
            row.insert(schema::FIELD_DATE_UPDATED.to_string(), Value::from(timestamp.timestamp()));

            let driver = self.connection.driver();
            let id = self
                .connection
                .write_through(
                    self.name(),
                    "create",
                    async move { driver.insert(self.name(), row).await },
                    |_: &u64| 1,
                )
                .await?;

            record.id = id;
            record.date_created = timestamp;
            record.date_updated = timestamp;
            record.exists = true;
        }

        *record.values_mut() = values;
        record.in_cache = false;
        Ok(())
    }

    /// Delete a stored record
    pub(crate) async fn delete_record(&self, record: &mut Record) -> Result<()> {
        self.check_owner(record)?;
        if !record.exists {
            return Err(DbxError::RecordNotFound {
                model: self.name().to_string(),
                id: record.id,
            });
        }

        let driver = self.connection.driver();
        let id = record.id;
        let deleted = self
            .connection
            .write_through(
                self.name(),
                "delete",
                async move { driver.delete(self.name(), id).await },
                |deleted: &bool| u64::from(*deleted),
            )
            .await?;

        record.exists = false;
        record.in_cache = false;

        if deleted {
            Ok(())
        } else {
            let err = DbxError::RecordNotFound {
                model: self.name().to_string(),
                id,
            };
            self.connection.emit_error(&err);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use serde_json::json;

    #[test]
    fn test_row_from_json() {
        let row = row_from_json(json!({"name": "ann", "age": 3})).unwrap();
        assert_eq!(row.len(), 2);
        assert!(row_from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn test_now_has_second_resolution() {
        assert_eq!(now().timestamp_subsec_nanos(), 0);
    }

    #[tokio::test]
    async fn test_new_record_defaults() {
        let conn = Connection::new("model-unit-defaults", ConnectionConfig::default()).unwrap();
        let user = conn
            .define_types("user", &[("name", "string"), ("tags", "json")])
            .await
            .unwrap();

        let record = user.new_record();
        assert!(!record.exists);
        assert_eq!(record.get("name"), Some(json!("")));
        assert_eq!(record.get("tags"), Some(json!("[]")));

        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_model_mismatch() {
        let conn = Connection::new("model-unit-mismatch", ConnectionConfig::default()).unwrap();
        conn.connect().await.unwrap();
        let user = conn.define_types("user", &[("name", "string")]).await.unwrap();
        let post = conn.define_types("post", &[("title", "string")]).await.unwrap();
        conn.sync_models().await.unwrap();

        let mut record = user.new_record();
        assert!(matches!(
            record.save(&post).await,
            Err(DbxError::ModelMismatch { .. })
        ));

        conn.close().await.unwrap();
    }
}
