//! Records
//!
//! A `Record` is one row of a model held in memory: its identity, the
//! built-in timestamps, its field values and where it came from.

use crate::error::{DbxError, Result};
use crate::model::schema::{is_builtin, FIELD_DATE_CREATED, FIELD_DATE_UPDATED, FIELD_ID};
use crate::model::{Model, Row};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// One row of a model
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Model the record belongs to
    pub model: String,
    /// Primary key; 0 until stored
    pub id: u64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date_created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date_updated: DateTime<Utc>,
    /// Whether the record is stored by the driver
    pub exists: bool,
    /// Whether the record was served from the cache engine
    pub in_cache: bool,
    values: Row,
}

impl Record {
    /// Create an unsaved record with no values
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: 0,
            date_created: DateTime::<Utc>::default(),
            date_updated: DateTime::<Utc>::default(),
            exists: false,
            in_cache: false,
            values: Row::new(),
        }
    }

    /// Build a stored record from a driver row
    pub fn from_row(model: impl Into<String>, mut row: Row) -> Result<Self> {
        let model = model.into();

        let id = match row.remove(FIELD_ID) {
            Some(value) => value
                .as_u64()
                .ok_or_else(|| DbxError::Driver(format!("Row of '{}' has a non-numeric id: {}", model, value)))?,
            None => return Err(DbxError::Driver(format!("Row of '{}' has no id", model))),
        };
        let date_created = take_timestamp(&mut row, FIELD_DATE_CREATED);
        let date_updated = take_timestamp(&mut row, FIELD_DATE_UPDATED);

        Ok(Self {
            model,
            id,
            date_created,
            date_updated,
            exists: true,
            in_cache: false,
            values: row,
        })
    }

    /// Row form including the built-in fields
    pub fn to_row(&self) -> Row {
        let mut row = self.values.clone();
        if self.id > 0 {
            row.insert(FIELD_ID.to_string(), Value::from(self.id));
        }
        row.insert(FIELD_DATE_CREATED.to_string(), Value::from(self.date_created.timestamp()));
        row.insert(FIELD_DATE_UPDATED.to_string(), Value::from(self.date_updated.timestamp()));
        row
    }

    /// Value of a field, including the built-ins
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            FIELD_ID => Some(Value::from(self.id)),
            FIELD_DATE_CREATED => Some(Value::from(self.date_created.timestamp())),
            FIELD_DATE_UPDATED => Some(Value::from(self.date_updated.timestamp())),
            _ => self.values.get(field).cloned(),
        }
    }

    /// Set a user field value
    ///
    /// Built-in fields are managed by the library and cannot be set.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Result<()> {
        let field = field.into();
        if is_builtin(&field) {
            return Err(DbxError::ReservedField(field));
        }
        self.values.insert(field, value.into());
        Ok(())
    }

    /// User field values
    pub fn values(&self) -> &Row {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut Row {
        &mut self.values
    }

    /// Insert or update the record through its model
    pub async fn save(&mut self, model: &Model) -> Result<()> {
        model.save_record(self).await
    }

    /// Delete the record through its model
    pub async fn delete(&mut self, model: &Model) -> Result<()> {
        model.delete_record(self).await
    }
}

fn take_timestamp(row: &mut Row, field: &str) -> DateTime<Utc> {
    row.remove(field)
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .unwrap_or_default()
}
