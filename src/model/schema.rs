//! Model schema data structures
//!
//! This module defines field types, their default attributes, single
//! field definitions and the complete schema of a model.

use crate::error::{DbxError, Result};
use crate::model::Row;
use comfy_table::{presets::UTF8_FULL, Table};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Name of the built-in primary key field
pub const FIELD_ID: &str = "id";
/// Name of the built-in creation timestamp field
pub const FIELD_DATE_CREATED: &str = "dateCreated";
/// Name of the built-in modification timestamp field
pub const FIELD_DATE_UPDATED: &str = "dateUpdated";

/// Fields every model carries
pub const BUILTIN_FIELDS: [&str; 3] = [FIELD_ID, FIELD_DATE_CREATED, FIELD_DATE_UPDATED];

/// Returns true if `name` is one of the built-in fields
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_FIELDS.contains(&name)
}

/// The type tag of a model field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// Auto-assigned primary key
    Id,
    /// Foreign key to another model
    Fk,
    /// Signed integer
    Int,
    /// Unsigned integer
    Uint,
    /// Small enumerated integer
    Flag,
    /// Unix timestamp in seconds
    Timestamp,
    /// Variable-length string
    String,
    /// Fixed-length string
    Char,
    /// Long text
    Text,
    /// Arbitrary JSON document
    Json,
}

/// Role a field plays in the table's keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyRole {
    #[default]
    None,
    Primary,
    Index,
    Foreign,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyRole::None => "",
            KeyRole::Primary => "primary",
            KeyRole::Index => "index",
            KeyRole::Foreign => "foreign",
        };
        write!(f, "{}", name)
    }
}

/// Default attributes for a field type
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefaults {
    pub size: u32,
    pub default: Value,
    pub not_null: bool,
    pub key: KeyRole,
}

impl FieldType {
    /// All field types, in declaration order
    pub const ALL: [FieldType; 10] = [
        FieldType::Id,
        FieldType::Fk,
        FieldType::Int,
        FieldType::Uint,
        FieldType::Flag,
        FieldType::Timestamp,
        FieldType::String,
        FieldType::Char,
        FieldType::Text,
        FieldType::Json,
    ];

    /// Get the canonical name of this type
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Id => "id",
            FieldType::Fk => "fk",
            FieldType::Int => "int",
            FieldType::Uint => "uint",
            FieldType::Flag => "flag",
            FieldType::Timestamp => "timestamp",
            FieldType::String => "string",
            FieldType::Char => "char",
            FieldType::Text => "text",
            FieldType::Json => "json",
        }
    }

    /// Default attributes for this type
    pub fn defaults(&self) -> FieldDefaults {
        let (size, default, key) = match self {
            FieldType::Id => (10, Value::Null, KeyRole::Primary),
            FieldType::Fk => (10, Value::Null, KeyRole::Foreign),
            FieldType::Int => (10, Value::from(0), KeyRole::None),
            FieldType::Uint => (10, Value::from(0), KeyRole::None),
            FieldType::Flag => (3, Value::from(0), KeyRole::Index),
            FieldType::Timestamp => (10, Value::from(0), KeyRole::None),
            FieldType::String => (255, Value::from(""), KeyRole::None),
            FieldType::Char => (1, Value::from(" "), KeyRole::None),
            FieldType::Text => (65535, Value::from(""), KeyRole::None),
            FieldType::Json => (65535, Value::from("[]"), KeyRole::None),
        };

        FieldDefaults {
            size,
            default,
            not_null: true,
            key,
        }
    }

    /// Whether values of this type are integers
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Id
                | FieldType::Fk
                | FieldType::Int
                | FieldType::Uint
                | FieldType::Flag
                | FieldType::Timestamp
        )
    }

    /// Whether values of this type must be non-negative
    pub fn is_unsigned(&self) -> bool {
        matches!(
            self,
            FieldType::Id | FieldType::Fk | FieldType::Uint | FieldType::Flag | FieldType::Timestamp
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FieldType {
    type Err = DbxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" | "autoint" => Ok(FieldType::Id),
            "fk" => Ok(FieldType::Fk),
            "int" => Ok(FieldType::Int),
            "uint" => Ok(FieldType::Uint),
            "flag" => Ok(FieldType::Flag),
            "timestamp" | "date" => Ok(FieldType::Timestamp),
            "string" => Ok(FieldType::String),
            "char" => Ok(FieldType::Char),
            "text" => Ok(FieldType::Text),
            "json" => Ok(FieldType::Json),
            _ => Err(DbxError::UnknownFieldType(s.to_string())),
        }
    }
}

/// Target of a foreign key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldReference {
    /// Referenced model name
    pub model: String,
    /// Referenced field name
    pub field: String,
}

/// A single column of a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelField {
    pub name: String,
    pub field_type: FieldType,
    pub size: u32,
    pub default: Value,
    pub not_null: bool,
    pub key: KeyRole,
    /// Foreign key target (fk only)
    pub references: Option<FieldReference>,
    /// Allowed values with labels (flag only); empty allows any value
    pub values: BTreeMap<i64, String>,
}

impl ModelField {
    /// Create a field with the defaults of its type
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let defaults = field_type.defaults();
        Self {
            name: name.into(),
            field_type,
            size: defaults.size,
            default: defaults.default,
            not_null: defaults.not_null,
            key: defaults.key,
            references: None,
            values: BTreeMap::new(),
        }
    }

    /// Create a field from a type name such as "string" or "uint"
    pub fn parse(name: impl Into<String>, type_name: &str) -> Result<Self> {
        Ok(Self::new(name, type_name.parse()?))
    }

    /// Create a foreign key field referencing `model.field`
    pub fn foreign_key(
        name: impl Into<String>,
        model: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::new(name, FieldType::Fk).references(model, field)
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn nullable(mut self) -> Self {
        self.not_null = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn key(mut self, key: KeyRole) -> Self {
        self.key = key;
        self
    }

    pub fn references(mut self, model: impl Into<String>, field: impl Into<String>) -> Self {
        self.references = Some(FieldReference {
            model: model.into(),
            field: field.into(),
        });
        self
    }

    /// Add an allowed flag value
    pub fn flag_value(mut self, value: i64, label: impl Into<String>) -> Self {
        self.values.insert(value, label.into());
        self
    }

    /// Check a value against this field's definition
    pub fn validate(&self, model: &str, value: &Value) -> Result<()> {
        let fail = |reason: String| Err(DbxError::validation(model, &self.name, reason));

        if value.is_null() {
            if self.not_null {
                return fail("value is required".to_string());
            }
            return Ok(());
        }

        match self.field_type {
            t if t.is_integer() => {
                let Some(number) = value.as_i64().map(i128::from).or_else(|| value.as_u64().map(i128::from))
                else {
                    return fail(format!("expected an integer, got {}", value));
                };
                if t.is_unsigned() && number < 0 {
                    return fail(format!("expected a non-negative integer, got {}", number));
                }
                let digits = number.unsigned_abs().to_string().len();
                if digits > self.size as usize {
                    return fail(format!("{} exceeds {} digits", number, self.size));
                }
                if t == FieldType::Flag && !self.values.is_empty() {
                    let allowed = i64::try_from(number)
                        .map(|n| self.values.contains_key(&n))
                        .unwrap_or(false);
                    if !allowed {
                        return fail(format!("{} is not an allowed flag value", number));
                    }
                }
                Ok(())
            }
            FieldType::String | FieldType::Char | FieldType::Text => {
                let Some(text) = value.as_str() else {
                    return fail(format!("expected a string, got {}", value));
                };
                let length = text.chars().count();
                if length > self.size as usize {
                    return fail(format!("length {} exceeds {}", length, self.size));
                }
                Ok(())
            }
            FieldType::Json => {
                let length = serde_json::to_string(value)?.len();
                if length > self.size as usize {
                    return fail(format!("serialized length {} exceeds {}", length, self.size));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for ModelField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}({})", self.name, self.field_type, self.size)?;
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if self.key != KeyRole::None {
            write!(f, " {}", self.key.to_string().to_uppercase())?;
        }
        if let Some(ref target) = self.references {
            write!(f, " -> {}.{}", target.model, target.field)?;
        }
        Ok(())
    }
}

/// Complete schema of a model: its name and ordered fields
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    name: String,
    fields: Vec<ModelField>,
}

impl ModelSchema {
    /// Build a schema from user fields
    ///
    /// The built-in `id`, `dateCreated` and `dateUpdated` fields are
    /// prepended; user fields may not reuse their names or each other's.
    pub fn new(name: impl Into<String>, user_fields: Vec<ModelField>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DbxError::Config("Model name must not be empty".to_string()));
        }

        let mut fields = vec![
            ModelField::new(FIELD_ID, FieldType::Id),
            ModelField::new(FIELD_DATE_CREATED, FieldType::Timestamp),
            ModelField::new(FIELD_DATE_UPDATED, FieldType::Timestamp),
        ];

        for field in user_fields {
            if is_builtin(&field.name) {
                return Err(DbxError::ReservedField(field.name));
            }
            if field.name.trim().is_empty() {
                return Err(DbxError::validation(&name, "", "field name must not be empty"));
            }
            if fields.iter().any(|f| f.name == field.name) {
                return Err(DbxError::validation(&name, &field.name, "field is defined twice"));
            }
            fields.push(field);
        }

        Ok(Self { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All fields, built-ins first
    pub fn fields(&self) -> &[ModelField] {
        &self.fields
    }

    /// Fields other than the built-ins
    pub fn user_fields(&self) -> impl Iterator<Item = &ModelField> {
        self.fields.iter().filter(|f| !is_builtin(&f.name))
    }

    pub fn field(&self, name: &str) -> Option<&ModelField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Foreign key fields with their targets
    pub fn references(&self) -> impl Iterator<Item = (&ModelField, &FieldReference)> {
        self.fields
            .iter()
            .filter_map(|f| f.references.as_ref().map(|target| (f, target)))
    }

    /// Turn caller-supplied values into a complete row for insertion
    ///
    /// Unknown fields and built-in fields are rejected, missing fields get
    /// their defaults, and every user field is validated.
    pub fn prepare_values(&self, mut values: Row) -> Result<Row> {
        for key in values.keys() {
            if is_builtin(key) {
                return Err(DbxError::ReservedField(key.clone()));
            }
            if !self.has_field(key) {
                return Err(DbxError::unknown_field(&self.name, key));
            }
        }

        for field in self.user_fields() {
            values
                .entry(field.name.clone())
                .or_insert_with(|| field.default.clone());
        }

        self.validate_values(&values)?;
        Ok(values)
    }

    /// Validate the user fields of a row
    pub fn validate_values(&self, values: &Row) -> Result<()> {
        for field in self.user_fields() {
            let value = values.get(&field.name).unwrap_or(&Value::Null);
            field.validate(&self.name, value)?;
        }
        Ok(())
    }

    /// Render the schema as a table
    pub fn describe(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["Field", "Type", "Size", "Not Null", "Key", "Default", "References"]);

        for field in &self.fields {
            let references = field
                .references
                .as_ref()
                .map(|r| format!("{}.{}", r.model, r.field))
                .unwrap_or_default();
            table.add_row(vec![
                field.name.clone(),
                field.field_type.to_string(),
                field.size.to_string(),
                if field.not_null { "yes" } else { "no" }.to_string(),
                field.key.to_string(),
                field.default.to_string(),
                references,
            ]);
        }

        format!("Model: {}\n{}", self.name, table)
    }
}

impl fmt::Display for ModelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model: {}", self.name)?;
        for field in &self.fields {
            writeln!(f, "  {}", field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> ModelSchema {
        ModelSchema::new(
            "user",
            vec![
                ModelField::new("name", FieldType::String).size(8),
                ModelField::new("age", FieldType::Uint).size(3),
                ModelField::new("bio", FieldType::Text).nullable(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_type_defaults_table() {
        let string = FieldType::String.defaults();
        assert_eq!(string.size, 255);
        assert_eq!(string.default, json!(""));
        assert!(string.not_null);
        assert_eq!(string.key, KeyRole::None);

        assert_eq!(FieldType::Id.defaults().key, KeyRole::Primary);
        assert_eq!(FieldType::Id.defaults().default, Value::Null);
        assert_eq!(FieldType::Fk.defaults().key, KeyRole::Foreign);
        assert_eq!(FieldType::Flag.defaults().size, 3);
        assert_eq!(FieldType::Flag.defaults().key, KeyRole::Index);
        assert_eq!(FieldType::Char.defaults().default, json!(" "));
        assert_eq!(FieldType::Text.defaults().size, 65535);
        assert_eq!(FieldType::Json.defaults().default, json!("[]"));
        assert!(FieldType::ALL.iter().all(|t| t.defaults().not_null));
    }

    #[test]
    fn test_type_names() {
        for t in FieldType::ALL {
            assert_eq!(t.name().parse::<FieldType>().unwrap(), t);
        }
        assert_eq!("autoint".parse::<FieldType>().unwrap(), FieldType::Id);
        assert_eq!("Date".parse::<FieldType>().unwrap(), FieldType::Timestamp);
        assert!(matches!(
            "decimal".parse::<FieldType>(),
            Err(DbxError::UnknownFieldType(_))
        ));
    }

    #[test]
    fn test_builtin_fields_present() {
        let schema = ModelSchema::new("empty", vec![]).unwrap();
        assert_eq!(schema.field_names(), vec!["id", "dateCreated", "dateUpdated"]);
        assert_eq!(schema.field("id").unwrap().key, KeyRole::Primary);
        assert_eq!(schema.user_fields().count(), 0);
    }

    #[test]
    fn test_reserved_and_duplicate_fields() {
        let reserved = ModelSchema::new("m", vec![ModelField::new("dateCreated", FieldType::Int)]);
        assert!(matches!(reserved, Err(DbxError::ReservedField(_))));

        let duplicate = ModelSchema::new(
            "m",
            vec![
                ModelField::new("a", FieldType::Int),
                ModelField::new("a", FieldType::String),
            ],
        );
        assert!(matches!(duplicate, Err(DbxError::Validation { .. })));
    }

    #[test]
    fn test_validate_integers() {
        let age = ModelField::new("age", FieldType::Uint).size(3);
        assert!(age.validate("user", &json!(42)).is_ok());
        assert!(age.validate("user", &json!(-1)).is_err());
        assert!(age.validate("user", &json!(1000)).is_err());
        assert!(age.validate("user", &json!("42")).is_err());
        assert!(age.validate("user", &json!(4.2)).is_err());

        let delta = ModelField::new("delta", FieldType::Int);
        assert!(delta.validate("m", &json!(-50)).is_ok());
    }

    #[test]
    fn test_validate_flag_values() {
        let status = ModelField::new("status", FieldType::Flag)
            .flag_value(0, "draft")
            .flag_value(1, "published");
        assert!(status.validate("post", &json!(1)).is_ok());
        assert!(status.validate("post", &json!(2)).is_err());

        let open = ModelField::new("open", FieldType::Flag);
        assert!(open.validate("post", &json!(7)).is_ok());
    }

    #[test]
    fn test_validate_strings_and_null() {
        let code = ModelField::new("code", FieldType::Char).size(2);
        assert!(code.validate("m", &json!("ab")).is_ok());
        assert!(code.validate("m", &json!("abc")).is_err());
        assert!(code.validate("m", &Value::Null).is_err());

        let note = ModelField::new("note", FieldType::String).nullable();
        assert!(note.validate("m", &Value::Null).is_ok());

        let payload = ModelField::new("payload", FieldType::Json).size(10);
        assert!(payload.validate("m", &json!([1, 2])).is_ok());
        assert!(payload.validate("m", &json!({"key": "long value"})).is_err());
    }

    #[test]
    fn test_prepare_values() {
        let schema = user_schema();

        let mut values = Row::new();
        values.insert("name".to_string(), json!("ann"));
        let row = schema.prepare_values(values).unwrap();
        assert_eq!(row["name"], json!("ann"));
        assert_eq!(row["age"], json!(0));
        assert_eq!(row["bio"], json!(""));

        let mut unknown = Row::new();
        unknown.insert("email".to_string(), json!("a@b.c"));
        assert!(matches!(
            schema.prepare_values(unknown),
            Err(DbxError::UnknownField { .. })
        ));

        let mut builtin = Row::new();
        builtin.insert("id".to_string(), json!(9));
        assert!(matches!(
            schema.prepare_values(builtin),
            Err(DbxError::ReservedField(_))
        ));
    }

    #[test]
    fn test_required_foreign_key() {
        let schema = ModelSchema::new("post", vec![ModelField::foreign_key("author", "user", "id")]).unwrap();
        assert!(schema.prepare_values(Row::new()).is_err());
        assert_eq!(schema.references().count(), 1);
    }

    #[test]
    fn test_describe() {
        let schema = user_schema();
        let described = schema.describe();
        assert!(described.contains("Model: user"));
        assert!(described.contains("dateUpdated"));
        assert!(described.contains("primary"));

        let plain = schema.to_string();
        assert!(plain.contains("name: string(8) NOT NULL"));
        assert!(plain.contains("id: id(10) NOT NULL PRIMARY"));
    }
}
