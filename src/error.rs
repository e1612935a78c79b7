//! Error types for dbx
//!
//! This module defines the error types used throughout the library.

use thiserror::Error;

/// Result type alias for dbx
pub type Result<T> = std::result::Result<T, DbxError>;

/// Main error type for dbx
#[derive(Error, Debug)]
pub enum DbxError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("Config file parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A connection with this id is already registered
    #[error("Connection '{0}' is already registered")]
    DuplicateConnection(String),

    /// No connection registered under this id
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// The connection has not been opened yet
    #[error("Connection '{0}' is not connected")]
    NotConnected(String),

    /// A model with this name is already defined
    #[error("Model '{0}' is already defined")]
    DuplicateModel(String),

    /// No model defined under this name
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// A user field tried to shadow a built-in field
    #[error("Field '{0}' is reserved")]
    ReservedField(String),

    /// A field name the model does not have
    #[error("Model '{model}' has no field '{field}'")]
    UnknownField { model: String, field: String },

    /// A field type name that cannot be parsed
    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    /// A foreign key pointing at a model or field that does not exist
    #[error("Field '{model}.{field}' references unknown '{target}'")]
    UnknownReference {
        model: String,
        field: String,
        target: String,
    },

    /// A value rejected by its field definition
    #[error("Invalid value for '{model}.{field}': {reason}")]
    Validation {
        model: String,
        field: String,
        reason: String,
    },

    /// A record passed to a model it does not belong to
    #[error("Record belongs to model '{found}', not '{expected}'")]
    ModelMismatch { expected: String, found: String },

    /// A record that is not (or no longer) stored
    #[error("Record {id} not found in model '{model}'")]
    RecordNotFound { model: String, id: u64 },

    /// A driver name with no implementation
    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// An operation the driver does not implement
    #[error("Driver '{driver}' does not support {operation}")]
    Unsupported { driver: String, operation: String },

    /// Driver-level failures
    #[error("Driver error: {0}")]
    Driver(String),

    /// Cache engine failures
    ///
    /// Reserved for custom `CacheEngine` implementations; the in-memory
    /// cache never fails.
    #[error("Cache error: {0}")]
    Cache(String),
}

impl DbxError {
    /// Create a validation error for a model field
    pub fn validation(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        DbxError::Validation {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an unknown-field error
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        DbxError::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    /// Create an unsupported-operation error for a driver
    pub fn unsupported(driver: impl Into<String>, operation: impl Into<String>) -> Self {
        DbxError::Unsupported {
            driver: driver.into(),
            operation: operation.into(),
        }
    }
}
