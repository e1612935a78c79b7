//! dbx Library
//!
//! A database access library: named connections, model definitions with
//! typed fields, record CRUD and read caching.
//!
//! ```
//! use dbx::{Connection, ConnectionConfig};
//!
//! # async fn run() -> dbx::Result<()> {
//! let conn = Connection::new("readme", ConnectionConfig::default())?;
//! conn.connect().await?;
//! let user = conn.define_types("user", &[("name", "string")]).await?;
//! conn.sync_models().await?;
//!
//! let ann = user.create_json(serde_json::json!({"name": "ann"})).await?;
//! assert_eq!(user.get(ann.id, false).await?.unwrap().get("name"), ann.get("name"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod model;

pub use config::storage::ConfigFile;
pub use config::ConnectionConfig;
pub use database::{
    CacheEngine, CacheOptions, CacheStats, Connection, ConnectionEvent, ConnectionState, Driver,
    MemoryCache, MemoryDriver, QueryEvent,
};
pub use error::{DbxError, Result};
pub use model::query::{Direction, Op, Query};
pub use model::record::Record;
pub use model::schema::{FieldType, KeyRole, ModelField, ModelSchema};
pub use model::{Model, Row};
