//! Database connection
//!
//! A `Connection` is a named database endpoint. It owns the driver, the
//! optional cache engine, the models defined on it and an event bus, and
//! is registered process-wide under its id.

use crate::config::storage::ConfigFile;
use crate::config::ConnectionConfig;
use crate::database::cache::{CacheEngine, CacheOptions, CacheStats, MemoryCache};
use crate::database::driver::{self, Driver};
use crate::database::events::{ConnectionEvent, EventBus, QueryEvent};
use crate::database::registry;
use crate::error::{DbxError, Result};
use crate::model::schema::{ModelField, ModelSchema};
use crate::model::{Model, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, RwLock, RwLockReadGuard};

/// Cache key prefix for raw statements run on the connection
pub(crate) const SQL_CACHE_PREFIX: &str = "sql:";

/// Connected/error flags of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub error: bool,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct Engines {
    cache: Option<Arc<dyn CacheEngine>>,
}

/// Number of rows a read produced, reported in query events
pub(crate) trait RowCount {
    fn row_count(&self) -> u64;
}

impl RowCount for u64 {
    fn row_count(&self) -> u64 {
        *self
    }
}

impl RowCount for Vec<Row> {
    fn row_count(&self) -> u64 {
        self.len() as u64
    }
}

impl RowCount for Option<Row> {
    fn row_count(&self) -> u64 {
        u64::from(self.is_some())
    }
}

struct ConnectionInner {
    id: String,
    config: ConnectionConfig,
    driver: Arc<dyn Driver>,
    state: RwLock<ConnectionState>,
    models: RwLock<BTreeMap<String, Arc<ModelSchema>>>,
    engines: RwLock<Engines>,
    // Cached reads hold it shared from load to store, writes hold it
    // exclusively until invalidation is done.
    cache_gate: RwLock<()>,
    events: EventBus,
}

/// Handle to a named database endpoint
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("endpoint", &self.inner.config.endpoint())
            .field("driver", &self.inner.driver.name())
            .finish()
    }
}

impl Connection {
    /// Creates and registers a connection using the driver named in `config`
    ///
    /// # Example
    /// ```
    /// use dbx::{Connection, ConnectionConfig};
    ///
    /// let conn = Connection::new("docs-example", ConnectionConfig::default()).unwrap();
    /// assert_eq!(conn.id(), "docs-example");
    /// ```
    pub fn new(id: impl Into<String>, config: ConnectionConfig) -> Result<Self> {
        let driver = driver::from_config(&config)?;
        Self::with_driver(id, config, driver)
    }

    /// Creates and registers a connection with a custom driver
    pub fn with_driver(
        id: impl Into<String>,
        config: ConnectionConfig,
        driver: Arc<dyn Driver>,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(DbxError::Config("Connection id must not be empty".to_string()));
        }

        let engines = Engines {
            cache: config
                .cache
                .as_ref()
                .map(|options| Arc::new(MemoryCache::new(options)) as Arc<dyn CacheEngine>),
        };

        let connection = Self {
            inner: Arc::new(ConnectionInner {
                id,
                config,
                driver,
                state: RwLock::new(ConnectionState::default()),
                models: RwLock::new(BTreeMap::new()),
                engines: RwLock::new(engines),
                cache_gate: RwLock::new(()),
                events: EventBus::default(),
            }),
        };

        registry::register(&connection)?;
        tracing::info!(
            connection = %connection.id(),
            endpoint = %connection.inner.config.endpoint(),
            driver = %connection.inner.driver.name(),
            "Connection created"
        );

        Ok(connection)
    }

    /// Creates a connection from an entry of a connections file
    pub fn from_file(id: &str, path: &Path) -> Result<Self> {
        let file = ConfigFile::load_from(path)?;
        let config = file
            .connection(id)
            .cloned()
            .ok_or_else(|| DbxError::Config(format!("No connection '{}' in {}", id, path.display())))?;
        Self::new(id, config)
    }

    /// Find a registered connection by id
    pub fn lookup(id: &str) -> Result<Self> {
        registry::lookup(id)
    }

    /// Ids of all registered connections
    pub fn registered_ids() -> Vec<String> {
        registry::ids()
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    pub fn driver_name(&self) -> &str {
        self.inner.driver.name()
    }

    /// Subscribe to this connection's events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Snapshot of the connected/error flags
    pub async fn state(&self) -> ConnectionState {
        self.inner.state.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.read().await.connected
    }

    pub async fn has_error(&self) -> bool {
        self.inner.state.read().await.error
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.read().await.last_error.clone()
    }

    /// Open the driver
    ///
    /// Connecting an open connection does nothing. A failure is recorded
    /// in the connection state and emitted as an `error` event.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.connected {
            return Ok(());
        }

        match self.inner.driver.connect(&self.inner.config).await {
            Ok(()) => {
                state.connected = true;
                state.error = false;
                state.last_error = None;
                drop(state);
                self.inner.events.emit(ConnectionEvent::Connected {
                    connection: self.inner.id.clone(),
                });
                Ok(())
            }
            Err(e) => {
                state.error = true;
                state.last_error = Some(e.to_string());
                drop(state);
                self.emit_error(&e);
                Err(e)
            }
        }
    }

    /// Disconnect and remove the connection from the registry
    pub async fn close(&self) -> Result<()> {
        let was_connected = {
            let mut state = self.inner.state.write().await;
            std::mem::replace(&mut state.connected, false)
        };

        registry::unregister(&self.inner.id);

        if was_connected {
            self.inner.driver.disconnect().await?;
            self.inner.events.emit(ConnectionEvent::Disconnected {
                connection: self.inner.id.clone(),
            });
        }
        Ok(())
    }

    /// Install the in-memory cache engine, replacing any existing one
    pub async fn cache(&self, options: CacheOptions) {
        self.set_cache_engine(Arc::new(MemoryCache::new(&options))).await;
    }

    /// Install a cache engine, replacing any existing one
    pub async fn set_cache_engine(&self, engine: Arc<dyn CacheEngine>) {
        tracing::debug!(connection = %self.inner.id, engine = %engine.name(), "Cache engine installed");
        self.inner.engines.write().await.cache = Some(engine);
    }

    /// Remove the cache engine
    pub async fn disable_cache(&self) {
        self.inner.engines.write().await.cache = None;
    }

    pub async fn has_cache(&self) -> bool {
        self.inner.engines.read().await.cache.is_some()
    }

    /// Drop every cached entry
    pub async fn clear_cache(&self) -> Result<()> {
        match self.cache_engine().await {
            Some(cache) => cache.clear().await,
            None => Ok(()),
        }
    }

    /// Statistics of the cache engine, if one is installed
    pub async fn cache_stats(&self) -> Result<Option<CacheStats>> {
        match self.cache_engine().await {
            Some(cache) => Ok(Some(cache.stats().await?)),
            None => Ok(None),
        }
    }

    /// Define a model from field definitions
    ///
    /// The built-in `id`, `dateCreated` and `dateUpdated` fields are
    /// always added.
    pub async fn define(&self, name: &str, fields: Vec<ModelField>) -> Result<Model> {
        let schema = Arc::new(ModelSchema::new(name, fields)?);

        let mut models = self.inner.models.write().await;
        if models.contains_key(name) {
            return Err(DbxError::DuplicateModel(name.to_string()));
        }
        models.insert(name.to_string(), schema.clone());
        drop(models);

        tracing::debug!(
            connection = %self.inner.id,
            model = %name,
            fields = schema.fields().len(),
            "Model defined"
        );
        Ok(Model::new(self.clone(), schema))
    }

    /// Define a model from `(field name, type name)` pairs
    pub async fn define_types(&self, name: &str, fields: &[(&str, &str)]) -> Result<Model> {
        let fields = fields
            .iter()
            .map(|(field, type_name)| ModelField::parse(*field, type_name))
            .collect::<Result<Vec<_>>>()?;
        self.define(name, fields).await
    }

    /// Get a defined model
    pub async fn model(&self, name: &str) -> Result<Model> {
        let schema = self
            .inner
            .models
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbxError::ModelNotFound(name.to_string()))?;
        Ok(Model::new(self.clone(), schema))
    }

    /// Names of all defined models
    pub async fn model_names(&self) -> Vec<String> {
        self.inner.models.read().await.keys().cloned().collect()
    }

    /// Create driver storage for every defined model
    ///
    /// Foreign keys must point at a defined model and one of its fields.
    pub async fn sync_models(&self) -> Result<()> {
        self.ensure_connected().await?;
        let started = Instant::now();

        let models: Vec<Arc<ModelSchema>> = self.inner.models.read().await.values().cloned().collect();

        for schema in &models {
            for (field, target) in schema.references() {
                let known = models
                    .iter()
                    .find(|m| m.name() == target.model)
                    .map(|m| m.has_field(&target.field))
                    .unwrap_or(false);
                if !known {
                    let err = DbxError::UnknownReference {
                        model: schema.name().to_string(),
                        field: field.name.clone(),
                        target: format!("{}.{}", target.model, target.field),
                    };
                    self.emit_error(&err);
                    return Err(err);
                }
            }
        }

        for schema in &models {
            if let Err(e) = self.inner.driver.ensure_collection(schema).await {
                self.emit_error(&e);
                return Err(e);
            }
        }

        self.emit_query(None, "sync", false, 0, started);
        tracing::info!(connection = %self.inner.id, models = models.len(), "Models synced");
        Ok(())
    }

    /// Run a raw statement through the driver
    ///
    /// With `from_cache`, results are served from and stored in the cache
    /// engine under the statement text.
    pub async fn query(&self, sql: &str, from_cache: bool) -> Result<Vec<Row>> {
        let key = format!("{}{}", SQL_CACHE_PREFIX, sql);
        let driver = self.inner.driver.clone();
        let (rows, _) = self
            .read_through(None, "sql", key, from_cache, || async move {
                driver.execute(sql).await
            })
            .await?;
        Ok(rows)
    }

    pub(crate) fn driver(&self) -> Arc<dyn Driver> {
        self.inner.driver.clone()
    }

    pub(crate) async fn cache_engine(&self) -> Option<Arc<dyn CacheEngine>> {
        self.inner.engines.read().await.cache.clone()
    }

    pub(crate) async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            let err = DbxError::NotConnected(self.inner.id.clone());
            self.emit_error(&err);
            Err(err)
        }
    }

    pub(crate) fn emit_error(&self, err: &DbxError) {
        self.inner.events.emit(ConnectionEvent::Error {
            connection: self.inner.id.clone(),
            message: err.to_string(),
        });
    }

    pub(crate) fn emit_query(
        &self,
        model: Option<&str>,
        operation: &str,
        from_cache: bool,
        rows: u64,
        started: Instant,
    ) {
        self.inner.events.emit(ConnectionEvent::Query(QueryEvent {
            connection: self.inner.id.clone(),
            model: model.map(str::to_string),
            operation: operation.to_string(),
            from_cache,
            rows,
            elapsed: started.elapsed(),
        }));
    }

    /// Shared guard for a read that will store its result in the cache
    pub(crate) async fn cache_read_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.cache_gate.read().await
    }

    /// Look a value up in the cache, ignoring cache failures
    pub(crate) async fn cache_get<T: DeserializeOwned>(
        &self,
        cache: &dyn CacheEngine,
        key: &str,
    ) -> Option<T> {
        match cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    let _ = cache.remove(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    /// Store a value in the cache, ignoring cache failures
    pub(crate) async fn cache_set<T: Serialize>(&self, cache: &dyn CacheEngine, key: &str, value: &T) {
        let stored = match serde_json::to_value(value) {
            Ok(value) => cache.set(key, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = stored {
            tracing::warn!(key = %key, error = %e, "Cache store failed");
        }
    }

    /// Run a read, consulting the cache first when asked to
    ///
    /// Returns the value and whether it came from the cache.
    pub(crate) async fn read_through<T, F, Fut>(
        &self,
        model: Option<&str>,
        operation: &str,
        key: String,
        from_cache: bool,
        load: F,
    ) -> Result<(T, bool)>
    where
        T: Serialize + DeserializeOwned + RowCount,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_connected().await?;
        let started = Instant::now();

        let cache = if from_cache { self.cache_engine().await } else { None };

        if let Some(ref cache) = cache {
            if let Some(value) = self.cache_get::<T>(cache.as_ref(), &key).await {
                self.emit_query(model, operation, true, value.row_count(), started);
                return Ok((value, true));
            }
        }

        // A write landing between load and store would leave a stale entry
        let _gate = if cache.is_some() {
            Some(self.cache_read_gate().await)
        } else {
            None
        };

        let value = match load().await {
            Ok(value) => value,
            Err(e) => {
                self.emit_error(&e);
                return Err(e);
            }
        };

        if let Some(ref cache) = cache {
            self.cache_set(cache.as_ref(), &key, &value).await;
        }

        self.emit_query(model, operation, false, value.row_count(), started);
        Ok((value, false))
    }

    /// Run a write and drop the cached reads it may have changed
    ///
    /// `affected` reports how many rows the write touched.
    pub(crate) async fn write_through<T, Fut>(
        &self,
        model: &str,
        operation: &str,
        write: Fut,
        affected: fn(&T) -> u64,
    ) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_connected().await?;
        let started = Instant::now();
        let _gate = self.inner.cache_gate.write().await;

        let value = match write.await {
            Ok(value) => value,
            Err(e) => {
                self.emit_error(&e);
                return Err(e);
            }
        };

        if let Some(cache) = self.cache_engine().await {
            for prefix in [format!("{}:", model), SQL_CACHE_PREFIX.to_string()] {
                match cache.invalidate_prefix(&prefix).await {
                    Ok(removed) if removed > 0 => {
                        tracing::trace!(prefix = %prefix, removed, "Cache entries invalidated");
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(prefix = %prefix, error = %e, "Cache invalidation failed"),
                }
            }
        }

        self.emit_query(Some(model), operation, false, affected(&value), started);
        Ok(value)
    }
}
