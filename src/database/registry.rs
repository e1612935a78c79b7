//! Process-wide connection registry
//!
//! Connections register themselves under their id on creation and are
//! removed when closed. An id can only be held by one open connection.

use crate::database::connection::Connection;
use crate::error::{DbxError, Result};
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

static REGISTRY: OnceLock<RwLock<HashMap<String, Connection>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<String, Connection>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

// Every write is a single map operation, so poisoning is ignored.
fn read() -> RwLockReadGuard<'static, HashMap<String, Connection>> {
    registry().read().unwrap_or_else(|e| e.into_inner())
}

fn write() -> RwLockWriteGuard<'static, HashMap<String, Connection>> {
    registry().write().unwrap_or_else(|e| e.into_inner())
}

/// Register a connection under its id
pub fn register(connection: &Connection) -> Result<()> {
    let mut connections = write();
    if connections.contains_key(connection.id()) {
        return Err(DbxError::DuplicateConnection(connection.id().to_string()));
    }
    connections.insert(connection.id().to_string(), connection.clone());
    tracing::debug!(connection = %connection.id(), "Connection registered");
    Ok(())
}

/// Find a registered connection
pub fn lookup(id: &str) -> Result<Connection> {
    read()
        .get(id)
        .cloned()
        .ok_or_else(|| DbxError::ConnectionNotFound(id.to_string()))
}

/// Remove a connection, returning it if it was registered
pub fn unregister(id: &str) -> Option<Connection> {
    let removed = write().remove(id);
    if removed.is_some() {
        tracing::debug!(connection = %id, "Connection unregistered");
    }
    removed
}

/// Whether an id is taken
pub fn contains(id: &str) -> bool {
    read().contains_key(id)
}

/// All registered ids, sorted
pub fn ids() -> Vec<String> {
    let mut ids: Vec<String> = read().keys().cloned().collect();
    ids.sort();
    ids
}
