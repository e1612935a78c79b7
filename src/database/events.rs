//! Connection lifecycle events
//!
//! Every connection owns an `EventBus`. Events are broadcast to all
//! subscribers and mirrored to `tracing`.

use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of each connection's event channel
pub const EVENT_CAPACITY: usize = 64;

/// Details of a completed operation
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    /// Connection id
    pub connection: String,
    /// Model the operation ran against, if any
    pub model: Option<String>,
    /// Operation name (e.g. "get", "search", "sql")
    pub operation: String,
    /// Whether the result came from the cache engine
    pub from_cache: bool,
    /// Rows returned, counted or written
    pub rows: u64,
    /// Wall time of the operation
    pub elapsed: Duration,
}

/// Event emitted by a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The driver connected
    Connected { connection: String },
    /// The connection was closed
    Disconnected { connection: String },
    /// An operation completed
    Query(QueryEvent),
    /// An operation failed
    Error { connection: String, message: String },
}

impl ConnectionEvent {
    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connected { .. } => "connection",
            ConnectionEvent::Disconnected { .. } => "disconnect",
            ConnectionEvent::Query(_) => "query",
            ConnectionEvent::Error { .. } => "error",
        }
    }

    /// Id of the connection that emitted the event
    pub fn connection(&self) -> &str {
        match self {
            ConnectionEvent::Connected { connection }
            | ConnectionEvent::Disconnected { connection }
            | ConnectionEvent::Error { connection, .. } => connection,
            ConnectionEvent::Query(query) => &query.connection,
        }
    }
}

/// Broadcast sender for connection events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.tx.subscribe()
    }

    /// Log an event and send it to subscribers
    pub fn emit(&self, event: ConnectionEvent) {
        match &event {
            ConnectionEvent::Connected { connection } => {
                tracing::info!(connection = %connection, "Connected");
            }
            ConnectionEvent::Disconnected { connection } => {
                tracing::info!(connection = %connection, "Disconnected");
            }
            ConnectionEvent::Query(query) => {
                tracing::debug!(
                    connection = %query.connection,
                    model = query.model.as_deref().unwrap_or("-"),
                    operation = %query.operation,
                    from_cache = query.from_cache,
                    rows = query.rows,
                    elapsed_ms = query.elapsed.as_millis() as u64,
                    "Query completed"
                );
            }
            ConnectionEvent::Error { connection, message } => {
                tracing::warn!(connection = %connection, error = %message, "Operation failed");
            }
        }

        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}
