//! Query Cache
//!
//! This module provides the cache engine abstraction used to memoize
//! read results, and a bounded in-process implementation.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default maximum number of cached entries
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Cache engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Entry lifetime in seconds; entries never expire when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Maximum number of entries before the oldest is evicted
    pub max_entries: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl_secs: None,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl CacheOptions {
    pub fn ttl(mut self, secs: u64) -> Self {
        self.ttl_secs = Some(secs);
        self
    }

    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of live entries
    pub entries: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
}

/// A key-value store for memoized read results
#[async_trait]
pub trait CacheEngine: Send + Sync {
    /// Engine name for logs
    fn name(&self) -> &str;

    /// Look up a key
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a single key
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`, returning how many were removed
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize>;

    /// Remove all entries
    async fn clear(&self) -> Result<()>;

    /// Current statistics
    async fn stats(&self) -> Result<CacheStats>;
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// In-process cache with optional TTL and a size bound
pub struct MemoryCache {
    ttl: Option<Duration>,
    max_entries: usize,
    state: Mutex<CacheState>,
}

impl MemoryCache {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            ttl: options.ttl_secs.map(Duration::from_secs),
            max_entries: options.max_entries.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        self.ttl
            .map(|ttl| entry.stored_at.elapsed() >= ttl)
            .unwrap_or(false)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(&CacheOptions::default())
    }
}

#[async_trait]
impl CacheEngine for MemoryCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut state = self.state.lock().await;

        let expired = match state.entries.get(key) {
            Some(entry) if self.is_expired(entry) => true,
            Some(entry) => {
                let value = entry.value.clone();
                state.hits += 1;
                return Ok(Some(value));
            }
            None => false,
        };

        if expired {
            state.entries.remove(key);
        }
        state.misses += 1;
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut state = self.state.lock().await;

        if !state.entries.contains_key(key) && state.entries.len() >= self.max_entries {
            state.entries.retain(|_, entry| !self.is_expired(entry));

            if state.entries.len() >= self.max_entries {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.stored_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    tracing::trace!(key = %oldest, "Evicting cache entry");
                    state.entries.remove(&oldest);
                }
            }
        }

        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.state.lock().await.entries.remove(key);
        Ok(())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before - state.entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.state.lock().await.entries.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let state = self.state.lock().await;
        Ok(CacheStats {
            entries: state.entries.values().filter(|e| !self.is_expired(e)).count(),
            hits: state.hits,
            misses: state.misses,
        })
    }
}
