//! Ephemeral TTL cache used for deduplication, alert suppression and
//! idempotent replays.
//!
//! The cache is best-effort and never a source of truth. Backends implement
//! [`EphemeralCache`]; callers never talk to a backend directly but go through
//! [`CacheGuard`], which bounds every call with a timeout and turns any error
//! or timeout into the documented fallback for that call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

// ---

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache call timed out after {0:?}")]
    Timeout(Duration),
}

/// Minimal key-value capability with per-key expiry.
#[async_trait]
pub trait EphemeralCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Atomic check-and-set. Returns `true` if the key was absent and is now set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;
}

// ---

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache.
///
/// Expiry uses tokio's clock so paused-time tests can step across windows.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        // ---
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map only ever holds whole entries.
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl EphemeralCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        // ---
        let now = Instant::now();
        let entries = self.lock();
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        // ---
        let entry = Entry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        self.lock().insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        // ---
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.get(key).is_some_and(|e| e.expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

// ---

/// Fail-open front for an [`EphemeralCache`].
///
/// Each method names its fallback: a miss for lookups, "allowed" for claims
/// and a no-op for writes.
#[derive(Clone)]
pub struct CacheGuard {
    inner: Arc<dyn EphemeralCache>,
    timeout: Duration,
}

impl CacheGuard {
    pub fn new(inner: Arc<dyn EphemeralCache>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }

    /// Fetch a key. Errors and timeouts read as a miss.
    pub async fn lookup(&self, key: &str) -> Option<String> {
        // ---
        match self.bounded(self.inner.get(key)).await {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(key, error = %err, "cache lookup failed; treating as miss");
                None
            }
        }
    }

    /// Store a key. Failures are logged and otherwise ignored.
    pub async fn remember(&self, key: &str, value: &str, ttl: Duration) {
        // ---
        if let Err(err) = self.bounded(self.inner.set_with_ttl(key, value, ttl)).await {
            tracing::debug!(key, error = %err, "cache write failed; continuing");
        }
    }

    /// Claim a marker key for `ttl`. Returns `false` only when the marker is
    /// already held; an unavailable cache lets the caller through.
    pub async fn claim(&self, key: &str, ttl: Duration) -> bool {
        // ---
        let marker = chrono::Utc::now().to_rfc3339();
        match self.bounded(self.inner.set_if_absent(key, &marker, ttl)).await {
            Ok(claimed) => claimed,
            Err(err) => {
                tracing::warn!(key, error = %err, "cache claim failed; allowing");
                true
            }
        }
    }
}
