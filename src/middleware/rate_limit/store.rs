//! Shared counter backends.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::clock::{Clock, SystemClock};
use crate::error::BoxError;

/// Why a backend call did not produce an answer.
///
/// The rate limiter treats every variant the same way: it stops using the
/// backend for the current request and counts locally.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("backend error: {0}")]
    Backend(#[source] BoxError),
}

/// The narrow cache contract the rate limiter needs from a shared backend
/// (Redis, memcached, …). The limiter never assumes it owns the keys.
#[async_trait]
pub trait CounterStore: Send + Sync + 'static {
    /// Current value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Stores `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically adds one and returns the new value, creating the key at
    /// `1` if absent. `Ok(None)` means the backend has no atomic increment;
    /// the limiter then falls back to get-then-set, which can lose updates
    /// when several processes hit the same key at once.
    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let _ = key;
        Ok(None)
    }
}

#[derive(Debug)]
struct Entry {
    value: u64,
    expires_at: Option<u64>,
}

/// In-process [`CounterStore`] with TTLs and atomic increment.
///
/// Useful as the shared backend when every worker lives in one process,
/// and as a test double for a real distributed cache.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    atomic: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expires entries by `clock` rather than the system clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Mutex::new(HashMap::new()), clock, atomic: true }
    }

    /// Disables [`CounterStore::increment`], forcing the get-then-set path.
    pub fn without_increment(mut self) -> Self {
        self.atomic = false;
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_owned()))
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: u64) -> Option<&'a mut Entry> {
        let expired = entries.get(key)?.expires_at.is_some_and(|at| now >= at);
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).map(|e| e.value))
    }

    async fn set(&self, key: &str, value: u64, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Some(self.clock.now().saturating_add(ttl.as_secs().max(1)));
        self.lock()?.insert(key.to_owned(), Entry { value, expires_at });
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<Option<u64>, StoreError> {
        if !self.atomic {
            return Ok(None);
        }
        let now = self.clock.now();
        let mut entries = self.lock()?;
        let value = match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.value += 1;
                entry.value
            }
            None => {
                entries.insert(key.to_owned(), Entry { value: 1, expires_at: None });
                1
            }
        };
        Ok(Some(value))
    }
}
