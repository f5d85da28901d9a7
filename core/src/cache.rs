//! Named, time-boxed memoization of call results.
//!
//! Entries are evicted lazily: an expired entry is removed by the lookup that
//! finds it. There is no background sweep. An entry is fresh while
//! `now < expires_at`, so at the expiry instant it already counts as expired.
//! A TTL too large for the clock never expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<T> {
    expires_at: Option<Instant>,
    value: Arc<T>,
}

/// Cache keyed by caller-chosen names. Values are shared, never copied.
pub struct ResponseCache<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T> Default for ResponseCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> ResponseCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored value if it has not expired. Expired entries are evicted.
    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(name) {
            Some(entry) if entry.expires_at.map_or(true, |at| now < at) => {
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(name);
                debug!(cache = name, "evicted expired entry");
                None
            }
            None => None,
        }
    }

    pub fn put(&self, name: impl Into<String>, value: Arc<T>, ttl: Duration) {
        let entry = CacheEntry {
            expires_at: Instant::now().checked_add(ttl),
            value,
        };
        self.entries.lock().insert(name.into(), entry);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.entries.lock().remove(name).map(|entry| entry.value)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
