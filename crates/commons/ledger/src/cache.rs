//! Caller-owned lookup cache for catalog reads.
//!
//! The ledger itself keeps no state between calls. Callers that want to avoid
//! rescanning a room on every search hold a [`LookupCache`] and pass it in.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
}

/// Bounded map with a per-entry TTL. When full, the least recently inserted
/// entry is evicted.
pub struct LookupCache<V> {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> LookupCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.ttl_secs))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().ok()?;
        let fresh = inner
            .entries
            .get(key)
            .map(|entry| entry.inserted_at.elapsed() < self.ttl)?;
        if fresh {
            return inner.entries.get(key).map(|entry| entry.value.clone());
        }
        inner.entries.remove(key);
        inner.order.retain(|k| k != key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        while inner.entries.len() >= self.capacity && !inner.entries.contains_key(&key) {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.retain(|k, _| !k.starts_with(prefix));
            inner.order.retain(|k| !k.starts_with(prefix));
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.entries.clear();
            inner.order.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
