//! Response cache (C2): fingerprint → response, with TTL and LRU eviction.
//!
//! `Cache` is the external contract; `InMemoryCache` is the only
//! implementation carried in this crate (an external KV would implement the
//! same trait). Grounded on the teacher's `Cache<K,V>` trait together with
//! the SHA-256 LRU+TTL response cache used elsewhere in the example pack —
//! the key derivation and eviction policy below follow that file directly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Cache statistics exposed for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub total_writes: u64,
}

/// External response-cache contract. On backend failure the pipeline treats
/// the call as a miss rather than a request failure — callers should surface
/// errors via logging, not propagate them.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
    async fn delete(&self, key: &str);
    async fn clear(&self);
    fn stats(&self) -> CacheStats;
}

/// Builds a deterministic cache key from the inputs that affect a response:
/// model, rendered message content, temperature, and system prompt. Same
/// inputs always produce the same key, across processes.
pub fn fingerprint(model: &str, message: &str, temperature: Option<f64>, system_prompt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"\x00");
    hasher.update(message.as_bytes());
    hasher.update(b"\x00");
    if let Some(t) = temperature {
        hasher.update(t.to_le_bytes());
    }
    hasher.update(b"\x00");
    if let Some(s) = system_prompt {
        hasher.update(s.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

struct Entry {
    value: String,
    expires_at: Instant,
    last_accessed: Instant,
}

/// In-memory LRU cache with a capacity bound and per-entry TTL.
pub struct InMemoryCache {
    capacity: usize,
    entries: Mutex<HashMap<String, Entry>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    total_writes: std::sync::atomic::AtomicU64,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            hits: Default::default(),
            misses: Default::default(),
            total_writes: Default::default(),
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        use std::sync::atomic::Ordering;
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("cache mutex poisoned");
        if let Some(entry) = guard.get_mut(key) {
            if entry.expires_at > now {
                entry.last_accessed = now;
                let value = entry.value.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            guard.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        use std::sync::atomic::Ordering;
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("cache mutex poisoned");

        guard.retain(|_, e| e.expires_at > now);
        while guard.len() >= self.capacity {
            let oldest = guard
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    guard.remove(&k);
                }
                None => break,
            }
        }

        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        self.total_writes.fetch_add(1, Ordering::Relaxed);
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().expect("cache mutex poisoned").remove(key);
    }

    async fn clear(&self) {
        self.entries.lock().expect("cache mutex poisoned").clear();
    }

    fn stats(&self) -> CacheStats {
        use std::sync::atomic::Ordering;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.entries.lock().expect("cache mutex poisoned").len(),
            total_writes: self.total_writes.load(Ordering::Relaxed),
        }
    }
}
