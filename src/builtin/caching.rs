//! Response caching keyed on the request payload.
//!
//! `before-request` hashes the `request` field. A fresh hit merges
//! `cache_hit`, `cached_result` and `halt: true`, so later handlers are
//! skipped and the host can return the cached value. A miss stamps
//! `cache_key`; `after-response` then stores a successful `response` under it.

use super::succeeded;
use crate::plugins::{HookContext, HookHandler, HookPatch, HookResult, HookTable, HookType, Plugin};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachingConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 1000,
        }
    }
}

impl CachingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub ttl: Duration,
    pub max_entries: usize,
}

struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

struct CacheState {
    config: CachingConfig,
    entries: Mutex<LruCache<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheState {
    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fresh value for `key`. Expired entries are evicted on the way.
    fn lookup(&self, key: &str) -> Option<Value> {
        let mut cache = self.lock();
        let fresh = cache
            .get(key)
            .map(|e| e.stored_at.elapsed() < self.config.ttl)?;
        if fresh {
            cache.get(key).map(|e| e.value.clone())
        } else {
            cache.pop(key);
            None
        }
    }
}

/// SHA-256 hex digest of a request payload's JSON form.
pub(crate) fn cache_key(request: &Value) -> Result<String> {
    let canonical = serde_json::to_vec(request)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

pub struct CachingPlugin {
    state: Arc<CacheState>,
}

impl CachingPlugin {
    pub fn new() -> Self {
        Self::with_config(CachingConfig::default())
    }

    /// A `max_entries` of zero is treated as one.
    pub fn with_config(config: CachingConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Arc::new(CacheState {
                entries: Mutex::new(LruCache::new(capacity)),
                config,
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        }
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.state.hits.load(Ordering::Relaxed);
        let misses = self.state.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.state.lock().len(),
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            ttl: self.state.config.ttl,
            max_entries: self.state.config.max_entries,
        }
    }

    /// Drop every entry and zero the hit/miss counters.
    pub fn clear(&self) {
        self.state.lock().clear();
        self.state.hits.store(0, Ordering::Relaxed);
        self.state.misses.store(0, Ordering::Relaxed);
    }
}

impl Default for CachingPlugin {
    fn default() -> Self {
        Self::new()
    }
}

struct CheckCache(Arc<CacheState>);

#[async_trait]
impl HookHandler for CheckCache {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        let Some(request) = ctx.get("request") else {
            return Ok(None);
        };
        let key = cache_key(request)?;

        if let Some(cached) = self.0.lookup(&key) {
            self.0.hits.fetch_add(1, Ordering::Relaxed);
            debug!(request_id = %ctx.request_id, cache_key = %key, "cache hit");
            return Ok(Some(
                HookPatch::new()
                    .set("cache_hit", true)
                    .set("cached_result", cached)
                    .halt(),
            ));
        }

        self.0.misses.fetch_add(1, Ordering::Relaxed);
        Ok(Some(
            HookPatch::new()
                .set("cache_hit", false)
                .set("cache_key", key),
        ))
    }
}

struct StoreResponse(Arc<CacheState>);

#[async_trait]
impl HookHandler for StoreResponse {
    async fn call(&self, ctx: &HookContext) -> HookResult {
        let hit = ctx
            .get("cache_hit")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if hit || !succeeded(ctx.get("success")) {
            return Ok(None);
        }
        let (Some(key), Some(response)) = (
            ctx.get("cache_key").and_then(Value::as_str),
            ctx.get("response"),
        ) else {
            return Ok(None);
        };

        self.0.lock().put(
            key.to_string(),
            CacheEntry {
                value: response.clone(),
                stored_at: Instant::now(),
            },
        );
        debug!(request_id = %ctx.request_id, cache_key = key, "response cached");
        Ok(None)
    }
}

#[async_trait]
impl Plugin for CachingPlugin {
    fn name(&self) -> &str {
        "caching"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn description(&self) -> Option<&str> {
        Some("Caches successful responses keyed on the request payload")
    }

    fn hooks(&self) -> HookTable {
        HookTable::new()
            .on(HookType::BeforeRequest, CheckCache(self.state.clone()))
            .on(HookType::AfterResponse, StoreResponse(self.state.clone()))
    }

    async fn cleanup(&self) -> Result<()> {
        self.clear();
        Ok(())
    }
}
