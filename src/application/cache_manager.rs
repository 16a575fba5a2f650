//! Cache Manager
//!
//! Two-tier cache: a remote Redis-compatible store when reachable, an
//! in-process map otherwise. Caching is best-effort; no operation here ever
//! returns an error to the caller.
//!
//! The local tier only ever holds writes the remote tier missed (a
//! successful remote write drops the local copy), so reads consult it first.
//! Deletes and invalidations issued during an outage are remembered and
//! replayed once the remote tier answers again; until then they mask the
//! stale remote entries.

use crate::application::memoize::Memoized;
use crate::domain::ports::{CacheError, RemoteInfo, RemoteStore};
use crate::domain::value_objects::{CachePayload, CacheTier};
use crate::infrastructure::local_cache::LocalStore;
use crate::infrastructure::shutdown::ShutdownController;
use dashmap::DashSet;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used when `set` is called without one
    pub default_ttl: Duration,
    /// Prepended to every key
    pub key_prefix: String,
    /// Local tier capacity
    pub max_local_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            key_prefix: String::new(),
            max_local_entries: 10_000,
        }
    }
}

/// Cache operation counters.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl CacheMetrics {
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hits as f64 / lookups as f64 * 100.0
        };

        CacheMetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate,
        }
    }

    fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.sets, &self.deletes, &self.errors] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Point-in-time cache metrics. `hit_rate` is a percentage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub hit_rate: f64,
}

/// Cache status for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub remote_configured: bool,
    pub remote_available: bool,
    pub local_entries: usize,
    pub local_capacity: usize,
    pub local_evictions: u64,
    pub remote: Option<RemoteInfo>,
    pub metrics: CacheMetricsSnapshot,
}

/// Two-tier cache manager.
pub struct CacheManager {
    config: CacheConfig,
    remote: Option<Arc<dyn RemoteStore>>,
    remote_available: AtomicBool,
    local: LocalStore,
    metrics: CacheMetrics,
    /// Keys deleted while the remote tier was unreachable
    pending_deletes: DashSet<String>,
    /// Patterns invalidated while the remote tier was unreachable
    pending_patterns: Mutex<Vec<String>>,
}

impl CacheManager {
    /// Create a manager. `remote` is optional; without it only the local
    /// tier is used.
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        Self {
            local: LocalStore::new(config.max_local_entries),
            remote_available: AtomicBool::new(remote.is_some()),
            remote,
            config,
            metrics: CacheMetrics::default(),
            pending_deletes: DashSet::new(),
            pending_patterns: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// Whether the last remote operation succeeded.
    pub fn remote_available(&self) -> bool {
        self.remote.is_some() && self.remote_available.load(Ordering::Relaxed)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn remote_ok(&self) {
        if !self.remote_available.swap(true, Ordering::Relaxed) {
            tracing::info!("remote cache reachable again");
        }
    }

    fn remote_failed(&self, op: &str, err: &CacheError) {
        self.metrics.errors.fetch_add(1, Ordering::Relaxed);
        if self.remote_available.swap(false, Ordering::Relaxed) {
            tracing::warn!("remote cache {} failed, using local tier: {}", op, err);
        } else {
            tracing::debug!("remote cache {} failed: {}", op, err);
        }
    }

    fn has_pending(&self) -> bool {
        !self.pending_deletes.is_empty() || !self.pending_patterns.lock().is_empty()
    }

    /// Whether `key` was invalidated during an outage and the remote tier
    /// may still hold a stale copy.
    fn is_masked(&self, key: &str) -> bool {
        self.pending_deletes.contains(key)
            || self
                .pending_patterns
                .lock()
                .iter()
                .any(|pattern| key.contains(literal_part(pattern)))
    }

    /// The remote tier, with outage-time deletes replayed first.
    async fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        let remote = self.remote.as_ref()?;
        if self.has_pending() {
            self.replay_pending(remote.as_ref()).await;
        }
        Some(remote)
    }

    async fn replay_pending(&self, remote: &dyn RemoteStore) {
        let keys: Vec<String> = self.pending_deletes.iter().map(|k| k.key().clone()).collect();
        if !keys.is_empty() {
            if let Err(e) = remote.del(&keys).await {
                tracing::debug!("remote cache replay deferred: {}", e);
                return;
            }
            for key in &keys {
                self.pending_deletes.remove(key);
            }
        }

        let patterns: Vec<String> = self.pending_patterns.lock().clone();
        for pattern in &patterns {
            let result = match remote.keys(pattern).await {
                Ok(found) if found.is_empty() => Ok(0),
                Ok(found) => remote.del(&found).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::debug!("remote cache replay deferred: {}", e);
                return;
            }
            self.pending_patterns.lock().retain(|p| p != pattern);
        }

        self.remote_ok();
        tracing::info!(
            "replayed {} deletes and {} invalidations on remote cache",
            keys.len(),
            patterns.len()
        );
    }

    /// Store a value. Returns whether it landed in either tier.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool
    where
        T: Serialize + ?Sized,
    {
        let payload = match CachePayload::from_value(value) {
            Ok(payload) => payload.encode(),
            Err(e) => {
                tracing::warn!("cache set {} skipped: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        let ttl = ttl
            .unwrap_or(self.config.default_ttl)
            .max(Duration::from_secs(1));
        let key = self.full_key(key);

        if let Some(remote) = self.remote().await {
            match remote.set_ex(&key, &payload, ttl.as_secs()).await {
                Ok(()) => {
                    self.remote_ok();
                    // a stale local copy would shadow the remote entry
                    self.local.delete(&key);
                    self.pending_deletes.remove(&key);
                    self.metrics.sets.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(e) => self.remote_failed("set", &e),
            }
        }

        self.local.set(&key, payload, ttl);
        self.metrics.sets.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Get a value. The local tier answers first, then the remote tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_with_tier(key).await.map(|(value, _)| value)
    }

    /// Like `get`, also reporting which tier served the hit.
    pub async fn get_with_tier<T: DeserializeOwned>(&self, key: &str) -> Option<(T, CacheTier)> {
        let key = self.full_key(key);

        let mut found = self.local.get(&key).map(|raw| (raw, CacheTier::Local));
        if found.is_none() {
            if let Some(remote) = self.remote().await {
                if !self.is_masked(&key) {
                    match remote.get(&key).await {
                        Ok(Some(raw)) => {
                            self.remote_ok();
                            found = Some((raw, CacheTier::Remote));
                        }
                        Ok(None) => self.remote_ok(),
                        Err(e) => self.remote_failed("get", &e),
                    }
                }
            }
        }

        let Some((raw, tier)) = found else {
            self.metrics.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        match CachePayload::decode(&raw).and_then(|payload| payload.to_value::<T>()) {
            Ok(value) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some((value, tier))
            }
            Err(e) => {
                tracing::warn!("cache entry {} could not be decoded: {}", key, e);
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Delete a key from both tiers. Returns whether it existed anywhere.
    pub async fn delete(&self, key: &str) -> bool {
        let key = self.full_key(key);
        let mut removed = false;

        if let Some(remote) = self.remote().await {
            match remote.del(std::slice::from_ref(&key)).await {
                Ok(count) => {
                    self.remote_ok();
                    removed |= count > 0;
                }
                Err(e) => {
                    self.remote_failed("delete", &e);
                    self.pending_deletes.insert(key.clone());
                }
            }
        }
        removed |= self.local.delete(&key);

        self.metrics.deletes.fetch_add(1, Ordering::Relaxed);
        removed
    }

    /// Whether a live entry exists in either tier.
    pub async fn exists(&self, key: &str) -> bool {
        let key = self.full_key(key);
        if self.local.exists(&key) {
            return true;
        }

        let Some(remote) = self.remote().await else {
            return false;
        };
        if self.is_masked(&key) {
            return false;
        }
        match remote.exists(&key).await {
            Ok(found) => {
                self.remote_ok();
                found
            }
            Err(e) => {
                self.remote_failed("exists", &e);
                false
            }
        }
    }

    /// Drop every entry in both tiers.
    ///
    /// Returns false only when the remote flush failed; the local tier is
    /// always cleared.
    pub async fn clear(&self) -> bool {
        let mut ok = true;
        if let Some(remote) = &self.remote {
            match remote.flush().await {
                Ok(()) => {
                    self.remote_ok();
                    self.pending_deletes.clear();
                    self.pending_patterns.lock().clear();
                }
                Err(e) => {
                    self.remote_failed("clear", &e);
                    self.remember_pattern(self.full_key("*"));
                    ok = false;
                }
            }
        }
        let dropped = self.local.clear();
        tracing::info!("cache cleared ({} local entries dropped)", dropped);
        ok
    }

    /// Remove every key matching a glob `pattern` (key prefix applied).
    ///
    /// The remote tier uses `KEYS` + `DEL`. The local tier only understands
    /// a trailing wildcard: it removes keys containing the literal part.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let pattern = self.full_key(pattern);
        let mut removed = 0usize;

        if let Some(remote) = self.remote().await {
            let result = match remote.keys(&pattern).await {
                Ok(keys) if keys.is_empty() => Ok(0),
                Ok(keys) => remote.del(&keys).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(count) => {
                    self.remote_ok();
                    removed += count as usize;
                }
                Err(e) => {
                    self.remote_failed("invalidate", &e);
                    self.remember_pattern(pattern.clone());
                }
            }
        }

        let literal = literal_part(&pattern);
        if !literal.is_empty() {
            removed += self.local.remove_containing(literal);
        }

        self.metrics
            .deletes
            .fetch_add(removed as u64, Ordering::Relaxed);
        tracing::info!("invalidated {} cache entries matching {}", removed, pattern);
        removed
    }

    fn remember_pattern(&self, pattern: String) {
        let mut patterns = self.pending_patterns.lock();
        if !patterns.contains(&pattern) {
            patterns.push(pattern);
        }
    }

    pub async fn invalidate_user_data(&self, user_id: impl std::fmt::Display) -> usize {
        self.invalidate_pattern(&format!("user:{}:*", user_id)).await
    }

    pub async fn invalidate_patient_data(&self, patient_id: impl std::fmt::Display) -> usize {
        self.invalidate_pattern(&format!("patient:{}:*", patient_id))
            .await
    }

    pub async fn invalidate_ai_results(&self, study_id: impl std::fmt::Display) -> usize {
        self.invalidate_pattern(&format!("ai_results:{}:*", study_id))
            .await
    }

    /// Wrap `op` so its results are cached under `prefix`.
    pub fn memoize<F>(
        self: &Arc<Self>,
        prefix: impl Into<String>,
        name: impl Into<String>,
        ttl: Option<Duration>,
        op: F,
    ) -> Memoized<F> {
        Memoized::new(Arc::clone(self), prefix, name, ttl, op)
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        tracing::info!("cache metrics reset");
    }

    /// Cache status including remote-reported details.
    pub async fn get_stats(&self) -> CacheStats {
        let remote = match &self.remote {
            Some(remote) => match remote.info().await {
                Ok(info) => {
                    self.remote_ok();
                    Some(info)
                }
                Err(e) => {
                    self.remote_failed("info", &e);
                    None
                }
            },
            None => None,
        };

        CacheStats {
            remote_configured: self.remote.is_some(),
            remote_available: self.remote_available(),
            local_entries: self.local.len(),
            local_capacity: self.local.capacity(),
            local_evictions: self.local.evictions(),
            remote,
            metrics: self.metrics.snapshot(),
        }
    }

    /// Check the remote tier; updates availability.
    pub async fn ping(&self) -> bool {
        match &self.remote {
            Some(remote) => match remote.ping().await {
                Ok(()) => {
                    self.remote_ok();
                    true
                }
                Err(e) => {
                    self.remote_failed("ping", &e);
                    false
                }
            },
            None => false,
        }
    }

    /// Start sweeping expired local entries every `interval`.
    pub fn start_gc(&self, interval: Duration, shutdown: &ShutdownController) -> JoinHandle<()> {
        self.local.start_gc(interval, shutdown)
    }
}

/// Part of a glob pattern before its trailing wildcard.
fn literal_part(pattern: &str) -> &str {
    pattern.trim_end_matches('*')
}
