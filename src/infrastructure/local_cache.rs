//! Local Cache Tier
//!
//! In-process fallback store used when the remote cache is unreachable.
//! Backed by a moka cache: entries carry their own TTL and the store is
//! capped with least-recently-used eviction.

use crate::infrastructure::shutdown::{ShutdownController, MIN_TASK_INTERVAL};
use moka::notification::RemovalCause;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct LocalEntry {
    payload: String,
    expires_at: Instant,
}

impl LocalEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Expire each entry at its own deadline.
struct PerEntryTtl;

impl Expiry<String, LocalEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LocalEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LocalEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(updated_at))
    }
}

/// Capped, TTL-aware local cache tier.
pub struct LocalStore {
    entries: Cache<String, LocalEntry>,
    max_entries: usize,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl LocalStore {
    /// Create a store holding at most `max_entries` keys.
    pub fn new(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        let evictions = Arc::new(AtomicU64::new(0));
        let expirations = Arc::new(AtomicU64::new(0));

        let (evicted, expired) = (evictions.clone(), expirations.clone());
        let entries = Cache::builder()
            .max_capacity(max_entries as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(PerEntryTtl)
            .eviction_listener(move |key: Arc<String>, _entry: LocalEntry, cause| match cause {
                RemovalCause::Size => {
                    evicted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("local cache evicted {}", key);
                }
                RemovalCause::Expired => {
                    expired.fetch_add(1, Ordering::Relaxed);
                }
                _ => {}
            })
            .build();

        Self {
            entries,
            max_entries,
            evictions,
            expirations,
        }
    }

    /// Store an encoded payload for `ttl`.
    pub fn set(&self, key: &str, payload: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                payload,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Get a live payload.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.payload)
    }

    /// Whether a live entry exists. Same expiry rule as `get`.
    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove a key. Returns whether a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Remove every key containing `fragment`.
    pub fn remove_containing(&self, fragment: &str) -> usize {
        let keys: Vec<Arc<String>> = self
            .entries
            .iter()
            .filter(|(key, _)| key.contains(fragment))
            .map(|(key, _)| key)
            .collect();

        keys.iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count()
    }

    /// Drop everything. Returns how many entries were held.
    pub fn clear(&self) -> usize {
        let count = self.len();
        self.entries.invalidate_all();
        self.entries.run_pending_tasks();
        count
    }

    /// Remove expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, &self.expirations)
    }

    /// Live entry count, after pending inserts and evictions are applied.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Start the background sweep removing expired entries every
    /// `interval` (at least `MIN_TASK_INTERVAL`), until shutdown.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_gc(&self, interval: Duration, shutdown: &ShutdownController) -> JoinHandle<()> {
        let entries = self.entries.clone();
        let expirations = self.expirations.clone();
        let shutdown = shutdown.clone();
        let interval = interval.max(MIN_TASK_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = purge(&entries, &expirations);
                        if removed > 0 {
                            tracing::debug!("local cache GC removed {} expired entries", removed);
                        }
                    }
                    _ = shutdown.wait() => {
                        tracing::debug!("local cache GC stopped");
                        break;
                    }
                }
            }
        })
    }
}

/// Run moka's pending maintenance, which drops entries past their
/// deadline. Returns how many expired entries it removed.
fn purge(entries: &Cache<String, LocalEntry>, expirations: &AtomicU64) -> usize {
    let before = expirations.load(Ordering::Relaxed);
    entries.run_pending_tasks();
    expirations.load(Ordering::Relaxed).saturating_sub(before) as usize
}
