//! In-Memory Remote Store
//!
//! Implements RemoteStore with a DashMap. Used as a stand-in for Redis in
//! tests and single-process deployments; outages can be simulated with
//! `set_online(false)`.

use crate::domain::ports::{CacheError, RemoteInfo, RemoteStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// DashMap-backed remote store.
pub struct InMemoryRemoteStore {
    entries: DashMap<String, (String, Instant)>,
    online: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            online: AtomicBool::new(true),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Simulate the store going down or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Stored payload for `key`, bypassing expiry and outage checks.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.0.clone())
    }

    /// Store a raw payload without going through the cache encoding.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.insert(
            key.to_string(),
            (value.to_string(), Instant::now() + Duration::from_secs(3600)),
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    fn live(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now <= entry.1 {
                return Some(entry.0.clone());
            }
        }
        self.entries.remove_if(key, |_, (_, expires_at)| now > *expires_at);
        None
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn ping(&self) -> Result<(), CacheError> {
        self.check_online()
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.check_online()?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs.max(1));
        self.entries
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check_online()?;
        let value = self.live(key);
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check_online()?;
        let removed = keys
            .iter()
            .filter(|key| self.live(key).is_some() && self.entries.remove(key.as_str()).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.check_online()?;
        Ok(self.live(key).is_some())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.check_online()?;
        self.entries.clear();
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| now <= entry.value().1 && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn info(&self) -> Result<RemoteInfo, CacheError> {
        self.check_online()?;
        Ok(RemoteInfo {
            used_memory: Some(format!("{}B", self.entries.iter().map(|e| e.0.len()).sum::<usize>())),
            connected_clients: Some(1),
            keyspace_hits: Some(self.hits.load(Ordering::Relaxed)),
            keyspace_misses: Some(self.misses.load(Ordering::Relaxed)),
        })
    }
}
