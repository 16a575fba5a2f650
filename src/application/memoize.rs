//! Memoizing wrapper around an operation, backed by the [`CacheManager`].

use crate::application::cache_manager::CacheManager;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache key for one call: `"{prefix}:{sha1 hex}"` over prefix, operation
/// name and the JSON-encoded arguments.
pub fn memo_key(prefix: &str, name: &str, args_json: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(prefix.as_bytes());
    hasher.update(b":");
    hasher.update(name.as_bytes());
    hasher.update(b":");
    hasher.update(args_json.as_bytes());
    format!("{}:{}", prefix, hex::encode(hasher.finalize()))
}

/// An operation whose results are cached by argument.
///
/// Cache failures never stop the operation from running; at worst every
/// call is a miss.
pub struct Memoized<F> {
    cache: Arc<CacheManager>,
    prefix: String,
    name: String,
    ttl: Option<Duration>,
    op: F,
}

impl<F> Memoized<F> {
    pub fn new(
        cache: Arc<CacheManager>,
        prefix: impl Into<String>,
        name: impl Into<String>,
        ttl: Option<Duration>,
        op: F,
    ) -> Self {
        Self {
            cache,
            prefix: prefix.into(),
            name: name.into(),
            ttl,
            op,
        }
    }

    /// Key for a given argument value; `None` when the arguments cannot be
    /// serialized (the call then bypasses the cache).
    pub fn key_for<A: Serialize + ?Sized>(&self, args: &A) -> Option<String> {
        match serde_json::to_string(args) {
            Ok(json) => Some(memo_key(&self.prefix, &self.name, &json)),
            Err(e) => {
                tracing::debug!("{}: arguments not cacheable: {}", self.name, e);
                None
            }
        }
    }

    async fn cached<T: DeserializeOwned>(&self, key: Option<&str>) -> Option<T> {
        match key {
            Some(key) => self.cache.get::<T>(key).await,
            None => None,
        }
    }

    async fn store<T: Serialize>(&self, key: Option<&str>, value: &T) {
        if let Some(key) = key {
            self.cache.set(key, value, self.ttl).await;
        }
    }

    /// Call an async operation through the cache.
    pub async fn call<A, T, Fut>(&self, args: A) -> T
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = T>,
        A: Serialize,
        T: Serialize + DeserializeOwned,
    {
        let key = self.key_for(&args);
        if let Some(hit) = self.cached::<T>(key.as_deref()).await {
            tracing::debug!("{}: cache hit", self.name);
            return hit;
        }

        let value = (self.op)(args).await;
        self.store(key.as_deref(), &value).await;
        value
    }

    /// Call a plain (non-async) operation through the cache.
    pub async fn call_sync<A, T>(&self, args: A) -> T
    where
        F: Fn(A) -> T,
        A: Serialize,
        T: Serialize + DeserializeOwned,
    {
        let key = self.key_for(&args);
        if let Some(hit) = self.cached::<T>(key.as_deref()).await {
            return hit;
        }

        let value = (self.op)(args);
        self.store(key.as_deref(), &value).await;
        value
    }

    /// Call a fallible async operation; only `Ok` results are cached.
    pub async fn try_call<A, T, E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Serialize,
        T: Serialize + DeserializeOwned,
    {
        let key = self.key_for(&args);
        if let Some(hit) = self.cached::<T>(key.as_deref()).await {
            return Ok(hit);
        }

        let value = (self.op)(args).await?;
        self.store(key.as_deref(), &value).await;
        Ok(value)
    }
}
