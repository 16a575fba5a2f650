//! Remote Store Port
//!
//! Defines the interface for the remote key-value cache tier.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Cache tier errors.
///
/// These never escape the cache manager; they decide whether an operation
/// falls back to the local tier or counts as a miss.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Server-side statistics reported by the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RemoteInfo {
    pub used_memory: Option<String>,
    pub connected_clients: Option<u64>,
    pub keyspace_hits: Option<u64>,
    pub keyspace_misses: Option<u64>,
}

/// Remote key-value store (the fast tier of the cache).
///
/// Mirrors the command set of a Redis-compatible server:
/// `SETEX`, `GET`, `DEL`, `EXISTS`, `FLUSHDB`, `KEYS`, `INFO`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Check connectivity.
    async fn ping(&self) -> Result<(), CacheError>;

    /// Store a value with a TTL in seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Delete keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key in the current database.
    async fn flush(&self) -> Result<(), CacheError>;

    /// List keys matching a glob pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    /// Server statistics.
    async fn info(&self) -> Result<RemoteInfo, CacheError>;
}
