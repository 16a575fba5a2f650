//! Redis Remote Store
//!
//! Implements RemoteStore against a Redis-compatible server. The connection
//! is a `ConnectionManager`, which reconnects after drops; it is opened
//! lazily so a server that is down at startup is picked up once it appears.

use crate::domain::ports::{CacheError, RemoteInfo, RemoteStore};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Redis-backed remote cache tier.
pub struct RedisRemoteStore {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    connect_timeout: Duration,
    url: String,
}

impl RedisRemoteStore {
    /// Validate `url` without connecting. The first command opens the
    /// connection, giving up after `connect_timeout`; failed attempts are
    /// retried by later commands.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            connect_timeout,
            url: url.to_string(),
        })
    }

    /// Like `new`, but fails unless the server answers within `timeout`.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let store = Self::new(url, timeout)?;
        store.connection().await?;
        Ok(store)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_connected(&self) -> bool {
        self.connection.initialized()
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(Ok(manager)) => {
                        tracing::info!("connected to remote cache at {}", self.url);
                        Ok(manager)
                    }
                    Ok(Err(e)) => Err(CacheError::Unavailable(format!("failed to connect: {}", e))),
                    Err(_) => Err(CacheError::Unavailable("connect timeout".to_string())),
                }
            })
            .await?;
        Ok(manager.clone())
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[async_trait]
impl RemoteStore for RedisRemoteStore {
    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs.max(1))
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<u64>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("EXISTS")
            .arg(key)
            .query_async::<u64>(&mut conn)
            .await
            .map(|count| count > 0)
            .map_err(unavailable)
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async::<Vec<String>>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn info(&self) -> Result<RemoteInfo, CacheError> {
        let mut conn = self.connection().await?;
        let raw = redis::cmd("INFO")
            .query_async::<String>(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(parse_info(&raw))
    }
}

/// Extract the fields we report from an `INFO` reply.
pub fn parse_info(raw: &str) -> RemoteInfo {
    let mut info = RemoteInfo::default();
    for line in raw.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory_human" => info.used_memory = Some(value.to_string()),
            "connected_clients" => info.connected_clients = value.parse().ok(),
            "keyspace_hits" => info.keyspace_hits = value.parse().ok(),
            "keyspace_misses" => info.keyspace_misses = value.parse().ok(),
            _ => {}
        }
    }
    info
}
