//! Connection Factory Port
//!
//! Defines how a pool creates and disposes of the resources it manages,
//! and the errors pool operations report.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Pool errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("connection pool is not initialized")]
    NotInitialized,

    #[error("connection pool is closed")]
    Closed,

    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("query failed: {0}")]
    Query(String),
}

impl PoolError {
    /// Whether retrying the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PoolError::NotInitialized | PoolError::Closed)
    }
}

/// Creates and closes pooled resources.
///
/// A "connection" is anything expensive enough to be worth reusing:
/// a database handle, an HTTP client session, a socket.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The pooled resource.
    type Connection: Send + 'static;

    /// Human readable target (URL, file path) used in logs and stats.
    fn target(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Close a connection that is leaving the pool for good.
    async fn close(&self, conn: Self::Connection) {
        drop(conn);
    }
}
