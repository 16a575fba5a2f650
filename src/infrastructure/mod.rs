//! Infrastructure Layer
//!
//! Resource pools, the local cache tier, health probing and shutdown
//! coordination.

pub mod connection_pool;
pub mod database_pool;
pub mod health_checker;
pub mod http_pool;
pub mod local_cache;
pub mod retry;
pub mod shutdown;

pub use connection_pool::{Pool, PoolConfig, PoolEntry, PoolError, PoolLease, PoolStats, PoolStatsSource};
pub use database_pool::{DatabasePool, Row, SqliteConnectionFactory, SqliteHandle};
pub use health_checker::{HealthCheckConfig, HealthCheckResult, HealthChecker, HealthReport};
pub use http_pool::{HttpPool, HttpResponse, HttpSessionFactory, ResponseBody};
pub use local_cache::LocalStore;
pub use retry::retry_with_backoff;
pub use shutdown::{shutdown_signal, ShutdownController};
