//! traffic-pool Library
//!
//! Load balancing across HTTP upstreams, bounded connection pools and a
//! two-tier (remote + local) cache.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{
    CacheConfig, CacheManager, LoadBalancer, LoadBalancerConfig, LoadBalancerError, Memoized,
};
pub use config::load_config;
pub use domain::entities::{RequestGuard, Server, ServerStats};
pub use domain::ports::{CacheError, ConnectionFactory, RemoteStore};
pub use domain::value_objects::{CachePayload, PoolState, Strategy};
pub use infrastructure::{DatabasePool, HttpPool, Pool, PoolConfig, PoolError, PoolLease, ShutdownController};
