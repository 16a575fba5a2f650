//! Application Layer
//!
//! Services composed from the domain and infrastructure layers: the load
//! balancer, the two-tier cache and its memoizing wrapper.

pub mod cache_manager;
pub mod load_balancer;
pub mod memoize;

pub use cache_manager::{CacheConfig, CacheManager, CacheMetrics, CacheMetricsSnapshot, CacheStats};
pub use load_balancer::{
    LoadBalancer, LoadBalancerConfig, LoadBalancerError, LoadBalancerStats, UpstreamResponse,
};
pub use memoize::{memo_key, Memoized};
