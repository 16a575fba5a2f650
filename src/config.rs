use crate::application::{CacheConfig, LoadBalancerConfig};
use crate::domain::entities::Server;
use crate::domain::value_objects::Strategy;
use crate::infrastructure::connection_pool::PoolConfig;
use serde::Deserialize;
use std::time::Duration;

/// An upstream from `TRAFFICPOOL_UPSTREAMS` (`address[=weight]`).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct UpstreamSpec {
    pub address: String,
    pub weight: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Core settings
    pub stats_listen_addr: String,
    pub redis_url: Option<String>,
    pub db_path: String,
    pub http_base_url: Option<String>,
    pub upstreams: Vec<UpstreamSpec>,
    pub debug: bool,

    // Pool settings
    pub pool_min_connections: usize,
    pub pool_max_connections: usize,
    pub pool_timeout_secs: u64,
    pub pool_retry_attempts: u32,
    pub pool_retry_delay_ms: u64,
    pub pool_max_idle_secs: u64,

    // Cache settings
    pub cache_ttl_secs: u64,
    pub cache_key_prefix: String,
    pub cache_max_local_entries: usize,
    pub cache_gc_interval_secs: u64,

    // Load balancer settings
    pub lb_strategy: Strategy,
    pub health_check_interval_secs: u64,
    pub health_check_timeout_secs: u64,
    pub health_check_path: String,
    pub max_errors: u64,
    pub request_timeout_secs: u64,
    pub strict: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stats_listen_addr: "0.0.0.0:9100".to_string(),
            redis_url: None,
            db_path: "traffic-pool.db".to_string(),
            http_base_url: None,
            upstreams: Vec::new(),
            debug: false,
            pool_min_connections: 5,
            pool_max_connections: 20,
            pool_timeout_secs: 30,
            pool_retry_attempts: 3,
            pool_retry_delay_ms: 1000,
            pool_max_idle_secs: 300,
            cache_ttl_secs: 3600,
            cache_key_prefix: String::new(),
            cache_max_local_entries: 10_000,
            cache_gc_interval_secs: 60,
            lb_strategy: Strategy::RoundRobin,
            health_check_interval_secs: 30,
            health_check_timeout_secs: 5,
            health_check_path: "/health".to_string(),
            max_errors: 5,
            request_timeout_secs: 30,
            strict: false,
        }
    }
}

impl Config {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_connections: self.pool_min_connections,
            max_connections: self.pool_max_connections,
            timeout: Duration::from_secs(self.pool_timeout_secs),
            retry_attempts: self.pool_retry_attempts,
            retry_delay: Duration::from_millis(self.pool_retry_delay_ms),
            max_idle_time: Duration::from_secs(self.pool_max_idle_secs),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache_ttl_secs),
            key_prefix: self.cache_key_prefix.clone(),
            max_local_entries: self.cache_max_local_entries,
        }
    }

    pub fn load_balancer_config(&self) -> LoadBalancerConfig {
        LoadBalancerConfig {
            strategy: self.lb_strategy,
            health_check_interval: Duration::from_secs(self.health_check_interval_secs),
            health_check_timeout: Duration::from_secs(self.health_check_timeout_secs),
            health_check_path: self.health_check_path.clone(),
            max_errors: self.max_errors,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            strict: self.strict,
        }
    }

    /// Servers to register at startup.
    pub fn upstream_servers(&self) -> Vec<Server> {
        self.upstreams
            .iter()
            .map(|u| Server::new(u.address.clone()).with_weight(u.weight))
            .collect()
    }
}

/// Parse `host:port[=weight],...`. Bad weights fall back to 1.
pub fn parse_upstreams(raw: &str) -> Vec<UpstreamSpec> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.rsplit_once('=') {
            Some((address, weight)) => UpstreamSpec {
                address: address.trim().to_string(),
                weight: weight.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!("invalid weight for upstream {}, using 1", address);
                    1
                }),
            },
            None => UpstreamSpec {
                address: entry.to_string(),
                weight: 1,
            },
        })
        .collect()
}

fn flag(value: Option<String>) -> bool {
    value
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Load configuration from the process environment.
pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Load configuration through `lookup` (environment-style keys).
/// Unparseable numbers fall back to their defaults.
pub fn load_config_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = Config::default();

    let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
    let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    macro_rules! number {
        ($key:expr, $default:expr) => {
            lookup($key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or($default)
        };
    }

    let stats_listen_addr = string("TRAFFICPOOL_STATS_LISTEN_ADDR", &defaults.stats_listen_addr);
    let redis_url = optional("TRAFFICPOOL_REDIS_URL");
    let db_path = string("TRAFFICPOOL_DB_PATH", &defaults.db_path);
    let http_base_url = optional("TRAFFICPOOL_HTTP_BASE_URL");
    let upstreams = lookup("TRAFFICPOOL_UPSTREAMS")
        .map(|v| parse_upstreams(&v))
        .unwrap_or_default();
    let debug = lookup("DEBUG").is_some();

    // Pool settings
    let pool_min_connections = number!("TRAFFICPOOL_POOL_MIN_CONNECTIONS", defaults.pool_min_connections);
    let pool_max_connections = number!("TRAFFICPOOL_POOL_MAX_CONNECTIONS", defaults.pool_max_connections);
    let pool_timeout_secs = number!("TRAFFICPOOL_POOL_TIMEOUT_SECS", defaults.pool_timeout_secs);
    let pool_retry_attempts = number!("TRAFFICPOOL_POOL_RETRY_ATTEMPTS", defaults.pool_retry_attempts);
    let pool_retry_delay_ms = number!("TRAFFICPOOL_POOL_RETRY_DELAY_MS", defaults.pool_retry_delay_ms);
    let pool_max_idle_secs = number!("TRAFFICPOOL_POOL_MAX_IDLE_SECS", defaults.pool_max_idle_secs);

    if pool_min_connections > pool_max_connections {
        anyhow::bail!(
            "TRAFFICPOOL_POOL_MIN_CONNECTIONS ({}) exceeds TRAFFICPOOL_POOL_MAX_CONNECTIONS ({})",
            pool_min_connections,
            pool_max_connections
        );
    }

    // Cache settings
    let cache_ttl_secs = number!("TRAFFICPOOL_CACHE_TTL_SECS", defaults.cache_ttl_secs);
    let cache_key_prefix = string("TRAFFICPOOL_CACHE_KEY_PREFIX", &defaults.cache_key_prefix);
    let cache_max_local_entries =
        number!("TRAFFICPOOL_CACHE_MAX_LOCAL_ENTRIES", defaults.cache_max_local_entries);
    let cache_gc_interval_secs =
        number!("TRAFFICPOOL_CACHE_GC_INTERVAL_SECS", defaults.cache_gc_interval_secs);
    if cache_gc_interval_secs == 0 {
        anyhow::bail!("TRAFFICPOOL_CACHE_GC_INTERVAL_SECS must be at least 1");
    }

    // Load balancer settings
    let lb_strategy = lookup("TRAFFICPOOL_LB_STRATEGY")
        .map(|v| Strategy::from_str(&v))
        .unwrap_or(defaults.lb_strategy);
    let health_check_interval_secs =
        number!("TRAFFICPOOL_LB_HEALTH_CHECK_INTERVAL_SECS", defaults.health_check_interval_secs);
    if health_check_interval_secs == 0 {
        anyhow::bail!("TRAFFICPOOL_LB_HEALTH_CHECK_INTERVAL_SECS must be at least 1");
    }
    let health_check_timeout_secs =
        number!("TRAFFICPOOL_LB_HEALTH_CHECK_TIMEOUT_SECS", defaults.health_check_timeout_secs);
    let health_check_path = string("TRAFFICPOOL_LB_HEALTH_CHECK_PATH", &defaults.health_check_path);
    let max_errors = number!("TRAFFICPOOL_LB_MAX_ERRORS", defaults.max_errors);
    let request_timeout_secs =
        number!("TRAFFICPOOL_LB_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs);
    let strict = flag(lookup("TRAFFICPOOL_LB_STRICT"));

    Ok(Config {
        stats_listen_addr,
        redis_url,
        db_path,
        http_base_url,
        upstreams,
        debug,
        pool_min_connections,
        pool_max_connections,
        pool_timeout_secs,
        pool_retry_attempts,
        pool_retry_delay_ms,
        pool_max_idle_secs,
        cache_ttl_secs,
        cache_key_prefix,
        cache_max_local_entries,
        cache_gc_interval_secs,
        lb_strategy,
        health_check_interval_secs,
        health_check_timeout_secs,
        health_check_path,
        max_errors,
        request_timeout_secs,
        strict,
    })
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config_from(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.stats_listen_addr, "0.0.0.0:9100");
        assert_eq!(cfg.db_path, "traffic-pool.db");
        assert!(cfg.redis_url.is_none());
        assert!(cfg.upstreams.is_empty());
        assert!(!cfg.strict);
    }

    #[test]
    fn test_load_config_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.stats_listen_addr, "0.0.0.0:9100");
        assert_eq!(cfg.pool_min_connections, 5);
        assert_eq!(cfg.pool_max_connections, 20);
        assert_eq!(cfg.pool_timeout_secs, 30);
        assert_eq!(cfg.pool_retry_attempts, 3);
        assert_eq!(cfg.pool_retry_delay_ms, 1000);
        assert_eq!(cfg.cache_ttl_secs, 3600);
        assert_eq!(cfg.cache_key_prefix, "");
        assert_eq!(cfg.cache_max_local_entries, 10_000);
        assert_eq!(cfg.lb_strategy, Strategy::RoundRobin);
        assert_eq!(cfg.health_check_interval_secs, 30);
        assert_eq!(cfg.health_check_timeout_secs, 5);
        assert_eq!(cfg.max_errors, 5);
        assert!(!cfg.debug);
    }

    #[test]
    fn test_load_config_overrides() {
        let cfg = load(&[
            ("TRAFFICPOOL_STATS_LISTEN_ADDR", "127.0.0.1:9999"),
            ("TRAFFICPOOL_REDIS_URL", "redis://cache:6379/0"),
            ("TRAFFICPOOL_POOL_MAX_CONNECTIONS", "50"),
            ("TRAFFICPOOL_CACHE_KEY_PREFIX", "tp:"),
            ("TRAFFICPOOL_LB_STRATEGY", "least_connections"),
            ("TRAFFICPOOL_LB_STRICT", "true"),
            ("DEBUG", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.stats_listen_addr, "127.0.0.1:9999");
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379/0"));
        assert_eq!(cfg.pool_max_connections, 50);
        assert_eq!(cfg.cache_key_prefix, "tp:");
        assert_eq!(cfg.lb_strategy, Strategy::LeastConnections);
        assert!(cfg.strict);
        assert!(cfg.debug);
    }

    #[test]
    fn test_load_config_parse_error_uses_default() {
        let cfg = load(&[("TRAFFICPOOL_CACHE_TTL_SECS", "not_a_number")]).unwrap();
        assert_eq!(cfg.cache_ttl_secs, 3600);
    }

    #[test]
    fn test_load_config_empty_redis_url_is_none() {
        let cfg = load(&[("TRAFFICPOOL_REDIS_URL", "  ")]).unwrap();
        assert!(cfg.redis_url.is_none());
    }

    #[test]
    fn test_load_config_rejects_min_above_max() {
        let result = load(&[
            ("TRAFFICPOOL_POOL_MIN_CONNECTIONS", "10"),
            ("TRAFFICPOOL_POOL_MAX_CONNECTIONS", "2"),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_rejects_zero_intervals() {
        let err = load(&[("TRAFFICPOOL_LB_HEALTH_CHECK_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("TRAFFICPOOL_LB_HEALTH_CHECK_INTERVAL_SECS"));

        let err = load(&[("TRAFFICPOOL_CACHE_GC_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("TRAFFICPOOL_CACHE_GC_INTERVAL_SECS"));

        let cfg = load(&[("TRAFFICPOOL_LB_HEALTH_CHECK_INTERVAL_SECS", "1")]).unwrap();
        assert_eq!(
            cfg.load_balancer_config().health_check_interval,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_lb_settings_use_lb_prefix() {
        let cfg = load(&[
            ("TRAFFICPOOL_LB_HEALTH_CHECK_TIMEOUT_SECS", "2"),
            ("TRAFFICPOOL_LB_HEALTH_CHECK_PATH", "/ready"),
            ("TRAFFICPOOL_LB_MAX_ERRORS", "9"),
        ])
        .unwrap();
        assert_eq!(cfg.health_check_timeout_secs, 2);
        assert_eq!(cfg.health_check_path, "/ready");
        assert_eq!(cfg.max_errors, 9);
    }

    #[test]
    fn test_unknown_strategy_falls_back() {
        let cfg = load(&[("TRAFFICPOOL_LB_STRATEGY", "fastest")]).unwrap();
        assert_eq!(cfg.lb_strategy, Strategy::RoundRobin);
    }

    #[test]
    fn test_parse_upstreams() {
        let upstreams = parse_upstreams("10.0.0.1:8080=3, 10.0.0.2:8080 ,,http://b:9=x");
        assert_eq!(
            upstreams,
            vec![
                UpstreamSpec { address: "10.0.0.1:8080".to_string(), weight: 3 },
                UpstreamSpec { address: "10.0.0.2:8080".to_string(), weight: 1 },
                UpstreamSpec { address: "http://b:9".to_string(), weight: 1 },
            ]
        );
    }

    #[test]
    fn test_component_configs() {
        let cfg = load(&[
            ("TRAFFICPOOL_POOL_RETRY_DELAY_MS", "250"),
            ("TRAFFICPOOL_UPSTREAMS", "a:1=2,b:1"),
            ("TRAFFICPOOL_LB_REQUEST_TIMEOUT_SECS", "7"),
        ])
        .unwrap();

        let pool = cfg.pool_config();
        assert_eq!(pool.retry_delay, Duration::from_millis(250));
        assert_eq!(pool.max_idle_time, Duration::from_secs(300));

        let cache = cfg.cache_config();
        assert_eq!(cache.default_ttl, Duration::from_secs(3600));

        let lb = cfg.load_balancer_config();
        assert_eq!(lb.request_timeout, Duration::from_secs(7));
        assert_eq!(lb.health_check_path, "/health");

        let servers = cfg.upstream_servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].weight(), 2);
        assert_eq!(servers[1].address(), "b:1");
    }

    #[test]
    fn test_config_debug() {
        let cfg = Config::default();
        let debug_str = format!("{:?}", cfg);
        assert!(debug_str.contains("stats_listen_addr"));
        assert!(debug_str.contains("0.0.0.0:9100"));
    }
}
