//! traffic-pool - Load balancer, connection pools and two-tier cache
//!
//! This is the composition root that wires together all the components.

use std::sync::Arc;
use std::time::Duration;
use traffic_pool::adapters::inbound::{StatsServer, StatsState};
use traffic_pool::adapters::outbound::RedisRemoteStore;
use traffic_pool::application::{CacheManager, LoadBalancer};
use traffic_pool::config::load_config;
use traffic_pool::domain::ports::RemoteStore;
use traffic_pool::infrastructure::{shutdown_signal, DatabasePool, HttpPool, PoolStatsSource, ShutdownController};
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting traffic-pool stats={} strategy={} upstreams={}",
        cfg.stats_listen_addr,
        cfg.lb_strategy,
        cfg.upstreams.len()
    );

    let shutdown = ShutdownController::new();

    // ===== COMPOSITION ROOT =====

    // 1. Cache: remote tier when reachable, local tier always
    let remote: Option<Arc<dyn RemoteStore>> = match &cfg.redis_url {
        Some(url) => match RedisRemoteStore::new(url, Duration::from_secs(5)) {
            Ok(store) => Some(Arc::new(store) as Arc<dyn RemoteStore>),
            Err(e) => {
                tracing::warn!("remote cache disabled, using local tier only: {}", e);
                None
            }
        },
        None => {
            tracing::info!("no remote cache configured, using local tier only");
            None
        }
    };
    let cache = Arc::new(CacheManager::new(cfg.cache_config(), remote));
    if cfg.redis_url.is_some() && !cache.ping().await {
        tracing::warn!("remote cache not reachable yet, serving from local tier until it is");
    }
    shutdown.track(
        "cache-gc",
        cache.start_gc(Duration::from_secs(cfg.cache_gc_interval_secs), &shutdown),
    );

    // 2. Pools
    let database = Arc::new(DatabasePool::new(cfg.db_path.clone(), cfg.pool_config()));
    database.initialize().await?;

    let http = match &cfg.http_base_url {
        Some(base_url) => {
            let pool = Arc::new(HttpPool::new(base_url.clone(), cfg.pool_config()));
            pool.initialize().await?;
            Some(pool)
        }
        None => None,
    };

    // 3. Load balancer
    let load_balancer = Arc::new(LoadBalancer::new(cfg.load_balancer_config())?);
    for server in cfg.upstream_servers() {
        load_balancer.add_server(server);
    }
    if cfg.upstreams.is_empty() {
        tracing::warn!("no upstreams configured (TRAFFICPOOL_UPSTREAMS)");
    } else {
        shutdown.track("health-checks", load_balancer.start_health_checks(&shutdown));
    }

    // 4. Stats server (inbound adapter)
    let mut state = StatsState::new(cache.clone(), load_balancer.clone())
        .with_pool(Arc::new(database.pool().clone()) as Arc<dyn PoolStatsSource>);
    if let Some(http) = &http {
        state = state.with_pool(Arc::new(http.pool().clone()) as Arc<dyn PoolStatsSource>);
    }
    let stats_server = StatsServer::new(cfg.stats_listen_addr.clone(), state);

    tokio::spawn(shutdown_signal(shutdown.clone()));

    if let Err(e) = stats_server.run(shutdown.clone()).await {
        tracing::error!("stats server error: {:?}", e);
        shutdown.shutdown();
    }

    // ===== TEARDOWN =====
    if !shutdown.wait_for_tasks(Duration::from_secs(10)).await {
        tracing::warn!("some workers were aborted during shutdown");
    }
    if let Some(http) = &http {
        http.close_all().await;
    }
    database.close_all().await;

    let metrics = cache.metrics();
    tracing::info!(
        "shutdown complete (cache hits={} misses={} hit_rate={:.1}%)",
        metrics.hits,
        metrics.misses,
        metrics.hit_rate
    );
    Ok(())
}
