//! Load Balancer
//!
//! Distributes HTTP requests across registered upstream servers, tracks
//! per-server health and runs the periodic health-check loop.

use crate::domain::entities::{Server, ServerStats};
use crate::domain::services::ServerSelector;
use crate::domain::value_objects::Strategy;
use crate::infrastructure::health_checker::{HealthCheckConfig, HealthChecker, HealthReport};
use crate::infrastructure::http_pool::{join_url, read_body, ResponseBody};
use crate::infrastructure::shutdown::{ShutdownController, MIN_TASK_INTERVAL};
use parking_lot::RwLock;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// Load balancer configuration.
#[derive(Debug, Clone)]
pub struct LoadBalancerConfig {
    pub strategy: Strategy,
    pub health_check_interval: Duration,
    pub health_check_timeout: Duration,
    pub health_check_path: String,
    /// Failed requests before a server leaves rotation
    pub max_errors: u64,
    pub request_timeout: Duration,
    /// Return upstream failures as errors instead of `Ok(None)`
    pub strict: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RoundRobin,
            health_check_interval: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(5),
            health_check_path: "/health".to_string(),
            max_errors: 5,
            request_timeout: Duration::from_secs(30),
            strict: false,
        }
    }
}

/// Load balancer errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadBalancerError {
    #[error("no healthy servers available")]
    NoHealthyServers,

    #[error("all healthy servers are at their connection limit")]
    AllSaturated,

    #[error("upstream {address} failed: {reason}")]
    Upstream { address: String, reason: String },

    #[error("http client error: {0}")]
    Client(String),
}

/// A successful upstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// Address of the server that answered
    pub server: String,
    pub status: u16,
    pub body: ResponseBody,
    pub elapsed: Duration,
}

/// Load balancer statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub strategy: Strategy,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub total_connections: usize,
    pub total_requests: u64,
    pub servers: Vec<ServerStats>,
}

/// HTTP load balancer over a set of upstream servers.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    servers: RwLock<Vec<Arc<Server>>>,
    counter: AtomicUsize,
    total_requests: AtomicU64,
    client: reqwest::Client,
    health_checker: HealthChecker,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> Result<Self, LoadBalancerError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LoadBalancerError::Client(e.to_string()))?;

        let health_checker = HealthChecker::new(HealthCheckConfig {
            interval: config.health_check_interval,
            timeout: config.health_check_timeout,
            path: config.health_check_path.clone(),
        });

        Ok(Self {
            config,
            servers: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
            total_requests: AtomicU64::new(0),
            client,
            health_checker,
        })
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Register a server; returns the shared handle.
    pub fn add_server(&self, server: Server) -> Arc<Server> {
        let server = Arc::new(server);
        tracing::info!(
            "added server {} (weight {})",
            server.address(),
            server.weight()
        );
        self.servers.write().push(Arc::clone(&server));
        server
    }

    /// Remove every server registered under `address`.
    pub fn remove_server(&self, address: &str) -> bool {
        let mut servers = self.servers.write();
        let before = servers.len();
        servers.retain(|s| s.address() != address);
        let removed = servers.len() != before;
        if removed {
            tracing::info!("removed server {}", address);
        }
        removed
    }

    /// Registered servers in insertion order.
    pub fn servers(&self) -> Vec<Arc<Server>> {
        self.servers.read().clone()
    }

    /// Pick a server with the configured strategy.
    pub fn get_server(&self) -> Option<Arc<Server>> {
        let candidates = ServerSelector::eligible(&self.servers.read());
        ServerSelector::pick(self.config.strategy, &candidates, &self.counter)
    }

    /// Classify why `get_server` found nothing.
    fn unavailable(&self) -> LoadBalancerError {
        let healthy = self.servers.read().iter().filter(|s| s.is_healthy()).count();
        if healthy > 0 {
            tracing::warn!("all {} healthy servers saturated", healthy);
            LoadBalancerError::AllSaturated
        } else {
            tracing::warn!("no healthy servers available");
            LoadBalancerError::NoHealthyServers
        }
    }

    /// Send a request through the load balancer.
    ///
    /// Returns `Err(NoHealthyServers)` when every server is down, and
    /// `Err(AllSaturated)` when healthy servers exist but are all at their
    /// connection limit.
    /// An upstream failure is recorded against the chosen server; it is
    /// returned as `Ok(None)`, or as `Err(Upstream)` in strict mode.
    pub async fn make_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<UpstreamResponse>, LoadBalancerError> {
        let Some(server) = self.get_server() else {
            return Err(self.unavailable());
        };

        let _in_flight = server.track_request();
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let url = join_url(&server.base_url(), path);
        let start = Instant::now();

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let outcome = match request.send().await {
            Ok(resp) if resp.status().is_success() => read_body(resp).await,
            Ok(resp) => Err(format!("unexpected status {}", resp.status())),
            Err(e) if e.is_timeout() => Err("request timeout".to_string()),
            Err(e) => Err(e.to_string()),
        };
        let elapsed = start.elapsed();

        match outcome {
            Ok((status, body)) => {
                server.record_success(elapsed);
                tracing::debug!("{} answered {} in {:?}", server.address(), status, elapsed);
                Ok(Some(UpstreamResponse {
                    server: server.address().to_string(),
                    status,
                    body,
                    elapsed,
                }))
            }
            Err(reason) => {
                if server.record_failure(self.config.max_errors) {
                    tracing::warn!(
                        "server {} marked unhealthy after {} errors",
                        server.address(),
                        server.error_count()
                    );
                }
                tracing::error!("request to {} failed: {}", url, reason);

                if self.config.strict {
                    Err(LoadBalancerError::Upstream {
                        address: server.address().to_string(),
                        reason,
                    })
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Check every server once and update health flags.
    pub async fn health_check(&self) -> HealthReport {
        let servers = self.servers();
        self.health_checker.check_all(&servers).await
    }

    /// Run `health_check` every `health_check_interval` until shutdown.
    /// The first round runs immediately. A zero interval is raised to
    /// `MIN_TASK_INTERVAL`.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub fn start_health_checks(self: &Arc<Self>, shutdown: &ShutdownController) -> JoinHandle<()> {
        let lb = Arc::clone(self);
        let shutdown = shutdown.clone();
        let interval = self.config.health_check_interval.max(MIN_TASK_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        lb.health_check().await;
                    }
                    _ = shutdown.wait() => {
                        tracing::info!("health checks stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Read-only snapshot of balancer and per-server counters.
    pub fn get_stats(&self) -> LoadBalancerStats {
        let servers = self.servers.read();
        let snapshots: Vec<ServerStats> = servers.iter().map(|s| s.snapshot()).collect();

        LoadBalancerStats {
            strategy: self.config.strategy,
            total_servers: snapshots.len(),
            healthy_servers: snapshots.iter().filter(|s| s.healthy).count(),
            total_connections: snapshots.iter().map(|s| s.current_connections).sum(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            servers: snapshots,
        }
    }

    /// Zero request counters on the balancer and every server.
    pub fn reset_stats(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        for server in self.servers.read().iter() {
            server.reset_counters();
        }
        tracing::info!("load balancer stats reset");
    }
}
