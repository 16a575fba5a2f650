//! Active Health Checker
//!
//! Checks upstream servers over HTTP and updates their health flags.

use crate::domain::entities::Server;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Interval between health check rounds
    pub interval: Duration,
    /// Timeout for each check
    pub timeout: Duration,
    /// Path requested on every server
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            path: "/health".to_string(),
        }
    }
}

/// Result of a health check.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthCheckResult {
    Success { latency_ms: u64 },
    Failure { error: String, latency_ms: u64 },
}

impl HealthCheckResult {
    pub fn is_success(&self) -> bool {
        matches!(self, HealthCheckResult::Success { .. })
    }
}

/// Summary of one health check round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub checked: usize,
    pub healthy: usize,
    /// Servers that changed state during this round
    pub recovered: Vec<String>,
    pub failed: Vec<String>,
}

/// HTTP health checker for upstream servers.
pub struct HealthChecker {
    config: HealthCheckConfig,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(config: HealthCheckConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Check every server concurrently and apply the results.
    pub async fn check_all(&self, servers: &[Arc<Server>]) -> HealthReport {
        let mut checks = JoinSet::new();
        for server in servers {
            let server = Arc::clone(server);
            let config = self.config.clone();
            checks.spawn(async move {
                let result = Self::check_server(&server, &config).await;
                (server, result)
            });
        }

        let mut report = HealthReport::default();
        while let Some(joined) = checks.join_next().await {
            let (server, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!("health check task failed: {}", e);
                    continue;
                }
            };
            report.checked += 1;
            Self::apply(&server, &result, &mut report);
        }

        tracing::debug!(
            "health check round: {}/{} healthy",
            report.healthy,
            report.checked
        );
        report
    }

    /// Check a single server (also used directly by tests).
    pub async fn check_once(&self, server: &Server) -> HealthCheckResult {
        Self::check_server(server, &self.config).await
    }

    async fn check_server(server: &Server, config: &HealthCheckConfig) -> HealthCheckResult {
        let url = format!("{}{}", server.base_url(), config.path);
        let start = Instant::now();
        let result = Self::http_check(&url, config.timeout).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => HealthCheckResult::Success { latency_ms },
            Err(error) => HealthCheckResult::Failure { error, latency_ms },
        }
    }

    /// HTTP health check; only 200 counts as healthy.
    async fn http_check(url: &str, timeout: Duration) -> Result<(), String> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("client error: {}", e))?;

        match client.get(url).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => Ok(()),
            Ok(resp) => Err(format!("unhealthy status: {}", resp.status())),
            Err(e) if e.is_timeout() => Err("health check timeout".to_string()),
            Err(e) => Err(format!("request failed: {}", e)),
        }
    }

    fn apply(server: &Server, result: &HealthCheckResult, report: &mut HealthReport) {
        server.touch_health_check();
        match result {
            HealthCheckResult::Success { latency_ms } => {
                report.healthy += 1;
                if server.mark_healthy() {
                    tracing::info!(
                        "server {} is now healthy ({}ms)",
                        server.address(),
                        latency_ms
                    );
                    report.recovered.push(server.address().to_string());
                }
            }
            HealthCheckResult::Failure { error, .. } => {
                if server.mark_unhealthy() {
                    tracing::warn!("server {} is now unhealthy: {}", server.address(), error);
                    report.failed.push(server.address().to_string());
                } else {
                    tracing::debug!("server {} still unhealthy: {}", server.address(), error);
                }
            }
        }
    }
}
