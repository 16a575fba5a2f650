//! Domain Entities - Core business objects
//!
//! These entities represent the upstream servers the load balancer routes to.
//! Counters are atomics so they can be mutated from concurrent requests
//! without holding the registry lock.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Small constant keeping the health score finite for fresh servers.
pub const RESPONSE_TIME_EPSILON: f64 = 0.001;

/// Default per-server connection cap.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// An upstream server that can receive requests.
///
/// Identity (address, weight, limits) is immutable after registration.
/// Health and traffic counters are updated atomically by requests and
/// by the health-check loop.
#[derive(Debug)]
pub struct Server {
    /// Base address, e.g. `http://10.0.0.5:8080` or `10.0.0.5:8080`
    address: String,
    /// Relative weight for weighted selection (always >= 1)
    weight: u32,
    /// Maximum in-flight requests (0 = unlimited)
    max_connections: usize,
    /// Requests currently in flight
    current_connections: AtomicUsize,
    /// Last observed response time, stored as f64 bits (seconds)
    response_time_bits: AtomicU64,
    /// Whether the server is eligible for selection
    healthy: AtomicBool,
    /// Failed requests since the last recovery
    error_count: AtomicU64,
    /// Successful requests since the last recovery
    success_count: AtomicU64,
    /// Last health check (ms since UNIX epoch, 0 = never)
    last_health_check_ms: AtomicU64,
}

impl Server {
    /// Create a healthy server with weight 1.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            weight: 1,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            current_connections: AtomicUsize::new(0),
            response_time_bits: AtomicU64::new(0f64.to_bits()),
            healthy: AtomicBool::new(true),
            error_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_health_check_ms: AtomicU64::new(0),
        }
    }

    /// Set the selection weight. Zero is clamped to 1.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    /// Set the in-flight request cap. Zero disables the cap.
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Base URL for HTTP calls. Bare `host:port` addresses get `http://`.
    pub fn base_url(&self) -> String {
        let trimmed = self.address.trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }

    pub fn current_connections(&self) -> usize {
        self.current_connections.load(Ordering::SeqCst)
    }

    pub fn response_time(&self) -> f64 {
        f64::from_bits(self.response_time_bits.load(Ordering::Relaxed))
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    /// Whether the server reached its in-flight cap.
    pub fn is_saturated(&self) -> bool {
        self.max_connections > 0 && self.current_connections() >= self.max_connections
    }

    /// Fraction of failed requests since the last recovery.
    pub fn error_rate(&self) -> f64 {
        let errors = self.error_count() as f64;
        let total = (self.success_count() + self.error_count()).max(1) as f64;
        errors / total
    }

    /// Composite health score. Higher is better.
    ///
    /// `(1 / (response_time + ε)) * (1 - error_rate) * (1 / (connections + 1))`
    pub fn health_score(&self) -> f64 {
        let latency_factor = 1.0 / (self.response_time() + RESPONSE_TIME_EPSILON);
        let reliability = 1.0 - self.error_rate();
        let load_factor = 1.0 / (self.current_connections() as f64 + 1.0);
        latency_factor * reliability * load_factor
    }

    /// Mark a request as started. The returned guard ends it on drop.
    pub fn track_request(self: &Arc<Self>) -> RequestGuard {
        self.current_connections.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            server: Arc::clone(self),
        }
    }

    fn end_request(&self) {
        // compare_exchange loop prevents underflow
        let mut current = self.current_connections.load(Ordering::SeqCst);
        while current > 0 {
            match self.current_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Record a successful request and its elapsed time.
    pub fn record_success(&self, elapsed: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.response_time_bits
            .store(elapsed.as_secs_f64().to_bits(), Ordering::Relaxed);
    }

    /// Record a failed request.
    ///
    /// Returns true when this failure took the server out of rotation.
    pub fn record_failure(&self, max_errors: u64) -> bool {
        let errors = self.error_count.fetch_add(1, Ordering::Relaxed) + 1;
        if errors >= max_errors.max(1) {
            return self.healthy.swap(false, Ordering::SeqCst);
        }
        false
    }

    /// Apply a passing health check.
    ///
    /// Returns true when the server recovered from an unhealthy state.
    pub fn mark_healthy(&self) -> bool {
        self.error_count.store(0, Ordering::Relaxed);
        let recovered = !self.healthy.swap(true, Ordering::SeqCst);
        if recovered {
            self.success_count.store(0, Ordering::Relaxed);
        }
        recovered
    }

    /// Apply a failing health check.
    ///
    /// Returns true when the server was healthy before.
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::SeqCst)
    }

    /// Stamp the time of the latest health check.
    pub fn touch_health_check(&self) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.last_health_check_ms.store(now_ms.max(1), Ordering::Relaxed);
    }

    /// Time of the latest health check, if any ran.
    pub fn last_health_check(&self) -> Option<SystemTime> {
        match self.last_health_check_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(UNIX_EPOCH + Duration::from_millis(ms)),
        }
    }

    /// Reset traffic counters. Health and in-flight state are untouched.
    pub fn reset_counters(&self) {
        self.error_count.store(0, Ordering::Relaxed);
        self.success_count.store(0, Ordering::Relaxed);
        self.response_time_bits.store(0f64.to_bits(), Ordering::Relaxed);
    }

    /// Read-only snapshot for stats reporting.
    pub fn snapshot(&self) -> ServerStats {
        ServerStats {
            address: self.address.clone(),
            weight: self.weight,
            max_connections: self.max_connections,
            healthy: self.is_healthy(),
            current_connections: self.current_connections(),
            response_time: self.response_time(),
            error_count: self.error_count(),
            success_count: self.success_count(),
            error_rate: self.error_rate(),
            last_health_check_ms: match self.last_health_check_ms.load(Ordering::Relaxed) {
                0 => None,
                ms => Some(ms),
            },
        }
    }
}

/// RAII guard for an in-flight request.
///
/// Decrements the server's connection count exactly once when dropped,
/// whether the request succeeded, failed, or its future was cancelled.
#[derive(Debug)]
pub struct RequestGuard {
    server: Arc<Server>,
}

impl RequestGuard {
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.server.end_request();
    }
}

/// Per-server statistics snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStats {
    pub address: String,
    pub weight: u32,
    pub max_connections: usize,
    pub healthy: bool,
    pub current_connections: usize,
    pub response_time: f64,
    pub error_count: u64,
    pub success_count: u64,
    pub error_rate: f64,
    pub last_health_check_ms: Option<u64>,
}
