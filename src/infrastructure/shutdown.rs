//! Graceful Shutdown Handler
//!
//! Coordinates shutdown of background workers (health-check loop, cache
//! sweeper) and the stats server.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Floor for periodic background tasks; `tokio::time::interval` rejects zero.
pub const MIN_TASK_INTERVAL: Duration = Duration::from_millis(10);

/// Shutdown coordinator for graceful termination.
///
/// Background workers subscribe (or call [`ShutdownController::wait`]) and
/// register their join handles so shutdown can wait for them to finish.
#[derive(Clone)]
pub struct ShutdownController {
    /// Whether shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Broadcast channel for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Registered background workers
    tasks: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
}

impl ShutdownController {
    /// Create a new shutdown controller.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolve once shutdown has been initiated, even if that happened
    /// before this call.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Initiate graceful shutdown.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
        }
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Register a background worker to be awaited on shutdown.
    pub fn track(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks.lock().push((name.into(), handle));
    }

    /// Number of registered workers that have not finished yet.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Wait for registered workers to stop (with timeout).
    ///
    /// Workers still running when the timeout expires are aborted.
    /// Returns `true` when every worker stopped on its own.
    pub async fn wait_for_tasks(&self, timeout: Duration) -> bool {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;

        for (name, mut handle) in tasks {
            tokio::select! {
                _ = &mut handle => {
                    tracing::debug!("worker {} stopped", name);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("worker {} did not stop in time, aborting", name);
                    handle.abort();
                    clean = false;
                }
            }
        }
        clean
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Install signal handlers for graceful shutdown.
///
/// Returns a future that completes when a shutdown signal is received or
/// shutdown was initiated elsewhere.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
        _ = controller.wait() => {}
    }

    controller.shutdown();
}
