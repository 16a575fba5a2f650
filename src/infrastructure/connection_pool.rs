//! Connection Pool
//!
//! Bounds and reuses expensive resources (database handles, HTTP sessions).
//! Callers never own a pooled resource; they hold a [`PoolLease`] that puts
//! the entry back when dropped.

pub use crate::domain::ports::PoolError;

use crate::domain::ports::ConnectionFactory;
use crate::domain::value_objects::PoolState;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created eagerly by `initialize`
    pub min_connections: usize,
    /// Hard cap on pooled connections
    pub max_connections: usize,
    /// Maximum wait for a lease, also bounds connection setup
    pub timeout: Duration,
    /// Total attempts for retried operations
    pub retry_attempts: u32,
    /// Base backoff; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
    /// Idle connections older than this are closed instead of reused
    pub max_idle_time: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 5,
            max_connections: 20,
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_idle_time: Duration::from_secs(300),
        }
    }
}

/// A pooled resource plus its bookkeeping.
pub struct PoolEntry<C> {
    id: Uuid,
    conn: C,
    created_at: Instant,
    last_used: Instant,
}

impl<C> PoolEntry<C> {
    fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4(),
            conn,
            created_at: now,
            last_used: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Check if this entry has been idle too long.
    pub fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}

struct PoolInner<C> {
    state: PoolState,
    available: VecDeque<PoolEntry<C>>,
    checked_out: HashSet<Uuid>,
}

struct PoolShared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    inner: Mutex<PoolInner<F::Connection>>,
    /// One permit per lease; FIFO wake-up for waiting callers
    slots: Arc<Semaphore>,
    init_lock: tokio::sync::Mutex<()>,
    created_total: AtomicU64,
    reused_total: AtomicU64,
}

impl<F: ConnectionFactory> PoolShared<F> {
    /// Put an entry back. Returns it when the pool is closed so the caller
    /// can dispose of it.
    fn give_back(&self, mut entry: PoolEntry<F::Connection>) -> Option<PoolEntry<F::Connection>> {
        let mut inner = self.inner.lock();
        if !inner.checked_out.remove(&entry.id) {
            tracing::warn!(
                "pool {}: release of entry {} that was not checked out",
                self.factory.target(),
                entry.id
            );
            return None;
        }
        if inner.state == PoolState::Closed {
            return Some(entry);
        }
        entry.touch();
        inner.available.push_back(entry);
        None
    }

    fn forget(&self, id: &Uuid) {
        self.inner.lock().checked_out.remove(id);
    }
}

/// Bounded pool of connections produced by a [`ConnectionFactory`].
///
/// Lifecycle: `Uninitialized → Initializing → Active → Closed`.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create an uninitialized pool.
    pub fn new(factory: F, mut config: PoolConfig) -> Self {
        config.max_connections = config.max_connections.max(1);
        config.min_connections = config.min_connections.min(config.max_connections);

        Self {
            shared: Arc::new(PoolShared {
                factory,
                inner: Mutex::new(PoolInner {
                    state: PoolState::Uninitialized,
                    available: VecDeque::new(),
                    checked_out: HashSet::new(),
                }),
                slots: Arc::new(Semaphore::new(config.max_connections)),
                init_lock: tokio::sync::Mutex::new(()),
                created_total: AtomicU64::new(0),
                reused_total: AtomicU64::new(0),
                config,
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    pub fn state(&self) -> PoolState {
        self.shared.inner.lock().state
    }

    /// Eagerly create `min_connections` entries and activate the pool.
    ///
    /// Idempotent: an active pool is left as is. Concurrent callers are
    /// serialized so warm-up never runs twice.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let _init = self.shared.init_lock.lock().await;

        {
            let mut inner = self.shared.inner.lock();
            match inner.state {
                PoolState::Active => return Ok(()),
                PoolState::Closed => return Err(PoolError::Closed),
                PoolState::Uninitialized | PoolState::Initializing => {
                    inner.state = PoolState::Initializing;
                }
            }
        }

        let target = self.shared.factory.target().to_string();
        let mut created = Vec::with_capacity(self.shared.config.min_connections);

        for _ in 0..self.shared.config.min_connections {
            match self.connect().await {
                Ok(conn) => created.push(PoolEntry::new(conn)),
                Err(e) => {
                    tracing::error!("pool {}: warm-up failed: {}", target, e);
                    for entry in created {
                        self.shared.factory.close(entry.conn).await;
                    }
                    let mut inner = self.shared.inner.lock();
                    if inner.state == PoolState::Initializing {
                        inner.state = PoolState::Uninitialized;
                    }
                    return Err(e);
                }
            }
        }

        let count = created.len();
        let leftover = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PoolState::Closed {
                created
            } else {
                inner.available.extend(created);
                inner.state = PoolState::Active;
                Vec::new()
            }
        };

        if !leftover.is_empty() {
            for entry in leftover {
                self.shared.factory.close(entry.conn).await;
            }
            return Err(PoolError::Closed);
        }

        tracing::info!(
            "pool {} initialized with {} connections (max {})",
            target,
            count,
            self.shared.config.max_connections
        );
        Ok(())
    }

    async fn connect(&self) -> Result<F::Connection, PoolError> {
        let conn = match tokio::time::timeout(
            self.shared.config.timeout,
            self.shared.factory.connect(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PoolError::Timeout(self.shared.config.timeout)),
        };
        self.shared.created_total.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn ensure_active(&self) -> Result<(), PoolError> {
        match self.state() {
            PoolState::Active => Ok(()),
            PoolState::Closed => Err(PoolError::Closed),
            PoolState::Uninitialized | PoolState::Initializing => Err(PoolError::NotInitialized),
        }
    }

    /// Acquire a connection lease.
    ///
    /// Reuses an idle entry when one exists, otherwise opens a new one.
    /// When `max_connections` leases are out, waits up to `timeout` for one
    /// to come back.
    pub async fn acquire(&self) -> Result<PoolLease<F>, PoolError> {
        self.ensure_active()?;

        let timeout = self.shared.config.timeout;
        let permit = match tokio::time::timeout(timeout, self.shared.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                tracing::warn!(
                    "pool {}: no connection available after {:?}",
                    self.shared.factory.target(),
                    timeout
                );
                return Err(PoolError::Timeout(timeout));
            }
        };

        let mut stale = Vec::new();
        let reused = {
            let mut inner = self.shared.inner.lock();
            if inner.state != PoolState::Active {
                return Err(PoolError::Closed);
            }
            let mut found = None;
            while let Some(mut entry) = inner.available.pop_front() {
                if entry.is_idle_expired(self.shared.config.max_idle_time) {
                    stale.push(entry);
                    continue;
                }
                entry.touch();
                inner.checked_out.insert(entry.id);
                found = Some(entry);
                break;
            }
            found
        };

        for entry in stale {
            tracing::debug!(
                "pool {}: discarding idle connection {}",
                self.shared.factory.target(),
                entry.id
            );
            self.shared.factory.close(entry.conn).await;
        }

        if let Some(entry) = reused {
            self.shared.reused_total.fetch_add(1, Ordering::Relaxed);
            return Ok(PoolLease::new(entry, Arc::clone(&self.shared), permit));
        }

        let entry = PoolEntry::new(self.connect().await?);
        let closed = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PoolState::Closed {
                true
            } else {
                inner.checked_out.insert(entry.id);
                false
            }
        };
        if closed {
            self.shared.factory.close(entry.conn).await;
            return Err(PoolError::Closed);
        }

        tracing::debug!(
            "pool {}: opened connection {}",
            self.shared.factory.target(),
            entry.id
        );
        Ok(PoolLease::new(entry, Arc::clone(&self.shared), permit))
    }

    /// Close every idle connection and refuse further leases.
    ///
    /// Waiting and future `acquire` calls fail with [`PoolError::Closed`].
    /// Leases still out are dropped when they come back.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut inner = self.shared.inner.lock();
            if inner.state == PoolState::Closed {
                return;
            }
            inner.state = PoolState::Closed;
            inner.available.drain(..).collect()
        };
        self.shared.slots.close();

        let count = drained.len();
        for entry in drained {
            self.shared.factory.close(entry.conn).await;
        }
        tracing::info!(
            "pool {} closed ({} idle connections closed)",
            self.shared.factory.target(),
            count
        );
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.inner.lock();
        PoolStats {
            target: self.shared.factory.target().to_string(),
            state: inner.state,
            size: inner.available.len() + inner.checked_out.len(),
            available: inner.available.len(),
            checked_out: inner.checked_out.len(),
            min_connections: self.shared.config.min_connections,
            max_connections: self.shared.config.max_connections,
            created_total: self.shared.created_total.load(Ordering::Relaxed),
            reused_total: self.shared.reused_total.load(Ordering::Relaxed),
        }
    }
}

/// Temporary ownership of a pooled connection.
///
/// Dereferences to the connection. Dropping the lease returns the entry to
/// the pool, so release happens on every exit path.
pub struct PoolLease<F: ConnectionFactory> {
    entry: Option<PoolEntry<F::Connection>>,
    shared: Arc<PoolShared<F>>,
    // Dropped after `entry` is returned so a woken waiter finds it
    _permit: OwnedSemaphorePermit,
}

impl<F: ConnectionFactory> PoolLease<F> {
    fn new(
        entry: PoolEntry<F::Connection>,
        shared: Arc<PoolShared<F>>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            entry: Some(entry),
            shared,
            _permit: permit,
        }
    }

    /// Identifier of the underlying pool entry.
    pub fn id(&self) -> Option<Uuid> {
        self.entry.as_ref().map(|e| e.id)
    }

    /// Return the connection to the pool.
    pub async fn release(mut self) {
        if let Some(entry) = self.entry.take() {
            if let Some(entry) = self.shared.give_back(entry) {
                self.shared.factory.close(entry.conn).await;
            }
        }
    }

    /// Close the connection instead of returning it (e.g. it is broken).
    pub async fn discard(mut self) {
        if let Some(entry) = self.entry.take() {
            self.shared.forget(&entry.id);
            tracing::debug!(
                "pool {}: discarded connection {}",
                self.shared.factory.target(),
                entry.id
            );
            self.shared.factory.close(entry.conn).await;
        }
    }
}

impl<F: ConnectionFactory> Deref for PoolLease<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.entry {
            Some(entry) => &entry.conn,
            None => unreachable!("pool lease used after release"),
        }
    }
}

impl<F: ConnectionFactory> DerefMut for PoolLease<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.entry {
            Some(entry) => &mut entry.conn,
            None => unreachable!("pool lease used after release"),
        }
    }
}

impl<F: ConnectionFactory> Drop for PoolLease<F> {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        let Some(entry) = self.shared.give_back(entry) else {
            return;
        };
        // Pool closed while leased: close through the factory if we can
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    shared.factory.close(entry.conn).await;
                });
            }
            Err(_) => drop(entry),
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub target: String,
    pub state: PoolState,
    /// Entries owned by the pool (available + checked out)
    pub size: usize,
    pub available: usize,
    pub checked_out: usize,
    pub min_connections: usize,
    pub max_connections: usize,
    pub created_total: u64,
    pub reused_total: u64,
}

/// Anything that can report pool statistics.
pub trait PoolStatsSource: Send + Sync {
    fn pool_stats(&self) -> PoolStats;
}

impl<F: ConnectionFactory> PoolStatsSource for Pool<F> {
    fn pool_stats(&self) -> PoolStats {
        self.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Factory handing out numbered fake connections.
    #[derive(Default)]
    struct CountingFactory {
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ConnectionFactory for CountingFactory {
        type Connection = usize;

        fn target(&self) -> &str {
            "memory://test"
        }

        async fn connect(&self) -> Result<usize, PoolError> {
            if self.fail {
                return Err(PoolError::Connect("refused".to_string()));
            }
            Ok(self.opened.fetch_add(1, Ordering::SeqCst))
        }

        async fn close(&self, _conn: usize) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(min: usize, max: usize) -> PoolConfig {
        PoolConfig {
            min_connections: min,
            max_connections: max,
            timeout: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn test_pool_config_default() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_new_clamps_bounds() {
        let pool = Pool::new(CountingFactory::default(), config(10, 0));
        assert_eq!(pool.config().max_connections, 1);
        assert_eq!(pool.config().min_connections, 1);
    }

    #[tokio::test]
    async fn test_initialize_creates_min_connections() {
        let pool = Pool::new(CountingFactory::default(), config(3, 5));
        assert_eq!(pool.state(), PoolState::Uninitialized);

        pool.initialize().await.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.state, PoolState::Active);
        assert_eq!(stats.size, 3);
        assert_eq!(stats.available, 3);
        assert_eq!(stats.checked_out, 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = Pool::new(CountingFactory::default(), config(2, 5));
        pool.initialize().await.unwrap();
        pool.initialize().await.unwrap();
        assert_eq!(pool.stats().size, 2);
        assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_initialize_creates_once() {
        let pool = Pool::new(CountingFactory::default(), config(4, 4));
        let (a, b, c) = tokio::join!(pool.initialize(), pool.initialize(), pool.initialize());
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(pool.factory().opened.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_initialize_failure_resets_state() {
        let factory = CountingFactory {
            fail: true,
            ..Default::default()
        };
        let pool = Pool::new(factory, config(2, 5));
        let result = pool.initialize().await;
        assert!(matches!(result, Err(PoolError::Connect(_))));
        assert_eq!(pool.state(), PoolState::Uninitialized);
    }

    #[tokio::test]
    async fn test_acquire_before_initialize_fails() {
        let pool = Pool::new(CountingFactory::default(), config(1, 2));
        assert!(matches!(pool.acquire().await, Err(PoolError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_entry() {
        let pool = Pool::new(CountingFactory::default(), config(1, 2));
        pool.initialize().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        let first = *lease;
        let first_id = lease.id();
        assert_eq!(pool.stats().checked_out, 1);
        lease.release().await;

        let lease = pool.acquire().await.unwrap();
        assert_eq!(*lease, first);
        assert_eq!(lease.id(), first_id);
        assert_eq!(pool.stats().reused_total, 2);
    }

    #[tokio::test]
    async fn test_acquire_creates_lazily_up_to_max() {
        let pool = Pool::new(CountingFactory::default(), config(0, 3));
        pool.initialize().await.unwrap();
        assert_eq!(pool.stats().size, 0);

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let stats = pool.stats();
        assert_eq!(stats.size, 2);
        assert_eq!(stats.checked_out, 2);
        assert_eq!(stats.available, 0);
    }

    #[tokio::test]
    async fn test_drop_releases_lease() {
        let pool = Pool::new(CountingFactory::default(), config(1, 1));
        pool.initialize().await.unwrap();
        {
            let _lease = pool.acquire().await.unwrap();
            assert_eq!(pool.stats().available, 0);
        }
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().checked_out, 0);
    }

    #[tokio::test]
    async fn test_release_on_error_path() {
        async fn failing_op(pool: &Pool<CountingFactory>) -> Result<(), PoolError> {
            let _lease = pool.acquire().await?;
            Err(PoolError::Query("boom".to_string()))
        }

        let pool = Pool::new(CountingFactory::default(), config(1, 1));
        pool.initialize().await.unwrap();
        assert!(failing_op(&pool).await.is_err());
        assert_eq!(pool.stats().available, 1);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_bound_blocks_extra_caller_until_timeout() {
        let pool = Pool::new(CountingFactory::default(), config(0, 2));
        pool.initialize().await.unwrap();

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();
        let (a, b, c) = tokio::join!(a, b, c);

        let results = [a.is_ok(), b.is_ok(), c.is_ok()];
        assert_eq!(results.iter().filter(|ok| **ok).count(), 2);
        assert!(matches!(c, Err(PoolError::Timeout(_))));
        assert_eq!(pool.stats().size, 2);
    }

    #[tokio::test]
    async fn test_waiter_woken_by_release() {
        let pool = Pool::new(
            CountingFactory::default(),
            PoolConfig {
                min_connections: 1,
                max_connections: 1,
                timeout: Duration::from_secs(2),
                ..Default::default()
            },
        );
        pool.initialize().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|l| *l) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let held = *lease;
        drop(lease);

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, held);
        assert_eq!(pool.stats().size, 1);
    }

    #[tokio::test]
    async fn test_discard_removes_entry() {
        let pool = Pool::new(CountingFactory::default(), config(1, 2));
        pool.initialize().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        lease.discard().await;

        let stats = pool.stats();
        assert_eq!(stats.size, 0);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_expired_entries_are_replaced() {
        let pool = Pool::new(
            CountingFactory::default(),
            PoolConfig {
                min_connections: 1,
                max_connections: 2,
                timeout: Duration::from_millis(100),
                max_idle_time: Duration::from_millis(5),
                ..Default::default()
            },
        );
        pool.initialize().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let lease = pool.acquire().await.unwrap();
        assert_eq!(*lease, 1);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all_fails_fast() {
        let pool = Pool::new(CountingFactory::default(), config(2, 2));
        pool.initialize().await.unwrap();

        pool.close_all().await;
        assert_eq!(pool.state(), PoolState::Closed);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 2);

        let started = Instant::now();
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_close_all_wakes_waiters() {
        let pool = Pool::new(
            CountingFactory::default(),
            PoolConfig {
                min_connections: 1,
                max_connections: 1,
                timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        pool.initialize().await.unwrap();
        let _lease = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close_all().await;

        let result = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_lease_returned_after_close_is_closed() {
        let closed = Arc::new(AtomicUsize::new(0));
        let factory = CountingFactory {
            closed: closed.clone(),
            ..Default::default()
        };
        let pool = Pool::new(factory, config(1, 1));
        pool.initialize().await.unwrap();

        let lease = pool.acquire().await.unwrap();
        pool.close_all().await;
        lease.release().await;

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().size, 0);
    }

    #[tokio::test]
    async fn test_initialize_after_close_fails() {
        let pool = Pool::new(CountingFactory::default(), config(1, 1));
        pool.close_all().await;
        assert!(matches!(pool.initialize().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_stats_source() {
        let pool = Pool::new(CountingFactory::default(), config(1, 4));
        pool.initialize().await.unwrap();
        let source: Arc<dyn PoolStatsSource> = Arc::new(pool.clone());
        let stats = source.pool_stats();
        assert_eq!(stats.target, "memory://test");
        assert_eq!(stats.max_connections, 4);
        assert_eq!(stats.min_connections, 1);
    }
}
