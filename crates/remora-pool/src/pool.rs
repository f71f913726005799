//! Connection pool: one authenticated session per descriptor, shared by
//! reference-counted leases. Provides idle eviction and a maintenance task.

use remora_core::{
    ConnectionDescriptor, EngineError, EngineResult, ProtocolClient, ResolvedCredentials,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    /// Sessions unused for longer than this are closed.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// How often the maintenance task runs eviction.
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    45
}
fn default_maintenance_interval_secs() -> u64 {
    15
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub total_sessions: u32,
    /// Sessions with at least one outstanding lease.
    pub active_sessions: u32,
    pub idle_sessions: u32,
    pub unhealthy_sessions: u32,
    /// Sessions opened over the pool's lifetime.
    pub sessions_created: u64,
}

struct PoolEntry<S> {
    descriptor: ConnectionDescriptor,
    session: Mutex<Option<S>>,
    /// Incremented only under the pool lock; decremented by lease drop.
    ref_count: AtomicUsize,
    healthy: AtomicBool,
    last_used: std::sync::Mutex<Instant>,
}

impl<S> PoolEntry<S> {
    fn new(descriptor: ConnectionDescriptor, session: S) -> Self {
        Self {
            descriptor,
            session: Mutex::new(Some(session)),
            ref_count: AtomicUsize::new(0),
            healthy: AtomicBool::new(true),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        let mut last = self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        *last = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last = self.last_used.lock().unwrap_or_else(|p| p.into_inner());
        now.saturating_duration_since(*last)
    }

    fn refs(&self) -> usize {
        self.ref_count.load(Ordering::SeqCst)
    }
}

/// Checked-out session. Dropping the lease releases it.
pub struct SessionLease<C: ProtocolClient> {
    entry: Arc<PoolEntry<C::Session>>,
}

impl<C: ProtocolClient> SessionLease<C> {
    fn checkout(entry: Arc<PoolEntry<C::Session>>) -> Self {
        entry.ref_count.fetch_add(1, Ordering::SeqCst);
        entry.touch();
        Self { entry }
    }

    /// Exclusive access to the session for one command sequence.
    pub async fn lock(&self) -> EngineResult<MappedMutexGuard<'_, C::Session>> {
        let guard = self.entry.session.lock().await;
        MutexGuard::try_map(guard, |s| s.as_mut())
            .map_err(|_| EngineError::network(format!("Session to {} was closed", self.entry.descriptor)))
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.entry.descriptor
    }

    /// Force the pool to replace this session on the next acquire.
    pub fn mark_unhealthy(&self) {
        if self.entry.healthy.swap(false, Ordering::SeqCst) {
            log::debug!("Session {} marked unhealthy", self.entry.descriptor);
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.entry.healthy.load(Ordering::SeqCst)
    }

    /// Explicit release; equivalent to dropping the lease.
    pub fn release(self) {}
}

impl<C: ProtocolClient> Drop for SessionLease<C> {
    fn drop(&mut self) {
        self.entry.touch();
        let _ = self
            .entry
            .ref_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Thread-safe pool of sessions for one protocol client.
pub struct ConnectionPool<C: ProtocolClient> {
    client: Arc<C>,
    config: PoolConfig,
    entries: Mutex<HashMap<String, Arc<PoolEntry<C::Session>>>>,
    created: AtomicU64,
}

impl<C: ProtocolClient> ConnectionPool<C> {
    pub fn new(client: Arc<C>, config: PoolConfig) -> Self {
        Self {
            client,
            config,
            entries: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Reuse the descriptor's session if it is healthy, otherwise open a new
    /// one. The pool lock is held across the handshake.
    pub async fn acquire(
        &self,
        descriptor: &ConnectionDescriptor,
        credentials: &ResolvedCredentials,
    ) -> EngineResult<SessionLease<C>> {
        let key = descriptor.pool_key();
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(&key).cloned() {
            if self.is_reusable(&entry).await {
                return Ok(SessionLease::checkout(entry));
            }
            log::info!("Replacing stale {} session {}", self.client.protocol(), descriptor);
            entries.remove(&key);
            self.retire(entry).await;
        }

        log::info!("Opening {} session {}", self.client.protocol(), descriptor);
        let session = self.client.connect(descriptor, credentials).await.map_err(|e| {
            log::warn!("Connect to {} failed: {}", descriptor, e);
            e
        })?;
        let entry = Arc::new(PoolEntry::new(descriptor.clone(), session));
        entries.insert(key, entry.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(SessionLease::checkout(entry))
    }

    async fn is_reusable(&self, entry: &PoolEntry<C::Session>) -> bool {
        if !entry.healthy.load(Ordering::SeqCst) {
            return false;
        }
        let Ok(mut guard) = entry.session.try_lock() else {
            // Busy in another caller's hands.
            return true;
        };
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if !self.client.is_healthy(session) {
            return false;
        }
        if entry.refs() > 0 {
            return true;
        }
        let alive = self.client.probe(session).await;
        if !alive {
            log::debug!("Liveness probe failed for {}", entry.descriptor);
        }
        alive
    }

    /// Close a session that has been removed from the map. Sessions still
    /// leased elsewhere are dropped by their last holder instead.
    async fn retire(&self, entry: Arc<PoolEntry<C::Session>>) {
        entry.healthy.store(false, Ordering::SeqCst);
        if entry.refs() > 0 {
            return;
        }
        let session = match entry.session.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(session) = session {
            self.client.close(session).await;
        }
    }

    /// Close sessions with no leases that have been idle past the threshold,
    /// and unleased sessions already known to be broken.
    pub async fn evict_idle(&self) -> usize {
        let threshold = self.config.idle_timeout();
        let now = Instant::now();
        let evicted: Vec<_> = {
            let mut entries = self.entries.lock().await;
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, e)| {
                    e.refs() == 0
                        && (e.idle_for(now) >= threshold || !e.healthy.load(Ordering::SeqCst))
                })
                .map(|(k, _)| k.clone())
                .collect();
            stale.iter().filter_map(|k| entries.remove(k)).collect()
        };

        let count = evicted.len();
        for entry in evicted {
            log::debug!("Evicting idle session {}", entry.descriptor);
            self.retire(entry).await;
        }
        if count > 0 {
            log::info!("{} pool: evicted {} idle session(s)", self.client.protocol(), count);
        }
        count
    }

    /// Close every session. Outstanding leases keep working on their
    /// session until dropped, but it is never handed out again.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut entries = self.entries.lock().await;
            entries.drain().map(|(_, e)| e).collect()
        };
        let count = drained.len();
        for entry in drained {
            self.retire(entry).await;
        }
        if count > 0 {
            log::info!("{} pool: closed {} session(s)", self.client.protocol(), count);
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let entries = self.entries.lock().await;
        let total = entries.len() as u32;
        let active = entries.values().filter(|e| e.refs() > 0).count() as u32;
        let unhealthy = entries
            .values()
            .filter(|e| !e.healthy.load(Ordering::SeqCst))
            .count() as u32;
        PoolStats {
            total_sessions: total,
            active_sessions: active,
            idle_sessions: total - active,
            unhealthy_sessions: unhealthy,
            sessions_created: self.created.load(Ordering::SeqCst),
        }
    }

    /// Outstanding leases for a descriptor, `None` if it has no session.
    pub async fn ref_count(&self, descriptor: &ConnectionDescriptor) -> Option<usize> {
        let entries = self.entries.lock().await;
        entries.get(&descriptor.pool_key()).map(|e| e.refs())
    }
}

/// Spawn a background task that periodically evicts idle sessions until
/// `shutdown` is cancelled.
pub fn spawn_maintenance<C: ProtocolClient>(
    pool: Arc<ConnectionPool<C>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(pool.config().maintenance_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    pool.evict_idle().await;
                }
            }
        }
        log::debug!("{} pool maintenance stopped", pool.client().protocol());
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{descriptor, FakeClient};

    fn pool_with(client: FakeClient, idle_secs: u64) -> Arc<ConnectionPool<FakeClient>> {
        Arc::new(ConnectionPool::new(
            Arc::new(client),
            PoolConfig {
                idle_timeout_secs: idle_secs,
                maintenance_interval_secs: 1,
            },
        ))
    }

    fn creds() -> ResolvedCredentials {
        ResolvedCredentials::password("user", "pw")
    }

    #[tokio::test]
    async fn concurrent_acquire_creates_one_session() {
        let pool = pool_with(FakeClient::with_connect_delay(Duration::from_millis(20)), 45);
        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let lease = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
                let id = lease.lock().await.unwrap().id;
                id
            }));
        }
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap());
        }
        assert!(ids.iter().all(|id| *id == 1));
        assert_eq!(pool.client().connects.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(&descriptor("h")).await, Some(0));
    }

    #[tokio::test]
    async fn ref_count_tracks_leases() {
        let pool = pool_with(FakeClient::new(), 45);
        let a = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        let b = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        assert_eq!(pool.ref_count(&descriptor("h")).await, Some(2));
        drop(a);
        assert_eq!(pool.ref_count(&descriptor("h")).await, Some(1));
        b.release();
        assert_eq!(pool.ref_count(&descriptor("h")).await, Some(0));
        assert_eq!(pool.stats().await.idle_sessions, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_kept_until_threshold() {
        let pool = pool_with(FakeClient::new(), 3600);
        let lease = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        drop(lease);
        assert_eq!(pool.evict_idle().await, 0);
        assert_eq!(pool.stats().await.total_sessions, 1);

        let pool = pool_with(FakeClient::new(), 0);
        let held = pool.acquire(&descriptor("busy"), &creds()).await.unwrap();
        drop(pool.acquire(&descriptor("idle"), &creds()).await.unwrap());
        assert_eq!(pool.evict_idle().await, 1);
        assert_eq!(pool.client().closes.load(Ordering::SeqCst), 1);
        assert_eq!(pool.ref_count(&descriptor("busy")).await, Some(1));
        drop(held);
    }

    #[tokio::test]
    async fn unhealthy_session_is_replaced() {
        let pool = pool_with(FakeClient::new(), 45);
        let lease = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        lease.mark_unhealthy();
        drop(lease);

        let lease = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        assert_eq!(lease.lock().await.unwrap().id, 2);
        assert_eq!(pool.client().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_probe_on_idle_session_reconnects() {
        let pool = pool_with(FakeClient::new(), 45);
        drop(pool.acquire(&descriptor("h"), &creds()).await.unwrap());
        pool.client().probe_ok.store(false, Ordering::SeqCst);

        let lease = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        assert_eq!(lease.lock().await.unwrap().id, 2);
        assert_eq!(pool.client().probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn busy_session_is_trusted_without_probe() {
        let pool = pool_with(FakeClient::new(), 45);
        let first = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        let _guard = first.lock().await.unwrap();
        let second = pool.acquire(&descriptor("h"), &creds()).await.unwrap();
        assert_eq!(pool.client().probes.load(Ordering::SeqCst), 0);
        assert_eq!(pool.client().connects.load(Ordering::SeqCst), 1);
        drop(second);
    }

    #[tokio::test]
    async fn connect_errors_propagate_and_leave_no_entry() {
        let pool = pool_with(FakeClient::new(), 45);
        let err = pool
            .acquire(&descriptor("unreachable"), &creds())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, remora_core::ErrorKind::NetworkUnreachable);
        assert_eq!(pool.stats().await.total_sessions, 0);
    }

    #[tokio::test]
    async fn close_all_tears_down_everything() {
        let pool = pool_with(FakeClient::new(), 45);
        drop(pool.acquire(&descriptor("a"), &creds()).await.unwrap());
        drop(pool.acquire(&descriptor("b"), &creds()).await.unwrap());
        pool.close_all().await;
        assert_eq!(pool.stats().await.total_sessions, 0);
        assert_eq!(pool.client().closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn maintenance_task_stops_on_cancel() {
        let pool = pool_with(FakeClient::new(), 0);
        drop(pool.acquire(&descriptor("h"), &creds()).await.unwrap());
        let token = CancellationToken::new();
        let handle = spawn_maintenance(pool.clone(), token.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().await.total_sessions, 0);
        token.cancel();
        handle.await.unwrap();
    }
}
