//! Per-protocol and per-resource concurrency limits.
//!
//! Every remote operation takes a [`ThrottleLease`] first: one permit from
//! the gate of its `(protocol, host:port)` pair, then one from the global
//! gate of its protocol. The order is fixed so two callers can never wait on
//! each other's gates.

use crate::gate::{GatePermit, PriorityGate};
use remora_core::{EngineError, EngineResult, Priority, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Limits for one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleLimits {
    /// Concurrent operations against one `host:port`.
    pub per_resource: usize,
    /// Concurrent operations across all hosts.
    pub global: usize,
}

impl ThrottleLimits {
    /// Global limit defaults to twice the per-resource limit.
    pub const fn per_resource(n: usize) -> Self {
        Self {
            per_resource: n,
            global: n * 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleConfig {
    #[serde(default = "default_smb")]
    pub smb: ThrottleLimits,
    #[serde(default = "default_sftp")]
    pub sftp: ThrottleLimits,
    #[serde(default = "default_ftp")]
    pub ftp: ThrottleLimits,
    /// How long to wait for a lease before failing with `Throttled`.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

fn default_smb() -> ThrottleLimits {
    ThrottleLimits::per_resource(4)
}
fn default_sftp() -> ThrottleLimits {
    ThrottleLimits::per_resource(3)
}
fn default_ftp() -> ThrottleLimits {
    ThrottleLimits::per_resource(2)
}
fn default_acquire_timeout_ms() -> u64 {
    30_000
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            smb: default_smb(),
            sftp: default_sftp(),
            ftp: default_ftp(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
        }
    }
}

impl ThrottleConfig {
    pub fn limits(&self, protocol: Protocol) -> ThrottleLimits {
        match protocol {
            Protocol::Smb => self.smb,
            Protocol::Sftp => self.sftp,
            Protocol::Ftp => self.ftp,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Scoped permission to run one operation. Both permits are returned when
/// the lease drops, whichever way the operation ends.
pub struct ThrottleLease {
    _resource: GatePermit,
    _global: GatePermit,
}

/// Snapshot of one gate, for diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStats {
    pub protocol: Protocol,
    /// `None` for the protocol-wide gate.
    pub resource_key: Option<String>,
    pub limit: usize,
    pub in_use: usize,
    pub waiting: usize,
}

pub struct ConnectionThrottleManager {
    config: ThrottleConfig,
    global: HashMap<Protocol, Arc<PriorityGate>>,
    resources: Mutex<HashMap<(Protocol, String), Arc<PriorityGate>>>,
}

impl ConnectionThrottleManager {
    pub fn new(config: ThrottleConfig) -> Self {
        let global = Protocol::ALL
            .iter()
            .map(|p| (*p, PriorityGate::new(config.limits(*p).global)))
            .collect();
        Self {
            config,
            global,
            resources: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Wait for a lease on `protocol` + `resource_key`.
    pub async fn acquire(
        &self,
        protocol: Protocol,
        resource_key: &str,
        priority: Priority,
    ) -> EngineResult<ThrottleLease> {
        let timeout = self.config.acquire_timeout();
        let deadline = Instant::now() + timeout;

        let resource_gate = self.resource_gate(protocol, resource_key);
        let resource = resource_gate.acquire(priority, deadline).await.ok_or_else(|| {
            log::warn!(
                "Throttled: {} {} still at {} concurrent operations after {:?}",
                protocol,
                resource_key,
                resource_gate.limit(),
                timeout
            );
            EngineError::throttled(format!(
                "Too many concurrent {} operations on {}",
                protocol, resource_key
            ))
        })?;

        let global_gate = self.global_gate(protocol)?;
        let global = global_gate.acquire(priority, deadline).await.ok_or_else(|| {
            log::warn!(
                "Throttled: {} global limit {} reached after {:?}",
                protocol,
                global_gate.limit(),
                timeout
            );
            EngineError::throttled(format!("Too many concurrent {} operations", protocol))
        })?;

        Ok(ThrottleLease {
            _resource: resource,
            _global: global,
        })
    }

    /// Run `operation` while holding a lease.
    pub async fn with_throttle<T, F>(
        &self,
        protocol: Protocol,
        resource_key: &str,
        priority: Priority,
        operation: F,
    ) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        let _lease = self.acquire(protocol, resource_key, priority).await?;
        operation.await
    }

    pub fn stats(&self) -> Vec<GateStats> {
        let mut out: Vec<GateStats> = Protocol::ALL
            .iter()
            .filter_map(|p| {
                self.global.get(p).map(|g| GateStats {
                    protocol: *p,
                    resource_key: None,
                    limit: g.limit(),
                    in_use: g.in_use(),
                    waiting: g.waiting(),
                })
            })
            .collect();
        let resources = self.resources.lock().unwrap_or_else(|p| p.into_inner());
        for ((protocol, key), gate) in resources.iter() {
            out.push(GateStats {
                protocol: *protocol,
                resource_key: Some(key.clone()),
                limit: gate.limit(),
                in_use: gate.in_use(),
                waiting: gate.waiting(),
            });
        }
        out
    }

    /// Drop per-resource gates nobody holds or waits on. Every permit and
    /// every pending acquisition keeps its gate alive through an `Arc`, so a
    /// gate referenced only by the map is idle.
    pub fn prune_idle(&self) -> usize {
        let mut resources = self.resources.lock().unwrap_or_else(|p| p.into_inner());
        let before = resources.len();
        resources.retain(|_, gate| Arc::strong_count(gate) > 1);
        let pruned = before - resources.len();
        if pruned > 0 {
            log::debug!("Pruned {} idle throttle gates", pruned);
        }
        pruned
    }

    fn global_gate(&self, protocol: Protocol) -> EngineResult<Arc<PriorityGate>> {
        self.global
            .get(&protocol)
            .cloned()
            .ok_or_else(|| EngineError::unsupported(format!("No throttle gate for {}", protocol)))
    }

    fn resource_gate(&self, protocol: Protocol, resource_key: &str) -> Arc<PriorityGate> {
        let mut resources = self.resources.lock().unwrap_or_else(|p| p.into_inner());
        resources
            .entry((protocol, resource_key.to_string()))
            .or_insert_with(|| PriorityGate::new(self.config.limits(protocol).per_resource))
            .clone()
    }
}

/// Periodic [`ConnectionThrottleManager::prune_idle`] until `shutdown` is
/// cancelled.
pub fn spawn_pruning(
    throttle: Arc<ConnectionThrottleManager>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    throttle.prune_idle();
                }
            }
        }
        log::debug!("Throttle gate pruning stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use remora_core::ErrorKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(per_resource: usize, global: usize, timeout_ms: u64) -> Arc<ConnectionThrottleManager> {
        let limits = ThrottleLimits {
            per_resource,
            global,
        };
        Arc::new(ConnectionThrottleManager::new(ThrottleConfig {
            smb: limits,
            sftp: limits,
            ftp: limits,
            acquire_timeout_ms: timeout_ms,
        }))
    }

    #[test]
    fn defaults_follow_protocol_table() {
        let cfg = ThrottleConfig::default();
        assert_eq!(cfg.smb, ThrottleLimits { per_resource: 4, global: 8 });
        assert_eq!(cfg.sftp.per_resource, 3);
        assert_eq!(cfg.ftp.per_resource, 2);
        assert_eq!(cfg.ftp.global, 4);
    }

    #[tokio::test]
    async fn per_resource_limit_is_never_exceeded() {
        let throttle = manager(2, 10, 5_000);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let (t, r, p) = (throttle.clone(), running.clone(), peak.clone());
            tasks.push(tokio::spawn(async move {
                t.with_throttle(Protocol::Smb, "nas:445", Priority::Low, async {
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_yields_throttled() {
        let throttle = manager(1, 1, 30);
        let _held = throttle.acquire(Protocol::Ftp, "h:21", Priority::High).await.unwrap();
        let err = throttle
            .acquire(Protocol::Ftp, "h:21", Priority::High)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Throttled);
        assert!(err.is_retryable());

        // Other resource, same protocol: blocked by the global gate.
        let err = throttle
            .acquire(Protocol::Ftp, "other:21", Priority::High)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Throttled);

        // Different protocol is independent.
        assert!(throttle.acquire(Protocol::Sftp, "h:22", Priority::Low).await.is_ok());
    }

    #[tokio::test]
    async fn idle_resource_gates_are_pruned() {
        let throttle = manager(1, 4, 50);
        let held = throttle.acquire(Protocol::Smb, "busy:445", Priority::Low).await.unwrap();
        for host in ["a:445", "b:445", "c:445"] {
            throttle
                .with_throttle(Protocol::Smb, host, Priority::Low, async { Ok(()) })
                .await
                .unwrap();
        }
        let resource_gates = |t: &ConnectionThrottleManager| {
            t.stats().into_iter().filter(|s| s.resource_key.is_some()).count()
        };
        assert_eq!(resource_gates(&throttle), 4);

        assert_eq!(throttle.prune_idle(), 3);
        let left: Vec<_> = throttle.stats().into_iter().filter_map(|s| s.resource_key).collect();
        assert_eq!(left, vec!["busy:445".to_string()]);

        // The held gate still enforces its limit after pruning.
        let err = throttle.acquire(Protocol::Smb, "busy:445", Priority::Low).await.err().unwrap();
        assert_eq!(err.kind, ErrorKind::Throttled);
        drop(held);
        assert_eq!(throttle.prune_idle(), 1);
        assert_eq!(resource_gates(&throttle), 0);
    }

    #[tokio::test]
    async fn pruning_task_stops_on_shutdown() {
        let throttle = manager(1, 4, 50);
        throttle
            .with_throttle(Protocol::Ftp, "h:21", Priority::Low, async { Ok(()) })
            .await
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = spawn_pruning(throttle.clone(), Duration::from_millis(10), shutdown.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(throttle.stats().iter().all(|s| s.resource_key.is_none()));
        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn lease_released_when_operation_fails() {
        let throttle = manager(1, 1, 50);
        let res: EngineResult<()> = throttle
            .with_throttle(Protocol::Smb, "h:445", Priority::Low, async {
                Err(EngineError::not_found("gone"))
            })
            .await;
        assert_eq!(res.unwrap_err().kind, ErrorKind::NotFound);
        assert!(throttle.acquire(Protocol::Smb, "h:445", Priority::Low).await.is_ok());

        let busy: Vec<_> = throttle.stats().into_iter().filter(|s| s.in_use > 0).collect();
        assert!(busy.is_empty());
    }

    #[tokio::test]
    async fn lease_released_when_future_is_dropped() {
        let throttle = manager(1, 1, 50);
        let t = throttle.clone();
        let task = tokio::spawn(async move {
            t.with_throttle(Protocol::Sftp, "h:22", Priority::Low, async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.abort();
        let _ = task.await;
        assert!(throttle.acquire(Protocol::Sftp, "h:22", Priority::Low).await.is_ok());
    }
}
