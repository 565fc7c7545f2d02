//! Periodic Worker Pool — bounded background tasks with reject-when-full
//! semantics, plus the standard task set (heartbeat, ring-reset,
//! fail-stuck-deploys, sync-power-state, console-expiry, agent-keepalive).
//!
//! Spawn shape follows the teacher's `heartbeat::spawn_heartbeat` pattern: a
//! `tokio::spawn`ed loop driven by `tokio::time::interval`, stopped via a
//! `tokio::sync::watch` shutdown channel rather than an abort handle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::model::{Node, ProvisionState};
use crate::repository::NodeRepository;
use crate::ring::HashRingManager;

#[derive(Error, Debug)]
pub enum PeriodicsError {
    #[error("worker pool exhausted ({capacity} workers busy)")]
    NoFreeConductorWorker { capacity: usize },
}

impl PeriodicsError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NoFreeConductorWorker
    }
}

/// Bounded pool: `try_enter` fails immediately rather than queuing, so
/// callers see backpressure instead of unbounded latency.
pub struct WorkerPool {
    capacity: usize,
    in_use: AtomicUsize,
}

pub struct WorkerSlot<'a> {
    pool: &'a WorkerPool,
}

impl Drop for WorkerSlot<'_> {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, in_use: AtomicUsize::new(0) }
    }

    pub fn try_enter(&self) -> Result<WorkerSlot<'_>, PeriodicsError> {
        let previous = self.in_use.fetch_add(1, Ordering::SeqCst);
        if previous >= self.capacity {
            self.in_use.fetch_sub(1, Ordering::SeqCst);
            return Err(PeriodicsError::NoFreeConductorWorker { capacity: self.capacity });
        }
        Ok(WorkerSlot { pool: self })
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }
}

/// Outcome a `predicate` closure returns per candidate node: `Continue`
/// keeps the node in the result and moves on, `Skip` excludes it but keeps
/// scanning, `Stop` ends the current tick early without visiting the
/// remaining candidates.
pub enum IterControl {
    Continue,
    Skip,
    Stop,
}

/// Walk only nodes this conductor owns per the hash ring, honoring an
/// optional predicate and a hard per-tick cap. `NodeNotFound`/`NodeLocked`
/// encountered by the predicate are the caller's concern to swallow; this
/// helper only handles ownership filtering, predicate dispatch, and the
/// `Stop` sentinel.
pub async fn iter_nodes<F>(
    repo: &dyn NodeRepository,
    ring: &HashRingManager,
    hostname: &str,
    limit: usize,
    mut predicate: F,
) -> Vec<Node>
where
    F: FnMut(&Node) -> IterControl,
{
    let mut matched = Vec::new();
    for node in repo.list() {
        if matched.len() >= limit {
            break;
        }
        if !ring.is_owner(&node.conductor_group, node.uuid, hostname).await {
            continue;
        }
        match predicate(&node) {
            IterControl::Continue => matched.push(node),
            IterControl::Skip => {}
            IterControl::Stop => break,
        }
    }
    matched
}

pub struct PeriodicsConfig {
    pub heartbeat_spacing: Duration,
    pub ring_reset_spacing: Duration,
    pub fail_stuck_deploys_spacing: Duration,
    pub sync_power_state_spacing: Duration,
    pub console_expiry_spacing: Duration,
    pub power_state_sync_max_retries: u32,
    pub agent_keepalive_spacing: Duration,
    pub agent_keepalive_timeout: Duration,
}

impl Default for PeriodicsConfig {
    fn default() -> Self {
        Self {
            heartbeat_spacing: Duration::from_secs(10),
            ring_reset_spacing: Duration::from_secs(60),
            fail_stuck_deploys_spacing: Duration::from_secs(60),
            sync_power_state_spacing: Duration::from_secs(60),
            console_expiry_spacing: Duration::from_secs(60),
            power_state_sync_max_retries: 3,
            agent_keepalive_spacing: Duration::from_secs(30),
            agent_keepalive_timeout: Duration::from_secs(300),
        }
    }
}

/// Handle to every spawned periodic task; dropping/calling `shutdown`
/// signals all loops to exit on their next tick boundary.
pub struct PeriodicsHandle {
    shutdown: watch::Sender<bool>,
}

impl PeriodicsHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Touches `Conductor.last_heartbeat` on a fixed spacing. DB connectivity
/// loss is logged, not fatal — the next tick retries.
pub fn spawn_conductor_heartbeat(
    hostname: String,
    spacing: Duration,
    touch: Arc<dyn Fn() -> bool + Send + Sync>,
) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !touch() {
                        warn!(hostname = %hostname, "conductor heartbeat failed to persist, will retry next tick");
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        info!(hostname = %hostname, "conductor heartbeat task stopping");
                        break;
                    }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

/// Refreshes the hash ring on `hash_ring_reset_interval`.
pub fn spawn_ring_reset(ring: Arc<HashRingManager>, spacing: Duration, members: Arc<dyn Fn() -> Vec<crate::ring::RingMember> + Send + Sync>) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ring.rebuild(members()).await;
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

/// Finds owned nodes stuck in `DEPLOYING` with no reservation (the
/// conductor that was driving them crashed) and fails them.
pub fn spawn_fail_stuck_deploys(
    repo: Arc<dyn NodeRepository>,
    ring: Arc<HashRingManager>,
    hostname: String,
    spacing: Duration,
) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stuck = iter_nodes(repo.as_ref(), &ring, &hostname, usize::MAX, |node| {
                        if node.provision_state == ProvisionState::Deploying && node.reservation.is_none() {
                            IterControl::Continue
                        } else {
                            IterControl::Skip
                        }
                    })
                    .await;

                    for mut node in stuck {
                        if node.provision_state != ProvisionState::Deploying {
                            continue;
                        }
                        let version = node.version;
                        node.provision_state = ProvisionState::DeployFailed;
                        node.last_error = Some("The deployment can't be resumed".to_string());
                        node.touch();
                        let _ = repo.compare_and_swap(node, version);
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

/// Reconciles `power_state` against the BMC for every owned,
/// non-maintenance node. `query_power` stands in for the out-of-scope
/// concrete power driver; `None` skips the node for this tick (interface
/// doesn't support sync, or the query itself failed).
pub fn spawn_sync_power_state(
    repo: Arc<dyn NodeRepository>,
    ring: Arc<HashRingManager>,
    hostname: String,
    spacing: Duration,
    max_retries: u32,
    query_power: Arc<dyn Fn(&Node) -> Option<crate::model::PowerState> + Send + Sync>,
) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let owned = iter_nodes(repo.as_ref(), &ring, &hostname, usize::MAX, |node| {
                        if node.maintenance { IterControl::Skip } else { IterControl::Continue }
                    })
                    .await;

                    for mut node in owned {
                        if node.target_power_state.is_some() {
                            continue;
                        }
                        let Some(observed) = query_power(&node) else { continue };
                        let version = node.version;

                        if observed == node.power_state {
                            if node.driver_internal_info.power_sync_failures.is_some() {
                                node.driver_internal_info.power_sync_failures = None;
                                node.touch();
                                let _ = repo.compare_and_swap(node, version);
                            }
                            continue;
                        }

                        let failures = node.driver_internal_info.power_sync_failures.unwrap_or(0) + 1;
                        if failures >= max_retries {
                            node.driver_internal_info.power_sync_failures = None;
                            if let Ok(transition) = crate::fsm::transition(node.provision_state, crate::fsm::Event::Fail) {
                                node.provision_state = transition.next_state;
                            }
                            node.set_maintenance(
                                Some("power state disagreement with BMC".to_string()),
                                Some("power_failure".to_string()),
                            );
                        } else {
                            node.driver_internal_info.power_sync_failures = Some(failures);
                        }
                        node.touch();
                        let _ = repo.compare_and_swap(node, version);
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() { break; }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

/// Tears down the graphical console for owned nodes whose console token
/// has expired. `tear_down` is the out-of-scope console-container
/// collaborator; returning `false` leaves the node's console fields alone
/// (teardown itself failed, the next tick retries).
pub fn spawn_console_expiry(
    repo: Arc<dyn NodeRepository>,
    ring: Arc<HashRingManager>,
    hostname: String,
    spacing: Duration,
    tear_down: Arc<dyn Fn(&Node) -> bool + Send + Sync>,
) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = chrono::Utc::now();
                    let expired = iter_nodes(repo.as_ref(), &ring, &hostname, usize::MAX, |node| {
                        match node.driver_internal_info.console_expires_at {
                            Some(expires_at) if expires_at <= now => IterControl::Continue,
                            _ => IterControl::Skip,
                        }
                    })
                    .await;

                    for mut node in expired {
                        if tear_down(&node) {
                            let version = node.version;
                            node.driver_internal_info.vnc_host = None;
                            node.driver_internal_info.vnc_port = None;
                            node.driver_internal_info.novnc_secret_token = None;
                            node.driver_internal_info.console_expires_at = None;
                            node.touch();
                            let _ = repo.compare_and_swap(node, version);
                        }
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() { break; }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

/// For agent-backed nodes sitting in a `*_WAIT` state, verifies the agent
/// has heartbeated within `timeout`; otherwise fails the run the same way
/// a dead agent connection would.
pub fn spawn_agent_keepalive(
    repo: Arc<dyn NodeRepository>,
    ring: Arc<HashRingManager>,
    hostname: String,
    spacing: Duration,
    timeout: Duration,
) -> PeriodicsHandle {
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(spacing);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let waiting = iter_nodes(repo.as_ref(), &ring, &hostname, usize::MAX, |node| {
                        let is_wait = matches!(
                            node.provision_state,
                            ProvisionState::CleanWait | ProvisionState::ServiceWait | ProvisionState::WaitCallback
                        );
                        if is_wait && node.driver_internal_info.agent_url.is_some() {
                            IterControl::Continue
                        } else {
                            IterControl::Skip
                        }
                    })
                    .await;

                    for mut node in waiting {
                        let age = chrono::Utc::now().signed_duration_since(node.updated_at);
                        let stale = age.to_std().map(|d| d > timeout).unwrap_or(false);
                        if !stale {
                            continue;
                        }
                        if let Ok(transition) = crate::fsm::transition(node.provision_state, crate::fsm::Event::Fail) {
                            let version = node.version;
                            node.provision_state = transition.next_state;
                            node.last_error = Some("agent heartbeat timed out".to_string());
                            node.touch();
                            let _ = repo.compare_and_swap(node, version);
                        }
                    }
                }
                _ = rx.changed() => {
                    if *rx.borrow() { break; }
                }
            }
        }
    });
    PeriodicsHandle { shutdown: tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryNodeRepository;
    use crate::ring::RingMember;

    #[test]
    fn test_worker_pool_rejects_when_full() {
        let pool = WorkerPool::new(1);
        let _slot = pool.try_enter().unwrap();
        assert!(matches!(pool.try_enter(), Err(PeriodicsError::NoFreeConductorWorker { .. })));
    }

    #[test]
    fn test_worker_pool_frees_slot_on_drop() {
        let pool = WorkerPool::new(1);
        {
            let _slot = pool.try_enter().unwrap();
        }
        assert!(pool.try_enter().is_ok());
    }

    #[tokio::test]
    async fn test_iter_nodes_filters_by_ownership() {
        let repo = InMemoryNodeRepository::new();
        let owned = Node::new("redfish", "default");
        let owned_id = owned.uuid;
        repo.insert(owned).unwrap();

        let other_group = Node::new("redfish", "other");
        repo.insert(other_group).unwrap();

        let ring = HashRingManager::with_defaults();
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let owned_nodes = iter_nodes(&repo, &ring, "c1", 10, |_| IterControl::Continue).await;
        assert_eq!(owned_nodes.len(), 1);
        assert_eq!(owned_nodes[0].uuid, owned_id);
    }

    #[tokio::test]
    async fn test_iter_nodes_respects_limit() {
        let repo = InMemoryNodeRepository::new();
        for _ in 0..5 {
            repo.insert(Node::new("redfish", "default")).unwrap();
        }
        let ring = HashRingManager::with_defaults();
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let limited = iter_nodes(&repo, &ring, "c1", 2, |_| IterControl::Continue).await;
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_stuck_deploys_marks_unreserved_deploying_nodes() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.provision_state = ProvisionState::Deploying;
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let handle = spawn_fail_stuck_deploys(repo.clone(), ring, "c1".to_string(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.shutdown();

        let node = repo.get(node_id).unwrap();
        assert_eq!(node.provision_state, ProvisionState::DeployFailed);
        assert_eq!(node.last_error.as_deref(), Some("The deployment can't be resumed"));
    }

    #[tokio::test]
    async fn test_sync_power_state_fails_after_max_retries() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.power_state = crate::model::PowerState::PowerOn;
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let query_power: Arc<dyn Fn(&Node) -> Option<crate::model::PowerState> + Send + Sync> =
            Arc::new(|_| Some(crate::model::PowerState::PowerOff));

        let handle = spawn_sync_power_state(repo.clone(), ring, "c1".to_string(), Duration::from_millis(10), 2, query_power);
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.shutdown();

        let node = repo.get(node_id).unwrap();
        assert!(node.maintenance);
        assert_eq!(node.fault.as_deref(), Some("power_failure"));
    }

    #[tokio::test]
    async fn test_sync_power_state_clears_failures_once_reconciled() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.power_state = crate::model::PowerState::PowerOn;
        node.driver_internal_info.power_sync_failures = Some(1);
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let query_power: Arc<dyn Fn(&Node) -> Option<crate::model::PowerState> + Send + Sync> =
            Arc::new(|n| Some(n.power_state));

        let handle = spawn_sync_power_state(repo.clone(), ring, "c1".to_string(), Duration::from_millis(10), 3, query_power);
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.shutdown();

        let node = repo.get(node_id).unwrap();
        assert!(node.driver_internal_info.power_sync_failures.is_none());
    }

    #[tokio::test]
    async fn test_console_expiry_clears_expired_console() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.driver_internal_info.vnc_host = Some("10.0.0.5".to_string());
        node.driver_internal_info.console_expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(5));
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let handle = spawn_console_expiry(repo.clone(), ring, "c1".to_string(), Duration::from_millis(10), Arc::new(|_| true));
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.shutdown();

        let node = repo.get(node_id).unwrap();
        assert!(node.driver_internal_info.vnc_host.is_none());
        assert!(node.driver_internal_info.console_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_agent_keepalive_fails_stale_wait_node() {
        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.provision_state = ProvisionState::CleanWait;
        node.driver_internal_info.agent_url = Some("http://10.0.0.9:9999".to_string());
        node.updated_at = chrono::Utc::now() - chrono::Duration::seconds(600);
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;

        let handle = spawn_agent_keepalive(repo.clone(), ring, "c1".to_string(), Duration::from_millis(10), Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(40)).await;
        handle.shutdown();

        let node = repo.get(node_id).unwrap();
        assert_eq!(node.provision_state, ProvisionState::CleanFailed);
    }
}
