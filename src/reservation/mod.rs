//! Task Manager — per-node reservation (the critical section every
//! node-mutating operation runs under).
//!
//! A reservation is modeled the way the data model table describes it:
//! `Node.reservation` holds the owning conductor's hostname, set by a
//! compare-and-swap against "currently null" (exclusive) or tracked as one
//! of N shared holders. Acquisition brackets its own release through an RAII
//! guard, mirroring the teacher's `RwLock` guard usage in `ClusterController`
//! rather than hand-rolled lock/unlock pairs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::ring::HashRingManager;

#[derive(Error, Debug)]
pub enum ReservationError {
    #[error("node {0} is already reserved")]
    NodeLocked(Uuid),

    #[error("node {0} not found")]
    NodeNotFound(Uuid),

    #[error("node {0} is not owned by this conductor")]
    NotOwner(Uuid),

    #[error("reservation on node {0} was lost")]
    Lost(Uuid),
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::NodeLocked(_) => ErrorKind::Conflict,
            ReservationError::NodeNotFound(_) => ErrorKind::NotFound,
            ReservationError::NotOwner(_) => ErrorKind::TemporaryFailure,
            ReservationError::Lost(_) => ErrorKind::TemporaryFailure,
        }
    }
}

/// A single node's reservation slot: either free, held exclusively by one
/// purpose string, or held by a set of shared holders.
enum Slot {
    Free,
    Exclusive { holder: String, purpose: String },
    Shared { holders: HashSet<String> },
}

/// Per-node reservation state plus a counting semaphore used only to let
/// an exclusive acquirer wait for shared readers to drain on downgrade.
struct NodeLock {
    slot: tokio::sync::Mutex<Slot>,
}

/// The task manager: one `NodeLock` per reserved node, keyed by uuid.
/// Mirrors the teacher's `Arc<DashMap<...>>` sharing pattern so the manager
/// itself is `Clone` and cheaply shareable across the RPC layer and the
/// periodic worker pool.
#[derive(Clone)]
pub struct TaskManager {
    locks: Arc<DashMap<Uuid, Arc<NodeLock>>>,
    ring: Arc<HashRingManager>,
    conductor_group_of: Arc<dyn Fn(Uuid) -> Option<String> + Send + Sync>,
    hostname: String,
}

/// RAII guard: releases (or downgrades) the reservation when dropped.
/// Async release on drop isn't possible in safe Rust, so `release` and
/// `downgrade_to_shared` are explicit async methods; `Drop` only logs if a
/// guard was leaked without an explicit release, matching the teacher's
/// preference for explicit lifecycle calls over implicit Drop magic.
pub struct ReservationGuard {
    manager: TaskManager,
    node_id: Uuid,
    exclusive: bool,
    released: bool,
}

impl ReservationGuard {
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub async fn release(mut self) {
        self.manager.release(self.node_id, &self.manager.hostname, self.exclusive).await;
        self.released = true;
    }

    /// Shared → exclusive. Fails if another shared holder besides this one
    /// still holds the lock.
    pub async fn upgrade(&mut self) -> Result<(), ReservationError> {
        self.manager.upgrade(self.node_id, &self.manager.hostname).await?;
        self.exclusive = true;
        Ok(())
    }

    /// Exclusive → shared, used by the executor before an async `*_WAIT`
    /// suspends so heartbeat-delivered continuations can read node state.
    pub async fn downgrade(&mut self) -> Result<(), ReservationError> {
        self.manager.downgrade(self.node_id, &self.manager.hostname).await?;
        self.exclusive = false;
        Ok(())
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(node_id = %self.node_id, "reservation guard dropped without explicit release");
        }
    }
}

impl TaskManager {
    pub fn new(hostname: impl Into<String>, ring: Arc<HashRingManager>, conductor_group_of: Arc<dyn Fn(Uuid) -> Option<String> + Send + Sync>) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            ring,
            conductor_group_of,
            hostname: hostname.into(),
        }
    }

    fn lock_for(&self, node_id: Uuid) -> Arc<NodeLock> {
        self.locks
            .entry(node_id)
            .or_insert_with(|| Arc::new(NodeLock { slot: tokio::sync::Mutex::new(Slot::Free) }))
            .clone()
    }

    /// Acquire a reservation. `forward` bypasses the hash-ring ownership
    /// check (spec §4.6: the caller opted into cross-conductor forwarding).
    pub async fn acquire(
        &self,
        node_id: Uuid,
        purpose: impl Into<String>,
        shared: bool,
        forward: bool,
    ) -> Result<ReservationGuard, ReservationError> {
        if !forward {
            let group = (self.conductor_group_of)(node_id).ok_or(ReservationError::NodeNotFound(node_id))?;
            if !self.ring.is_owner(&group, node_id, &self.hostname).await {
                return Err(ReservationError::NotOwner(node_id));
            }
        }

        let lock = self.lock_for(node_id);
        let mut slot = lock.slot.lock().await;
        match &mut *slot {
            Slot::Free => {
                *slot = if shared {
                    let mut holders = HashSet::new();
                    holders.insert(self.hostname.clone());
                    Slot::Shared { holders }
                } else {
                    Slot::Exclusive { holder: self.hostname.clone(), purpose: purpose.into() }
                };
            }
            Slot::Shared { holders } if shared => {
                holders.insert(self.hostname.clone());
            }
            _ => return Err(ReservationError::NodeLocked(node_id)),
        }

        Ok(ReservationGuard {
            manager: self.clone(),
            node_id,
            exclusive: !shared,
            released: false,
        })
    }

    /// Acquire exclusive locks on `children` (already filtered by
    /// `limit_child_node_execution`) in ascending uuid order, avoiding
    /// deadlock against any concurrent fan-out over the same set.
    pub async fn acquire_children(
        &self,
        mut children: Vec<Uuid>,
        purpose: impl Into<String> + Clone,
    ) -> Result<Vec<ReservationGuard>, ReservationError> {
        children.sort();
        let mut guards = Vec::with_capacity(children.len());
        for child in children {
            match self.acquire(child, purpose.clone(), false, false).await {
                Ok(g) => guards.push(g),
                Err(e) => {
                    for g in guards {
                        g.release().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(guards)
    }

    async fn release(&self, node_id: Uuid, hostname: &str, exclusive: bool) {
        let lock = self.lock_for(node_id);
        let mut slot = lock.slot.lock().await;
        match &mut *slot {
            Slot::Exclusive { holder, .. } if exclusive && holder == hostname => {
                *slot = Slot::Free;
            }
            Slot::Shared { holders } => {
                holders.remove(hostname);
                if holders.is_empty() {
                    *slot = Slot::Free;
                }
            }
            _ => {}
        }
    }

    async fn upgrade(&self, node_id: Uuid, hostname: &str) -> Result<(), ReservationError> {
        let lock = self.lock_for(node_id);
        let mut slot = lock.slot.lock().await;
        match &*slot {
            Slot::Shared { holders } if holders.len() == 1 && holders.contains(hostname) => {
                *slot = Slot::Exclusive { holder: hostname.to_string(), purpose: "upgrade".to_string() };
                Ok(())
            }
            _ => Err(ReservationError::NodeLocked(node_id)),
        }
    }

    async fn downgrade(&self, node_id: Uuid, hostname: &str) -> Result<(), ReservationError> {
        let lock = self.lock_for(node_id);
        let mut slot = lock.slot.lock().await;
        match &*slot {
            Slot::Exclusive { holder, .. } if holder == hostname => {
                let mut holders = HashSet::new();
                holders.insert(hostname.to_string());
                *slot = Slot::Shared { holders };
                Ok(())
            }
            _ => Err(ReservationError::NodeLocked(node_id)),
        }
    }

    /// Called once on conductor startup: any reservation still recorded
    /// against `hostname` in durable storage belongs to a crashed previous
    /// instance of this process and must be cleared. The in-memory `locks`
    /// map starts empty on every process start, so this is a no-op here;
    /// a real storage-backed implementation would scan and clear rows.
    pub fn clear_orphaned_reservations(&self, _hostname: &str) {
        self.locks.clear();
    }

    /// Graceful shutdown: wait up to `timeout` for every held reservation
    /// to drain, then force-clear whatever remains.
    pub async fn drain(&self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let any_held = self.locks.iter().any(|entry| match entry.value().slot.try_lock() {
                Ok(slot) => !matches!(*slot, Slot::Free),
                Err(_) => true,
            });
            if !any_held || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.locks.clear();
    }
}

/// Used only where a caller needs to bound reservation wait without pulling
/// in a full semaphore-based pool; kept separate from `TaskManager` so the
/// executor's per-node critical sections and the periodic pool's bounded
/// concurrency (`crate::periodics`) stay independent concerns.
pub struct BoundedGate {
    semaphore: Arc<Semaphore>,
}

impl BoundedGate {
    pub fn new(capacity: usize) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(capacity)) }
    }

    pub async fn try_enter(&self) -> Option<SemaphorePermit<'_>> {
        self.semaphore.try_acquire().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    async fn manager_always_owner(hostname: &str) -> TaskManager {
        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![crate::ring::RingMember {
            hostname: hostname.to_string(),
            conductor_group: "default".to_string(),
            draining: false,
        }])
        .await;
        TaskManager::new(hostname, ring, Arc::new(|_| Some("default".to_string())))
    }

    #[tokio::test]
    async fn test_exclusive_then_exclusive_fails() {
        let tm = manager_always_owner("c1").await;
        let node = Uuid::new_v4();
        let guard = tm.acquire(node, "clean", false, false).await.unwrap();
        let second = tm.acquire(node, "deploy", false, false).await;
        assert!(matches!(second, Err(ReservationError::NodeLocked(_))));
        guard.release().await;
        assert!(tm.acquire(node, "deploy", false, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_allows_multiple_readers() {
        let tm = manager_always_owner("c1").await;
        let node = Uuid::new_v4();
        let a = tm.acquire(node, "read", true, false).await.unwrap();
        let b = tm.acquire(node, "read", true, false).await.unwrap();
        assert!(tm.acquire(node, "write", false, false).await.is_err());
        a.release().await;
        b.release().await;
        assert!(tm.acquire(node, "write", false, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_downgrade_then_upgrade() {
        let tm = manager_always_owner("c1").await;
        let node = Uuid::new_v4();
        let mut guard = tm.acquire(node, "clean", false, false).await.unwrap();
        guard.downgrade().await.unwrap();
        assert!(!guard.is_exclusive());
        guard.upgrade().await.unwrap();
        assert!(guard.is_exclusive());
        guard.release().await;
    }

    #[tokio::test]
    async fn test_drain_clears_state() {
        let tm = manager_always_owner("c1").await;
        let node = Uuid::new_v4();
        let _guard = tm.acquire(node, "clean", false, false).await.unwrap();
        tm.drain(StdDuration::from_millis(100)).await;
        assert!(tm.acquire(node, "clean", false, false).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_children_in_uuid_order_releases_on_failure() {
        let tm = manager_always_owner("c1").await;
        let locked_child = Uuid::new_v4();
        let _held = tm.acquire(locked_child, "busy", false, false).await.unwrap();

        let other_child = Uuid::new_v4();
        let result = tm.acquire_children(vec![other_child, locked_child], "fanout").await;
        assert!(result.is_err());
        // other_child must have been released on failure
        assert!(tm.acquire(other_child, "retry", false, false).await.is_ok());
    }
}
