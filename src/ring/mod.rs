//! Hash-Ring Manager — consistent hashing over conductor membership.
//!
//! Decides, for any `(conductor_group, node_uuid)`, which conductor(s) own
//! the node. The ring is sharded by `conductor_group`: each group gets its
//! own independent sub-ring built only from conductors advertising that
//! group. Mirrors the teacher's `ClusterController` in holding readable
//! snapshots behind a single mutator (`RwLock`) rather than locking per
//! lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ErrorKind;

pub const DEFAULT_VIRTUAL_NODES_PER_CONDUCTOR: u32 = 64;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("no online conductor in group '{0}' can host this node")]
    Unmapped(String),
}

impl RingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RingError::Unmapped(_) => ErrorKind::TemporaryFailure,
        }
    }
}

/// A conductor as seen by the ring: identity plus the groups/drivers that
/// make it eligible to host a given node. Membership itself (heartbeat
/// freshness) is decided by `crate::registrar`; the ring only consumes the
/// resulting online set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingMember {
    pub hostname: String,
    pub conductor_group: String,
    /// True while this conductor is draining toward shutdown. It stays in
    /// the ring (so in-flight lookups keep resolving to it) but is never
    /// chosen as an owner for new work once this is queried by a caller
    /// that checks it.
    pub draining: bool,
}

fn stable_hash(input: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.hash(&mut hasher);
    hasher.finish()
}

/// One sharded sub-ring, built for a single `conductor_group`.
struct SubRing {
    /// Virtual-node hash -> owning conductor hostname.
    points: BTreeMap<u64, String>,
    members: Vec<RingMember>,
}

impl SubRing {
    fn build(members: Vec<RingMember>, virtual_nodes: u32) -> Self {
        let mut points = BTreeMap::new();
        for member in &members {
            for v in 0..virtual_nodes {
                let key = format!("{}#{v}", member.hostname);
                points.insert(stable_hash(&key), member.hostname.clone());
            }
        }
        Self { points, members }
    }

    /// Ring traversal starting at `node_uuid`'s point: owner first, then
    /// fallbacks, each conductor hostname appearing at most once.
    fn get_hosts(&self, node_uuid: Uuid) -> Vec<String> {
        if self.points.is_empty() {
            return Vec::new();
        }
        let point = stable_hash(&node_uuid.to_string());
        let mut ordered = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (_, host) in self.points.range(point..).chain(self.points.range(..point)) {
            if seen.insert(host.clone()) {
                ordered.push(host.clone());
            }
            if ordered.len() == self.members.len() {
                break;
            }
        }
        ordered
    }
}

struct RingState {
    sub_rings: HashMap<String, SubRing>,
    built_at: Instant,
    /// The membership snapshot the current rings were built against, used
    /// to detect drift for the lazy-rebuild policy.
    built_from: Vec<RingMember>,
}

pub struct HashRingManager {
    state: RwLock<RingState>,
    virtual_nodes: u32,
    reset_interval: Duration,
}

impl HashRingManager {
    pub fn new(virtual_nodes: u32, reset_interval: Duration) -> Self {
        Self {
            state: RwLock::new(RingState {
                sub_rings: HashMap::new(),
                built_at: Instant::now(),
                built_from: Vec::new(),
            }),
            virtual_nodes,
            reset_interval,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES_PER_CONDUCTOR, Duration::from_secs(60))
    }

    /// Rebuild every sub-ring from the current membership list. Called
    /// eagerly by the ring-reset periodic and lazily whenever `get_hosts`
    /// observes membership drift.
    pub async fn rebuild(&self, members: Vec<RingMember>) {
        let mut by_group: HashMap<String, Vec<RingMember>> = HashMap::new();
        for m in members.iter().cloned() {
            by_group.entry(m.conductor_group.clone()).or_default().push(m);
        }

        let mut sub_rings = HashMap::new();
        for (group, group_members) in by_group {
            sub_rings.insert(group, SubRing::build(group_members, self.virtual_nodes));
        }

        let mut state = self.state.write().await;
        state.sub_rings = sub_rings;
        state.built_at = Instant::now();
        state.built_from = members;
    }

    /// Rebuild only if `observed` membership differs from what the current
    /// ring was built against, or the reset interval has elapsed.
    pub async fn rebuild_if_stale(&self, observed: &[RingMember]) {
        let needs_rebuild = {
            let state = self.state.read().await;
            state.built_from.as_slice() != observed || state.built_at.elapsed() >= self.reset_interval
        };
        if needs_rebuild {
            self.rebuild(observed.to_vec()).await;
        }
    }

    /// Ring traversal order for `node_uuid` within `conductor_group`: owner
    /// first, fallbacks after. Empty if the group has no online members.
    pub async fn get_hosts(&self, conductor_group: &str, node_uuid: Uuid) -> Vec<String> {
        let state = self.state.read().await;
        state
            .sub_rings
            .get(conductor_group)
            .map(|r| r.get_hosts(node_uuid))
            .unwrap_or_default()
    }

    /// Convenience wrapper returning an error when the node is unmapped,
    /// used by the task manager's fail-fast-if-not-owner check.
    pub async fn owner(&self, conductor_group: &str, node_uuid: Uuid) -> Result<String, RingError> {
        self.get_hosts(conductor_group, node_uuid)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| RingError::Unmapped(conductor_group.to_string()))
    }

    pub async fn is_owner(&self, conductor_group: &str, node_uuid: Uuid, hostname: &str) -> bool {
        self.owner(conductor_group, node_uuid)
            .await
            .map(|owner| owner == hostname)
            .unwrap_or(false)
    }
}

pub type SharedHashRingManager = Arc<HashRingManager>;
