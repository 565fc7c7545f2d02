//! Node storage boundary.
//!
//! The conductor core never assumes a particular database; it depends on
//! this trait instead. `InMemoryNodeRepository` is the only implementation
//! shipped here — a real deployment would back it with whatever store it
//! likes, the way the teacher's `ClusterController` keeps state in `DashMap`
//! and leaves persistence to whatever wraps it.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{Node, NodeHistoryEntry};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("node {0} not found")]
    NotFound(Uuid),

    #[error("node {0} already exists")]
    AlreadyExists(Uuid),

    #[error("optimistic concurrency conflict on node {0}: expected version {expected}, found {found}", expected = .1, found = .2)]
    VersionConflict(Uuid, u64, u64),
}

/// Storage boundary for `Node` entities. Kept narrow: callers needing
/// atomic read-modify-write use `compare_and_swap`, not read-then-store.
pub trait NodeRepository: Send + Sync {
    fn get(&self, id: Uuid) -> Result<Node, RepositoryError>;
    fn list(&self) -> Vec<Node>;
    fn insert(&self, node: Node) -> Result<(), RepositoryError>;
    fn remove(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Store `node` only if the stored version still equals
    /// `expected_version`; otherwise fail with `VersionConflict`. Every
    /// caller of this trait must go through here, not `get` + `insert`,
    /// to avoid clobbering a concurrent writer.
    fn compare_and_swap(&self, node: Node, expected_version: u64) -> Result<(), RepositoryError>;
}

#[derive(Clone, Default)]
pub struct InMemoryNodeRepository {
    nodes: Arc<DashMap<Uuid, Node>>,
}

impl InMemoryNodeRepository {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
        }
    }
}

impl NodeRepository for InMemoryNodeRepository {
    fn get(&self, id: Uuid) -> Result<Node, RepositoryError> {
        self.nodes
            .get(&id)
            .map(|n| n.clone())
            .ok_or(RepositoryError::NotFound(id))
    }

    fn list(&self) -> Vec<Node> {
        self.nodes.iter().map(|e| e.value().clone()).collect()
    }

    fn insert(&self, node: Node) -> Result<(), RepositoryError> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(RepositoryError::AlreadyExists(node.uuid));
        }
        self.nodes.insert(node.uuid, node);
        Ok(())
    }

    fn remove(&self, id: Uuid) -> Result<(), RepositoryError> {
        self.nodes
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound(id))
    }

    fn compare_and_swap(&self, node: Node, expected_version: u64) -> Result<(), RepositoryError> {
        let mut entry = self.nodes.get_mut(&node.uuid).ok_or(RepositoryError::NotFound(node.uuid))?;
        if entry.version != expected_version {
            return Err(RepositoryError::VersionConflict(node.uuid, expected_version, entry.version));
        }
        *entry = node;
        Ok(())
    }
}

/// Append-only event log store, grounded in the teacher's `DashMap`-backed
/// `ClusterController` sharing pattern. Entries are append-only; there is no
/// update or delete, only `record` and `list_for_node`.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    entries: Arc<DashMap<Uuid, Vec<NodeHistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: NodeHistoryEntry) {
        self.entries.entry(entry.node_id).or_default().push(entry);
    }

    pub fn list_for_node(&self, node_id: Uuid) -> Vec<NodeHistoryEntry> {
        self.entries.get(&node_id).map(|v| v.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let repo = InMemoryNodeRepository::new();
        let node = Node::new("redfish", "default");
        let id = node.uuid;
        repo.insert(node).unwrap();
        assert_eq!(repo.get(id).unwrap().uuid, id);
    }

    #[test]
    fn test_insert_duplicate_rejected() {
        let repo = InMemoryNodeRepository::new();
        let node = Node::new("redfish", "default");
        let dup = node.clone();
        repo.insert(node).unwrap();
        assert!(matches!(repo.insert(dup), Err(RepositoryError::AlreadyExists(_))));
    }

    #[test]
    fn test_compare_and_swap_rejects_stale_version() {
        let repo = InMemoryNodeRepository::new();
        let mut node = Node::new("redfish", "default");
        let id = node.uuid;
        repo.insert(node.clone()).unwrap();

        node.touch();
        repo.compare_and_swap(node.clone(), 0).unwrap();
        assert_eq!(repo.get(id).unwrap().version, 1);

        node.touch();
        let result = repo.compare_and_swap(node, 0);
        assert!(matches!(result, Err(RepositoryError::VersionConflict(_, 0, 1))));
    }

    #[test]
    fn test_history_store_appends_per_node() {
        use crate::model::history::Severity;

        let store = InMemoryHistoryStore::new();
        let node_id = Uuid::new_v4();
        store.record(NodeHistoryEntry::new(node_id, Severity::Info, "provision_state_change", "available -> cleaning", "c1"));
        store.record(NodeHistoryEntry::new(node_id, Severity::Info, "provision_state_change", "cleaning -> available", "c1"));

        let entries = store.list_for_node(node_id);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "available -> cleaning");
    }

    #[test]
    fn test_history_store_empty_for_unknown_node() {
        let store = InMemoryHistoryStore::new();
        assert!(store.list_for_node(Uuid::new_v4()).is_empty());
    }
}
