//! Allocation — pending assignment of a node to a consumer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Allocating,
    Active,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub uuid: Uuid,
    pub resource_class: String,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub candidate_nodes: Vec<Uuid>,
    pub state: AllocationState,
    /// The conductor hostname that owns this allocation while it resolves.
    pub conductor_affinity: Option<String>,
    pub node_id: Option<Uuid>,
    pub last_error: Option<String>,
}

impl Allocation {
    pub fn new(resource_class: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            resource_class: resource_class.into(),
            traits: Vec::new(),
            candidate_nodes: Vec::new(),
            state: AllocationState::Allocating,
            conductor_affinity: None,
            node_id: None,
            last_error: None,
        }
    }

    pub fn bind(&mut self, node_id: Uuid) {
        self.node_id = Some(node_id);
        self.state = AllocationState::Active;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.state = AllocationState::Error;
        self.last_error = Some(reason.into());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, AllocationState::Active | AllocationState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_transitions_to_active() {
        let mut alloc = Allocation::new("baremetal.large");
        let node_id = Uuid::new_v4();
        alloc.bind(node_id);
        assert_eq!(alloc.state, AllocationState::Active);
        assert_eq!(alloc.node_id, Some(node_id));
        assert!(alloc.is_terminal());
    }

    #[test]
    fn test_fail_is_terminal() {
        let mut alloc = Allocation::new("baremetal.large");
        alloc.fail("no candidates matched traits");
        assert_eq!(alloc.state, AllocationState::Error);
        assert!(alloc.is_terminal());
    }
}
