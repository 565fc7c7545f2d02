//! End-to-end exercise of the step-based executor against an in-memory
//! repository and a stub driver, the way a real deployment would only
//! differ by swapping the driver implementation.

use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::drivers::{Driver, DriverError, DriverInterface, DriverRegistry, StepOutcome};
use conductor_core::executor::{Executor, Flow, RunOutcome};
use conductor_core::model::{InterfaceKind, Node, ProvisionState, Step};
use conductor_core::repository::{InMemoryNodeRepository, NodeRepository};
use conductor_core::reservation::TaskManager;
use conductor_core::ring::{HashRingManager, RingMember};
use uuid::Uuid;

struct AlwaysComplete;

#[async_trait]
impl DriverInterface for AlwaysComplete {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Deploy
    }
    fn steps(&self) -> Vec<Step> {
        vec![]
    }
    async fn execute_step(&self, _node_id: Uuid, _step: &Step) -> Result<StepOutcome, DriverError> {
        Ok(StepOutcome::Complete)
    }
}

struct AlwaysFails;

#[async_trait]
impl DriverInterface for AlwaysFails {
    fn kind(&self) -> InterfaceKind {
        InterfaceKind::Deploy
    }
    fn steps(&self) -> Vec<Step> {
        vec![]
    }
    async fn execute_step(&self, _node_id: Uuid, _step: &Step) -> Result<StepOutcome, DriverError> {
        Err(DriverError::StepFailed("simulated failure".into()))
    }
}

async fn build(interface: Arc<dyn DriverInterface>) -> (Executor, Arc<InMemoryNodeRepository>, Uuid) {
    let ring = Arc::new(HashRingManager::with_defaults());
    ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;
    let tasks = TaskManager::new("c1", ring, Arc::new(|_| Some("default".to_string())));

    let mut registry = DriverRegistry::new();
    registry.register(Driver::new("redfish").with_interface(interface));
    let registry = Arc::new(registry);

    let repo = Arc::new(InMemoryNodeRepository::new());
    let mut node = Node::new("redfish", "default");
    node.provision_state = ProvisionState::Available;
    let node_id = node.uuid;
    repo.insert(node).unwrap();

    (Executor::new(tasks, registry, repo.clone(), false), repo, node_id)
}

#[tokio::test]
async fn successful_clean_flow_records_history_and_returns_to_available() {
    let (executor, repo, node_id) = build(Arc::new(AlwaysComplete)).await;
    let steps = vec![Step::new(InterfaceKind::Deploy, "erase_disks", 10)];

    let outcome = executor.start_flow(node_id, Flow::Clean, Some(steps)).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(repo.get(node_id).unwrap().provision_state, ProvisionState::Available);

    let history = executor.history().list_for_node(node_id);
    assert_eq!(history.len(), 1);
    assert!(history[0].event.contains("completed"));
}

#[tokio::test]
async fn failed_deploy_flow_sets_maintenance_and_records_history() {
    let (executor, repo, node_id) = build(Arc::new(AlwaysFails)).await;
    let steps = vec![Step::new(InterfaceKind::Deploy, "erase_disks", 10)];

    let outcome = executor.start_flow(node_id, Flow::Deploy, Some(steps)).await.unwrap();
    assert_eq!(outcome, RunOutcome::Failed);

    let node = repo.get(node_id).unwrap();
    assert_eq!(node.provision_state, ProvisionState::DeployFailed);
    assert!(node.maintenance);
    assert_eq!(node.fault.as_deref(), Some("deploy_failure"));

    let history = executor.history().list_for_node(node_id);
    assert_eq!(history.len(), 1);
    assert!(history[0].event.contains("failed"));
}

#[tokio::test]
async fn abort_parks_node_in_failed_state_without_touching_history() {
    let (executor, repo, node_id) = build(Arc::new(AlwaysComplete)).await;

    // Drive the node into a wait state isn't exercised here (needs an
    // async step); abort is exercised directly against a running flow
    // state instead, matching how an operator-triggered abort would find
    // the node mid-run.
    {
        let mut node = repo.get(node_id).unwrap();
        node.provision_state = ProvisionState::CleanWait;
        let version = node.version;
        node.touch();
        repo.compare_and_swap(node, version).unwrap();
    }

    executor.abort(node_id, Flow::Clean).await.unwrap();
    let node = repo.get(node_id).unwrap();
    assert_eq!(node.provision_state, ProvisionState::CleanFailed);
    assert!(executor.history().list_for_node(node_id).is_empty());
}

#[tokio::test]
async fn start_flow_rejects_empty_step_list() {
    let (executor, _repo, node_id) = build(Arc::new(AlwaysComplete)).await;
    let result = executor.start_flow(node_id, Flow::Clean, Some(vec![])).await;
    assert!(result.is_err());
}
