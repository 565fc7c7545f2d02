//! Step-Based Lifecycle Executor — the uniform engine behind cleaning,
//! servicing, and deployment (spec §4.4). One `run_flow`/`continue_flow`
//! pair drives all three; only state names, `driver_internal_info` keys,
//! and the terminal-success target differ, captured by the `Flow` enum.

use thiserror::Error;
use uuid::Uuid;

use crate::drivers::{DriverError, DriverRegistry, StepOutcome};
use crate::error::ErrorKind;
use crate::fsm::{self, Event};
use crate::model::{order_automated, order_manual, Node, NodeHistoryEntry, ProvisionState, Severity, Step};
use crate::repository::{InMemoryHistoryStore, NodeRepository, RepositoryError};
use crate::reservation::TaskManager;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Reservation(#[from] crate::reservation::ReservationError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Fsm(#[from] fsm::FsmError),

    #[error("node {0} has no steps to run for this flow")]
    NoSteps(Uuid),

    #[error("unknown step '{0}' requested for a manual run: {1}")]
    UnknownStep(Uuid, String),
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Repository(RepositoryError::NotFound(_)) => ErrorKind::NotFound,
            ExecutorError::Repository(_) => ErrorKind::Conflict,
            ExecutorError::Reservation(e) => e.kind(),
            ExecutorError::Driver(_) => ErrorKind::DriverError,
            ExecutorError::Fsm(_) => ErrorKind::ClientInput,
            ExecutorError::NoSteps(_) | ExecutorError::UnknownStep(_, _) => ErrorKind::ClientInput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Clean,
    Service,
    Deploy,
}

impl Flow {
    fn running_state(self) -> ProvisionState {
        match self {
            Flow::Clean => ProvisionState::Cleaning,
            Flow::Service => ProvisionState::Servicing,
            Flow::Deploy => ProvisionState::Deploying,
        }
    }

    fn wait_state(self) -> ProvisionState {
        match self {
            Flow::Clean => ProvisionState::CleanWait,
            Flow::Service => ProvisionState::ServiceWait,
            Flow::Deploy => ProvisionState::WaitCallback,
        }
    }

    fn failed_state(self) -> ProvisionState {
        match self {
            Flow::Clean => ProvisionState::CleanFailed,
            Flow::Service => ProvisionState::ServiceFailed,
            Flow::Deploy => ProvisionState::DeployFailed,
        }
    }

    fn hold_state(self) -> ProvisionState {
        match self {
            Flow::Clean => ProvisionState::CleanHold,
            Flow::Service => ProvisionState::ServiceHold,
            Flow::Deploy => ProvisionState::DeployingHold,
        }
    }

    fn fault(self) -> &'static str {
        match self {
            Flow::Clean => "clean_failure",
            Flow::Service => "service_failure",
            Flow::Deploy => "deploy_failure",
        }
    }

    fn success_state(self, node: &Node) -> ProvisionState {
        match self {
            Flow::Clean if node.retired => ProvisionState::Manageable,
            Flow::Clean => ProvisionState::Available,
            Flow::Service => ProvisionState::Active,
            Flow::Deploy => ProvisionState::Active,
        }
    }

    fn tear_down_step_name(self) -> &'static str {
        match self {
            Flow::Clean => "tear_down_cleaning",
            Flow::Service => "tear_down_servicing",
            Flow::Deploy => "tear_down_deploy",
        }
    }
}

/// Outcome of driving a flow forward by one call to `execute_loop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// All steps completed; node is in the flow's success state.
    Completed,
    /// An async step suspended the run; node is in `*_WAIT`.
    Waiting,
    /// A step declared `hold`; node is in `*_HOLD`.
    Held,
    /// A step failed; node is in `*_FAILED`.
    Failed,
}

pub struct Executor {
    tasks: TaskManager,
    drivers: std::sync::Arc<DriverRegistry>,
    repo: std::sync::Arc<dyn NodeRepository>,
    poweroff_in_cleanfail: bool,
    history: InMemoryHistoryStore,
}

impl Executor {
    pub fn new(
        tasks: TaskManager,
        drivers: std::sync::Arc<DriverRegistry>,
        repo: std::sync::Arc<dyn NodeRepository>,
        poweroff_in_cleanfail: bool,
    ) -> Self {
        Self { tasks, drivers, repo, poweroff_in_cleanfail, history: InMemoryHistoryStore::new() }
    }

    /// Exposes the history store for callers that want to surface a node's
    /// event log (e.g. an RPC handler), the way the teacher exposes
    /// read-only views alongside its mutating API.
    pub fn history(&self) -> &InMemoryHistoryStore {
        &self.history
    }

    /// Exposes the task manager for callers that need to drive shutdown
    /// (draining in-flight reservations) from outside the executor.
    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    fn steps_field<'a>(&self, flow: Flow, node: &'a Node) -> &'a Option<Vec<serde_json::Value>> {
        match flow {
            Flow::Clean => &node.driver_internal_info.clean_steps,
            Flow::Service => &node.driver_internal_info.service_steps,
            Flow::Deploy => &node.driver_internal_info.deploy_steps,
        }
    }

    fn index_field(&self, flow: Flow, node: &Node) -> Option<usize> {
        match flow {
            Flow::Clean => node.driver_internal_info.clean_step_index,
            Flow::Service => node.driver_internal_info.service_step_index,
            Flow::Deploy => node.driver_internal_info.deploy_step_index,
        }
    }

    fn set_index(&self, flow: Flow, node: &mut Node, index: Option<usize>) {
        match flow {
            Flow::Clean => node.driver_internal_info.clean_step_index = index,
            Flow::Service => node.driver_internal_info.service_step_index = index,
            Flow::Deploy => node.driver_internal_info.deploy_step_index = index,
        }
    }

    fn set_steps(&self, flow: Flow, node: &mut Node, steps: Option<Vec<Step>>) {
        let serialized = steps.map(|s| s.into_iter().map(|st| serde_json::to_value(st).unwrap()).collect());
        match flow {
            Flow::Clean => node.driver_internal_info.clean_steps = serialized,
            Flow::Service => node.driver_internal_info.service_steps = serialized,
            Flow::Deploy => node.driver_internal_info.deploy_steps = serialized,
        }
    }

    fn set_current_step(&self, flow: Flow, node: &mut Node, step: Option<serde_json::Value>) {
        match flow {
            Flow::Clean => node.clean_step = step,
            Flow::Service => node.service_step = step,
            Flow::Deploy => node.deploy_step = step,
        }
    }

    fn clear_run(&self, flow: Flow, node: &mut Node) {
        let preserve_agent = node.driver_internal_info.is_fast_track();
        match flow {
            Flow::Clean => node.driver_internal_info.clear_clean_run(preserve_agent),
            Flow::Service => node.driver_internal_info.clear_service_run(preserve_agent),
            Flow::Deploy => node.driver_internal_info.clear_deploy_run(preserve_agent),
        }
        self.set_current_step(flow, node, None);
    }

    fn reboot_flag(&self, flow: Flow, node: &Node) -> bool {
        match flow {
            Flow::Clean => node.driver_internal_info.cleaning_reboot.unwrap_or(false),
            Flow::Service => node.driver_internal_info.service_reboot.unwrap_or(false),
            Flow::Deploy => node.driver_internal_info.deployment_reboot.unwrap_or(false),
        }
    }

    fn skip_current_flag(&self, flow: Flow, node: &Node) -> bool {
        match flow {
            Flow::Clean => node.driver_internal_info.skip_current_clean_step.unwrap_or(false),
            Flow::Service => node.driver_internal_info.skip_current_service_step.unwrap_or(false),
            Flow::Deploy => node.driver_internal_info.skip_current_deploy_step.unwrap_or(false),
        }
    }

    /// Begin a flow: collect steps (automated ordering unless `manual` is
    /// given), persist the ordered list and index 0, transition the node,
    /// and drive the loop until it suspends or finishes.
    pub async fn start_flow(&self, node_id: Uuid, flow: Flow, manual: Option<Vec<Step>>) -> Result<RunOutcome, ExecutorError> {
        let guard = self.tasks.acquire(node_id, format!("{flow:?} start"), false, false).await?;
        let mut node = self.repo.get(node_id)?;

        let available = self.drivers.collect_steps(&node.driver)?;
        let ordered = match manual {
            Some(requested) => order_manual(requested, &available)
                .map_err(|s| ExecutorError::UnknownStep(node_id, s))?,
            None => order_automated(available),
        };
        if ordered.is_empty() {
            guard.release().await;
            return Err(ExecutorError::NoSteps(node_id));
        }

        let transition = fsm::transition(node.provision_state, flow_start_event(flow))?;
        node.provision_state = transition.next_state;
        node.target_provision_state = transition.target_state;
        self.set_steps(flow, &mut node, Some(ordered));
        self.set_index(flow, &mut node, Some(0));
        node.touch();
        let version = node.version - 1;
        self.repo.compare_and_swap(node, version)?;

        guard.release().await;
        self.execute_loop(node_id, flow).await
    }

    /// Resume a suspended run, driven by a heartbeat continuation
    /// (`continue_node_clean`/`continue_node_service`/`continue_node_deploy`).
    pub async fn continue_flow(&self, node_id: Uuid, flow: Flow) -> Result<RunOutcome, ExecutorError> {
        let guard = self.tasks.acquire(node_id, format!("{flow:?} continue"), false, false).await?;
        let mut node = self.repo.get(node_id)?;
        let current = self.index_field(flow, &node).unwrap_or(0);
        let next = if self.skip_current_flag(flow, &node) { current + 1 } else { current };
        self.set_index(flow, &mut node, Some(next));
        node.touch();
        let version = node.version - 1;
        self.repo.compare_and_swap(node, version)?;
        guard.release().await;
        self.execute_loop(node_id, flow).await
    }

    /// Run from the persisted index to completion, suspension, hold, or
    /// failure. Every step begins and ends with the node under its own
    /// exclusive reservation (§4.4 execute loop step 1).
    async fn execute_loop(&self, node_id: Uuid, flow: Flow) -> Result<RunOutcome, ExecutorError> {
        loop {
            let guard = self.tasks.acquire(node_id, format!("{flow:?} step"), false, false).await?;
            let mut node = self.repo.get(node_id)?;
            let version = node.version;

            let steps: Vec<Step> = match self.steps_field(flow, &node) {
                Some(raw) => raw.iter().map(|v| serde_json::from_value(v.clone()).expect("persisted step is well-formed")).collect(),
                None => {
                    guard.release().await;
                    return Ok(RunOutcome::Completed);
                }
            };
            let index = self.index_field(flow, &node).unwrap_or(0);

            if index >= steps.len() {
                self.finish_success(flow, &mut node).await?;
                self.repo.compare_and_swap(node, version)?;
                guard.release().await;
                return Ok(RunOutcome::Completed);
            }

            let step = steps[index].clone();
            if step.step == "hold" {
                node.provision_state = flow.hold_state();
                node.touch();
                self.repo.compare_and_swap(node, version)?;
                guard.release().await;
                return Ok(RunOutcome::Held);
            }

            self.set_current_step(flow, &mut node, Some(serde_json::to_value(&step).unwrap()));
            node.touch();
            self.repo.compare_and_swap(node.clone(), version)?;

            let outcome = if step.execute_on_child_nodes {
                self.execute_on_children(&node, &step).await
            } else {
                self.invoke(&node, &step).await
            };

            let mut node = self.repo.get(node_id)?;
            let version = node.version;

            match outcome {
                Ok(StepOutcome::Complete) => {
                    self.set_index(flow, &mut node, Some(index + 1));
                    node.touch();
                    self.repo.compare_and_swap(node, version)?;
                    guard.release().await;
                    continue;
                }
                Ok(StepOutcome::Wait) => {
                    node.provision_state = flow.wait_state();
                    node.touch();
                    self.repo.compare_and_swap(node, version)?;
                    let mut guard = guard;
                    guard.downgrade().await?;
                    guard.release().await;
                    return Ok(RunOutcome::Waiting);
                }
                Err(DriverError::AgentConnectionFailed) | Err(DriverError::AgentInProgress) if self.reboot_flag(flow, &node) => {
                    node.provision_state = flow.wait_state();
                    node.touch();
                    self.repo.compare_and_swap(node, version)?;
                    guard.release().await;
                    return Ok(RunOutcome::Waiting);
                }
                Err(e) => {
                    self.fail_run(flow, &mut node, &e.to_string()).await;
                    self.repo.compare_and_swap(node, version)?;
                    guard.release().await;
                    return Ok(RunOutcome::Failed);
                }
            }
        }
    }

    async fn invoke(&self, node: &Node, step: &Step) -> Result<StepOutcome, DriverError> {
        let driver = self.drivers.get(&node.driver)?;
        let interface = driver.interface(step.interface.clone())?;
        interface.execute_step(node.uuid, step).await
    }

    /// Fan out a step marked `execute_on_child_nodes`: acquire each child's
    /// exclusive lock in uuid order (already filtered by
    /// `limit_child_node_execution` before reaching here), invoke, release.
    async fn execute_on_children(&self, node: &Node, step: &Step) -> Result<StepOutcome, DriverError> {
        let children: Vec<Uuid> = self
            .repo
            .list()
            .into_iter()
            .filter(|n| n.parent_node == Some(node.uuid))
            .filter(|n| step.limit_child_node_execution.as_ref().map(|limit| limit.contains(&n.uuid)).unwrap_or(true))
            .map(|n| n.uuid)
            .collect();

        let guards = self
            .tasks
            .acquire_children(children, format!("{} fanout", step.step))
            .await
            .map_err(|_| DriverError::StepFailed("failed to acquire child reservations".to_string()))?;

        for guard in &guards {
            let child = self.repo.get(guard.node_id()).map_err(|_| DriverError::StepFailed("child vanished mid-fanout".to_string()))?;
            self.invoke(&child, step).await?;
        }
        for guard in guards {
            guard.release().await;
        }
        Ok(StepOutcome::Complete)
    }

    async fn finish_success(&self, flow: Flow, node: &mut Node) -> Result<(), ExecutorError> {
        if self.drivers.get(&node.driver).is_ok() {
            let _ = self.tear_down(node, flow).await;
        }
        self.clear_run(flow, node);
        let from = node.provision_state;
        node.provision_state = flow.success_state(node);
        node.target_provision_state = None;
        node.touch();
        self.history.record(NodeHistoryEntry::new(
            node.uuid,
            Severity::Info,
            "provision_state_change",
            &format!("{from:?} -> {:?} ({flow:?} completed)", node.provision_state),
            "conductor",
        ));
        Ok(())
    }

    async fn fail_run(&self, flow: Flow, node: &mut Node, reason: &str) {
        let _ = self.tear_down(node, flow).await;
        self.clear_run(flow, node);
        let from = node.provision_state;
        node.provision_state = flow.failed_state();
        node.target_provision_state = None;
        node.last_error = Some(reason.to_string());
        node.set_maintenance(Some(reason.to_string()), Some(flow.fault().to_string()));
        node.touch();
        self.history.record(NodeHistoryEntry::new(
            node.uuid,
            Severity::Error,
            "provision_state_change",
            &format!("{from:?} -> {:?} ({flow:?} failed: {reason})", node.provision_state),
            "conductor",
        ));

        if self.poweroff_in_cleanfail && flow == Flow::Clean && node.power_state == crate::model::PowerState::PowerOn {
            node.target_power_state = Some(crate::model::PowerState::PowerOff);
        }
    }

    async fn tear_down(&self, node: &Node, flow: Flow) -> Result<(), DriverError> {
        let driver = self.drivers.get(&node.driver)?;
        let interface = driver.interface(crate::model::InterfaceKind::Deploy)?;
        let step = Step::new(crate::model::InterfaceKind::Deploy, flow.tear_down_step_name(), 0);
        interface.execute_step(node.uuid, &step).await.map(|_| ())
    }

    /// Abort a node parked in `*_WAIT` or `*_HOLD`.
    pub async fn abort(&self, node_id: Uuid, flow: Flow) -> Result<(), ExecutorError> {
        let guard = self.tasks.acquire(node_id, format!("{flow:?} abort"), false, false).await?;
        let mut node = self.repo.get(node_id)?;
        let version = node.version;
        let aborted_step = node.clean_step.clone().or_else(|| node.service_step.clone()).or_else(|| node.deploy_step.clone());

        let tear_down_failed = self.tear_down(&node, flow).await.is_err();
        self.clear_run(flow, &mut node);
        node.provision_state = flow.failed_state();
        node.target_provision_state = None;
        node.last_error = aborted_step.map(|s| format!("aborted at step {s}"));
        if tear_down_failed {
            node.set_maintenance(Some("tear-down failed during abort".to_string()), Some(flow.fault().to_string()));
        }
        node.touch();
        self.repo.compare_and_swap(node, version)?;
        guard.release().await;
        Ok(())
    }
}

fn flow_start_event(flow: Flow) -> Event {
    match flow {
        Flow::Clean => Event::Clean,
        Flow::Service => Event::Service,
        Flow::Deploy => Event::Deploy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{Driver, DriverInterface};
    use crate::model::InterfaceKind;
    use crate::repository::InMemoryNodeRepository;
    use crate::ring::{HashRingManager, RingMember};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct AlwaysComplete {
        kind: InterfaceKind,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DriverInterface for AlwaysComplete {
        fn kind(&self) -> InterfaceKind {
            self.kind.clone()
        }
        fn steps(&self) -> Vec<Step> {
            vec![]
        }
        async fn execute_step(&self, _node_id: Uuid, _step: &Step) -> Result<StepOutcome, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(StepOutcome::Complete)
        }
    }

    struct FirstWaits {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DriverInterface for FirstWaits {
        fn kind(&self) -> InterfaceKind {
            InterfaceKind::Deploy
        }
        fn steps(&self) -> Vec<Step> {
            vec![]
        }
        async fn execute_step(&self, _node_id: Uuid, step: &Step) -> Result<StepOutcome, DriverError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 && step.step == "erase_disks" {
                Ok(StepOutcome::Wait)
            } else {
                Ok(StepOutcome::Complete)
            }
        }
    }

    async fn setup(interface_deploy: Arc<dyn DriverInterface>, interface_power: Arc<dyn DriverInterface>) -> (Executor, Arc<InMemoryNodeRepository>, Uuid) {
        let ring = Arc::new(HashRingManager::with_defaults());
        ring.rebuild(vec![RingMember { hostname: "c1".into(), conductor_group: "default".into(), draining: false }]).await;
        let tasks = TaskManager::new("c1", ring, Arc::new(|_| Some("default".to_string())));

        let mut registry = DriverRegistry::new();
        registry.register(Driver::new("redfish").with_interface(interface_deploy).with_interface(interface_power));
        let registry = Arc::new(registry);

        let repo = Arc::new(InMemoryNodeRepository::new());
        let mut node = Node::new("redfish", "default");
        node.provision_state = ProvisionState::Available;
        let node_id = node.uuid;
        repo.insert(node).unwrap();

        let executor = Executor::new(tasks, registry, repo.clone(), true);
        (executor, repo, node_id)
    }

    #[tokio::test]
    async fn test_s1_all_steps_synchronous() {
        let calls = Arc::new(AtomicUsize::new(0));
        let deploy = Arc::new(AlwaysComplete { kind: InterfaceKind::Deploy, calls: calls.clone() });
        let power = Arc::new(AlwaysComplete { kind: InterfaceKind::Power, calls: calls.clone() });
        let (executor, repo, node_id) = setup(deploy, power).await;

        let steps = vec![
            Step::new(InterfaceKind::Deploy, "erase_disks", 20),
            Step::new(InterfaceKind::Power, "update_firmware", 10),
            Step::new(InterfaceKind::Deploy, "update_firmware", 10),
        ];

        let outcome = executor.start_flow(node_id, Flow::Clean, Some(steps)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);

        let node = repo.get(node_id).unwrap();
        assert_eq!(node.provision_state, ProvisionState::Available);
        assert!(node.clean_step.is_none());
        assert!(node.driver_internal_info.clean_steps.is_none());
        assert!(node.driver_internal_info.clean_step_index.is_none());
        // 3 steps + 1 tear-down call
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_s2_wait_then_continue() {
        let calls = Arc::new(AtomicUsize::new(0));
        let deploy = Arc::new(FirstWaits { calls: calls.clone() });
        let power = Arc::new(AlwaysComplete { kind: InterfaceKind::Power, calls: Arc::new(AtomicUsize::new(0)) });
        let (executor, repo, node_id) = setup(deploy, power).await;

        let steps = vec![Step::new(InterfaceKind::Deploy, "erase_disks", 20)];
        let outcome = executor.start_flow(node_id, Flow::Clean, Some(steps)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Waiting);

        let node = repo.get(node_id).unwrap();
        assert_eq!(node.provision_state, ProvisionState::CleanWait);
        assert_eq!(node.driver_internal_info.clean_step_index, Some(0));

        let outcome = executor.continue_flow(node_id, Flow::Clean).await.unwrap();
        assert_eq!(outcome, RunOutcome::Completed);
    }

    #[tokio::test]
    async fn test_s4_hold_step_suspends_without_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let power = Arc::new(AlwaysComplete { kind: InterfaceKind::Power, calls: calls.clone() });
        let deploy = Arc::new(AlwaysComplete { kind: InterfaceKind::Deploy, calls: calls.clone() });
        let (executor, repo, node_id) = setup(deploy, power).await;

        {
            let mut node = repo.get(node_id).unwrap();
            node.provision_state = ProvisionState::Manageable;
            let v = node.version;
            repo.compare_and_swap(node, v).unwrap();
        }

        let steps = vec![Step::new(InterfaceKind::Power, "hold", 10)];
        let outcome = executor.start_flow(node_id, Flow::Service, Some(steps)).await.unwrap();
        assert_eq!(outcome, RunOutcome::Held);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let node = repo.get(node_id).unwrap();
        assert_eq!(node.provision_state, ProvisionState::ServiceHold);
    }
}
