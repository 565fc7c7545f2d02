//! Driver interfaces — the pluggable hardware-facing surface the executor
//! dispatches into. Concrete BMC protocols are out of scope (spec Non-goals);
//! this module defines the trait boundary and a fail-fast registry, the
//! same shape the teacher's `runtime` module used for swappable backends
//! (`docker`/`ollama`/`vllm`/…) behind one dispatch trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::model::{InterfaceKind, Step};

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("driver '{0}' does not implement interface {1}")]
    InterfaceNotSupported(String, InterfaceKind),

    #[error("hardware type '{0}' has no registered driver")]
    UnknownDriver(String),

    #[error("agent connection failed")]
    AgentConnectionFailed,

    #[error("agent is still processing the previous command")]
    AgentInProgress,

    #[error("step execution failed: {0}")]
    StepFailed(String),
}

/// Outcome of executing one step, mirroring the three cases spec §4.4
/// distinguishes: synchronous completion, asynchronous wait, or an
/// unexpected value the executor must treat as a driver bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Complete,
    Wait,
}

/// One hardware interface a driver may implement. Interfaces not
/// implemented by a driver simply aren't present in its `steps()` map.
#[async_trait]
pub trait DriverInterface: Send + Sync {
    fn kind(&self) -> InterfaceKind;

    /// The steps this interface advertises for a given node's current
    /// hardware facts. Priority-zero steps are manual-only (spec §4.4).
    fn steps(&self) -> Vec<Step>;

    async fn execute_step(&self, node_id: Uuid, step: &Step) -> Result<StepOutcome, DriverError>;
}

/// A driver bundles the interfaces it implements for one `driver` name
/// (e.g. `redfish`). Nodes reference drivers by this name plus optional
/// per-interface overrides (`Node.interfaces`).
pub struct Driver {
    pub name: String,
    interfaces: HashMap<InterfaceKind, Arc<dyn DriverInterface>>,
}

impl Driver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), interfaces: HashMap::new() }
    }

    pub fn with_interface(mut self, interface: Arc<dyn DriverInterface>) -> Self {
        self.interfaces.insert(interface.kind(), interface);
        self
    }

    pub fn interface(&self, kind: InterfaceKind) -> Result<&Arc<dyn DriverInterface>, DriverError> {
        self.interfaces
            .get(&kind)
            .ok_or_else(|| DriverError::InterfaceNotSupported(self.name.clone(), kind))
    }

    pub fn steps_for(&self, kind: InterfaceKind) -> Vec<Step> {
        self.interfaces.get(&kind).map(|i| i.steps()).unwrap_or_default()
    }
}

/// Registry of enabled drivers. Loading is fail-fast: a conductor whose
/// configuration names a driver not registered here refuses to start,
/// mirroring `base_manager.py`'s behavior of aborting on a missing
/// hardware-type entry point rather than limping along without it.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Driver) {
        self.drivers.insert(driver.name.clone(), Arc::new(driver));
    }

    pub fn get(&self, name: &str) -> Result<Arc<Driver>, DriverError> {
        self.drivers.get(name).cloned().ok_or_else(|| DriverError::UnknownDriver(name.to_string()))
    }

    /// Fail fast if any name in `required` has no registered driver.
    pub fn ensure_all_present(&self, required: &[String]) -> Result<(), DriverError> {
        for name in required {
            self.get(name)?;
        }
        Ok(())
    }

    /// Collect every step a driver advertises across all of its interfaces,
    /// used by the executor to build the automated run's candidate list.
    pub fn collect_steps(&self, driver_name: &str) -> Result<Vec<Step>, DriverError> {
        let driver = self.get(driver_name)?;
        Ok([
            InterfaceKind::Power,
            InterfaceKind::Deploy,
            InterfaceKind::Management,
            InterfaceKind::Raid,
            InterfaceKind::Bios,
            InterfaceKind::Network,
            InterfaceKind::Vendor,
            InterfaceKind::Inspect,
            InterfaceKind::Storage,
        ]
        .into_iter()
        .flat_map(|kind| driver.steps_for(kind))
        .collect())
    }
}
