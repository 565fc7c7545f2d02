//! Node resource — a managed physical machine.
//!
//! Mirrors the teacher's `cluster::node::Node` shape (metadata/spec/status
//! split, builder methods, `#[cfg(test)]` unit coverage) but carries the
//! bare-metal lifecycle fields from the data model instead of pipeline
//! placement fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::driver_internal_info::DriverInternalInfo;

/// Provision state of a node. Full set from the FSM (`crate::fsm`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProvisionState {
    Enroll,
    Verifying,
    Manageable,
    Available,
    Active,
    Deploying,
    WaitCallback,
    DeployFailed,
    DeployingHold,
    Deleting,
    Cleaning,
    CleanWait,
    CleanFailed,
    CleanHold,
    Inspecting,
    InspectWait,
    InspectFailed,
    Servicing,
    ServiceWait,
    ServiceFailed,
    ServiceHold,
    Rescuing,
    RescueWait,
    RescueFailed,
    Rescue,
    Unrescuing,
    UnrescueFailed,
    Adopting,
    AdoptFailed,
    Error,
}

impl ProvisionState {
    /// States in which a caller may issue an `abort` event.
    pub fn is_abortable(&self) -> bool {
        matches!(
            self,
            ProvisionState::CleanWait
                | ProvisionState::CleanHold
                | ProvisionState::ServiceWait
                | ProvisionState::ServiceHold
                | ProvisionState::InspectWait
                | ProvisionState::RescueWait
        )
    }

    /// Terminal "stable" states in which no worker is actively driving the
    /// node and a fresh operation may be started.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            ProvisionState::Enroll
                | ProvisionState::Manageable
                | ProvisionState::Available
                | ProvisionState::Active
                | ProvisionState::Error
                | ProvisionState::DeployFailed
                | ProvisionState::CleanFailed
                | ProvisionState::ServiceFailed
                | ProvisionState::InspectFailed
                | ProvisionState::RescueFailed
                | ProvisionState::UnrescueFailed
                | ProvisionState::AdoptFailed
                | ProvisionState::Rescue
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerState {
    PowerOn,
    PowerOff,
    Rebooting,
    SoftPowerOff,
    SoftRebooting,
    Unknown,
}

/// A managed physical machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub uuid: Uuid,
    pub name: Option<String>,

    pub driver: String,
    /// Per-interface driver overrides, e.g. "power" -> "ipmitool".
    #[serde(default)]
    pub interfaces: HashMap<String, String>,

    pub conductor_group: String,

    pub provision_state: ProvisionState,
    pub target_provision_state: Option<ProvisionState>,

    pub power_state: PowerState,
    pub target_power_state: Option<PowerState>,

    pub maintenance: bool,
    pub maintenance_reason: Option<String>,
    pub fault: Option<String>,
    pub last_error: Option<String>,

    /// Hostname of the conductor currently holding the reservation, if any.
    pub reservation: Option<String>,

    pub instance_uuid: Option<Uuid>,

    #[serde(default)]
    pub driver_info: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub driver_internal_info: DriverInternalInfo,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
    pub resource_class: Option<String>,

    /// Tri-state: None = unset, Some(true/false) = explicit operator choice.
    pub automated_clean: Option<bool>,
    pub protected: bool,
    pub retired: bool,
    pub retired_reason: Option<String>,

    pub allocation_id: Option<Uuid>,
    pub parent_node: Option<Uuid>,
    pub owner: Option<String>,
    pub lessee: Option<String>,

    /// The step currently executing, when in `*_WAIT`/`*ING`.
    pub clean_step: Option<serde_json::Value>,
    pub service_step: Option<serde_json::Value>,
    pub deploy_step: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic version counter used for optimistic-concurrency checks.
    pub version: u64,
}

fn node_not_uuid_like(name: &str) -> bool {
    Uuid::parse_str(name).is_err()
}

impl Node {
    pub fn new(driver: impl Into<String>, conductor_group: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            name: None,
            driver: driver.into(),
            interfaces: HashMap::new(),
            conductor_group: conductor_group.into(),
            provision_state: ProvisionState::Enroll,
            target_provision_state: None,
            power_state: PowerState::Unknown,
            target_power_state: None,
            maintenance: false,
            maintenance_reason: None,
            fault: None,
            last_error: None,
            reservation: None,
            instance_uuid: None,
            driver_info: HashMap::new(),
            driver_internal_info: DriverInternalInfo::default(),
            properties: HashMap::new(),
            resource_class: None,
            automated_clean: None,
            protected: false,
            retired: false,
            retired_reason: None,
            allocation_id: None,
            parent_node: None,
            owner: None,
            lessee: None,
            clean_step: None,
            service_step: None,
            deploy_step: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Validate a user-supplied `name`: must not parse as a UUID (spec
    /// invariant: `name` must not collide with the `uuid` addressing space).
    pub fn set_name(&mut self, name: Option<String>) -> Result<(), String> {
        if let Some(ref n) = name {
            if !node_not_uuid_like(n) {
                return Err(format!("node name '{n}' must not be a valid UUID"));
            }
        }
        self.name = name;
        Ok(())
    }

    /// Enforce the global invariant: `maintenance=false` implies `fault=None`.
    pub fn clear_maintenance(&mut self) {
        self.maintenance = false;
        self.maintenance_reason = None;
        self.fault = None;
    }

    pub fn set_maintenance(&mut self, reason: Option<String>, fault: Option<String>) {
        self.maintenance = true;
        self.maintenance_reason = reason;
        self.fault = fault;
    }

    /// §9 DESIGN NOTES triple-state `automated_clean` logic:
    /// clean ⇔ (node.automated_clean ≠ false) ∧
    ///          (node.automated_clean = true ∨ conductor.automated_clean = true)
    pub fn should_automated_clean(&self, conductor_automated_clean: bool) -> bool {
        match self.automated_clean {
            Some(false) => false,
            Some(true) => true,
            None => conductor_automated_clean,
        }
    }

    pub fn is_held(&self) -> bool {
        matches!(
            self.provision_state,
            ProvisionState::CleanHold | ProvisionState::ServiceHold | ProvisionState::DeployingHold
        )
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
        self.version += 1;
    }
}
