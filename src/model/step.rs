//! Step — a unit of work advertised by a driver interface.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceKind {
    Power,
    Deploy,
    Management,
    Raid,
    Bios,
    Network,
    Vendor,
    Inspect,
    Console,
    Storage,
}

impl std::fmt::Display for InterfaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterfaceKind::Power => "power",
            InterfaceKind::Deploy => "deploy",
            InterfaceKind::Management => "management",
            InterfaceKind::Raid => "raid",
            InterfaceKind::Bios => "bios",
            InterfaceKind::Network => "network",
            InterfaceKind::Vendor => "vendor",
            InterfaceKind::Inspect => "inspect",
            InterfaceKind::Console => "console",
            InterfaceKind::Storage => "storage",
        };
        write!(f, "{s}")
    }
}

/// A single step as persisted in `driver_internal_info.clean_steps` etc, and
/// as returned by a driver interface's `get_clean_steps`/`get_service_steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub interface: InterfaceKind,
    pub step: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    /// 0 = never auto-run; only selectable by an explicit manual list.
    pub priority: i32,
    #[serde(default)]
    pub execute_on_child_nodes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_child_node_execution: Option<Vec<Uuid>>,
}

impl Step {
    pub fn new(interface: InterfaceKind, step: impl Into<String>, priority: i32) -> Self {
        Self {
            interface,
            step: step.into(),
            args: Map::new(),
            priority,
            execute_on_child_nodes: false,
            limit_child_node_execution: None,
        }
    }

    /// Stable sort key for automated ordering: descending priority, then
    /// interface name, then step name (spec §4.4 "Step collection").
    pub fn sort_key(&self) -> (std::cmp::Reverse<i32>, String, String) {
        (
            std::cmp::Reverse(self.priority),
            self.interface.to_string(),
            self.step.clone(),
        )
    }

    pub fn key(&self) -> (InterfaceKind, String) {
        (self.interface.clone(), self.step.clone())
    }
}

/// Order a set of collected steps for an automated run: keep only
/// `priority > 0`, sort descending by priority with a stable tie-break.
pub fn order_automated(mut steps: Vec<Step>) -> Vec<Step> {
    steps.retain(|s| s.priority > 0);
    steps.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    steps
}

/// Order a manual run: caller's order is preserved; unknown steps (not
/// present in `available`) are rejected.
pub fn order_manual(requested: Vec<Step>, available: &[Step]) -> Result<Vec<Step>, String> {
    for step in &requested {
        if !available.iter().any(|a| a.key() == step.key()) {
            return Err(format!(
                "unknown step '{}.{}' is not advertised by any enabled driver interface",
                step.interface, step.step
            ));
        }
    }
    Ok(requested)
}
