//! Port / PortGroup — NIC and bond resources tied to a node's lifetime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

fn normalize_mac(address: &str) -> String {
    address.to_lowercase()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub uuid: Uuid,
    pub address: String,
    pub node_id: Uuid,
    pub pxe_enabled: bool,
    pub physical_network: Option<String>,
    pub is_smartnic: bool,
    pub portgroup_id: Option<Uuid>,
    #[serde(default)]
    pub internal_info: HashMap<String, Value>,
}

impl Port {
    pub fn new(node_id: Uuid, address: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            address: normalize_mac(&address.into()),
            node_id,
            pxe_enabled: true,
            physical_network: None,
            is_smartnic: false,
            portgroup_id: None,
            internal_info: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortGroup {
    pub uuid: Uuid,
    pub node_id: Uuid,
    pub address: Option<String>,
    pub name: Option<String>,
    pub mode: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    pub standalone_ports_supported: bool,
}

impl PortGroup {
    pub fn new(node_id: Uuid, mode: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            node_id,
            address: None,
            name: None,
            mode: mode.into(),
            properties: HashMap::new(),
            standalone_ports_supported: true,
        }
    }
}
