//! VolumeConnector / VolumeTarget — boot-from-volume descriptors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConnector {
    pub uuid: Uuid,
    pub node_id: Uuid,
    pub connector_type: String,
    pub connector_id: String,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeTarget {
    pub uuid: Uuid,
    pub node_id: Uuid,
    pub volume_type: String,
    pub properties: HashMap<String, Value>,
    pub boot_index: i32,
    pub volume_id: String,
}
