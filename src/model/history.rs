//! NodeHistory — append-only event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHistoryEntry {
    pub uuid: Uuid,
    pub node_id: Uuid,
    pub severity: Severity,
    pub event_type: String,
    pub event: String,
    pub conductor: String,
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NodeHistoryEntry {
    pub fn new(
        node_id: Uuid,
        severity: Severity,
        event_type: impl Into<String>,
        event: impl Into<String>,
        conductor: impl Into<String>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            node_id,
            severity,
            event_type: event_type.into(),
            event: event.into(),
            conductor: conductor.into(),
            user: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_has_timestamp() {
        let entry = NodeHistoryEntry::new(
            Uuid::new_v4(),
            Severity::Info,
            "provision_state_change",
            "available -> deploying",
            "conductor-1",
        );
        assert_eq!(entry.conductor, "conductor-1");
        assert!(entry.created_at <= Utc::now());
    }
}
