//! ConductorRecord — a live conductor process row, as stored by the
//! registrar (`crate::registrar`). Named `*Record` to avoid colliding with
//! the `Conductor` process type in `crate::registrar`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConductorRecord {
    pub hostname: String,
    pub conductor_group: String,
    /// `(hardware_type, interface_kind)` pairs this conductor can service.
    pub drivers: Vec<String>,
    pub online: bool,
    pub last_heartbeat: DateTime<Utc>,
    /// Set when this conductor asked not to be deregistered on shutdown
    /// (SIGUSR1 — in-place upgrade).
    pub no_deregister: bool,
}

impl ConductorRecord {
    pub fn new(hostname: impl Into<String>, conductor_group: impl Into<String>, drivers: Vec<String>) -> Self {
        Self {
            hostname: hostname.into(),
            conductor_group: conductor_group.into(),
            drivers,
            online: true,
            last_heartbeat: Utc::now(),
            no_deregister: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_heartbeat = Utc::now();
        self.online = true;
    }

    pub fn is_stale(&self, timeout_secs: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_secs
    }
}
