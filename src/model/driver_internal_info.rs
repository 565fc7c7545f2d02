//! `driver_internal_info` — the conductor-private mutable workspace on a
//! node. External clients never write this directly (spec §3 invariant);
//! the core reads/writes the well-known keys enumerated in DESIGN NOTES §9
//! and treats everything else as pass-through, owned by drivers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverInternalInfo {
    // --- cleaning ---
    pub clean_steps: Option<Vec<Value>>,
    pub clean_step_index: Option<usize>,
    pub cleaning_reboot: Option<bool>,
    pub skip_current_clean_step: Option<bool>,

    // --- servicing ---
    pub service_steps: Option<Vec<Value>>,
    pub service_step_index: Option<usize>,
    pub service_reboot: Option<bool>,
    pub skip_current_service_step: Option<bool>,

    // --- deployment ---
    pub deploy_steps: Option<Vec<Value>>,
    pub deploy_step_index: Option<usize>,
    pub deployment_reboot: Option<bool>,
    pub skip_current_deploy_step: Option<bool>,

    // --- agent / fast-track ---
    pub agent_url: Option<String>,
    pub agent_secret_token: Option<String>,
    pub agent_secret_token_pregenerated: Option<bool>,
    pub fast_track: Option<bool>,

    // --- graphical console ---
    pub vnc_host: Option<String>,
    pub vnc_port: Option<u16>,
    pub novnc_secret_token: Option<String>,
    pub console_expires_at: Option<chrono::DateTime<chrono::Utc>>,

    // --- networking ---
    pub tenant_vif_port_id: Option<String>,

    // --- power-sync bookkeeping (periodics) ---
    pub power_sync_failures: Option<u32>,

    /// Everything else, owned by drivers and passed through untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl DriverInternalInfo {
    /// Clear every run-scoped key for a given flow, used on completion and
    /// on abort. `preserve_agent` keeps `agent_url`/`agent_secret_token` when
    /// fast-track is active.
    pub fn clear_clean_run(&mut self, preserve_agent: bool) {
        self.clean_step_index = None;
        self.clean_steps = None;
        self.cleaning_reboot = None;
        self.skip_current_clean_step = None;
        if !preserve_agent {
            self.agent_url = None;
            self.agent_secret_token = None;
        }
    }

    pub fn clear_service_run(&mut self, preserve_agent: bool) {
        self.service_step_index = None;
        self.service_steps = None;
        self.service_reboot = None;
        self.skip_current_service_step = None;
        if !preserve_agent {
            self.agent_url = None;
            self.agent_secret_token = None;
        }
    }

    pub fn clear_deploy_run(&mut self, preserve_agent: bool) {
        self.deploy_step_index = None;
        self.deploy_steps = None;
        self.deployment_reboot = None;
        self.skip_current_deploy_step = None;
        if !preserve_agent {
            self.agent_url = None;
            self.agent_secret_token = None;
        }
    }

    pub fn is_fast_track(&self) -> bool {
        self.fast_track.unwrap_or(false)
    }
}
