//! Registrar — conductor membership: registration at startup, periodic
//! heartbeat, and graceful/ungraceful departure. Feeds `crate::ring` its
//! view of which conductors are online.

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use crate::model::ConductorRecord;
use crate::ring::RingMember;

#[derive(Error, Debug)]
pub enum RegistrarError {
    #[error("conductor '{0}' is already registered and still heartbeating")]
    AlreadyRegistered(String),
}

/// Controls what a graceful shutdown does to this conductor's membership
/// row: `Deregister` removes it immediately, `NoDeregister` (SIGUSR1) keeps
/// the row so an in-place upgrade doesn't cause a rebalance storm, `Drain`
/// (SIGUSR2) stops accepting new work but stays mapped until
/// `hash_ring_reset_interval` elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Deregister,
    NoDeregister,
    Drain,
}

#[derive(Clone)]
pub struct Registrar {
    conductors: Arc<DashMap<String, ConductorRecord>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self { conductors: Arc::new(DashMap::new()) }
    }

    /// Register this process on startup. Fails if a row for `hostname`
    /// already exists and has heartbeated within `stale_after` — that
    /// indicates a second instance is already running, rather than a
    /// crashed predecessor whose row simply wasn't cleaned up.
    pub fn register(
        &self,
        hostname: impl Into<String>,
        conductor_group: impl Into<String>,
        drivers: Vec<String>,
        stale_after_secs: i64,
    ) -> Result<(), RegistrarError> {
        let hostname = hostname.into();
        if let Some(existing) = self.conductors.get(&hostname) {
            if !existing.is_stale(stale_after_secs) {
                return Err(RegistrarError::AlreadyRegistered(hostname));
            }
        }
        self.conductors.insert(hostname.clone(), ConductorRecord::new(hostname, conductor_group, drivers));
        Ok(())
    }

    pub fn heartbeat(&self, hostname: &str) {
        if let Some(mut entry) = self.conductors.get_mut(hostname) {
            entry.touch();
        }
    }

    pub fn mark_offline(&self, hostname: &str) {
        if let Some(mut entry) = self.conductors.get_mut(hostname) {
            entry.online = false;
        }
    }

    /// Called at shutdown. `Deregister` removes the row outright;
    /// `NoDeregister` leaves it in place (still online) for a fast restart;
    /// `Drain` marks it offline but keeps the row present so a subsequent
    /// ring rebuild can still route in-flight lookups to it until it falls
    /// out of `online_members` on its own.
    pub fn shutdown(&self, hostname: &str, mode: ShutdownMode) {
        match mode {
            ShutdownMode::Deregister => {
                self.conductors.remove(hostname);
            }
            ShutdownMode::NoDeregister => {
                if let Some(mut entry) = self.conductors.get_mut(hostname) {
                    entry.no_deregister = true;
                }
            }
            ShutdownMode::Drain => self.mark_offline(hostname),
        }
    }

    /// Mark every conductor stale beyond `stale_after_secs` offline, called
    /// from a periodic sweep so the ring stops routing to dead processes.
    pub fn sweep_stale(&self, stale_after_secs: i64) {
        for mut entry in self.conductors.iter_mut() {
            if entry.is_stale(stale_after_secs) {
                entry.online = false;
            }
        }
    }

    pub fn online_members(&self) -> Vec<RingMember> {
        self.conductors
            .iter()
            .filter(|e| e.online)
            .map(|e| RingMember {
                hostname: e.hostname.clone(),
                conductor_group: e.conductor_group.clone(),
                draining: false,
            })
            .collect()
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_duplicate_rejected() {
        let registrar = Registrar::new();
        registrar.register("c1", "default", vec!["redfish".into()], 30).unwrap();
        let result = registrar.register("c1", "default", vec!["redfish".into()], 30);
        assert!(matches!(result, Err(RegistrarError::AlreadyRegistered(_))));
    }

    #[test]
    fn test_deregister_removes_row() {
        let registrar = Registrar::new();
        registrar.register("c1", "default", vec![], 30).unwrap();
        registrar.shutdown("c1", ShutdownMode::Deregister);
        assert!(registrar.online_members().is_empty());
    }

    #[test]
    fn test_no_deregister_keeps_row_online() {
        let registrar = Registrar::new();
        registrar.register("c1", "default", vec![], 30).unwrap();
        registrar.shutdown("c1", ShutdownMode::NoDeregister);
        assert_eq!(registrar.online_members().len(), 1);
    }

    #[test]
    fn test_drain_marks_offline() {
        let registrar = Registrar::new();
        registrar.register("c1", "default", vec![], 30).unwrap();
        registrar.shutdown("c1", ShutdownMode::Drain);
        assert!(registrar.online_members().is_empty());
    }
}
