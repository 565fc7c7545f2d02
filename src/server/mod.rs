//! Process bootstrap: wires config, repository, hash ring, registrar,
//! driver registry, task manager, executor, and the standard periodic
//! tasks into a running conductor. Shared by the `conductor` and
//! `singleprocess` binaries, mirroring the teacher's `server::AppState`
//! role but built around `ConductorConfig` instead of a `Composition`.

use std::sync::Arc;

use tracing::info;

use crate::config::ConductorConfig;
use crate::drivers::DriverRegistry;
use crate::executor::Executor;
use crate::metrics::SharedMetrics;
use crate::periodics::{
    spawn_agent_keepalive, spawn_conductor_heartbeat, spawn_console_expiry, spawn_fail_stuck_deploys,
    spawn_ring_reset, spawn_sync_power_state, PeriodicsHandle,
};
use crate::registrar::{Registrar, ShutdownMode};
use crate::repository::{InMemoryNodeRepository, NodeRepository};
use crate::ring::HashRingManager;
use crate::rpc::{NodeRouter, RpcState};
use crate::model::PowerState;

/// A running conductor process: every subsystem handle needed to serve RPCs
/// and keep the periodic tasks alive. Built once at startup, torn down once
/// at shutdown.
pub struct ConductorApp {
    pub hostname: String,
    pub ring: Arc<HashRingManager>,
    pub repo: Arc<dyn NodeRepository>,
    pub registrar: Registrar,
    pub drivers: Arc<DriverRegistry>,
    pub executor: Arc<Executor>,
    pub metrics: SharedMetrics,
    periodics: Vec<PeriodicsHandle>,
}

impl ConductorApp {
    /// Assembles the subsystems from config and registers this process in
    /// the registrar. `drivers` is supplied by the caller since concrete
    /// driver interface implementations (redfish, ipmi, …) are an external
    /// collaborator this core doesn't implement.
    pub fn bootstrap(config: &ConductorConfig, hostname: String, drivers: Arc<DriverRegistry>, metrics: SharedMetrics) -> anyhow::Result<Self> {
        drivers.ensure_all_present(&config.conductor.enabled_drivers).map_err(anyhow::Error::from)?;

        let ring = Arc::new(HashRingManager::new(64, std::time::Duration::from_secs(config.conductor.hash_ring_reset_interval_secs)));
        let repo: Arc<dyn NodeRepository> = Arc::new(InMemoryNodeRepository::new());
        let registrar = Registrar::new();
        registrar.register(hostname.clone(), config.conductor.conductor_group.clone(), config.conductor.enabled_drivers.clone(), 120)?;

        let repo_for_group = repo.clone();
        let conductor_group_of = Arc::new(move |node_id: uuid::Uuid| repo_for_group.get(node_id).ok().map(|n| n.conductor_group));
        let tasks = crate::reservation::TaskManager::new(hostname.clone(), ring.clone(), conductor_group_of);

        let executor = Arc::new(Executor::new(tasks, drivers.clone(), repo.clone(), config.conductor.poweroff_in_cleanfail));

        Ok(Self { hostname, ring, repo, registrar, drivers, executor, metrics, periodics: Vec::new() })
    }

    /// Starts the standard periodic task set. Held handles stop their loops
    /// when `shutdown` is called.
    pub fn spawn_periodics(&mut self, config: &ConductorConfig) {
        let registrar = self.registrar.clone();
        let hostname_for_heartbeat = self.hostname.clone();
        let touch: Arc<dyn Fn() -> bool + Send + Sync> = Arc::new(move || {
            registrar.heartbeat(&hostname_for_heartbeat);
            true
        });
        self.periodics.push(spawn_conductor_heartbeat(self.hostname.clone(), std::time::Duration::from_secs(10), touch));

        let registrar = self.registrar.clone();
        let members: Arc<dyn Fn() -> Vec<crate::ring::RingMember> + Send + Sync> = Arc::new(move || registrar.online_members());
        self.periodics.push(spawn_ring_reset(
            self.ring.clone(),
            std::time::Duration::from_secs(config.conductor.hash_ring_reset_interval_secs),
            members,
        ));

        self.periodics.push(spawn_fail_stuck_deploys(
            self.repo.clone(),
            self.ring.clone(),
            self.hostname.clone(),
            std::time::Duration::from_secs(60),
        ));

        let query_power: Arc<dyn Fn(&crate::model::Node) -> Option<PowerState> + Send + Sync> = Arc::new(|_| None);
        self.periodics.push(spawn_sync_power_state(
            self.repo.clone(),
            self.ring.clone(),
            self.hostname.clone(),
            std::time::Duration::from_secs(60),
            config.conductor.power_state_sync_max_retries,
            query_power,
        ));

        let tear_down_console: Arc<dyn Fn(&crate::model::Node) -> bool + Send + Sync> = Arc::new(|_| true);
        self.periodics.push(spawn_console_expiry(
            self.repo.clone(),
            self.ring.clone(),
            self.hostname.clone(),
            std::time::Duration::from_secs(60),
            tear_down_console,
        ));

        self.periodics.push(spawn_agent_keepalive(
            self.repo.clone(),
            self.ring.clone(),
            self.hostname.clone(),
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(300),
        ));
    }

    pub fn node_router(&self) -> NodeRouter {
        NodeRouter::new(self.ring.clone(), self.repo.clone(), self.executor.clone(), self.hostname.clone())
    }

    pub fn rpc_router(&self) -> axum::Router {
        crate::rpc::build_router(RpcState { router: self.node_router() })
    }

    /// Orderly shutdown: stop every periodic task, then apply `mode` to this
    /// conductor's registrar row (deregister / keep-alive / drain).
    pub async fn shutdown(&self, mode: ShutdownMode, drain_timeout: std::time::Duration) {
        for handle in &self.periodics {
            handle.shutdown();
        }
        if mode == ShutdownMode::Drain {
            self.executor.tasks().drain(drain_timeout).await;
        }
        self.registrar.shutdown(&self.hostname, mode);
        info!(hostname = %self.hostname, ?mode, "conductor shut down");
    }
}
