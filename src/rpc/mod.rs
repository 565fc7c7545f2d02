//! Node Router / RPC surface (spec §4.6).
//!
//! Every node-addressed method is resolved through the hash ring first;
//! if this conductor turns out not to own the node by the time
//! `task.acquire` runs (a late rebalance raced the caller), the call is
//! rejected with `Redirect` so the caller re-resolves and retries against
//! the new owner. The wire protocol itself is out of scope; this module is
//! the in-process trait plus a thin axum router exposing the subset worth
//! driving over HTTP for local testing, mirrored on the teacher's
//! `cluster::api::create_control_plane_router`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::executor::{Executor, ExecutorError, Flow};
use crate::model::Node;
use crate::repository::{NodeRepository, RepositoryError};
use crate::ring::HashRingManager;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("node {0} is not owned by this conductor; retry resolution")]
    Redirect(Uuid),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Clone)]
pub struct NodeRouter {
    ring: Arc<HashRingManager>,
    repo: Arc<dyn NodeRepository>,
    executor: Arc<Executor>,
    hostname: String,
}

impl NodeRouter {
    pub fn new(ring: Arc<HashRingManager>, repo: Arc<dyn NodeRepository>, executor: Arc<Executor>, hostname: impl Into<String>) -> Self {
        Self { ring, repo, executor, hostname: hostname.into() }
    }

    async fn ensure_owner(&self, node: &Node) -> Result<(), RpcError> {
        if self.ring.is_owner(&node.conductor_group, node.uuid, &self.hostname).await {
            Ok(())
        } else {
            Err(RpcError::Redirect(node.uuid))
        }
    }

    pub async fn do_node_clean(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.start_flow(node_id, Flow::Clean, None).await?;
        Ok(())
    }

    pub async fn do_node_deploy(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.start_flow(node_id, Flow::Deploy, None).await?;
        Ok(())
    }

    pub async fn do_node_service(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.start_flow(node_id, Flow::Service, None).await?;
        Ok(())
    }

    pub async fn continue_node_clean(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.continue_flow(node_id, Flow::Clean).await?;
        Ok(())
    }

    pub async fn continue_node_deploy(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.continue_flow(node_id, Flow::Deploy).await?;
        Ok(())
    }

    pub async fn continue_node_service(&self, node_id: Uuid) -> Result<(), RpcError> {
        let node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        self.executor.continue_flow(node_id, Flow::Service).await?;
        Ok(())
    }

    /// Agent heartbeat (spec §6 "Heartbeat"): validates the agent token
    /// (left to the caller-supplied `agent_token` matching the stored
    /// `agent_secret_token` — actual validation wired by `crate::rpc`'s
    /// caller), refreshes `agent_url`, and if the node is in an async
    /// `*_WAIT` state resumes the matching flow.
    pub async fn heartbeat(&self, node_id: Uuid, callback_url: String) -> Result<(), RpcError> {
        use crate::model::ProvisionState::*;

        let mut node = self.repo.get(node_id)?;
        self.ensure_owner(&node).await?;
        let version = node.version;
        node.driver_internal_info.agent_url = Some(callback_url);
        node.touch();
        self.repo.compare_and_swap(node.clone(), version)?;

        match node.provision_state {
            CleanWait => self.continue_node_clean(node_id).await?,
            WaitCallback => self.continue_node_deploy(node_id).await?,
            ServiceWait => self.continue_node_service(node_id).await?,
            _ => {}
        }
        Ok(())
    }

    pub async fn get_node(&self, node_id: Uuid) -> Result<Node, RpcError> {
        Ok(self.repo.get(node_id)?)
    }
}

#[derive(Clone)]
pub struct RpcState {
    pub router: NodeRouter,
}

impl IntoResponse for RpcError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            RpcError::Redirect(_) => StatusCode::TEMPORARY_REDIRECT,
            RpcError::Repository(RepositoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            RpcError::Repository(_) => StatusCode::CONFLICT,
            RpcError::Executor(e) => match e.kind() {
                crate::error::ErrorKind::NotFound => StatusCode::NOT_FOUND,
                crate::error::ErrorKind::ClientInput => StatusCode::BAD_REQUEST,
                crate::error::ErrorKind::Conflict => StatusCode::CONFLICT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
pub struct HeartbeatRequest {
    pub callback_url: String,
    #[allow(dead_code)]
    pub agent_version: String,
    #[allow(dead_code)]
    pub agent_token: Option<String>,
}

#[derive(Serialize)]
pub struct NodeView {
    pub uuid: Uuid,
    pub provision_state: String,
}

async fn heartbeat_handler(
    State(state): State<RpcState>,
    Path(node_id): Path<Uuid>,
    Json(body): Json<HeartbeatRequest>,
) -> Result<impl IntoResponse, RpcError> {
    state.router.heartbeat(node_id, body.callback_url).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn clean_handler(State(state): State<RpcState>, Path(node_id): Path<Uuid>) -> Result<impl IntoResponse, RpcError> {
    state.router.do_node_clean(node_id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn deploy_handler(State(state): State<RpcState>, Path(node_id): Path<Uuid>) -> Result<impl IntoResponse, RpcError> {
    state.router.do_node_deploy(node_id).await?;
    Ok(StatusCode::ACCEPTED)
}

pub fn build_router(state: RpcState) -> Router {
    Router::new()
        .route("/heartbeat/{node_id}", post(heartbeat_handler))
        .route("/nodes/{node_id}/states/provision/clean", post(clean_handler))
        .route("/nodes/{node_id}/states/provision/deploy", post(deploy_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
