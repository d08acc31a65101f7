//! HTTP request handlers

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::server::state::ServerState;
use crate::utils::VersionInfo;
use crate::workers::heartbeat::Liveness;
use crate::workers::link::LinkState;

/// Health check response, also read back by the release manager after a promotion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` once our own heartbeats went stale
    pub status: String,
    pub build_hash: String,
    pub slot: Option<String>,
    pub link_state: LinkState,
    pub liveness: Liveness,
    pub started_at: String,
}

/// Health check handler
pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let link = *state.link.borrow();
    let status = if link.liveness == Liveness::Offline {
        "degraded"
    } else {
        "ok"
    };
    Json(HealthResponse {
        status: status.to_string(),
        build_hash: state.build_hash.clone(),
        slot: state.slot.clone(),
        link_state: link.state,
        liveness: link.liveness,
        started_at: state.started_at.clone(),
    })
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    #[serde(flatten)]
    pub version: VersionInfo,
    pub build_hash: String,
}

/// Version handler
pub async fn version_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(VersionResponse {
        version: state.version.clone(),
        build_hash: state.build_hash.clone(),
    })
}
