//! Admin HTTP surface: registry status and cleanup for each endpoint.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AdminError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct StatusResponse {
    pub endpoint: String,
    pub session_count: usize,
    pub client_count: usize,
    pub backend_registered: bool,
    pub sessions: Vec<String>,
}

#[derive(Serialize)]
pub struct CleanupResponse {
    pub endpoint: String,
    pub orphans_removed: usize,
    pub dead_clients_removed: usize,
}

pub async fn proxy_status(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.proxy_registry.status(|_| String::new()).await;
    Json(StatusResponse {
        endpoint: "proxy".to_string(),
        session_count: summary.session_count,
        client_count: summary.client_count,
        backend_registered: summary.backend_registered,
        sessions: summary.buffer_sizes.into_iter().map(|(desc, _)| desc).collect(),
    })
}

pub async fn proxy_cleanup(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.proxy_registry.cleanup().await;
    Json(CleanupResponse {
        endpoint: "proxy".to_string(),
        orphans_removed: report.orphans_removed,
        dead_clients_removed: report.dead_clients_removed,
    })
}

pub async fn call_status(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state
        .call_registry
        .status(|extra| {
            format!(
                "downstream={}B format={}/{}ch/{}bit",
                extra.downstream.len(),
                extra.format.sample_rate,
                extra.format.channels,
                extra.format.bit_depth
            )
        })
        .await;
    Json(StatusResponse {
        endpoint: "call".to_string(),
        session_count: summary.session_count,
        client_count: summary.client_count,
        backend_registered: summary.backend_registered,
        sessions: summary.buffer_sizes.into_iter().map(|(desc, _)| desc).collect(),
    })
}

pub async fn call_cleanup(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.call_registry.cleanup().await;
    Json(CleanupResponse {
        endpoint: "call".to_string(),
        orphans_removed: report.orphans_removed,
        dead_clients_removed: report.dead_clients_removed,
    })
}

/// Look up a single call's status by id, used by operators chasing down a
/// specific stuck session.
pub async fn call_session_status(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<impl IntoResponse, AdminError> {
    let handle: crate::handle::Handle = call_id
        .parse()
        .map_err(|_| AdminError::UnknownSession(call_id.clone()))?;
    let client_id = state
        .call_registry
        .client_for_session(handle)
        .await
        .ok_or_else(|| AdminError::UnknownSession(call_id.clone()))?;
    Ok(Json(serde_json::json!({ "call_id": call_id, "client_id": client_id.to_string() })))
}
