// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and handlers for the launcher REST API.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::install::layout::DirDetails;
use crate::install::InstallRequest;
use crate::pty::SessionId;
use crate::service::window::{decide_navigation, open_external, Navigation};
use crate::status::{InstallStatus, ServiceState, ServiceStatus, Status};
use crate::transport::state::AppState;
use crate::transport::ApiError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Response for `GET /api/v1/health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub terminals: usize,
    pub install_running: bool,
    pub service_running: bool,
}

/// Empty acknowledgement.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ack {
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectQuery {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStartRequest {
    pub location: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigateRequest {
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigateResponse {
    pub action: Navigation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalCreateRequest {
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalCreateResponse {
    pub id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalListResponse {
    pub ids: Vec<SessionId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalWriteRequest {
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalResizeRequest {
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalReplayResponse {
    pub data: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health(State(s): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "running".to_owned(),
        uptime_secs: s.settings.started_at.elapsed().as_secs(),
        terminals: s.terminals.manager().list().len(),
        install_running: s.install.is_running(),
        service_running: s.service.is_running(),
    })
}

pub async fn install_status(State(s): State<Arc<AppState>>) -> Json<InstallStatus> {
    Json(s.install.status())
}

pub async fn install_start(
    State(s): State<Arc<AppState>>,
    Json(req): Json<InstallRequest>,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    s.install.start(req)?;
    Ok((StatusCode::ACCEPTED, Json(Ack { accepted: true })))
}

pub async fn install_cancel(State(s): State<Arc<AppState>>) -> Json<Ack> {
    s.install.cancel();
    Json(Ack { accepted: true })
}

pub async fn install_inspect(
    State(s): State<Arc<AppState>>,
    Query(q): Query<InspectQuery>,
) -> Json<DirDetails> {
    Json(s.inspector.inspect(&q.path).await)
}

pub async fn service_status(State(s): State<Arc<AppState>>) -> Json<ServiceStatus> {
    Json(s.service.status())
}

pub async fn service_start(
    State(s): State<Arc<AppState>>,
    Json(req): Json<ServiceStartRequest>,
) -> Result<(StatusCode, Json<Ack>), ApiError> {
    s.service.start(req.location).await?;
    Ok((StatusCode::ACCEPTED, Json(Ack { accepted: true })))
}

pub async fn service_exit(State(s): State<Arc<AppState>>) -> Json<Ack> {
    s.service.exit();
    Json(Ack { accepted: true })
}

/// Decide where a navigation request from the app window should go.
pub async fn service_navigate(
    State(s): State<Arc<AppState>>,
    Json(req): Json<NavigateRequest>,
) -> Result<Json<NavigateResponse>, ApiError> {
    let Status::Ok(ServiceState::Running { url }) = s.service.status().value else {
        return Err(ApiError::new(ErrorCode::Conflict, "service is not running"));
    };
    let action = decide_navigation(&url, &req.url);
    if action == Navigation::OpenExternal && !s.settings.headless {
        if let Err(e) = open_external(&req.url) {
            tracing::warn!(url = %req.url, err = %e, "failed to open external browser");
        }
    }
    Ok(Json(NavigateResponse { action }))
}

pub async fn terminal_list(State(s): State<Arc<AppState>>) -> Json<TerminalListResponse> {
    Json(TerminalListResponse { ids: s.terminals.manager().list() })
}

pub async fn terminal_create(
    State(s): State<Arc<AppState>>,
    body: Option<Json<TerminalCreateRequest>>,
) -> Result<(StatusCode, Json<TerminalCreateResponse>), ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let id = s.terminals.create(req.cwd.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(TerminalCreateResponse { id })))
}

pub async fn terminal_write(
    State(s): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(req): Json<TerminalWriteRequest>,
) -> Result<Json<Ack>, ApiError> {
    s.terminals.manager().write(&id, &req.data).await?;
    Ok(Json(Ack { accepted: true }))
}

pub async fn terminal_resize(
    State(s): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(req): Json<TerminalResizeRequest>,
) -> Result<Json<Ack>, ApiError> {
    if req.cols == 0 || req.rows == 0 {
        return Err(ApiError::new(ErrorCode::BadRequest, "cols and rows must be positive"));
    }
    s.terminals.manager().resize(&id, req.cols, req.rows).await?;
    Ok(Json(Ack { accepted: true }))
}

pub async fn terminal_replay(
    State(s): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<TerminalReplayResponse>, ApiError> {
    let data = s.terminals.manager().replay(&id).ok_or(crate::error::SessionNotFound)?;
    Ok(Json(TerminalReplayResponse { data }))
}

pub async fn terminal_dispose(
    State(s): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<Ack>, ApiError> {
    s.terminals.manager().dispose(&id)?;
    Ok(Json(Ack { accepted: true }))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
