// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP and WebSocket transports: the request/response boundary for UI
//! commands and the notification stream back to the UI.

pub mod auth;
pub mod http;
pub mod state;
pub mod ws;

pub use state::AppState;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{ErrorCode, InstallError, ServiceError, SessionNotFound};

/// Top-level error response envelope shared across HTTP and WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body containing a machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ErrorCode {
    /// Convert this error code into a transport [`ErrorBody`].
    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    /// Convert this error code into an axum JSON error response.
    pub fn to_http_response(&self, message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

/// A handler failure carrying its transport error code.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.code.to_http_response(self.message).into_response()
    }
}

impl From<SessionNotFound> for ApiError {
    fn from(e: SessionNotFound) -> Self {
        Self::new(ErrorCode::NotFound, e.to_string())
    }
}

impl From<InstallError> for ApiError {
    fn from(e: InstallError) -> Self {
        Self::new(ErrorCode::Conflict, e.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self::new(ErrorCode::Conflict, e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Internal, format!("{e:#}"))
    }
}

/// Build the axum `Router` with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/v1/install", get(http::install_status).post(http::install_start))
        .route("/api/v1/install/cancel", post(http::install_cancel))
        .route("/api/v1/install/inspect", get(http::install_inspect))
        .route("/api/v1/service", get(http::service_status))
        .route("/api/v1/service/start", post(http::service_start))
        .route("/api/v1/service/exit", post(http::service_exit))
        .route("/api/v1/service/navigate", post(http::service_navigate))
        .route("/api/v1/terminals", get(http::terminal_list).post(http::terminal_create))
        .route("/api/v1/terminals/{id}", axum::routing::delete(http::terminal_dispose))
        .route("/api/v1/terminals/{id}/input", post(http::terminal_write))
        .route("/api/v1/terminals/{id}/resize", post(http::terminal_resize))
        .route("/api/v1/terminals/{id}/replay", get(http::terminal_replay))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
