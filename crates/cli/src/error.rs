// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Error codes surfaced on the HTTP and WebSocket transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    Conflict,
    Unauthorized,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Unauthorized => 401,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one external process run.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The executable never started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited with a nonzero code.
    #[error("Process exited with code {code}")]
    Exit { code: i32 },

    /// Waiting on or reading from the process failed.
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code } => Some(*code),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn",
            Self::Exit { .. } => "exit",
            Self::Io(_) => "io",
        }
    }
}

/// Rejection of an install request.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InstallError {
    #[error("an installation is already in progress")]
    AlreadyRunning,
}

/// A service start request that cannot be honored.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("the service is already running")]
    AlreadyRunning,
}

/// The PTY session is not (or no longer) registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session not found")]
pub struct SessionNotFound;

/// Serialize a process failure into status context.
pub fn process_error_context(err: &ProcessError) -> Value {
    let mut ctx = json!({
        "kind": err.kind(),
        "message": err.to_string(),
    });
    if let Some(code) = err.exit_code() {
        ctx["code"] = json!(code);
    }
    if let ProcessError::Spawn { program, .. } = err {
        ctx["program"] = json!(program);
    }
    ctx
}

/// Serialize an arbitrary error chain into status context.
pub fn error_context(err: &anyhow::Error) -> Value {
    if let Some(process) = err.downcast_ref::<ProcessError>() {
        return process_error_context(process);
    }
    let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
    let mut ctx = json!({ "message": err.to_string() });
    if !chain.is_empty() {
        ctx["causes"] = json!(chain);
    }
    ctx
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
