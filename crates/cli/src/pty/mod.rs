// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod manager;
pub mod nbio;
pub mod spawn;

pub use manager::{CreateOptions, PtyManager, SessionCallbacks};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Opaque terminal session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Shell-style exit code: the code itself, or 128 + signal.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => -1,
        }
    }
}

/// Input delivered to a running backend.
#[derive(Debug)]
pub enum BackendInput {
    Write(Bytes),
}

/// Terminal backend abstraction over a PTY.
///
/// Object-safe for use as `Box<dyn Backend>`.
pub trait Backend: Send + 'static {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        input_rx: mpsc::Receiver<BackendInput>,
        resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>;

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()>;

    fn child_pid(&self) -> Option<u32>;
}

/// Everything needed to start one interactive shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub shell: String,
    pub cwd: PathBuf,
    pub term: String,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

/// Starts terminal backends. The seam lets tests substitute scripted PTYs.
pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<Box<dyn Backend>>;
}

/// Spawns real shells with `forkpty`.
#[derive(Debug, Clone)]
pub struct NativeSpawner {
    pub reap_interval: Duration,
    pub kill_grace: Duration,
}

impl Default for NativeSpawner {
    fn default() -> Self {
        Self { reap_interval: Duration::from_millis(50), kill_grace: Duration::from_millis(500) }
    }
}

impl PtySpawner for NativeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<Box<dyn Backend>> {
        let pty = spawn::NativePty::spawn(
            std::slice::from_ref(&request.shell),
            request.cols,
            request.rows,
            &spawn::ChildSetup { cwd: Some(&request.cwd), term: &request.term, env: &request.env },
        )?
        .with_reap_interval(self.reap_interval)
        .with_kill_grace(self.kill_grace);
        Ok(Box::new(pty))
    }
}

/// Platform default interactive shell.
pub fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_owned()
    } else if cfg!(target_os = "macos") {
        "/bin/zsh".to_owned()
    } else {
        "/bin/bash".to_owned()
    }
}
