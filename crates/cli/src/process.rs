// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External process execution with streamed output and cancellation.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::stream::Utf8Decoder;

pub type OutputFn = Arc<dyn Fn(&str) + Send + Sync>;

/// How long pipe readers may keep running after the child is reaped.
///
/// A descendant that outlives the child can hold the pipes open forever.
pub const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, val: impl Into<String>) -> Self {
        self.env.push((key.into(), val.into()));
        self
    }

    /// A `tokio` command with piped output and no stdin.
    ///
    /// On Unix the child leads a new process group so [`kill_process`]
    /// reaches everything it spawns.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(self.env.iter().map(|(k, v)| (k, v)));
        cmd
    }

    pub fn spawn(&self) -> Result<tokio::process::Child, ProcessError> {
        self.command().spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.display().to_string(),
            source,
        })
    }
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a process run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Killed by a signal, usually our own cancellation.
    Canceled,
}

/// Runs a command to completion.
///
/// Exit code 0 is [`RunOutcome::Success`]. A signal death, or any exit after
/// `cancel` fired, is [`RunOutcome::Canceled`]. Other codes fail with
/// [`ProcessError::Exit`]; a command that never started fails with
/// [`ProcessError::Spawn`].
pub trait ProcessRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        spec: &'a ProcessSpec,
        on_output: OutputFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, ProcessError>> + Send + 'a>>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn run<'a>(
        &'a self,
        spec: &'a ProcessSpec,
        on_output: OutputFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, ProcessError>> + Send + 'a>> {
        Box::pin(async move {
            let mut child = spec.spawn()?;
            let readers = [
                child.stdout.take().map(|s| forward_output(s, Arc::clone(&on_output))),
                child.stderr.take().map(|s| forward_output(s, Arc::clone(&on_output))),
            ];

            let status = tokio::select! {
                status = child.wait() => status?,
                _ = cancel.cancelled() => {
                    if let Some(pid) = child.id() {
                        tracing::debug!(pid, program = %spec.program.display(), "killing canceled process");
                        kill_process(pid);
                    }
                    child.wait().await?
                }
            };

            drain_readers(readers).await;

            match status.code() {
                Some(0) => Ok(RunOutcome::Success),
                _ if cancel.is_cancelled() => Ok(RunOutcome::Canceled),
                None => Ok(RunOutcome::Canceled),
                Some(code) => Err(ProcessError::Exit { code }),
            }
        })
    }
}

/// Stream a pipe to `on_output` as UTF-8 text until EOF.
pub fn forward_output<R>(mut reader: R, on_output: OutputFn) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut decoder = Utf8Decoder::new();
        let mut buf = vec![0u8; 8192];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if !text.is_empty() {
                        on_output(&text);
                    }
                }
                Err(e) => {
                    tracing::debug!(err = %e, "process pipe read failed");
                    break;
                }
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            on_output(&rest);
        }
    })
}

/// Wait for pipe readers to hit EOF, aborting any still running after
/// [`PIPE_DRAIN_TIMEOUT`].
pub async fn drain_readers(readers: impl IntoIterator<Item = Option<JoinHandle<()>>>) {
    let deadline = tokio::time::Instant::now() + PIPE_DRAIN_TIMEOUT;
    for mut reader in readers.into_iter().flatten() {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            tracing::debug!("pipe still open after child exit, abandoning reader");
            reader.abort();
        }
    }
}

/// Terminate a process and its descendants: SIGTERM to the process group
/// on Unix, a forced tree kill on Windows.
///
/// `pid` must come from a child spawned through [`ProcessSpec::command`],
/// which makes it a group leader.
pub fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, killpg, Signal};
        use nix::unistd::Pid;
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGTERM) {
            tracing::debug!(pid, err = %e, "SIGTERM to process group failed");
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                tracing::debug!(pid, err = %e, "SIGTERM failed");
            }
        }
    }
    #[cfg(windows)]
    {
        let result = std::process::Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        if let Err(e) = result {
            tracing::debug!(pid, err = %e, "taskkill failed");
        }
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
