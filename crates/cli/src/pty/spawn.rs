// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::io::Write as _;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use nix::errno::Errno;
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, SigHandler, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::nbio::{is_hangup, read_chunk, set_nonblocking, write_all, MasterFd};
use super::{Backend, BackendInput, ExitStatus};

/// Process setup applied in the child between fork and exec.
#[derive(Debug, Clone, Copy)]
pub struct ChildSetup<'a> {
    pub cwd: Option<&'a Path>,
    pub term: &'a str,
    pub env: &'a [(String, String)],
}

impl Default for ChildSetup<'_> {
    fn default() -> Self {
        Self { cwd: None, term: "xterm-256color", env: &[] }
    }
}

/// Native PTY backend that spawns a child process via `forkpty`.
pub struct NativePty {
    master: AsyncFd<MasterFd>,
    child_pid: Pid,
    reaped: Arc<AtomicBool>,
    reap_interval: Duration,
    kill_grace: Duration,
}

impl NativePty {
    /// Spawn `command` on a new PTY. `command` must not be empty.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String], cols: u16, rows: u16, setup: &ChildSetup<'_>) -> anyhow::Result<Self> {
        if command.is_empty() {
            bail!("empty command");
        }
        // Convert before forking so the child does not allocate on failure paths.
        let c_args: Vec<CString> = command
            .iter()
            .map(|s| CString::new(s.as_bytes()))
            .collect::<Result<_, _>>()
            .context("invalid command argument")?;

        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. We immediately exec.
        let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                // Tokio ignores SIGPIPE and the child would inherit that.
                // SAFETY: resetting a disposition in the post-fork child
                // before exec.
                unsafe {
                    let _ = nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
                }
                if let Some(dir) = setup.cwd {
                    let _ = nix::unistd::chdir(dir);
                }
                std::env::set_var("TERM", setup.term);
                for (key, val) in setup.env {
                    std::env::set_var(key, val);
                }

                let err = match execvp(&c_args[0], &c_args) {
                    Err(e) => e,
                    Ok(never) => match never {},
                };
                let _ = writeln!(std::io::stderr(), "launchpad: exec {}: {err}", command[0]);
                // SAFETY: leave the forked child without running the
                // parent's atexit handlers or destructors.
                unsafe { libc::_exit(127) }
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let afd = AsyncFd::new(MasterFd(master)).context("AsyncFd::new failed")?;
                Ok(Self {
                    master: afd,
                    child_pid: child,
                    reaped: Arc::new(AtomicBool::new(false)),
                    reap_interval: Duration::from_millis(50),
                    kill_grace: Duration::from_millis(500),
                })
            }
        }
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }
}

impl Backend for NativePty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<BackendInput>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anyhow::Result<ExitStatus>> + Send + '_>>
    {
        let pid = self.child_pid;
        let reaped = Arc::clone(&self.reaped);
        Box::pin(async move {
            let mut buf = vec![0u8; 8192];
            let mut input_open = true;
            let mut resize_open = true;

            loop {
                tokio::select! {
                    result = read_chunk(&self.master, &mut buf) => {
                        match result {
                            Ok(0) => break,
                            Ok(n) => {
                                if output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) if is_hangup(&e) => break,
                            Err(e) => return Err(e.into()),
                        }
                    }
                    input = input_rx.recv(), if input_open => {
                        match input {
                            Some(BackendInput::Write(data)) => {
                                if let Err(e) = write_all(&self.master, &data).await {
                                    if is_hangup(&e) {
                                        break;
                                    }
                                    return Err(e.into());
                                }
                            }
                            None => input_open = false,
                        }
                    }
                    resize = resize_rx.recv(), if resize_open => {
                        match resize {
                            Some((cols, rows)) => {
                                if let Err(e) = self.resize(cols, rows) {
                                    tracing::debug!(err = %e, "pty resize failed");
                                }
                            }
                            None => resize_open = false,
                        }
                    }
                }
            }

            // Reap on a blocking thread to keep the runtime responsive.
            let status = tokio::task::spawn_blocking(move || wait_for_exit(pid))
                .await
                .context("join wait thread")??;
            reaped.store(true, Ordering::Release);
            Ok(status)
        })
    }

    fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws =
            rustix::termios::Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        rustix::termios::tcsetwinsize(self.master.get_ref(), ws)
            .context("TIOCSWINSZ ioctl failed")?;
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        Some(self.child_pid.as_raw() as u32)
    }
}

impl Drop for NativePty {
    fn drop(&mut self) {
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        // forkpty puts the child in its own session, so its PID is also the
        // process group ID. Signal the group to reach grandchildren too.
        let pgid = Pid::from_raw(-self.child_pid.as_raw());
        let _ = kill(pgid, Signal::SIGHUP);

        let interval = self.reap_interval.max(Duration::from_millis(1));
        let iterations = (self.kill_grace.as_millis() / interval.as_millis()).max(1);
        for _ in 0..iterations {
            match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => return,
                Err(Errno::ECHILD) => return,
                _ => std::thread::sleep(interval),
            }
        }

        tracing::debug!(pid = self.child_pid.as_raw(), "pty child ignored SIGHUP, sending SIGKILL");
        let _ = kill(pgid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, None);
    }
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
