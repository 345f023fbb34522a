// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor for the installed application's server process.

pub mod window;

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::install::layout::{is_file, Inspector, InstallLayout};
use crate::log::{LogSink, Logger};
use crate::process::{drain_readers, forward_output, kill_process, OutputFn, ProcessSpec};
use crate::status::{ServiceState, ServiceStatus, StatusCell, StatusSink};
use crate::stream::{AnsiSequenceBuffer, LineBuffer, StringMatcher};

use self::window::Presenter;

/// Lines that announce the server is listening.
pub const READY_MARKERS: [&str; 2] = ["Uvicorn running", "Invoke running"];

#[allow(clippy::expect_used)]
static SERVER_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^:\s]+:\d+").expect("url pattern compiles"));

/// Process currently owned by the supervisor.
struct Running {
    pid: Option<u32>,
    /// Set by `exit` before the pid is known; the process is killed as
    /// soon as it spawns.
    exit_requested: bool,
    done: CancellationToken,
}

/// Starts, watches and stops the application server.
///
/// One process at a time. The URL watcher is shared by stdout and stderr
/// and fires once per run.
pub struct ServiceManager {
    inspector: Arc<dyn Inspector>,
    presenter: Arc<dyn Presenter>,
    headless: bool,
    status: StatusCell<ServiceState>,
    log: Logger,
    running: Mutex<Option<Running>>,
}

impl ServiceManager {
    pub fn new(
        inspector: Arc<dyn Inspector>,
        presenter: Arc<dyn Presenter>,
        headless: bool,
        status_sink: StatusSink<ServiceState>,
        log_sink: LogSink,
    ) -> Self {
        Self {
            inspector,
            presenter,
            headless,
            status: StatusCell::new(ServiceState::Uninitialized, status_sink),
            log: Logger::new("service", log_sink),
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Launch the server installed at `location`.
    ///
    /// Returns once the process is spawned or the attempt failed; failures
    /// are reported through status and log rather than the return value.
    pub async fn start(self: &Arc<Self>, location: PathBuf) -> Result<(), ServiceError> {
        let done = {
            let mut running = self.running.lock();
            if running.is_some() {
                return Err(ServiceError::AlreadyRunning);
            }
            let done = CancellationToken::new();
            *running = Some(Running { pid: None, exit_requested: false, done: done.clone() });
            done
        };

        self.status.set_ok(ServiceState::Starting);
        self.log.info("Starting up...");

        let details = self.inspector.inspect(&location).await;
        let layout = InstallLayout::new(&location);
        let marker = layout.first_run_marker();
        let first_run = is_file(&marker).await;

        let Some(installed) = details.installed.filter(|_| details.is_installed) else {
            self.log.error("Invalid installation!");
            self.status.set_error("Invalid installation!", None);
            self.release(&done);
            return Ok(());
        };

        if first_run {
            self.log.info("Preparing first run of this install - may take a minute or two...");
        }

        let spec = ProcessSpec::new(&installed.executable, Vec::<String>::new())
            .env("INVOKEAI_ROOT", location.display().to_string());
        let child = match spec.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status.set_error(e.to_string(), Some(crate::error::process_error_context(&e)));
                self.presenter.close();
                self.log.error(format!("Process error: {e}"));
                self.release(&done);
                return Ok(());
            }
        };

        let pid = child.id();
        if let Some(pid) = pid {
            self.log.info(format!("Started Invoke process with PID: {pid}"));
        }
        let exit_requested = match self.running.lock().as_mut() {
            Some(r) => {
                r.pid = pid;
                r.exit_requested
            }
            None => false,
        };
        if exit_requested {
            self.log.info("Exit requested during startup, stopping process");
            if let Some(pid) = pid {
                kill_process(pid);
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.supervise(child, first_run.then_some(marker)).await;
            this.release(&done);
        });
        Ok(())
    }

    /// Stop the server. Sets `exiting`; the exit itself is reported when
    /// the process is reaped.
    pub fn exit(&self) {
        self.log.info("Shutting down...");
        let pid = self.running.lock().as_mut().map(|r| {
            r.exit_requested = true;
            r.pid
        });
        let Some(pid) = pid else {
            self.presenter.close();
            return;
        };
        self.status.set_ok(ServiceState::Exiting);
        self.presenter.close();
        if let Some(pid) = pid {
            kill_process(pid);
        }
    }

    /// Exit and wait up to `timeout` for the process to be reaped.
    pub async fn shutdown(&self, timeout: Duration) {
        let done = self.running.lock().as_ref().map(|r| r.done.clone());
        let Some(done) = done else {
            return;
        };
        self.exit();
        if tokio::time::timeout(timeout, done.cancelled()).await.is_err() {
            tracing::warn!("service did not exit within {timeout:?}");
        }
    }

    async fn supervise(self: &Arc<Self>, mut child: tokio::process::Child, marker: Option<PathBuf>) {
        let matcher = Arc::new(Mutex::new(self.url_watcher(marker)));
        let readers = [
            child.stdout.take().map(|s| forward_output(s, self.stream_handler(Arc::clone(&matcher)))),
            child.stderr.take().map(|s| forward_output(s, self.stream_handler(Arc::clone(&matcher)))),
        ];

        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                tracing::warn!(err = %e, "waiting on service process failed");
                Some(-1)
            }
        };
        drain_readers(readers).await;

        match code {
            Some(0) | None => {
                self.status.set_ok(ServiceState::Exited);
            }
            Some(code) => {
                self.status.set_error(format!("Process exited with code {code}"), None);
            }
        }
        self.log.info(format!("Process exited with code: {}", code.unwrap_or(0)));
        self.presenter.close();
    }

    /// One-shot watcher that flips the status to `running`.
    fn url_watcher(self: &Arc<Self>, marker: Option<PathBuf>) -> StringMatcher {
        let this = Arc::clone(self);
        StringMatcher::new(
            |line: &str| READY_MARKERS.iter().any(|m| line.contains(m)),
            SERVER_URL.clone(),
            move |url: &str| {
                if this.exit_requested() {
                    return;
                }
                if !this.headless {
                    this.presenter.open(url);
                }
                this.status.set_ok(ServiceState::Running { url: url.to_owned() });
                if let Some(ref marker) = marker {
                    this.remove_marker(marker);
                }
            },
        )
    }

    fn remove_marker(&self, marker: &Path) {
        let marker = marker.to_owned();
        let log = self.log.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::remove_file(&marker).await {
                log.error(format!("Error removing first run marker: {e}"));
            }
        });
    }

    /// Output callback for one pipe: log every chunk, then feed ANSI-safe
    /// whole lines to the shared watcher.
    fn stream_handler(&self, matcher: Arc<Mutex<StringMatcher>>) -> OutputFn {
        let log = self.log.clone();
        let framing = Mutex::new((AnsiSequenceBuffer::new(), LineBuffer::stripping_ansi()));
        Arc::new(move |text: &str| {
            log.info(text);
            if matcher.lock().has_matched() {
                return;
            }
            let lines = {
                let mut framing = framing.lock();
                let (ansi, lines) = &mut *framing;
                match ansi.append(text).complete() {
                    Some(complete) => lines.append(&complete),
                    None => return,
                }
            };
            let mut matcher = matcher.lock();
            for line in &lines {
                matcher.check_for_match(line);
            }
        })
    }

    fn exit_requested(&self) -> bool {
        self.running.lock().as_ref().is_some_and(|r| r.exit_requested)
    }

    fn release(&self, done: &CancellationToken) {
        *self.running.lock() = None;
        done.cancel();
    }
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("headless", &self.headless)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
