// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted backends, recorders, and assertion helpers.

use std::collections::VecDeque;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ProcessError;
use crate::event::{NotifyHub, Source};
use crate::install::layout::{DirDetails, Inspector};
use crate::install::pins::StaticPins;
use crate::install::platform::{Accelerator, Arch, Os, Platform};
use crate::install::{InstallManager, InstallOptions};
use crate::log::{LogEntry, LogLevel, LogSink};
use crate::process::{OutputFn, ProcessRunner, ProcessSpec, RunOutcome};
use crate::pty::manager::PtyManagerOptions;
use crate::pty::{Backend, BackendInput, ExitStatus, PtyManager, PtySpawner, SpawnRequest};
use crate::service::window::{NotifyPresenter, Presenter};
use crate::service::ServiceManager;
use crate::status::{Status, StatusSink, Timestamped};
use crate::terminal::Terminals;
use crate::transport::state::{AppState, Settings};

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() >= deadline {
            anyhow::bail!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// A fake PTY backend for deterministic, sub-millisecond session tests.
pub struct MockPty {
    output: Vec<Bytes>,
    chunk_delay: Duration,
    exit_status: ExitStatus,
    drain_input: bool,
    captured_input: Arc<Mutex<Vec<Bytes>>>,
    captured_resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    dropped: Arc<AtomicBool>,
}

impl Default for MockPty {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPty {
    pub fn new() -> Self {
        Self {
            output: Vec::new(),
            chunk_delay: Duration::ZERO,
            exit_status: ExitStatus { code: Some(0), signal: None },
            drain_input: false,
            captured_input: Arc::new(Mutex::new(Vec::new())),
            captured_resizes: Arc::new(Mutex::new(Vec::new())),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_output(chunks: Vec<Bytes>) -> Self {
        let mut pty = Self::new();
        pty.output = chunks;
        pty
    }

    pub fn exit_status(mut self, s: ExitStatus) -> Self {
        self.exit_status = s;
        self
    }

    pub fn chunk_delay(mut self, d: Duration) -> Self {
        self.chunk_delay = d;
        self
    }

    /// Stay alive after the output, recording input until the session closes.
    pub fn drain_input(mut self) -> Self {
        self.drain_input = true;
        self
    }

    pub fn captured_input(&self) -> Arc<Mutex<Vec<Bytes>>> {
        Arc::clone(&self.captured_input)
    }

    pub fn captured_resizes(&self) -> Arc<Mutex<Vec<(u16, u16)>>> {
        Arc::clone(&self.captured_resizes)
    }

    /// Set once the backend is dropped (the session's process is gone).
    pub fn dropped(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.dropped)
    }
}

impl Drop for MockPty {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

impl Backend for MockPty {
    fn run(
        &mut self,
        output_tx: mpsc::Sender<Bytes>,
        mut input_rx: mpsc::Receiver<BackendInput>,
        mut resize_rx: mpsc::Receiver<(u16, u16)>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ExitStatus>> + Send + '_>> {
        let output = std::mem::take(&mut self.output);
        let chunk_delay = self.chunk_delay;
        let exit_status = self.exit_status;
        let drain_input = self.drain_input;
        let captured_input = Arc::clone(&self.captured_input);
        let captured_resizes = Arc::clone(&self.captured_resizes);

        Box::pin(async move {
            for chunk in output {
                if output_tx.send(chunk).await.is_err() {
                    break;
                }
                if chunk_delay > Duration::ZERO {
                    tokio::time::sleep(chunk_delay).await;
                }
            }
            if drain_input {
                loop {
                    tokio::select! {
                        msg = input_rx.recv() => match msg {
                            Some(BackendInput::Write(data)) => captured_input.lock().push(data),
                            None => break,
                        },
                        Some(size) = resize_rx.recv() => captured_resizes.lock().push(size),
                    }
                }
            }
            Ok(exit_status)
        })
    }

    fn resize(&self, _cols: u16, _rows: u16) -> anyhow::Result<()> {
        Ok(())
    }

    fn child_pid(&self) -> Option<u32> {
        None
    }
}

/// [`PtySpawner`] handing out queued [`MockPty`] backends.
///
/// With an empty queue it returns a backend that stays alive until disposed.
#[derive(Default)]
pub struct MockSpawner {
    queue: Mutex<VecDeque<MockPty>>,
    fail: Mutex<Option<String>>,
    requests: Mutex<Vec<SpawnRequest>>,
}

impl MockSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, pty: MockPty) {
        self.queue.lock().push_back(pty);
    }

    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail.lock() = Some(message.into());
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }
}

impl PtySpawner for MockSpawner {
    fn spawn(&self, request: &SpawnRequest) -> anyhow::Result<Box<dyn Backend>> {
        if let Some(message) = self.fail.lock().take() {
            anyhow::bail!(message);
        }
        self.requests.lock().push(request.clone());
        let pty = self.queue.lock().pop_front().unwrap_or_else(|| MockPty::new().drain_input());
        Ok(Box::new(pty))
    }
}

/// What a [`ScriptedRunner`] does for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    Succeed,
    Fail(i32),
    SpawnFail,
    /// Signal death without cancellation.
    Killed,
    /// Run until the cancellation token fires, then report canceled.
    Block,
}

/// [`ProcessRunner`] that replays scripted outcomes and records each command.
///
/// Unscripted invocations succeed.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<(Script, Vec<String>)>>,
    calls: Mutex<Vec<ProcessSpec>>,
    started: tokio::sync::Notify,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) -> &Self {
        self.script.lock().push_back((script, Vec::new()));
        self
    }

    /// Queue an outcome that first writes `output` chunks.
    pub fn push_with_output(&self, script: Script, output: &[&str]) -> &Self {
        self.script.lock().push_back((script, output.iter().map(|s| (*s).to_owned()).collect()));
        self
    }

    pub fn calls(&self) -> Vec<ProcessSpec> {
        self.calls.lock().clone()
    }

    /// Wait until at least `n` commands have started.
    pub async fn wait_for_calls(&self, n: usize) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let notified = self.started.notified();
            if self.calls.lock().len() >= n {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                anyhow::bail!("only {} of {n} commands started", self.calls.lock().len());
            }
        }
    }
}

impl ProcessRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        spec: &'a ProcessSpec,
        on_output: OutputFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<RunOutcome, ProcessError>> + Send + 'a>> {
        Box::pin(async move {
            let (script, output) =
                self.script.lock().pop_front().unwrap_or((Script::Succeed, Vec::new()));
            if script == Script::SpawnFail {
                return Err(ProcessError::Spawn {
                    program: spec.program.display().to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            self.calls.lock().push(spec.clone());
            self.started.notify_waiters();
            for chunk in &output {
                on_output(chunk);
            }
            match script {
                Script::Succeed => Ok(RunOutcome::Success),
                Script::Fail(code) => Err(ProcessError::Exit { code }),
                Script::Killed => Ok(RunOutcome::Canceled),
                Script::Block => {
                    cancel.cancelled().await;
                    Ok(RunOutcome::Canceled)
                }
                Script::SpawnFail => Ok(RunOutcome::Success),
            }
        })
    }
}

/// [`Inspector`] returning fixed details for every path.
#[derive(Debug, Clone)]
pub struct StaticInspector {
    details: DirDetails,
}

impl StaticInspector {
    pub fn new(details: DirDetails) -> Self {
        Self { details }
    }
}

impl Inspector for StaticInspector {
    fn inspect<'a>(&'a self, _path: &'a Path) -> Pin<Box<dyn Future<Output = DirDetails> + Send + 'a>> {
        let details = self.details.clone();
        Box::pin(async move { details })
    }
}

/// [`Presenter`] recording window opens and closes.
#[derive(Debug, Default)]
pub struct RecordingPresenter {
    pub opened: Mutex<Vec<String>>,
    pub closes: Mutex<usize>,
}

impl Presenter for RecordingPresenter {
    fn open(&self, url: &str) {
        self.opened.lock().push(url.to_owned());
    }

    fn close(&self) {
        *self.closes.lock() += 1;
    }
}

/// Captures everything a manager emits through its sinks.
pub struct Recorder<S> {
    pub logs: Arc<Mutex<Vec<LogEntry>>>,
    pub statuses: Arc<Mutex<Vec<Timestamped<Status<S>>>>>,
}

impl<S: Clone + Send + 'static> Recorder<S> {
    pub fn new() -> Self {
        Self { logs: Arc::new(Mutex::new(Vec::new())), statuses: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn log_sink(&self) -> LogSink {
        let logs = Arc::clone(&self.logs);
        Arc::new(move |entry| logs.lock().push(entry))
    }

    pub fn status_sink(&self) -> StatusSink<S> {
        let statuses = Arc::clone(&self.statuses);
        Arc::new(move |s: &Timestamped<Status<S>>| statuses.lock().push(s.clone()))
    }

    /// Status values in the order they were set, timestamps dropped.
    pub fn statuses(&self) -> Vec<Status<S>> {
        self.statuses.lock().iter().map(|s| s.value.clone()).collect()
    }

    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.logs.lock().iter().filter(|e| e.level == level).map(|e| e.message.clone()).collect()
    }

    pub fn all_text(&self) -> String {
        self.logs.lock().iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join("\n")
    }
}

impl<S: Clone + Send + 'static> Default for Recorder<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for constructing `AppState` in tests with scripted collaborators.
pub struct AppStateBuilder {
    auth_token: Option<String>,
    details: DirDetails,
    runner: Arc<ScriptedRunner>,
    spawner: Arc<MockSpawner>,
    uv: std::path::PathBuf,
}

impl Default for AppStateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppStateBuilder {
    pub fn new() -> Self {
        Self {
            auth_token: None,
            details: DirDetails::not_a_directory("/nonexistent"),
            runner: Arc::new(ScriptedRunner::new()),
            spawner: Arc::new(MockSpawner::new()),
            uv: std::path::PathBuf::from("/nonexistent/uv"),
        }
    }

    pub fn auth_token(mut self, t: impl Into<String>) -> Self {
        self.auth_token = Some(t.into());
        self
    }

    pub fn details(mut self, details: DirDetails) -> Self {
        self.details = details;
        self
    }

    pub fn runner(mut self, runner: Arc<ScriptedRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn spawner(mut self, spawner: Arc<MockSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn uv(mut self, uv: impl Into<std::path::PathBuf>) -> Self {
        self.uv = uv.into();
        self
    }

    pub fn build(self) -> Arc<AppState> {
        let hub = NotifyHub::new(256);
        let inspector: Arc<dyn Inspector> = Arc::new(StaticInspector::new(self.details));
        let install = Arc::new(InstallManager::new(
            InstallOptions {
                uv: self.uv,
                platform: Platform { os: Os::Linux, arch: Arch::X86_64 },
                unknown_gpu: Accelerator::Cuda,
            },
            Arc::new(StaticPins::default()),
            self.runner,
            hub.install_status_sink(),
            hub.log_sink(Source::Install),
        ));
        let service = Arc::new(ServiceManager::new(
            Arc::clone(&inspector),
            Arc::new(NotifyPresenter::new(hub.clone())),
            true,
            hub.service_status_sink(),
            hub.log_sink(Source::Service),
        ));
        let pty = Arc::new(PtyManager::new(self.spawner, PtyManagerOptions::default()));
        let terminals = Terminals::new(pty, hub.clone(), Arc::clone(&inspector), None);

        Arc::new(AppState {
            install,
            service,
            terminals,
            inspector,
            hub,
            settings: Settings {
                started_at: Instant::now(),
                auth_token: self.auth_token,
                headless: true,
                shutdown_timeout: Duration::from_secs(2),
            },
            shutdown: CancellationToken::new(),
        })
    }
}

/// Spawn an HTTP server on a random port for integration testing.
///
/// Returns the bound address and a join handle for the server task.
pub async fn spawn_http_server(
    state: Arc<AppState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
/// Replaces `.map_err(|e| anyhow::anyhow!("{e}"))` with `.anyhow()`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
