// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner, shared by `main` and integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};
use crate::event::{NotifyHub, Source};
use crate::install::layout::{FsInspector, Inspector};
use crate::install::pins::{PinSource, RemotePins, StaticPins};
use crate::install::platform::Platform;
use crate::install::{InstallManager, InstallOptions};
use crate::process::TokioRunner;
use crate::pty::manager::PtyManagerOptions;
use crate::pty::{default_shell, NativeSpawner, PtyManager};
use crate::service::window::NotifyPresenter;
use crate::service::ServiceManager;
use crate::terminal::Terminals;
use crate::transport::state::Settings;
use crate::transport::{build_router, AppState};

/// Notifications buffered per WebSocket subscriber before it lags.
const NOTIFY_CAPACITY: usize = 1024;

/// A server with listeners bound, ready to run until shutdown.
///
/// Returned by [`prepare`] so callers (e.g. integration tests) can reach
/// [`AppState`] and the bound address before waiting on shutdown.
pub struct PreparedServer {
    pub app_state: Arc<AppState>,
    /// Bound TCP address, when serving over TCP.
    pub addr: Option<SocketAddr>,
    servers: Vec<JoinHandle<()>>,
}

impl PreparedServer {
    /// Wait for the shutdown token, then stop every managed process.
    pub async fn run(self) -> anyhow::Result<()> {
        self.app_state.shutdown.cancelled().await;
        info!("shutting down");
        self.app_state.teardown().await;
        for server in self.servers {
            if let Err(e) = server.await {
                error!("server task failed: {e}");
            }
        }
        Ok(())
    }
}

/// Run the launcher core to completion.
pub async fn run(config: Config) -> anyhow::Result<()> {
    prepare(config).await?.run().await
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format() {
        Ok(LogFormat::Text) => fmt::fmt().with_env_filter(filter).try_init(),
        _ => fmt::fmt().with_env_filter(filter).json().try_init(),
    };
    drop(result);
}

/// Wire the managers together behind a fresh [`AppState`].
pub fn build_state(config: &Config, shutdown: CancellationToken) -> anyhow::Result<Arc<AppState>> {
    let hub = NotifyHub::new(NOTIFY_CAPACITY);
    let inspector: Arc<dyn Inspector> = Arc::new(FsInspector);

    let pins: Arc<dyn PinSource> = match config.pins_url {
        Some(ref url) => Arc::new(RemotePins::new(url.clone(), config.pins_refresh())),
        None => Arc::new(StaticPins::default()),
    };
    let install = Arc::new(InstallManager::new(
        InstallOptions {
            uv: config.uv(),
            platform: Platform::current(),
            unknown_gpu: config.unknown_accelerator()?,
        },
        pins,
        Arc::new(TokioRunner),
        hub.install_status_sink(),
        hub.log_sink(Source::Install),
    ));

    let service = Arc::new(ServiceManager::new(
        Arc::clone(&inspector),
        Arc::new(NotifyPresenter::new(hub.clone())),
        config.headless,
        hub.service_status_sink(),
        hub.log_sink(Source::Service),
    ));

    let spawner = NativeSpawner { reap_interval: config.reap_poll(), kill_grace: config.kill_grace() };
    let pty = Arc::new(PtyManager::new(
        Arc::new(spawner),
        PtyManagerOptions {
            max_history: config.history_size,
            shell: config.shell.clone().unwrap_or_else(default_shell),
            term: config.term.clone(),
            ..Default::default()
        },
    ));
    let terminals = Terminals::new(pty, hub.clone(), Arc::clone(&inspector), config.bin_dir.clone());

    Ok(Arc::new(AppState {
        install,
        service,
        terminals,
        inspector,
        hub,
        settings: Settings {
            started_at: Instant::now(),
            auth_token: config.auth_token.clone(),
            headless: config.headless,
            shutdown_timeout: config.shutdown_timeout(),
        },
        shutdown,
    }))
}

/// Build state, bind listeners and install the signal handler.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedServer> {
    init_tracing(&config);

    let shutdown = CancellationToken::new();
    let app_state = build_state(&config, shutdown.clone())?;
    let mut servers = Vec::new();
    let mut bound = None;

    // Spawn HTTP server
    if let Some(port) = config.port {
        let router = build_router(Arc::clone(&app_state));
        let addr = format!("{}:{}", config.host, port);
        let listener = TcpListener::bind(&addr).await?;
        let local = listener.local_addr()?;
        bound = Some(local);
        info!("HTTP listening on {local}");
        let sd = shutdown.clone();
        servers.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(sd.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        }));
    }

    // Spawn Unix socket server
    #[cfg(unix)]
    if let Some(ref socket_path) = config.socket {
        let router = build_router(Arc::clone(&app_state));
        let path = socket_path.clone();
        // Remove stale socket
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path)?;
        info!("Unix socket listening on {path}");
        let sd = shutdown.clone();
        servers.push(tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(sd.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!("Unix socket server error: {e}");
            }
            let _ = std::fs::remove_file(&path);
        }));
    }

    spawn_signal_handler(shutdown);

    Ok(PreparedServer { app_state, addr: bound, servers })
}

#[cfg(unix)]
fn spawn_signal_handler(sd: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = sd.cancelled() => {}
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGTERM");
                sd.cancel();
            }
            _ = async {
                if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
            } => {
                info!("received SIGINT");
                sd.cancel();
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_signal_handler(sd: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = sd.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    info!("received Ctrl-C");
                    sd.cancel();
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
