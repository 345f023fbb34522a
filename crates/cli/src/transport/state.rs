// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::event::NotifyHub;
use crate::install::layout::Inspector;
use crate::install::InstallManager;
use crate::service::ServiceManager;
use crate::terminal::Terminals;

/// Shared application state passed to all handlers via axum `State` extractor.
///
/// The three managers are independent; the hub carries their notifications
/// to every WebSocket client.
pub struct AppState {
    pub install: Arc<InstallManager>,
    pub service: Arc<ServiceManager>,
    pub terminals: Terminals,
    pub inspector: Arc<dyn Inspector>,
    pub hub: NotifyHub,
    pub settings: Settings,
    pub shutdown: CancellationToken,
}

/// Static server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub started_at: Instant,
    pub auth_token: Option<String>,
    /// No presentation window and no external browser launches.
    pub headless: bool,
    pub shutdown_timeout: Duration,
}

impl AppState {
    /// Stop every managed process: cancel an active install, exit the
    /// service and dispose all terminals.
    pub async fn teardown(&self) {
        if self.install.is_running() {
            self.install.cancel();
        }
        self.service.shutdown(self.settings.shutdown_timeout).await;
        self.terminals.manager().teardown();
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("install", &self.install)
            .field("service", &self.service)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
