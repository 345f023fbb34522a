// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal sessions wired to the notification hub.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::event::{Notification, NotifyHub};
use crate::install::layout::{Inspector, InstallLayout};
use crate::pty::{CreateOptions, PtyManager, SessionCallbacks, SessionId};

/// Opens shells in the home directory with the bundled tools on `PATH`,
/// activating an install's environment when asked to open inside one.
pub struct Terminals {
    pty: Arc<PtyManager>,
    hub: NotifyHub,
    inspector: Arc<dyn Inspector>,
    bin_dir: Option<PathBuf>,
}

impl Terminals {
    pub fn new(
        pty: Arc<PtyManager>,
        hub: NotifyHub,
        inspector: Arc<dyn Inspector>,
        bin_dir: Option<PathBuf>,
    ) -> Self {
        Self { pty, hub, inspector, bin_dir }
    }

    pub fn manager(&self) -> &PtyManager {
        &self.pty
    }

    pub async fn create(&self, cwd: Option<&Path>) -> anyhow::Result<SessionId> {
        let mut commands = Vec::new();
        if let Some(ref bin) = self.bin_dir {
            commands.push(path_export(bin));
        }
        if let Some(dir) = cwd {
            if self.inspector.inspect(dir).await.is_installed {
                commands.push(InstallLayout::new(dir).activate_command());
            }
        }

        let data_hub = self.hub.clone();
        let exit_hub = self.hub.clone();
        let callbacks = SessionCallbacks::new(
            move |id, data| {
                data_hub.send(Notification::TerminalOutput { id: id.clone(), data: data.to_owned() })
            },
            move |id, code| exit_hub.send(Notification::TerminalExited { id: id.clone(), code }),
        );
        let id = self.pty.create(callbacks, CreateOptions { commands, ..Default::default() })?;
        tracing::debug!(%id, "terminal created");
        Ok(id)
    }
}

/// Shell line prepending `bin` to `PATH`.
pub fn path_export(bin: &Path) -> String {
    if cfg!(windows) {
        format!("$env:Path='{};'+$env:Path", bin.display())
    } else {
        format!("export PATH=\"{}:$PATH\"", bin.display())
    }
}

impl std::fmt::Debug for Terminals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminals").field("bin_dir", &self.bin_dir).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
