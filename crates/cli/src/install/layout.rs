// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Files and directories inside an install location.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use serde::Serialize;

/// Empty file whose presence means the next service start is the first.
pub const FIRST_RUN_MARKER: &str = ".invokeai_first_run";
pub const PACKAGE: &str = "invokeai";
const VENV_DIR: &str = ".venv";
const CONFIG_FILE: &str = "invokeai.yaml";

/// Paths derived from an install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn venv(&self) -> PathBuf {
        self.root.join(VENV_DIR)
    }

    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv().join("Scripts").join("python.exe")
        } else {
            self.venv().join("bin").join("python")
        }
    }

    pub fn executable(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv().join("Scripts").join("invokeai-web.exe")
        } else {
            self.venv().join("bin").join("invokeai-web")
        }
    }

    pub fn activate_script(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv().join("Scripts").join("Activate.ps1")
        } else {
            self.venv().join("bin").join("activate")
        }
    }

    /// Shell line that activates the environment.
    pub fn activate_command(&self) -> String {
        let script = self.activate_script();
        if cfg!(windows) {
            format!("& \"{}\"", script.display())
        } else {
            format!("source \"{}\"", script.display())
        }
    }

    pub fn first_run_marker(&self) -> PathBuf {
        self.root.join(FIRST_RUN_MARKER)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }
}

/// What a candidate install location contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirDetails {
    pub path: PathBuf,
    pub is_directory: bool,
    pub is_installed: bool,
    pub can_install: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed: Option<Installed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installed {
    /// Package version, always `v`-prefixed.
    pub version: String,
    pub is_first_run: bool,
    pub executable: PathBuf,
    pub activate_script: PathBuf,
}

impl DirDetails {
    pub fn not_a_directory(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), is_directory: false, is_installed: false, can_install: false, installed: None }
    }

    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), is_directory: true, is_installed: false, can_install: true, installed: None }
    }

    pub fn installed(path: impl Into<PathBuf>, installed: Installed) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            is_installed: true,
            can_install: true,
            installed: Some(installed),
        }
    }
}

/// Looks at a directory and reports install presence and version.
pub trait Inspector: Send + Sync {
    fn inspect<'a>(&'a self, path: &'a Path) -> Pin<Box<dyn Future<Output = DirDetails> + Send + 'a>>;
}

/// [`Inspector`] that asks the environment's python for the package version.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsInspector;

impl Inspector for FsInspector {
    fn inspect<'a>(&'a self, path: &'a Path) -> Pin<Box<dyn Future<Output = DirDetails> + Send + 'a>> {
        Box::pin(async move {
            if !is_dir(path).await {
                return DirDetails::not_a_directory(path);
            }
            let layout = InstallLayout::new(path);
            if !is_dir(&layout.venv()).await {
                return DirDetails::empty(path);
            }
            let Some(version) = package_version(&layout.python(), PACKAGE).await else {
                return DirDetails::empty(path);
            };
            let is_first_run = !is_file(&layout.config_file()).await;
            DirDetails::installed(
                path,
                Installed {
                    version: normalize_version(&version),
                    is_first_run,
                    executable: layout.executable(),
                    activate_script: layout.activate_script(),
                },
            )
        })
    }
}

pub fn normalize_version(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('v') {
        trimmed.to_owned()
    } else {
        format!("v{trimmed}")
    }
}

async fn package_version(python: &Path, package: &str) -> Option<String> {
    let script = format!("from importlib.metadata import version; print(version('{package}'))");
    let output = tokio::process::Command::new(python)
        .args(["-c", &script])
        .stdin(Stdio::null())
        .output()
        .await;
    match output {
        Ok(out) if out.status.success() => {
            let version = String::from_utf8_lossy(&out.stdout).replace(['\r', '\n'], "");
            (!version.is_empty()).then_some(version)
        }
        Ok(out) => {
            tracing::debug!(python = %python.display(), status = %out.status, "package version query failed");
            None
        }
        Err(e) => {
            tracing::debug!(python = %python.display(), err = %e, "package version query failed");
            None
        }
    }
}

pub async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
