// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Install orchestration: provision a managed python with `uv`, create a
//! virtual environment and install the application package into it.

pub mod layout;
pub mod pins;
pub mod platform;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{error_context, process_error_context, InstallError};
use crate::log::{LogSink, Logger};
use crate::process::{OutputFn, ProcessRunner, ProcessSpec, RunOutcome};
use crate::status::{InstallState, InstallStatus, StatusCell, StatusSink};

use self::layout::{is_dir, is_file, InstallLayout, PACKAGE};
use self::pins::PinSource;
use self::platform::{accelerator_for, Accelerator, GpuType, Platform};

const REPAIR_HINT: &str =
    "Try the install again with repair mode enabled. If it keeps failing, ask for help.";

/// Parameters for one install run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InstallRequest {
    pub location: PathBuf,
    pub gpu_type: GpuType,
    pub version: String,
    #[serde(default)]
    pub repair: bool,
}

/// Fixed settings shared by every run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub uv: PathBuf,
    pub platform: Platform,
    pub unknown_gpu: Accelerator,
}

/// Why a run stopped before completing.
enum Halt {
    Canceled,
    Failed { message: &'static str, detail: String, context: Option<Value>, hint: bool },
}

impl Halt {
    fn failed(message: &'static str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let context = Some(json!({ "message": detail }));
        Self::Failed { message, detail, context, hint: false }
    }
}

/// Drives install runs and owns their status.
///
/// At most one run is active. The cancellation token of the active run is
/// held until the run finishes on any path.
pub struct InstallManager {
    options: InstallOptions,
    pins: Arc<dyn PinSource>,
    runner: Arc<dyn ProcessRunner>,
    status: StatusCell<InstallState>,
    log: Logger,
    active: Mutex<Option<CancellationToken>>,
}

impl InstallManager {
    pub fn new(
        options: InstallOptions,
        pins: Arc<dyn PinSource>,
        runner: Arc<dyn ProcessRunner>,
        status_sink: StatusSink<InstallState>,
        log_sink: LogSink,
    ) -> Self {
        Self {
            options,
            pins,
            runner,
            status: StatusCell::new(InstallState::Uninitialized, status_sink),
            log: Logger::new("install", log_sink),
            active: Mutex::new(None),
        }
    }

    pub fn status(&self) -> InstallStatus {
        self.status.get()
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Claim the install slot and run the pipeline on a background task.
    pub fn start(self: &Arc<Self>, request: InstallRequest) -> Result<JoinHandle<()>, InstallError> {
        let cancel = {
            let mut active = self.active.lock();
            if active.is_some() {
                drop(active);
                self.log.warn("An installation is already in progress");
                return Err(InstallError::AlreadyRunning);
            }
            let token = CancellationToken::new();
            *active = Some(token.clone());
            token
        };

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            this.status.set_ok(InstallState::Starting);
            this.log.info("Starting up...");
            let result = this.pipeline(&request, &cancel).await;

            // Release the slot and publish the outcome atomically so a late
            // cancel sees no active run.
            let mut active = this.active.lock();
            *active = None;
            this.finish(result);
        }))
    }

    /// Request cancellation of the active run.
    ///
    /// `canceling` is only reported once commands are running; a run still
    /// starting stops before its first command and reports `canceled`.
    pub fn cancel(&self) {
        let active = self.active.lock();
        let Some(token) = active.as_ref() else {
            drop(active);
            self.log.warn("No installation to cancel");
            return;
        };
        if token.is_cancelled() {
            drop(active);
            self.log.warn("Installation already canceling");
            return;
        }
        self.log.warn("Canceling installation...");
        token.cancel();
        if self.status.get().value.state() == Some(&InstallState::Installing) {
            self.status.set_ok(InstallState::Canceling);
        }
    }

    fn finish(&self, result: Result<(), Halt>) {
        match result {
            Ok(()) => {
                self.status.set_ok(InstallState::Completed);
            }
            Err(Halt::Canceled) => {
                self.log.warn("Installation canceled");
                self.status.set_ok(InstallState::Canceled);
            }
            Err(Halt::Failed { message, detail, context, hint }) => {
                self.log.error(format!("{message}: {detail}"));
                if hint {
                    self.log.info(REPAIR_HINT);
                }
                self.status.set_error(message, context);
            }
        }
    }

    async fn pipeline(&self, request: &InstallRequest, cancel: &CancellationToken) -> Result<(), Halt> {
        let location = &request.location;
        match tokio::fs::metadata(location).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Halt::failed(
                    "Invalid install location",
                    format!("Install location is not a directory: {}", location.display()),
                ))
            }
            Err(e) => {
                return Err(Halt::failed(
                    "Invalid install location",
                    format!("Cannot access install location {}: {e}", location.display()),
                ))
            }
        }

        let platform = self.options.platform;
        if !platform.is_supported() {
            return Err(Halt::failed("Unsupported platform", format!("Unsupported platform: {platform}")));
        }

        let choice = accelerator_for(&platform, &request.gpu_type, self.options.unknown_gpu);
        if choice.fallback {
            self.log.warn(format!(
                "Unrecognized GPU type {}, using {}",
                request.gpu_type, choice.accelerator
            ));
        }
        let package = if request.gpu_type.wants_xformers() {
            format!("{PACKAGE}[xformers]")
        } else {
            PACKAGE.to_owned()
        };

        self.log.info(format!("- Install location: {}", location.display()));
        self.log.info(format!("- GPU type: {}", request.gpu_type));
        self.log.info(format!("- Torch Platform: {}", choice.accelerator));

        let lookup = tokio::select! {
            result = self.pins.pins(&request.version) => result,
            _ = cancel.cancelled() => return Err(Halt::Canceled),
        };
        let pins = match lookup {
            Ok(pins) => pins,
            Err(e) => {
                return Err(Halt::Failed {
                    message: "Failed to get pins",
                    detail: format!("version {}: {e:#}", request.version),
                    context: Some(error_context(&e)),
                    hint: false,
                })
            }
        };
        let index_url = pins.index_url(platform.os, choice.accelerator).map(str::to_owned);

        let uv = &self.options.uv;
        if !is_file(uv).await {
            return Err(Halt::failed(
                "Failed to access uv executable",
                format!("UV executable is not a file: {}", uv.display()),
            ));
        }

        {
            // Paired with `cancel`, which only moves `installing` to `canceling`.
            let _active = self.active.lock();
            if cancel.is_cancelled() {
                return Err(Halt::Canceled);
            }
            self.status.set_ok(InstallState::Installing);
        }
        let layout = InstallLayout::new(location);
        let venv = layout.venv();
        let venv_arg = venv.display().to_string();

        let mut python_args = vec!["python", "install", pins.python.as_str(), "--python-preference", "only-managed"];
        if request.repair {
            python_args.push("--reinstall");
            self.log.info("Reinstalling Python...");
        } else {
            self.log.info("Installing Python...");
        }
        self.step("Failed to install Python", ProcessSpec::new(uv, python_args), cancel).await?;

        if request.repair && is_dir(&venv).await {
            self.log.info("Removing virtual environment...");
            if let Err(e) = tokio::fs::remove_dir_all(&venv).await {
                self.log.warn(format!("Failed to remove virtual environment: {e}"));
            }
        }

        if !request.repair && is_dir(&venv).await {
            self.log.info("Virtual environment already exists, skipping creation");
        } else {
            self.log.info("Creating virtual environment...");
            let args = [
                "venv",
                "--relocatable",
                "--prompt",
                "invoke",
                "--python",
                pins.python.as_str(),
                "--python-preference",
                "only-managed",
                venv_arg.as_str(),
            ];
            self.step("Failed to create virtual environment", ProcessSpec::new(uv, args), cancel).await?;
        }

        let specifier = format!("{package}=={}", request.version.trim_start_matches('v'));
        let mut install_args = vec![
            "pip".to_owned(),
            "install".to_owned(),
            "--python".to_owned(),
            pins.python.clone(),
            "--python-preference".to_owned(),
            "only-managed".to_owned(),
            specifier,
            "--force-reinstall".to_owned(),
            "--compile-bytecode".to_owned(),
        ];
        if let Some(url) = index_url {
            install_args.push(format!("--index={url}"));
        }
        self.log.info("Installing invokeai package...");
        let spec = ProcessSpec::new(uv, install_args).cwd(location);
        self.step("Failed to install invokeai python package", spec, cancel).await?;

        if let Err(e) = tokio::fs::write(layout.first_run_marker(), "").await {
            self.log.warn(format!("Failed to create first run marker file: {e}"));
        }
        Ok(())
    }

    /// Echo and run one command, mapping its result onto the pipeline.
    async fn step(&self, failure: &'static str, spec: ProcessSpec, cancel: &CancellationToken) -> Result<(), Halt> {
        self.log.info(format!("> {spec}"));
        let log = self.log.clone();
        let on_output: OutputFn = Arc::new(move |text: &str| log.info(text));

        match self.runner.run(&spec, on_output, cancel.clone()).await {
            Ok(RunOutcome::Success) => Ok(()),
            Ok(RunOutcome::Canceled) => Err(Halt::Canceled),
            Err(e) => Err(Halt::Failed {
                message: failure,
                detail: e.to_string(),
                context: Some(process_error_context(&e)),
                hint: true,
            }),
        }
    }
}

impl std::fmt::Debug for InstallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallManager")
            .field("options", &self.options)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
