// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::install::platform::Accelerator;

/// Output format for diagnostic logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }
}

/// Process lifecycle server for the launcher: installs, runs, and opens
/// terminals into a managed application.
#[derive(Debug, Parser)]
#[command(name = "launchpad", version, about)]
pub struct Config {
    /// HTTP port to listen on.
    #[arg(long, env = "LAUNCHPAD_PORT")]
    pub port: Option<u16>,

    /// Unix socket path for HTTP.
    #[arg(long, env = "LAUNCHPAD_SOCKET")]
    pub socket: Option<String>,

    /// Host address to bind to.
    #[arg(long, env = "LAUNCHPAD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Bearer token for API authentication.
    #[arg(long, env = "LAUNCHPAD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "LAUNCHPAD_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LAUNCHPAD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Output chunks retained per terminal for replay.
    #[arg(long, env = "LAUNCHPAD_HISTORY_SIZE", default_value = "10000")]
    pub history_size: usize,

    /// Shell for terminal sessions (defaults per platform).
    #[arg(long, env = "LAUNCHPAD_SHELL")]
    pub shell: Option<String>,

    /// TERM environment variable for terminal sessions.
    #[arg(long, env = "LAUNCHPAD_TERM", default_value = "xterm-256color")]
    pub term: String,

    /// Path to the `uv` executable (defaults to `<bin-dir>/uv`).
    #[arg(long, env = "LAUNCHPAD_UV_PATH")]
    pub uv_path: Option<PathBuf>,

    /// Directory of bundled helper binaries, prepended to terminal PATH.
    #[arg(long, env = "LAUNCHPAD_BIN_DIR")]
    pub bin_dir: Option<PathBuf>,

    /// URL of a remote pins table; the built-in table is used when unset.
    #[arg(long, env = "LAUNCHPAD_PINS_URL")]
    pub pins_url: Option<String>,

    /// Do not open a window when the service becomes ready.
    #[arg(long, env = "LAUNCHPAD_HEADLESS")]
    pub headless: bool,

    /// Accelerator used for unrecognized GPU types (cuda, rocm, cpu).
    #[arg(long, env = "LAUNCHPAD_UNKNOWN_GPU", default_value = "cuda")]
    pub unknown_gpu: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub pins_refresh_ms: Option<u64>,
    #[clap(skip)]
    pub kill_grace_ms: Option<u64>,
    #[clap(skip)]
    pub reap_poll_ms: Option<u64>,
    #[clap(skip)]
    pub shutdown_timeout_ms: Option<u64>,
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.port.is_none() && self.socket.is_none() {
            anyhow::bail!("either --port or --socket must be specified");
        }
        if self.port.is_some() && self.socket.is_some() {
            anyhow::bail!("cannot specify both --port and --socket");
        }
        self.log_format()?;
        self.unknown_accelerator()?;
        Ok(())
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(pins_refresh, pins_refresh_ms, "LAUNCHPAD_PINS_REFRESH_MS", 3_600_000);
    duration_field!(kill_grace, kill_grace_ms, "LAUNCHPAD_KILL_GRACE_MS", 500);
    duration_field!(reap_poll, reap_poll_ms, "LAUNCHPAD_REAP_POLL_MS", 50);
    duration_field!(shutdown_timeout, shutdown_timeout_ms, "LAUNCHPAD_SHUTDOWN_TIMEOUT_MS", 5_000);

    pub fn log_format(&self) -> anyhow::Result<LogFormat> {
        self.log_format.parse()
    }

    pub fn unknown_accelerator(&self) -> anyhow::Result<Accelerator> {
        self.unknown_gpu.parse()
    }

    /// Resolved `uv` path: explicit flag, then the bundled bin dir, then PATH.
    pub fn uv(&self) -> PathBuf {
        if let Some(ref path) = self.uv_path {
            return path.clone();
        }
        let exe = if cfg!(windows) { "uv.exe" } else { "uv" };
        match self.bin_dir {
            Some(ref dir) => dir.join(exe),
            None => PathBuf::from(exe),
        }
    }

    /// Build a minimal `Config` for tests (port 0, short timings).
    #[doc(hidden)]
    pub fn test() -> Self {
        Self {
            port: Some(0),
            socket: None,
            host: "127.0.0.1".into(),
            auth_token: None,
            log_format: "json".into(),
            log_level: "debug".into(),
            history_size: 100,
            shell: Some("/bin/sh".into()),
            term: "xterm-256color".into(),
            uv_path: Some(PathBuf::from("/usr/bin/false")),
            bin_dir: None,
            pins_url: None,
            headless: true,
            unknown_gpu: "cuda".into(),
            pins_refresh_ms: Some(60_000),
            kill_grace_ms: Some(100),
            reap_poll_ms: Some(10),
            shutdown_timeout_ms: Some(100),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
