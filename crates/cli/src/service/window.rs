// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Presentation window handoff and navigation policy.

use reqwest::Url;

use crate::event::{Notification, NotifyHub};

/// Opens and closes the window that shows the running service.
pub trait Presenter: Send + Sync {
    fn open(&self, url: &str);
    fn close(&self);
}

/// [`Presenter`] that asks connected UIs to open or close the window.
#[derive(Debug, Clone)]
pub struct NotifyPresenter {
    hub: NotifyHub,
}

impl NotifyPresenter {
    pub fn new(hub: NotifyHub) -> Self {
        Self { hub }
    }
}

impl Presenter for NotifyPresenter {
    fn open(&self, url: &str) {
        self.hub.send(Notification::WindowOpen { url: local_url(url) });
    }

    fn close(&self) {
        self.hub.send(Notification::WindowClose);
    }
}

/// Rewrite an all-interfaces bind address to loopback for local navigation.
pub fn local_url(url: &str) -> String {
    url.replace("0.0.0.0", "127.0.0.1")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    AllowInPlace,
    OpenExternal,
}

/// Same-origin requests stay in the app window; everything else goes to
/// the system browser.
pub fn decide_navigation(app_url: &str, requested: &str) -> Navigation {
    let Ok(requested) = Url::parse(requested) else {
        return Navigation::OpenExternal;
    };
    let same_origin = [app_url.to_owned(), local_url(app_url)]
        .iter()
        .filter_map(|u| Url::parse(u).ok())
        .any(|app| app.origin() == requested.origin());
    if same_origin {
        Navigation::AllowInPlace
    } else {
        Navigation::OpenExternal
    }
}

/// Launch the system default browser at `url`.
pub fn open_external(url: &str) -> std::io::Result<()> {
    let mut cmd = if cfg!(windows) {
        let mut c = std::process::Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };
    cmd.arg(url)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map(drop)
}

#[cfg(test)]
#[path = "window_tests.rs"]
mod tests;
