// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::Serialize;
use tokio::sync::broadcast;

use crate::log::{LogEntry, LogSink};
use crate::pty::SessionId;
use crate::status::{InstallStatus, ServiceStatus, StatusSink};
use crate::status::{InstallState, ServiceState};

/// Which manager produced a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Install,
    Service,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StatusNotice {
    Install(InstallStatus),
    Service(ServiceStatus),
}

/// Core → UI notification, fanned out to every WebSocket client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Status(StatusNotice),
    Log {
        source: Source,
        #[serde(flatten)]
        entry: LogEntry,
    },
    TerminalOutput { id: SessionId, data: String },
    TerminalExited { id: SessionId, code: i32 },
    WindowOpen { url: String },
    WindowClose,
}

/// Sinks that forward manager callbacks onto a broadcast channel.
///
/// Sending with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct NotifyHub {
    tx: broadcast::Sender<Notification>,
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn send(&self, notification: Notification) {
        let _ = self.tx.send(notification);
    }

    pub fn log_sink(&self, source: Source) -> LogSink {
        let hub = self.clone();
        std::sync::Arc::new(move |entry| hub.send(Notification::Log { source, entry }))
    }

    pub fn install_status_sink(&self) -> StatusSink<InstallState> {
        let hub = self.clone();
        std::sync::Arc::new(move |s: &InstallStatus| {
            hub.send(Notification::Status(StatusNotice::Install(s.clone())))
        })
    }

    pub fn service_status_sink(&self) -> StatusSink<ServiceState> {
        let hub = self.clone();
        std::sync::Arc::new(move |s: &ServiceStatus| {
            hub.send(Notification::Status(StatusNotice::Service(s.clone())))
        })
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
