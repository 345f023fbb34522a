// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Manager status: an ok state or an error with optional context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status<S> {
    Ok(S),
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<Value>,
    },
}

impl<S> Status<S> {
    pub fn error(message: impl Into<String>, context: Option<Value>) -> Self {
        Self::Error { message: message.into(), context }
    }

    pub fn state(&self) -> Option<&S> {
        match self {
            Self::Ok(s) => Some(s),
            Self::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// A value stamped with the time it was set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timestamped<T> {
    #[serde(flatten)]
    pub value: T,
    pub timestamp_ms: u64,
}

impl<T> Timestamped<T> {
    pub fn now(value: T) -> Self {
        Self { value, timestamp_ms: now_ms() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallState {
    Uninitialized,
    Starting,
    Installing,
    Canceling,
    Completed,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    Uninitialized,
    Starting,
    Running { url: String },
    Exiting,
    Exited,
}

pub type InstallStatus = Timestamped<Status<InstallState>>;
pub type ServiceStatus = Timestamped<Status<ServiceState>>;

pub type StatusSink<S> = Arc<dyn Fn(&Timestamped<Status<S>>) + Send + Sync>;

/// Current status of one manager plus the sink notified on change.
///
/// Each `set` stores a fresh timestamped snapshot. Setting a status equal
/// to the current one is ignored.
pub struct StatusCell<S> {
    current: Mutex<Timestamped<Status<S>>>,
    sink: StatusSink<S>,
}

impl<S: Clone + PartialEq> StatusCell<S> {
    pub fn new(initial: S, sink: StatusSink<S>) -> Self {
        Self { current: Mutex::new(Timestamped::now(Status::Ok(initial))), sink }
    }

    pub fn get(&self) -> Timestamped<Status<S>> {
        self.current.lock().clone()
    }

    /// Replace the status. Returns false when it was unchanged.
    pub fn set(&self, status: Status<S>) -> bool {
        let snapshot = {
            let mut current = self.current.lock();
            if current.value == status {
                return false;
            }
            *current = Timestamped::now(status);
            current.clone()
        };
        (self.sink)(&snapshot);
        true
    }

    pub fn set_ok(&self, state: S) -> bool {
        self.set(Status::Ok(state))
    }

    pub fn set_error(&self, message: impl Into<String>, context: Option<Value>) -> bool {
        self.set(Status::error(message, context))
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for StatusCell<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusCell").field("current", &*self.current.lock()).finish()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
