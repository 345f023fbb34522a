// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;
use crate::log::{LogLevel, Logger};
use crate::status::{Status, StatusCell};

#[test]
fn status_notification_shape() {
    let n = Notification::Status(StatusNotice::Install(crate::status::Timestamped {
        value: Status::Ok(InstallState::Installing),
        timestamp_ms: 5,
    }));
    assert_eq!(
        serde_json::to_value(&n).unwrap(),
        json!({
            "type": "status",
            "source": "install",
            "status": "ok",
            "state": "installing",
            "timestamp_ms": 5,
        })
    );
}

#[test]
fn terminal_notifications_shape() {
    let out = Notification::TerminalOutput { id: SessionId::from("t1"), data: "hi".to_owned() };
    assert_eq!(
        serde_json::to_value(&out).unwrap(),
        json!({ "type": "terminal_output", "id": "t1", "data": "hi" })
    );
    let closed = Notification::WindowClose;
    assert_eq!(serde_json::to_value(&closed).unwrap(), json!({ "type": "window_close" }));
}

#[tokio::test]
async fn hub_sinks_reach_subscribers() {
    let hub = NotifyHub::new(16);
    let mut rx = hub.subscribe();

    Logger::new("install", hub.log_sink(Source::Install)).warn("careful");
    let cell = StatusCell::new(ServiceState::Uninitialized, hub.service_status_sink());
    cell.set_ok(ServiceState::Starting);

    match rx.recv().await.unwrap() {
        Notification::Log { source, entry } => {
            assert_eq!(source, Source::Install);
            assert_eq!(entry.level, LogLevel::Warn);
            assert_eq!(entry.message, "careful");
        }
        other => panic!("unexpected {other:?}"),
    }
    match rx.recv().await.unwrap() {
        Notification::Status(StatusNotice::Service(s)) => {
            assert_eq!(s.value, Status::Ok(ServiceState::Starting));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn send_without_subscribers_is_silent() {
    let hub = NotifyHub::new(4);
    hub.send(Notification::WindowClose);
}
