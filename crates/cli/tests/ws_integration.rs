// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! axum server.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use launchpad::event::Notification;
use launchpad::test_support::{spawn_http_server, AppStateBuilder, MockPty, MockSpawner};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

/// Send a JSON message over the WebSocket.
async fn ws_send(stream: &mut WsTx, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

/// Receive a JSON message from the WebSocket with timeout.
async fn ws_recv(stream: &mut WsRx, timeout: Duration) -> anyhow::Result<serde_json::Value> {
    let msg = tokio::time::timeout(timeout, stream.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;

    match msg {
        WsMessage::Text(text) => {
            let parsed: serde_json::Value = serde_json::from_str(&text)?;
            Ok(parsed)
        }
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

/// Receive messages until one has the given `type`.
async fn ws_recv_type(stream: &mut WsRx, kind: &str) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = ws_recv(stream, RECV_TIMEOUT).await?;
        if msg.get("type").and_then(|t| t.as_str()) == Some(kind) {
            return Ok(msg);
        }
    }
}

/// Connect a WebSocket to the given server address with optional query params.
async fn ws_connect(addr: &std::net::SocketAddr, query: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let url = if query.is_empty() {
        format!("ws://{addr}/ws")
    } else {
        format!("ws://{addr}/ws?{query}")
    };
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

/// Connect and complete a ping round trip so the notification
/// subscription is in place before the test produces events.
async fn ws_connect_ready(addr: &std::net::SocketAddr, query: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let (mut tx, mut rx) = ws_connect(addr, query).await?;
    ws_send(&mut tx, &serde_json::json!({"type": "ping"})).await?;
    ws_recv_type(&mut rx, "pong").await?;
    Ok((tx, rx))
}

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn ws_connect_and_receive_pong() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(app_state).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "").await?;

    ws_send(&mut tx, &serde_json::json!({"type": "ping"})).await?;

    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp.get("type").and_then(|t| t.as_str()), Some("pong"), "response: {resp}");

    Ok(())
}

#[tokio::test]
async fn ws_auth_query_param() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().auth_token("test-secret").build();
    let (addr, _handle) = spawn_http_server(app_state).await?;

    // Connect with correct token
    let (mut tx, mut rx) = ws_connect(&addr, "token=test-secret").await?;
    ws_send(&mut tx, &serde_json::json!({"type": "ping"})).await?;
    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp.get("type").and_then(|t| t.as_str()), Some("pong"));

    // Wrong or missing token is rejected before the upgrade
    assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token=wrong")).await.is_err());
    assert!(tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.is_err());

    Ok(())
}

#[tokio::test]
async fn ws_invalid_message_reports_error() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(app_state).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "").await?;
    ws_send(&mut tx, &serde_json::json!({"type": "launch_rockets"})).await?;

    let resp = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(resp["type"], "error");
    assert_eq!(resp["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn ws_status_request_reports_both_managers() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(app_state).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "").await?;
    ws_send(&mut tx, &serde_json::json!({"type": "status_request"})).await?;

    let install = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(install["type"], "status");
    assert_eq!(install["source"], "install");
    assert_eq!(install["state"], "uninitialized");

    let service = ws_recv(&mut rx, RECV_TIMEOUT).await?;
    assert_eq!(service["source"], "service");
    Ok(())
}

#[tokio::test]
async fn ws_forwards_terminal_output_and_input() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let pty = MockPty::with_output(vec![Bytes::from("welcome\r\n")])
        .chunk_delay(Duration::from_millis(200))
        .drain_input();
    let input = pty.captured_input();
    spawner.push(pty);
    let app_state = AppStateBuilder::new().spawner(spawner).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&app_state)).await?;

    let (mut tx, mut rx) = ws_connect_ready(&addr, "").await?;
    let id = app_state.terminals.create(None).await?;

    let out = ws_recv_type(&mut rx, "terminal_output").await?;
    assert_eq!(out["id"], id.as_str());
    assert_eq!(out["data"], "welcome\r\n");

    ws_send(&mut tx, &serde_json::json!({"type": "write", "id": id.as_str(), "data": "exit\r"}))
        .await?;
    launchpad::test_support::wait_until(RECV_TIMEOUT, || {
        input.lock().iter().any(|b| b.as_ref() == b"exit\r")
    })
    .await?;

    ws_send(&mut tx, &serde_json::json!({"type": "replay", "id": id.as_str()})).await?;
    let replay = ws_recv_type(&mut rx, "replay").await?;
    assert_eq!(replay["data"], "welcome\r\n");

    app_state.terminals.manager().teardown();
    Ok(())
}

#[tokio::test]
async fn ws_forwards_status_and_log_notifications() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&app_state)).await?;

    let (_tx, mut rx) = ws_connect_ready(&addr, "").await?;
    app_state.service.start("/not/installed".into()).await?;

    let status = ws_recv_type(&mut rx, "status").await?;
    assert_eq!(status["source"], "service");
    assert_eq!(status["state"], "starting");

    let log = ws_recv_type(&mut rx, "log").await?;
    assert_eq!(log["source"], "service");
    assert!(log["message"].is_string());
    Ok(())
}

#[tokio::test]
async fn ws_forwards_window_notifications() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&app_state)).await?;

    let (_tx, mut rx) = ws_connect_ready(&addr, "").await?;
    app_state.hub.send(Notification::WindowOpen { url: "http://127.0.0.1:9090".into() });

    let open = ws_recv_type(&mut rx, "window_open").await?;
    assert_eq!(open["url"], "http://127.0.0.1:9090");
    Ok(())
}

#[tokio::test]
async fn ws_closes_on_shutdown() -> anyhow::Result<()> {
    let app_state = AppStateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&app_state)).await?;

    let (_tx, mut rx) = ws_connect_ready(&addr, "").await?;
    app_state.shutdown.cancel();

    let closed = tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match rx.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "socket should close after shutdown");
    Ok(())
}
