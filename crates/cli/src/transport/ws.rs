// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket notification stream and terminal control channel.
//!
//! Every [`Notification`] is forwarded as internally-tagged JSON
//! (`{"type": "terminal_output", ...}`). Clients may send terminal input,
//! resizes and replay requests over the same socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use crate::error::ErrorCode;
use crate::event::{Notification, StatusNotice};
use crate::pty::SessionId;
use crate::transport::state::AppState;

/// Replies to client requests. Notifications are sent as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Pong {},
    Replay { id: SessionId, data: String },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping {},
    Write { id: SessionId, data: String },
    Resize { id: SessionId, cols: u16, rows: u16 },
    Replay { id: SessionId },
    /// Ask for the current install and service status.
    StatusRequest {},
    /// The user closed the app window; the service goes down with it.
    WindowClosed {},
}

/// Auth is checked by the middleware from `?token=` before the upgrade.
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(state, socket))
}

/// Per-connection event loop.
async fn handle_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut notify_rx = state.hub.subscribe();
    tracing::debug!("ws client connected");

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            event = notify_rx.recv() => {
                let event = match event {
                    Ok(e) => e,
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "ws client lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if send_json(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Text(text) => {
                        let replies = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(m) => handle_client_message(&state, m).await,
                            Err(_) => vec![error_reply(ErrorCode::BadRequest, "invalid message")],
                        };
                        let mut failed = false;
                        for reply in &replies {
                            if reply.send(&mut ws_tx).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
    tracing::debug!("ws client disconnected");
}

enum Outgoing {
    Reply(Reply),
    Notification(Notification),
}

impl Outgoing {
    async fn send<S>(&self, tx: &mut S) -> Result<(), ()>
    where
        S: SinkExt<Message> + Unpin,
    {
        match self {
            Self::Reply(r) => send_json(tx, r).await,
            Self::Notification(n) => send_json(tx, n).await,
        }
    }
}

fn error_reply(code: ErrorCode, message: impl Into<String>) -> Outgoing {
    Outgoing::Reply(Reply::Error { code: code.as_str().to_owned(), message: message.into() })
}

/// Handle a single client message and return any replies.
async fn handle_client_message(state: &AppState, msg: ClientMessage) -> Vec<Outgoing> {
    let terminals = state.terminals.manager();
    match msg {
        ClientMessage::Ping {} => vec![Outgoing::Reply(Reply::Pong {})],
        ClientMessage::Write { id, data } => match terminals.write(&id, &data).await {
            Ok(()) => vec![],
            Err(e) => vec![error_reply(ErrorCode::NotFound, e.to_string())],
        },
        ClientMessage::Resize { cols: 0, .. } | ClientMessage::Resize { rows: 0, .. } => {
            vec![error_reply(ErrorCode::BadRequest, "cols and rows must be positive")]
        }
        ClientMessage::Resize { id, cols, rows } => match terminals.resize(&id, cols, rows).await {
            Ok(()) => vec![],
            Err(e) => vec![error_reply(ErrorCode::NotFound, e.to_string())],
        },
        ClientMessage::Replay { id } => match terminals.replay(&id) {
            Some(data) => vec![Outgoing::Reply(Reply::Replay { id, data })],
            None => vec![error_reply(ErrorCode::NotFound, "session not found")],
        },
        ClientMessage::StatusRequest {} => vec![
            Outgoing::Notification(Notification::Status(StatusNotice::Install(state.install.status()))),
            Outgoing::Notification(Notification::Status(StatusNotice::Service(state.service.status()))),
        ],
        ClientMessage::WindowClosed {} => {
            state.service.exit();
            vec![]
        }
    }
}

async fn send_json<S, T>(tx: &mut S, msg: &T) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
    T: Serialize,
{
    let text = serde_json::to_string(msg).map_err(|_| ())?;
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
