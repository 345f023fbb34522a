// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Registry of interactive terminal sessions with replayable history.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendInput, ExitStatus, PtySpawner, SessionId, SpawnRequest};
use crate::error::SessionNotFound;
use crate::stream::{AnsiSequenceBuffer, SlidingBuffer, Utf8Decoder};

const INPUT_CAPACITY: usize = 256;
const OUTPUT_CAPACITY: usize = 256;
const RESIZE_CAPACITY: usize = 8;

pub type DataFn = Arc<dyn Fn(&SessionId, &str) + Send + Sync>;
pub type ExitFn = Arc<dyn Fn(&SessionId, i32) + Send + Sync>;

/// Per-session output and exit hooks.
#[derive(Clone)]
pub struct SessionCallbacks {
    pub on_data: DataFn,
    pub on_exit: ExitFn,
}

impl SessionCallbacks {
    pub fn new(
        on_data: impl Fn(&SessionId, &str) + Send + Sync + 'static,
        on_exit: impl Fn(&SessionId, i32) + Send + Sync + 'static,
    ) -> Self {
        Self { on_data: Arc::new(on_data), on_exit: Arc::new(on_exit) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Working directory; the user's home when unset.
    pub cwd: Option<PathBuf>,
    /// Lines typed into the shell at startup, each followed by `\r`.
    pub commands: Vec<String>,
    pub env: Vec<(String, String)>,
}

/// Settings shared by every session the manager creates.
#[derive(Debug, Clone)]
pub struct PtyManagerOptions {
    pub max_history: usize,
    pub shell: String,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyManagerOptions {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            shell: super::default_shell(),
            term: "xterm-256color".to_owned(),
            cols: 80,
            rows: 24,
        }
    }
}

#[derive(Debug)]
struct SessionBuffers {
    ansi: AnsiSequenceBuffer,
    history: SlidingBuffer<String>,
}

impl SessionBuffers {
    fn clear(&mut self) {
        self.ansi.clear();
        self.history.clear();
    }
}

struct SessionEntry {
    input_tx: mpsc::Sender<BackendInput>,
    resize_tx: mpsc::Sender<(u16, u16)>,
    cancel: CancellationToken,
    buffers: Arc<Mutex<SessionBuffers>>,
}

type Registry = Arc<Mutex<HashMap<SessionId, SessionEntry>>>;

/// Owns every live terminal session.
///
/// Operations on an unknown id never fail loudly: sessions can exit between
/// a UI read and the next UI action, so a missing session is reported as
/// [`SessionNotFound`] or `None`.
pub struct PtyManager {
    spawner: Arc<dyn PtySpawner>,
    options: PtyManagerOptions,
    sessions: Registry,
}

impl PtyManager {
    pub fn new(spawner: Arc<dyn PtySpawner>, options: PtyManagerOptions) -> Self {
        Self { spawner, options, sessions: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Spawn a shell and start pumping its output.
    pub fn create(
        &self,
        callbacks: SessionCallbacks,
        options: CreateOptions,
    ) -> anyhow::Result<SessionId> {
        let cwd = options
            .cwd
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));
        let request = SpawnRequest {
            shell: self.options.shell.clone(),
            cwd,
            term: self.options.term.clone(),
            env: options.env,
            cols: self.options.cols,
            rows: self.options.rows,
        };
        let backend = self.spawner.spawn(&request)?;

        let id = SessionId::generate();
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let (resize_tx, resize_rx) = mpsc::channel(RESIZE_CAPACITY);
        let cancel = CancellationToken::new();
        let buffers = Arc::new(Mutex::new(SessionBuffers {
            ansi: AnsiSequenceBuffer::new(),
            history: SlidingBuffer::new(self.options.max_history),
        }));

        if !options.commands.is_empty() {
            let mut typed = String::new();
            for cmd in &options.commands {
                typed.push_str(cmd);
                typed.push('\r');
            }
            // The channel is fresh, so one message always fits.
            let _ = input_tx.try_send(BackendInput::Write(Bytes::from(typed)));
        }

        // Register before the pump starts so a fast exit finds its entry.
        self.sessions.lock().insert(
            id.clone(),
            SessionEntry {
                input_tx,
                resize_tx,
                cancel: cancel.clone(),
                buffers: Arc::clone(&buffers),
            },
        );

        tracing::info!(id = %id, shell = %request.shell, cwd = %request.cwd.display(), "terminal created");

        tokio::spawn(pump(
            id.clone(),
            backend,
            input_rx,
            resize_rx,
            cancel,
            buffers,
            Arc::clone(&self.sessions),
            callbacks,
        ));

        Ok(id)
    }

    /// Forward raw input to the session's shell.
    pub async fn write(&self, id: &SessionId, data: &str) -> Result<(), SessionNotFound> {
        let tx = self.sessions.lock().get(id).map(|e| e.input_tx.clone()).ok_or(SessionNotFound)?;
        tx.send(BackendInput::Write(Bytes::copy_from_slice(data.as_bytes())))
            .await
            .map_err(|_| SessionNotFound)
    }

    pub async fn resize(&self, id: &SessionId, cols: u16, rows: u16) -> Result<(), SessionNotFound> {
        let tx = self.sessions.lock().get(id).map(|e| e.resize_tx.clone()).ok_or(SessionNotFound)?;
        tx.send((cols, rows)).await.map_err(|_| SessionNotFound)
    }

    /// Concatenated history of ANSI-complete output chunks.
    pub fn replay(&self, id: &SessionId) -> Option<String> {
        let buffers = self.sessions.lock().get(id).map(|e| Arc::clone(&e.buffers))?;
        let text = buffers.lock().history.concat();
        Some(text)
    }

    /// Kill the session's process and forget it.
    pub fn dispose(&self, id: &SessionId) -> Result<(), SessionNotFound> {
        let entry = self.sessions.lock().remove(id).ok_or(SessionNotFound)?;
        entry.buffers.lock().clear();
        entry.cancel.cancel();
        tracing::info!(id = %id, "terminal disposed");
        Ok(())
    }

    /// Dispose every session.
    pub fn teardown(&self) {
        let entries: Vec<(SessionId, SessionEntry)> = self.sessions.lock().drain().collect();
        for (id, entry) in entries {
            entry.buffers.lock().clear();
            entry.cancel.cancel();
            tracing::debug!(id = %id, "terminal torn down");
        }
    }

    pub fn list(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Drive one backend until it exits or the session is cancelled.
#[allow(clippy::too_many_arguments)]
async fn pump(
    id: SessionId,
    mut backend: Box<dyn Backend>,
    input_rx: mpsc::Receiver<BackendInput>,
    resize_rx: mpsc::Receiver<(u16, u16)>,
    cancel: CancellationToken,
    buffers: Arc<Mutex<SessionBuffers>>,
    sessions: Registry,
    callbacks: SessionCallbacks,
) {
    let (output_tx, mut output_rx) = mpsc::channel::<Bytes>(OUTPUT_CAPACITY);
    let mut decoder = Utf8Decoder::new();
    let mut handle_chunk = |data: &[u8]| {
        let text = decoder.decode(data);
        if text.is_empty() {
            return;
        }
        {
            let mut bufs = buffers.lock();
            if let Some(complete) = bufs.ansi.append(&text).complete() {
                bufs.history.push(complete);
            }
        }
        (callbacks.on_data)(&id, &text);
    };

    let outcome = {
        let mut run = backend.run(output_tx, input_rx, resize_rx);
        let mut output_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                chunk = output_rx.recv(), if output_open => match chunk {
                    Some(data) => handle_chunk(&data),
                    None => output_open = false,
                },
                result = &mut run => break Some(result),
            }
        }
    };

    if let Some(result) = outcome {
        // Output sent just before exit is still queued.
        while let Ok(data) = output_rx.try_recv() {
            handle_chunk(&data);
        }

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(id = %id, err = %e, "terminal backend failed");
                ExitStatus { code: None, signal: None }
            }
        };
        let code = status.exit_code();

        buffers.lock().clear();
        sessions.lock().remove(&id);
        tracing::info!(id = %id, code, "terminal exited");
        (callbacks.on_data)(&id, &format!("\nProcess exited with code {code}.\r\n"));
        (callbacks.on_exit)(&id, code);
    }

    // Dropping a native PTY may block while the child is reaped.
    let _ = tokio::task::spawn_blocking(move || drop(backend)).await;
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
