// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::*;
use crate::error::SessionNotFound;
use crate::pty::ExitStatus;
use crate::test_support::{wait_until, MockPty, MockSpawner};

struct Recorded {
    data: Arc<Mutex<Vec<(SessionId, String)>>>,
    exits: mpsc::UnboundedReceiver<(SessionId, i32)>,
    callbacks: SessionCallbacks,
}

fn recorded() -> Recorded {
    let data = Arc::new(Mutex::new(Vec::new()));
    let (exit_tx, exits) = mpsc::unbounded_channel();
    let sink = Arc::clone(&data);
    let callbacks = SessionCallbacks::new(
        move |id, chunk| sink.lock().push((id.clone(), chunk.to_owned())),
        move |id, code| {
            let _ = exit_tx.send((id.clone(), code));
        },
    );
    Recorded { data, exits, callbacks }
}

fn manager(spawner: Arc<MockSpawner>, max_history: usize) -> PtyManager {
    PtyManager::new(spawner, PtyManagerOptions { max_history, ..Default::default() })
}

fn chunks(parts: &[&'static str]) -> Vec<Bytes> {
    parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
}

#[tokio::test]
async fn replay_respects_ansi_boundaries() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.push(MockPty::with_output(chunks(&["a", "\x1b[31m", "b\x1b[0m"])).drain_input());
    let mgr = manager(Arc::clone(&spawner), 100);
    let rec = recorded();

    let id = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    wait_until(Duration::from_secs(2), || rec.data.lock().len() == 3).await?;

    assert_eq!(mgr.replay(&id), Some("a\x1b[31mb\x1b[0m".to_owned()));
    let seen: Vec<String> = rec.data.lock().iter().map(|(_, c)| c.clone()).collect();
    assert_eq!(seen, vec!["a", "\x1b[31m", "b\x1b[0m"]);
    Ok(())
}

#[tokio::test]
async fn partial_sequence_reaches_ui_but_not_history() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.push(MockPty::with_output(chunks(&["ok ", "\x1b[3"])).drain_input());
    let mgr = manager(Arc::clone(&spawner), 100);
    let rec = recorded();

    let id = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    wait_until(Duration::from_secs(2), || rec.data.lock().len() == 2).await?;

    assert_eq!(mgr.replay(&id), Some("ok ".to_owned()));
    Ok(())
}

#[tokio::test]
async fn history_is_bounded() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.push(MockPty::with_output(chunks(&["1", "2", "3", "4"])).drain_input());
    let mgr = manager(Arc::clone(&spawner), 2);
    let rec = recorded();

    let id = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    wait_until(Duration::from_secs(2), || rec.data.lock().len() == 4).await?;
    assert_eq!(mgr.replay(&id), Some("34".to_owned()));
    Ok(())
}

#[tokio::test]
async fn exit_removes_session_and_reports_code() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.push(
        MockPty::with_output(chunks(&["bye\r\n"]))
            .exit_status(ExitStatus { code: Some(3), signal: None }),
    );
    let mgr = manager(Arc::clone(&spawner), 100);
    let mut rec = recorded();

    let id = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    let (exited_id, code) =
        tokio::time::timeout(Duration::from_secs(2), rec.exits.recv()).await?.ok_or_else(|| anyhow::anyhow!("no exit"))?;

    assert_eq!(exited_id, id);
    assert_eq!(code, 3);
    assert!(mgr.list().is_empty());
    assert_eq!(mgr.replay(&id), None);
    let last = rec.data.lock().last().map(|(_, c)| c.clone());
    assert_eq!(last.as_deref(), Some("\nProcess exited with code 3.\r\n"));
    Ok(())
}

#[tokio::test]
async fn signal_exit_maps_to_shell_code() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.push(MockPty::new().exit_status(ExitStatus { code: None, signal: Some(9) }));
    let mgr = manager(Arc::clone(&spawner), 100);
    let mut rec = recorded();

    mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    let (_, code) =
        tokio::time::timeout(Duration::from_secs(2), rec.exits.recv()).await?.ok_or_else(|| anyhow::anyhow!("no exit"))?;
    assert_eq!(code, 137);
    Ok(())
}

#[tokio::test]
async fn startup_commands_and_writes_reach_the_shell() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let pty = MockPty::new().drain_input();
    let input = pty.captured_input();
    spawner.push(pty);
    let mgr = manager(Arc::clone(&spawner), 100);
    let rec = recorded();

    let options = CreateOptions {
        commands: vec!["export A=1".to_owned(), "cd /tmp".to_owned()],
        ..Default::default()
    };
    let id = mgr.create(rec.callbacks.clone(), options)?;
    mgr.write(&id, "ls\r").await?;
    mgr.resize(&id, 120, 40).await?;

    wait_until(Duration::from_secs(2), || input.lock().len() == 2).await?;
    let typed: Vec<Bytes> = input.lock().clone();
    assert_eq!(typed[0], Bytes::from_static(b"export A=1\rcd /tmp\r"));
    assert_eq!(typed[1], Bytes::from_static(b"ls\r"));
    Ok(())
}

#[tokio::test]
async fn spawn_request_uses_manager_settings() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let mgr = PtyManager::new(
        Arc::clone(&spawner) as Arc<dyn PtySpawner>,
        PtyManagerOptions { shell: "/bin/sh".to_owned(), term: "dumb".to_owned(), ..Default::default() },
    );
    let rec = recorded();
    let options = CreateOptions {
        cwd: Some("/srv".into()),
        env: vec![("K".to_owned(), "V".to_owned())],
        ..Default::default()
    };
    mgr.create(rec.callbacks.clone(), options)?;

    let requests = spawner.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].shell, "/bin/sh");
    assert_eq!(requests[0].term, "dumb");
    assert_eq!(requests[0].cwd, std::path::PathBuf::from("/srv"));
    assert_eq!(requests[0].env, vec![("K".to_owned(), "V".to_owned())]);
    Ok(())
}

#[tokio::test]
async fn spawn_failure_registers_nothing() {
    let spawner = Arc::new(MockSpawner::new());
    spawner.fail_next("no pty for you");
    let mgr = manager(Arc::clone(&spawner), 100);
    let rec = recorded();

    crate::assert_err_contains!(mgr.create(rec.callbacks.clone(), CreateOptions::default()), "no pty for you");
    assert!(mgr.list().is_empty());
}

#[tokio::test]
async fn unknown_id_is_a_sentinel() {
    let mgr = manager(Arc::new(MockSpawner::new()), 100);
    let ghost = SessionId::from("ghost");

    assert_eq!(mgr.write(&ghost, "x").await, Err(SessionNotFound));
    assert_eq!(mgr.resize(&ghost, 80, 24).await, Err(SessionNotFound));
    assert_eq!(mgr.replay(&ghost), None);
    assert_eq!(mgr.dispose(&ghost), Err(SessionNotFound));
}

#[tokio::test]
async fn dispose_kills_and_forgets() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let pty = MockPty::new().drain_input();
    let dropped = pty.dropped();
    spawner.push(pty);
    let mgr = manager(Arc::clone(&spawner), 100);
    let mut rec = recorded();

    let id = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    mgr.dispose(&id)?;

    assert!(mgr.list().is_empty());
    assert_eq!(mgr.replay(&id), None);
    assert_eq!(mgr.dispose(&id), Err(SessionNotFound));
    wait_until(Duration::from_secs(2), || dropped.load(std::sync::atomic::Ordering::SeqCst)).await?;
    // Disposal is silent: no exit callback.
    assert!(rec.exits.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn teardown_disposes_everything() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let first = MockPty::new().drain_input();
    let second = MockPty::new().drain_input();
    let (d1, d2) = (first.dropped(), second.dropped());
    spawner.push(first);
    spawner.push(second);
    let mgr = manager(Arc::clone(&spawner), 100);
    let rec = recorded();

    let a = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    let b = mgr.create(rec.callbacks.clone(), CreateOptions::default())?;
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(mgr.list(), expected);

    mgr.teardown();
    assert!(mgr.list().is_empty());
    wait_until(Duration::from_secs(2), || {
        d1.load(std::sync::atomic::Ordering::SeqCst) && d2.load(std::sync::atomic::Ordering::SeqCst)
    })
    .await?;
    Ok(())
}
