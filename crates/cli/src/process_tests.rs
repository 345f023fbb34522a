// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;

fn collector() -> (OutputFn, Arc<Mutex<String>>) {
    let text = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&text);
    (Arc::new(move |s: &str| sink.lock().push_str(s)), text)
}

fn sh(script: &str) -> ProcessSpec {
    ProcessSpec::new("/bin/sh", ["-c", script])
}

#[test]
fn display_echoes_command_line() {
    let spec = ProcessSpec::new("/opt/uv", ["python", "install", "3.11"]);
    assert_eq!(spec.to_string(), "/opt/uv python install 3.11");
}

#[tokio::test]
async fn success_streams_both_pipes() -> anyhow::Result<()> {
    let (out, text) = collector();
    let outcome = TokioRunner.run(&sh("echo out; echo err >&2"), out, CancellationToken::new()).await?;
    assert_eq!(outcome, RunOutcome::Success);
    let text = text.lock().clone();
    assert!(text.contains("out\n"), "{text:?}");
    assert!(text.contains("err\n"), "{text:?}");
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_is_an_error_with_code() {
    let (out, _) = collector();
    let result = TokioRunner.run(&sh("exit 4"), out, CancellationToken::new()).await;
    match result {
        Err(ProcessError::Exit { code }) => assert_eq!(code, 4),
        other => panic!("expected exit error, got {other:?}"),
    }
}

#[tokio::test]
async fn signal_death_is_canceled() -> anyhow::Result<()> {
    let (out, _) = collector();
    let outcome = TokioRunner.run(&sh("kill -TERM $$"), out, CancellationToken::new()).await?;
    assert_eq!(outcome, RunOutcome::Canceled);
    Ok(())
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let (out, _) = collector();
    let spec = ProcessSpec::new("/definitely/not/here", Vec::<String>::new());
    let result = TokioRunner.run(&spec, out, CancellationToken::new()).await;
    assert!(matches!(result, Err(ProcessError::Spawn { .. })), "{result:?}");
}

#[tokio::test]
async fn cancel_kills_running_process() -> anyhow::Result<()> {
    let (out, _) = collector();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let spec = sh("sleep 30");
    let outcome =
        tokio::time::timeout(Duration::from_secs(5), TokioRunner.run(&spec, out, cancel)).await??;
    assert_eq!(outcome, RunOutcome::Canceled);
    Ok(())
}

#[tokio::test]
async fn cancel_reaches_grandchildren() -> anyhow::Result<()> {
    let (out, text) = collector();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    // The trailing echo keeps the shell from exec'ing into sleep.
    let spec = sh("sleep 30; echo after");
    let started = std::time::Instant::now();
    let outcome =
        tokio::time::timeout(Duration::from_secs(5), TokioRunner.run(&spec, out, cancel)).await??;
    assert_eq!(outcome, RunOutcome::Canceled);
    assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    assert!(!text.lock().contains("after"));
    Ok(())
}

#[tokio::test]
async fn lingering_descendant_does_not_block_completion() -> anyhow::Result<()> {
    let (out, text) = collector();
    let spec = sh("sleep 20 & echo spawned");
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        TokioRunner.run(&spec, out, CancellationToken::new()),
    )
    .await??;
    assert_eq!(outcome, RunOutcome::Success);
    assert!(text.lock().contains("spawned"));
    Ok(())
}

#[tokio::test]
async fn cwd_and_env_apply() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let (out, text) = collector();
    let spec = sh("pwd; echo \"$LAUNCHPAD_TEST_VAR\"").cwd(dir.path()).env("LAUNCHPAD_TEST_VAR", "hello");
    TokioRunner.run(&spec, out, CancellationToken::new()).await?;

    let text = text.lock().clone();
    let canonical = dir.path().canonicalize()?;
    assert!(text.contains(&*canonical.to_string_lossy()) || text.contains(&*dir.path().to_string_lossy()), "{text:?}");
    assert!(text.contains("hello"), "{text:?}");
    Ok(())
}
