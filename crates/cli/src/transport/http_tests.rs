// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use bytes::Bytes;

use crate::install::layout::DirDetails;
use crate::test_support::{
    wait_until, AnyhowExt, AppStateBuilder, MockPty, MockSpawner, Script, ScriptedRunner,
};
use crate::transport::build_router;

fn server(state: Arc<crate::transport::AppState>) -> anyhow::Result<axum_test::TestServer> {
    axum_test::TestServer::new(build_router(state)).anyhow()
}

fn json(resp: &axum_test::TestResponse) -> anyhow::Result<serde_json::Value> {
    Ok(serde_json::from_str(&resp.text())?)
}

#[tokio::test]
async fn health_200() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp = server.get("/api/v1/health").await;
    resp.assert_status(StatusCode::OK);
    let body = json(&resp)?;
    assert_eq!(body["status"], "running");
    assert_eq!(body["terminals"], 0);
    assert_eq!(body["install_running"], false);
    assert_eq!(body["service_running"], false);
    Ok(())
}

#[tokio::test]
async fn install_status_starts_uninitialized() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp = server.get("/api/v1/install").await;
    resp.assert_status(StatusCode::OK);
    let body = json(&resp)?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["state"], "uninitialized");
    assert!(body["timestamp_ms"].is_u64());
    Ok(())
}

#[tokio::test]
async fn install_second_start_conflicts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let uv = dir.path().join("uv");
    std::fs::write(&uv, b"")?;
    let location = dir.path().join("invoke");
    std::fs::create_dir(&location)?;

    let runner = Arc::new(ScriptedRunner::new());
    runner.push(Script::Block);
    let state = AppStateBuilder::new().runner(Arc::clone(&runner)).uv(&uv).build();
    let server = server(Arc::clone(&state))?;

    let req = serde_json::json!({
        "location": location,
        "gpu_type": "nogpu",
        "version": "v5.0.0",
    });
    let resp = server.post("/api/v1/install").json(&req).await;
    resp.assert_status(StatusCode::ACCEPTED);
    runner.wait_for_calls(1).await?;

    let resp = server.post("/api/v1/install").json(&req).await;
    resp.assert_status(StatusCode::CONFLICT);
    assert_eq!(json(&resp)?["error"]["code"], "CONFLICT");

    server.post("/api/v1/install/cancel").await.assert_status(StatusCode::OK);
    wait_until(Duration::from_secs(5), || !state.install.is_running()).await?;
    let body = json(&server.get("/api/v1/install").await)?;
    assert_eq!(body["state"], "canceled");
    Ok(())
}

#[tokio::test]
async fn install_start_rejects_malformed_body() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp = server.post("/api/v1/install").json(&serde_json::json!({ "gpu_type": "nogpu" })).await;
    assert!(resp.status_code().is_client_error());
    Ok(())
}

#[tokio::test]
async fn inspect_returns_details() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().details(DirDetails::empty("/data/invoke")).build();
    let server = server(state)?;

    let resp = server.get("/api/v1/install/inspect").add_query_param("path", "/data/invoke").await;
    resp.assert_status(StatusCode::OK);
    let body = json(&resp)?;
    assert_eq!(body["is_directory"], true);
    assert_eq!(body["is_installed"], false);
    assert_eq!(body["can_install"], true);
    Ok(())
}

#[tokio::test]
async fn service_start_invalid_install_reports_error() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp =
        server.post("/api/v1/service/start").json(&serde_json::json!({ "location": "/nope" })).await;
    resp.assert_status(StatusCode::ACCEPTED);

    let body = json(&server.get("/api/v1/service").await)?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Invalid installation!");
    Ok(())
}

#[tokio::test]
async fn navigate_requires_running_service() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp = server
        .post("/api/v1/service/navigate")
        .json(&serde_json::json!({ "url": "https://example.com" }))
        .await;
    resp.assert_status(StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn service_exit_without_process_is_accepted() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    server.post("/api/v1/service/exit").await.assert_status(StatusCode::OK);
    let body = json(&server.get("/api/v1/service").await)?;
    assert_eq!(body["state"], "uninitialized");
    Ok(())
}

#[tokio::test]
async fn terminal_lifecycle() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    let pty = MockPty::with_output(vec![Bytes::from("hello\r\n")]).drain_input();
    let input = pty.captured_input();
    let resizes = pty.captured_resizes();
    spawner.push(pty);
    let state = AppStateBuilder::new().spawner(spawner).build();
    let server = server(Arc::clone(&state))?;

    let resp = server.post("/api/v1/terminals").await;
    resp.assert_status(StatusCode::CREATED);
    let id = json(&resp)?["id"].as_str().unwrap_or_default().to_owned();
    assert!(!id.is_empty());

    let body = json(&server.get("/api/v1/terminals").await)?;
    assert_eq!(body["ids"], serde_json::json!([id]));

    server
        .post(&format!("/api/v1/terminals/{id}/input"))
        .json(&serde_json::json!({ "data": "ls\r" }))
        .await
        .assert_status(StatusCode::OK);
    wait_until(Duration::from_secs(5), || {
        input.lock().iter().any(|b| b.as_ref() == b"ls\r")
    })
    .await?;

    server
        .post(&format!("/api/v1/terminals/{id}/resize"))
        .json(&serde_json::json!({ "cols": 120, "rows": 40 }))
        .await
        .assert_status(StatusCode::OK);
    wait_until(Duration::from_secs(5), || resizes.lock().contains(&(120, 40))).await?;

    let replay_path = format!("/api/v1/terminals/{id}/replay");
    wait_until(Duration::from_secs(5), || {
        state.terminals.manager().replay(&id.as_str().into()).is_some_and(|h| h.contains("hello"))
    })
    .await?;
    let resp = server.get(&replay_path).await;
    resp.assert_status(StatusCode::OK);
    assert!(json(&resp)?["data"].as_str().unwrap_or_default().contains("hello"));

    server.delete(&format!("/api/v1/terminals/{id}")).await.assert_status(StatusCode::OK);
    server.get(&replay_path).await.assert_status(StatusCode::NOT_FOUND);
    server.delete(&format!("/api/v1/terminals/{id}")).await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn terminal_unknown_id_404() -> anyhow::Result<()> {
    let server = server(AppStateBuilder::new().build())?;

    let resp = server
        .post("/api/v1/terminals/missing/input")
        .json(&serde_json::json!({ "data": "x" }))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(json(&resp)?["error"]["code"], "NOT_FOUND");

    server.get("/api/v1/terminals/missing/replay").await.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn terminal_resize_rejects_zero() -> anyhow::Result<()> {
    let state = AppStateBuilder::new().build();
    let server = server(Arc::clone(&state))?;

    let id = json(&server.post("/api/v1/terminals").await)?["id"]
        .as_str()
        .unwrap_or_default()
        .to_owned();
    let resp = server
        .post(&format!("/api/v1/terminals/{id}/resize"))
        .json(&serde_json::json!({ "cols": 0, "rows": 24 }))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    state.terminals.manager().teardown();
    Ok(())
}

#[tokio::test]
async fn terminal_spawn_failure_500() -> anyhow::Result<()> {
    let spawner = Arc::new(MockSpawner::new());
    spawner.fail_next("no pty available");
    let server = server(AppStateBuilder::new().spawner(spawner).build())?;

    let resp = server.post("/api/v1/terminals").await;
    resp.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(resp.text().contains("no pty available"));
    Ok(())
}
