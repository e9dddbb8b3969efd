use std::time::Duration;

use crate::support::{
    helpers::{
        dns_alert, init_tracing, ip_alert, stored_cursor, test_config, threat_catalog,
        wait_for_events, RecordingPublisher,
    },
    mock_api::{MockAlertApi, ScriptedResponse},
};
use alert_harvester::{Cursor, HarvestState, Runner};
use anyhow::{Context, Result};
use serde_json::json;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_on_fatal_status() -> Result<()> {
    init_tracing();
    let server = MockAlertApi::start(vec![ScriptedResponse::status(500)]).await?;
    let dir = TempDir::new()?;
    let config = test_config(&server, dir.path())?;

    let (publisher, _state) = RecordingPublisher::new();
    let mut runner = Runner::new(config, publisher);
    let outcome = timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("runner should stop after a fatal status")?;

    let err = outcome.expect_err("500 should abort the runner");
    let message = format!("{err:#}");
    assert!(
        message.contains("500"),
        "runner did not propagate the status, got {message}"
    );
    assert!(
        !runner.cancellation_token().is_cancelled(),
        "runner should install a fresh token after each run"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn run_until_ctrl_c_honours_external_cancellation() -> Result<()> {
    init_tracing();
    let server = MockAlertApi::start(Vec::new()).await?;
    let dir = TempDir::new()?;
    let config = test_config(&server, dir.path())?;

    let (publisher, state) = RecordingPublisher::new();
    let mut runner = Runner::new(config, publisher);
    let token = runner.cancellation_token();
    let mut states = runner.subscribe_state();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_millis(150)).await;
        token.cancel();
    });

    timeout(Duration::from_secs(5), runner.run_until_ctrl_c())
        .await
        .context("runner should stop once its token is cancelled")??;
    canceller.await?;

    assert_eq!(*states.borrow_and_update(), HarvestState::Stopped);
    assert!(server.request_count() >= 1, "idle polling should have started");
    let state = state.lock().await;
    assert_eq!(state.connects, 1);
    assert_eq!(state.closes, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_can_restart_after_stop() -> Result<()> {
    init_tracing();
    let server = MockAlertApi::start(vec![ScriptedResponse::page(
        "c1",
        false,
        json!([ip_alert()]),
        threat_catalog(),
    )])
    .await?;
    let dir = TempDir::new()?;
    let config = test_config(&server, dir.path())?;

    let (publisher, state) = RecordingPublisher::new();
    let mut runner = Runner::new(config.clone(), publisher);

    let token = runner.cancellation_token();
    let watched = state.clone();
    let stopper = tokio::spawn(async move {
        let outcome = wait_for_events(&watched, 1, Duration::from_secs(5)).await;
        token.cancel();
        outcome
    });
    timeout(Duration::from_secs(10), runner.run()).await??;
    stopper.await??;
    assert_eq!(stored_cursor(&config)?, Cursor::from("c1"));

    let requests_before_restart = server.request_count();
    server.push(ScriptedResponse::page(
        "c2",
        false,
        json!([dns_alert()]),
        threat_catalog(),
    ));

    let token = runner.cancellation_token();
    assert!(!token.is_cancelled());
    let watched = state.clone();
    let stopper = tokio::spawn(async move {
        let outcome = wait_for_events(&watched, 3, Duration::from_secs(5)).await;
        token.cancel();
        outcome
    });
    timeout(Duration::from_secs(10), runner.run()).await??;
    stopper.await??;

    let requests = server.requests();
    assert_eq!(
        requests[requests_before_restart].follow.as_deref(),
        Some("c1"),
        "restart should resume from the persisted cursor"
    );
    assert_eq!(stored_cursor(&config)?, Cursor::from("c2"));

    let guard = state.lock().await;
    assert_eq!(guard.connects, 2);
    assert_eq!(guard.closes, 2);
    assert_eq!(guard.events.len(), 3);
    assert_eq!(runner.telemetry().snapshot().events_published, 3);

    server.shutdown().await;
    Ok(())
}
