mod common;

use std::time::Duration;

use common::*;
use robotmaestro::backend::{BackendError, BackendStatus, StatusResponse};
use robotmaestro::execution::{JobEvent, JobState, LifecycleError, RunConfig};
use robotmaestro::history::RunStatus;

fn suite(name: &str) -> RunConfig {
    RunConfig::BySuite {
        suite: name.to_string(),
    }
}

#[tokio::test]
async fn test_successful_run_is_recorded() {
    let backend = ScriptedBackend::new();
    backend.push(running(&["START_SUITE Smoke"]));
    backend.push(StatusResponse {
        logs: Some(vec![
            "START_SUITE Smoke".to_string(),
            "Login | PASS |".to_string(),
        ]),
        report_file: Some("report-1.html".to_string()),
        log_file: Some("log-1.html".to_string()),
        ..finished(BackendStatus::Success, 3, 0)
    });
    let app = app(&backend);

    let handle = app.runs.start(suite("Smoke")).await.unwrap();
    assert_eq!(handle.label, "Suite: Smoke");
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.state, JobState::Success);
    assert_eq!((outcome.pass_count, outcome.fail_count), (3, 0));
    assert!(!outcome.connection_lost);
    assert_eq!(app.runs.state(), JobState::Success);
    assert_eq!(*backend.runs_started.lock().unwrap(), [suite("Smoke")]);

    let id = outcome.record_id.expect("run should be recorded");
    let record = app.history.get(&id).await.unwrap();
    assert_eq!(record.suite, "Suite: Smoke");
    assert_eq!(record.status, RunStatus::Success);
    assert_eq!(record.pass_count, 3);
    assert_eq!(record.report_file.as_deref(), Some("report-1.html"));
    assert_eq!(record.raw_logs, ["START_SUITE Smoke", "Login | PASS |"]);
    assert_eq!(record.tree().len(), 1);
}

#[tokio::test]
async fn test_second_start_is_rejected_while_running() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let handle = app.runs.start(RunConfig::All).await.unwrap();
    let err = app.runs.start(suite("Other")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::AlreadyRunning { .. }));
    assert_eq!(backend.runs_started.lock().unwrap().len(), 1);

    backend.push(finished(BackendStatus::Failed, 1, 2));
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.state, JobState::Failed);

    // Terminal again, so a new run is accepted.
    backend.push(finished(BackendStatus::Success, 1, 0));
    let outcome = app.runs.start(suite("Other")).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.state, JobState::Success);
    assert_eq!(app.history.list().await.len(), 2);
}

#[tokio::test]
async fn test_stop_while_idle_is_rejected() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let err = app.runs.stop().await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotRunning { .. }));
    assert_eq!(backend.stop_count(), 0);
}

#[tokio::test]
async fn test_stop_is_advisory() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let handle = app.runs.start(RunConfig::All).await.unwrap();
    let message = app.runs.stop().await.unwrap();
    assert_eq!(message, "Stop signal sent");
    assert_eq!(backend.stop_count(), 1);

    // The backend still says running, so the run is still running.
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(app.runs.state(), JobState::Running);

    backend.push(finished(BackendStatus::Stopped, 1, 0));
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.state, JobState::Stopped);

    let records = app.history.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_poll_failure_finalizes_as_connection_lost() {
    let backend = ScriptedBackend::new();
    backend.push(running(&["START_TEST Login"]));
    backend.push_error(unreachable());
    let app = app(&backend);

    let outcome = app
        .runs
        .start(suite("Login"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.state, JobState::Failed);
    assert!(outcome.connection_lost);
    assert!(outcome.error.unwrap().starts_with("connection lost"));

    let records = app.history.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Failed);
    assert_eq!(records[0].raw_logs, ["START_TEST Login"]);
    assert!(app.runs.snapshot().last_error.is_some());
}

#[tokio::test]
async fn test_start_failure_writes_zero_count_record() {
    let backend = ScriptedBackend::new();
    backend.fail_start(BackendError::Rejected {
        status: 409,
        message: "A test run is already in progress.".to_string(),
    });
    let app = app(&backend);
    let mut events = app.runs.subscribe();

    let err = app.runs.start(suite("Login")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::StartFailed { .. }));
    assert_eq!(app.runs.state(), JobState::Failed);

    let outcome = next_finished(&mut events).await;
    assert_eq!(outcome.state, JobState::Failed);
    assert!(!outcome.connection_lost);

    let records = app.history.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Failed);
    assert_eq!((records[0].pass_count, records[0].fail_count), (0, 0));
    assert_eq!(backend.stop_count(), 0);
}

#[tokio::test]
async fn test_invalid_config_changes_nothing() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let err = app
        .runs
        .start(RunConfig::ByTag {
            include_tags: "  ".to_string(),
            exclude_tags: String::new(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidConfig(_)));
    assert_eq!(app.runs.state(), JobState::Idle);
    assert!(backend.runs_started.lock().unwrap().is_empty());
    assert!(app.history.list().await.is_empty());
}

#[tokio::test]
async fn test_logs_are_replaced_not_appended() {
    let backend = ScriptedBackend::new();
    backend.push(running(&["one"]));
    backend.push(running(&["one", "two"]));
    // An empty log array keeps the previous snapshot.
    backend.push(running(&[]));
    backend.push(finished(BackendStatus::Success, 1, 0));
    let app = app(&backend);

    let outcome = app.runs.start(RunConfig::All).await.unwrap().wait().await.unwrap();
    assert_eq!(outcome.state, JobState::Success);
    assert_eq!(app.runs.watch_logs().borrow().logs, ["one", "two"]);

    let record = app.history.get(&outcome.record_id.unwrap()).await.unwrap();
    assert_eq!(record.raw_logs, ["one", "two"]);
}

#[tokio::test]
async fn test_events_are_published_in_order() {
    let backend = ScriptedBackend::new();
    backend.push(running(&["START_SUITE Smoke"]));
    backend.push(finished(BackendStatus::Success, 1, 0));
    let app = app(&backend);
    let mut first = app.runs.subscribe();
    let mut second = app.runs.subscribe();

    app.runs.start(RunConfig::All).await.unwrap();
    let outcome = next_finished(&mut second).await;

    let mut seen = Vec::new();
    while let Ok(event) = first.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(JobEvent::Started { label, .. }) if label == "All Tests"));
    assert!(seen
        .iter()
        .any(|e| matches!(e, JobEvent::LogsUpdated { lines: 1, .. })));
    match seen.last() {
        Some(JobEvent::Finished { outcome: last, .. }) => assert_eq!(*last, outcome),
        other => panic!("expected Finished last, got {:?}", other),
    }
    assert!(outcome.record_id.is_some());
}

#[tokio::test]
async fn test_shutdown_stops_watching() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let handle = app.runs.start(RunConfig::All).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .unwrap();

    // The record is written before shutdown returns.
    let records = app.history.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RunStatus::Stopped);
    assert_eq!(app.runs.state(), JobState::Stopped);

    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.state, JobState::Stopped);
    assert_eq!(outcome.record_id.as_deref(), Some(records[0].id.as_str()));
    assert_eq!(backend.stop_count(), 0);
}

#[tokio::test]
async fn test_shutdown_while_idle_returns() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);
    tokio::time::timeout(Duration::from_secs(5), app.shutdown())
        .await
        .unwrap();
    assert_eq!(app.runs.state(), JobState::Idle);
}

#[tokio::test]
async fn test_install_uses_the_same_lifecycle() {
    let backend = ScriptedBackend::new();
    backend.push(running(&["Collecting robotframework"]));
    backend.push(finished(BackendStatus::Success, 0, 0));
    let app = app(&backend);

    let packages = vec!["robotframework".to_string(), "requests".to_string()];
    let handle = app.installs.start(packages.clone()).await.unwrap();
    assert_eq!(handle.label, "Install 2 packages");
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.state, JobState::Success);
    assert_eq!(outcome.record_id, None);
    assert_eq!(*backend.installs_started.lock().unwrap(), [packages]);
    assert!(app.history.list().await.is_empty());
    assert_eq!(app.runs.state(), JobState::Idle);
}

#[tokio::test]
async fn test_install_rejects_empty_package_list() {
    let backend = ScriptedBackend::new();
    let app = app(&backend);

    let err = app.installs.start(Vec::new()).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidConfig(_)));
    let err = app.installs.stop().await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotRunning { .. }));
}
