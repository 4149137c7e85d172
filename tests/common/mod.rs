//! Scripted in-process execution backend shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use robotmaestro::api::state::AppState;
use robotmaestro::backend::{
    ArtifactCleaner, BackendError, BackendStatus, ExecutionBackend, StatusResponse,
};
use robotmaestro::execution::{JobEvent, JobOutcome, RunConfig};
use robotmaestro::storage;
use tokio::sync::broadcast;

pub const POLL: Duration = Duration::from_millis(10);

/// Backend whose `GET /status` answers come from a queue filled by the test.
/// An empty queue answers "running" with no new logs.
#[derive(Default)]
pub struct ScriptedBackend {
    statuses: Mutex<VecDeque<Result<StatusResponse, BackendError>>>,
    start_error: Mutex<Option<BackendError>>,
    delete_error_for: Mutex<Option<String>>,
    pub runs_started: Mutex<Vec<RunConfig>>,
    pub installs_started: Mutex<Vec<Vec<String>>>,
    pub deleted: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: StatusResponse) {
        self.statuses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_error(&self, error: BackendError) {
        self.statuses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_start(&self, error: BackendError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn fail_delete(&self, filename: &str) {
        *self.delete_error_for.lock().unwrap() = Some(filename.to_string());
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ArtifactCleaner for ScriptedBackend {
    async fn delete_artifact(&self, filename: &str) -> Result<(), BackendError> {
        if self.delete_error_for.lock().unwrap().as_deref() == Some(filename) {
            return Err(BackendError::Rejected {
                status: 404,
                message: "File not found".to_string(),
            });
        }
        self.deleted.lock().unwrap().push(filename.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for ScriptedBackend {
    async fn start_run(&self, config: &RunConfig) -> Result<(), BackendError> {
        if let Some(err) = self.start_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.runs_started.lock().unwrap().push(config.clone());
        Ok(())
    }

    async fn status(&self) -> Result<StatusResponse, BackendError> {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusResponse::default()))
    }

    async fn stop(&self) -> Result<String, BackendError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok("Stop signal sent".to_string())
    }

    async fn start_install(&self, missing_packages: &[String]) -> Result<(), BackendError> {
        if let Some(err) = self.start_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.installs_started
            .lock()
            .unwrap()
            .push(missing_packages.to_vec());
        Ok(())
    }
}

pub fn running(lines: &[&str]) -> StatusResponse {
    StatusResponse {
        status: BackendStatus::Running,
        logs: Some(lines.iter().map(|l| l.to_string()).collect()),
        ..StatusResponse::default()
    }
}

pub fn finished(status: BackendStatus, pass: u32, fail: u32) -> StatusResponse {
    StatusResponse {
        status,
        pass_count: Some(pass),
        fail_count: Some(fail),
        ..StatusResponse::default()
    }
}

pub fn unreachable() -> BackendError {
    BackendError::Unreachable {
        url: "http://localhost:5001/status".to_string(),
        reason: "connection refused".to_string(),
    }
}

pub fn app(backend: &Arc<ScriptedBackend>) -> AppState {
    AppState::new(storage::open_memory_pool().unwrap(), backend.clone(), POLL)
}

/// Wait (bounded) for the next `Finished` event on `rx`.
pub async fn next_finished(rx: &mut broadcast::Receiver<JobEvent>) -> JobOutcome {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let JobEvent::Finished { outcome, .. } = rx.recv().await.unwrap() {
                return outcome;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}
