//! Fixed-interval status polling against the execution backend.
//!
//! The poller knows nothing about which job it is tracking; it only watches
//! `GET /status` until the backend leaves the running state, the connection
//! drops, or it is told to stop watching.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::backend::{BackendError, BackendStatus, ExecutionBackend, StatusResponse};

/// Interval used by the dashboard between status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Latest view of the backend job, as seen by the poller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollState {
    pub status: BackendStatus,
    pub logs: Vec<String>,
    pub pass_count: u32,
    pub fail_count: u32,
    #[serde(rename = "reportFile")]
    pub report_file: Option<String>,
    #[serde(rename = "logFile")]
    pub log_file: Option<String>,
    #[serde(rename = "videoFile")]
    pub video_file: Option<String>,
}

impl PollState {
    /// Fold one status response in. The backend sends the full log so far,
    /// so a present `logs` field replaces the buffer rather than extending it.
    pub fn apply(&mut self, resp: StatusResponse) {
        self.status = resp.status;
        if let Some(logs) = resp.logs {
            if !logs.is_empty() {
                self.logs = logs;
            }
        }
        if let Some(n) = resp.pass_count {
            self.pass_count = n;
        }
        if let Some(n) = resp.fail_count {
            self.fail_count = n;
        }
        if resp.report_file.is_some() {
            self.report_file = resp.report_file;
        }
        if resp.log_file.is_some() {
            self.log_file = resp.log_file;
        }
        if resp.video_file.is_some() {
            self.video_file = resp.video_file;
        }
    }
}

/// How a poll cycle ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// The backend reported a non-running status.
    Finished(PollState),
    /// A status request failed; `last` is the state before the failure.
    ConnectionLost { last: PollState, error: BackendError },
    /// The cancel signal fired before the backend finished.
    Cancelled(PollState),
}

pub struct StatusPoller {
    backend: Arc<dyn ExecutionBackend>,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(backend: Arc<dyn ExecutionBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    /// Poll until the backend leaves `running`. `on_tick` sees every state
    /// after it has been updated; `cancel` flipping to `true` (or its sender
    /// going away) ends the cycle early.
    pub async fn run<F>(&self, mut cancel: watch::Receiver<bool>, mut on_tick: F) -> PollOutcome
    where
        F: FnMut(&PollState),
    {
        let mut state = PollState::default();
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *cancel.borrow() {
                return PollOutcome::Cancelled(state);
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        return PollOutcome::Cancelled(state);
                    }
                    continue;
                }
            }

            match self.backend.status().await {
                Ok(resp) => {
                    state.apply(resp);
                    debug!(status = ?state.status, lines = state.logs.len(), "status tick");
                    on_tick(&state);
                    if !state.status.is_running() {
                        return PollOutcome::Finished(state);
                    }
                }
                Err(error) => return PollOutcome::ConnectionLost { last: state, error },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> StatusResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_apply_replaces_logs_instead_of_appending() {
        let mut state = PollState::default();
        state.apply(response(serde_json::json!({"status": "running", "logs": ["a"]})));
        state.apply(response(serde_json::json!({"status": "running", "logs": ["a", "b"]})));
        assert_eq!(state.logs, ["a", "b"]);
    }

    #[test]
    fn test_apply_keeps_previous_values_when_absent() {
        let mut state = PollState::default();
        state.apply(response(serde_json::json!({
            "status": "running", "logs": ["a"], "pass_count": 2, "reportFile": "r.html"
        })));
        state.apply(response(serde_json::json!({"status": "success", "logs": []})));
        assert_eq!(state.status, BackendStatus::Success);
        assert_eq!(state.logs, ["a"]);
        assert_eq!(state.pass_count, 2);
        assert_eq!(state.report_file.as_deref(), Some("r.html"));
    }
}
