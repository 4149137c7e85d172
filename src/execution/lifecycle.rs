//! Generic start -> poll -> finalize driver for one backend job at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use super::poller::{PollOutcome, PollState, StatusPoller};
use super::{JobEvent, JobOutcome, JobState, LifecycleError};
use crate::backend::{BackendError, BackendStatus, ExecutionBackend};

const EVENT_CAPACITY: usize = 256;

/// One kind of long-running backend job (a test run, a package install).
///
/// The lifecycle owns the state machine and polling; a job only supplies how
/// to start, how to cancel, and what to do with the final report.
#[async_trait::async_trait]
pub trait BackendJob: Send + Sync + 'static {
    type Params: Send + Sync + 'static;

    /// Short name used in events, errors and logs.
    const KIND: &'static str;

    fn label(&self, params: &Self::Params) -> String;

    fn validate(&self, _params: &Self::Params) -> Result<(), String> {
        Ok(())
    }

    async fn start(
        &self,
        backend: &dyn ExecutionBackend,
        params: &Self::Params,
    ) -> Result<(), BackendError>;

    async fn cancel(&self, backend: &dyn ExecutionBackend) -> Result<String, BackendError> {
        backend.stop().await
    }

    /// Persist or report the finished job. Returns the id of anything stored.
    async fn finalize(&self, report: &JobReport) -> anyhow::Result<Option<String>>;
}

/// Everything known about a job once it reaches a terminal state.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub label: String,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub poll: PollState,
    pub error: Option<String>,
    pub connection_lost: bool,
}

/// Returned by a successful `start`; resolves once the job is finalized.
#[derive(Debug)]
pub struct RunHandle {
    pub job: &'static str,
    pub label: String,
    pub started_at: DateTime<Utc>,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl RunHandle {
    /// Wait for the poller to observe a terminal state and finalize the job.
    pub async fn wait(self) -> Result<JobOutcome, LifecycleError> {
        self.outcome
            .await
            .map_err(|_| LifecycleError::TaskAborted { job: self.job })
    }
}

/// Point-in-time view of a lifecycle, for the API and CLI.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleSnapshot {
    pub job: &'static str,
    pub state: JobState,
    pub label: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub live: PollState,
}

#[derive(Default)]
struct Inner {
    state: JobState,
    label: Option<String>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

/// State machine `Idle -> Running -> {Success, Failed, Stopped}` for one job kind.
///
/// Cheap to clone; clones share state.
pub struct JobLifecycle<J: BackendJob> {
    job: Arc<J>,
    backend: Arc<dyn ExecutionBackend>,
    poll_interval: Duration,
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<JobEvent>,
    live: Arc<watch::Sender<PollState>>,
}

impl<J: BackendJob> Clone for JobLifecycle<J> {
    fn clone(&self) -> Self {
        Self {
            job: self.job.clone(),
            backend: self.backend.clone(),
            poll_interval: self.poll_interval,
            inner: self.inner.clone(),
            events: self.events.clone(),
            live: self.live.clone(),
        }
    }
}

impl<J: BackendJob> JobLifecycle<J> {
    pub fn new(backend: Arc<dyn ExecutionBackend>, job: J, poll_interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (live, _) = watch::channel(PollState::default());
        Self {
            job: Arc::new(job),
            backend,
            poll_interval,
            inner: Arc::new(Mutex::new(Inner::default())),
            events,
            live: Arc::new(live),
        }
    }

    pub fn job(&self) -> &J {
        &self.job
    }

    pub fn state(&self) -> JobState {
        self.lock().state
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        let inner = self.lock();
        LifecycleSnapshot {
            job: J::KIND,
            state: inner.state,
            label: inner.label.clone(),
            started_at: inner.started_at,
            last_error: inner.last_error.clone(),
            live: self.live.borrow().clone(),
        }
    }

    /// Subscribe to lifecycle events. Each subscriber gets its own copy.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Watch the live log buffer of the current (or last) job.
    pub fn watch_logs(&self) -> watch::Receiver<PollState> {
        self.live.subscribe()
    }

    /// Start a job. Rejected while another one is running.
    ///
    /// If the backend refuses the start request the job is finalized as
    /// `Failed` right away (so history stays consistent) and the backend error
    /// is returned.
    pub async fn start(&self, params: J::Params) -> Result<RunHandle, LifecycleError> {
        self.job
            .validate(&params)
            .map_err(LifecycleError::InvalidConfig)?;

        let label = self.job.label(&params);
        let started_at = Utc::now();
        let clock = Instant::now();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut inner = self.lock();
            if inner.state == JobState::Running {
                return Err(LifecycleError::AlreadyRunning { job: J::KIND });
            }
            inner.state = JobState::Running;
            inner.label = Some(label.clone());
            inner.started_at = Some(started_at);
            inner.last_error = None;
            inner.cancel = Some(cancel_tx);
        }
        self.live.send_replace(PollState::default());
        info!(job = J::KIND, %label, "starting");
        self.publish(JobEvent::Started {
            job: J::KIND,
            label: label.clone(),
            started_at,
        });

        if let Err(err) = self.job.start(self.backend.as_ref(), &params).await {
            warn!(job = J::KIND, %label, error = %err, "backend refused start request");
            let poll = PollState {
                status: BackendStatus::Failed,
                ..PollState::default()
            };
            self.complete(JobReport {
                label,
                state: JobState::Failed,
                started_at,
                duration_secs: clock.elapsed().as_secs_f64(),
                poll,
                error: Some(err.to_string()),
                connection_lost: err.is_connection_lost(),
            })
            .await;
            return Err(LifecycleError::StartFailed {
                job: J::KIND,
                source: err,
            });
        }

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let this = self.clone();
        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let outcome = this
                .poll_to_completion(task_label, started_at, clock, cancel_rx)
                .await;
            let _ = outcome_tx.send(outcome);
        });
        self.lock().task = Some(task);

        Ok(RunHandle {
            job: J::KIND,
            label,
            started_at,
            outcome: outcome_rx,
        })
    }

    /// Ask the backend to cancel the running job.
    ///
    /// Advisory: the state stays `Running` until the poller sees the backend
    /// report a terminal status. Wait on the [`RunHandle`] or the `Finished`
    /// event to learn when that happens.
    pub async fn stop(&self) -> Result<String, LifecycleError> {
        if self.state() != JobState::Running {
            return Err(LifecycleError::NotRunning { job: J::KIND });
        }
        info!(job = J::KIND, "requesting stop");
        self.publish(JobEvent::StopRequested { job: J::KIND });
        let message = self
            .job
            .cancel(self.backend.as_ref())
            .await
            .map_err(LifecycleError::StopFailed)?;
        info!(job = J::KIND, %message, "stop acknowledged");
        Ok(message)
    }

    /// Stop watching the backend. An in-flight job is finalized as `Stopped`
    /// without contacting the backend; returns once that record is written.
    pub async fn shutdown(&self) {
        let task = {
            let mut inner = self.lock();
            if let Some(cancel) = inner.cancel.as_ref() {
                cancel.send_replace(true);
            }
            inner.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(job = J::KIND, error = %e, "poll task did not finish cleanly");
            }
        }
    }

    async fn poll_to_completion(
        &self,
        label: String,
        started_at: DateTime<Utc>,
        clock: Instant,
        cancel: watch::Receiver<bool>,
    ) -> JobOutcome {
        let poller = StatusPoller::new(self.backend.clone(), self.poll_interval);
        let live = self.live.clone();
        let events = self.events.clone();
        let mut seen_lines = 0;

        let outcome = poller
            .run(cancel, |state| {
                live.send_replace(state.clone());
                if state.logs.len() != seen_lines {
                    seen_lines = state.logs.len();
                    let _ = events.send(JobEvent::LogsUpdated {
                        job: J::KIND,
                        lines: seen_lines,
                    });
                }
            })
            .await;

        let (state, poll, error, connection_lost) = match outcome {
            PollOutcome::Finished(poll) => (terminal_state(poll.status), poll, None, false),
            PollOutcome::ConnectionLost { last, error } => {
                warn!(job = J::KIND, %label, %error, "lost connection to execution backend");
                let message = format!("connection lost: {}", error);
                (JobState::Failed, last, Some(message), true)
            }
            PollOutcome::Cancelled(last) => {
                info!(job = J::KIND, %label, "polling cancelled");
                (JobState::Stopped, last, None, false)
            }
        };

        self.complete(JobReport {
            label,
            state,
            started_at,
            duration_secs: clock.elapsed().as_secs_f64(),
            poll,
            error,
            connection_lost,
        })
        .await
    }

    /// Hand the report to the job, then leave `Running` and announce it.
    /// The state only changes after `finalize` so a new `start` cannot race
    /// ahead of the history write.
    async fn complete(&self, report: JobReport) -> JobOutcome {
        let record_id = match self.job.finalize(&report).await {
            Ok(id) => id,
            Err(e) => {
                warn!(job = J::KIND, label = %report.label, error = %e, "failed to finalize job");
                None
            }
        };

        {
            let mut inner = self.lock();
            inner.state = report.state;
            inner.last_error = report.error.clone();
            inner.cancel = None;
        }

        info!(
            job = J::KIND,
            label = %report.label,
            state = ?report.state,
            duration_secs = report.duration_secs,
            pass = report.poll.pass_count,
            fail = report.poll.fail_count,
            "finished"
        );

        let outcome = JobOutcome {
            state: report.state,
            duration_secs: report.duration_secs,
            pass_count: report.poll.pass_count,
            fail_count: report.poll.fail_count,
            error: report.error,
            connection_lost: report.connection_lost,
            record_id,
        };
        self.publish(JobEvent::Finished {
            job: J::KIND,
            label: report.label,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn terminal_state(status: BackendStatus) -> JobState {
    match status {
        BackendStatus::Success => JobState::Success,
        BackendStatus::Stopped => JobState::Stopped,
        BackendStatus::Running | BackendStatus::Failed | BackendStatus::Unknown => JobState::Failed,
    }
}
