//! Run orchestration: start a backend job, poll it to completion, finalize.
//!
//! [`RunLifecycle`] drives test runs and records them in history;
//! [`DependencyInstallLifecycle`] drives package installs through the very
//! same machinery. Both are [`JobLifecycle`]s over a different [`BackendJob`].

pub mod config;
pub mod install;
pub mod lifecycle;
pub mod poller;
pub mod run;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

pub use self::config::RunConfig;
pub use self::install::{parse_requirements, DependencyInstallLifecycle, InstallJob};
pub use self::lifecycle::{BackendJob, JobLifecycle, JobReport, LifecycleSnapshot, RunHandle};
pub use self::poller::{PollOutcome, PollState, StatusPoller, DEFAULT_POLL_INTERVAL};
pub use self::run::{RunLifecycle, TestRunJob};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Success,
    Failed,
    Stopped,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Stopped)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Running => write!(f, "running"),
            JobState::Success => write!(f, "success"),
            JobState::Failed => write!(f, "failed"),
            JobState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("a {job} is already running")]
    AlreadyRunning { job: &'static str },

    #[error("no {job} is running")]
    NotRunning { job: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("backend refused to start the {job}: {source}")]
    StartFailed {
        job: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("stop request failed: {0}")]
    StopFailed(#[source] BackendError),

    #[error("{job} task ended before reporting an outcome")]
    TaskAborted { job: &'static str },
}

/// Final result of one job, delivered through [`RunHandle::wait`] and the
/// `Finished` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub state: JobState,
    pub duration_secs: f64,
    pub pass_count: u32,
    pub fail_count: u32,
    pub error: Option<String>,
    /// The failure was a dropped connection to the backend, not a test failure.
    pub connection_lost: bool,
    /// Id of the history record written for this job, if any.
    pub record_id: Option<String>,
}

/// Lifecycle notifications; any number of subscribers may listen.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Started {
        job: &'static str,
        label: String,
        started_at: DateTime<Utc>,
    },
    LogsUpdated {
        job: &'static str,
        lines: usize,
    },
    StopRequested {
        job: &'static str,
    },
    Finished {
        job: &'static str,
        label: String,
        outcome: JobOutcome,
    },
}

impl JobEvent {
    pub fn job(&self) -> &'static str {
        match self {
            JobEvent::Started { job, .. }
            | JobEvent::LogsUpdated { job, .. }
            | JobEvent::StopRequested { job }
            | JobEvent::Finished { job, .. } => job,
        }
    }
}
