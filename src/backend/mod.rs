//! Execution backend client -- the remote service that runs Robot Framework.
//!
//! The backend is an external collaborator reached over HTTP/JSON. Everything
//! in this crate talks to it through [`ExecutionBackend`] so lifecycles can be
//! driven against an in-process fake in tests.

pub mod http;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::execution::RunConfig;

pub use self::http::HttpBackend;

#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("execution backend unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("execution backend returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("malformed response from execution backend: {0}")]
    Malformed(String),
}

impl BackendError {
    /// True when the request never reached the backend (refused, reset, timed out).
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, BackendError::Unreachable { .. })
    }
}

/// Job status as reported by `GET /status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    #[default]
    Running,
    Success,
    Failed,
    Stopped,
    /// Any status string this client does not know; treated as a failure.
    #[serde(other)]
    Unknown,
}

impl BackendStatus {
    pub fn is_running(self) -> bool {
        self == BackendStatus::Running
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    pub status: BackendStatus,
    /// Full log-so-far. Some backends send a newline-joined string instead of
    /// an array; both are accepted.
    #[serde(default, deserialize_with = "deserialize_logs")]
    pub logs: Option<Vec<String>>,
    #[serde(default)]
    pub pass_count: Option<u32>,
    #[serde(default)]
    pub fail_count: Option<u32>,
    #[serde(default, rename = "reportFile")]
    pub report_file: Option<String>,
    #[serde(default, rename = "logFile")]
    pub log_file: Option<String>,
    #[serde(default, rename = "videoFile")]
    pub video_file: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogsField {
    Lines(Vec<String>),
    Joined(String),
}

fn deserialize_logs<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let field = Option::<LogsField>::deserialize(deserializer)?;
    Ok(field.map(|f| match f {
        LogsField::Lines(lines) => lines,
        LogsField::Joined(text) => text.lines().map(str::to_string).collect(),
    }))
}

/// Body of `POST /install-dependencies`.
#[derive(Debug, Clone, Serialize)]
pub struct StartInstallRequest<'a> {
    pub missing_packages: &'a [String],
}

/// `{message}` / `{error}` bodies used by the backend for acks and failures.
#[derive(Debug, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// Removes artifact files (reports, logs, videos) referenced by run records.
#[async_trait::async_trait]
pub trait ArtifactCleaner: Send + Sync {
    async fn delete_artifact(&self, filename: &str) -> Result<(), BackendError>;
}

/// Calls consumed from the remote execution service.
#[async_trait::async_trait]
pub trait ExecutionBackend: ArtifactCleaner {
    /// Ask the backend to start a test run; `config` is sent as `{runType, config}`.
    async fn start_run(&self, config: &RunConfig) -> Result<(), BackendError>;

    /// Fetch the status of the current backend job, including the full log so far.
    async fn status(&self) -> Result<StatusResponse, BackendError>;

    /// Request cooperative cancellation of the current backend job.
    async fn stop(&self) -> Result<String, BackendError>;

    /// Ask the backend to install the given packages; progress is read from `status`.
    async fn start_install(&self, missing_packages: &[String]) -> Result<(), BackendError>;
}
