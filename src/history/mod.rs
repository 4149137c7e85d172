//! Run history -- one persisted record per finished test run.
//!
//! Records are written exactly once, when a run reaches a terminal state, and
//! are never changed afterwards. Their JSON layout
//! (`id, suite, status, duration, date, pass, fail, reportFile, logFile,
//! videoFile, rawLogs`) is shared with other tooling through export/import.

pub mod store;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendError;
use crate::execution::{JobReport, JobState};
use crate::logparse::{self, LogEntry};

pub use self::store::{HistoryStats, RemoveReport, RunHistoryStore};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("run history is unreadable: {0}")]
    Corrupt(String),

    #[error("failed to delete artifact {filename}: {source}")]
    ArtifactDeleteFailed {
        filename: String,
        #[source]
        source: BackendError,
    },
}

/// Terminal status of a recorded run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failed,
    Stopped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "Success",
            RunStatus::Failed => "Failed",
            RunStatus::Stopped => "Stopped",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Success" => Ok(RunStatus::Success),
            "Failed" => Ok(RunStatus::Failed),
            "Stopped" => Ok(RunStatus::Stopped),
            other => anyhow::bail!("unknown run status: {}", other),
        }
    }
}

impl From<JobState> for RunStatus {
    /// A record is only written for a terminal job; anything else counts as a failure.
    fn from(state: JobState) -> Self {
        match state {
            JobState::Success => RunStatus::Success,
            JobState::Stopped => RunStatus::Stopped,
            JobState::Idle | JobState::Running | JobState::Failed => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: String,
    pub suite: String,
    pub status: RunStatus,
    #[serde(rename = "duration", with = "duration_text")]
    pub duration_secs: f64,
    #[serde(rename = "date")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "pass")]
    pub pass_count: u32,
    #[serde(rename = "fail")]
    pub fail_count: u32,
    #[serde(default)]
    pub report_file: Option<String>,
    #[serde(default)]
    pub log_file: Option<String>,
    #[serde(default)]
    pub video_file: Option<String>,
    #[serde(default)]
    pub raw_logs: Vec<String>,
}

impl RunRecord {
    /// Build the history record for a finished run, with a fresh id.
    pub fn from_report(report: &JobReport) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            suite: report.label.clone(),
            status: RunStatus::from(report.state),
            duration_secs: report.duration_secs,
            started_at: report.started_at,
            pass_count: report.poll.pass_count,
            fail_count: report.poll.fail_count,
            report_file: report.poll.report_file.clone(),
            log_file: report.poll.log_file.clone(),
            video_file: report.poll.video_file.clone(),
            raw_logs: report.poll.logs.clone(),
        }
    }

    /// Filenames of every artifact the backend produced for this run.
    pub fn artifacts(&self) -> impl Iterator<Item = &str> {
        [&self.report_file, &self.log_file, &self.video_file]
            .into_iter()
            .filter_map(|f| f.as_deref())
    }

    /// Execution trace rebuilt from the stored log snapshot.
    pub fn tree(&self) -> Vec<LogEntry> {
        logparse::build(&self.raw_logs)
    }
}

/// `duration` is written as `"12.34s"`; bare numbers are accepted on read.
mod duration_text {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secs: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{:.2}s", secs))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Secs(f64),
            Text(String),
        }

        match Raw::deserialize(d)? {
            Raw::Secs(secs) => Ok(secs),
            Raw::Text(text) => text
                .trim()
                .trim_end_matches('s')
                .parse()
                .map_err(|_| de::Error::custom(format!("invalid duration: {:?}", text))),
        }
    }
}
