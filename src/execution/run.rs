//! Test runs: the primary job, recorded in run history when it finishes.

use tracing::info;

use super::config::RunConfig;
use super::lifecycle::{BackendJob, JobLifecycle, JobReport};
use crate::backend::{BackendError, ExecutionBackend};
use crate::history::{RunHistoryStore, RunRecord};

/// Lifecycle of Robot Framework runs on the execution backend.
pub type RunLifecycle = JobLifecycle<TestRunJob>;

pub struct TestRunJob {
    history: RunHistoryStore,
}

impl TestRunJob {
    pub fn new(history: RunHistoryStore) -> Self {
        Self { history }
    }

    pub fn history(&self) -> &RunHistoryStore {
        &self.history
    }
}

#[async_trait::async_trait]
impl BackendJob for TestRunJob {
    type Params = RunConfig;

    const KIND: &'static str = "test run";

    fn label(&self, config: &RunConfig) -> String {
        config.suite_label()
    }

    fn validate(&self, config: &RunConfig) -> Result<(), String> {
        config.validate()
    }

    async fn start(
        &self,
        backend: &dyn ExecutionBackend,
        config: &RunConfig,
    ) -> Result<(), BackendError> {
        backend.start_run(config).await
    }

    async fn finalize(&self, report: &JobReport) -> anyhow::Result<Option<String>> {
        let record = RunRecord::from_report(report);
        self.history.append(&record).await?;
        info!(id = %record.id, suite = %record.suite, status = ?record.status, "run recorded");
        Ok(Some(record.id))
    }
}
