use std::sync::Arc;
use std::time::Duration;

use crate::backend::ExecutionBackend;
use crate::execution::{DependencyInstallLifecycle, InstallJob, RunLifecycle, TestRunJob};
use crate::history::RunHistoryStore;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub runs: RunLifecycle,
    pub installs: DependencyInstallLifecycle,
    pub history: RunHistoryStore,
}

impl AppState {
    /// Wire both lifecycles and the history store to one backend.
    pub fn new<B>(pool: Pool, backend: Arc<B>, poll_interval: Duration) -> Self
    where
        B: ExecutionBackend + 'static,
    {
        let history = RunHistoryStore::new(pool, backend.clone());
        let backend: Arc<dyn ExecutionBackend> = backend;
        Self {
            runs: RunLifecycle::new(
                backend.clone(),
                TestRunJob::new(history.clone()),
                poll_interval,
            ),
            installs: DependencyInstallLifecycle::new(backend, InstallJob, poll_interval),
            history,
        }
    }

    /// Stop watching any in-flight jobs and wait for them to be finalized.
    pub async fn shutdown(&self) {
        tokio::join!(self.runs.shutdown(), self.installs.shutdown());
    }
}
