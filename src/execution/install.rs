//! Dependency installation, tracked with the same start/poll/finalize driver
//! as test runs. Installs are not recorded in run history.

use tracing::{info, warn};

use super::lifecycle::{BackendJob, JobLifecycle, JobReport};
use super::JobState;
use crate::backend::{BackendError, ExecutionBackend};

/// Lifecycle of package installs on the execution backend.
pub type DependencyInstallLifecycle = JobLifecycle<InstallJob>;

#[derive(Debug, Default)]
pub struct InstallJob;

#[async_trait::async_trait]
impl BackendJob for InstallJob {
    type Params = Vec<String>;

    const KIND: &'static str = "dependency install";

    fn label(&self, packages: &Vec<String>) -> String {
        match packages.len() {
            1 => format!("Install {}", packages[0]),
            n => format!("Install {} packages", n),
        }
    }

    fn validate(&self, packages: &Vec<String>) -> Result<(), String> {
        if packages.is_empty() {
            return Err("no packages to install".to_string());
        }
        if packages.iter().any(|p| p.trim().is_empty()) {
            return Err("package names must not be blank".to_string());
        }
        Ok(())
    }

    async fn start(
        &self,
        backend: &dyn ExecutionBackend,
        packages: &Vec<String>,
    ) -> Result<(), BackendError> {
        backend.start_install(packages).await
    }

    async fn finalize(&self, report: &JobReport) -> anyhow::Result<Option<String>> {
        match report.state {
            JobState::Success => info!(label = %report.label, "dependencies installed"),
            state => warn!(
                label = %report.label,
                ?state,
                error = report.error.as_deref().unwrap_or(""),
                "dependency install did not complete"
            ),
        }
        Ok(None)
    }
}

/// Package names required by a `requirements.txt` body.
///
/// Comments, blank lines and pip options are skipped; version specifiers,
/// extras and environment markers are stripped.
pub fn parse_requirements(text: &str) -> Vec<String> {
    const SPECIFIERS: [&str; 8] = ["===", "==", ">=", "<=", "~=", "!=", ">", "<"];

    let mut packages: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        let line = line.split(';').next().unwrap_or("");
        let end = SPECIFIERS
            .iter()
            .filter_map(|s| line.find(*s))
            .chain(line.find('['))
            .min()
            .unwrap_or(line.len());
        let name = line[..end].trim();
        if !name.is_empty() && !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    }
    packages
}
