//! reqwest implementation of [`ExecutionBackend`].

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, Response, Url};
use tracing::debug;

use super::{
    ArtifactCleaner, BackendError, ExecutionBackend, MessageResponse, StartInstallRequest,
    StatusResponse,
};
use crate::execution::RunConfig;

const RUN_PATH: &str = "run";
const STATUS_PATH: &str = "status";
const STOP_PATH: &str = "stop";
const INSTALL_PATH: &str = "install-dependencies";
const DELETE_REPORT_PATH: &str = "delete-report";

/// HTTP/JSON client for the execution backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base: Url,
}

impl HttpBackend {
    /// Build a client for the backend rooted at `base_url` (e.g. `http://localhost:5001`).
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .with_context(|| format!("invalid execution backend URL '{}'", base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("execution backend URL '{}' cannot be used as a base", base_url);
        }
        // Url::join replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &str {
        self.base.as_str()
    }

    fn endpoint(&self, path: &str) -> Result<Url, BackendError> {
        self.base
            .join(path)
            .map_err(|e| BackendError::Malformed(format!("bad endpoint '{}': {}", path, e)))
    }

    fn artifact_endpoint(&self, filename: &str) -> Result<Url, BackendError> {
        let mut url = self.endpoint(DELETE_REPORT_PATH)?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Malformed("backend URL has no path".to_string()))?
            .push(filename);
        Ok(url)
    }

    fn unreachable(&self, err: reqwest::Error) -> BackendError {
        BackendError::Unreachable {
            url: self.base.to_string(),
            reason: err.to_string(),
        }
    }

    /// Turn non-2xx responses into [`BackendError::Rejected`], pulling the
    /// message from a `{message}`/`{error}` body when there is one.
    async fn check(&self, resp: Response) -> Result<Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<MessageResponse>(&body)
            .ok()
            .and_then(|m| m.text().map(str::to_string))
            .unwrap_or(body);
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl ArtifactCleaner for HttpBackend {
    async fn delete_artifact(&self, filename: &str) -> Result<(), BackendError> {
        let url = self.artifact_endpoint(filename)?;
        debug!(%url, "deleting artifact");
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(resp).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for HttpBackend {
    async fn start_run(&self, config: &RunConfig) -> Result<(), BackendError> {
        let url = self.endpoint(RUN_PATH)?;
        debug!(%url, run_type = config.run_type(), "sending start request");
        let resp = self
            .client
            .post(url)
            .json(config)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(resp).await?;
        Ok(())
    }

    async fn status(&self) -> Result<StatusResponse, BackendError> {
        let url = self.endpoint(STATUS_PATH)?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let resp = self.check(resp).await?;
        resp.json::<StatusResponse>()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))
    }

    async fn stop(&self) -> Result<String, BackendError> {
        let url = self.endpoint(STOP_PATH)?;
        let resp = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        let resp = self.check(resp).await?;
        let ack: MessageResponse = resp.json().await.unwrap_or_default();
        Ok(ack.text().unwrap_or("stop requested").to_string())
    }

    async fn start_install(&self, missing_packages: &[String]) -> Result<(), BackendError> {
        let url = self.endpoint(INSTALL_PATH)?;
        debug!(%url, packages = missing_packages.len(), "sending install request");
        let resp = self
            .client
            .post(url)
            .json(&StartInstallRequest { missing_packages })
            .send()
            .await
            .map_err(|e| self.unreachable(e))?;
        self.check(resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(url: &str) -> HttpBackend {
        HttpBackend::new(url, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoints_join_under_base() {
        let b = backend("http://localhost:5001");
        assert_eq!(b.endpoint(STATUS_PATH).unwrap().as_str(), "http://localhost:5001/status");

        let b = backend("http://exec.local/api/robot");
        assert_eq!(b.endpoint(RUN_PATH).unwrap().as_str(), "http://exec.local/api/robot/run");
    }

    #[test]
    fn test_artifact_filename_is_escaped() {
        let b = backend("http://localhost:5001/");
        let url = b.artifact_endpoint("report 1/../x.html").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5001/delete-report/report%201%2F..%2Fx.html"
        );
    }

    #[test]
    fn test_rejects_invalid_base() {
        assert!(HttpBackend::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpBackend::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_lost() {
        // Port 9 (discard) is closed on test machines; connect fails fast.
        let b = backend("http://127.0.0.1:9");
        let err = b.status().await.unwrap_err();
        assert!(err.is_connection_lost(), "{err}");
    }
}
