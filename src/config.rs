//! TOML configuration for robotmaestro.
//!
//! Every section has defaults, so an empty (or missing) file is a valid
//! configuration. The file is looked up in order: an explicit `--config`
//! path, the `ROBOTMAESTRO_CONFIG` environment variable, `./robotmaestro.toml`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const CONFIG_ENV: &str = "ROBOTMAESTRO_CONFIG";
pub const BACKEND_URL_ENV: &str = "EXECUTION_BACKEND_URL";
const LOCAL_CONFIG: &str = "robotmaestro.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Resolve the configuration for this process.
    ///
    /// An explicit path must load. The environment and working-directory
    /// candidates fall back to defaults with a warning when unreadable.
    /// `EXECUTION_BACKEND_URL` overrides the backend URL in every case.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => Self::discover(),
        };
        config.apply_overrides(std::env::var(BACKEND_URL_ENV).ok());
        Ok(config)
    }

    fn discover() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "ROBOTMAESTRO_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    fn apply_overrides(&mut self, backend_url: Option<String>) {
        if let Some(url) = backend_url.filter(|u| !u.trim().is_empty()) {
            debug!(%url, "backend url overridden from environment");
            self.backend.url = url;
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Where the execution backend lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    /// Per-request timeout; a status poll that exceeds it counts as a lost connection.
    pub request_timeout_secs: u64,
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:5001".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub interval_ms: u64,
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval_ms: 2000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding run history.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "data/robotmaestro.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9002".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level, used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.backend.url, "http://localhost:5001");
        assert_eq!(cfg.backend.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.poller.interval(), Duration::from_secs(2));
        assert_eq!(cfg.storage.db_path, "data/robotmaestro.db");
        assert_eq!(cfg.server.bind, "0.0.0.0:9002");
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[backend]
url = "http://runner.lab:5001"
request_timeout_secs = 5

[poller]
interval_ms = 500

[storage]
db_path = "/var/lib/robotmaestro/history.db"

[server]
bind = "127.0.0.1:9100"

[logging]
level = "debug"
json = true
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.backend.url, "http://runner.lab:5001");
        assert_eq!(cfg.backend.request_timeout_secs, 5);
        assert_eq!(cfg.poller.interval(), Duration::from_millis(500));
        assert_eq!(cfg.storage.db_path, "/var/lib/robotmaestro/history.db");
        assert_eq!(cfg.server.bind, "127.0.0.1:9100");
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.logging.json);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("[poller]\ninterval_ms = 250\n").unwrap();
        assert_eq!(cfg.poller.interval_ms, 250);
        assert_eq!(cfg.backend.url, "http://localhost:5001");
        assert_eq!(cfg.server.bind, "0.0.0.0:9002");
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let cfg: AppConfig = toml::from_str("[poller]\ninterval_ms = 0\n").unwrap();
        assert_eq!(cfg.poller.interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_backend_url_override() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(Some("  ".to_string()));
        assert_eq!(cfg.backend.url, "http://localhost:5001");
        cfg.apply_overrides(Some("http://10.0.0.7:5001".to_string()));
        assert_eq!(cfg.backend.url, "http://10.0.0.7:5001");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("robotmaestro.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:1\"\n").unwrap();
        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.server.bind, "127.0.0.1:1");

        std::fs::write(&path, "[server\n").unwrap();
        assert!(AppConfig::load(&path).is_err());
        assert!(AppConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
