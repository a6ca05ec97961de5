//! Backend configuration, persisted per user with [`confy`].

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, BackendResult};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5001";
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;
pub const DEFAULT_CATALOG_PATH: &str = "models/llm.json";
pub const DEFAULT_MODELS_DIR: &str = "models";
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Builder)]
#[builder(on(String, into), on(PathBuf, into))]
#[serde(default)]
pub struct BackendConfig {
    /// Server root; requests go to `{base_url}/v1/completions`.
    #[builder(default = String::from(DEFAULT_BASE_URL))]
    pub base_url: String,
    /// Bound on a whole blocking request. For a stream, bound on connect,
    /// on the response head and on every silent gap in the body.
    #[builder(default = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Bound on a streamed body as a whole, however steadily it flows.
    /// Unbounded when absent.
    pub stream_timeout_secs: Option<u64>,
    #[builder(default = PathBuf::from(DEFAULT_CATALOG_PATH))]
    pub catalog_path: PathBuf,
    #[builder(default = PathBuf::from(DEFAULT_MODELS_DIR))]
    pub models_dir: PathBuf,
    #[builder(default = DEFAULT_GRACE_PERIOD_SECS)]
    pub grace_period_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stream_timeout(&self) -> Option<Duration> {
        self.stream_timeout_secs.map(Duration::from_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    /// Loads the per-user config for `app`, creating it with defaults on
    /// first use.
    pub fn load(app: &str) -> BackendResult<Self> {
        confy::load(app, None).map_err(|e| confy_error("load configuration", app, e))
    }

    pub fn store(&self, app: &str) -> BackendResult<()> {
        confy::store(app, None, self).map_err(|e| confy_error("store configuration", app, e))
    }

    pub fn load_path(path: &Path) -> BackendResult<Self> {
        confy::load_path(path).map_err(|e| confy_error("load configuration", path, e))
    }

    pub fn store_path(&self, path: &Path) -> BackendResult<()> {
        confy::store_path(path, self).map_err(|e| confy_error("store configuration", path, e))
    }
}

fn confy_error(
    operation: &'static str,
    path: impl Into<PathBuf>,
    e: confy::ConfyError,
) -> BackendError {
    BackendError::file_system(operation, path, std::io::Error::other(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.base_url, "http://127.0.0.1:5001");
        assert_eq!(cfg.timeout(), Duration::from_secs(180));
        assert_eq!(cfg.stream_timeout(), None);
        assert_eq!(cfg.catalog_path, PathBuf::from("models/llm.json"));
        assert_eq!(cfg.models_dir, PathBuf::from("models"));
        assert_eq!(cfg.grace_period(), Duration::from_secs(5));
    }

    #[test]
    fn store_then_load_path() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("backend.toml");
        let cfg = BackendConfig::builder()
            .base_url("http://10.0.0.2:8080")
            .timeout_secs(30)
            .stream_timeout_secs(600)
            .build();
        cfg.store_path(&path).unwrap();
        assert_eq!(BackendConfig::load_path(&path).unwrap(), cfg);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("backend.toml");
        std::fs::write(&path, "timeout_secs = 7\n").unwrap();
        let cfg = BackendConfig::load_path(&path).unwrap();
        assert_eq!(cfg.timeout_secs, 7);
        assert_eq!(cfg.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn unreadable_file_is_file_system_error() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("backend.toml");
        std::fs::write(&path, "timeout_secs = \"soon\"\n").unwrap();
        assert!(matches!(
            BackendConfig::load_path(&path).unwrap_err(),
            BackendError::FileSystem { .. }
        ));
    }
}
