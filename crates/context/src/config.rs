//! Worker configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Process environment entries cleared once the proxy is copied into variables.
pub const PROXY_ENV_URL: &str = "VSTS_HTTP_PROXY";
/// See [`PROXY_ENV_URL`].
pub const PROXY_ENV_USERNAME: &str = "VSTS_HTTP_PROXY_USERNAME";
/// See [`PROXY_ENV_URL`].
pub const PROXY_ENV_PASSWORD: &str = "VSTS_HTTP_PROXY_PASSWORD";

/// Worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Identity written to every timeline record
    pub worker_name: String,

    /// Directory for per-node log files
    pub log_directory: PathBuf,

    /// Outbound proxy, if any
    pub proxy: Option<ProxyConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_name: "worker".to_string(),
            log_directory: PathBuf::from("_diag").join("pages"),
            proxy: None,
        }
    }
}

impl WorkerConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Set the worker name.
    pub fn with_worker_name(mut self, worker_name: impl Into<String>) -> Self {
        self.worker_name = worker_name.into();
        self
    }

    /// Set the proxy.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// Outbound proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Proxy URL
    pub url: String,

    /// Proxy username
    pub username: Option<String>,

    /// Proxy password
    pub password: Option<String>,
}
