//! Configuration types for KEYLEDGER

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::KeyledgerError;
use crate::traits::KeyledgerResult;

/// Name of the record transaction family
pub const FAMILY_NAME: &str = "keyledger";

/// Version of the record transaction family
pub const FAMILY_VERSION: &str = "0.1";

/// Default REST endpoint of the state service
pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8008";

/// Read a JSON config file into `T`
pub fn load_json_config<T: DeserializeOwned>(path: &Path) -> KeyledgerResult<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        KeyledgerError::Config(format!("failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        KeyledgerError::Config(format!("failed to parse {}: {}", path.display(), e))
    })
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the state service REST API
    pub service_url: String,

    /// Private key file; `None` makes the client read-only
    pub key_file: Option<PathBuf>,

    /// HTTP Basic auth user
    pub auth_user: Option<String>,

    /// HTTP Basic auth password
    pub auth_password: Option<String>,

    /// Seconds to wait for a submitted batch to commit (0 = don't wait)
    pub wait_timeout: u64,

    /// Seconds a fetched state entry may be served from the read cache (0 = off)
    pub cache_ttl: u64,

    /// Per-request HTTP timeout in seconds
    pub request_timeout: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_url: DEFAULT_SERVICE_URL.to_string(),
            key_file: None,
            auth_user: None,
            auth_password: None,
            wait_timeout: 0,
            cache_ttl: 0,
            request_timeout: 30,
        }
    }
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> KeyledgerResult<Self> {
        load_json_config(path)
    }

    /// Normalized service URL: scheme added when missing, no trailing slash
    pub fn base_url(&self) -> KeyledgerResult<String> {
        let url = self.service_url.trim().trim_end_matches('/');
        if url.is_empty() {
            return Err(KeyledgerError::Config("service URL is empty".into()));
        }
        if url.starts_with("http://") || url.starts_with("https://") {
            Ok(url.to_string())
        } else if url.contains("://") {
            Err(KeyledgerError::Config(format!("unsupported URL scheme: {}", url)))
        } else {
            Ok(format!("http://{}", url))
        }
    }
}

/// Dev state service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// REST API listen address
    pub listen_addr: String,

    /// Data directory; state is kept in memory when unset
    pub data_dir: Option<PathBuf>,

    /// Require HTTP Basic auth with this user
    pub auth_user: Option<String>,

    /// Password for `auth_user`
    pub auth_password: Option<String>,

    /// Maximum number of batches waiting to be applied
    pub max_queue: usize,

    /// Upper bound for the `wait` parameter of status queries, in seconds
    pub max_status_wait: u64,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "keyledger-node".to_string(),
            listen_addr: "127.0.0.1:8008".to_string(),
            data_dir: None,
            auth_user: None,
            auth_password: None,
            max_queue: 1024,
            max_status_wait: 300,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: &Path) -> KeyledgerResult<Self> {
        load_json_config(path)
    }
}
