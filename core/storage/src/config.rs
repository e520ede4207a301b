//! Adapter configuration.
//!
//! Backend selection comes from the URI scheme alone; this only carries the
//! operational settings each backend needs to be constructed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use uniblob_common::{Error, Result};

/// Environment variable holding the disk base directory.
pub const ENV_DISK_BASE_DIR: &str = "UNIBLOB_DISK_BASE_DIR";
/// Environment variable overriding the GCS endpoint.
pub const ENV_GCS_ENDPOINT: &str = "UNIBLOB_GCS_ENDPOINT";
/// Environment variable holding a pre-issued GCS bearer token.
pub const ENV_GCS_TOKEN: &str = "UNIBLOB_GCS_TOKEN";
/// Environment variable for the GCS connect timeout, in seconds.
pub const ENV_GCS_CONNECT_TIMEOUT: &str = "UNIBLOB_GCS_CONNECT_TIMEOUT_SECS";
/// Environment variable for the GCS read timeout, in seconds.
pub const ENV_GCS_READ_TIMEOUT: &str = "UNIBLOB_GCS_READ_TIMEOUT_SECS";

/// Public Google Cloud Storage endpoint.
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Settings for every adapter the registry can build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Disk adapter settings.
    #[serde(default)]
    pub disk: DiskConfig,
    /// GCS adapter settings.
    #[serde(default)]
    pub gcs: GcsConfig,
}

impl StorageConfig {
    /// Build configuration from `UNIBLOB_*` environment variables.
    ///
    /// # Errors
    /// - A timeout variable is not a whole number of seconds
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_var(ENV_DISK_BASE_DIR) {
            config.disk.base_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = env_var(ENV_GCS_ENDPOINT) {
            config.gcs.endpoint = endpoint;
        }
        config.gcs.token = env_var(ENV_GCS_TOKEN);
        if let Some(secs) = env_secs(ENV_GCS_CONNECT_TIMEOUT)? {
            config.gcs.connect_timeout_secs = secs;
        }
        if let Some(secs) = env_secs(ENV_GCS_READ_TIMEOUT)? {
            config.gcs.read_timeout_secs = secs;
        }

        Ok(config)
    }

    /// Parse configuration from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("Invalid storage config: {}", e)))
    }
}

/// Disk adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Directory holding one subdirectory per bucket.
    pub base_dir: PathBuf,
}

impl Default for DiskConfig {
    fn default() -> Self {
        let base_dir = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("uniblob");
        Self { base_dir }
    }
}

/// GCS adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcsConfig {
    /// API endpoint; point at an emulator for local work.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token sent with every request, when set.
    #[serde(default)]
    pub token: Option<String>,
    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Per-read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl GcsConfig {
    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_GCS_ENDPOINT.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    60
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_secs(name: &str) -> Result<Option<u64>> {
    env_var(name)
        .map(|v| {
            v.parse::<u64>()
                .map_err(|e| Error::InvalidInput(format!("{} must be seconds: {}", name, e)))
        })
        .transpose()
}
