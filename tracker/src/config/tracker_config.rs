use crate::error::{Result, TrackerError};
use common::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Root directory for everything the tracker persists
    pub storage_path: String,

    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log directory for file-based logging; stdout when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    #[serde(default = "default_log_file")]
    pub log_file: String,

    /// Number of Tokio runtime worker threads (defaults to CPU cores)
    #[serde(default)]
    pub runtime_threads: Option<usize>,

    #[serde(default)]
    pub bandwidth: BandwidthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthConfig {
    #[serde(default = "default_collection_interval_secs")]
    pub collection_interval_secs: u64,

    /// Sub-directory of `storage_path` holding the accumulator document
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,

    #[serde(default = "default_openvpn_status_path")]
    pub openvpn_status_path: String,

    #[serde(default = "default_ipsec_container")]
    pub ipsec_container: String,

    #[serde(default = "default_docker_socket")]
    pub docker_socket: String,

    #[serde(default = "default_docker_timeout_secs")]
    pub docker_timeout_secs: u64,

    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    #[serde(default = "default_lock_retry_backoff_ms")]
    pub lock_retry_backoff_ms: u64,
}

fn default_api_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "tracker.log".to_string()
}

fn default_collection_interval_secs() -> u64 {
    60
}

fn default_storage_dir() -> String {
    "bandwidth".to_string()
}

fn default_openvpn_status_path() -> String {
    "/var/log/openvpn/status.log".to_string()
}

fn default_ipsec_container() -> String {
    "ipsec-mobify-server".to_string()
}

fn default_docker_socket() -> String {
    "/var/run/docker.sock".to_string()
}

fn default_docker_timeout_secs() -> u64 {
    5
}

fn default_lock_retry_attempts() -> u32 {
    3
}

fn default_lock_retry_backoff_ms() -> u64 {
    100
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: default_collection_interval_secs(),
            storage_dir: default_storage_dir(),
            openvpn_status_path: default_openvpn_status_path(),
            ipsec_container: default_ipsec_container(),
            docker_socket: default_docker_socket(),
            docker_timeout_secs: default_docker_timeout_secs(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_backoff_ms: default_lock_retry_backoff_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: TrackerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage_path.trim().is_empty() {
            return Err(TrackerError::Configuration(
                "storage_path must not be empty".to_string(),
            ));
        }
        if self.bandwidth.collection_interval_secs == 0 {
            return Err(TrackerError::Configuration(
                "bandwidth.collection_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.bandwidth.lock_retry_attempts == 0 {
            return Err(TrackerError::Configuration(
                "bandwidth.lock_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.bandwidth.ipsec_container.trim().is_empty() {
            return Err(TrackerError::Configuration(
                "bandwidth.ipsec_container must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding `accumulator.json`.
    pub fn bandwidth_storage_dir(&self) -> PathBuf {
        Path::new(&self.storage_path).join(&self.bandwidth.storage_dir)
    }
}

impl BandwidthConfig {
    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn docker_timeout(&self) -> Duration {
        Duration::from_secs(self.docker_timeout_secs)
    }

    pub fn lock_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.lock_retry_attempts,
            Duration::from_millis(self.lock_retry_backoff_ms),
        )
    }
}
