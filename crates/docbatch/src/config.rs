//! Service configuration, loaded from a JSON file with serde defaults
//! so an empty `{}` is a valid config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root directory for the database and blob storage.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Transient extraction errors retried per file before it fails.
    #[serde(default = "default_max_retries")]
    pub max_extraction_retries: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Files stuck in `processing` longer than this are released back
    /// to `pending` by the reaper.
    #[serde(default = "default_claim_timeout_secs")]
    pub claim_timeout_secs: i64,

    #[serde(default = "default_token_ttl_hours")]
    pub download_token_ttl_hours: i64,

    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_claim_timeout_secs() -> i64 {
    600
}

fn default_token_ttl_hours() -> i64 {
    24
}

fn default_reaper_interval_secs() -> u64 {
    60
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            worker_count: default_worker_count(),
            max_extraction_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            claim_timeout_secs: default_claim_timeout_secs(),
            download_token_ttl_hours: default_token_ttl_hours(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

impl ServiceConfig {
    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.claim_timeout_secs)
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.download_token_ttl_hours)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ServiceConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &ServiceConfig) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(ConfigError::Validation(
            "worker_count must be at least 1".to_string(),
        ));
    }
    if config.claim_timeout_secs <= 0 {
        return Err(ConfigError::Validation(
            "claim_timeout_secs must be positive".to_string(),
        ));
    }
    if config.download_token_ttl_hours <= 0 {
        return Err(ConfigError::Validation(
            "download_token_ttl_hours must be positive".to_string(),
        ));
    }
    Ok(())
}
