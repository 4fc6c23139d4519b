use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::process::lease::LeasePolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Lease holder id of this connector instance; unique per instance
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; processes are kept in memory when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub transfer: ManagerConfig,
    #[serde(default)]
    pub negotiation: ManagerConfig,
}

fn default_instance_id() -> String {
    format!("connector-{}", ulid::Ulid::new())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8181,
        }
    }
}

/// Tuning for one process manager
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ManagerConfig {
    /// Processes fetched per actionable state per pass
    pub batch_size: usize,
    pub lease_ttl_ms: u64,
    /// Retryable failures tolerated in one step before ERROR
    pub max_retries: u32,
    /// Handlers running concurrently within one instance
    pub worker_pool_size: usize,
    /// A dispatched request without acknowledgement for this long is re-sent
    pub request_timeout_ms: u64,
    /// Base delay before retrying a failed step; doubles per retry
    pub retry_delay_ms: u64,
    pub inbound_lease_attempts: u32,
    pub inbound_lease_backoff_ms: u64,
    pub wait: WaitConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            lease_ttl_ms: 60_000,
            max_retries: 7,
            worker_pool_size: 4,
            request_timeout_ms: 300_000,
            retry_delay_ms: 1_000,
            inbound_lease_attempts: 5,
            inbound_lease_backoff_ms: 50,
            wait: WaitConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            ttl: self.lease_ttl(),
            attempts: self.inbound_lease_attempts,
            backoff: Duration::from_millis(self.inbound_lease_backoff_ms),
        }
    }

    pub fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(format!("{section}.batch_size must be > 0")));
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(format!(
                "{section}.worker_pool_size must be > 0"
            )));
        }
        if self.lease_ttl_ms < 3 {
            return Err(ConfigError::Invalid(format!(
                "{section}.lease_ttl_ms must be >= 3"
            )));
        }
        if self.wait.base_ms == 0 || self.wait.max_ms < self.wait.base_ms {
            return Err(ConfigError::Invalid(format!(
                "{section}.wait requires 0 < base_ms <= max_ms"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WaitConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub error_ms: u64,
    pub jitter_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            base_ms: 100,
            max_ms: 5_000,
            error_ms: 2_000,
            jitter_ms: 50,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        Self::from_file(&config_path)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_id.trim().is_empty() {
            return Err(ConfigError::Invalid("instance_id must not be empty".into()));
        }
        self.transfer.validate("transfer")?;
        self.negotiation.validate("negotiation")?;
        Ok(())
    }
}
