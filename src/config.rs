use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
    #[serde(default)]
    pub execution: ExecutionSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "chainops-executor.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            enable_tracing: true,
            retry: RetrySettings::default(),
            dispatch: DispatchSettings::default(),
            execution: ExecutionSettings::default(),
        }
    }
}

/// Re-delivery delays per failure category, in milliseconds.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrySettings {
    pub source_address_locking_ms: u64,
    pub wait_for_transaction_ending_ms: u64,
    pub not_enough_balance_ms: u64,
    pub rebuilding_confirmation_check_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            source_address_locking_ms: 10_000,
            wait_for_transaction_ending_ms: 30_000,
            not_enough_balance_ms: 60_000,
            rebuilding_confirmation_check_ms: 60_000,
        }
    }
}

/// Worker pool and queue sizing for every bounded execution context.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Re-delivery delay after a handler infrastructure failure, in millis.
    pub failed_command_retry_delay_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 1024,
            failed_command_retry_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ExecutionSettings {
    /// Upper bound on the operation-level rebuild cycle. When reached, the
    /// next id generation is rejected and the operation fails terminally.
    pub max_transaction_attempts: u32,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_transaction_attempts: 5,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path,
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}
