//! Configuration types and validation for the scheduler
//!
//! This module defines the configuration structure loaded from the
//! scheduler's TOML file, including validation logic and serialization
//! support.

use std::collections::HashMap;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::defaults::*;
use crate::utils::{validate_endpoint_id, validate_http_base_url};
use crate::SchedulerError;

/// One entry of the required `endpoints` map (§6, "Configuration options").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Seconds to go from a cold process to ready-to-run; absent means the
    /// endpoint never needs a cold-launch allowance.
    #[serde(default)]
    pub launch_time_seconds: Option<f64>,
    /// Opaque configuration forwarded to the strategy/predictors.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// Main scheduler configuration, loaded from `scheduler.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettings {
    /// Address and port to bind the client-facing API server to.
    pub listen_address: String,
    /// Pre-shared secret key for `X-API-Key` authentication.
    pub api_key: String,
    /// Base URL of the downstream execution service.
    pub executor_base_url: String,
    /// Required map of endpoint id to its descriptor; must be non-empty.
    pub endpoints: HashMap<String, EndpointConfig>,

    /// Endpoint-choice strategy name (default: `round-robin`).
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Runtime predictor name (default: `rolling-average`).
    #[serde(default = "default_runtime_predictor")]
    pub runtime_predictor: String,
    /// Rolling window size for the runtime predictor.
    #[serde(default = "default_last_n")]
    pub last_n: usize,
    /// Retrain cadence for the runtime predictor (samples between retrains).
    #[serde(default = "default_train_every")]
    pub train_every: usize,
    /// Runtime estimate used before any samples have landed, in seconds.
    #[serde(default = "default_initial_runtime_estimate")]
    pub initial_runtime_estimate_seconds: f64,
    /// Optional warm-start state path for the import-time predictor.
    #[serde(default)]
    pub import_model_file: Option<String>,
    /// Optional warm-start state path for the transfer-time predictor.
    #[serde(default)]
    pub transfer_model_file: Option<String>,
    /// Constant per-file transfer-time estimate, in seconds (used by the
    /// built-in transfer predictor absent a warm-started model).
    #[serde(default = "default_transfer_seconds_per_file")]
    pub transfer_seconds_per_file: f64,
    /// Constant per-package import-time estimate, in seconds (used by the
    /// built-in import predictor absent a warm-started model).
    #[serde(default = "default_import_seconds_per_package")]
    pub import_seconds_per_package: f64,
    /// Forwarded to the transfer coordinator; the coordinator interprets it
    /// (e.g. checksum verification strictness).
    #[serde(default)]
    pub sync_level: Option<String>,

    /// Maximum number of backup dispatches per virtual task (0 disables
    /// backups).
    #[serde(default = "default_max_backups")]
    pub max_backups: u32,
    /// Elapsed/expected ratio that triggers a delayed backup (§4.4).
    #[serde(default = "default_backup_delay_threshold")]
    pub backup_delay_threshold: f64,

    /// Submission worker tick interval, in milliseconds (§4.2).
    #[serde(default = "default_submission_tick_ms")]
    pub submission_tick_ms: u64,
    /// Endpoint watchdog poll interval, in seconds (§4.3).
    #[serde(default = "default_watchdog_interval_seconds")]
    pub watchdog_interval_seconds: u64,
    /// Liveness threshold, in seconds (§4.3).
    #[serde(default = "default_heartbeat_threshold_seconds")]
    pub heartbeat_threshold_seconds: f64,

    /// Execution log ring-buffer capacity (§4.8).
    #[serde(default = "default_execution_log_capacity")]
    pub execution_log_capacity: usize,

    /// HTTP client timeout for calls to the executor service, in seconds.
    #[serde(default = "default_executor_http_timeout_seconds")]
    pub executor_http_timeout_seconds: u64,
    /// Wait time for in-flight work during shutdown, in seconds.
    #[serde(default = "default_graceful_shutdown_timeout_seconds")]
    pub graceful_shutdown_timeout_seconds: u64,
    /// Maximum accepted request body size for the client-facing API, in
    /// megabytes.
    #[serde(default = "default_http_request_max_size_mb")]
    pub http_request_max_size_mb: usize,

    /// Log level passed to the tracing subscriber.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl SchedulerSettings {
    /// Parses and validates a `scheduler.toml` document.
    pub fn validate_from_toml(toml_content: &str) -> crate::Result<SchedulerSettings> {
        let settings: SchedulerSettings = toml::from_str(toml_content)
            .map_err(|e| SchedulerError::Config(format!("failed to parse config: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate the scheduler configuration: one explicit, descriptive
    /// check per field rather than leaning on serde alone.
    pub fn validate(&self) -> crate::Result<()> {
        if self.listen_address.is_empty() {
            return Err(
                SchedulerError::Validation("listen_address cannot be empty".to_string()).into(),
            );
        }
        if self.listen_address.parse::<SocketAddr>().is_err() {
            return Err(SchedulerError::Validation(format!(
                "invalid listen_address: {}",
                self.listen_address
            ))
            .into());
        }

        if self.api_key.is_empty() {
            return Err(SchedulerError::Validation("api_key cannot be empty".to_string()).into());
        }

        validate_http_base_url(&self.executor_base_url)?;

        if self.endpoints.is_empty() {
            return Err(SchedulerError::Validation(
                "endpoints map cannot be empty; the scheduler has nothing to dispatch to"
                    .to_string(),
            )
            .into());
        }
        for endpoint_id in self.endpoints.keys() {
            validate_endpoint_id(endpoint_id)?;
        }

        if self.last_n == 0 {
            return Err(
                SchedulerError::Validation("last_n must be greater than 0".to_string()).into(),
            );
        }
        if self.train_every == 0 {
            return Err(
                SchedulerError::Validation("train_every must be greater than 0".to_string())
                    .into(),
            );
        }
        if self.initial_runtime_estimate_seconds <= 0.0 {
            return Err(SchedulerError::Validation(
                "initial_runtime_estimate_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.max_backups > 10 {
            return Err(SchedulerError::Validation(
                "max_backups must not exceed 10 (runaway speculative dispatch)".to_string(),
            )
            .into());
        }
        if self.backup_delay_threshold <= 1.0 {
            return Err(SchedulerError::Validation(
                "backup_delay_threshold must be greater than 1.0".to_string(),
            )
            .into());
        }

        if self.submission_tick_ms == 0 {
            return Err(SchedulerError::Validation(
                "submission_tick_ms must be greater than 0".to_string(),
            )
            .into());
        }
        if self.watchdog_interval_seconds == 0 {
            return Err(SchedulerError::Validation(
                "watchdog_interval_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        if self.heartbeat_threshold_seconds <= 0.0 {
            return Err(SchedulerError::Validation(
                "heartbeat_threshold_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.execution_log_capacity == 0 {
            return Err(SchedulerError::Validation(
                "execution_log_capacity must be greater than 0".to_string(),
            )
            .into());
        }

        if self.executor_http_timeout_seconds == 0 {
            return Err(SchedulerError::Validation(
                "executor_http_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }
        if self.http_request_max_size_mb == 0 {
            return Err(SchedulerError::Validation(
                "http_request_max_size_mb must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_valid_toml() -> String {
        r#"
            listen_address = "127.0.0.1:8080"
            api_key = "test-key"
            executor_base_url = "https://executor.example.com"

            [endpoints.a]
        "#
        .to_string()
    }

    #[test]
    fn test_validate_minimal_config_succeeds() {
        let settings = SchedulerSettings::validate_from_toml(&minimal_valid_toml()).unwrap();
        assert_eq!(settings.strategy, "round-robin");
        assert_eq!(settings.max_backups, 0);
        assert_eq!(settings.endpoints.len(), 1);
    }

    #[test]
    fn test_validate_rejects_empty_endpoints() {
        let toml = r#"
            listen_address = "127.0.0.1:8080"
            api_key = "test-key"
            executor_base_url = "https://executor.example.com"
            endpoints = {}
        "#;
        assert!(SchedulerSettings::validate_from_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_listen_address() {
        let toml = r#"
            listen_address = "not-an-address"
            api_key = "test-key"
            executor_base_url = "https://executor.example.com"

            [endpoints.a]
        "#;
        assert!(SchedulerSettings::validate_from_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_non_https_executor_url() {
        let toml = r#"
            listen_address = "127.0.0.1:8080"
            api_key = "test-key"
            executor_base_url = "ftp://executor.example.com"

            [endpoints.a]
        "#;
        assert!(SchedulerSettings::validate_from_toml(toml).is_err());
    }

    #[test]
    fn test_validate_rejects_backup_delay_threshold_too_low() {
        let mut toml = minimal_valid_toml();
        toml.push_str("backup_delay_threshold = 0.5\n");
        assert!(SchedulerSettings::validate_from_toml(&toml).is_err());
    }

    #[test]
    fn test_endpoint_config_defaults_to_empty() {
        let toml = minimal_valid_toml();
        let settings = SchedulerSettings::validate_from_toml(&toml).unwrap();
        let endpoint = &settings.endpoints["a"];
        assert!(endpoint.launch_time_seconds.is_none());
        assert!(endpoint.config.is_empty());
    }
}
