//! Default values for scheduler configuration parameters
//!
//! This module centralizes all default value functions used by the
//! configuration structures. These functions are used by serde when
//! deserializing configuration files that don't specify certain optional
//! fields.

/// Default endpoint-choice strategy name (§6).
pub fn default_strategy() -> String {
    "round-robin".to_string()
}

/// Default runtime predictor name (§6).
pub fn default_runtime_predictor() -> String {
    "rolling-average".to_string()
}

/// Default rolling window size for the runtime predictor.
pub fn default_last_n() -> usize {
    20
}

/// Default retrain cadence for the runtime predictor (every sample).
pub fn default_train_every() -> usize {
    1
}

/// Default runtime estimate before any samples have landed (seconds).
pub fn default_initial_runtime_estimate() -> f64 {
    5.0
}

/// Default constant transfer-time estimate per file (seconds), used by the
/// built-in `ConstantTransferPredictor`.
pub fn default_transfer_seconds_per_file() -> f64 {
    2.0
}

/// Default constant import-time estimate per package (seconds), used by the
/// built-in `ConstantImportPredictor`.
pub fn default_import_seconds_per_package() -> f64 {
    1.0
}

/// Default maximum number of backup dispatches per virtual task (§6;
/// `0` disables backups).
pub fn default_max_backups() -> u32 {
    0
}

/// Default delay ratio that triggers a backup dispatch (§4.4, §6).
pub fn default_backup_delay_threshold() -> f64 {
    2.0
}

/// Default submission worker tick interval (§4.2).
pub fn default_submission_tick_ms() -> u64 {
    150
}

/// Default endpoint watchdog poll interval (§4.3).
pub fn default_watchdog_interval_seconds() -> u64 {
    5
}

/// Default liveness threshold: an endpoint with no heartbeat/result for
/// this long is marked dead (§4.3, §6 "Constants").
pub fn default_heartbeat_threshold_seconds() -> f64 {
    75.0
}

/// Default execution log ring-buffer capacity (§4.8).
pub fn default_execution_log_capacity() -> usize {
    10_000
}

/// Default HTTP timeout for calls to the executor service (§5).
pub fn default_executor_http_timeout_seconds() -> u64 {
    30
}

/// Default graceful shutdown wait for in-flight work (seconds).
pub fn default_graceful_shutdown_timeout_seconds() -> u64 {
    30
}

/// Default maximum accepted request body size for the client-facing API
/// (megabytes).
pub fn default_http_request_max_size_mb() -> usize {
    10
}

/// Default log level.
pub fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert_eq!(default_strategy(), "round-robin");
        assert_eq!(default_runtime_predictor(), "rolling-average");
        assert!(default_last_n() > 0);
        assert!(default_train_every() > 0);
        assert_eq!(default_max_backups(), 0);
        assert!(default_backup_delay_threshold() > 1.0);
        assert!(default_heartbeat_threshold_seconds() > 0.0);
        assert!(default_execution_log_capacity() > 0);
    }
}
