//! Configuration management for the scheduler
//!
//! This module handles loading, validation, and reload of the scheduler's
//! configuration from a `scheduler.toml` file.

use anyhow::{Context, Result};
use shared::config::SchedulerSettings;
use std::path::PathBuf;
use tracing::{debug, info};

const SCHEDULER_CONFIG_FILE: &str = "scheduler.toml";

/// Manages the scheduler's configuration: loading, validation, and reload.
pub struct ConfigManager {
    /// The full path to the configuration file.
    pub config_path: PathBuf,
    /// The loaded and validated configuration. `None` only before the first
    /// successful load; the constructor ensures it's `Some` on success.
    pub settings: Option<SchedulerSettings>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the
    /// configuration, so a successfully constructed manager is always in a
    /// valid, loaded state.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        // Accept either a path to a directory containing scheduler.toml, or
        // a direct path to the file itself.
        let config_path = if config_path.is_dir() {
            config_path.join(SCHEDULER_CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                config_path.display()
            ));
        }

        let mut manager = Self {
            config_path,
            settings: None,
        };

        manager.load_config()?;

        Ok(manager)
    }

    /// Loads the configuration file from disk, parses, and validates it.
    pub fn load_config(&mut self) -> Result<()> {
        info!(
            "Loading scheduler configuration from {}",
            self.config_path.display()
        );

        let config_content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;

        let settings = SchedulerSettings::validate_from_toml(&config_content).with_context(|| {
            format!(
                "Invalid scheduler configuration in {}",
                self.config_path.display()
            )
        })?;

        debug!("Scheduler configuration parameters (including defaults):");
        debug!("  listen_address: {}", settings.listen_address);
        debug!(
            "  api_key: {}",
            if settings.api_key.is_empty() { "<empty>" } else { "<redacted>" }
        );
        debug!("  executor_base_url: {}", settings.executor_base_url);
        debug!("  endpoints: {}", settings.endpoints.len());
        debug!("  strategy: {}", settings.strategy);
        debug!("  runtime_predictor: {}", settings.runtime_predictor);
        debug!("  max_backups: {}", settings.max_backups);
        debug!("  backup_delay_threshold: {}", settings.backup_delay_threshold);
        debug!("  submission_tick_ms: {}", settings.submission_tick_ms);
        debug!("  watchdog_interval_seconds: {}", settings.watchdog_interval_seconds);

        self.settings = Some(settings);

        let settings = self
            .settings
            .as_ref()
            .expect("scheduler configuration should be loaded after successful load_config()");

        info!(
            listen_address = %settings.listen_address,
            executor_base_url = %settings.executor_base_url,
            endpoint_count = settings.endpoints.len(),
            "Scheduler configuration loaded successfully"
        );

        Ok(())
    }

    /// Reloads the configuration from disk and reports whether it changed.
    pub fn reload_config(&mut self) -> Result<bool> {
        debug!("Reloading scheduler configuration");
        let old_settings = self.settings.clone();

        match self.load_config() {
            Ok(()) => {
                let current = self
                    .settings
                    .as_ref()
                    .expect("scheduler configuration should be loaded after successful load_config()");
                match old_settings {
                    Some(old) if &old == current => {
                        debug!("Scheduler configuration unchanged");
                        Ok(false)
                    }
                    Some(_) => {
                        info!("Scheduler configuration changed and reloaded");
                        Ok(true)
                    }
                    None => {
                        info!("Scheduler configuration loaded for first time");
                        Ok(true)
                    }
                }
            }
            Err(e) => {
                self.settings = old_settings;
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.settings.is_some()
    }

    /// Override configuration values from the command line and persist the
    /// result to disk. Returns `true` if any value changed.
    pub fn override_and_persist_config(
        &mut self,
        listen_address: Option<String>,
        api_key: Option<String>,
        executor_base_url: Option<String>,
        max_backups: Option<u32>,
    ) -> Result<bool> {
        let mut config_changed = false;

        if self.settings.is_none() {
            self.load_config()?;
        }

        let mut settings = self
            .settings
            .clone()
            .expect("scheduler configuration must be loaded");

        if let Some(addr) = listen_address {
            if settings.listen_address != addr {
                info!("Overriding listen_address: {} -> {}", settings.listen_address, addr);
                settings.listen_address = addr;
                config_changed = true;
            }
        }

        if let Some(key) = api_key {
            if settings.api_key != key {
                info!("Overriding api_key (value hidden for security)");
                settings.api_key = key;
                config_changed = true;
            }
        }

        if let Some(url) = executor_base_url {
            if settings.executor_base_url != url {
                info!(
                    "Overriding executor_base_url: {} -> {}",
                    settings.executor_base_url, url
                );
                settings.executor_base_url = url;
                config_changed = true;
            }
        }

        if let Some(max_backups) = max_backups {
            if settings.max_backups != max_backups {
                info!(
                    "Overriding max_backups: {} -> {}",
                    settings.max_backups, max_backups
                );
                settings.max_backups = max_backups;
                config_changed = true;
            }
        }

        if config_changed {
            settings
                .validate()
                .context("Invalid configuration after applying command-line overrides")?;

            let scheduler_toml = toml::to_string_pretty(&settings)
                .context("Failed to serialize scheduler configuration")?;

            std::fs::write(&self.config_path, scheduler_toml)
                .with_context(|| format!("Failed to write {}", self.config_path.display()))?;

            self.settings = Some(settings);

            info!("Scheduler configuration updated and persisted to disk");
        }

        Ok(config_changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_minimal_config(file: &mut NamedTempFile) {
        writeln!(
            file,
            r#"
listen_address = "127.0.0.1:8787"
api_key = "test-api-key"
executor_base_url = "https://executor.example.com"

[endpoints.a]
"#
        )
        .unwrap();
    }

    #[test]
    fn test_config_manager_loads_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write_minimal_config(&mut temp_file);

        let manager = ConfigManager::new(temp_file.path().to_path_buf()).unwrap();
        assert!(manager.is_loaded());
        assert_eq!(
            manager.settings.as_ref().unwrap().listen_address,
            "127.0.0.1:8787"
        );
    }

    #[test]
    fn test_config_manager_rejects_missing_file() {
        let result = ConfigManager::new(PathBuf::from("/nonexistent/scheduler.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_override_and_persist_changes_listen_address() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write_minimal_config(&mut temp_file);

        let mut manager = ConfigManager::new(temp_file.path().to_path_buf()).unwrap();
        let changed = manager
            .override_and_persist_config(Some("0.0.0.0:9090".to_string()), None, None, None)
            .unwrap();
        assert!(changed);
        assert_eq!(manager.settings.as_ref().unwrap().listen_address, "0.0.0.0:9090");

        // Persisted to disk: reloading from the same path reflects the override.
        manager.load_config().unwrap();
        assert_eq!(manager.settings.as_ref().unwrap().listen_address, "0.0.0.0:9090");
    }

    #[test]
    fn test_override_with_no_changes_reports_false() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write_minimal_config(&mut temp_file);

        let mut manager = ConfigManager::new(temp_file.path().to_path_buf()).unwrap();
        let changed = manager
            .override_and_persist_config(Some("127.0.0.1:8787".to_string()), None, None, None)
            .unwrap();
        assert!(!changed);
    }
}
