//! Central Task Scheduler
//!
//! The scheduler accepts opaque user functions from clients, chooses a
//! remote execution endpoint for each, hands the dispatch off to a
//! submission worker, and tracks status until a terminal result or
//! exception arrives. See `api`, `pipeline`, `submission_worker`, and
//! `watchdog` for the individual pieces.
// This is the main entry point for the scheduler application. It's
// responsible for:
// - Initializing logging and configuration.
// - Wiring together the scheduler core and its background workers.
// - Starting the web server and API endpoints.
// - Handling graceful shutdown.

// Use jemalloc as the global allocator for better performance
#[cfg(not(target_os = "windows"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// The scheduler is organized into modules for the API, configuration,
// scheduling pipeline, background workers, and the executor HTTP client.
mod api;
mod config;
mod executor_client;
mod pipeline;
mod state;
mod submission_worker;
mod watchdog;

use config::ConfigManager;
use executor_client::HttpExecutorClient;
use shared::config::SchedulerSettings;
use shared::model::EndpointDescriptor;
use shared::predictors::{
    build_runtime_predictor, build_strategy, ConstantImportPredictor, ConstantTransferPredictor,
    NoopTransferCoordinator,
};
use shared::serializer::JsonPayloadSerializer;
use shared::{Clock, SystemClock};
use state::SchedulerCore;
use submission_worker::SubmissionWorker;
use watchdog::EndpointWatchdog;

/// Command-line arguments for the scheduler.
#[derive(Parser, Debug)]
#[command(name = "scheduler")]
#[command(about = "Central scheduler that dispatches functions across remote execution endpoints", long_about = None)]
struct CliArgs {
    /// Path to the scheduler configuration file (scheduler.toml)
    #[arg(value_name = "CONFIG_FILE")]
    config_file: PathBuf,

    /// Override the listen address from config file
    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    /// Override the API key from config file
    #[arg(long = "api-key", value_name = "KEY")]
    api_key: Option<String>,

    /// Override the executor base URL from config file
    #[arg(long = "executor-base-url", value_name = "URL")]
    executor_base_url: Option<String>,

    /// Override the max backups setting from config file
    #[arg(long = "max-backups", value_name = "COUNT")]
    max_backups: Option<u32>,
}

/// The main application structure for the scheduler. Holds the
/// configuration manager and the handles needed for graceful shutdown.
pub struct Server {
    /// The configuration manager, responsible for loading and accessing
    /// scheduler settings. Wrapped in `Arc<Mutex<>>` to allow sharing
    /// between the server and API handlers.
    pub config_manager: Arc<Mutex<ConfigManager>>,
    listen_address: SocketAddr,
    /// Handle to the submission worker task, for graceful shutdown.
    submission_task_handle: Option<JoinHandle<()>>,
    /// Handle to the endpoint watchdog task, for graceful shutdown.
    watchdog_task_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Server {
    /// Creates a new server instance. Initializes the configuration
    /// manager and parses the listen address. Returns a `Result` because
    /// these initial steps can fail (e.g. invalid configuration file,
    /// invalid address format).
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_manager = ConfigManager::new(config_path)?;
        let settings = config_manager
            .settings
            .as_ref()
            .expect("scheduler configuration not loaded. This should not happen as config is loaded in new().");

        let listen_address: SocketAddr = settings.listen_address.parse().map_err(|e| {
            anyhow::anyhow!("Invalid listen address '{}': {}", settings.listen_address, e)
        })?;

        Ok(Self {
            config_manager: Arc::new(Mutex::new(config_manager)),
            listen_address,
            submission_task_handle: None,
            watchdog_task_handle: None,
            shutdown_tx: None,
        })
    }

    /// Builds the scheduler core from validated settings: the endpoint
    /// registry, the pluggable strategy/predictor/coordinator ports, and
    /// the executor HTTP client.
    fn build_core(
        settings: &SchedulerSettings,
    ) -> Result<(SchedulerCore, tokio::sync::mpsc::UnboundedReceiver<shared::model::ScheduledRecord>)> {
        let endpoint_ids: Vec<shared::ids::EndpointId> = settings
            .endpoints
            .keys()
            .map(|id| shared::ids::EndpointId::new(id.clone()))
            .collect();

        let mut endpoint_map = HashMap::new();
        for (id, cfg) in &settings.endpoints {
            let endpoint_id = shared::ids::EndpointId::new(id.clone());
            endpoint_map.insert(
                endpoint_id.clone(),
                EndpointDescriptor {
                    id: endpoint_id,
                    launch_time: cfg.launch_time_seconds,
                    config: cfg.config.clone(),
                },
            );
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        // `train_every` is validated above but not forwarded here: the
        // built-in rolling-average predictor has no retrain cadence to gate
        // (see DESIGN.md's Open Question decisions).
        let runtime_predictor = build_runtime_predictor(
            &settings.runtime_predictor,
            settings.last_n,
            settings.initial_runtime_estimate_seconds,
        );
        let transfer_predictor = Arc::new(ConstantTransferPredictor::new(settings.transfer_seconds_per_file));
        let import_predictor = Arc::new(ConstantImportPredictor::new(settings.import_seconds_per_package));

        if settings.import_model_file.is_some() {
            warn!("import_model_file is set but warm-started import models are not supported; using the constant import predictor");
        }
        if settings.transfer_model_file.is_some() {
            warn!("transfer_model_file is set but warm-started transfer models are not supported; using the constant transfer predictor");
        }

        let strategy = build_strategy(
            &settings.strategy,
            endpoint_ids,
            clock.clone(),
            runtime_predictor.clone(),
            transfer_predictor.clone(),
        );

        let executor_client = Arc::new(HttpExecutorClient::new(
            settings.executor_base_url.clone(),
            Duration::from_secs(settings.executor_http_timeout_seconds),
        )?);

        let (scheduled_tx, scheduled_rx) = tokio::sync::mpsc::unbounded_channel();

        let core = SchedulerCore {
            state: Arc::new(Mutex::new(state::SchedulerState::new(endpoint_map))),
            strategy,
            runtime_predictor,
            transfer_predictor,
            import_predictor,
            transfer_coordinator: Arc::new(NoopTransferCoordinator),
            payload_serializer: Arc::new(JsonPayloadSerializer),
            executor_client,
            clock,
            scheduled_tx,
            max_backups: settings.max_backups,
            backup_delay_threshold: settings.backup_delay_threshold,
            heartbeat_threshold_seconds: settings.heartbeat_threshold_seconds,
            execution_log_capacity: settings.execution_log_capacity,
        };

        Ok((core, scheduled_rx))
    }

    /// Starts the scheduler and runs until a shutdown signal is received.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting central task scheduler");

        let settings = {
            let config_manager = self.config_manager.lock().await;
            config_manager
                .settings
                .as_ref()
                .expect("scheduler configuration not loaded. This should not happen as config is loaded in new().")
                .clone()
        };

        info!(
            listen_address = %self.listen_address,
            executor_base_url = %settings.executor_base_url,
            endpoint_count = settings.endpoints.len(),
            strategy = %settings.strategy,
            "Scheduler configuration loaded"
        );

        let (core, scheduled_rx) = Self::build_core(&settings).context("Failed to build scheduler core")?;

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let submission_worker = SubmissionWorker::new(
            core.clone(),
            scheduled_rx,
            Duration::from_millis(settings.submission_tick_ms),
        );
        let submission_shutdown_rx = shutdown_tx.subscribe();
        let submission_task = tokio::spawn(async move {
            submission_worker.run(submission_shutdown_rx).await;
        });
        self.submission_task_handle = Some(submission_task);

        let watchdog = EndpointWatchdog::new(
            core.clone(),
            Duration::from_secs(settings.watchdog_interval_seconds),
        );
        let watchdog_shutdown_rx = shutdown_tx.subscribe();
        let watchdog_task = tokio::spawn(async move {
            watchdog.run(watchdog_shutdown_rx).await;
        });
        self.watchdog_task_handle = Some(watchdog_task);

        let app_state = api::AppState {
            core,
            api_key: settings.api_key.clone(),
            http_request_max_size_mb: settings.http_request_max_size_mb,
        };
        let app = api::create_router(app_state);

        info!("Starting HTTP server on {}", self.listen_address);
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind TCP listener to {}. \
                     Check if port is already in use (EADDRINUSE) or requires elevated permissions (EACCES).",
                    self.listen_address
                )
            })?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }

    /// Performs a graceful shutdown: broadcasts the shutdown signal, then
    /// awaits each background task with a configurable timeout.
    pub async fn shutdown(&mut self) {
        info!("Shutting down central task scheduler gracefully");

        let shutdown_timeout_secs = {
            let config_manager = self.config_manager.lock().await;
            config_manager
                .settings
                .as_ref()
                .map(|c| c.graceful_shutdown_timeout_seconds)
                .unwrap_or(30)
        };

        if let Some(shutdown_tx) = &self.shutdown_tx {
            if let Err(e) = shutdown_tx.send(()) {
                warn!("Failed to send shutdown signal: {}", e);
            }
        }

        if let Some(handle) = self.submission_task_handle.take() {
            info!(
                "Waiting for submission worker to complete (timeout: {}s)",
                shutdown_timeout_secs
            );
            match tokio::time::timeout(Duration::from_secs(shutdown_timeout_secs), handle).await {
                Ok(Ok(())) => info!("Submission worker completed successfully"),
                Ok(Err(e)) => warn!("Submission worker panicked: {}", e),
                Err(_) => warn!("Submission worker shutdown timeout reached, aborting"),
            }
        }

        if let Some(handle) = self.watchdog_task_handle.take() {
            info!(
                "Waiting for endpoint watchdog to complete (timeout: {}s)",
                shutdown_timeout_secs
            );
            match tokio::time::timeout(Duration::from_secs(shutdown_timeout_secs), handle).await {
                Ok(Ok(())) => info!("Endpoint watchdog completed successfully"),
                Ok(Err(e)) => warn!("Endpoint watchdog panicked: {}", e),
                Err(_) => warn!("Endpoint watchdog shutdown timeout reached, aborting"),
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Sets up signal handlers for graceful shutdown. Returns a future that
/// completes when a shutdown signal is received.
///
/// On Unix systems, handles SIGTERM and SIGINT signals. On non-Unix
/// systems, handles Ctrl+C. If signal registration fails, falls back to
/// Ctrl+C handling.
async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                error!("Falling back to Ctrl+C only");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to wait for Ctrl+C: {}", e);
                } else {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to receive Ctrl+C signal: {}", e);
        } else {
            info!("Received Ctrl+C");
        }
    }
}

/// Scheduler entry point. Initializes logging, loads configuration,
/// creates the scheduler instance, and runs until a shutdown signal is
/// received.
#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "scheduler.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scheduler=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();

    info!("Central task scheduler starting up");
    info!("Configuration file: {}", cli_args.config_file.display());

    if cli_args.listen_address.is_some() {
        info!("Listen address override provided via command line");
    }
    if cli_args.api_key.is_some() {
        info!("API key override provided via command line");
    }
    if cli_args.executor_base_url.is_some() {
        info!("Executor base URL override provided via command line");
    }
    if cli_args.max_backups.is_some() {
        info!("Max backups override provided via command line");
    }

    let mut server = match Server::new(cli_args.config_file) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to initialize scheduler: {}", e);
            std::process::exit(1);
        }
    };

    if cli_args.listen_address.is_some()
        || cli_args.api_key.is_some()
        || cli_args.executor_base_url.is_some()
        || cli_args.max_backups.is_some()
    {
        let changed = {
            let mut config_manager = server.config_manager.lock().await;
            match config_manager.override_and_persist_config(
                cli_args.listen_address,
                cli_args.api_key,
                cli_args.executor_base_url,
                cli_args.max_backups,
            ) {
                Ok(changed) => changed,
                Err(e) => {
                    error!("Failed to apply configuration overrides: {}", e);
                    std::process::exit(1);
                }
            }
        };

        if changed {
            info!("Configuration overrides applied and persisted to disk");
            let settings = {
                let config_manager = server.config_manager.lock().await;
                config_manager
                    .settings
                    .as_ref()
                    .expect("scheduler configuration not loaded. This should not happen as config is loaded in new().")
                    .clone()
            };
            server.listen_address = settings
                .listen_address
                .parse()
                .map_err(|e| {
                    error!("Invalid listen address after override: {}", e);
                    std::process::exit(1);
                })
                .unwrap();
        } else {
            info!("Command-line values match existing config, no changes needed");
        }
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Scheduler error: {}", e);
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown");
        }
    }

    server.shutdown().await;
    info!("Scheduler shutdown complete");
    Ok(())
}
