use crate::config::parse::load_config;
use crate::config::types::Config;
use crate::directory::ConfigDirectory;
use crate::report::FileReportSink;
use crate::resilience::{BackendRegistry, ResilienceContext};
use crate::scheduler::{Orchestrator, OrchestratorSettings, Scheduler};
use crate::source::SourceRegistry;
use crate::storage::{BatchStore, DuckDbStorage};
use crate::web::run_server;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("extraction backend error: {0}")]
    Extraction(#[from] crate::extraction::ExtractionError),

    #[error("orchestrator error: {0}")]
    Orchestrator(#[from] crate::scheduler::OrchestratorError),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

/// Load the config or exit with a hint about where it was looked for
pub fn require_config(config_path: Option<PathBuf>) -> Result<Config, RunError> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/chatdigest/config.yml");
            eprintln!("  /etc/chatdigest/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'chatdigest config init' to generate one.");
            std::process::exit(1);
        }
    };

    info!(config_path = %config_path.display(), "Loading configuration");
    Ok(load_config(&config_path)?)
}

/// Wire storage, sources, backends and the report sink into an orchestrator
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator, RunError> {
    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage = DuckDbStorage::new(&config.storage.path)?;
    storage.init_schema().await?;

    let sources = SourceRegistry::from_config(&config.platforms);
    if sources.platform_ids().is_empty() {
        warn!("No platforms configured, nothing will be analysed");
    }

    let backends = BackendRegistry::from_config(&config.extraction)?;
    if backends.is_empty() {
        warn!("No extraction backends configured, topics, quotes and titles will be empty");
    }
    let resilience = ResilienceContext::new(backends, &config.resilience);

    let settings = OrchestratorSettings::from_config(config)?;
    info!(utc_offset = %settings.utc_offset, window_days = settings.analysis.days, "Orchestrator configured");

    let sink = FileReportSink::new(config.report.output_dir.clone());
    Ok(Orchestrator::new(settings, Arc::new(storage), sources, Arc::new(resilience))
        .with_sink(Arc::new(sink)))
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    run_service(config).await.map_err(|e| e.into())
}

async fn run_service(config: Config) -> Result<(), RunError> {
    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let shutdown = CancellationToken::new();

    let scheduler_handle = if config.schedule.enabled {
        let directory = ConfigDirectory::new(
            config.groups.clone(),
            &config.platforms,
            orchestrator.sources().clone(),
        );
        let scheduler = Scheduler::new(orchestrator.clone(), Arc::new(directory), &config.schedule)
            .map_err(RunError::Scheduler)?;
        info!(
            mode = ?config.schedule.mode,
            triggers = scheduler.triggers().len(),
            "Starting scheduler"
        );
        Some(tokio::spawn(Arc::new(scheduler).run(shutdown.clone())))
    } else {
        warn!("Scheduling disabled, only the status API will run");
        None
    };

    let web_handle = if config.web.enabled {
        info!("Starting status API on {}", config.web.listen);
        let web_orchestrator = orchestrator.clone();
        let web_config = config.web.clone();
        let web_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            run_server(web_orchestrator, web_config, web_shutdown)
                .await
                .map_err(|e| RunError::WebServer(e.to_string()))
        }))
    } else {
        None
    };

    if scheduler_handle.is_none() && web_handle.is_none() {
        warn!("Neither the scheduler nor the status API is enabled, exiting");
        return Ok(());
    }

    info!("Service started, press Ctrl+C to shutdown");
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
    shutdown.cancel();

    if let Some(handle) = scheduler_handle {
        handle.await?;
        info!("Scheduler stopped");
    }

    if let Some(handle) = web_handle {
        match handle.await? {
            Ok(()) => info!("Status API stopped"),
            Err(e) => error!(error = %e, "Status API error"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}
