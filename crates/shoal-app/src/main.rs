mod cli;
mod gateway;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use shoal_config::{LogLevel, ShoalConfig};
use shoal_node::{NodeRegistry, RegistryEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::gateway::LoggingGateway;

fn init_logging(directive: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new(LogLevel::default().as_directive()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn log_event(event: &RegistryEvent) {
    match event {
        RegistryEvent::Ready { name, resumed } => {
            tracing::info!(node = %name, resumed, "Node ready");
        }
        RegistryEvent::Error { name, error } => {
            tracing::warn!(node = %name, error = %error, "Node error");
        }
        RegistryEvent::Close { name, code, reason } => {
            tracing::warn!(node = %name, code, reason = %reason, "Node connection closed");
        }
        RegistryEvent::Disconnected { name, reason } => {
            tracing::error!(node = %name, reason = %reason, "Node removed");
        }
    }
}

async fn report_load(registry: &NodeRegistry) {
    for node in registry.nodes().await {
        tracing::info!(
            node = %node.name(),
            group = node.group().unwrap_or("-"),
            state = %node.state().await,
            players = node.player_count().await,
            penalty = node.penalties().await,
            ping_ms = node.ping().await.as_millis() as u64,
            "Node load"
        );
    }
}

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let config_path = match args.config.as_deref() {
        Some(path) => Some(PathBuf::from(path)),
        None => shoal_config::default_config_path().ok(),
    };
    let loaded = match args.config.as_deref() {
        Some(path) => shoal_config::load_from_path(Path::new(path)),
        None => shoal_config::load_default(),
    };
    let config_error = loaded.as_ref().err().cloned();
    let config = loaded.unwrap_or_default();

    let directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.as_directive().to_string());
    init_logging(&directive, args.json_logs || config.logging.json);

    tracing::info!("Shoal v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &config_path {
        tracing::info!(path = %path.display(), "Config file");
    }
    if let Some(e) = config_error {
        tracing::warn!("Config load failed, using defaults: {e}");
    }
    if let Err(e) = shoal_config::validation::validate(&config) {
        tracing::error!("Invalid config: {e}");
        std::process::exit(2);
    }

    let client_id = args.client_id.clone().unwrap_or_else(|| config.client.id.clone());
    if client_id.is_empty() {
        tracing::error!("No client id; set [client] id in the config or pass --client-id");
        std::process::exit(2);
    }

    if let Err(code) = run(config, client_id, args.report_interval).await {
        std::process::exit(code);
    }
    tracing::info!("Shutdown complete");
}

async fn run(config: ShoalConfig, client_id: String, report_secs: u64) -> Result<(), i32> {
    let registry = NodeRegistry::new(config.registry, Arc::new(LoggingGateway::new(1)));
    let mut events = registry.subscribe();

    if let Err(e) = registry.init(client_id, config.nodes).await {
        tracing::error!("Failed to start node registry: {e}");
        return Err(1);
    }

    let mut report = tokio::time::interval(Duration::from_secs(report_secs.max(1)));
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Registry event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = report.tick() => report_load(&registry).await,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, removing nodes");
                break;
            }
        }
    }

    for node in registry.nodes().await {
        if let Err(e) = registry.remove_node(node.name(), "shutdown").await {
            tracing::debug!(node = %node.name(), error = %e, "Node already removed");
        }
    }
    Ok(())
}
