// integration-coordinator-rs/src/main.rs
//
// Process entry point for the service integration runtime.
// Builds the facade from INTEGRATION_* environment configuration, registers
// the built-in workflows, runs the heartbeat monitor until Ctrl-C and then
// shuts everything down.

use std::path::Path;

use anyhow::{Context, Result};
use service_integration::{
    init_logging, ConfigProvider, EnvConfigProvider, IntegrationConfig, IntegrationFacade, ServiceInfo,
};
use tracing::{info, warn};

/// Register the services listed in a JSON file (an array of service records)
async fn bootstrap_services(facade: &IntegrationFacade, path: &Path) -> Result<usize> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read bootstrap file {}", path.display()))?;
    let services: Vec<ServiceInfo> = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed bootstrap file {}", path.display()))?;

    let count = services.len();
    for service in services {
        facade.register_service(service).await?;
    }
    Ok(count)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let provider = EnvConfigProvider::new().with_prefix("INTEGRATION");
    let config = IntegrationConfig::from_provider(&provider).context("Invalid configuration")?;
    init_logging(&config.logging)?;

    info!(
        backend = ?config.discovery.backend,
        cache_ttl_secs = config.discovery.cache_ttl.as_secs_f64(),
        heartbeat_interval_secs = config.discovery.heartbeat_interval.as_secs_f64(),
        failure_threshold = config.circuit_breaker.failure_threshold,
        "Starting integration coordinator"
    );

    let facade = IntegrationFacade::from_config(&config)
        .await
        .context("Failed to initialise service discovery")?;
    facade.register_default_workflows();
    info!(handlers = ?facade.mediator().handler_types(), "Workflows registered");

    if let Ok(path) = provider.get_string("bootstrap_services") {
        match bootstrap_services(&facade, Path::new(&path)).await {
            Ok(count) => info!(count, path = %path, "Bootstrap services registered"),
            Err(e) => warn!(error = %e, path = %path, "Bootstrap registration failed"),
        }
    }

    facade.start();
    info!("Integration coordinator running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    match facade.get_system_health().await {
        Ok(health) => info!(
            status = ?health.status,
            snapshot = %serde_json::to_string(&health).unwrap_or_default(),
            "Final system health"
        ),
        Err(e) => warn!(error = %e, "Could not collect final system health"),
    }

    facade.shutdown().await;
    info!("Integration coordinator stopped");
    Ok(())
}
