pub mod api; // HTTP surface: router, middleware, server lifecycle
pub mod config;
pub mod db;
pub mod dispatch; // Callback queue, assignment coordinator, dispatch service
pub mod models;
pub mod privacy;
pub mod triage; // Rule-based risk classifier

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::config::DispatchConfig;
use crate::dispatch::{start_release_sweeper, DispatchService};

/// Run the dispatch server until Ctrl-C.
pub fn run() -> Result<(), String> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = DispatchConfig::from_env();
    let service = Arc::new(
        DispatchService::open(&config).map_err(|e| format!("Cannot open dispatch store: {e}"))?,
    );

    let _sweeper = match config.assignment_timeout {
        Some(_) => Some(start_release_sweeper(service.clone(), config.sweep_interval)),
        None => {
            tracing::info!("Assignment timeout disabled; release sweeper not started");
            None
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Cannot start async runtime: {e}"))?;

    runtime.block_on(async move {
        let server = api::start_api_server_on(service, config.bind_addr).await?;
        tracing::info!(addr = %server.session.server_addr, "Accepting requests");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| format!("Cannot listen for shutdown signal: {e}"))?;
        tracing::info!("Shutdown requested");
        server.stop().await;
        Ok(())
    })
}
