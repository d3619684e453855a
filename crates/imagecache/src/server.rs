use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use imagecache_service::config::Config;
use imagecache_service::metric;
use imagecache_service::services::SharedServices;

use crate::endpoints;

/// How long pending cache writes may take after the server stopped accepting requests.
const POPULATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates the image services and serves them over HTTP until interrupted.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let megs = 1024 * 1024;
    let io_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("imagecache-io")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;
    let web_pool = tokio::runtime::Builder::new_multi_thread()
        .thread_name("imagecache-web")
        .enable_all()
        .thread_stack_size(8 * megs)
        .build()?;

    let services = SharedServices::new(&config, io_pool.handle().to_owned())
        .context("failed to create image services")?;
    let population = services.population.clone();

    let socket = config.bind.parse::<SocketAddr>()?;
    web_pool.block_on(async move {
        let listener = tokio::net::TcpListener::bind(socket)
            .await
            .with_context(|| format!("failed to bind to {socket}"))?;
        tracing::info!("Starting HTTP server on {}", socket);

        axum::serve(listener, endpoints::create_app(services))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server failed")
    })?;

    tracing::info!(pending = population.pending(), "Waiting for pending cache writes");
    let drained = io_pool.block_on(tokio::time::timeout(
        POPULATION_DRAIN_TIMEOUT,
        population.wait_idle(),
    ));
    if drained.is_err() {
        tracing::warn!(
            pending = population.pending(),
            "Giving up on pending cache writes"
        );
    }

    tracing::info!("System shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
