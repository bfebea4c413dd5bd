//! API gateway binary.
//!
//! Serves the public product API on `http.addr` and `/health` + `/metrics`
//! on `http.metrics_addr`.

use anyhow::Context;
use catalog_core::config::CatalogConfig;
use catalog_redpanda::RedpandaPublisher;
use catalog_runtime::metrics::MetricsServer;
use catalog_runtime::shutdown::{self, Shutdown};
use catalog_runtime::telemetry;
use catalog_web::gateway::{self, GatewayState, HttpReaderClient, RetryingReaderClient};
use catalog_web::ops_router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("catalog-gateway")?;
    let config = CatalogConfig::load().context("loading configuration")?;

    let metrics_addr: SocketAddr = config.http.metrics_addr.parse()?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;
    let metrics = Arc::new(metrics);

    let publisher = RedpandaPublisher::new(&config.kafka.brokers)?;
    let reader = RetryingReaderClient::linear(
        HttpReaderClient::new(&config.http.reader_url, Duration::from_secs(5))?,
        config.http.reader_retry_attempts,
        Duration::from_millis(config.http.reader_backoff_ms),
    );
    let state = GatewayState::new(
        Arc::new(publisher),
        config.kafka.command_topics.clone(),
        Arc::new(reader),
    );

    let app = gateway::router(state).merge(ops_router(Arc::clone(&metrics)));

    let (trigger, shutdown) = shutdown::channel();

    let api_listener = tokio::net::TcpListener::bind(&config.http.addr).await?;
    info!(addr = %config.http.addr, "API gateway listening");
    let api = tokio::spawn(serve(api_listener, app, shutdown.clone()));

    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    let ops = tokio::spawn(serve(metrics_listener, ops_router(metrics), shutdown.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Unable to listen for shutdown signal"),
    }
    trigger.trigger();

    for (name, handle) in [("api", api), ("ops", ops)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = name, error = %e, "Server failed"),
            Err(e) => error!(server = name, error = %e, "Server task panicked"),
        }
    }

    telemetry::shutdown_tracing();
    info!("Gateway stopped");
    Ok(())
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    mut shutdown: Shutdown,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
}
