//! Writer service binary.
//!
//! Consumes the command topics with a pool of `consumer.pool_size` workers in
//! the `{group_id}-writer` group, and serves `/health` + `/metrics` on
//! `http.metrics_addr`.

use anyhow::Context;
use catalog_core::config::CatalogConfig;
use catalog_postgres::PostgresProductRepository;
use catalog_redpanda::{RedpandaPublisher, RedpandaSourceFactory};
use catalog_runtime::consumer::ConsumerPool;
use catalog_runtime::metrics::MetricsServer;
use catalog_runtime::retry::RetryPolicy;
use catalog_runtime::shutdown;
use catalog_runtime::telemetry;
use catalog_web::ops_router;
use catalog_writer::{CommandRouter, ProductCommandService};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("catalog-writer")?;
    let config = CatalogConfig::load().context("loading configuration")?;

    let metrics_addr: SocketAddr = config.http.metrics_addr.parse()?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;

    let repository = Arc::new(
        PostgresProductRepository::connect(&config.database.url, config.database.max_connections)
            .await?,
    );
    repository.migrate().await?;
    info!("Product store ready");

    let publisher = Arc::new(RedpandaPublisher::new(&config.kafka.brokers)?);
    let service = ProductCommandService::new(
        repository.clone(),
        publisher.clone(),
        config.kafka.event_topics.clone(),
    );
    let policy = RetryPolicy::builder()
        .max_attempts(config.consumer.retry_attempts)
        .delay(config.consumer.retry_delay())
        .build();
    let router = CommandRouter::new(service, config.kafka.command_topics.clone(), policy);

    let group_id = format!("{}-writer", config.kafka.group_id);
    let factory = RedpandaSourceFactory::new(
        config.kafka.brokers.clone(),
        group_id,
        config.kafka.command_topics.all(),
    );
    let pool = ConsumerPool::new("writer", Arc::new(factory), Arc::new(router))
        .with_pool_size(config.consumer.pool_size);

    let (trigger, shutdown) = shutdown::channel();

    let listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    let mut ops_shutdown = shutdown.clone();
    let ops = tokio::spawn(async move {
        axum::serve(listener, ops_router(Arc::new(metrics)))
            .with_graceful_shutdown(async move { ops_shutdown.wait().await })
            .await
    });

    let consumers = tokio::spawn(pool.run(shutdown));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Unable to listen for shutdown signal"),
    }
    trigger.trigger();

    match consumers.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Consumer pool failed"),
        Err(e) => error!(error = %e, "Consumer pool task panicked"),
    }
    if let Err(e) = ops.await? {
        error!(error = %e, "Ops server failed");
    }

    if let Err(e) = publisher.flush(Duration::from_secs(5)) {
        error!(error = %e, "Pending events not flushed");
    }
    repository.close().await;
    telemetry::shutdown_tracing();
    info!("Writer stopped");
    Ok(())
}
