//! Reader service binary.
//!
//! Consumes the event topics with a pool of `consumer.pool_size` workers in
//! the `{group_id}-reader` group, serves the query API on `http.addr` and
//! `/health` + `/metrics` on `http.metrics_addr`.

use anyhow::Context;
use catalog_core::config::CatalogConfig;
use catalog_projections::{PostgresReadRepository, RedisProductCache};
use catalog_reader::{ProductProjection, ProductQueries, ProjectionRouter, http};
use catalog_redpanda::RedpandaSourceFactory;
use catalog_runtime::consumer::ConsumerPool;
use catalog_runtime::metrics::MetricsServer;
use catalog_runtime::retry::RetryPolicy;
use catalog_runtime::shutdown::{self, Shutdown};
use catalog_runtime::telemetry;
use catalog_web::ops_router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing("catalog-reader")?;
    let config = CatalogConfig::load().context("loading configuration")?;

    let metrics_addr: SocketAddr = config.http.metrics_addr.parse()?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start()?;
    let metrics = Arc::new(metrics);

    let store = Arc::new(
        PostgresReadRepository::new_with_separate_db(
            &config.database.projection_url,
            config.database.max_connections,
        )
        .await?,
    );
    store.migrate().await?;
    let cache = Arc::new(
        RedisProductCache::new(
            &config.redis.url,
            &config.redis.key_prefix,
            Duration::from_secs(config.redis.ttl_secs),
        )
        .await?,
    );
    info!("Projection store and cache ready");

    let policy = RetryPolicy::builder()
        .max_attempts(config.consumer.retry_attempts)
        .delay(config.consumer.retry_delay())
        .build();
    let router = ProjectionRouter::new(
        ProductProjection::new(store.clone(), cache.clone()),
        config.kafka.event_topics.clone(),
        policy,
    );
    let factory = RedpandaSourceFactory::new(
        config.kafka.brokers.clone(),
        format!("{}-reader", config.kafka.group_id),
        config.kafka.event_topics.all(),
    );
    let pool = ConsumerPool::new("reader", Arc::new(factory), Arc::new(router))
        .with_pool_size(config.consumer.pool_size);

    let queries = Arc::new(ProductQueries::new(store.clone(), cache));
    let app = http::router(queries).merge(ops_router(Arc::clone(&metrics)));

    let (trigger, shutdown) = shutdown::channel();

    let api_listener = tokio::net::TcpListener::bind(&config.http.addr).await?;
    info!(addr = %config.http.addr, "Query API listening");
    let api = tokio::spawn(serve(api_listener, app, shutdown.clone()));
    let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
    let ops = tokio::spawn(serve(metrics_listener, ops_router(metrics), shutdown.clone()));
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
    for (name, handle) in [("api", api), ("ops", ops)] {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(server = name, error = %e, "Server failed"),
            Err(e) => error!(server = name, error = %e, "Server task panicked"),
        }
    }

    store.close().await;
    telemetry::shutdown_tracing();
    info!("Reader stopped");
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
