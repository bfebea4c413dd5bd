//! Subscriber setup for the catalog binaries.
//!
//! Installs an `EnvFilter` (`RUST_LOG`, default `info`), a fmt layer and an
//! OpenTelemetry layer. The OpenTelemetry layer gives every span a W3C trace
//! context, which is what the publishers inject into message headers and the
//! consumers extract again.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::TracerProvider;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// The global subscriber could not be installed.
#[derive(Error, Debug)]
#[error("failed to install tracing subscriber: {0}")]
pub struct TelemetryError(String);

/// Install the global subscriber for `service`.
///
/// # Errors
///
/// Returns [`TelemetryError`] if a global subscriber is already set.
pub fn init_tracing(service: &'static str) -> Result<(), TelemetryError> {
    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer(service);
    opentelemetry::global::set_tracer_provider(provider);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()
        .map_err(|e| TelemetryError(e.to_string()))
}

/// Flush and drop the global tracer provider.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
