//! Prometheus metrics for the catalog services.
//!
//! Counters are recorded through the `metrics` facade; [`MetricsServer`]
//! installs the Prometheus recorder and renders the text exposition that each
//! service serves at `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the owning service should serve `/metrics` on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// An already-installed recorder is tolerated (tests start several
    /// servers in one process).
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "catalog_consumer_messages_total",
        "Messages handled by consumer workers, by topic and outcome"
    );
    describe_counter!(
        "catalog_consumer_poison_messages_total",
        "Messages skipped as poison (decode or validation failure)"
    );
    describe_counter!(
        "catalog_consumer_failed_messages_total",
        "Messages left uncommitted after exhausting retries"
    );
    describe_counter!(
        "catalog_consumer_fetch_errors_total",
        "Errors while fetching from the event log"
    );
    describe_counter!(
        "catalog_store_errors_total",
        "Failed queries against the transactional store, by operation"
    );
    describe_counter!(
        "catalog_commands_total",
        "Commands handled on the write side, by command and outcome"
    );
    describe_counter!(
        "catalog_events_published_total",
        "Events and command messages published, by topic"
    );
    describe_counter!(
        "catalog_publish_errors_total",
        "Publish failures, by topic"
    );
    describe_histogram!(
        "catalog_publish_duration_seconds",
        "Time taken to publish a message"
    );
    describe_counter!(
        "catalog_cache_errors_total",
        "Cache operations that failed and were ignored, by operation"
    );
    describe_counter!(
        "catalog_cache_lookups_total",
        "Cache lookups, by result (hit, miss, error)"
    );
    describe_counter!("catalog_retry_attempts_total", "Retries scheduled");
    describe_counter!(
        "catalog_retry_successes_total",
        "Operations that succeeded after at least one retry"
    );
    describe_counter!(
        "catalog_retry_exhausted_total",
        "Operations that failed on every attempt"
    );
}

/// Consumer worker metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a handled message.
    pub fn record_message(topic: &str, outcome: &'static str) {
        counter!(
            "catalog_consumer_messages_total",
            "topic" => topic.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a poison message.
    pub fn record_poison(topic: &str) {
        counter!("catalog_consumer_poison_messages_total", "topic" => topic.to_string())
            .increment(1);
    }

    /// Record a message whose retries were exhausted.
    pub fn record_failure(topic: &str) {
        counter!("catalog_consumer_failed_messages_total", "topic" => topic.to_string())
            .increment(1);
    }

    /// Record a fetch error.
    pub fn record_fetch_error() {
        counter!("catalog_consumer_fetch_errors_total").increment(1);
    }
}

/// Write-side command metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a handled command.
    pub fn record(command: &'static str, outcome: &'static str) {
        counter!("catalog_commands_total", "command" => command, "outcome" => outcome)
            .increment(1);
    }
}

/// Publisher metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a successful publish.
    pub fn record_publish(topic: &str, duration: Duration) {
        counter!("catalog_events_published_total", "topic" => topic.to_string()).increment(1);
        histogram!("catalog_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a failed publish.
    pub fn record_publish_error(topic: &str) {
        counter!("catalog_publish_errors_total", "topic" => topic.to_string()).increment(1);
    }
}

/// Cache metrics recorder.
pub struct CacheMetrics;

impl CacheMetrics {
    /// Record a lookup result: `hit`, `miss` or `error`.
    pub fn record_lookup(result: &'static str) {
        counter!("catalog_cache_lookups_total", "result" => result).increment(1);
    }

    /// Record a swallowed cache failure.
    pub fn record_error(operation: &'static str) {
        counter!("catalog_cache_errors_total", "operation" => operation).increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a scheduled retry.
    pub fn record_attempt() {
        counter!("catalog_retry_attempts_total").increment(1);
    }

    /// Record a success after retrying.
    pub fn record_success() {
        counter!("catalog_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("catalog_retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_render() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        ConsumerMetrics::record_poison("product_created");
        CommandMetrics::record("create", "ok");

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("catalog_consumer_poison_messages_total"));
            assert!(rendered.contains("catalog_commands_total"));
        }
    }
}
