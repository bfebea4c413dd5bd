//! Events carry the publishing span's trace context.
//!
//! Kept in its own test binary because it installs the global subscriber.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use catalog_core::event::{EventKind, EventTopics};
use catalog_core::trace_context::extract_trace_context;
use catalog_runtime::telemetry;
use catalog_testing::fixtures::create_widget;
use catalog_testing::{InMemoryBroker, InMemoryProductRepository};
use catalog_writer::ProductCommandService;
use std::sync::Arc;
use tracing::Instrument;

#[tokio::test]
async fn published_event_carries_traceparent() {
    telemetry::init_tracing("writer-test").unwrap();
    let broker = InMemoryBroker::new();
    let topics = EventTopics::default();
    let service = ProductCommandService::new(
        Arc::new(InMemoryProductRepository::new()),
        Arc::new(broker.clone()),
        topics.clone(),
    );

    service
        .create(create_widget())
        .instrument(tracing::error_span!("request"))
        .await
        .unwrap();

    let published = broker.published(topics.topic(EventKind::Created));
    assert!(published[0].headers.contains_key("traceparent"));
    assert!(extract_trace_context(&published[0].headers).is_some());
}
