//! Integration tests for the Redpanda transport against a real Kafka broker.
//!
//! These tests are marked as `#[ignore]` because they need Docker and take
//! tens of seconds to start the broker. Run them explicitly:
//!
//! ```bash
//! cargo test -p catalog-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use catalog_core::event_bus::{EventPublisher, MessageSourceFactory, OutgoingMessage};
use catalog_redpanda::{RedpandaPublisher, RedpandaSourceFactory};
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn wait_for_kafka_ready(publisher: &RedpandaPublisher, topic: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        let warmup = OutgoingMessage::new(topic, "warmup", vec![255]);
        if publisher.publish(warmup).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn keyed_messages_round_trip_with_headers_and_commits() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let topic = "product_created";
    let publisher = RedpandaPublisher::builder()
        .brokers(&brokers)
        .build()
        .expect("Failed to create publisher");
    wait_for_kafka_ready(&publisher, topic).await;

    let mut headers = catalog_core::event_bus::Headers::new();
    headers.insert("traceparent".to_string(), b"00-trace-span-01".to_vec());
    for seq in 0..3u8 {
        publisher
            .publish(
                OutgoingMessage::new(topic, "product-1", vec![seq]).with_headers(headers.clone()),
            )
            .await
            .expect("publish");
    }

    let factory = RedpandaSourceFactory::new(&brokers, "it-group", vec![topic.to_string()]);
    let mut source = factory.create(0).await.expect("create source");

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while received.len() < 3 {
            let message = source.fetch().await.expect("fetch");
            if message.key.as_deref() == Some("product-1") {
                assert_eq!(message.headers, headers);
                source.commit(&message).await.expect("commit");
                received.push(message.payload[0]);
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");

    assert_eq!(received, vec![0, 1, 2]);
}
