//! Redpanda (Kafka-compatible) transport for the product catalog.
//!
//! # Overview
//!
//! - [`RedpandaPublisher`]: keyed, header-carrying publishes through a
//!   `FutureProducer`.
//! - [`RedpandaSourceFactory`]: one `StreamConsumer` per worker, all in the
//!   same consumer group, so the broker hands each worker a disjoint set of
//!   partitions.
//! - [`RedpandaSource`]: fetch, commit and rewind for one worker.
//!
//! # Delivery Guarantees
//!
//! **At-least-once delivery** with manual offset commits:
//! - `enable.auto.commit` is off; offsets advance only through
//!   [`MessageSource::commit`], which the consumer pool calls after the
//!   handler has applied (or rejected as poison) a message
//! - a message that is neither committed nor rewound past is redelivered
//!   after a restart or rebalance
//! - messages with the same key land on the same partition, so per-product
//!   order is preserved
//!
//! # Example
//!
//! ```no_run
//! use catalog_redpanda::{RedpandaPublisher, RedpandaSourceFactory};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let publisher = RedpandaPublisher::builder()
//!     .brokers("localhost:9092")
//!     .producer_acks("all")
//!     .build()?;
//!
//! let sources = RedpandaSourceFactory::new(
//!     "localhost:9092",
//!     "catalog-reader",
//!     vec!["product_created".to_string()],
//! );
//! # Ok(())
//! # }
//! ```

use catalog_core::event_bus::{
    BusFuture, EventBusError, EventMessage, EventPublisher, Headers, MessageSource,
    MessageSourceFactory, OutgoingMessage,
};
use catalog_runtime::metrics::PublishMetrics;
use chrono::DateTime;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::time::{Duration, Instant};

/// Publishes catalog messages to Redpanda.
///
/// Records are keyed by the message key (the product id) and carry the
/// message headers (trace context) as Kafka record headers.
pub struct RedpandaPublisher {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
}

impl RedpandaPublisher {
    /// Create a publisher with default producer settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the publisher.
    #[must_use]
    pub fn builder() -> RedpandaPublisherBuilder {
        RedpandaPublisherBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Wait for queued records to be delivered.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the queue does not drain
    /// within `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        use rdkafka::producer::Producer as _;
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| EventBusError::PublishFailed {
                topic: "*".to_string(),
                reason: format!("flush failed: {e}"),
            })
    }
}

/// Builder for configuring a [`RedpandaPublisher`].
#[derive(Default)]
pub struct RedpandaPublisherBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
}

impl RedpandaPublisherBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set producer acknowledgement mode ("0", "1" or "all"). Default: "all".
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set compression type ("none", "gzip", "snappy", "lz4", "zstd").
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the publisher.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaPublisher, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        tracing::info!(brokers = %brokers, acks, compression, "Redpanda publisher created");

        Ok(RedpandaPublisher {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
        })
    }
}

/// Convert message headers into Kafka record headers.
fn to_kafka_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key: key.as_str(),
                value: Some(value.as_slice()),
            })
        })
}

/// Collect Kafka record headers. Headers without a value are dropped.
fn from_kafka_headers<H: rdkafka::message::Headers>(headers: &H) -> Headers {
    headers
        .iter()
        .filter_map(|header| header.value.map(|value| (header.key.to_string(), value.to_vec())))
        .collect()
}

impl EventPublisher for RedpandaPublisher {
    fn publish(&self, message: OutgoingMessage) -> BusFuture<'_, ()> {
        let timeout = self.timeout;

        Box::pin(async move {
            let started = Instant::now();
            let record = FutureRecord::to(&message.topic)
                .key(&message.key)
                .payload(&message.payload)
                .headers(to_kafka_headers(&message.headers));

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    PublishMetrics::record_publish(&message.topic, started.elapsed());
                    tracing::debug!(
                        topic = %message.topic,
                        key = %message.key,
                        partition,
                        offset,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    PublishMetrics::record_publish_error(&message.topic);
                    tracing::error!(
                        topic = %message.topic,
                        key = %message.key,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic: message.topic.clone(),
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }
}

/// Creates one consumer-group member per worker.
#[derive(Debug, Clone)]
pub struct RedpandaSourceFactory {
    brokers: String,
    group_id: String,
    topics: Vec<String>,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaSourceFactory {
    /// Members of `group_id` subscribed to `topics`.
    #[must_use]
    pub fn new(brokers: impl Into<String>, group_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            brokers: brokers.into(),
            group_id: group_id.into(),
            topics,
            auto_offset_reset: "earliest".to_string(),
            session_timeout: Duration::from_secs(6),
        }
    }

    /// Where a group without committed offsets starts ("earliest" or "latest").
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = policy.into();
        self
    }

    /// Group session timeout. Default: 6 seconds.
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Subscribed topics.
    #[must_use]
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    fn build_consumer(&self, worker_id: usize) -> Result<StreamConsumer, EventBusError> {
        let subscription_failed = |reason: String| EventBusError::SubscriptionFailed {
            topics: self.topics.clone(),
            reason,
        };

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.group_id)
            .set("client.id", format!("{}-{worker_id}", self.group_id))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| subscription_failed(format!("Failed to create consumer: {e}")))?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| subscription_failed(format!("Failed to subscribe: {e}")))?;

        Ok(consumer)
    }
}

impl MessageSourceFactory for RedpandaSourceFactory {
    fn create(&self, worker_id: usize) -> BusFuture<'_, Box<dyn MessageSource>> {
        Box::pin(async move {
            let consumer = self.build_consumer(worker_id)?;

            tracing::info!(
                group_id = %self.group_id,
                worker_id,
                topics = ?self.topics,
                "Consumer group member created"
            );

            Ok(Box::new(RedpandaSource { consumer }) as Box<dyn MessageSource>)
        })
    }
}

/// One worker's consumer-group membership.
pub struct RedpandaSource {
    consumer: StreamConsumer,
}

fn to_event_message(message: &BorrowedMessage<'_>) -> EventMessage {
    EventMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::from_timestamp_millis),
        headers: message.headers().map(from_kafka_headers).unwrap_or_default(),
    }
}

impl MessageSource for RedpandaSource {
    fn fetch(&mut self) -> BusFuture<'_, EventMessage> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|e| EventBusError::FetchFailed(e.to_string()))?;

            Ok(to_event_message(&message))
        })
    }

    fn commit<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let offset_failed = |reason: String| EventBusError::OffsetFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason,
            };

            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| offset_failed(e.to_string()))?;

            self.consumer
                .commit(&tpl, CommitMode::Async)
                .map_err(|e| offset_failed(e.to_string()))
        })
    }

    fn rewind<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            self.consumer
                .seek(
                    &message.topic,
                    message.partition,
                    Offset::Offset(message.offset),
                    Timeout::After(Duration::from_secs(5)),
                )
                .map_err(|e| EventBusError::OffsetFailed {
                    topic: message.topic.clone(),
                    partition: message.partition,
                    offset: message.offset,
                    reason: format!("seek failed: {e}"),
                })
        })
    }
}
