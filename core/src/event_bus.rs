//! Event log abstraction: publishing and per-worker consumption.
//!
//! The catalog talks to a partitioned, Kafka-compatible log through three
//! ports:
//!
//! - [`EventPublisher`]: send a keyed message to a topic;
//! - [`MessageSource`]: one consumer-group membership, yielding messages from
//!   the partitions the broker assigned to it and committing offsets;
//! - [`MessageSourceFactory`]: creates one source per worker, so that N workers
//!   hold N memberships and the broker hands each a disjoint partition set.
//!
//! ```text
//! ┌──────────────┐   1. commit   ┌────────────────┐
//! │   Handler    │──────────────▶│  Transactional │◄── source of truth
//! └──────┬───────┘               │     store      │
//!        │ 2. publish(key = id)  └────────────────┘
//!        ▼
//! ┌──────────────┐   fetch/commit  ┌──────────────┐
//! │  Event log   │◄───────────────▶│ Worker pool  │
//! └──────────────┘                 └──────────────┘
//! ```
//!
//! Delivery is at-least-once. Messages sharing a key land on the same
//! partition and are seen in publish order by a single worker.
//!
//! # Dyn Compatibility
//!
//! The traits return `Pin<Box<dyn Future>>` instead of using `async fn` so they
//! can be held as `Arc<dyn EventPublisher>` and `Box<dyn MessageSource>`.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by the ports in this module.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Errors that can occur during event log operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to receive the next message
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Failed to commit or seek an offset
    #[error("Offset operation failed for {topic}[{partition}]@{offset}: {reason}")]
    OffsetFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// The source has been closed
    #[error("Source closed")]
    Closed,
}

/// Message headers: string keys, raw byte values.
pub type Headers = BTreeMap<String, Vec<u8>>;

/// A message received from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
    /// Partition key (the entity id)
    pub key: Option<String>,
    /// Encoded body
    pub payload: Vec<u8>,
    /// Broker timestamp, if any
    pub timestamp: Option<DateTime<Utc>>,
    /// Headers, including trace context
    pub headers: Headers,
}

/// A message about to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Destination topic
    pub topic: String,
    /// Partition key; must be the entity id
    pub key: String,
    /// Encoded body
    pub payload: Vec<u8>,
    /// Headers, including trace context
    pub headers: Headers,
}

impl OutgoingMessage {
    /// Create a message without headers.
    #[must_use]
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Headers::new(),
        }
    }

    /// Attach headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Publishes keyed messages to the log.
pub trait EventPublisher: Send + Sync {
    /// Publish a message and wait for the broker to acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker does not accept
    /// the message.
    fn publish(&self, message: OutgoingMessage) -> BusFuture<'_, ()>;
}

/// One consumer-group membership.
///
/// Sources are owned by a single worker and are not shared, hence `&mut self`.
pub trait MessageSource: Send {
    /// Wait for the next message from the assigned partitions.
    ///
    /// Dropping the returned future abandons the fetch without losing a
    /// message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::FetchFailed`] on a transport error; the caller
    /// may keep fetching.
    fn fetch(&mut self) -> BusFuture<'_, EventMessage>;

    /// Commit the offset after `message`, marking it consumed.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::OffsetFailed`] if the broker rejects the commit.
    fn commit<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()>;

    /// Reposition the partition of `message` so that it is delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::OffsetFailed`] if the seek fails.
    fn rewind<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()>;
}

/// Creates one [`MessageSource`] per worker.
pub trait MessageSourceFactory: Send + Sync {
    /// Join the consumer group as member `worker_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the membership cannot
    /// be established.
    fn create(&self, worker_id: usize) -> BusFuture<'_, Box<dyn MessageSource>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_message_carries_headers() {
        let mut headers = Headers::new();
        headers.insert("traceparent".to_string(), b"00-abc".to_vec());
        let message = OutgoingMessage::new("product_created", "id-1", vec![1, 2])
            .with_headers(headers.clone());
        assert_eq!(message.key, "id-1");
        assert_eq!(message.headers, headers);
    }

    #[test]
    fn offset_error_names_the_position() {
        let err = EventBusError::OffsetFailed {
            topic: "t".to_string(),
            partition: 2,
            offset: 41,
            reason: "broker down".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Offset operation failed for t[2]@41: broker down"
        );
    }
}
