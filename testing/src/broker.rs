//! In-memory partitioned event log.
//!
//! Behaves like a single-broker Kafka cluster, small enough to reason about
//! in tests:
//!
//! - every topic has the same number of partitions;
//! - a message goes to `hash(key) % partitions`, so one key always lands on
//!   one partition;
//! - consumer groups track committed offsets per `(group, topic, partition)`;
//! - member `i` of an `n`-member group owns partitions `p` with `p % n == i`;
//! - a new source starts reading at the committed offset, which is how a
//!   restart redelivers uncommitted messages.
//!
//! Within the partitions a source owns, it always delivers the message that
//! was published first, so the relative order of Created / Updated / Deleted
//! for one key is preserved even though they live on different topics.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks

use catalog_core::event_bus::{
    BusFuture, EventBusError, EventMessage, EventPublisher, MessageSource, MessageSourceFactory,
    OutgoingMessage,
};
use chrono::Utc;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

const DEFAULT_PARTITIONS: i32 = 6;

#[derive(Debug, Clone)]
struct Entry {
    sequence: u64,
    message: EventMessage,
}

#[derive(Debug, Default)]
struct BrokerState {
    logs: HashMap<String, Vec<Vec<Entry>>>,
    committed: HashMap<(String, String, i32), i64>,
    sequence: u64,
    publish_failures: u32,
    publish_always_fails: bool,
    fetch_failures: u32,
}

#[derive(Debug)]
struct BrokerInner {
    partitions: i32,
    state: Mutex<BrokerState>,
    published: Notify,
}

/// In-memory broker shared by publishers and consumer groups.
///
/// # Example
///
/// ```
/// use catalog_testing::InMemoryBroker;
/// use catalog_core::event_bus::{EventPublisher, OutgoingMessage};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// broker
///     .publish(OutgoingMessage::new("product_created", "id-1", vec![1]))
///     .await?;
/// assert_eq!(broker.published("product_created").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with six partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Broker with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState::default()),
                published: Notify::new(),
            }),
        }
    }

    /// Partition a key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let partitions = u64::try_from(self.inner.partitions).unwrap_or(1);
        i32::try_from(hasher.finish() % partitions).unwrap_or(0)
    }

    /// Every message published to `topic`, in partition then offset order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<EventMessage> {
        let state = self.inner.state.lock().unwrap();
        state
            .logs
            .get(topic)
            .map(|partitions| {
                partitions
                    .iter()
                    .flat_map(|log| log.iter().map(|e| e.message.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of messages published across all topics.
    #[must_use]
    pub fn total_published(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        state.logs.values().flatten().map(Vec::len).sum()
    }

    /// Next offset `group` will read from `topic[partition]`, if it committed.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.inner.state.lock().unwrap();
        state
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.state.lock().unwrap().publish_failures = count;
    }

    /// Make every publish fail until switched off.
    pub fn set_publish_failing(&self, failing: bool) {
        self.inner.state.lock().unwrap().publish_always_fails = failing;
    }

    /// Make the next `count` fetches (across all sources) fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.inner.state.lock().unwrap().fetch_failures = count;
    }

    /// Consumer-group factory for a pool of `members` workers.
    #[must_use]
    pub fn consumer_group(
        &self,
        group: impl Into<String>,
        topics: Vec<String>,
        members: usize,
    ) -> InMemorySourceFactory {
        InMemorySourceFactory {
            broker: self.clone(),
            group: group.into(),
            topics,
            members: members.max(1),
        }
    }

    fn append(&self, message: OutgoingMessage) -> Result<(), EventBusError> {
        let partition = self.partition_for(&message.key);
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.publish_always_fails || state.publish_failures > 0 {
                state.publish_failures = state.publish_failures.saturating_sub(1);
                return Err(EventBusError::PublishFailed {
                    topic: message.topic,
                    reason: "injected publish failure".to_string(),
                });
            }

            state.sequence += 1;
            let sequence = state.sequence;
            let partitions = usize::try_from(self.inner.partitions).unwrap_or(1);
            let log = state
                .logs
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); partitions]);
            let partition_log = &mut log[usize::try_from(partition).unwrap_or(0)];
            let offset = i64::try_from(partition_log.len()).unwrap_or(i64::MAX);

            partition_log.push(Entry {
                sequence,
                message: EventMessage {
                    topic: message.topic,
                    partition,
                    offset,
                    key: Some(message.key),
                    payload: message.payload,
                    timestamp: Some(Utc::now()),
                    headers: message.headers,
                },
            });
        }
        self.inner.published.notify_waiters();
        Ok(())
    }
}

impl EventPublisher for InMemoryBroker {
    fn publish(&self, message: OutgoingMessage) -> BusFuture<'_, ()> {
        Box::pin(async move { self.append(message) })
    }
}

/// Creates [`InMemorySource`]s for one consumer group.
#[derive(Debug, Clone)]
pub struct InMemorySourceFactory {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    members: usize,
}

impl MessageSourceFactory for InMemorySourceFactory {
    fn create(&self, worker_id: usize) -> BusFuture<'_, Box<dyn MessageSource>> {
        Box::pin(async move {
            if worker_id >= self.members {
                return Err(EventBusError::SubscriptionFailed {
                    topics: self.topics.clone(),
                    reason: format!(
                        "member {worker_id} exceeds group size {}",
                        self.members
                    ),
                });
            }

            let mut assigned = Vec::new();
            for topic in &self.topics {
                for partition in 0..self.broker.inner.partitions {
                    if usize::try_from(partition).unwrap_or(0) % self.members == worker_id {
                        assigned.push((topic.clone(), partition));
                    }
                }
            }

            let source: Box<dyn MessageSource> = Box::new(InMemorySource {
                broker: self.broker.clone(),
                group: self.group.clone(),
                assigned,
                positions: HashMap::new(),
            });
            Ok(source)
        })
    }
}

/// One member of an in-memory consumer group.
#[derive(Debug)]
pub struct InMemorySource {
    broker: InMemoryBroker,
    group: String,
    assigned: Vec<(String, i32)>,
    positions: HashMap<(String, i32), i64>,
}

impl InMemorySource {
    fn next_available(&mut self) -> Option<Result<EventMessage, EventBusError>> {
        let mut state = self.broker.inner.state.lock().unwrap();
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Some(Err(EventBusError::FetchFailed(
                "injected fetch failure".to_string(),
            )));
        }

        let mut best: Option<&Entry> = None;
        for (topic, partition) in &self.assigned {
            let key = (topic.clone(), *partition);
            let position = *self.positions.entry(key).or_insert_with(|| {
                state
                    .committed
                    .get(&(self.group.clone(), topic.clone(), *partition))
                    .copied()
                    .unwrap_or(0)
            });
            let head = state
                .logs
                .get(topic)
                .and_then(|log| log.get(usize::try_from(*partition).unwrap_or(0)))
                .and_then(|log| log.get(usize::try_from(position).unwrap_or(usize::MAX)));
            if let Some(entry) = head {
                if best.is_none_or(|b| entry.sequence < b.sequence) {
                    best = Some(entry);
                }
            }
        }

        let message = best.map(|entry| entry.message.clone())?;
        self.positions.insert(
            (message.topic.clone(), message.partition),
            message.offset + 1,
        );
        Some(Ok(message))
    }
}

impl MessageSource for InMemorySource {
    fn fetch(&mut self) -> BusFuture<'_, EventMessage> {
        Box::pin(async move {
            // A real fetch is a network round trip; yielding keeps a worker that
            // keeps rewinding from starving a single-threaded test runtime.
            tokio::task::yield_now().await;
            let broker = Arc::clone(&self.broker.inner);
            loop {
                // Register interest before checking so a concurrent publish
                // cannot slip between the check and the wait.
                let notified = broker.published.notified();
                if let Some(result) = self.next_available() {
                    return result;
                }
                notified.await;
            }
        })
    }

    fn commit<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.broker.inner.state.lock().unwrap();
            state.committed.insert(
                (self.group.clone(), message.topic.clone(), message.partition),
                message.offset + 1,
            );
            Ok(())
        })
    }

    fn rewind<'a>(&'a mut self, message: &'a EventMessage) -> BusFuture<'a, ()> {
        Box::pin(async move {
            self.positions
                .insert((message.topic.clone(), message.partition), message.offset);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(topic: &str, key: &str, byte: u8) -> OutgoingMessage {
        OutgoingMessage::new(topic, key, vec![byte])
    }

    #[tokio::test]
    async fn same_key_lands_on_same_partition() {
        let broker = InMemoryBroker::new();
        broker.publish(message("t", "a", 1)).await.unwrap();
        broker.publish(message("t", "a", 2)).await.unwrap();

        let published = broker.published("t");
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].partition, published[1].partition);
        assert_eq!(published[1].offset, published[0].offset + 1);
    }

    #[tokio::test]
    async fn source_delivers_in_publish_order_across_topics() {
        let broker = InMemoryBroker::with_partitions(1);
        let factory = broker.consumer_group("g", vec!["a".into(), "b".into()], 1);
        let mut source = factory.create(0).await.unwrap();

        broker.publish(message("b", "k", 1)).await.unwrap();
        broker.publish(message("a", "k", 2)).await.unwrap();

        assert_eq!(source.fetch().await.unwrap().payload, vec![1]);
        assert_eq!(source.fetch().await.unwrap().payload, vec![2]);
    }

    #[tokio::test]
    async fn new_source_resumes_from_committed_offset() {
        let broker = InMemoryBroker::with_partitions(1);
        let factory = broker.consumer_group("g", vec!["t".into()], 1);
        broker.publish(message("t", "k", 1)).await.unwrap();
        broker.publish(message("t", "k", 2)).await.unwrap();

        let mut first = factory.create(0).await.unwrap();
        let m1 = first.fetch().await.unwrap();
        first.commit(&m1).await.unwrap();
        let _uncommitted = first.fetch().await.unwrap();
        drop(first);

        let mut second = factory.create(0).await.unwrap();
        assert_eq!(second.fetch().await.unwrap().payload, vec![2]);
        assert_eq!(broker.committed_offset("g", "t", 0), Some(1));
    }

    #[tokio::test]
    async fn rewind_redelivers() {
        let broker = InMemoryBroker::with_partitions(1);
        let factory = broker.consumer_group("g", vec!["t".into()], 1);
        let mut source = factory.create(0).await.unwrap();
        broker.publish(message("t", "k", 7)).await.unwrap();

        let m = source.fetch().await.unwrap();
        source.rewind(&m).await.unwrap();
        assert_eq!(source.fetch().await.unwrap(), m);
    }

    #[tokio::test]
    async fn injected_publish_failure_stores_nothing() {
        let broker = InMemoryBroker::new();
        broker.fail_next_publishes(1);
        assert!(broker.publish(message("t", "k", 1)).await.is_err());
        assert!(broker.publish(message("t", "k", 1)).await.is_ok());
        assert_eq!(broker.total_published(), 1);
    }
}
