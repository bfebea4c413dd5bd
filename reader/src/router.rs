//! Routes events from the event topics to the projection.
//!
//! The topic decides the event kind; the payload is decoded once, turned into
//! a validated [`ProjectionCommand`] and applied under the retry policy.
//! Anything that cannot become a valid command is poison.

use crate::projection::ProductProjection;
use catalog_core::command::{ProjectionCommand, Validate};
use catalog_core::event::{EventTopics, ProductEvent};
use catalog_core::event_bus::EventMessage;
use catalog_core::repository::RepositoryError;
use catalog_runtime::consumer::{Disposition, MessageHandler};
use catalog_runtime::retry::{RetryError, RetryPolicy, retry_until_shutdown};
use catalog_runtime::shutdown::Shutdown;
use futures::future::BoxFuture;

/// [`MessageHandler`] for the reader's consumer pool.
pub struct ProjectionRouter {
    projection: ProductProjection,
    topics: EventTopics,
    policy: RetryPolicy,
}

impl ProjectionRouter {
    /// Router applying events from `topics` to `projection`.
    #[must_use]
    pub const fn new(projection: ProductProjection, topics: EventTopics, policy: RetryPolicy) -> Self {
        Self {
            projection,
            topics,
            policy,
        }
    }

    /// Turn a raw message into a validated projection command.
    ///
    /// Returns `None` (and logs why) for poison.
    fn decode(&self, message: &EventMessage) -> Option<ProjectionCommand> {
        let Some(kind) = self.topics.kind_of(&message.topic) else {
            tracing::warn!(topic = %message.topic, "Message on an unrouted topic");
            return None;
        };

        let command = ProductEvent::decode(kind, &message.payload)
            .map_err(|e| e.to_string())
            .and_then(|event| event.into_projection_command().map_err(|e| e.to_string()))
            .and_then(|command| command.validate().map(|()| command).map_err(|e| e.to_string()));

        match command {
            Ok(command) => Some(command),
            Err(reason) => {
                tracing::warn!(kind = kind.as_str(), reason = %reason, "Invalid event payload");
                None
            }
        }
    }

    async fn route(&self, message: &EventMessage, shutdown: &Shutdown) -> Disposition {
        let Some(command) = self.decode(message) else {
            return Disposition::Skip;
        };

        let result = retry_until_shutdown(
            &self.policy,
            shutdown,
            || self.projection.apply(&command),
            RepositoryError::is_transient,
        )
        .await;

        match result {
            Ok(()) => Disposition::Commit,
            Err(RetryError::Rejected(e)) => {
                tracing::warn!(product_id = %command.product_id(), error = %e, "Projection refused event");
                Disposition::Skip
            }
            Err(RetryError::Exhausted { attempts, error }) => {
                tracing::error!(
                    product_id = %command.product_id(),
                    attempts,
                    error = %error,
                    "Projection store unavailable"
                );
                Disposition::Retain
            }
            Err(RetryError::Cancelled) => Disposition::Abandon,
        }
    }
}

impl MessageHandler for ProjectionRouter {
    fn handle<'a>(
        &'a self,
        message: &'a EventMessage,
        shutdown: &'a Shutdown,
    ) -> BoxFuture<'a, Disposition> {
        Box::pin(self.route(message, shutdown))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use catalog_core::event::EventKind;
    use catalog_runtime::shutdown;
    use catalog_testing::fixtures::product;
    use catalog_testing::{InMemoryProductCache, InMemoryReadRepository};
    use std::sync::Arc;
    use std::time::Duration;

    fn router(store: &InMemoryReadRepository, delay: Duration) -> ProjectionRouter {
        let projection = ProductProjection::new(
            Arc::new(store.clone()),
            Arc::new(InMemoryProductCache::new()),
        );
        let policy = RetryPolicy::builder().max_attempts(3).delay(delay).build();
        ProjectionRouter::new(projection, EventTopics::default(), policy)
    }

    fn message(topic: &str, payload: Vec<u8>) -> EventMessage {
        EventMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload,
            timestamp: None,
            headers: catalog_core::event_bus::Headers::new(),
        }
    }

    fn created(product: &catalog_core::product::Product) -> EventMessage {
        let topics = EventTopics::default();
        let event = ProductEvent::created(product);
        message(topics.topic(EventKind::Created), event.encode().unwrap())
    }

    #[tokio::test]
    async fn valid_event_is_committed() {
        let store = InMemoryReadRepository::new();
        let widget = product("Widget", 999);

        let disposition = router(&store, Duration::from_millis(1))
            .handle(&created(&widget), &Shutdown::never())
            .await;

        assert_eq!(disposition, Disposition::Commit);
        assert_eq!(store.snapshot(widget.id), Some(widget));
    }

    #[tokio::test]
    async fn unknown_topic_and_garbage_are_skipped() {
        let store = InMemoryReadRepository::new();
        let router = router(&store, Duration::from_millis(1));
        let never = Shutdown::never();

        let unknown = router.handle(&message("elsewhere", vec![1]), &never).await;
        let garbage = router
            .handle(&message("product_created", vec![0xff, 0x00]), &never)
            .await;

        assert_eq!(unknown, Disposition::Skip);
        assert_eq!(garbage, Disposition::Skip);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn invalid_product_state_is_skipped() {
        let store = InMemoryReadRepository::new();
        let mut broken = product("Widget", 999);
        broken.price = catalog_core::product::Price::from_cents(-1);

        let disposition = router(&store, Duration::from_millis(1))
            .handle(&created(&broken), &Shutdown::never())
            .await;

        assert_eq!(disposition, Disposition::Skip);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn exhausted_store_failures_are_retained() {
        let store = InMemoryReadRepository::new();
        store.failures().set_always(true);

        let disposition = router(&store, Duration::from_millis(1))
            .handle(&created(&product("Widget", 999)), &Shutdown::never())
            .await;

        assert_eq!(disposition, Disposition::Retain);
        assert_eq!(store.writes(), 3);
    }

    #[tokio::test]
    async fn shutdown_during_backoff_abandons() {
        let store = InMemoryReadRepository::new();
        store.failures().set_always(true);
        let router = router(&store, Duration::from_secs(60));
        let (trigger, observer) = shutdown::channel();
        let widget = product("Widget", 999);
        let message = created(&widget);

        let handling = router.handle(&message, &observer);
        let (disposition, ()) = tokio::join!(handling, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        assert_eq!(disposition, Disposition::Abandon);
        assert_eq!(store.writes(), 1);
    }
}
