//! Persist-then-publish behavior of the command service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use catalog_core::command::ValidationError;
use catalog_core::event::{EventKind, EventTopics, ProductEvent};
use catalog_core::product::{Price, ProductId};
use catalog_core::repository::RepositoryError;
use catalog_testing::fixtures::{create_widget, update_of};
use catalog_testing::{InMemoryBroker, InMemoryProductRepository};
use catalog_writer::{CommandError, ProductCommandService};
use std::sync::Arc;

struct Harness {
    repository: Arc<InMemoryProductRepository>,
    broker: InMemoryBroker,
    service: ProductCommandService,
    topics: EventTopics,
}

fn harness() -> Harness {
    let repository = Arc::new(InMemoryProductRepository::new());
    let broker = InMemoryBroker::new();
    let topics = EventTopics::default();
    let service = ProductCommandService::new(
        repository.clone(),
        Arc::new(broker.clone()),
        topics.clone(),
    );
    Harness {
        repository,
        broker,
        service,
        topics,
    }
}

#[tokio::test]
async fn create_publishes_committed_state_keyed_by_id() {
    let h = harness();

    let product = h.service.create(create_widget()).await.unwrap();

    let published = h.broker.published(h.topics.topic(EventKind::Created));
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key.as_deref(), Some(product.id.to_string().as_str()));
    let event = ProductEvent::decode(EventKind::Created, &published[0].payload).unwrap();
    assert_eq!(event, ProductEvent::created(&product));
    assert_eq!(h.repository.snapshot(product.id), Some(product));
}

#[tokio::test]
async fn failing_store_publishes_nothing() {
    let h = harness();
    h.repository.failures().set_always(true);

    let result = h.service.create(create_widget()).await;

    assert!(matches!(
        result,
        Err(CommandError::Repository(RepositoryError::Storage(_)))
    ));
    assert_eq!(h.broker.total_published(), 0);
}

#[tokio::test]
async fn invalid_command_touches_nothing() {
    let h = harness();
    let mut command = create_widget();
    command.price = Price::from_cents(0);

    let result = h.service.create(command).await;

    assert!(matches!(
        result,
        Err(CommandError::Validation(ValidationError::NonPositivePrice(_)))
    ));
    assert_eq!(h.repository.calls(), 0);
    assert_eq!(h.broker.total_published(), 0);
}

#[tokio::test]
async fn update_keeps_creation_time_and_publishes_new_state() {
    let h = harness();
    let created = h.service.create(create_widget()).await.unwrap();

    let updated = h
        .service
        .update(update_of(&created, "Widget Pro", 1299))
        .await
        .unwrap();

    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
    let published = h.broker.published(h.topics.topic(EventKind::Updated));
    let event = ProductEvent::decode(EventKind::Updated, &published[0].payload).unwrap();
    assert_eq!(event, ProductEvent::updated(&updated));
}

#[tokio::test]
async fn unknown_id_is_not_found_and_unpublished() {
    let h = harness();
    let missing = catalog_testing::fixtures::product("Ghost", 100);

    let update = h.service.update(update_of(&missing, "Ghost", 200)).await;
    let delete = h.service.delete(missing.id).await;

    assert!(matches!(
        update,
        Err(CommandError::Repository(RepositoryError::NotFound(id))) if id == missing.id
    ));
    assert!(matches!(
        delete,
        Err(CommandError::Repository(RepositoryError::NotFound(_)))
    ));
    assert_eq!(h.broker.total_published(), 0);
}

#[tokio::test]
async fn delete_publishes_identity_only() {
    let h = harness();
    let created = h.service.create(create_widget()).await.unwrap();

    h.service.delete(created.id).await.unwrap();

    let published = h.broker.published(h.topics.topic(EventKind::Deleted));
    assert_eq!(published.len(), 1);
    let event = ProductEvent::decode(EventKind::Deleted, &published[0].payload).unwrap();
    assert_eq!(event, ProductEvent::deleted(created.id));
    assert!(h.repository.snapshot(created.id).is_none());
}

#[tokio::test]
async fn publish_failure_after_commit_is_reported() {
    let h = harness();
    h.broker.set_publish_failing(true);
    let command = create_widget();
    let id = command.id;

    let result = h.service.create(command).await;

    assert!(matches!(result, Err(CommandError::Publish(_))));
    assert!(result.unwrap_err().is_transient());
    assert!(h.repository.snapshot(id).is_some(), "commit is not rolled back");
}

#[tokio::test]
async fn get_by_id_reads_the_canonical_record() {
    let h = harness();
    let created = h.service.create(create_widget()).await.unwrap();

    assert_eq!(h.service.get_by_id(created.id).await.unwrap(), created);
    assert!(matches!(
        h.service.get_by_id(ProductId::new()).await,
        Err(CommandError::Repository(RepositoryError::NotFound(_)))
    ));
}
