//! Command handlers for products.
//!
//! Every operation follows the same sequence:
//!
//! 1. validate the command (no side effect on failure);
//! 2. apply it to the transactional store;
//! 3. build the event from the committed state and publish it, keyed by the
//!    product id, with the current trace context in its headers.
//!
//! Nothing is published unless step 2 succeeded. A publish failure after a
//! successful commit is returned to the caller as [`CommandError::Publish`];
//! the store change stays in place.

use catalog_core::command::{
    CreateProduct, DeleteProduct, ProductCommand, UpdateProduct, Validate, ValidationError,
};
use catalog_core::event::{EncodeError, EventTopics, ProductEvent};
use catalog_core::event_bus::{EventBusError, EventPublisher, OutgoingMessage};
use catalog_core::product::{Product, ProductId};
use catalog_core::repository::{ProductRepository, RepositoryError};
use catalog_core::trace_context::inject_trace_headers;
use catalog_runtime::metrics::CommandMetrics;
use std::sync::Arc;
use thiserror::Error;
use tracing::Span;

/// Failure of a write-side operation.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    /// The command is invalid; nothing was written.
    #[error("invalid command: {0}")]
    Validation(#[from] ValidationError),

    /// The transactional store refused or failed the write.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The event could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The change is committed but its event was not published.
    #[error("event not published after commit: {0}")]
    Publish(#[from] EventBusError),
}

impl CommandError {
    /// Whether repeating the failed step could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_transient(),
            Self::Publish(_) => true,
            Self::Validation(_) | Self::Encode(_) => false,
        }
    }

    const fn outcome(&self) -> &'static str {
        match self {
            Self::Validation(_) => "rejected",
            Self::Repository(RepositoryError::NotFound(_) | RepositoryError::Conflict(_)) => {
                "refused"
            }
            Self::Repository(_) | Self::Encode(_) => "failed",
            Self::Publish(_) => "publish_failed",
        }
    }
}

/// Persist-then-publish service for product commands.
#[derive(Clone)]
pub struct ProductCommandService {
    repository: Arc<dyn ProductRepository>,
    publisher: Arc<dyn EventPublisher>,
    topics: EventTopics,
}

impl ProductCommandService {
    /// Service writing to `repository` and publishing on `topics`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ProductRepository>,
        publisher: Arc<dyn EventPublisher>,
        topics: EventTopics,
    ) -> Self {
        Self {
            repository,
            publisher,
            topics,
        }
    }

    /// Create a product and publish `ProductCreated`.
    ///
    /// # Errors
    ///
    /// See [`ProductCommandService::execute`].
    pub async fn create(&self, command: CreateProduct) -> Result<Product, CommandError> {
        let id = command.id;
        let product = noted("create", id, self.insert(command).await)?;
        self.publish_as("create", id, &ProductEvent::created(&product))
            .await?;
        Ok(product)
    }

    /// Update a product and publish `ProductUpdated`.
    ///
    /// # Errors
    ///
    /// See [`ProductCommandService::execute`]. An unknown id is
    /// [`RepositoryError::NotFound`].
    pub async fn update(&self, command: UpdateProduct) -> Result<Product, CommandError> {
        let id = command.id;
        let product = noted("update", id, self.modify(command).await)?;
        self.publish_as("update", id, &ProductEvent::updated(&product))
            .await?;
        Ok(product)
    }

    /// Delete a product and publish `ProductDeleted`.
    ///
    /// # Errors
    ///
    /// See [`ProductCommandService::execute`]. An unknown id is
    /// [`RepositoryError::NotFound`].
    pub async fn delete(&self, id: ProductId) -> Result<(), CommandError> {
        noted("delete", id, self.remove(DeleteProduct { id }).await)?;
        self.publish_as("delete", id, &ProductEvent::deleted(id))
            .await
    }

    /// Read the canonical record from the transactional store.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Repository`] on a missing product or a store
    /// failure.
    pub async fn get_by_id(&self, id: ProductId) -> Result<Product, CommandError> {
        Ok(self.repository.get_by_id(id).await?)
    }

    /// Validate, apply and publish `command`.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Validation`] before any side effect;
    /// - [`CommandError::Repository`] if the store write fails (nothing is
    ///   published);
    /// - [`CommandError::Encode`] / [`CommandError::Publish`] if the event could
    ///   not be sent after the commit.
    pub async fn execute(&self, command: ProductCommand) -> Result<ProductEvent, CommandError> {
        let event = self.apply(&command).await?;
        self.publish(&command, &event).await?;
        Ok(event)
    }

    /// `ProductCreated` for `command` if the store already holds exactly the
    /// record it creates, `None` if the id belongs to a different record.
    ///
    /// # Errors
    ///
    /// [`CommandError::Repository`] if the record cannot be read.
    pub async fn committed_create(
        &self,
        command: &CreateProduct,
    ) -> Result<Option<ProductEvent>, CommandError> {
        let stored = self.repository.get_by_id(command.id).await?;
        let same = stored.name == command.name
            && stored.description == command.description
            && stored.price == command.price;
        Ok(same.then(|| ProductEvent::created(&stored)))
    }

    /// Validate `command` and apply it to the store, without publishing.
    ///
    /// Returns the event describing the committed change.
    ///
    /// # Errors
    ///
    /// [`CommandError::Validation`] or [`CommandError::Repository`].
    pub async fn apply(&self, command: &ProductCommand) -> Result<ProductEvent, CommandError> {
        let result = match command {
            ProductCommand::Create(c) => self
                .insert(c.clone())
                .await
                .map(|product| ProductEvent::created(&product)),
            ProductCommand::Update(c) => self
                .modify(c.clone())
                .await
                .map(|product| ProductEvent::updated(&product)),
            ProductCommand::Delete(c) => self
                .remove(*c)
                .await
                .map(|()| ProductEvent::deleted(c.id)),
        };
        noted(command.name(), command.product_id(), result)
    }

    /// Publish `event` for an already committed `command`.
    ///
    /// # Errors
    ///
    /// [`CommandError::Encode`] or [`CommandError::Publish`].
    pub async fn publish(
        &self,
        command: &ProductCommand,
        event: &ProductEvent,
    ) -> Result<(), CommandError> {
        self.publish_as(command.name(), command.product_id(), event)
            .await
    }

    async fn insert(&self, command: CreateProduct) -> Result<Product, CommandError> {
        command.validate()?;
        Ok(self.repository.create(command).await?)
    }

    async fn modify(&self, command: UpdateProduct) -> Result<Product, CommandError> {
        command.validate()?;
        Ok(self.repository.update(command).await?)
    }

    async fn remove(&self, command: DeleteProduct) -> Result<(), CommandError> {
        command.validate()?;
        Ok(self.repository.delete(command.id).await?)
    }

    async fn publish_as(
        &self,
        command: &'static str,
        product_id: ProductId,
        event: &ProductEvent,
    ) -> Result<(), CommandError> {
        match self.publish_event(event).await {
            Ok(()) => {
                CommandMetrics::record(command, "applied");
                tracing::info!(command, product_id = %product_id, "Command applied and event published");
                Ok(())
            }
            Err(e) => {
                CommandMetrics::record(command, e.outcome());
                tracing::error!(
                    command,
                    product_id = %product_id,
                    error = %e,
                    "Change committed but event not published"
                );
                Err(e)
            }
        }
    }

    async fn publish_event(&self, event: &ProductEvent) -> Result<(), CommandError> {
        let payload = event.encode()?;
        let message = OutgoingMessage::new(self.topics.topic(event.kind()), event.key(), payload)
            .with_headers(inject_trace_headers(&Span::current()));
        self.publisher.publish(message).await?;
        Ok(())
    }
}

/// Record and log a failed store step.
fn noted<T>(
    command: &'static str,
    product_id: ProductId,
    result: Result<T, CommandError>,
) -> Result<T, CommandError> {
    if let Err(e) = &result {
        CommandMetrics::record(command, e.outcome());
        tracing::warn!(command, product_id = %product_id, error = %e, "Command not applied");
    }
    result
}
