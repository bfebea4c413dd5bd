//! Applies product events to the projection store and keeps the cache in step.
//!
//! | Event | Projection store | Cache |
//! |---|---|---|
//! | Created | upsert if newer | put the stored state |
//! | Updated | overwrite if newer | put the stored state |
//! | Deleted | remove (idempotent) | invalidate |
//!
//! Store writes are conditional on `updated_at`: a redelivered or reordered
//! older state is reported as [`WriteOutcome::Stale`] and leaves both the
//! store and the cache untouched.
//!
//! The cache is best-effort. Its failures are logged, counted and swallowed;
//! only store failures reach the caller (and the retry executor).

use catalog_core::command::ProjectionCommand;
use catalog_core::product::{Product, ProductId};
use catalog_core::repository::{
    ProductCache, ProductReadRepository, RepositoryError, WriteOutcome,
};
use catalog_runtime::metrics::CacheMetrics;
use std::sync::Arc;

/// Projection applier and cache synchronizer.
#[derive(Clone)]
pub struct ProductProjection {
    store: Arc<dyn ProductReadRepository>,
    cache: Arc<dyn ProductCache>,
}

impl ProductProjection {
    /// Projection writing to `store` and mirroring into `cache`.
    #[must_use]
    pub fn new(store: Arc<dyn ProductReadRepository>, cache: Arc<dyn ProductCache>) -> Self {
        Self { store, cache }
    }

    /// Apply any projection command.
    ///
    /// # Errors
    ///
    /// Returns the projection store's error; cache errors never surface.
    pub async fn apply(&self, command: &ProjectionCommand) -> Result<(), RepositoryError> {
        match command {
            ProjectionCommand::Create(product) => self.created(product.clone()).await.map(drop),
            ProjectionCommand::Update(product) => self.updated(product.clone()).await.map(drop),
            ProjectionCommand::Delete(id) => self.deleted(*id).await,
        }
    }

    /// Handle `ProductCreated`.
    ///
    /// # Errors
    ///
    /// Returns the projection store's error.
    pub async fn created(&self, product: Product) -> Result<WriteOutcome, RepositoryError> {
        let outcome = self.store.create(product).await?;
        self.refresh(&outcome).await;
        Ok(outcome)
    }

    /// Handle `ProductUpdated`.
    ///
    /// # Errors
    ///
    /// Returns the projection store's error.
    pub async fn updated(&self, product: Product) -> Result<WriteOutcome, RepositoryError> {
        let outcome = self.store.update(product).await?;
        self.refresh(&outcome).await;
        Ok(outcome)
    }

    /// Handle `ProductDeleted`.
    ///
    /// # Errors
    ///
    /// Returns the projection store's error.
    pub async fn deleted(&self, id: ProductId) -> Result<(), RepositoryError> {
        self.store.delete(id).await?;
        if let Err(e) = self.cache.delete(id).await {
            CacheMetrics::record_error("delete");
            tracing::warn!(product_id = %id, error = %e, "Cache invalidation failed");
        }
        tracing::debug!(product_id = %id, "Product removed from projection");
        Ok(())
    }

    async fn refresh(&self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Applied(product) => {
                if let Err(e) = self.cache.put(product.clone()).await {
                    CacheMetrics::record_error("put");
                    tracing::warn!(product_id = %product.id, error = %e, "Cache write-through failed");
                }
                tracing::debug!(product_id = %product.id, "Projection updated");
            }
            WriteOutcome::Stale => {
                tracing::debug!("Older state ignored, projection already newer");
            }
        }
    }
}
