//! Read path: cache-aside lookups and projection-store searches.

use catalog_core::command::ValidationError;
use catalog_core::product::{Product, ProductId};
use catalog_core::repository::{
    Pagination, ProductCache, ProductReadRepository, ProductsList, RepositoryError,
};
use catalog_runtime::metrics::CacheMetrics;
use std::sync::Arc;
use thiserror::Error;

/// Failure of a query.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// No such product in the projection.
    #[error("product {0} not found")]
    NotFound(ProductId),

    /// The request itself is invalid.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// The projection store failed.
    #[error("projection store failed: {0}")]
    Store(RepositoryError),
}

impl From<RepositoryError> for QueryError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// Query resolver over the projection store and the cache.
#[derive(Clone)]
pub struct ProductQueries {
    store: Arc<dyn ProductReadRepository>,
    cache: Arc<dyn ProductCache>,
}

impl ProductQueries {
    /// Resolver reading `store` through `cache`.
    #[must_use]
    pub fn new(store: Arc<dyn ProductReadRepository>, cache: Arc<dyn ProductCache>) -> Self {
        Self { store, cache }
    }

    /// Fetch one product, cache first.
    ///
    /// A cache miss or cache error falls back to the projection store; a
    /// store hit is then filled into the cache on a best-effort basis. The
    /// fill never replaces an entry, so a newer state written through by the
    /// projection in the meantime wins.
    ///
    /// # Errors
    ///
    /// [`QueryError::NotFound`] or [`QueryError::Store`] from the projection
    /// store. Cache errors never surface.
    pub async fn get_by_id(&self, id: ProductId) -> Result<Product, QueryError> {
        match self.cache.get(id).await {
            Ok(Some(product)) => {
                CacheMetrics::record_lookup("hit");
                return Ok(product);
            }
            Ok(None) => CacheMetrics::record_lookup("miss"),
            Err(e) => {
                CacheMetrics::record_lookup("error");
                tracing::warn!(product_id = %id, error = %e, "Cache lookup failed, reading projection");
            }
        }

        let product = self.store.get_by_id(id).await?;

        match self.cache.fill(product.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(product_id = %id, "Cache already holds an entry, fill skipped");
            }
            Err(e) => {
                CacheMetrics::record_error("fill");
                tracing::warn!(product_id = %id, error = %e, "Cache fill failed");
            }
        }
        Ok(product)
    }

    /// Case-insensitive search on name or description, newest first.
    ///
    /// # Errors
    ///
    /// [`QueryError::Store`] if the projection store fails.
    pub async fn search(
        &self,
        text: &str,
        pagination: Pagination,
    ) -> Result<ProductsList, QueryError> {
        Ok(self.store.search(text.trim().to_string(), pagination).await?)
    }
}
