//! Storage ports for the command and query sides.
//!
//! - [`ProductRepository`]: the transactional store, authoritative for products.
//! - [`ProductReadRepository`]: the projection store, fed only by events.
//! - [`ProductCache`]: best-effort key/value cache in front of the projection.
//!
//! All three use explicit boxed futures so they can be shared as
//! `Arc<dyn Trait>` between workers and HTTP handlers.

use crate::command::{CreateProduct, UpdateProduct, ValidationError};
use crate::product::{Product, ProductId};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from either product store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No product with this id
    #[error("product {0} not found")]
    NotFound(ProductId),

    /// A product with this id already exists
    #[error("product {0} already exists")]
    Conflict(ProductId),

    /// Connection, query or pool failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Stored data could not be converted
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Errors from the cache. Callers log and swallow these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Cannot reach the cache
    #[error("cache connection error: {0}")]
    Connection(String),

    /// The cache rejected a command
    #[error("cache command error: {0}")]
    Command(String),

    /// A cached value could not be (de)serialized
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

/// Result of a conditional projection write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written; carries the stored state.
    Applied(Product),
    /// The store already holds a newer state; nothing changed.
    Stale,
}

/// Page selection for searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    page: u32,
    size: u32,
}

impl Pagination {
    /// Default page (1-based)
    pub const DEFAULT_PAGE: u32 = 1;
    /// Default page size
    pub const DEFAULT_SIZE: u32 = 10;
    /// Largest accepted page size
    pub const MAX_SIZE: u32 = 100;

    /// Build a validated pagination.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPagination`] if `page` is zero or
    /// `size` is outside `1..=MAX_SIZE`.
    pub fn new(page: u32, size: u32) -> Result<Self, ValidationError> {
        if page == 0 {
            return Err(ValidationError::InvalidPagination(
                "page must be at least 1".to_string(),
            ));
        }
        if size == 0 || size > Self::MAX_SIZE {
            return Err(ValidationError::InvalidPagination(format!(
                "size must be between 1 and {}",
                Self::MAX_SIZE
            )));
        }
        Ok(Self { page, size })
    }

    /// Build from optional query parameters, applying defaults.
    ///
    /// # Errors
    ///
    /// Same as [`Pagination::new`].
    pub fn from_query(page: Option<u32>, size: Option<u32>) -> Result<Self, ValidationError> {
        Self::new(
            page.unwrap_or(Self::DEFAULT_PAGE),
            size.unwrap_or(Self::DEFAULT_SIZE),
        )
    }

    /// 1-based page number.
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }

    /// Page size.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Number of rows to skip.
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: Self::DEFAULT_PAGE,
            size: Self::DEFAULT_SIZE,
        }
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductsList {
    /// Matches across all pages
    pub total_count: u64,
    /// Number of pages at this size
    pub total_pages: u64,
    /// This page (1-based)
    pub page: u32,
    /// Page size
    pub size: u32,
    /// Whether a later page exists
    pub has_more: bool,
    /// Products on this page
    pub products: Vec<Product>,
}

impl ProductsList {
    /// Assemble a page from its rows and the total match count.
    #[must_use]
    pub fn new(products: Vec<Product>, total_count: u64, pagination: Pagination) -> Self {
        let total_pages = total_count.div_ceil(u64::from(pagination.size()));
        Self {
            total_count,
            total_pages,
            page: pagination.page(),
            size: pagination.size(),
            has_more: u64::from(pagination.page()) < total_pages,
            products,
        }
    }
}

/// The transactional (command-side) store.
pub trait ProductRepository: Send + Sync {
    /// Insert a new product, stamping `created_at` and `updated_at`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if the id exists, [`RepositoryError::Storage`]
    /// on a database failure.
    fn create(&self, command: CreateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>>;

    /// Overwrite name, description and price, bumping `updated_at`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown.
    fn update(&self, command: UpdateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>>;

    /// Delete a product.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown.
    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Read the canonical record.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the id is unknown.
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>>;
}

/// The projection (query-side) store.
///
/// Create and update are conditional on `updated_at`: a state older than the
/// stored one is reported as [`WriteOutcome::Stale`] and not written.
pub trait ProductReadRepository: Send + Sync {
    /// Insert, or overwrite an existing record that is not newer.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on a database failure.
    fn create(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>>;

    /// Overwrite a record that is not newer (inserting it if missing).
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on a database failure.
    fn update(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>>;

    /// Remove a record. Removing a missing record succeeds.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on a database failure.
    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Read one record.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if absent.
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>>;

    /// Case-insensitive match on name or description, newest first.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on a database failure.
    fn search(
        &self,
        text: String,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<ProductsList, RepositoryError>>;
}

/// Best-effort product cache.
pub trait ProductCache: Send + Sync {
    /// Look up a product. `Ok(None)` is a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the cache is unreachable or the value is corrupt.
    fn get(&self, id: ProductId) -> BoxFuture<'_, Result<Option<Product>, CacheError>>;

    /// Store a product.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on failure.
    fn put(&self, product: Product) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Store a product only if no entry exists for its id.
    ///
    /// Used to populate the cache from a read, so that a concurrent
    /// write-through of a newer state is never overwritten. Returns whether
    /// the entry was written.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on failure.
    fn fill(&self, product: Product) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Drop a product.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on failure.
    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), CacheError>>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        assert_eq!(Pagination::from_query(None, None).unwrap(), Pagination::default());
        assert!(Pagination::new(0, 10).is_err());
        assert!(Pagination::new(1, 0).is_err());
        assert!(Pagination::new(1, 101).is_err());
        assert_eq!(Pagination::new(3, 20).unwrap().offset(), 40);
    }

    #[test]
    fn products_list_computes_pages() {
        let list = ProductsList::new(Vec::new(), 21, Pagination::new(2, 10).unwrap());
        assert_eq!(list.total_pages, 3);
        assert!(list.has_more);

        let last = ProductsList::new(Vec::new(), 21, Pagination::new(3, 10).unwrap());
        assert!(!last.has_more);

        let empty = ProductsList::new(Vec::new(), 0, Pagination::default());
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }

    #[test]
    fn only_storage_errors_are_transient() {
        assert!(RepositoryError::Storage("timeout".to_string()).is_transient());
        assert!(!RepositoryError::NotFound(ProductId::new()).is_transient());
        assert!(!RepositoryError::Conflict(ProductId::new()).is_transient());
    }
}
