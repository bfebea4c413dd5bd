//! In-memory stores and cache with failure injection.
//!
//! - [`InMemoryProductRepository`]: the transactional store
//! - [`InMemoryReadRepository`]: the projection store
//! - [`InMemoryProductCache`]: the cache
//!
//! Each one owns a [`FailureSwitch`] so tests can make it fail the next N
//! calls or every call, and counts the calls that reached it.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap on poisoned locks

use catalog_core::command::{CreateProduct, UpdateProduct};
use catalog_core::environment::Clock;
use catalog_core::product::{Product, ProductId};
use catalog_core::repository::{
    CacheError, Pagination, ProductCache, ProductReadRepository, ProductRepository, ProductsList,
    RepositoryError, WriteOutcome,
};
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Switch that makes a fake fail on demand.
#[derive(Debug, Default)]
pub struct FailureSwitch {
    always: AtomicBool,
    remaining: AtomicU32,
}

impl FailureSwitch {
    /// Fail every call until switched off.
    pub fn set_always(&self, failing: bool) {
        self.always.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Whether the current call should fail. Consumes one pending failure.
    pub fn trip(&self) -> bool {
        if self.always.load(Ordering::SeqCst) {
            return true;
        }
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Clock that advances by one millisecond on every reading.
///
/// Gives every write a distinct, increasing timestamp without sleeping.
#[derive(Debug)]
pub struct TickingClock {
    next: Mutex<DateTime<Utc>>,
}

impl TickingClock {
    /// Start ticking from `start`.
    #[must_use]
    pub const fn new(start: DateTime<Utc>) -> Self {
        Self {
            next: Mutex::new(start),
        }
    }
}

impl Default for TickingClock {
    fn default() -> Self {
        Self::new(crate::mocks::test_clock().now())
    }
}

impl Clock for TickingClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + Duration::milliseconds(1);
        now
    }
}

fn injected(operation: &str) -> RepositoryError {
    RepositoryError::Storage(format!("injected failure in {operation}"))
}

// ---------------------------------------------------------------------------
// Transactional store
// ---------------------------------------------------------------------------

/// In-memory transactional store.
#[derive(Clone)]
pub struct InMemoryProductRepository {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    clock: Arc<dyn Clock>,
    failures: Arc<FailureSwitch>,
    calls: Arc<AtomicUsize>,
}

impl Default for InMemoryProductRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProductRepository {
    /// Empty store stamping times from a [`TickingClock`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TickingClock::default()))
    }

    /// Empty store stamping times from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            products: Arc::new(RwLock::new(HashMap::new())),
            clock,
            failures: Arc::new(FailureSwitch::default()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Failure injection for this store.
    #[must_use]
    pub fn failures(&self) -> &FailureSwitch {
        &self.failures
    }

    /// Calls that reached the store, failed ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current record, bypassing failure injection.
    #[must_use]
    pub fn snapshot(&self, id: ProductId) -> Option<Product> {
        self.products.read().unwrap().get(&id).cloned()
    }

    /// Number of stored products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.read().unwrap().is_empty()
    }

    fn enter(&self, operation: &str) -> Result<(), RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.trip() {
            return Err(injected(operation));
        }
        Ok(())
    }
}

impl ProductRepository for InMemoryProductRepository {
    fn create(&self, command: CreateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            self.enter("create")?;
            let mut products = self.products.write().unwrap();
            if products.contains_key(&command.id) {
                return Err(RepositoryError::Conflict(command.id));
            }
            let now = self.clock.now();
            let product = Product {
                id: command.id,
                name: command.name,
                description: command.description,
                price: command.price,
                created_at: now,
                updated_at: now,
            };
            products.insert(product.id, product.clone());
            Ok(product)
        })
    }

    fn update(&self, command: UpdateProduct) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            self.enter("update")?;
            let mut products = self.products.write().unwrap();
            let existing = products
                .get_mut(&command.id)
                .ok_or(RepositoryError::NotFound(command.id))?;
            existing.name = command.name;
            existing.description = command.description;
            existing.price = command.price;
            existing.updated_at = self.clock.now().max(existing.created_at);
            Ok(existing.clone())
        })
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.enter("delete")?;
            self.products
                .write()
                .unwrap()
                .remove(&id)
                .map(|_| ())
                .ok_or(RepositoryError::NotFound(id))
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            self.enter("get_by_id")?;
            self.snapshot(id).ok_or(RepositoryError::NotFound(id))
        })
    }
}

// ---------------------------------------------------------------------------
// Projection store
// ---------------------------------------------------------------------------

/// In-memory projection store with apply-if-newer writes.
#[derive(Clone, Default)]
pub struct InMemoryReadRepository {
    products: Arc<RwLock<HashMap<ProductId, Product>>>,
    failures: Arc<FailureSwitch>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryReadRepository {
    /// Empty projection store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection for this store.
    #[must_use]
    pub fn failures(&self) -> &FailureSwitch {
        &self.failures
    }

    /// `get_by_id` calls that reached the store.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Create / update / delete calls that reached the store.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current record, bypassing failure injection and counters.
    #[must_use]
    pub fn snapshot(&self, id: ProductId) -> Option<Product> {
        self.products.read().unwrap().get(&id).cloned()
    }

    /// Insert a record directly.
    pub fn seed(&self, product: Product) {
        self.products.write().unwrap().insert(product.id, product);
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.products.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.read().unwrap().is_empty()
    }

    fn upsert_if_newer(&self, product: Product) -> Result<WriteOutcome, RepositoryError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.failures.trip() {
            return Err(injected("upsert"));
        }
        let mut products = self.products.write().unwrap();
        if let Some(existing) = products.get(&product.id) {
            if !product.is_not_older_than(existing) {
                return Ok(WriteOutcome::Stale);
            }
        }
        products.insert(product.id, product.clone());
        Ok(WriteOutcome::Applied(product))
    }
}

impl ProductReadRepository for InMemoryReadRepository {
    fn create(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>> {
        Box::pin(async move { self.upsert_if_newer(product) })
    }

    fn update(&self, product: Product) -> BoxFuture<'_, Result<WriteOutcome, RepositoryError>> {
        Box::pin(async move { self.upsert_if_newer(product) })
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), RepositoryError>> {
        Box::pin(async move {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.failures.trip() {
                return Err(injected("delete"));
            }
            self.products.write().unwrap().remove(&id);
            Ok(())
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Result<Product, RepositoryError>> {
        Box::pin(async move {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failures.trip() {
                return Err(injected("get_by_id"));
            }
            self.snapshot(id).ok_or(RepositoryError::NotFound(id))
        })
    }

    fn search(
        &self,
        text: String,
        pagination: Pagination,
    ) -> BoxFuture<'_, Result<ProductsList, RepositoryError>> {
        Box::pin(async move {
            if self.failures.trip() {
                return Err(injected("search"));
            }
            let needle = text.to_lowercase();
            let mut matches: Vec<Product> = self
                .products
                .read()
                .unwrap()
                .values()
                .filter(|p| {
                    p.name.to_lowercase().contains(&needle)
                        || p.description.to_lowercase().contains(&needle)
                })
                .cloned()
                .collect();
            matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

            let total = u64::try_from(matches.len()).unwrap_or(u64::MAX);
            let page = matches
                .into_iter()
                .skip(usize::try_from(pagination.offset()).unwrap_or(usize::MAX))
                .take(usize::try_from(pagination.size()).unwrap_or(usize::MAX))
                .collect();
            Ok(ProductsList::new(page, total, pagination))
        })
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// In-memory product cache.
#[derive(Clone, Default)]
pub struct InMemoryProductCache {
    entries: Arc<RwLock<HashMap<ProductId, Product>>>,
    failures: Arc<FailureSwitch>,
    hits: Arc<AtomicUsize>,
    misses: Arc<AtomicUsize>,
}

impl InMemoryProductCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failure injection for this cache.
    #[must_use]
    pub fn failures(&self) -> &FailureSwitch {
        &self.failures
    }

    /// Successful lookups that found an entry.
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Successful lookups that found nothing.
    #[must_use]
    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::SeqCst)
    }

    /// Current entry, bypassing failure injection and counters.
    #[must_use]
    pub fn snapshot(&self, id: ProductId) -> Option<Product> {
        self.entries.read().unwrap().get(&id).cloned()
    }

    /// Insert an entry directly.
    pub fn seed(&self, product: Product) {
        self.entries.write().unwrap().insert(product.id, product);
    }

    fn enter(&self) -> Result<(), CacheError> {
        if self.failures.trip() {
            return Err(CacheError::Connection("injected cache failure".to_string()));
        }
        Ok(())
    }
}

impl ProductCache for InMemoryProductCache {
    fn get(&self, id: ProductId) -> BoxFuture<'_, Result<Option<Product>, CacheError>> {
        Box::pin(async move {
            self.enter()?;
            let found = self.snapshot(id);
            if found.is_some() {
                self.hits.fetch_add(1, Ordering::SeqCst);
            } else {
                self.misses.fetch_add(1, Ordering::SeqCst);
            }
            Ok(found)
        })
    }

    fn put(&self, product: Product) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.enter()?;
            self.seed(product);
            Ok(())
        })
    }

    fn fill(&self, product: Product) -> BoxFuture<'_, Result<bool, CacheError>> {
        Box::pin(async move {
            self.enter()?;
            let mut entries = self.entries.write().unwrap();
            if entries.contains_key(&product.id) {
                return Ok(false);
            }
            entries.insert(product.id, product);
            Ok(true)
        })
    }

    fn delete(&self, id: ProductId) -> BoxFuture<'_, Result<(), CacheError>> {
        Box::pin(async move {
            self.enter()?;
            self.entries.write().unwrap().remove(&id);
            Ok(())
        })
    }
}
