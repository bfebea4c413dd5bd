//! # Catalog Testing
//!
//! Testing utilities for the product catalog.
//!
//! This crate provides:
//! - [`InMemoryBroker`]: a partitioned event log with consumer groups
//! - in-memory transactional store, projection store and cache, each with
//!   failure injection and call counters
//! - deterministic clocks and product fixtures
//! - [`helpers::eventually`] for polling asynchronous outcomes
//!
//! ## Example
//!
//! ```ignore
//! use catalog_testing::{InMemoryBroker, InMemoryReadRepository, InMemoryProductCache};
//!
//! #[tokio::test]
//! async fn projection_follows_events() {
//!     let broker = InMemoryBroker::new();
//!     let store = InMemoryReadRepository::new();
//!     let cache = InMemoryProductCache::new();
//!     // wire a reader pool over `broker.consumer_group(..)` and publish events
//! }
//! ```

use chrono::{DateTime, Utc};
use catalog_core::environment::Clock;

pub mod broker;
pub mod stores;

pub use broker::{InMemoryBroker, InMemorySource, InMemorySourceFactory};
pub use stores::{
    FailureSwitch, InMemoryProductCache, InMemoryProductRepository, InMemoryReadRepository,
    TickingClock,
};

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use catalog_testing::mocks::FixedClock;
    /// use catalog_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::from_timestamp(1_735_689_600, 0).unwrap_or_default(),
        )
    }
}

/// Product and command fixtures.
pub mod fixtures {
    use super::Clock;
    use catalog_core::command::{CreateProduct, UpdateProduct};
    use catalog_core::product::{Price, Product, ProductId};

    /// A valid `CreateProduct` for "Widget" at 9.99.
    #[must_use]
    pub fn create_widget() -> CreateProduct {
        CreateProduct {
            id: ProductId::new(),
            name: "Widget".to_string(),
            description: "A standard widget".to_string(),
            price: Price::from_cents(999),
        }
    }

    /// An update of `product` to a new name and price.
    #[must_use]
    pub fn update_of(product: &Product, name: &str, cents: i64) -> UpdateProduct {
        UpdateProduct {
            id: product.id,
            name: name.to_string(),
            description: product.description.clone(),
            price: Price::from_cents(cents),
        }
    }

    /// A committed product stamped with the test clock.
    #[must_use]
    pub fn product(name: &str, cents: i64) -> Product {
        let now = super::mocks::test_clock().now();
        Product {
            id: ProductId::new(),
            name: name.to_string(),
            description: format!("{name} description"),
            price: Price::from_cents(cents),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::time::Duration;

    /// Poll `condition` every 5ms until it holds or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}
