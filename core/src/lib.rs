//! # Catalog Core
//!
//! Domain model, wire messages and ports shared by every catalog service.
//!
//! The catalog is split into a command side, which owns the transactional
//! store, and a query side, which maintains a projection store and a cache.
//! The two are synchronized through a partitioned event log:
//!
//! ```text
//! gateway ──command msg──▶ writer ──commit──▶ Postgres
//!                            │
//!                            └──event (key = id)──▶ log ──▶ reader workers
//!                                                            │
//!                                         projection store ◀─┴─▶ cache
//! ```
//!
//! ## Modules
//!
//! - [`product`]: the `Product` entity, ids and prices
//! - [`command`]: commands and their validation
//! - [`event`]: wire messages, the versioned envelope and topic routing
//! - [`event_bus`]: publisher / per-worker consumer ports
//! - [`repository`]: store and cache ports
//! - [`trace_context`]: W3C trace propagation through message headers
//! - [`config`]: service configuration

pub use chrono::{DateTime, Utc};

pub mod command;
pub mod config;
pub mod event;
pub mod event_bus;
pub mod product;
pub mod repository;
pub mod trace_context;

pub use command::{
    CreateProduct, DeleteProduct, ProductCommand, ProjectionCommand, UpdateProduct, Validate,
    ValidationError,
};
pub use event::{CommandKind, CommandMessage, DecodeError, EventKind, ProductEvent};
pub use event_bus::{EventBusError, EventMessage, EventPublisher, MessageSource, OutgoingMessage};
pub use product::{Price, Product, ProductId};
pub use repository::{
    CacheError, Pagination, ProductCache, ProductReadRepository, ProductRepository,
    ProductsList, RepositoryError, WriteOutcome,
};

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The transactional store stamps `created_at` / `updated_at` from a clock,
    /// so tests can control event ordering.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
