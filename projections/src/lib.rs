//! Query-side storage for the product catalog.
//!
//! # Overview
//!
//! - [`PostgresReadRepository`]: the product read model, fed only by events
//! - [`RedisProductCache`]: best-effort cache in front of the read model
//!
//! # CQRS Separation
//!
//! The read model lives in its own database:
//!
//! ```text
//! Product DB (Write)  →  Event Log  →  Read DB (projection) + Redis (cache)
//! ```

pub mod postgres;
pub mod cache;

pub use self::postgres::PostgresReadRepository;
pub use cache::RedisProductCache;
