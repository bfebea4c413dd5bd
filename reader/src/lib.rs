//! # Catalog Reader
//!
//! Query side of the product catalog.
//!
//! ```text
//! event topics ──▶ ConsumerPool ──▶ ProjectionRouter ──▶ ProductProjection
//!                                                         ├ projection store
//!                                                         └ cache
//! HTTP ──▶ ProductQueries ──▶ cache ──(miss)──▶ projection store
//! ```
//!
//! The projection is eventually consistent with the transactional store: it
//! only ever changes in response to events.

pub mod http;
pub mod projection;
pub mod queries;
pub mod router;

pub use projection::ProductProjection;
pub use queries::{ProductQueries, QueryError};
pub use router::ProjectionRouter;
