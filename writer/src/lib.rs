//! # Catalog Writer
//!
//! Command side of the product catalog. Consumes command messages from the
//! command topics, applies them to the transactional store and publishes the
//! resulting events:
//!
//! ```text
//! command topics ──▶ ConsumerPool ──▶ CommandRouter ──▶ ProductCommandService
//!                                                        │ 1. store (Postgres)
//!                                                        └ 2. publish (event topics)
//! ```

pub mod handlers;
pub mod router;

pub use handlers::{CommandError, ProductCommandService};
pub use router::CommandRouter;
