//! Handlers shared by every catalog service.

pub mod health;

pub use health::{health_check, ops_router};
