//! Axum integration for the product catalog.
//!
//! # Overview
//!
//! This crate provides:
//! - [`AppError`]: domain errors rendered as JSON HTTP responses
//! - [`middleware::correlation_id`]: per-request correlation ids and spans
//! - [`dto`]: the JSON shapes of the product API
//! - [`handlers::ops_router`]: `/health` and `/metrics` for every service
//! - [`gateway`]: the public API gateway (writes to the command log, reads
//!   through the reader service)

pub mod dto;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use handlers::ops_router;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id};

/// Result type for catalog HTTP handlers.
pub type WebResult<T> = Result<T, AppError>;
