//! # Catalog Runtime
//!
//! Execution machinery shared by the writer and reader services.
//!
//! ## Core Components
//!
//! - **Consumer pool**: N workers, one consumer-group membership each, with
//!   per-message commit / skip / retain decisions
//! - **Retry executor**: bounded retries that abort on shutdown
//! - **Shutdown**: the cancellation signal shared by workers and retries
//! - **Metrics**: Prometheus recorder and counters
//! - **Telemetry**: subscriber setup shared by the binaries
//!
//! ## Example
//!
//! ```ignore
//! use catalog_runtime::{consumer::ConsumerPool, shutdown};
//!
//! let (trigger, observer) = shutdown::channel();
//! let pool = ConsumerPool::new("reader", factory, handler).with_pool_size(30);
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     trigger.trigger();
//! });
//!
//! pool.run(observer).await?;
//! ```

/// Consumer worker pool
pub mod consumer;

/// Bounded retry with cancellation
pub mod retry;

/// Cooperative shutdown signal
pub mod shutdown;

/// Prometheus metrics for observability
pub mod metrics;

/// Tracing subscriber and trace-context setup
pub mod telemetry;

pub use consumer::{ConsumerPool, ConsumerStats, Disposition, MessageHandler};
pub use retry::{RetryError, RetryPolicy};
pub use shutdown::{Shutdown, ShutdownTrigger};
