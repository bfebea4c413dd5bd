//! Consumer worker pool.
//!
//! A [`ConsumerPool`] runs a fixed number of workers. Each worker owns one
//! [`MessageSource`] (one consumer-group membership), so the broker assigns
//! every worker a disjoint set of partitions and per-key ordering holds as
//! long as a worker handles one message at a time, which it does.
//!
//! ```text
//!            ┌──────────── shutdown (watch) ────────────┐
//!            ▼                    ▼                      ▼
//!      ┌──────────┐         ┌──────────┐           ┌──────────┐
//!      │ worker 0 │         │ worker 1 │    ...    │ worker N │
//!      │ p0, p3   │         │ p1, p4   │           │ p2, p5   │
//!      └────┬─────┘         └────┬─────┘           └────┬─────┘
//!           │ fetch → handle → commit / skip / retain    │
//!           └────────────────────┴──────────────────────┘
//! ```
//!
//! The handler decides what happens to the offset by returning a
//! [`Disposition`]:
//!
//! | Disposition | Offset | Counter |
//! |---|---|---|
//! | `Commit` | committed | - |
//! | `Skip` | committed | poison |
//! | `Retain` | rewound to the message | failed |
//! | `Abandon` | untouched | - |

use crate::metrics::ConsumerMetrics;
use crate::shutdown::Shutdown;
use catalog_core::event_bus::{EventBusError, EventMessage, MessageSource, MessageSourceFactory};
use catalog_core::trace_context::attach_remote_parent;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Default number of workers.
pub const DEFAULT_POOL_SIZE: usize = 30;

const FETCH_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// What to do with a message's offset after handling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Applied: commit the offset.
    Commit,
    /// Poison: commit the offset so the partition moves on.
    Skip,
    /// Retries exhausted: do not commit; redeliver later.
    Retain,
    /// Interrupted by shutdown: leave the offset alone.
    Abandon,
}

impl Disposition {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "applied",
            Self::Skip => "poison",
            Self::Retain => "failed",
            Self::Abandon => "abandoned",
        }
    }
}

/// Handles one message at a time for a worker.
///
/// Implementations must be safe to share between workers.
pub trait MessageHandler: Send + Sync {
    /// Handle `message`, observing `shutdown` only while waiting (retry backoff).
    fn handle<'a>(
        &'a self,
        message: &'a EventMessage,
        shutdown: &'a Shutdown,
    ) -> BoxFuture<'a, Disposition>;
}

/// Errors that stop the pool from starting.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// A worker could not join the consumer group.
    #[error("worker {worker_id} could not create its message source: {source}")]
    SourceCreation {
        /// Worker that failed
        worker_id: usize,
        /// Underlying error
        source: EventBusError,
    },
}

/// In-process counters, shared by all workers of a pool.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    handled: AtomicU64,
    committed: AtomicU64,
    poison: AtomicU64,
    failed: AtomicU64,
    fetch_errors: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    /// Messages handed to the handler
    pub handled: u64,
    /// Offsets committed (applied or poison)
    pub committed: u64,
    /// Messages skipped as poison
    pub poison: u64,
    /// Messages retained after exhausting retries
    pub failed: u64,
    /// Fetch errors
    pub fetch_errors: u64,
}

impl ConsumerStats {
    /// Read all counters.
    #[must_use]
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            poison: self.poison.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size pool of consumer workers.
pub struct ConsumerPool {
    name: String,
    factory: Arc<dyn MessageSourceFactory>,
    handler: Arc<dyn MessageHandler>,
    pool_size: usize,
    stats: Arc<ConsumerStats>,
}

impl ConsumerPool {
    /// Create a pool with [`DEFAULT_POOL_SIZE`] workers.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn MessageSourceFactory>,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            factory,
            handler,
            pool_size: DEFAULT_POOL_SIZE,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Set the number of workers (at least one).
    #[must_use]
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size.max(1);
        self
    }

    /// Shared counters of this pool.
    #[must_use]
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Join the group with every worker and run until `shutdown` fires.
    ///
    /// Returns once every worker has finished its in-flight message and
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::SourceCreation`] if any worker cannot create its
    /// source; no worker is started in that case.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ConsumerError> {
        let mut sources = Vec::with_capacity(self.pool_size);
        for worker_id in 0..self.pool_size {
            let source = self
                .factory
                .create(worker_id)
                .await
                .map_err(|source| ConsumerError::SourceCreation { worker_id, source })?;
            sources.push(source);
        }

        tracing::info!(pool = %self.name, workers = self.pool_size, "Starting consumer pool");

        let mut workers = JoinSet::new();
        for (worker_id, source) in sources.into_iter().enumerate() {
            let worker = Worker {
                id: worker_id,
                pool: self.name.clone(),
                source,
                handler: Arc::clone(&self.handler),
                stats: Arc::clone(&self.stats),
                shutdown: shutdown.clone(),
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(pool = %self.name, error = %e, "Consumer worker terminated abnormally");
            }
        }

        tracing::info!(pool = %self.name, "Consumer pool stopped");
        Ok(())
    }
}

struct Worker {
    id: usize,
    pool: String,
    source: Box<dyn MessageSource>,
    handler: Arc<dyn MessageHandler>,
    stats: Arc<ConsumerStats>,
    shutdown: Shutdown,
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!(pool = %self.pool, worker_id = self.id, "Worker started");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let fetched = tokio::select! {
                biased;
                () = self.shutdown.wait() => break,
                result = self.source.fetch() => result,
            };

            let message = match fetched {
                Ok(message) => message,
                Err(EventBusError::Closed) => {
                    tracing::info!(pool = %self.pool, worker_id = self.id, "Message source closed");
                    break;
                }
                Err(e) => {
                    tracing::warn!(pool = %self.pool, worker_id = self.id, error = %e, "Fetch failed");
                    self.stats.fetch_errors.fetch_add(1, Ordering::Relaxed);
                    ConsumerMetrics::record_fetch_error();
                    tokio::select! {
                        () = tokio::time::sleep(FETCH_ERROR_BACKOFF) => {}
                        () = self.shutdown.wait() => break,
                    }
                    continue;
                }
            };

            self.process(&message).await;
        }

        tracing::debug!(pool = %self.pool, worker_id = self.id, "Worker stopped");
    }

    async fn process(&mut self, message: &EventMessage) {
        let span = tracing::info_span!(
            "consume",
            worker_id = self.id,
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
        );
        attach_remote_parent(&span, &message.headers);

        let disposition = self
            .handler
            .handle(message, &self.shutdown)
            .instrument(span.clone())
            .await;

        self.stats.handled.fetch_add(1, Ordering::Relaxed);
        ConsumerMetrics::record_message(&message.topic, disposition.as_str());

        self.settle(message, disposition).instrument(span).await;
    }

    async fn settle(&mut self, message: &EventMessage, disposition: Disposition) {
        match disposition {
            Disposition::Commit => {
                self.commit(message).await;
            }
            Disposition::Skip => {
                tracing::warn!("Skipping poison message");
                self.stats.poison.fetch_add(1, Ordering::Relaxed);
                ConsumerMetrics::record_poison(&message.topic);
                self.commit(message).await;
            }
            Disposition::Retain => {
                tracing::error!("Message not applied after retries, leaving offset uncommitted");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                ConsumerMetrics::record_failure(&message.topic);
                if let Err(e) = self.source.rewind(message).await {
                    tracing::warn!(error = %e, "Failed to rewind partition");
                }
            }
            Disposition::Abandon => {
                tracing::info!("Message abandoned on shutdown");
            }
        }
    }

    async fn commit(&mut self, message: &EventMessage) {
        match self.source.commit(message).await {
            Ok(()) => {
                self.stats.committed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Offset commit failed");
            }
        }
    }
}
