//! Cooperative cancellation shared by workers and retry loops.
//!
//! A thin wrapper over `tokio::sync::watch`: the trigger flips the flag to
//! `true` once, and every [`Shutdown`] observer sees it.

use std::sync::Arc;
use tokio::sync::watch;

/// Sending half. Dropping it does not signal shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving half, cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Keeps the channel open for observers created by `Shutdown::never`.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

/// Create a connected trigger/observer pair.
#[must_use]
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (
        ShutdownTrigger { tx: Arc::new(tx) },
        Shutdown {
            rx,
            _keepalive: None,
        },
    )
}

impl ShutdownTrigger {
    /// Signal every observer.
    pub fn trigger(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }

    /// Create another observer.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }
}

impl Shutdown {
    /// An observer that is never triggered.
    #[must_use]
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    /// Whether shutdown has been signalled.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown is signalled.
    ///
    /// If every trigger is dropped without firing, this never resolves.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
