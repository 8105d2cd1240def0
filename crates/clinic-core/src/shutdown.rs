//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] is a cloneable, level-triggered flag: once triggered it
//! stays triggered, so long-running loops can either poll it between units of
//! work ([`ShutdownSignal::is_triggered`]) or await it inside `select!`
//! ([`ShutdownSignal::cancelled`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use clinic_core::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//! let worker_shutdown = shutdown.clone();
//!
//! tokio::spawn(async move {
//!     loop {
//!         tokio::select! {
//!             _ = worker_shutdown.cancelled() => break,
//!             // ... do work
//!         }
//!     }
//! });
//!
//! shutdown.wait_for_os_signal().await?;
//! ```

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Default shutdown timeout in seconds.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// A signal for coordinating graceful shutdown across components.
///
/// All clones share the same state: triggering any clone is observed by all.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
    /// How long the process waits for in-flight work after triggering.
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    /// Create a new shutdown signal with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            timeout,
        }
    }

    /// Get the shutdown timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        let already = self.sender.send_replace(true);
        if !already {
            info!("shutdown requested");
        }
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered (immediately if it already was).
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot observe a closed channel.
        let _ = receiver.wait_for(|triggered| *triggered).await;
    }

    /// Block until SIGINT or SIGTERM arrives (or the signal is triggered
    /// programmatically), then trigger shutdown.
    pub async fn wait_for_os_signal(&self) -> io::Result<()> {
        #[cfg(unix)]
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        #[cfg(unix)]
        let terminate = async move {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = self.cancelled() => {}
        }

        self.trigger();
        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
