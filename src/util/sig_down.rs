//! Graceful shutdown signal handling.
//!
//! [`SigDown`] listens for SIGTERM and SIGINT and cancels a [`CancellationToken`] when
//! either arrives. The HTTP server stops accepting connections on cancellation and
//! lets in-flight handoffs finish.
//!
//! # Example
//!
//! ```no_run
//! # async fn demo() -> Result<(), std::io::Error> {
//! use vault_handoff::util::SigDown;
//!
//! let sig_down = SigDown::try_new()?;
//! let token = sig_down.cancellation_token();
//! tokio::spawn(async move {
//!     token.cancelled().await;
//!     tracing::info!("Shutting down");
//! });
//! sig_down.recv().await;
//! # Ok(())
//! # }
//! ```

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Handles graceful shutdown on SIGTERM and SIGINT signals.
pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let inner = CancellationToken::new();
        let outer = inner.clone();
        let task_tracker = TaskTracker::new();
        task_tracker.spawn(async move {
            let signal_name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = inner.cancelled() => return,
            };
            tracing::info!(signal = signal_name, "Shutdown signal received");
            inner.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: outer,
        })
    }

    /// Returns a clone of the cancellation token for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Waits for shutdown and for the signal handler task to complete.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_returns_after_cancellation() {
        let sig_down = SigDown::try_new().unwrap();
        sig_down.cancellation_token().cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), sig_down.recv())
            .await
            .unwrap();
    }
}
