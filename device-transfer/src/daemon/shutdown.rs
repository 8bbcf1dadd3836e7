//! Signal handling for SIGTERM and SIGINT.
//!
//! A signal does not kill the process outright: it cancels the transfer in
//! flight so the engine can terminate the pull and roll its destination back
//! before the report is written.

use crate::executor::TransferEngine;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a shutdown receiver
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Broadcast shutdown to every subscriber.
    pub fn notify(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("No subscribers for shutdown signal: {}", e);
        }
    }

    /// Wait for SIGTERM or SIGINT, then broadcast shutdown.
    ///
    /// If a handler cannot be installed the error is logged and that signal
    /// is ignored.
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), cancelling transfer...");
            }
            _ = terminate => {
                info!("Received SIGTERM, cancelling transfer...");
            }
        }

        self.notify();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `engine` once the coordinator broadcasts shutdown.
pub fn spawn_cancel_watch(
    coordinator: &ShutdownCoordinator,
    engine: Arc<TransferEngine>,
) -> JoinHandle<()> {
    let mut rx = coordinator.subscribe();
    tokio::spawn(async move {
        if rx.recv().await.is_ok() {
            engine.cancel();
        }
    })
}
