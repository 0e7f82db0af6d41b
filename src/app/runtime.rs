use super::MasterServer;
use crate::error::{MasterError, Result};
use crate::registry::Stoppable;
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

impl MasterServer {
    /// Run until the master is stopped by a signal or by losing the registry
    pub async fn run(&mut self) -> Result<i32> {
        let shutdown_task = self
            .shutdown_task
            .take()
            .ok_or_else(|| MasterError::system("Master not started"))?;

        self.setup_signal_handlers();

        let report = shutdown_task
            .await
            .map_err(|e| MasterError::system(format!("Shutdown task failed: {}", e)))??;

        info!("Shutdown initiated by: {}", report.reason);

        // Stop the dispatcher and anything else still running
        self.cancellation_token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }

        info!("Master {} shutdown complete", self.node_id);
        Ok(report.exit_code)
    }

    /// Translate SIGINT/SIGTERM into stop requests on the shared coordinator
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let coordinator = Arc::clone(&self.coordinator);
            let cancel = self.cancellation_token.clone();
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    Some(()) = sigterm.recv() => {
                        info!("Received SIGTERM signal");
                        coordinator.stop("Received SIGTERM");
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let coordinator: Arc<ShutdownCoordinator> = Arc::clone(&self.coordinator);
        let cancel = self.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                Ok(()) = signal::ctrl_c() => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    coordinator.stop("Received SIGINT");
                }
            }
        });
    }
}
