use super::MasterServer;
use crate::error::{MasterError, Result};
use crate::registry::run_session;
use std::sync::Arc;
use tracing::{error, info};

impl MasterServer {
    /// Establish the registry session and begin accepting workflow instances.
    ///
    /// Fails if no session is confirmed within the registry session timeout;
    /// the master never reports `Running` without a live session.
    pub async fn start(&mut self) -> Result<()> {
        if self.shutdown_task.is_some() {
            return Err(MasterError::system("Master already started"));
        }
        if self.coordinator.is_triggered() {
            return Err(MasterError::system("Master was stopped before it started"));
        }

        info!("Starting master {}", self.node_id);

        let dispatcher = self
            .registry
            .spawn_dispatcher(self.cancellation_token.clone())
            .map_err(|e| {
                error!("Failed to start registry dispatcher: {}", e);
                e
            })?;
        self.tasks.push(dispatcher);

        self.tasks.push(tokio::spawn(run_session(
            Arc::clone(&self.registry),
            Arc::clone(&self.heartbeat),
            self.config.registry.heartbeat_interval(),
            self.config.registry.session_timeout(),
        )));

        if let Err(e) = self
            .registry
            .wait_connected(self.config.registry.session_timeout())
            .await
        {
            error!("Failed to connect to registry: {}", e);
            self.abort_startup().await;
            return Err(e);
        }

        let coordinator = Arc::clone(&self.coordinator);
        self.shutdown_task = Some(tokio::spawn(async move { coordinator.run().await }));

        self.registry.register_node(self.node_path());

        self.lifecycle.to_running().map_err(|e| {
            error!("Failed to mark master running: {}", e);
            e
        })?;

        info!("Master {} is running", self.node_id);
        Ok(())
    }

    /// Tear down the session and background tasks of a failed start
    async fn abort_startup(&mut self) {
        self.registry.close();
        self.cancellation_token.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Background task ended abnormally: {}", e);
            }
        }
    }
}
