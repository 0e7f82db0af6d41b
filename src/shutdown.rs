//! Orderly, idempotent termination of a master node.
//!
//! The first `stop` wins: it moves the lifecycle to `Stopping` and wakes the
//! shutdown task, which deregisters the node, drains in-flight workflow
//! instances, releases the registry session and finally marks the node
//! `Stopped`. Every later `stop` only logs its reason.

use crate::admission::WorkflowAdmission;
use crate::error::{MasterError, Result};
use crate::lifecycle::LifecycleState;
use crate::registry::{ListenerId, RegistryClient, Stoppable};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// One stage of the shutdown sequence
#[async_trait::async_trait]
pub trait ShutdownStep: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Completed,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
}

/// Summary of a finished shutdown
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub reason: String,
    pub steps: Vec<StepOutcome>,
    /// Workflow instances still in flight when the drain gave up
    pub handed_off: Vec<String>,
    pub exit_code: i32,
}

pub struct ShutdownCoordinator {
    lifecycle: LifecycleState,
    admission: WorkflowAdmission,
    drain_timeout: Duration,
    step_timeout: Duration,
    triggered: AtomicBool,
    request_tx: Mutex<Option<oneshot::Sender<String>>>,
    request_rx: Mutex<Option<oneshot::Receiver<String>>>,
    steps: Mutex<Vec<Arc<dyn ShutdownStep>>>,
    release_steps: Mutex<Vec<Arc<dyn ShutdownStep>>>,
    report: watch::Sender<Option<ShutdownReport>>,
}

impl ShutdownCoordinator {
    pub fn new(
        lifecycle: LifecycleState,
        admission: WorkflowAdmission,
        drain_timeout: Duration,
        step_timeout: Duration,
    ) -> Self {
        let (request_tx, request_rx) = oneshot::channel();
        let (report, _) = watch::channel(None);
        Self {
            lifecycle,
            admission,
            drain_timeout,
            step_timeout,
            triggered: AtomicBool::new(false),
            request_tx: Mutex::new(Some(request_tx)),
            request_rx: Mutex::new(Some(request_rx)),
            steps: Mutex::new(Vec::new()),
            release_steps: Mutex::new(Vec::new()),
            report,
        }
    }

    /// Add a step that runs before in-flight work is drained
    pub fn add_step(&self, step: Arc<dyn ShutdownStep>) {
        self.steps.lock().push(step);
    }

    /// Add a step that runs after the drain
    pub fn add_release_step(&self, step: Arc<dyn ShutdownStep>) {
        self.release_steps.lock().push(step);
    }

    /// Whether some caller has already requested a stop
    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Wait for a stop request, then execute the shutdown sequence.
    /// May only be called once.
    pub async fn run(&self) -> Result<ShutdownReport> {
        let request = self
            .request_rx
            .lock()
            .take()
            .ok_or_else(|| MasterError::system("Shutdown sequence already running"))?;

        let reason = request
            .await
            .map_err(|_| MasterError::system("Shutdown request channel closed unexpectedly"))?;

        info!("Beginning graceful shutdown: {}", reason);

        let mut outcomes = Vec::new();

        // Steps are taken out so they are dropped once the sequence ends
        let steps = std::mem::take(&mut *self.steps.lock());
        for step in steps {
            outcomes.push(self.run_step(step.as_ref()).await);
        }

        let handed_off = self.admission.drain(self.drain_timeout).await;
        for instance in &handed_off {
            warn!("Workflow instance {} left for failover by another master", instance);
        }

        let release_steps = std::mem::take(&mut *self.release_steps.lock());
        for step in release_steps {
            outcomes.push(self.run_step(step.as_ref()).await);
        }

        if let Err(e) = self.lifecycle.to_stopped() {
            error!("Failed to mark server stopped: {}", e);
        }

        let exit_code = if outcomes.iter().all(|o| o.status == StepStatus::Completed) {
            0
        } else {
            1
        };

        info!("Graceful shutdown completed with exit code: {}", exit_code);

        let report = ShutdownReport {
            reason,
            steps: outcomes,
            handed_off,
            exit_code,
        };
        self.report.send_replace(Some(report.clone()));
        Ok(report)
    }

    /// Resolve once the shutdown sequence has finished
    pub async fn wait(&self) -> Result<ShutdownReport> {
        let mut receiver = self.report.subscribe();
        let report = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| MasterError::system("Shutdown coordinator dropped"))?;
        report
            .clone()
            .ok_or_else(|| MasterError::system("Shutdown report missing"))
    }

    async fn run_step(&self, step: &dyn ShutdownStep) -> StepOutcome {
        let name = step.name().to_string();
        info!("Running shutdown step: {}", name);

        let status = match timeout(self.step_timeout, step.run()).await {
            Ok(Ok(())) => {
                info!("Shutdown step {} completed", name);
                StepStatus::Completed
            }
            Ok(Err(e)) => {
                error!("Shutdown step {} failed: {}", name, e);
                StepStatus::Failed(e.to_string())
            }
            Err(_) => {
                error!("Shutdown step {} timed out", name);
                StepStatus::TimedOut
            }
        };

        StepOutcome { name, status }
    }
}

impl Stoppable for ShutdownCoordinator {
    fn stop(&self, reason: &str) {
        if self
            .triggered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!(reason, "Shutdown already in progress, ignoring stop request");
            return;
        }

        warn!(reason, server_status = %self.lifecycle.status(), "Stopping master");

        // New workflow instances are refused from here on
        if let Err(e) = self.lifecycle.to_stopping() {
            warn!("Could not move server to stopping: {}", e);
        }

        if let Some(sender) = self.request_tx.lock().take() {
            if sender.send(reason.to_string()).is_err() {
                error!("Shutdown task is gone, stop request not delivered");
            }
        }
    }
}

/// Removes this master's membership entry from the registry
pub struct RegistryDeregistration {
    client: Arc<RegistryClient>,
}

impl RegistryDeregistration {
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ShutdownStep for RegistryDeregistration {
    fn name(&self) -> &str {
        "registry-deregistration"
    }

    async fn run(&self) -> Result<()> {
        self.client.deregister_node();
        Ok(())
    }
}

/// Deregisters this node's connection listeners and closes the registry session
pub struct SessionRelease {
    client: Arc<RegistryClient>,
    listeners: Vec<ListenerId>,
}

impl SessionRelease {
    pub fn new(client: Arc<RegistryClient>) -> Self {
        Self {
            client,
            listeners: Vec::new(),
        }
    }

    pub fn with_listener(mut self, id: ListenerId) -> Self {
        self.listeners.push(id);
        self
    }
}

#[async_trait::async_trait]
impl ShutdownStep for SessionRelease {
    fn name(&self) -> &str {
        "session-release"
    }

    async fn run(&self) -> Result<()> {
        for id in &self.listeners {
            if !self.client.remove_connection_listener(*id) {
                warn!("Connection listener {:?} was already removed", id);
            }
        }
        self.client.close();
        Ok(())
    }
}
