use crate::admission::WorkflowAdmission;
use crate::config::MasterConfig;
use crate::error::Result;
use crate::lifecycle::LifecycleState;
use crate::membership::MasterConnectionListener;
use crate::registry::{Heartbeat, ListenerId, RegistryClient, TcpHeartbeat};
use crate::shutdown::{
    RegistryDeregistration, SessionRelease, ShutdownCoordinator, ShutdownReport,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Master node: wires the registry session, the failover listener and the
/// shutdown coordinator around one lifecycle state
pub struct MasterServer {
    pub(super) config: MasterConfig,
    pub(super) node_id: String,
    pub(super) lifecycle: LifecycleState,
    pub(super) admission: WorkflowAdmission,
    pub(super) coordinator: Arc<ShutdownCoordinator>,
    pub(super) registry: Arc<RegistryClient>,
    pub(super) heartbeat: Arc<dyn Heartbeat>,
    pub(super) listener_id: ListenerId,

    // Background tasks
    pub(super) cancellation_token: CancellationToken,
    pub(super) tasks: Vec<JoinHandle<()>>,
    pub(super) shutdown_task: Option<JoinHandle<Result<ShutdownReport>>>,
}

impl MasterServer {
    /// Create a master that heartbeats the configured registry endpoint over TCP
    pub fn new(config: MasterConfig) -> Result<Self> {
        let heartbeat = Arc::new(TcpHeartbeat::new(
            config.registry.endpoint.clone(),
            config.registry.connect_timeout(),
        ));
        Self::with_heartbeat(config, heartbeat)
    }

    pub fn with_heartbeat(config: MasterConfig, heartbeat: Arc<dyn Heartbeat>) -> Result<Self> {
        config.validate()?;

        let node_id = config
            .master
            .node_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let lifecycle = LifecycleState::new();
        let admission = WorkflowAdmission::new(lifecycle.clone());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle.clone(),
            admission.clone(),
            config.shutdown.drain_timeout(),
            config.shutdown.step_timeout(),
        ));

        let registry = Arc::new(RegistryClient::new(coordinator.clone()));

        let listener = MasterConnectionListener::new(&registry, lifecycle.clone());
        let listener_id = registry.add_connection_listener(Arc::new(listener));

        coordinator.add_step(Arc::new(RegistryDeregistration::new(Arc::clone(&registry))));
        coordinator.add_release_step(Arc::new(
            SessionRelease::new(Arc::clone(&registry)).with_listener(listener_id),
        ));

        info!("Master {} created", node_id);

        Ok(Self {
            config,
            node_id,
            lifecycle,
            admission,
            coordinator,
            registry,
            heartbeat,
            listener_id,
            cancellation_token: CancellationToken::new(),
            tasks: Vec::new(),
            shutdown_task: None,
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Registry path this master announces itself under
    pub fn node_path(&self) -> String {
        format!(
            "/nodes/master/{}:{}",
            self.config.master.host, self.config.master.port
        )
    }

    pub fn lifecycle(&self) -> &LifecycleState {
        &self.lifecycle
    }

    pub fn admission(&self) -> &WorkflowAdmission {
        &self.admission
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.coordinator
    }

    pub fn listener_id(&self) -> ListenerId {
        self.listener_id
    }
}
