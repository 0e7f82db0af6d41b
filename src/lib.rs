pub mod admission;
pub mod app;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod membership;
pub mod registry;
pub mod shutdown;
pub mod workflow;

pub use admission::{InFlightGuard, WorkflowAdmission};
pub use app::MasterServer;
pub use config::MasterConfig;
pub use error::{MasterError, Result};
pub use lifecycle::{LifecycleState, ServerStatus, StatusTransition};
pub use membership::{MasterConnectionListener, DISCONNECTED_STOP_REASON};
pub use registry::{
    ConnectionListener, ConnectionState, Heartbeat, ListenerId, RegistryClient, SessionTracker,
    Stoppable, TcpHeartbeat,
};
pub use shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownStep, StepOutcome, StepStatus};
pub use workflow::{ReleaseState, WorkflowDefinition, WorkflowExecutionType, WorkflowUpdateRequest};
