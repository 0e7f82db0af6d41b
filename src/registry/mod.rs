mod client;
mod session;
mod state;

pub use client::{ConnectionListener, ListenerId, RegistryClient, Stoppable};
pub use session::{run_session, Heartbeat, SessionTracker, TcpHeartbeat};
pub use state::ConnectionState;
