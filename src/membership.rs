//! Failover policy for registry connectivity.
//!
//! A master that can no longer confirm its registry membership cannot prove
//! it is the only owner of its workflow instances, so on `DISCONNECTED` it
//! stops itself. Suspension alone is tolerated; the registry client's session
//! timeout turns a lasting suspension into `DISCONNECTED`.

use crate::lifecycle::LifecycleState;
use crate::registry::{ConnectionListener, ConnectionState, RegistryClient, Stoppable};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, info, warn};

pub const DISCONNECTED_STOP_REASON: &str = "Master disconnected from registry, will stop myself";

/// Connection listener that stops the master when its registry session is lost
pub struct MasterConnectionListener {
    stoppable: Arc<dyn Stoppable>,
    lifecycle: LifecycleState,
}

impl MasterConnectionListener {
    pub fn new(registry: &RegistryClient, lifecycle: LifecycleState) -> Self {
        Self {
            stoppable: registry.stoppable(),
            lifecycle,
        }
    }

    fn handle(&self, state: &ConnectionState) {
        // Snapshot for the log line only
        let server_status = self.lifecycle.status();
        info!(
            state = %state,
            server_status = %server_status,
            "Master received a {} event from registry, the current server state is {}",
            state,
            server_status
        );

        match state {
            ConnectionState::Connected | ConnectionState::Suspended => {}
            ConnectionState::Reconnected => {
                warn!(state = %state, server_status = %server_status, "Master reconnected to registry");
            }
            ConnectionState::Disconnected => {
                self.stoppable.stop(DISCONNECTED_STOP_REASON);
            }
            ConnectionState::Unknown(tag) => {
                warn!(state = %tag, server_status = %server_status, "Unknown connection state: {}", tag);
            }
        }
    }
}

impl ConnectionListener for MasterConnectionListener {
    fn on_update(&self, state: &ConnectionState) {
        if catch_unwind(AssertUnwindSafe(|| self.handle(state))).is_err() {
            error!(state = %state, "Failed to handle registry connection state change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::WorkflowAdmission;
    use crate::lifecycle::ServerStatus;
    use crate::shutdown::ShutdownCoordinator;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingStop {
        reasons: Mutex<Vec<String>>,
    }

    impl Stoppable for RecordingStop {
        fn stop(&self, reason: &str) {
            self.reasons.lock().push(reason.to_string());
        }
    }

    struct PanickingStop;

    impl Stoppable for PanickingStop {
        fn stop(&self, _reason: &str) {
            panic!("cannot release registry session");
        }
    }

    fn running_lifecycle() -> LifecycleState {
        let lifecycle = LifecycleState::new();
        lifecycle.to_running().unwrap();
        lifecycle
    }

    /// Lines this module emitted at `level`
    fn membership_lines(lines: &[&str], level: &str) -> usize {
        lines
            .iter()
            .filter(|line| line.contains("flowmaster::membership") && line.contains(level))
            .count()
    }

    fn listener_with(stop: Arc<dyn Stoppable>) -> (LifecycleState, MasterConnectionListener) {
        let lifecycle = running_lifecycle();
        let registry = RegistryClient::new(stop);
        let listener = MasterConnectionListener::new(&registry, lifecycle.clone());
        (lifecycle, listener)
    }

    #[test]
    fn test_non_disconnect_states_never_stop() {
        let stop = Arc::new(RecordingStop::default());
        let (lifecycle, listener) = listener_with(stop.clone());

        for state in [
            ConnectionState::Connected,
            ConnectionState::Suspended,
            ConnectionState::Reconnected,
            ConnectionState::Connected,
        ] {
            listener.on_update(&state);
        }

        assert!(stop.reasons.lock().is_empty());
        assert_eq!(lifecycle.status(), ServerStatus::Running);
    }

    #[test]
    fn test_disconnect_requests_stop_with_reason() {
        let stop = Arc::new(RecordingStop::default());
        let (_lifecycle, listener) = listener_with(stop.clone());

        listener.on_update(&ConnectionState::Disconnected);

        assert_eq!(
            *stop.reasons.lock(),
            vec!["Master disconnected from registry, will stop myself".to_string()]
        );
    }

    #[test]
    #[traced_test]
    fn test_connected_logs_info_with_status() {
        let stop = Arc::new(RecordingStop::default());
        let (lifecycle, listener) = listener_with(stop.clone());

        listener.on_update(&ConnectionState::Connected);

        assert!(logs_contain(
            "Master received a CONNECTED event from registry, the current server state is RUNNING"
        ));
        logs_assert(|lines: &[&str]| {
            match (membership_lines(lines, "INFO"), membership_lines(lines, "WARN")) {
                (1, 0) => Ok(()),
                (info, warn) => Err(format!(
                    "expected 1 info and 0 warn lines, got {} and {}",
                    info, warn
                )),
            }
        });
        assert_eq!(lifecycle.status(), ServerStatus::Running);
    }

    #[test]
    #[traced_test]
    fn test_reconnected_logs_warning() {
        let stop = Arc::new(RecordingStop::default());
        let (_lifecycle, listener) = listener_with(stop.clone());

        listener.on_update(&ConnectionState::Reconnected);

        assert!(logs_contain("Master reconnected to registry"));
        assert!(stop.reasons.lock().is_empty());
    }

    #[test]
    #[traced_test]
    fn test_unknown_state_is_logged_and_ignored() {
        let stop = Arc::new(RecordingStop::default());
        let (lifecycle, listener) = listener_with(stop.clone());

        listener.on_update(&"LOST_QUORUM".parse().unwrap());

        assert!(logs_contain("Unknown connection state: LOST_QUORUM"));
        logs_assert(|lines: &[&str]| match membership_lines(lines, "WARN") {
            1 => Ok(()),
            n => Err(format!("expected exactly 1 warn line, got {}", n)),
        });
        assert!(stop.reasons.lock().is_empty());
        assert_eq!(lifecycle.status(), ServerStatus::Running);
    }

    #[test]
    #[traced_test]
    fn test_panic_in_stop_is_contained() {
        let (_lifecycle, listener) = listener_with(Arc::new(PanickingStop));

        listener.on_update(&ConnectionState::Disconnected);

        assert!(logs_contain(
            "Failed to handle registry connection state change"
        ));
    }

    fn wired() -> (LifecycleState, Arc<ShutdownCoordinator>, MasterConnectionListener) {
        let lifecycle = running_lifecycle();
        let admission = WorkflowAdmission::new(lifecycle.clone());
        let coordinator = Arc::new(ShutdownCoordinator::new(
            lifecycle.clone(),
            admission,
            Duration::from_secs(1),
            Duration::from_secs(1),
        ));
        let registry = RegistryClient::new(coordinator.clone());
        let listener = MasterConnectionListener::new(&registry, lifecycle.clone());
        (lifecycle, coordinator, listener)
    }

    #[tokio::test]
    async fn test_repeated_disconnects_shut_down_once() {
        let (lifecycle, coordinator, listener) = wired();
        let mut status = lifecycle.subscribe();

        listener.on_update(&ConnectionState::Disconnected);
        listener.on_update(&ConnectionState::Disconnected);
        listener.on_update(&ConnectionState::Disconnected);
        assert_eq!(*status.borrow_and_update(), ServerStatus::Stopping);

        let report = coordinator.run().await.unwrap();
        assert_eq!(report.reason, DISCONNECTED_STOP_REASON);

        let path: Vec<_> = lifecycle.transitions().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                ServerStatus::Running,
                ServerStatus::Stopping,
                ServerStatus::Stopped
            ]
        );
    }

    #[tokio::test]
    async fn test_late_connects_do_not_revive_stopped_node() {
        let (lifecycle, coordinator, listener) = wired();

        listener.on_update(&ConnectionState::Disconnected);
        listener.on_update(&ConnectionState::Reconnected);
        listener.on_update(&ConnectionState::Connected);
        assert_eq!(lifecycle.status(), ServerStatus::Stopping);

        coordinator.run().await.unwrap();
        listener.on_update(&ConnectionState::Connected);
        listener.on_update(&ConnectionState::Reconnected);
        assert_eq!(lifecycle.status(), ServerStatus::Stopped);
        assert!(lifecycle.to_running().is_err());
    }
}
