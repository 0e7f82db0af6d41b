use super::{ConnectionState, RegistryClient};
use crate::error::{MasterError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Liveness check against the coordination service
#[async_trait::async_trait]
pub trait Heartbeat: Send + Sync {
    async fn beat(&self) -> Result<()>;
}

/// Heartbeat that succeeds when the registry endpoint accepts a TCP connection
pub struct TcpHeartbeat {
    endpoint: String,
    connect_timeout: Duration,
}

impl TcpHeartbeat {
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Heartbeat for TcpHeartbeat {
    async fn beat(&self) -> Result<()> {
        match timeout(self.connect_timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(MasterError::registry(format!(
                "cannot reach {}: {}",
                self.endpoint, e
            ))),
            Err(_) => Err(MasterError::registry(format!(
                "heartbeat to {} timed out",
                self.endpoint
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Connected,
    Suspended { since: Instant },
    Expired,
}

/// Turns heartbeat outcomes into connection state transitions.
///
/// A suspended session that stays unconfirmed for longer than the session
/// timeout expires; an expired session never emits again.
#[derive(Debug)]
pub struct SessionTracker {
    session_timeout: Duration,
    phase: Phase,
}

impl SessionTracker {
    pub fn new(session_timeout: Duration) -> Self {
        Self {
            session_timeout,
            phase: Phase::Idle,
        }
    }

    /// Feed one heartbeat outcome; returns the state to publish, if any
    pub fn on_heartbeat(&mut self, alive: bool, now: Instant) -> Option<ConnectionState> {
        match (self.phase, alive) {
            (Phase::Expired, _) => None,
            (Phase::Idle, true) => {
                self.phase = Phase::Connected;
                Some(ConnectionState::Connected)
            }
            (Phase::Idle, false) => None,
            (Phase::Connected, true) => None,
            (Phase::Connected, false) => {
                self.phase = Phase::Suspended { since: now };
                Some(ConnectionState::Suspended)
            }
            (Phase::Suspended { .. }, true) => {
                self.phase = Phase::Connected;
                Some(ConnectionState::Reconnected)
            }
            (Phase::Suspended { since }, false) => {
                if now.duration_since(since) >= self.session_timeout {
                    self.phase = Phase::Expired;
                    Some(ConnectionState::Disconnected)
                } else {
                    None
                }
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        self.phase == Phase::Expired
    }
}

/// Drive heartbeats and publish state changes until the session is released
/// or expires.
pub async fn run_session(
    client: Arc<RegistryClient>,
    heartbeat: Arc<dyn Heartbeat>,
    heartbeat_interval: Duration,
    session_timeout: Duration,
) {
    let cancel = client.session_token();
    let mut tracker = SessionTracker::new(session_timeout);
    let mut ticker = interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Registry session started (heartbeat every {:?}, timeout {:?})",
        heartbeat_interval, session_timeout
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Registry session loop cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }

        let alive = match heartbeat.beat().await {
            Ok(()) => true,
            Err(e) => {
                debug!("Registry heartbeat failed: {}", e);
                false
            }
        };

        if let Some(state) = tracker.on_heartbeat(alive, Instant::now()) {
            client.publish(state);
        }

        if tracker.is_expired() {
            warn!("Registry session expired after {:?} without confirmation", session_timeout);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConnectionListener, Stoppable};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::sleep;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_tracker_transitions() {
        let start = Instant::now();
        let timeout = Duration::from_secs(10);
        let mut tracker = SessionTracker::new(timeout);

        assert_eq!(tracker.on_heartbeat(false, start), None);
        assert_eq!(
            tracker.on_heartbeat(true, start),
            Some(ConnectionState::Connected)
        );
        assert_eq!(tracker.on_heartbeat(true, start), None);
        assert_eq!(
            tracker.on_heartbeat(false, start),
            Some(ConnectionState::Suspended)
        );
        assert_eq!(
            tracker.on_heartbeat(false, start + Duration::from_secs(5)),
            None
        );
        assert_eq!(
            tracker.on_heartbeat(true, start + Duration::from_secs(6)),
            Some(ConnectionState::Reconnected)
        );
    }

    #[test]
    fn test_tracker_expires_once() {
        let start = Instant::now();
        let mut tracker = SessionTracker::new(Duration::from_secs(10));
        tracker.on_heartbeat(true, start);
        tracker.on_heartbeat(false, start);

        assert_eq!(
            tracker.on_heartbeat(false, start + Duration::from_secs(10)),
            Some(ConnectionState::Disconnected)
        );
        assert!(tracker.is_expired());
        assert_eq!(
            tracker.on_heartbeat(false, start + Duration::from_secs(11)),
            None
        );
        assert_eq!(
            tracker.on_heartbeat(true, start + Duration::from_secs(12)),
            None
        );
    }

    struct Scripted {
        outcomes: Mutex<VecDeque<bool>>,
    }

    #[async_trait::async_trait]
    impl Heartbeat for Scripted {
        async fn beat(&self) -> Result<()> {
            match self.outcomes.lock().pop_front() {
                Some(true) => Ok(()),
                _ => Err(MasterError::registry("unreachable")),
            }
        }
    }

    struct NoopStop;

    impl Stoppable for NoopStop {
        fn stop(&self, _reason: &str) {}
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<ConnectionState>>,
    }

    impl ConnectionListener for Recorder {
        fn on_update(&self, state: &ConnectionState) {
            self.seen.lock().push(state.clone());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loop_publishes_until_expiry() {
        let client = Arc::new(RegistryClient::new(Arc::new(NoopStop)));
        let recorder = Arc::new(Recorder::default());
        client.add_connection_listener(recorder.clone());
        let cancel = CancellationToken::new();
        let dispatcher = client.spawn_dispatcher(cancel.clone()).unwrap();

        let heartbeat = Arc::new(Scripted {
            outcomes: Mutex::new(VecDeque::from(vec![true, true, false, true, false])),
        });

        run_session(
            Arc::clone(&client),
            heartbeat,
            Duration::from_millis(100),
            Duration::from_millis(250),
        )
        .await;

        for _ in 0..10 {
            if recorder.seen.lock().len() == 5 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                ConnectionState::Connected,
                ConnectionState::Suspended,
                ConnectionState::Reconnected,
                ConnectionState::Suspended,
                ConnectionState::Disconnected,
            ]
        );

        cancel.cancel();
        dispatcher.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_loop_stops_when_released() {
        let client = Arc::new(RegistryClient::new(Arc::new(NoopStop)));
        let heartbeat = Arc::new(Scripted {
            outcomes: Mutex::new(VecDeque::from(vec![true; 1000])),
        });

        let session = tokio::spawn(run_session(
            Arc::clone(&client),
            heartbeat,
            Duration::from_millis(100),
            Duration::from_secs(1),
        ));

        sleep(Duration::from_millis(350)).await;
        client.close();
        session.await.unwrap();
        assert_eq!(client.connection_state(), None);
    }

    #[tokio::test]
    async fn test_tcp_heartbeat_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let heartbeat = TcpHeartbeat::new(endpoint.clone(), Duration::from_secs(1));
        assert!(heartbeat.beat().await.is_ok());

        drop(listener);
        assert!(heartbeat.beat().await.is_err());
    }
}
