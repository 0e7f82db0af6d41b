use super::ConnectionState;
use crate::error::{MasterError, Result};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observer of registry connection state changes
pub trait ConnectionListener: Send + Sync {
    /// Called once per transition, on the registry client's dispatch task
    fn on_update(&self, state: &ConnectionState);
}

/// Handle used to terminate the local node
pub trait Stoppable: Send + Sync {
    fn stop(&self, reason: &str);
}

/// Identifies a registered listener for later removal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, Arc<dyn ConnectionListener>)>,
}

/// Client side of the coordination service session.
///
/// Connection states published here are delivered to every registered
/// listener, one state at a time, in publication order.
pub struct RegistryClient {
    listeners: RwLock<Listeners>,
    stoppable: Arc<dyn Stoppable>,
    current: watch::Sender<Option<ConnectionState>>,
    registered_node: Mutex<Option<String>>,
    sender: mpsc::UnboundedSender<ConnectionState>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ConnectionState>>>,
    session_token: CancellationToken,
}

impl RegistryClient {
    pub fn new(stoppable: Arc<dyn Stoppable>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (current, _) = watch::channel(None);
        Self {
            listeners: RwLock::new(Listeners::default()),
            stoppable,
            current,
            registered_node: Mutex::new(None),
            sender,
            receiver: Mutex::new(Some(receiver)),
            session_token: CancellationToken::new(),
        }
    }

    /// Register a listener; it sees every state published from now on
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) -> ListenerId {
        let mut listeners = self.listeners.write();
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, listener));
        debug!("Connection listener {:?} registered", id);
        id
    }

    /// Deregister a listener. Returns false if it was not registered.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry_id, _)| *entry_id != id);
        before != listeners.entries.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().entries.len()
    }

    /// The termination handle listeners use to stop this node
    pub fn stoppable(&self) -> Arc<dyn Stoppable> {
        Arc::clone(&self.stoppable)
    }

    /// Last state delivered to listeners, if any
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.current.borrow().clone()
    }

    /// Wait until the session is confirmed live, at most `limit`
    pub async fn wait_connected(&self, limit: Duration) -> Result<()> {
        let mut current = self.current.subscribe();
        let connected = current.wait_for(|state| {
            matches!(
                state,
                Some(ConnectionState::Connected) | Some(ConnectionState::Reconnected)
            )
        });

        let result = match timeout(limit, connected).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(MasterError::registry("Registry client dropped")),
            Err(_) => Err(MasterError::registry(format!(
                "no registry session established within {:?}",
                limit
            ))),
        };
        result
    }

    /// Queue a state for delivery. Never blocks.
    pub fn publish(&self, state: ConnectionState) {
        if self.sender.send(state).is_err() {
            debug!("Connection state dropped, dispatcher has shut down");
        }
    }

    /// Deliver a state to every listener on the calling thread
    pub fn deliver(&self, state: &ConnectionState) {
        self.current.send_replace(Some(state.clone()));

        // Snapshot so listeners may (de)register while being notified
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .entries
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_update(state)));
            if outcome.is_err() {
                error!(
                    state = %state,
                    "Connection listener {:?} panicked while handling state change",
                    id
                );
            }
        }
    }

    /// Start the task that delivers published states until cancelled
    pub fn spawn_dispatcher(self: &Arc<Self>, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let mut receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| MasterError::registry("Connection dispatcher already started"))?;
        let client = Arc::clone(self);

        Ok(tokio::spawn(async move {
            debug!("Registry connection dispatcher started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(state) => client.deliver(&state),
                        None => break,
                    },
                }
            }
            debug!("Registry connection dispatcher stopped");
        }))
    }

    /// Record this node's membership path
    pub fn register_node(&self, path: impl Into<String>) {
        let path = path.into();
        info!("Registered master node at {}", path);
        *self.registered_node.lock() = Some(path);
    }

    /// Remove this node's membership path. Returns the removed path.
    pub fn deregister_node(&self) -> Option<String> {
        let removed = self.registered_node.lock().take();
        match &removed {
            Some(path) => info!("Deregistered master node from {}", path),
            None => warn!("Deregistration requested but node was not registered"),
        }
        removed
    }

    pub fn registered_node(&self) -> Option<String> {
        self.registered_node.lock().clone()
    }

    /// Token cancelled when the session is released
    pub fn session_token(&self) -> CancellationToken {
        self.session_token.clone()
    }

    /// Release the session and stop heartbeats
    pub fn close(&self) {
        self.session_token.cancel();
        info!("Registry session released");
    }

    pub fn is_closed(&self) -> bool {
        self.session_token.is_cancelled()
    }
}
