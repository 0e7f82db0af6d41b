//! Process-wide participation status of this master node.
//!
//! A single [`LifecycleState`] is created at startup and cloned into every
//! subsystem that needs to read it. Only the shutdown coordinator and the
//! server startup path move it forward.

use crate::error::{MasterError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Participation state of a master node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Initializing,
    Running,
    WaitingForResource,
    Stopping,
    Stopped,
}

impl ServerStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: ServerStatus) -> bool {
        use ServerStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Running, WaitingForResource)
                | (WaitingForResource, Running)
                | (Initializing, Stopping)
                | (Running, Stopping)
                | (WaitingForResource, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn is_stopping_or_stopped(self) -> bool {
        matches!(self, ServerStatus::Stopping | ServerStatus::Stopped)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            ServerStatus::Initializing => "INITIALIZING",
            ServerStatus::Running => "RUNNING",
            ServerStatus::WaitingForResource => "WAITING_FOR_RESOURCE",
            ServerStatus::Stopping => "STOPPING",
            ServerStatus::Stopped => "STOPPED",
        };
        f.write_str(tag)
    }
}

/// A recorded status change
#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    pub from: ServerStatus,
    pub to: ServerStatus,
    pub at: DateTime<Utc>,
}

struct Inner {
    history: Mutex<Vec<StatusTransition>>,
    sender: watch::Sender<ServerStatus>,
}

/// Shared handle to the node's lifecycle status
#[derive(Clone)]
pub struct LifecycleState {
    inner: Arc<Inner>,
}

impl LifecycleState {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ServerStatus::Initializing);
        Self {
            inner: Arc::new(Inner {
                history: Mutex::new(Vec::new()),
                sender,
            }),
        }
    }

    /// Current status snapshot. May be stale by the time the caller looks at it.
    pub fn status(&self) -> ServerStatus {
        *self.inner.sender.borrow()
    }

    /// Receive every subsequent status change
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.inner.sender.subscribe()
    }

    /// All transitions applied so far, oldest first
    pub fn transitions(&self) -> Vec<StatusTransition> {
        self.inner.history.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.status() == ServerStatus::Running
    }

    /// Fail with `NotRunning` unless the node currently accepts work
    pub fn ensure_running(&self) -> Result<()> {
        match self.status() {
            ServerStatus::Running => Ok(()),
            status => Err(MasterError::NotRunning { status }),
        }
    }

    pub fn to_running(&self) -> Result<()> {
        self.transition(ServerStatus::Running)
    }

    pub fn to_waiting_for_resource(&self) -> Result<()> {
        self.transition(ServerStatus::WaitingForResource)
    }

    pub fn to_stopping(&self) -> Result<()> {
        self.transition(ServerStatus::Stopping)
    }

    pub fn to_stopped(&self) -> Result<()> {
        self.transition(ServerStatus::Stopped)
    }

    fn transition(&self, to: ServerStatus) -> Result<()> {
        // History lock serialises writers so check-and-set is atomic
        let mut history = self.inner.history.lock();
        let from = self.status();

        if !from.can_transition_to(to) {
            debug!("Rejected lifecycle transition {} -> {}", from, to);
            return Err(MasterError::InvalidTransition { from, to });
        }

        self.inner.sender.send_replace(to);
        history.push(StatusTransition {
            from,
            to,
            at: Utc::now(),
        });

        info!(from = %from, to = %to, "Server status changed");
        Ok(())
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleState")
            .field("status", &self.status())
            .finish()
    }
}
