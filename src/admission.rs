use crate::error::Result;
use crate::lifecycle::LifecycleState;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

struct Inner {
    in_flight: Mutex<BTreeSet<String>>,
    emptied: Notify,
}

/// Gate for new workflow instances and tracker of the ones still executing
#[derive(Clone)]
pub struct WorkflowAdmission {
    lifecycle: LifecycleState,
    inner: Arc<Inner>,
}

/// Marks a workflow instance as in flight until dropped
#[must_use = "the instance is released as soon as the guard is dropped"]
pub struct InFlightGuard {
    instance_id: String,
    inner: Arc<Inner>,
}

impl WorkflowAdmission {
    pub fn new(lifecycle: LifecycleState) -> Self {
        Self {
            lifecycle,
            inner: Arc::new(Inner {
                in_flight: Mutex::new(BTreeSet::new()),
                emptied: Notify::new(),
            }),
        }
    }

    /// Admit a workflow instance. Refused unless the master is running.
    pub fn admit(&self, instance_id: impl Into<String>) -> Result<InFlightGuard> {
        let instance_id = instance_id.into();
        let mut in_flight = self.inner.in_flight.lock();
        // Checked under the lock so drain never misses a late admission
        self.lifecycle.ensure_running()?;

        in_flight.insert(instance_id.clone());
        debug!("Workflow instance {} admitted", instance_id);
        Ok(InFlightGuard {
            instance_id,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.inner.in_flight.lock().iter().cloned().collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Wait for in-flight instances to finish. Returns the ids still running
    /// when the timeout elapsed.
    pub async fn drain(&self, limit: Duration) -> Vec<String> {
        let deadline = Instant::now() + limit;
        info!(
            "Draining {} in-flight workflow instance(s)",
            self.in_flight_count()
        );

        loop {
            let emptied = self.inner.emptied.notified();
            tokio::pin!(emptied);
            // Register interest before checking to avoid a lost wakeup
            emptied.as_mut().enable();

            if self.in_flight_count() == 0 {
                info!("All in-flight workflow instances finished");
                return Vec::new();
            }

            if timeout_at(deadline, emptied).await.is_err() {
                let remaining = self.in_flight();
                warn!(
                    "Drain timed out with {} workflow instance(s) still in flight",
                    remaining.len()
                );
                return remaining;
            }
        }
    }
}

impl InFlightGuard {
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock();
        in_flight.remove(&self.instance_id);
        if in_flight.is_empty() {
            self.inner.emptied.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MasterError;
    use crate::lifecycle::ServerStatus;

    fn running() -> (LifecycleState, WorkflowAdmission) {
        let lifecycle = LifecycleState::new();
        lifecycle.to_running().unwrap();
        let admission = WorkflowAdmission::new(lifecycle.clone());
        (lifecycle, admission)
    }

    #[test]
    fn test_refuses_before_running() {
        let admission = WorkflowAdmission::new(LifecycleState::new());
        assert!(matches!(
            admission.admit("wf-1"),
            Err(MasterError::NotRunning {
                status: ServerStatus::Initializing
            })
        ));
    }

    #[test]
    fn test_refuses_once_stopping() {
        let (lifecycle, admission) = running();
        let guard = admission.admit("wf-1").unwrap();
        lifecycle.to_stopping().unwrap();

        assert!(admission.admit("wf-2").is_err());
        assert_eq!(admission.in_flight(), vec!["wf-1".to_string()]);
        drop(guard);
        assert_eq!(admission.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_returns_when_empty() {
        let (_lifecycle, admission) = running();
        assert!(admission.drain(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_guards() {
        let (_lifecycle, admission) = running();
        let guard = admission.admit("wf-1").unwrap();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(guard);
        });

        let remaining = admission.drain(Duration::from_secs(10)).await;
        assert!(remaining.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_with_remaining() {
        let (_lifecycle, admission) = running();
        let _a = admission.admit("wf-a").unwrap();
        let _b = admission.admit("wf-b").unwrap();

        let remaining = admission.drain(Duration::from_secs(5)).await;
        assert_eq!(remaining, vec!["wf-a".to_string(), "wf-b".to_string()]);
    }
}
