//! One round engine task per organization.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct EngineHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Tracks running engine tasks so that starting one is idempotent and stopping one is explicit.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Mutex<HashMap<String, EngineHandle>>,
}

impl EngineRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, EngineHandle>> {
        match self.engines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Spawn the task built by `engine` unless one is already running for `org_id`.
    ///
    /// Returns false when a running task was kept. A task that ended on its own (for example
    /// after license expiry) is replaced.
    pub fn start<F, Fut>(&self, org_id: &str, engine: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut engines = self.lock();
        if let Some(handle) = engines.get(org_id) {
            if !handle.task.is_finished() {
                return false;
            }
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(engine(cancel.clone()));
        engines.insert(org_id.to_string(), EngineHandle { cancel, task });
        info!(org_id, "engine task started");
        true
    }

    /// Cancel the organization's task and wait for it to end.
    ///
    /// Returns whether a running task was stopped.
    pub async fn stop(&self, org_id: &str) -> bool {
        let Some(handle) = self.lock().remove(org_id) else {
            return false;
        };
        let running = !handle.task.is_finished();
        handle.cancel.cancel();
        if let Err(err) = handle.task.await {
            warn!(org_id, "engine task join failed: {err}");
        }
        if running {
            info!(org_id, "engine task stopped");
        }
        running
    }

    pub fn is_running(&self, org_id: &str) -> bool {
        self.lock()
            .get(org_id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Organizations with a running task, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut running: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(org_id, _)| org_id.clone())
            .collect();
        running.sort();
        running
    }

    pub async fn stop_all(&self) {
        let handles: Vec<(String, EngineHandle)> = self.lock().drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (org_id, handle) in handles {
            if let Err(err) = handle.task.await {
                warn!(org_id, "engine task join failed: {err}");
            }
        }
    }
}
