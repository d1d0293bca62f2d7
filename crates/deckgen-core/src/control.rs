//! Task control: per-task cancellation tokens and the active-poller registry.
//!
//! Each watched task is registered with a `CancellationToken`. The poller races
//! every network call and every inter-poll sleep against it, so `cancel` takes
//! effect at the next suspension point: the in-flight request is dropped and no
//! further polls are scheduled.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::task::JobId;
use crate::util::{read, write};

/// Error returned by the control registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("task {0} is already being watched")]
    AlreadyWatching(JobId),
}

/// Shared registry of job id -> cancellation token. At most one entry per
/// job, which is how "one active poller per task" is enforced.
#[derive(Debug, Default)]
pub struct CancellationController {
    tasks: RwLock<HashMap<JobId, CancellationToken>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task about to be watched; returns the token to poll under.
    pub fn register(&self, task_id: &str) -> Result<CancellationToken, ControlError> {
        let mut tasks = write(&self.tasks);
        if tasks.contains_key(task_id) {
            return Err(ControlError::AlreadyWatching(task_id.to_string()));
        }
        let token = CancellationToken::new();
        tasks.insert(task_id.to_string(), token.clone());
        Ok(token)
    }

    /// Drop the registration (call when the poller stops, whatever the outcome).
    pub fn unregister(&self, task_id: &str) {
        write(&self.tasks).remove(task_id);
    }

    /// Request cancellation. Idempotent; returns whether the task was registered.
    pub fn cancel(&self, task_id: &str) -> bool {
        let tasks = read(&self.tasks);
        match tasks.get(task_id) {
            Some(token) => {
                if !token.is_cancelled() {
                    tracing::info!(task_id, "cancellation requested");
                }
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every registered task, e.g. on shutdown.
    pub fn cancel_all(&self) -> usize {
        let tasks = read(&self.tasks);
        for token in tasks.values() {
            token.cancel();
        }
        tasks.len()
    }

    pub fn is_active(&self, task_id: &str) -> bool {
        read(&self.tasks).contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        read(&self.tasks).len()
    }
}
