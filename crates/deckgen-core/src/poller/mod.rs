//! Status poller: follows a submitted job to a terminal state.
//!
//! One `StatusPoller::watch` call drives one task. Each cycle issues a status
//! request through the shared throttler, maps the answer into the task, and
//! either stops (completed, failed, cancelled, timed out) or sleeps for an
//! adaptive delay. Retryable request failures are absorbed with backoff up to
//! `poll.max_consecutive_errors`; only the terminal outcome is surfaced.

mod interval;
mod run;

use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::DeckgenConfig;
use crate::retry::{BackoffPolicy, TaskError};
use crate::task::Task;

pub use interval::AdaptiveInterval;
pub use run::StatusPoller;

/// Poller tuning derived from `DeckgenConfig`.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Base delay between polls before adaptation.
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    pub stall_multiplier: f64,
    /// Successful polls allowed before the task times out.
    pub max_poll_attempts: u32,
    /// Retryable failures in a row tolerated before the task fails.
    pub max_consecutive_errors: u32,
    /// Delay schedule between failed polls.
    pub error_backoff: BackoffPolicy,
}

impl PollSettings {
    pub fn from_config(cfg: &DeckgenConfig) -> Self {
        Self {
            base_interval: cfg.poll_interval(),
            min_interval: Duration::from_millis(cfg.poll.min_interval_ms),
            max_interval: Duration::from_millis(cfg.poll.max_interval_ms),
            stall_multiplier: cfg.poll.stall_multiplier,
            max_poll_attempts: cfg.max_poll_attempts.max(1),
            max_consecutive_errors: cfg.poll.max_consecutive_errors,
            error_backoff: cfg.retry.policy(),
        }
    }

    fn interval_for(&self, task: &Task) -> AdaptiveInterval {
        AdaptiveInterval::new(
            self.base_interval,
            self.min_interval,
            self.max_interval,
            self.stall_multiplier,
            task.progress,
        )
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from_config(&DeckgenConfig::default())
    }
}

/// Terminal result of watching a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The job finished; `result` is the final status payload.
    Completed {
        task: Task,
        result: Map<String, Value>,
    },
    /// Server-reported failure, a non-retryable error, exhausted retries, or timeout.
    Failed { task: Task, error: TaskError },
    /// Cancelled by the caller or by the service.
    Cancelled { task: Task },
}

impl TaskOutcome {
    pub fn task(&self) -> &Task {
        match self {
            TaskOutcome::Completed { task, .. }
            | TaskOutcome::Failed { task, .. }
            | TaskOutcome::Cancelled { task } => task,
        }
    }

    pub fn into_task(self) -> Task {
        match self {
            TaskOutcome::Completed { task, .. }
            | TaskOutcome::Failed { task, .. }
            | TaskOutcome::Cancelled { task } => task,
        }
    }

    pub fn error(&self) -> Option<&TaskError> {
        match self {
            TaskOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskOutcome::Cancelled { .. })
    }
}
