//! Task notifications: observer trait and a channel-backed observer for the CLI.

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::retry::TaskError;
use crate::task::{Task, TaskStatus};

/// Receives lifecycle notifications from the poller.
///
/// Exactly one of `on_completed`, `on_failed` or `on_cancelled` is called per
/// watch, after any number of `on_progress` calls. Callbacks run on the poller
/// task and should not block.
pub trait TaskObserver: Send + Sync {
    fn on_progress(&self, _task: &Task) {}
    fn on_completed(&self, _task: &Task, _result: &Map<String, Value>) {}
    fn on_failed(&self, _task: &Task, _error: &TaskError) {}
    fn on_cancelled(&self, _task: &Task) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}

/// One notification, as delivered by `ChannelObserver`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    Progress {
        task_id: String,
        status: TaskStatus,
        progress: u8,
        message: Option<String>,
    },
    Completed {
        task: Task,
        result: Map<String, Value>,
    },
    Failed {
        task: Task,
        error: TaskError,
    },
    Cancelled {
        task: Task,
    },
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskEvent::Progress { .. })
    }
}

/// Forwards notifications over an unbounded tokio channel. Sends to a closed
/// receiver are ignored.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: TaskEvent) {
        let _ = self.tx.send(event);
    }
}

impl TaskObserver for ChannelObserver {
    fn on_progress(&self, task: &Task) {
        self.send(TaskEvent::Progress {
            task_id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            message: task.message.clone(),
        });
    }

    fn on_completed(&self, task: &Task, result: &Map<String, Value>) {
        self.send(TaskEvent::Completed {
            task: task.clone(),
            result: result.clone(),
        });
    }

    fn on_failed(&self, task: &Task, error: &TaskError) {
        self.send(TaskEvent::Failed {
            task: task.clone(),
            error: error.clone(),
        });
    }

    fn on_cancelled(&self, task: &Task) {
        self.send(TaskEvent::Cancelled { task: task.clone() });
    }
}
