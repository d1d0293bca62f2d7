//! Task model: lifecycle status, progress, counters.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::retry::TaskError;

/// Job identifier assigned by the remote service.
pub type JobId = String;

/// Lifecycle state of a generation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    ContentGenerated,
    Compiling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::ContentGenerated => "content_generated",
            TaskStatus::Compiling => "compiling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Map a server status string. Returns `None` for strings we do not know.
    pub fn parse_server(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let status = match normalized.as_str() {
            "pending" | "queued" => TaskStatus::Pending,
            "processing" | "running" | "generating" => TaskStatus::Processing,
            "content_generated" => TaskStatus::ContentGenerated,
            "compiling" => TaskStatus::Compiling,
            "completed" | "done" | "succeeded" => TaskStatus::Completed,
            "failed" | "error" => TaskStatus::Failed,
            "cancelled" | "canceled" => TaskStatus::Cancelled,
            _ => return None,
        };
        Some(status)
    }

    /// Like `parse_server`, treating unknown strings as `Processing`.
    pub fn from_server(s: &str) -> Self {
        Self::parse_server(s).unwrap_or_else(|| {
            tracing::warn!(status = s, "unknown server status, treating as processing");
            TaskStatus::Processing
        })
    }

    /// `Completed`, `Failed` and `Cancelled` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a server-reported progress value into `[0, 100]`.
pub fn clamp_progress(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

/// A submitted generation job as tracked by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: JobId,
    pub status: TaskStatus,
    /// Percent complete, always within `[0, 100]`.
    pub progress: u8,
    /// Successful status polls made so far.
    pub retry_count: u32,
    /// Retryable poll failures in a row; reset by any successful poll.
    pub consecutive_error_count: u32,
    pub last_error: Option<TaskError>,
    /// Last message the server attached to a status response.
    pub message: Option<String>,
    /// Identity key of the submission that created the task.
    pub request_key: Option<String>,
    pub created_at: SystemTime,
    pub last_polled_at: Option<SystemTime>,
}

impl Task {
    /// A freshly submitted task in `Pending`.
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Pending,
            progress: 0,
            retry_count: 0,
            consecutive_error_count: 0,
            last_error: None,
            message: None,
            request_key: None,
            created_at: SystemTime::now(),
            last_polled_at: None,
        }
    }

    pub fn with_request_key(mut self, key: impl Into<String>) -> Self {
        self.request_key = Some(key.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `status` unless already terminal. Returns whether the state changed.
    pub(crate) fn transition(&mut self, status: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}
