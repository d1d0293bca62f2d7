//! Raw call failures and the typed error surfaced to callers.

use std::fmt;

/// What went wrong with a single call to the job API, before classification.
///
/// Transports produce this; `classify` turns it into a `TaskError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// The call was aborted because its cancellation token fired.
    Cancelled,
    /// No response was obtained (connect, DNS, reset, request timeout).
    Transport { message: String },
    /// The server answered with a non-2xx status.
    Status { status: u16, message: String },
    /// A response arrived but its body could not be used.
    Decode { message: String },
}

impl CallFailure {
    pub fn transport(message: impl Into<String>) -> Self {
        CallFailure::Transport {
            message: message.into(),
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        CallFailure::Status {
            status,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        CallFailure::Decode {
            message: message.into(),
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Cancelled => write!(f, "cancelled"),
            CallFailure::Transport { message } => write!(f, "transport: {}", message),
            CallFailure::Status { status, message } if message.is_empty() => {
                write!(f, "HTTP {}", status)
            }
            CallFailure::Status { status, message } => write!(f, "HTTP {}: {}", status, message),
            CallFailure::Decode { message } => write!(f, "decode: {}", message),
        }
    }
}

impl std::error::Error for CallFailure {}

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No response obtained from the service.
    Network,
    /// The service answered with an error status (see `TaskError::http_status`).
    Http,
    /// The caller cancelled the task.
    Cancelled,
    /// The poller gave up after `max_poll_attempts` polls.
    Timeout,
    /// Anything that does not fit the other kinds.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Http => "http",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Classified failure with enough context to present and to decide on a manual retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub kind: ErrorKind,
    /// Last HTTP status seen, if the failure came from a response.
    pub http_status: Option<u16>,
    pub message: String,
    pub retryable: bool,
    /// Number of calls made before this error was surfaced.
    pub attempts: u32,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            http_status: None,
            message: message.into(),
            retryable,
            attempts: 0,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "cancelled by user", false)
    }

    /// Poll budget exhausted. Retryable: submitting a new watch may still succeed.
    pub fn timeout(attempts: u32) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("job did not finish after {} polls", attempts),
            true,
        )
        .with_attempts(attempts)
    }

    /// Failure reported by the service in a status payload.
    pub fn server_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message, false)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{} {}: {}", self.kind.as_str(), status, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for TaskError {}
