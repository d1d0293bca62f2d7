//! Classify raw call failures into typed, retry-aware errors.

use super::error::{CallFailure, ErrorKind, TaskError};

/// Statuses worth retrying: request timeout, throttling, and transient server errors.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Classify an HTTP status. Returns the kind and whether a retry can help.
pub fn classify_http_status(status: u16) -> (ErrorKind, bool) {
    if RETRYABLE_STATUSES.contains(&status) {
        return (ErrorKind::Http, true);
    }
    if (400..=499).contains(&status) {
        return (ErrorKind::Http, false);
    }
    (ErrorKind::Unknown, false)
}

/// Classify a raw failure. Total: anything unrecognised becomes `Unknown`.
pub fn classify(failure: &CallFailure) -> TaskError {
    match failure {
        CallFailure::Cancelled => TaskError::cancelled(),
        CallFailure::Transport { message } => TaskError::new(ErrorKind::Network, message, true),
        CallFailure::Status { status, message } => {
            let (kind, retryable) = classify_http_status(*status);
            let message = if message.is_empty() {
                format!("HTTP {}", status)
            } else {
                message.clone()
            };
            TaskError::new(kind, message, retryable).with_http_status(*status)
        }
        CallFailure::Decode { message } => TaskError::new(ErrorKind::Unknown, message, false),
    }
}
