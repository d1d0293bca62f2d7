//! Error classification, backoff policy, and the async retry loop.
//!
//! This module turns raw call failures (transport errors, HTTP statuses,
//! cancellation) into typed errors and decides on exponential backoff so that
//! the submitter, poller, and download resolver share one consistent policy.

mod classify;
mod error;
mod policy;
mod run;

pub use classify::{classify, classify_http_status};
pub use error::{CallFailure, ErrorKind, TaskError};
pub use policy::{BackoffPolicy, RetryDecision};
pub use run::run_with_retry;
