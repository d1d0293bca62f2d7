//! Retry loop: run an async call until success or the policy says stop.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use super::classify;
use super::error::{CallFailure, TaskError};
use super::policy::{BackoffPolicy, RetryDecision};

/// Runs `f` until it succeeds, fails with a non-retryable error, the token is
/// cancelled, or `policy.max_attempts` is reached. Sleeps for the backoff delay
/// between attempts; the sleep is abandoned as soon as `cancel` fires.
///
/// The surfaced error carries the number of attempts made.
pub async fn run_with_retry<T, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<T, TaskError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallFailure>>,
{
    let mut attempt = 1u32;
    loop {
        if cancel.is_cancelled() {
            return Err(TaskError::cancelled().with_attempts(attempt - 1));
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFailure::Cancelled),
            r = f() => r,
        };
        let failure = match result {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };
        let error = classify::classify(&failure).with_attempts(attempt);
        match policy.decide(attempt, &error) {
            RetryDecision::NoRetry => return Err(error),
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(attempt, ?delay, error = %error, "retrying after failure");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(TaskError::cancelled().with_attempts(attempt));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}
