//! Job submission with request-identity dedup.
//!
//! A submission is keyed by the identity of its normalized payload. Identical
//! submissions made while one is in flight share that call, and a job handle
//! obtained within the cache TTL is reused instead of creating another job.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{GenerateRequest, GenerateResponse, JobApi};
use crate::cache::RequestCache;
use crate::retry::{run_with_retry, BackoffPolicy, ErrorKind, TaskError};
use crate::task::Task;
use crate::throttle::RequestThrottler;

/// Submission failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Rejected locally; nothing was sent.
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl RequestError {
    /// The classified error, if the failure came from the service.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            RequestError::Task(e) => Some(e),
            RequestError::Invalid(_) => None,
        }
    }
}

/// Creates jobs on the service.
pub struct TaskSubmitter {
    api: Arc<dyn JobApi>,
    throttler: Arc<RequestThrottler>,
    cache: Arc<RequestCache<GenerateResponse>>,
    retry: BackoffPolicy,
}

impl TaskSubmitter {
    pub fn new(
        api: Arc<dyn JobApi>,
        throttler: Arc<RequestThrottler>,
        cache: Arc<RequestCache<GenerateResponse>>,
        retry: BackoffPolicy,
    ) -> Self {
        Self {
            api,
            throttler,
            cache,
            retry,
        }
    }

    pub fn cache(&self) -> &Arc<RequestCache<GenerateResponse>> {
        &self.cache
    }

    /// Submit, reusing a recent job for an identical request.
    pub async fn submit(&self, request: &GenerateRequest) -> Result<Task, RequestError> {
        self.submit_with(request, false, &CancellationToken::new())
            .await
    }

    /// Submit a request. With `fresh`, a cached handle is ignored and a new job
    /// is created (identical concurrent submissions still share one call).
    ///
    /// `cancel` abandons the wait. The shared call keeps running for other
    /// waiters and is aborted once nobody awaits it.
    pub async fn submit_with(
        &self,
        request: &GenerateRequest,
        fresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Task, RequestError> {
        request.validate().map_err(RequestError::Invalid)?;
        let request = request.normalized();
        let key = request.identity_key();

        if !fresh {
            if let Some(hit) = self.cache.get(&key) {
                tracing::info!(job_id = %hit.job_id, key = %short(&key), "reusing recent submission");
                return Ok(Task::new(hit.job_id).with_request_key(key));
            }
        }

        if cancel.is_cancelled() {
            return Err(TaskError::cancelled().into());
        }
        let api = Arc::clone(&self.api);
        let throttler = Arc::clone(&self.throttler);
        let policy = self.retry;
        let call = self.cache.dedupe(&key, move || async move {
            // The shared call outlives any single caller, so it runs under its own token.
            let detached = CancellationToken::new();
            run_with_retry(&policy, &detached, || {
                throttler.execute(|| api.generate(&request))
            })
            .await
        });

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TaskError::cancelled().into()),
            r = call => r?,
        };
        if response.job_id.trim().is_empty() {
            return Err(TaskError::new(
                ErrorKind::Unknown,
                "service returned an empty job id",
                false,
            )
            .into());
        }

        self.cache.set(&key, response.clone());
        tracing::info!(job_id = %response.job_id, key = %short(&key), "job submitted");
        Ok(Task::new(response.job_id).with_request_key(key))
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
