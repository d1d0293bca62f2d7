//! Resolve a completed job into its artifact URL.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::JobApi;
use crate::cache::RequestCache;
use crate::retry::{run_with_retry, BackoffPolicy, ErrorKind, TaskError};
use crate::task::{Task, TaskStatus};
use crate::throttle::RequestThrottler;

/// Looks up download URLs, caching them per job id.
pub struct DownloadResolver {
    api: Arc<dyn JobApi>,
    throttler: Arc<RequestThrottler>,
    cache: Arc<RequestCache<String>>,
    retry: BackoffPolicy,
}

impl DownloadResolver {
    pub fn new(
        api: Arc<dyn JobApi>,
        throttler: Arc<RequestThrottler>,
        cache: Arc<RequestCache<String>>,
        retry: BackoffPolicy,
    ) -> Self {
        Self {
            api,
            throttler,
            cache,
            retry,
        }
    }

    pub fn cache(&self) -> &Arc<RequestCache<String>> {
        &self.cache
    }

    /// URL of the artifact of a completed task.
    pub async fn resolve(&self, task: &Task, cancel: &CancellationToken) -> Result<Url, TaskError> {
        if task.status != TaskStatus::Completed {
            return Err(TaskError::new(
                ErrorKind::Unknown,
                format!("task {} is {}, not completed", task.id, task.status),
                false,
            ));
        }
        self.resolve_id(&task.id, cancel).await
    }

    /// URL of the artifact of `job_id`, without checking the task state locally.
    pub async fn resolve_id(&self, job_id: &str, cancel: &CancellationToken) -> Result<Url, TaskError> {
        if let Some(hit) = self.cache.get(job_id) {
            tracing::debug!(job_id, "download url from cache");
            return parse_url(&hit);
        }

        let response = run_with_retry(&self.retry, cancel, || {
            self.throttler.execute(|| self.api.download(job_id))
        })
        .await?;
        let url = parse_url(&response.download_url)?;
        self.cache.set(job_id, url.to_string());
        tracing::info!(job_id, %url, "download url resolved");
        Ok(url)
    }
}

fn parse_url(raw: &str) -> Result<Url, TaskError> {
    Url::parse(raw.trim()).map_err(|e| {
        TaskError::new(
            ErrorKind::Unknown,
            format!("service returned an invalid download url {:?}: {}", raw, e),
            false,
        )
    })
}
