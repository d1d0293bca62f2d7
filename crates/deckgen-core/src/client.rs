//! `DeckClient`: the components wired together from one `DeckgenConfig`.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{GenerateRequest, HttpJobApi, JobApi, StatusResponse};
use crate::cache::RequestCache;
use crate::config::DeckgenConfig;
use crate::control::{CancellationController, ControlError};
use crate::download::DownloadResolver;
use crate::events::TaskObserver;
use crate::poller::{PollSettings, StatusPoller, TaskOutcome};
use crate::retry::{run_with_retry, TaskError};
use crate::store::{self, KeyValueStore, MemoryStore};
use crate::submit::{RequestError, TaskSubmitter};
use crate::task::Task;
use crate::throttle::RequestThrottler;

/// Submit, watch, cancel and download generation jobs.
///
/// All calls share one throttler, so `throttle.max_concurrent` bounds the
/// whole client. Configuration is applied by `reconfigure`; nothing reads it
/// from globals.
pub struct DeckClient {
    config: DeckgenConfig,
    api: Arc<dyn JobApi>,
    /// Whether `api` was built from the config (and is rebuilt on reconfigure).
    owns_transport: bool,
    throttler: Arc<RequestThrottler>,
    submitter: TaskSubmitter,
    poller: StatusPoller,
    downloads: DownloadResolver,
    control: Arc<CancellationController>,
    history: Arc<dyn KeyValueStore>,
    shutdown: CancellationToken,
}

impl DeckClient {
    /// Client talking HTTP to `config.endpoint`.
    pub fn new(config: DeckgenConfig) -> Result<Self> {
        config.validate()?;
        let api: Arc<dyn JobApi> = Arc::new(HttpJobApi::new(&config)?);
        let mut client = Self::with_api(config, api);
        client.owns_transport = true;
        Ok(client)
    }

    /// Client over any `JobApi` implementation.
    pub fn with_api(config: DeckgenConfig, api: Arc<dyn JobApi>) -> Self {
        let throttler = Arc::new(RequestThrottler::from_config(&config.throttle));
        let (submitter, poller, downloads) = build_parts(&config, &api, &throttler);
        Self {
            config,
            api,
            owns_transport: false,
            throttler,
            submitter,
            poller,
            downloads,
            control: Arc::new(CancellationController::new()),
            history: Arc::new(MemoryStore::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Record finished tasks into `store` instead of the in-memory default.
    pub fn with_history(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.history = store;
        self
    }

    pub fn config(&self) -> &DeckgenConfig {
        &self.config
    }

    pub fn throttler(&self) -> &Arc<RequestThrottler> {
        &self.throttler
    }

    pub fn control(&self) -> &Arc<CancellationController> {
        &self.control
    }

    pub fn history(&self) -> &Arc<dyn KeyValueStore> {
        &self.history
    }

    /// Replace the configuration. Caches and the throttler start over; tasks
    /// being watched keep the settings they started with.
    pub fn reconfigure(&mut self, config: DeckgenConfig) -> Result<()> {
        config.validate()?;
        if self.owns_transport {
            self.api = Arc::new(HttpJobApi::new(&config)?);
        }
        // In-flight watches hold the current throttler; replacing it would let
        // them run alongside a second concurrency budget.
        if config.throttle != self.config.throttle {
            self.throttler = Arc::new(RequestThrottler::from_config(&config.throttle));
        }
        let (submitter, poller, downloads) = build_parts(&config, &self.api, &self.throttler);
        self.submitter = submitter;
        self.poller = poller;
        self.downloads = downloads;
        self.config = config;
        tracing::info!(endpoint = %self.config.endpoint, "client reconfigured");
        Ok(())
    }

    /// Periodically evict expired cache entries until the client is dropped.
    pub fn spawn_cache_sweeper(&self) -> Vec<JoinHandle<()>> {
        let period = std::time::Duration::from_millis(self.config.cache.sweep_interval_ms);
        vec![
            self.submitter
                .cache()
                .spawn_sweeper(period, self.shutdown.child_token()),
            self.downloads
                .cache()
                .spawn_sweeper(period, self.shutdown.child_token()),
        ]
    }

    pub async fn submit(&self, request: &GenerateRequest) -> Result<Task, RequestError> {
        self.submitter.submit(request).await
    }

    pub async fn submit_with(
        &self,
        request: &GenerateRequest,
        fresh: bool,
        cancel: &CancellationToken,
    ) -> Result<Task, RequestError> {
        self.submitter.submit_with(request, fresh, cancel).await
    }

    /// Follow `task` to a terminal state on the current task.
    ///
    /// Fails with `AlreadyWatching` if another watch of the same job is active.
    /// The outcome is recorded in history.
    pub async fn watch(
        &self,
        task: Task,
        observer: &dyn TaskObserver,
    ) -> Result<TaskOutcome, ControlError> {
        let token = self.control.register(&task.id)?;
        Ok(run_watch(&self.poller, &self.control, &*self.history, task, token, observer).await)
    }

    /// Like `watch`, on a spawned tokio task. The registration happens before
    /// this returns, so `cancel(task.id)` is effective immediately.
    pub fn spawn_watch(
        &self,
        task: Task,
        observer: Arc<dyn TaskObserver>,
    ) -> Result<JoinHandle<TaskOutcome>, ControlError> {
        let token = self.control.register(&task.id)?;
        let poller = StatusPoller::new(
            Arc::clone(&self.api),
            Arc::clone(&self.throttler),
            self.poller.settings().clone(),
        );
        let control = Arc::clone(&self.control);
        let history = Arc::clone(&self.history);
        Ok(tokio::spawn(async move {
            run_watch(&poller, &control, &*history, task, token, &*observer).await
        }))
    }

    /// Cancel a watched task. Returns false if no watch is active for it.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.control.cancel(task_id)
    }

    /// One status query, with retry. Does not touch any watched task.
    pub async fn status(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusResponse, TaskError> {
        run_with_retry(&self.config.retry.policy(), cancel, || {
            self.throttler.execute(|| self.api.status(job_id))
        })
        .await
    }

    /// Download URL of a completed task.
    pub async fn download_url(&self, task: &Task, cancel: &CancellationToken) -> Result<Url, TaskError> {
        self.downloads.resolve(task, cancel).await
    }

    /// Download URL by job id, for jobs not watched by this client.
    pub async fn download_url_for(
        &self,
        job_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Url, TaskError> {
        self.downloads.resolve_id(job_id, cancel).await
    }
}

impl Drop for DeckClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn build_parts(
    config: &DeckgenConfig,
    api: &Arc<dyn JobApi>,
    throttler: &Arc<RequestThrottler>,
) -> (TaskSubmitter, StatusPoller, DownloadResolver) {
    let policy = config.retry.policy();
    let submitter = TaskSubmitter::new(
        Arc::clone(api),
        Arc::clone(throttler),
        Arc::new(RequestCache::from_config(&config.cache)),
        policy,
    );
    let poller = StatusPoller::new(
        Arc::clone(api),
        Arc::clone(throttler),
        PollSettings::from_config(config),
    );
    let downloads = DownloadResolver::new(
        Arc::clone(api),
        Arc::clone(throttler),
        Arc::new(RequestCache::from_config(&config.cache)),
        policy,
    );
    (submitter, poller, downloads)
}

/// Unregisters the watch however the poll ends, including when it is dropped.
struct WatchGuard<'a> {
    control: &'a CancellationController,
    task_id: String,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        self.control.unregister(&self.task_id);
    }
}

async fn run_watch(
    poller: &StatusPoller,
    control: &CancellationController,
    history: &dyn KeyValueStore,
    task: Task,
    token: CancellationToken,
    observer: &dyn TaskObserver,
) -> TaskOutcome {
    let _guard = WatchGuard {
        control,
        task_id: task.id.clone(),
    };
    let outcome = poller.watch(task, &token, observer).await;
    if let Err(e) = store::record_outcome(history, &outcome) {
        tracing::warn!(task_id = %outcome.task().id, error = %e, "could not record history");
    }
    outcome
}
