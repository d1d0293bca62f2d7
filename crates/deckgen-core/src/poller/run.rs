//! Poll loop: one status request per cycle until the task is terminal.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::{PollSettings, TaskOutcome};
use crate::api::{JobApi, StatusResponse};
use crate::events::TaskObserver;
use crate::retry::{classify, TaskError};
use crate::task::{clamp_progress, Task, TaskStatus};
use crate::throttle::RequestThrottler;

/// What one cycle decided.
enum Step {
    Sleep(Duration),
    Done(TaskOutcome),
}

/// Drives tasks to a terminal state. Cheap to share; one `watch` per task.
pub struct StatusPoller {
    api: Arc<dyn JobApi>,
    throttler: Arc<RequestThrottler>,
    settings: PollSettings,
}

impl StatusPoller {
    pub fn new(
        api: Arc<dyn JobApi>,
        throttler: Arc<RequestThrottler>,
        settings: PollSettings,
    ) -> Self {
        Self {
            api,
            throttler,
            settings,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Poll `task` until it completes, fails, times out or `cancel` fires.
    ///
    /// The first poll is issued immediately. Every request and every sleep is
    /// raced against `cancel`; once it fires no further request is made and the
    /// only notification is `on_cancelled`.
    pub async fn watch(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
        observer: &dyn TaskObserver,
    ) -> TaskOutcome {
        if task.is_terminal() {
            return settled(task);
        }
        let job_id = task.id.clone();
        let mut interval = self.settings.interval_for(&task);
        let mut calls = 0u32;
        tracing::debug!(task_id = %job_id, "watch started");

        loop {
            if cancel.is_cancelled() {
                return cancelled(task, observer);
            }

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = self.throttler.execute(|| self.api.status(&job_id)) => Some(r),
            };
            let Some(reply) = reply else {
                return cancelled(task, observer);
            };
            calls += 1;

            let step = match reply {
                Ok(response) => {
                    task.consecutive_error_count = 0;
                    task.retry_count += 1;
                    task.last_polled_at = Some(SystemTime::now());
                    self.on_status(&mut task, response, &mut interval, observer)
                }
                Err(failure) => {
                    let error = classify(&failure).with_attempts(calls);
                    self.on_failure(&mut task, error, observer)
                }
            };

            let delay = match step {
                Step::Done(outcome) => return outcome,
                Step::Sleep(delay) => delay,
            };
            tracing::debug!(task_id = %job_id, ?delay, "next poll scheduled");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(task, observer),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn on_status(
        &self,
        task: &mut Task,
        response: StatusResponse,
        interval: &mut super::AdaptiveInterval,
        observer: &dyn TaskObserver,
    ) -> Step {
        let status = TaskStatus::from_server(&response.status);
        if let Some(raw) = response.progress {
            let progress = clamp_progress(raw);
            if progress < task.progress {
                tracing::warn!(
                    task_id = %task.id,
                    from = task.progress,
                    to = progress,
                    "server reported progress regression"
                );
            }
            task.progress = progress;
        }
        if response.message.is_some() {
            task.message = response.message.clone();
        }
        tracing::debug!(
            task_id = %task.id,
            status = %status,
            progress = task.progress,
            poll = task.retry_count,
            "status polled"
        );

        match status {
            TaskStatus::Completed => {
                task.progress = 100;
                task.transition(TaskStatus::Completed);
                let result = completion_payload(response);
                tracing::info!(task_id = %task.id, polls = task.retry_count, "task completed");
                observer.on_completed(task, &result);
                Step::Done(TaskOutcome::Completed {
                    task: task.clone(),
                    result,
                })
            }
            TaskStatus::Failed => {
                let message = response
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "job failed on the server".to_string());
                let error = TaskError::server_failed(message).with_attempts(task.retry_count);
                self.fail(task, error, observer)
            }
            TaskStatus::Cancelled => {
                tracing::info!(task_id = %task.id, "task cancelled by the service");
                cancelled_ref(task, observer)
            }
            other => {
                task.transition(other);
                observer.on_progress(task);
                if task.retry_count >= self.settings.max_poll_attempts {
                    return self.fail(task, TaskError::timeout(task.retry_count), observer);
                }
                Step::Sleep(interval.next(task.progress))
            }
        }
    }

    fn on_failure(&self, task: &mut Task, error: TaskError, observer: &dyn TaskObserver) -> Step {
        task.last_error = Some(error.clone());
        if error.is_cancelled() {
            return cancelled_ref(task, observer);
        }
        if !error.retryable {
            return self.fail(task, error, observer);
        }
        task.consecutive_error_count += 1;
        if task.consecutive_error_count > self.settings.max_consecutive_errors {
            return self.fail(task, error, observer);
        }
        let delay = self
            .settings
            .error_backoff
            .delay(task.consecutive_error_count);
        tracing::warn!(
            task_id = %task.id,
            consecutive = task.consecutive_error_count,
            ?delay,
            error = %error,
            "status poll failed, retrying"
        );
        Step::Sleep(delay)
    }

    fn fail(&self, task: &mut Task, error: TaskError, observer: &dyn TaskObserver) -> Step {
        task.last_error = Some(error.clone());
        task.transition(TaskStatus::Failed);
        tracing::info!(task_id = %task.id, error = %error, "task failed");
        observer.on_failed(task, &error);
        Step::Done(TaskOutcome::Failed {
            task: task.clone(),
            error,
        })
    }
}

fn cancelled(mut task: Task, observer: &dyn TaskObserver) -> TaskOutcome {
    task.transition(TaskStatus::Cancelled);
    tracing::info!(task_id = %task.id, "task cancelled");
    observer.on_cancelled(&task);
    TaskOutcome::Cancelled { task }
}

fn cancelled_ref(task: &mut Task, observer: &dyn TaskObserver) -> Step {
    task.transition(TaskStatus::Cancelled);
    observer.on_cancelled(task);
    Step::Done(TaskOutcome::Cancelled { task: task.clone() })
}

/// Outcome for a task that was already terminal when handed in.
fn settled(task: Task) -> TaskOutcome {
    match task.status {
        TaskStatus::Completed => TaskOutcome::Completed {
            task,
            result: Map::new(),
        },
        TaskStatus::Cancelled => TaskOutcome::Cancelled { task },
        _ => {
            let error = task
                .last_error
                .clone()
                .unwrap_or_else(|| TaskError::server_failed("job failed"));
            TaskOutcome::Failed { task, error }
        }
    }
}

/// The final status payload as a JSON object.
fn completion_payload(response: StatusResponse) -> Map<String, Value> {
    match serde_json::to_value(response) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::scripted::ScriptedApi;
    use crate::events::{ChannelObserver, NoopObserver, TaskEvent};
    use crate::retry::{BackoffPolicy, CallFailure, ErrorKind};
    use serde_json::json;

    fn settings() -> PollSettings {
        PollSettings {
            base_interval: Duration::from_millis(3_000),
            min_interval: Duration::from_millis(1_000),
            max_interval: Duration::from_millis(30_000),
            stall_multiplier: 1.5,
            max_poll_attempts: 200,
            max_consecutive_errors: 3,
            error_backoff: BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1_000),
                multiplier: 2.0,
                max_delay: Duration::from_secs(30),
                jitter: false,
            },
        }
    }

    fn poller(api: &Arc<ScriptedApi>, settings: PollSettings) -> StatusPoller {
        let api: Arc<dyn JobApi> = api.clone();
        let throttler = Arc::new(RequestThrottler::new(3, Duration::ZERO));
        StatusPoller::new(api, throttler, settings)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<TaskEvent>) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn progress_sequence_shrinks_interval_and_stops_at_completed() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("pending", 0.0)
            .push_progress("processing", 15.0)
            .push_progress("content_generated", 45.0)
            .push_progress("compiling", 80.0)
            .push_status(Ok(StatusResponse::new("completed", 100.0)
                .with_message("done")));
        let (observer, mut rx) = ChannelObserver::new();

        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &observer)
            .await;

        let TaskOutcome::Completed { task, result } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.progress, 100);
        assert_eq!(task.retry_count, 5);
        assert_eq!(result.get("message"), Some(&json!("done")));
        assert_eq!(api.status_calls(), 5);

        // 0 stalls (1.5x), +15 base, +30 halves, +35 halves.
        let gaps = api.status_gaps();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(4_500),
                Duration::from_millis(3_000),
                Duration::from_millis(1_500),
                Duration::from_millis(1_500),
            ]
        );
        assert!(gaps[2] < gaps[1]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        assert!(matches!(events[4], TaskEvent::Completed { .. }));

        // Nothing is scheduled after completion.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(api.status_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_back_off_then_surface_network_error() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(Err(CallFailure::transport("connection reset")));
        let (observer, mut rx) = ChannelObserver::new();

        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &observer)
            .await;

        let error = outcome.error().cloned().unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
        assert_eq!(error.attempts, 4);
        assert_eq!(outcome.task().status, TaskStatus::Failed);
        assert_eq!(
            api.status_gaps(),
            vec![
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(4_000),
            ]
        );
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1, "retries are not surfaced");
        assert!(matches!(events[0], TaskEvent::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_fails_without_retry() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(Err(CallFailure::status(404, "no such job")));

        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &NoopObserver)
            .await;

        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Http);
        assert_eq!(error.http_status, Some(404));
        assert!(!error.retryable);
        assert_eq!(api.status_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_consecutive_errors() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(Err(CallFailure::status(503, "")))
            .push_status(Err(CallFailure::status(503, "")))
            .push_progress("processing", 20.0)
            .push_status(Err(CallFailure::status(503, "")))
            .push_status(Err(CallFailure::status(503, "")))
            .push_status(Err(CallFailure::status(503, "")))
            .push_progress("completed", 100.0);

        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &NoopObserver)
            .await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.task().consecutive_error_count, 0);
        assert_eq!(api.status_calls(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn server_failure_carries_message() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("processing", 30.0).push_status(Ok(
            StatusResponse::new("failed", 30.0).with_message("image generation quota exceeded"),
        ));

        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &NoopObserver)
            .await;
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Unknown);
        assert!(!error.retryable);
        assert_eq!(error.message, "image generation quota exceeded");
        assert_eq!(outcome.task().progress, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_max_poll_attempts() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("processing", 10.0);
        let mut s = settings();
        s.max_poll_attempts = 4;

        let outcome = poller(&api, s)
            .watch(Task::new("job-1"), &CancellationToken::new(), &NoopObserver)
            .await;
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, ErrorKind::Timeout);
        assert_eq!(error.attempts, 4);
        assert_eq!(api.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_request_drops_the_call() {
        let api = Arc::new(ScriptedApi::new().with_status_delay(Duration::from_secs(10)));
        api.push_progress("processing", 40.0);
        let dyn_api: Arc<dyn JobApi> = api.clone();
        let throttler = Arc::new(RequestThrottler::new(3, Duration::ZERO));
        let poller = StatusPoller::new(dyn_api, Arc::clone(&throttler), settings());
        let token = CancellationToken::new();
        let (observer, mut rx) = ChannelObserver::new();

        let canceller = {
            let token = token.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                token.cancel();
            }
        };
        let (outcome, ()) = tokio::join!(
            poller.watch(Task::new("job-1"), &token, &observer),
            canceller
        );

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.task().progress, 0);
        assert_eq!(api.status_calls(), 1);
        assert_eq!(throttler.active_count(), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(api.status_finished(), 0);
        assert_eq!(api.status_calls(), 1);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], TaskEvent::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_sleep_stops_polling() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("processing", 10.0);
        let poller = poller(&api, settings());
        let token = CancellationToken::new();
        let (observer, mut rx) = ChannelObserver::new();

        let canceller = {
            let token = token.clone();
            async move {
                // First poll happens at t=0; the next one is due at t=4.5s.
                tokio::time::sleep(Duration::from_secs(2)).await;
                token.cancel();
            }
        };
        let (outcome, ()) = tokio::join!(
            poller.watch(Task::new("job-1"), &token, &observer),
            canceller
        );

        assert!(outcome.is_cancelled());
        assert_eq!(outcome.task().status, TaskStatus::Cancelled);
        assert_eq!(outcome.task().progress, 10);
        assert_eq!(api.status_calls(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(api.status_calls(), 1);

        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(TaskEvent::Cancelled { .. })));
        assert!(events
            .iter()
            .all(|e| !matches!(e, TaskEvent::Completed { .. } | TaskEvent::Failed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_makes_no_call() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("processing", 10.0);
        let token = CancellationToken::new();
        token.cancel();
        let outcome = poller(&api, settings())
            .watch(Task::new("job-1"), &token, &NoopObserver)
            .await;
        assert!(outcome.is_cancelled());
        assert_eq!(api.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_progress_is_clamped() {
        let api = Arc::new(ScriptedApi::new());
        api.push_progress("processing", 140.0)
            .push_progress("processing", -3.0)
            .push_progress("completed", 100.0);
        let (observer, mut rx) = ChannelObserver::new();
        poller(&api, settings())
            .watch(Task::new("job-1"), &CancellationToken::new(), &observer)
            .await;
        let progress: Vec<u8> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TaskEvent::Progress { progress, .. } => Some(progress),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![100, 0]);
    }

    #[tokio::test]
    async fn terminal_task_is_returned_untouched() {
        let api = Arc::new(ScriptedApi::new());
        let mut task = Task::new("job-1");
        task.transition(TaskStatus::Completed);
        let outcome = poller(&api, settings())
            .watch(task, &CancellationToken::new(), &NoopObserver)
            .await;
        assert!(outcome.is_completed());
        assert_eq!(api.status_calls(), 0);
    }
}
