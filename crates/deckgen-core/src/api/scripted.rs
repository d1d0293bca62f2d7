//! In-process `JobApi` that replays scripted answers, for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::types::{DownloadResponse, GenerateRequest, GenerateResponse, StatusResponse};
use super::JobApi;
use crate::retry::CallFailure;

type Reply<T> = Result<T, CallFailure>;

/// Answers are consumed front to back; once a script runs dry its last answer
/// repeats.
#[derive(Default)]
pub(crate) struct ScriptedApi {
    generate: Mutex<Script<GenerateResponse>>,
    status: Mutex<Script<StatusResponse>>,
    download: Mutex<Script<DownloadResponse>>,
    generate_delay: Duration,
    status_delay: Duration,
    generate_calls: AtomicUsize,
    status_calls: AtomicUsize,
    status_finished: AtomicUsize,
    download_calls: AtomicUsize,
    status_times: Mutex<Vec<Instant>>,
}

struct Script<T> {
    queue: VecDeque<Reply<T>>,
    last: Option<Reply<T>>,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            last: None,
        }
    }
}

impl<T: Clone> Script<T> {
    fn next(&mut self) -> Reply<T> {
        if let Some(reply) = self.queue.pop_front() {
            self.last = Some(reply.clone());
            return reply;
        }
        self.last
            .clone()
            .unwrap_or_else(|| Err(CallFailure::transport("script exhausted")))
    }
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = delay;
        self
    }

    /// Each status call takes `delay` before answering.
    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn push_generate(&self, reply: Reply<GenerateResponse>) -> &Self {
        self.generate.lock().unwrap().queue.push_back(reply);
        self
    }

    pub fn push_job(&self, job_id: &str) -> &Self {
        self.push_generate(Ok(GenerateResponse {
            job_id: job_id.to_string(),
            status: "pending".to_string(),
        }))
    }

    pub fn push_status(&self, reply: Reply<StatusResponse>) -> &Self {
        self.status.lock().unwrap().queue.push_back(reply);
        self
    }

    pub fn push_progress(&self, status: &str, progress: f64) -> &Self {
        self.push_status(Ok(StatusResponse::new(status, progress)))
    }

    pub fn push_download(&self, reply: Reply<DownloadResponse>) -> &Self {
        self.download.lock().unwrap().queue.push_back(reply);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Status calls that ran to the end rather than being dropped mid-way.
    pub fn status_finished(&self) -> usize {
        self.status_finished.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// Gaps between consecutive status calls.
    pub fn status_gaps(&self) -> Vec<Duration> {
        let times = self.status_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl JobApi for ScriptedApi {
    async fn generate(&self, _request: &GenerateRequest) -> Reply<GenerateResponse> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        if !self.generate_delay.is_zero() {
            tokio::time::sleep(self.generate_delay).await;
        }
        self.generate.lock().unwrap().next()
    }

    async fn status(&self, _job_id: &str) -> Reply<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status_times.lock().unwrap().push(Instant::now());
        if !self.status_delay.is_zero() {
            tokio::time::sleep(self.status_delay).await;
        }
        self.status_finished.fetch_add(1, Ordering::SeqCst);
        self.status.lock().unwrap().next()
    }

    async fn download(&self, _job_id: &str) -> Reply<DownloadResponse> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.download.lock().unwrap().next()
    }
}
