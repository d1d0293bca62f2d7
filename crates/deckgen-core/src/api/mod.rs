//! The remote job API as seen by the client.
//!
//! `JobApi` is the seam between the resilience machinery and the transport:
//! the submitter, poller and download resolver only talk to this trait, so the
//! reqwest implementation can be swapped for a scripted one in tests.

mod http;
#[cfg(test)]
pub(crate) mod scripted;
mod types;

use async_trait::async_trait;

use crate::retry::CallFailure;

pub use http::{HttpJobApi, API_KEY_HEADER};
pub use types::{
    DownloadResponse, GenerateRequest, GenerateResponse, StatusResponse, MAX_PAGE_COUNT,
};

/// HTTP contract of the job-processing service.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// `POST /generate`
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, CallFailure>;

    /// `GET /status/{job_id}`
    async fn status(&self, job_id: &str) -> Result<StatusResponse, CallFailure>;

    /// `GET /download/{job_id}`
    async fn download(&self, job_id: &str) -> Result<DownloadResponse, CallFailure>;
}
