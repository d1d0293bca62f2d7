//! reqwest-backed implementation of `JobApi`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use url::Url;

use super::types::{DownloadResponse, GenerateRequest, GenerateResponse, StatusResponse};
use super::JobApi;
use crate::config::DeckgenConfig;
use crate::retry::CallFailure;

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Longest error body kept in a failure message.
const MAX_ERROR_BODY: usize = 512;

/// Job API client over HTTP.
///
/// Dropping a returned future aborts the underlying request; the poller relies
/// on this for cancellation.
#[derive(Debug, Clone)]
pub struct HttpJobApi {
    base: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpJobApi {
    pub fn new(cfg: &DeckgenConfig) -> anyhow::Result<Self> {
        let mut endpoint = cfg.endpoint.trim().to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let base = Url::parse(&endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .user_agent(concat!("deckgen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let api_key = Some(cfg.api_key.trim().to_string()).filter(|k| !k.is_empty());
        Ok(Self {
            base,
            api_key,
            client,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `{endpoint}/{route}/{job_id}` with the job id percent-encoded as one segment.
    fn job_url(&self, route: &str, job_id: &str) -> Result<Url, CallFailure> {
        let mut url = self.route_url(route)?;
        url.path_segments_mut()
            .map_err(|_| CallFailure::transport(format!("endpoint cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .push(job_id);
        Ok(url)
    }

    fn route_url(&self, route: &str) -> Result<Url, CallFailure> {
        self.base
            .join(route)
            .map_err(|e| CallFailure::transport(format!("build url for {}: {}", route, e)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, CallFailure> {
        let response = self
            .authorize(builder)
            .send()
            .await
            .map_err(|e| transport_failure(&e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallFailure::status(status.as_u16(), error_message(&body)));
        }
        let bytes = response.bytes().await.map_err(|e| transport_failure(&e))?;
        serde_json::from_slice(&bytes).map_err(|e| CallFailure::decode(e.to_string()))
    }
}

fn transport_failure(e: &reqwest::Error) -> CallFailure {
    match e.status() {
        Some(status) => CallFailure::status(status.as_u16(), e.to_string()),
        None => CallFailure::transport(e.to_string()),
    }
}

/// Prefer a `message`/`error` field from a JSON error body, else the trimmed text.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error", "detail"] {
            if let Some(msg) = value.get(field).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, CallFailure> {
        let url = self.route_url("generate")?;
        tracing::debug!(%url, topic = %request.topic, "POST generate");
        self.send(self.client.post(url).json(request)).await
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, CallFailure> {
        let url = self.job_url("status", job_id)?;
        tracing::debug!(%url, "GET status");
        self.send(self.client.get(url)).await
    }

    async fn download(&self, job_id: &str) -> Result<DownloadResponse, CallFailure> {
        let url = self.job_url("download", job_id)?;
        tracing::debug!(%url, "GET download");
        self.send(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(endpoint: &str) -> HttpJobApi {
        let cfg = DeckgenConfig {
            endpoint: endpoint.to_string(),
            ..DeckgenConfig::default()
        };
        HttpJobApi::new(&cfg).unwrap()
    }

    #[test]
    fn routes_are_joined_under_the_endpoint_path() {
        let api = api("https://api.example.com/prod");
        assert_eq!(
            api.route_url("generate").unwrap().as_str(),
            "https://api.example.com/prod/generate"
        );
        assert_eq!(
            api.job_url("status", "abc-123").unwrap().as_str(),
            "https://api.example.com/prod/status/abc-123"
        );
    }

    #[test]
    fn job_id_is_encoded_as_single_segment() {
        let api = api("https://api.example.com/");
        assert_eq!(
            api.job_url("download", "a/b c").unwrap().as_str(),
            "https://api.example.com/download/a%2Fb%20c"
        );
    }

    #[test]
    fn empty_api_key_sends_no_header() {
        assert!(api("https://api.example.com").api_key.is_none());
    }

    #[test]
    fn error_message_prefers_json_fields() {
        assert_eq!(error_message(r#"{"message":"Forbidden"}"#), "Forbidden");
        assert_eq!(error_message(r#"{"error":"no such job"}"#), "no such job");
        assert_eq!(error_message("  plain text \n"), "plain text");
        assert_eq!(error_message(&"x".repeat(2_000)).len(), MAX_ERROR_BODY);
    }
}
