//! Wire types of the job API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::task::JobId;

/// Largest deck the service accepts.
pub const MAX_PAGE_COUNT: u32 = 50;

/// Body of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Additional parameters forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GenerateRequest {
    pub fn new(topic: impl Into<String>, page_count: u32) -> Self {
        Self {
            topic: topic.into(),
            page_count,
            audience: None,
            language: None,
            style: None,
            extra: Map::new(),
        }
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Copy with trimmed, whitespace-collapsed strings and empty options dropped.
    pub fn normalized(&self) -> Self {
        let clean = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        let clean_opt = |s: &Option<String>| {
            s.as_deref()
                .map(clean)
                .filter(|v: &String| !v.is_empty())
        };
        Self {
            topic: clean(&self.topic),
            page_count: self.page_count,
            audience: clean_opt(&self.audience),
            language: clean_opt(&self.language),
            style: clean_opt(&self.style),
            extra: self
                .extra
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.trim().to_string(), normalize_value(v)))
                .collect(),
        }
    }

    /// Deterministic identity of the request: hex SHA-256 of the canonical
    /// (normalized, key-sorted) JSON form. Equal payloads give equal keys.
    pub fn identity_key(&self) -> String {
        let value = serde_json::to_value(self.normalized()).unwrap_or(Value::Null);
        let canonical = canonical_json(&value);
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }

    /// Validation done before any network call.
    pub fn validate(&self) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("topic must not be empty".to_string());
        }
        if self.page_count == 0 || self.page_count > MAX_PAGE_COUNT {
            return Err(format!(
                "page_count must be between 1 and {}, got {}",
                MAX_PAGE_COUNT, self.page_count
            ));
        }
        Ok(())
    }
}

fn normalize_value(v: &Value) -> Value {
    match v {
        Value::String(s) => Value::String(s.split_whitespace().collect::<Vec<_>>().join(" ")),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Serialize with object keys sorted at every level.
fn canonical_json(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String(k.clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

/// Response of `POST /generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub job_id: JobId,
    #[serde(default)]
    pub status: String,
}

/// Response of `GET /status/{job_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    /// Raw progress as reported; clamped by the poller.
    #[serde(default, deserialize_with = "lenient_progress")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Everything else in the payload (result metadata on completion).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>, progress: f64) -> Self {
        Self {
            status: status.into(),
            progress: Some(progress),
            message: None,
            extra: Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Accepts numbers, numeric strings, or null; anything else reads as missing.
fn lenient_progress<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').parse::<f64>().ok(),
        _ => None,
    })
}

/// Response of `GET /download/{job_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResponse {
    pub download_url: String,
}
