//! History of finished tasks behind an injected key-value store.
//!
//! The client writes one `TaskRecord` per terminal outcome under `task:<id>`.
//! Persistence is the embedder's concern; `MemoryStore` is the built-in backend.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::poller::TaskOutcome;
use crate::retry::ErrorKind;
use crate::task::TaskStatus;
use crate::util::lock;

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: String) -> Result<()>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool>;
    /// Keys starting with `prefix`, in sorted order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Process-local store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(lock(&self.entries).remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(lock(&self.entries)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

const TASK_PREFIX: &str = "task:";

/// Summary of a finished task as stored in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub polls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Seconds since the Unix epoch.
    pub finished_at: u64,
}

impl TaskRecord {
    pub fn from_outcome(outcome: &TaskOutcome) -> Self {
        let task = outcome.task();
        let error = outcome.error();
        Self {
            id: task.id.clone(),
            status: task.status,
            progress: task.progress,
            polls: task.retry_count,
            request_key: task.request_key.clone(),
            error_kind: error.map(|e| e.kind),
            http_status: error.and_then(|e| e.http_status),
            error_message: error.map(|e| e.message.clone()),
            attempts: error.map(|e| e.attempts).unwrap_or(task.retry_count),
            finished_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }

    pub fn store_key(id: &str) -> String {
        format!("{}{}", TASK_PREFIX, id)
    }
}

/// Write the record for `outcome`, replacing any earlier one for the same task.
pub fn record_outcome(store: &dyn KeyValueStore, outcome: &TaskOutcome) -> Result<TaskRecord> {
    let record = TaskRecord::from_outcome(outcome);
    let json = serde_json::to_string(&record)?;
    store
        .set(&TaskRecord::store_key(&record.id), json)
        .with_context(|| format!("store history for task {}", record.id))?;
    Ok(record)
}

pub fn load_record(store: &dyn KeyValueStore, id: &str) -> Result<Option<TaskRecord>> {
    let Some(json) = store.get(&TaskRecord::store_key(id))? else {
        return Ok(None);
    };
    let record = serde_json::from_str(&json)
        .with_context(|| format!("corrupt history record for task {}", id))?;
    Ok(Some(record))
}

/// Every recorded task, ordered by id.
pub fn list_records(store: &dyn KeyValueStore) -> Result<Vec<TaskRecord>> {
    let mut out = Vec::new();
    for key in store.keys(TASK_PREFIX)? {
        if let Some(json) = store.get(&key)? {
            match serde_json::from_str(&json) {
                Ok(record) => out.push(record),
                Err(e) => tracing::warn!(key = %key, error = %e, "skipping corrupt history record"),
            }
        }
    }
    Ok(out)
}

pub fn forget(store: &dyn KeyValueStore, id: &str) -> Result<bool> {
    store.delete(&TaskRecord::store_key(id))
}
