//! Record Store Adapter (C6): creates and verifies records in the external
//! knowledge base, chunking oversized content and retrying transient
//! failures.

use crate::core::config::Config;
use crate::core::error::RecordStoreError;
use crate::core::types::{Category, RoutedRecord};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;
const RECORD_STORE_TIMEOUT_SECS: u64 = 30;

/// Contract for the external knowledge-base store. `verify` is the
/// keystone of the safety protocol: S5 never deletes a source until this
/// returns `true` for the sidecar's `remote_id`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create(&self, record: &RoutedRecord) -> Result<String>;
    async fn verify(&self, remote_id: &str) -> Result<bool>;
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    collection: &'a str,
    title: &'a str,
    content_blocks: Vec<&'a str>,
    icon: &'a str,
    tags: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    project_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    archived: bool,
}

pub struct HttpRecordStore {
    endpoint: String,
    api_key: String,
    block_size_limit: usize,
    client: reqwest::Client,
}

impl HttpRecordStore {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RECORD_STORE_TIMEOUT_SECS))
            .build()
            .expect("failed to build record-store HTTP client");
        Self {
            endpoint: config.record_store.endpoint.clone(),
            api_key: config.record_store.api_key.clone(),
            block_size_limit: config.record_store.block_size_limit,
            client,
        }
    }

    async fn create_once(&self, record: &RoutedRecord) -> std::result::Result<String, (bool, String)> {
        let collection = collection_for(record.analysis.category);
        let blocks = chunk_content(&record.analysis.body, self.block_size_limit);
        let due_date = record
            .duration
            .as_ref()
            .map(|d| d.due_date.format("%Y-%m-%d").to_string());

        let request = CreateRequest {
            collection,
            title: &record.analysis.title,
            content_blocks: blocks.iter().map(|s| s.as_str()).collect(),
            icon: &record.icon,
            tags: record.tags.iter().map(|t| t.as_str()).collect(),
            project_id: record.project_id.as_deref(),
            due_date,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| (true, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err((false, format!("authentication failed: {status}")));
        }
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY || status == reqwest::StatusCode::BAD_REQUEST {
            return Err((false, format!("schema mismatch: {status}")));
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err((true, format!("transient error: {status}")));
        }
        if !status.is_success() {
            return Err((false, format!("unexpected status: {status}")));
        }

        let parsed: CreateResponse = response
            .json()
            .await
            .map_err(|e| (false, format!("unparseable create response: {e}")))?;
        Ok(parsed.id)
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create(&self, record: &RoutedRecord) -> Result<String> {
        let mut last_error = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            match self.create_once(record).await {
                Ok(id) => return Ok(id),
                Err((transient, message)) => {
                    last_error = message;
                    if !transient || attempt == MAX_ATTEMPTS - 1 {
                        if transient {
                            return Err(RecordStoreError::Transient(last_error).into());
                        }
                        return Err(RecordStoreError::Permanent(last_error).into());
                    }
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "record-store create failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        backoff,
                        last_error
                    );
                    sleep(backoff).await;
                }
            }
        }
        Err(RecordStoreError::Transient(last_error).into())
    }

    async fn verify(&self, remote_id: &str) -> Result<bool> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), remote_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| RecordStoreError::Transient(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(RecordStoreError::Transient(format!(
                "verify failed with status {}",
                response.status()
            ))
            .into());
        }

        let parsed: GetResponse = response
            .json()
            .await
            .map_err(|e| RecordStoreError::Transient(e.to_string()))?;
        Ok(!parsed.archived)
    }
}

fn collection_for(category: Category) -> &'static str {
    match category {
        Category::Task => "tasks",
        Category::Note | Category::Unclear => "notes",
        Category::Research => "research",
    }
}

/// Split `body` into chunks of at most `limit` characters, splitting on a
/// paragraph break first, then a whitespace run, never mid-word. The
/// boundary whitespace run is dropped from both sides; a single separating
/// space reconstructs the original when chunks are rejoined (P5).
fn chunk_content(body: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() <= limit {
        return vec![body.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= limit {
            chunks.push(chars[start..].iter().collect());
            break;
        }
        let window_end = start + limit;
        let mut cut: Option<(usize, usize)> = None;
        let mut i = window_end;
        while i > start {
            i -= 1;
            if chars[i].is_whitespace() {
                let mut run_start = i;
                while run_start > start && chars[run_start - 1].is_whitespace() {
                    run_start -= 1;
                }
                let mut run_end = i + 1;
                while run_end < chars.len() && chars[run_end].is_whitespace() {
                    run_end += 1;
                }
                cut = Some((run_start, run_end));
                break;
            }
        }
        match cut {
            Some((content_end, next_start)) if content_end > start => {
                chunks.push(chars[start..content_end].iter().collect());
                start = next_start;
            }
            _ => {
                chunks.push(chars[start..window_end].iter().collect());
                start = window_end;
            }
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_content_under_limit_returns_single_chunk() {
        let chunks = chunk_content("short body", 2000);
        assert_eq!(chunks, vec!["short body".to_string()]);
    }

    #[test]
    fn test_chunk_content_splits_on_whitespace_never_mid_word() {
        let body = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunk_content(body, 15);
        for chunk in &chunks {
            assert!(!chunk.is_empty());
        }
        let reassembled = chunks.join(" ");
        assert_eq!(reassembled, body);
    }

    #[test]
    fn test_chunk_content_preserves_all_characters_modulo_join_space() {
        let body = "one two three four five six seven eight nine ten eleven twelve";
        let chunks = chunk_content(body, 20);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.join(" "), body);
    }

    #[test]
    fn test_collection_mapping() {
        assert_eq!(collection_for(Category::Task), "tasks");
        assert_eq!(collection_for(Category::Note), "notes");
        assert_eq!(collection_for(Category::Research), "research");
    }
}
