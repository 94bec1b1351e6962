//! Cloud transcription backend: HTTP POST of an audio file to a
//! configured endpoint, returning plain text. Status-code mapping per
//! SPEC §6: 413 oversize (skip, not a failover-worthy error but reported as
//! such so the caller moves to the next backend), 429 rate-limit (retry
//! with backoff), 5xx (retry), other 4xx (permanent failure).

use super::TranscriptionBackend;
use crate::core::config::Config;
use crate::core::error::TranscriptionError;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;

pub struct CloudBackend {
    endpoint: String,
    api_key: String,
    max_bytes: u64,
    client: reqwest::Client,
}

impl CloudBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            endpoint: config.transcription.cloud_endpoint.clone(),
            api_key: config.transcription.cloud_api_key.clone(),
            max_bytes: config.transcription.cloud_max_bytes,
            client: reqwest::Client::new(),
        }
    }

    async fn post_once(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> std::result::Result<String, (bool, TranscriptionError)> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| (false, TranscriptionError::Transient(e.to_string())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("audio", part);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await
            .map_err(|e| (true, TranscriptionError::Transient(e.to_string())))?;

        let status = response.status();
        if status == reqwest::StatusCode::PAYLOAD_TOO_LARGE {
            return Err((
                false,
                TranscriptionError::TooLarge(self.max_bytes as usize),
            ));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err((
                true,
                TranscriptionError::Transient(format!("rate limited: {status}")),
            ));
        }
        if status.is_server_error() {
            return Err((
                true,
                TranscriptionError::Transient(format!("server error: {status}")),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((
                false,
                TranscriptionError::Transient(format!("{status}: {body}")),
            ));
        }

        response
            .text()
            .await
            .map_err(|e| (false, TranscriptionError::Transient(e.to_string())))
    }
}

#[async_trait]
impl TranscriptionBackend for CloudBackend {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn available(&self) -> bool {
        !self.endpoint.is_empty()
    }

    fn max_bytes(&self) -> Option<u64> {
        Some(self.max_bytes)
    }

    async fn transcribe(&self, path: &Path, timeout_secs: u64) -> Result<String> {
        let timeout = Duration::from_secs(timeout_secs);
        let mut last_err = TranscriptionError::AllBackendsFailed;
        for attempt in 0..MAX_ATTEMPTS {
            match self.post_once(path, timeout).await {
                Ok(text) => return Ok(text),
                Err((transient, err)) => {
                    last_err = err;
                    if !transient || attempt == MAX_ATTEMPTS - 1 {
                        return Err(last_err.into());
                    }
                    let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                    tracing::warn!(
                        "cloud backend transcribe failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        backoff,
                        last_err
                    );
                    sleep(backoff).await;
                }
            }
        }
        Err(last_err.into())
    }
}
