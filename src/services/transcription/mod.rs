//! Transcription Backend (C9): strategy interface over transcription
//! providers with a cloud-first failover chain.

mod cloud;
mod local;

pub use cloud::CloudBackend;
pub use local::LocalBackend;

use crate::core::config::Config;
use crate::core::error::TranscriptionError;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// One attempt at transcribing a staged file. `timeout_secs` is computed by
/// the caller per §5: `max(20 min, 0.5 * estimated_duration)`.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Human-readable backend name, used in logs and `Transcript::backend_name`.
    fn name(&self) -> &str;

    /// Whether this backend is currently usable (reachable / configured).
    async fn available(&self) -> bool;

    /// Hard file-size limit this backend advertises, if any. The service
    /// skips a backend whose limit an input exceeds without attempting it.
    fn max_bytes(&self) -> Option<u64>;

    /// Attempt transcription. Returns `Ok(text)` on success. `Err` carries
    /// whether the failure is transient (retryable against the *same*
    /// backend within this call) or should fail over to the next backend.
    async fn transcribe(&self, path: &Path, timeout_secs: u64) -> Result<String>;
}

/// Build the ordered backend chain from configuration. `"auto"` expands to
/// all available backends in cloud-first order.
pub fn build_backend_chain(config: &Config) -> Vec<Arc<dyn TranscriptionBackend>> {
    let mut chain: Vec<Arc<dyn TranscriptionBackend>> = Vec::new();
    let order = &config.transcription.backend_order;
    let names: Vec<String> = if order.len() == 1 && order[0] == "auto" {
        vec!["cloud".to_string(), "local".to_string()]
    } else {
        order.clone()
    };

    for name in names {
        match name.as_str() {
            "cloud" => chain.push(Arc::new(CloudBackend::new(config))),
            "local" => chain.push(Arc::new(LocalBackend::new(config))),
            other => tracing::warn!("unknown transcription backend in config: {other}"),
        }
    }
    chain
}

/// Try each backend in order, logging and moving to the next on failure.
/// Returns the text and the name of the backend that succeeded.
pub async fn transcribe_with_failover(
    chain: &[Arc<dyn TranscriptionBackend>],
    path: &Path,
    size_bytes: u64,
    timeout_secs: u64,
) -> Result<(String, String)> {
    let mut last_err: Option<crate::PipelineError> = None;
    for backend in chain {
        if let Some(limit) = backend.max_bytes() {
            if size_bytes > limit {
                tracing::info!(
                    "skipping backend {} for {:?}: {} bytes exceeds limit of {}",
                    backend.name(),
                    path,
                    size_bytes,
                    limit
                );
                continue;
            }
        }
        if !backend.available().await {
            tracing::warn!("backend {} unavailable, trying next", backend.name());
            continue;
        }
        match backend.transcribe(path, timeout_secs).await {
            Ok(text) => return Ok((text, backend.name().to_string())),
            Err(e) => {
                tracing::warn!("backend {} failed for {:?}: {}", backend.name(), path, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| TranscriptionError::AllBackendsFailed.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;

    #[test]
    fn test_build_chain_respects_configured_order() {
        let mut config = Config::default();
        config.transcription.backend_order = vec!["cloud".to_string()];
        let chain = build_backend_chain(&config);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].name(), "cloud");
    }

    #[test]
    fn test_build_chain_auto_expands_cloud_first() {
        let mut config = Config::default();
        config.transcription.backend_order = vec!["auto".to_string()];
        let chain = build_backend_chain(&config);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].name(), "cloud");
        assert_eq!(chain[1].name(), "local");
    }
}
