//! Local transcription backend: invokes an on-device speech-to-text model
//! and reads back the resulting text. Grounded on the teacher's
//! `LocalWhisperBackend` (`services/stt.rs`): `whisper-rs` behind the
//! `local-stt` feature, model path from `WHISPER_MODEL_PATH`, GPU toggle
//! from `WHISPER_USE_GPU`, thread count from `WHISPER_THREADS`. Audio is
//! read as 16kHz mono PCM via `hound`, matching the teacher's WAV handling.

use super::TranscriptionBackend;
use crate::core::config::Config;
use crate::core::error::TranscriptionError;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;

#[cfg(feature = "local-stt")]
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

pub struct LocalBackend {
    #[cfg(feature = "local-stt")]
    context: Option<Mutex<WhisperContext>>,
    #[cfg(not(feature = "local-stt"))]
    _unused: Mutex<()>,
}

impl LocalBackend {
    pub fn new(_config: &Config) -> Self {
        #[cfg(feature = "local-stt")]
        {
            let context = build_context().ok().map(Mutex::new);
            Self { context }
        }
        #[cfg(not(feature = "local-stt"))]
        {
            Self {
                _unused: Mutex::new(()),
            }
        }
    }
}

#[cfg(feature = "local-stt")]
fn build_context() -> std::result::Result<WhisperContext, TranscriptionError> {
    let model_path = std::env::var("WHISPER_MODEL_PATH")
        .map_err(|_| TranscriptionError::LocalBackendDisabled)?;
    let model_path = model_path.trim().to_string();
    if model_path.is_empty() {
        return Err(TranscriptionError::LocalBackendDisabled);
    }
    let meta = std::fs::metadata(&model_path)
        .map_err(|e| TranscriptionError::SubprocessFailed(format!("cannot access model: {e}")))?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(TranscriptionError::SubprocessFailed(
            "model path is not a regular non-empty file".to_string(),
        ));
    }

    let mut ctx_params = WhisperContextParameters::default();
    let use_gpu = match std::env::var("WHISPER_USE_GPU").ok().as_deref() {
        Some("0") | Some("false") | Some("False") => false,
        Some(_) => true,
        None => cfg!(target_os = "macos"),
    };
    if use_gpu {
        ctx_params.use_gpu(true);
    }

    WhisperContext::new_with_params(&model_path, ctx_params)
        .map_err(|e| TranscriptionError::SubprocessFailed(format!("failed to load model: {e}")))
}

#[cfg(feature = "local-stt")]
fn read_samples(path: &Path) -> std::result::Result<Vec<f32>, TranscriptionError> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|e| TranscriptionError::SubprocessFailed(format!("cannot read wav: {e}")))?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| TranscriptionError::SubprocessFailed(format!("bad sample: {e}")))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(|e| TranscriptionError::SubprocessFailed(format!("bad sample: {e}")))?,
    };
    if spec.channels > 1 {
        Ok(samples
            .chunks(spec.channels as usize)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect())
    } else {
        Ok(samples)
    }
}

#[async_trait]
impl TranscriptionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    #[cfg(feature = "local-stt")]
    async fn available(&self) -> bool {
        self.context.is_some()
    }

    #[cfg(not(feature = "local-stt"))]
    async fn available(&self) -> bool {
        false
    }

    fn max_bytes(&self) -> Option<u64> {
        None
    }

    #[cfg(feature = "local-stt")]
    async fn transcribe(&self, path: &Path, _timeout_secs: u64) -> Result<String> {
        let context = self
            .context
            .as_ref()
            .ok_or(TranscriptionError::LocalBackendDisabled)?;
        let path = path.to_path_buf();

        let result = tokio::task::spawn_blocking(move || -> std::result::Result<String, TranscriptionError> {
            let samples = read_samples(&path)?;
            let ctx = context.lock().unwrap();
            let mut state = ctx
                .create_state()
                .map_err(|e| TranscriptionError::SubprocessFailed(e.to_string()))?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            let threads = std::env::var("WHISPER_THREADS")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .filter(|&n| n > 0)
                .unwrap_or(num_cpus::get() as i32);
            params.set_n_threads(threads);
            params.set_translate(false);
            params.set_language(Some("en"));

            state
                .full(params, &samples)
                .map_err(|e| TranscriptionError::SubprocessFailed(format!("whisper processing failed: {e}")))?;

            let num_segments = state
                .full_n_segments()
                .map_err(|e| TranscriptionError::SubprocessFailed(e.to_string()))?;
            let mut text = String::new();
            for i in 0..num_segments {
                let seg = state
                    .full_get_segment_text(i)
                    .map_err(|e| TranscriptionError::SubprocessFailed(e.to_string()))?;
                text.push_str(&seg);
            }
            Ok(text)
        })
        .await
        .map_err(|e| TranscriptionError::SubprocessFailed(e.to_string()))??;

        Ok(result)
    }

    #[cfg(not(feature = "local-stt"))]
    async fn transcribe(&self, _path: &Path, _timeout_secs: u64) -> Result<String> {
        Err(TranscriptionError::LocalBackendDisabled.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unavailable_without_model_path() {
        std::env::remove_var("WHISPER_MODEL_PATH");
        let config = Config::default();
        let backend = LocalBackend::new(&config);
        assert!(!backend.available().await);
    }

    #[tokio::test]
    #[cfg(not(feature = "local-stt"))]
    async fn test_transcribe_disabled_without_feature() {
        let config = Config::default();
        let backend = LocalBackend::new(&config);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.wav");
        std::fs::write(&path, b"stub").unwrap();
        let err = backend.transcribe(&path, 1).await.unwrap_err();
        assert!(matches!(
            err,
            crate::PipelineError::Transcription(TranscriptionError::LocalBackendDisabled)
        ));
    }
}
