//! Error types and error handling for the recall pipeline.

use thiserror::Error;

/// Main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Project catalog errors
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Content parser errors
    #[error("Parser error: {0}")]
    Parser(#[from] ParserError),

    /// Analyzer errors
    #[error("Analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),

    /// Routing errors
    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    /// Record store errors
    #[error("Record store error: {0}")]
    RecordStore(#[from] RecordStoreError),

    /// Transcription backend errors
    #[error("Transcription error: {0}")]
    Transcription(#[from] TranscriptionError),

    /// Orchestrator / session-state errors
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// Safety-critical violation: never silenced, always retains the source.
    #[error("Safety violation: {0}")]
    Safety(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl PipelineError {
    /// True for errors that are safe to retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::Transcription(TranscriptionError::Transient(_))
                | PipelineError::RecordStore(RecordStoreError::Transient(_))
                | PipelineError::Analyzer(AnalyzerError::LlmTransient(_))
        )
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {0}")]
    Load(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Required configuration key missing: {0}")]
    MissingKey(String),
}

/// Project catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Remote catalog source unreachable: {0}")]
    RemoteUnreachable(String),

    #[error("Failed to read project cache: {0}")]
    CacheRead(String),

    #[error("Failed to write project cache: {0}")]
    CacheWrite(String),
}

/// Content parser errors
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Transcript is empty or whitespace-only")]
    Empty,

    #[error("Transcript exceeds maximum length of {max} bytes (got {actual})")]
    TooLarge { max: usize, actual: usize },

    #[error("Transcript could not be decoded as text: {0}")]
    UndecodableBytes(String),
}

/// Analyzer errors
#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("LLM call failed transiently: {0}")]
    LlmTransient(String),

    #[error("LLM call failed permanently: {0}")]
    LlmPermanent(String),

    #[error("LLM returned unparseable structure after retries: {0}")]
    UnparseableResponse(String),
}

/// Routing errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Invalid duration configuration: {0}")]
    InvalidDurationRules(String),

    #[error("Invalid tag pattern configuration: {0}")]
    InvalidTagPatterns(String),
}

/// Record store errors
#[derive(Error, Debug)]
pub enum RecordStoreError {
    #[error("Transient record-store error: {0}")]
    Transient(String),

    #[error("Permanent record-store error: {0}")]
    Permanent(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Authentication failed: {0}")]
    Auth(String),
}

/// Transcription backend errors
#[derive(Error, Debug)]
pub enum TranscriptionError {
    #[error("Transient transcription error: {0}")]
    Transient(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio too short: {0}")]
    AudioTooShort(String),

    #[error("Audio exceeds backend size limit: {0} bytes")]
    TooLarge(usize),

    #[error("All configured backends failed")]
    AllBackendsFailed,

    #[error("Local backend not built with the `local-stt` feature")]
    LocalBackendDisabled,

    #[error("Local backend subprocess exited non-zero: {0}")]
    SubprocessFailed(String),
}

/// Orchestrator / session-state errors
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("USB volume unreachable and no staged backlog exists: {0}")]
    UsbUnreachable(String),

    #[error("Insufficient free disk space: {available} bytes available, {floor} required")]
    DiskSpaceFloor { available: u64, floor: u64 },

    #[error("Session state corrupt or unreadable: {0}")]
    SessionState(String),

    #[error("Run was aborted by the user")]
    UserAborted,
}

impl From<String> for PipelineError {
    fn from(err: String) -> Self {
        PipelineError::Unknown(err)
    }
}

impl From<&str> for PipelineError {
    fn from(err: &str) -> Self {
        PipelineError::Unknown(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PipelineError = io_error.into();
        match err {
            PipelineError::Io(_) => (),
            _ => panic!("expected Io error"),
        }
    }

    #[test]
    fn test_transient_classification() {
        let err: PipelineError = TranscriptionError::Transient("timeout".into()).into();
        assert!(err.is_transient());

        let err: PipelineError = TranscriptionError::PermissionDenied("denied".into()).into();
        assert!(!err.is_transient());
    }
}
