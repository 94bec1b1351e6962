//! Recall Pipeline - ingest, transcribe, classify, and route voice recordings
//! into a knowledge base.
//!
//! This library provides the orchestrator and its supporting services: audio
//! detection and staging, transcription backends, LLM-driven analysis,
//! project/duration/tag routing, and the remote record store adapter.

pub mod core;
pub mod orchestrator;
pub mod services;

pub use core::config::Config;
pub use core::error::PipelineError;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;

/// Application version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name.
pub const APP_NAME: &str = "Recall Pipeline";

/// Default configuration directory name, under the OS config home.
pub const CONFIG_DIR_NAME: &str = "recall-pipeline";

/// Default log file name prefix (daily rotation appends the date).
pub const LOG_FILE: &str = "recall-pipeline.log";

/// Supported audio extensions this pipeline will discover at the USB root.
pub const SUPPORTED_AUDIO_FORMATS: &[&str] = &["wav", "mp3", "m4a", "flac"];

/// Minimum supported Rust version.
pub const MIN_RUST_VERSION: &str = "1.75.0";

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, PipelineError>;

static GLOBAL_CONFIG: OnceCell<core::config::Config> = OnceCell::new();
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Initialize the library: structured logging (stdout + daily-rotating file)
/// and the global configuration. Must be called once before any service or
/// the orchestrator is used.
pub fn init(config_dir: Option<&str>, log_level: Option<&str>) -> Result<()> {
    let log_level = log_level.unwrap_or("info");
    let resolved_dir: PathBuf = match config_dir {
        Some(path) => PathBuf::from(path),
        None => default_config_dir()?,
    };
    std::fs::create_dir_all(&resolved_dir)?;

    let logs_dir = resolved_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_ansi(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "recall_pipeline={log_level}"
        )))
        .with(stdout_layer)
        .with(file_layer)
        .init();

    tracing::info!("Initializing {} v{}", APP_NAME, VERSION);

    let config = core::config::Config::load(&resolved_dir)?;
    set_global_config(config);

    tracing::info!("{} initialization complete", APP_NAME);
    Ok(())
}

fn default_config_dir() -> Result<PathBuf> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| core::error::ConfigError::Load("could not resolve base dirs".into()))?;
    Ok(dirs.config_dir().join(CONFIG_DIR_NAME))
}

/// The process-wide configuration, set once by [`init`].
pub fn get_config() -> &'static core::config::Config {
    GLOBAL_CONFIG.get().expect("config not initialized: call recall_pipeline::init() first")
}

fn set_global_config(cfg: core::config::Config) {
    let _ = GLOBAL_CONFIG.set(cfg);
}

/// Flush logs and release resources held by [`init`]. Should be called on
/// graceful shutdown; the orchestrator's CLI entry point calls this after
/// every run regardless of outcome.
pub fn cleanup() -> Result<()> {
    tracing::info!("Shutting down {}", APP_NAME);
    Ok(())
}
