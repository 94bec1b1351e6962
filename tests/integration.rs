//! End-to-end integration tests for the recall pipeline: a real USB
//! directory on disk, a real orchestrator run, fake transcription/LLM/record
//! store collaborators standing in for the network boundary.

use async_trait::async_trait;
use recall_pipeline::core::config::Config;
use recall_pipeline::core::types::RoutedRecord;
use recall_pipeline::orchestrator::{Orchestrator, OrchestratorOptions};
use recall_pipeline::services::analyzers::{LlmClient, NoteAnalyzer, TaskAnalyzer};
use recall_pipeline::services::catalog::ProjectCatalog;
use recall_pipeline::services::parser::ContentParser;
use recall_pipeline::services::pipeline::TranscriptPipeline;
use recall_pipeline::services::record_store::RecordStore;
use recall_pipeline::services::resource_monitor::ResourceMonitor;
use recall_pipeline::services::router::Router;
use recall_pipeline::services::transcription::TranscriptionBackend;
use recall_pipeline::Result;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct StaticLlm {
    text: String,
}

#[async_trait]
impl LlmClient for StaticLlm {
    async fn complete(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
        Ok(self.text.clone())
    }
}

struct StaticTranscription {
    text: String,
}

#[async_trait]
impl TranscriptionBackend for StaticTranscription {
    fn name(&self) -> &str {
        "fake"
    }
    async fn available(&self) -> bool {
        true
    }
    fn max_bytes(&self) -> Option<u64> {
        None
    }
    async fn transcribe(&self, _path: &Path, _timeout_secs: u64) -> Result<String> {
        Ok(self.text.clone())
    }
}

struct FakeRecordStore {
    next_id: AtomicUsize,
    verify_result: AtomicBool,
}

impl FakeRecordStore {
    fn new(verify_result: bool) -> Self {
        Self {
            next_id: AtomicUsize::new(0),
            verify_result: AtomicBool::new(verify_result),
        }
    }
}

#[async_trait]
impl RecordStore for FakeRecordStore {
    async fn create(&self, _record: &RoutedRecord) -> Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("rec-{id}"))
    }
    async fn verify(&self, _remote_id: &str) -> Result<bool> {
        Ok(self.verify_result.load(Ordering::SeqCst))
    }
}

fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.usb_path = root.join("usb");
    config.paths.project_root = root.join("project");
    config.transcription.min_duration_secs = 0.0;
    config.concurrency.s3_workers = 2;
    config.concurrency.s3_batch_minutes = 60.0;
    config
}

fn build_orchestrator(
    config: &Config,
    record_store: Arc<dyn RecordStore>,
    transcript_text: &str,
    note_text: &str,
) -> Orchestrator {
    let catalog = Arc::new(ProjectCatalog::new(config));
    let parser = ContentParser::new(config);
    let task_llm: Arc<dyn LlmClient> = Arc::new(StaticLlm {
        text: r#"{"tasks": [{"title": "Follow up", "body": "Follow up with Nate.", "action_items": [], "confidence": "high"}]}"#.to_string(),
    });
    let note_llm: Arc<dyn LlmClient> = Arc::new(StaticLlm {
        text: note_text.to_string(),
    });
    let task_analyzer = TaskAnalyzer::new(task_llm, config);
    let note_analyzer = NoteAnalyzer::new(note_llm, config);
    let router = Router::new(config, catalog);
    let pipeline = TranscriptPipeline::new(
        parser,
        task_analyzer,
        note_analyzer,
        router,
        record_store.clone(),
    );
    let transcription: Vec<Arc<dyn TranscriptionBackend>> = vec![Arc::new(StaticTranscription {
        text: transcript_text.to_string(),
    })];
    let resource_monitor = ResourceMonitor::new(config);
    Orchestrator::new(config, pipeline, transcription, resource_monitor, record_store)
}

fn default_options() -> OrchestratorOptions {
    OrchestratorOptions {
        dry_run: false,
        skip_steps: Default::default(),
        min_duration_secs: None,
        max_duration_secs: None,
        duration_filter_enabled: false,
    }
}

#[tokio::test]
async fn test_application_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    recall_pipeline::init(Some(dir.path().to_str().unwrap()), None).unwrap();
    recall_pipeline::cleanup().unwrap();
}

#[test]
fn test_configuration_defaults() {
    let config = Config::new();
    assert_eq!(config.paths.audio_extension, "wav");
    assert_eq!(config.transcription.min_duration_secs, 2.0);
    assert_eq!(config.concurrency.s3_workers, 3);
    assert_eq!(config.retention.archive_retention_days, 7);
}

/// Happy path: a file on the USB volume is detected, transcribed,
/// analyzed, routed, verified twice, archived, and its source deleted.
#[tokio::test]
async fn test_orchestrator_end_to_end_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.paths.usb_path).unwrap();
    std::fs::create_dir_all(&config.paths.project_root).unwrap();

    let source = config.paths.usb_path.join("note_100.wav");
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();

    let record_store: Arc<dyn RecordStore> = Arc::new(FakeRecordStore::new(true));
    let mut orchestrator = build_orchestrator(
        &config,
        record_store,
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );

    let summary = orchestrator.run(default_options()).await.unwrap();

    assert_eq!(summary.detected, 1);
    assert_eq!(summary.transcribed, 1);
    assert_eq!(summary.processed_ok, 1);
    assert_eq!(summary.deleted, 1);
    assert!(summary.retained.is_empty());
    assert!(!source.exists(), "source should be deleted after double verification");

    let archive_has_entries = std::fs::read_dir(config.paths.archive_dir())
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    assert!(archive_has_entries, "archived copy should exist under the archive root");
}

/// A remote record that fails re-verification at S5 must retain the source
/// untouched — the safety protocol's core guarantee.
#[tokio::test]
async fn test_orchestrator_retains_source_on_failed_reverification() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.paths.usb_path).unwrap();
    std::fs::create_dir_all(&config.paths.project_root).unwrap();

    let source = config.paths.usb_path.join("note_101.wav");
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();

    // record_store.create succeeds but verify always fails, so the pipeline
    // itself will mark the file analyzed_fail before S5 ever runs.
    let record_store: Arc<dyn RecordStore> = Arc::new(FakeRecordStore::new(false));
    let mut orchestrator = build_orchestrator(
        &config,
        record_store,
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );

    let summary = orchestrator.run(default_options()).await.unwrap();

    assert_eq!(summary.processed_fail, 1);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.retained.len(), 1);
    assert!(source.exists(), "unverified record must never cost the source file");
}

/// A dry run must leave every file untouched: no deletions, no archive, no
/// remote records created.
#[tokio::test]
async fn test_orchestrator_dry_run_leaves_everything_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.paths.usb_path).unwrap();
    std::fs::create_dir_all(&config.paths.project_root).unwrap();

    let source = config.paths.usb_path.join("note_102.wav");
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();

    let record_store: Arc<dyn RecordStore> = Arc::new(FakeRecordStore::new(true));
    let mut orchestrator = build_orchestrator(
        &config,
        record_store,
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );

    let mut options = default_options();
    options.dry_run = true;
    let summary = orchestrator.run(options).await.unwrap();

    assert_eq!(summary.transcribed, 1);
    assert_eq!(summary.deleted, 0);
    assert!(summary.retained.is_empty());
    assert!(source.exists());
    assert!(!config.paths.archive_dir().exists());
}

/// A recording already known from a previous session (same stem and size)
/// is skipped as a duplicate rather than reprocessed.
#[tokio::test]
async fn test_orchestrator_skips_duplicate_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.paths.usb_path).unwrap();
    std::fs::create_dir_all(&config.paths.project_root).unwrap();

    let source = config.paths.usb_path.join("note_103.wav");
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();

    let record_store: Arc<dyn RecordStore> = Arc::new(FakeRecordStore::new(true));
    let mut orchestrator = build_orchestrator(
        &config,
        record_store.clone(),
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );
    let first = orchestrator.run(default_options()).await.unwrap();
    assert_eq!(first.deleted, 1);

    // Second run: the source is gone (deleted by the first run), so recreate
    // it with the same stem/size to simulate the recorder reusing the name.
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();
    let mut second_orchestrator = build_orchestrator(
        &config,
        record_store,
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );
    let second = second_orchestrator.run(default_options()).await.unwrap();

    assert_eq!(second.detected, 1);
    assert_eq!(second.skipped, 1);
    assert_eq!(second.transcribed, 0);
}

/// Skipping S5 via `skip_steps` stops after S4: the file is analyzed and a
/// sidecar is written, but the source audio is never touched.
#[tokio::test]
async fn test_orchestrator_skip_s5_leaves_source_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::create_dir_all(&config.paths.usb_path).unwrap();
    std::fs::create_dir_all(&config.paths.project_root).unwrap();

    let source = config.paths.usb_path.join("note_104.wav");
    std::fs::write(&source, vec![0u8; 64_000]).unwrap();

    let record_store: Arc<dyn RecordStore> = Arc::new(FakeRecordStore::new(true));
    let mut orchestrator = build_orchestrator(
        &config,
        record_store,
        "I noticed my focus improves after a morning walk.",
        "Morning walk focus reflection",
    );

    let mut options = default_options();
    options.skip_steps.insert("s5".to_string());
    let summary = orchestrator.run(options).await.unwrap();

    assert_eq!(summary.processed_ok, 1);
    assert_eq!(summary.deleted, 0);
    assert!(source.exists());
}
