//! Orchestrator (C8): drives one batch through the five-stage workflow —
//! Detect → Validate → Transcribe → Process → Verify/Archive/Cleanup — and
//! owns the durable [`SessionState`] journal across runs.

mod stage_detect;
mod stage_process;
mod stage_transcribe;
mod stage_validate;
mod stage_verify_archive;

use crate::core::config::Config;
use crate::core::error::OrchestratorError;
use crate::core::state::SessionState;
use crate::core::types::FileState;
use crate::services::pipeline::TranscriptPipeline;
use crate::services::record_store::RecordStore;
use crate::services::resource_monitor::ResourceMonitor;
use crate::services::transcription::TranscriptionBackend;
use crate::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use uuid::Uuid;

pub use stage_validate::SkipReason;

/// CLI-facing knobs for one orchestrator run.
pub struct OrchestratorOptions {
    pub dry_run: bool,
    /// Stage names to skip, lowercased (`"s1"`..`"s5"`).
    pub skip_steps: HashSet<String>,
    pub min_duration_secs: Option<f64>,
    pub max_duration_secs: Option<f64>,
    pub duration_filter_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RetainedItem {
    pub stem: String,
    pub reason: String,
}

/// Per-run summary, printed to the CLI and used to decide the process exit
/// code (a non-empty `retained` yields exit code 1, per §6).
#[derive(Debug, Default)]
pub struct Summary {
    pub detected: usize,
    pub skipped: usize,
    pub transcribed: usize,
    pub transcribe_failed: usize,
    pub processed_ok: usize,
    pub processed_fail: usize,
    pub verified: usize,
    pub archived: usize,
    pub deleted: usize,
    pub retained: Vec<RetainedItem>,
}

impl Summary {
    pub fn print_report(&self) {
        println!("recall-pipeline run summary");
        println!("  detected:         {}", self.detected);
        println!("  skipped:          {}", self.skipped);
        println!("  transcribed:      {}", self.transcribed);
        println!("  transcribe_failed:{}", self.transcribe_failed);
        println!("  processed_ok:     {}", self.processed_ok);
        println!("  processed_fail:   {}", self.processed_fail);
        println!("  verified:         {}", self.verified);
        println!("  archived:         {}", self.archived);
        println!("  deleted:          {}", self.deleted);
        println!("  retained:         {}", self.retained.len());
        for item in &self.retained {
            println!("    - {} ({})", item.stem, item.reason);
        }
    }
}

/// A discovered-and-processed file's running state, tracked across the five
/// stages for the duration of one run.
struct FileRecord {
    stem: String,
    source_path: std::path::PathBuf,
    size_bytes: u64,
    estimated_duration_secs: f64,
    state: FileState,
    transcript_path: Option<std::path::PathBuf>,
    remote_ids: Vec<String>,
}

pub struct Orchestrator {
    config: Config,
    pipeline: TranscriptPipeline,
    transcription: Vec<Arc<dyn TranscriptionBackend>>,
    resource_monitor: ResourceMonitor,
    record_store: Arc<dyn RecordStore>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        pipeline: TranscriptPipeline,
        transcription: Vec<Arc<dyn TranscriptionBackend>>,
        resource_monitor: ResourceMonitor,
        record_store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            config: config.clone(),
            pipeline,
            transcription,
            resource_monitor,
            record_store,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation: set between stages and between per-file
    /// transitions within a stage. Already-running per-file work completes
    /// to a safe terminal state before the run observes the flag.
    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub async fn run(&mut self, options: OrchestratorOptions) -> Result<Summary> {
        let mut summary = Summary::default();
        let session_state_path = self.config.paths.session_state_path();
        let resuming = session_state_path.exists();
        let mut session = SessionState::load_or_new(&session_state_path, Uuid::new_v4())?;

        let known_fingerprints: HashSet<(String, u64)> = session
            .known_fingerprints()
            .filter_map(parse_fingerprint)
            .collect();

        // A loaded journal carries the previous run's current_session; close
        // it into previous_sessions so its cleanup_candidates become this
        // run's known_fingerprints and a fresh session starts clean. A
        // brand-new journal already starts on a clean current_session.
        if resuming {
            session.close_session(Uuid::new_v4());
        }
        let session_id = session.current_session.session_id;

        // S1 Detect
        let has_backlog = !session.current_session.staged.is_empty();
        let items = if options.skip_steps.contains("s1") {
            tracing::info!("S1 detect skipped by request");
            Vec::new()
        } else {
            stage_detect::detect(&self.config, has_backlog)?
        };
        summary.detected = items.len();
        for item in &items {
            session.current_session.discovered.push(item.stem.clone());
        }

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OrchestratorError::UserAborted.into());
        }

        // S2 Validate
        let (shortlist, skip_count) = if options.skip_steps.contains("s2") {
            tracing::info!("S2 validate skipped by request");
            (items, 0)
        } else {
            let outcome = stage_validate::validate(
                &self.config,
                items,
                stage_validate::ValidateOptions {
                    known_fingerprints: &known_fingerprints,
                    min_duration_secs: options.min_duration_secs,
                    max_duration_secs: options.max_duration_secs,
                    duration_filter_enabled: options.duration_filter_enabled,
                },
                &self.resource_monitor,
                &self.transcription,
            )
            .await;

            if outcome.disk_floor_violated {
                return Err(OrchestratorError::DiskSpaceFloor {
                    available: self
                        .resource_monitor
                        .free_disk_bytes(&self.config.paths.project_root)
                        .unwrap_or(0),
                    floor: self.resource_monitor.disk_floor_bytes(),
                }
                .into());
            }

            for (item, reason) in &outcome.skipped {
                if *reason == stage_validate::SkipReason::Duplicate {
                    session
                        .current_session
                        .duplicates_skipped
                        .push(item.stem.clone());
                }
                tracing::info!("S2 skip {}: {}", item.stem, reason.as_str());
            }
            let skipped = outcome.skipped.len();
            (outcome.shortlist, skipped)
        };
        summary.skipped = skip_count;

        let mut records: Vec<FileRecord> = shortlist
            .into_iter()
            .map(|item| FileRecord {
                stem: item.stem.clone(),
                source_path: item.source_path.clone(),
                size_bytes: item.size_bytes,
                estimated_duration_secs: item.estimated_duration_secs,
                state: FileState::Validated,
                transcript_path: None,
                remote_ids: Vec::new(),
            })
            .collect();

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OrchestratorError::UserAborted.into());
        }

        // S3 Transcribe
        if !options.skip_steps.contains("s3") {
            self.run_transcribe_stage(&mut records, &mut session, &mut summary)
                .await?;
        } else {
            tracing::info!("S3 transcribe skipped by request");
        }

        if self.cancelled.load(Ordering::SeqCst) {
            return Err(OrchestratorError::UserAborted.into());
        }

        // S4 Process
        if !options.skip_steps.contains("s4") {
            self.run_process_stage(&mut records, &mut session, &mut summary, options.dry_run)
                .await;
        } else {
            tracing::info!("S4 process skipped by request");
        }

        // S5 Verify & Archive
        if !options.skip_steps.contains("s5") && !options.dry_run {
            self.run_verify_archive_stage(&mut records, &mut session, &mut summary, session_id)
                .await;
        } else if options.dry_run {
            tracing::info!("[dry-run] S5 verify/archive skipped; no files will be deleted");
        } else {
            tracing::info!("S5 verify/archive skipped by request");
        }

        session.current_session.stage_flags.transcription_complete = summary.transcribe_failed == 0;
        session.current_session.stage_flags.processing_complete = summary.processed_fail == 0;
        session.current_session.stage_flags.archive_complete =
            summary.retained.is_empty() && summary.archived == summary.processed_ok;
        session.current_session.stage_flags.cleanup_ready =
            session.current_session.stage_flags.archive_complete;

        if !options.dry_run {
            self.cleanup_old_archives(&mut session);
            session.save(&session_state_path)?;
        }

        Ok(summary)
    }

    async fn run_transcribe_stage(
        &self,
        records: &mut [FileRecord],
        session: &mut SessionState,
        summary: &mut Summary,
    ) -> Result<()> {
        let staging_dir = self.config.paths.cache_dir().join("staging");
        let transcripts_dir = self.config.paths.transcripts_dir();
        let batches = stage_transcribe::pack_batches(
            &records
                .iter()
                .map(|r| crate::core::types::AudioItem {
                    stem: r.stem.clone(),
                    source_path: r.source_path.clone(),
                    size_bytes: r.size_bytes,
                    estimated_duration_secs: r.estimated_duration_secs,
                    detected_at: chrono::Utc::now(),
                })
                .collect::<Vec<_>>(),
            self.config.concurrency.s3_batch_minutes * 60.0,
        );

        let semaphore = Semaphore::new(self.config.concurrency.s3_workers);
        let mut results = Vec::new();

        for batch in batches {
            let mut handles = Vec::new();
            for idx in batch {
                let stem = records[idx].stem.clone();
                let source_path = records[idx].source_path.clone();
                let size_bytes = records[idx].size_bytes;
                let estimated_duration_secs = records[idx].estimated_duration_secs;
                let backends = self.transcription.clone();
                let staging_dir = staging_dir.clone();
                let transcripts_dir = transcripts_dir.clone();
                let resource_monitor = &self.resource_monitor;
                let sem = &semaphore;

                let fut = async move {
                    let _permit = stage_transcribe::admit(sem, resource_monitor).await;
                    let staged = match stage_transcribe::stage(
                        &crate::core::types::AudioItem {
                            stem: stem.clone(),
                            source_path: source_path.clone(),
                            size_bytes,
                            estimated_duration_secs,
                            detected_at: chrono::Utc::now(),
                        },
                        &staging_dir,
                    ) {
                        Ok(s) => s,
                        Err(e) => return (idx, Err(e)),
                    };
                    let outcome = stage_transcribe::transcribe_one(
                        &staged,
                        &backends,
                        size_bytes,
                        estimated_duration_secs,
                        &transcripts_dir,
                    )
                    .await;
                    let _ = std::fs::remove_file(&staged.staged_path);
                    (idx, outcome)
                };
                handles.push(fut);
            }
            let batch_results = futures_util::future::join_all(handles).await;
            results.extend(batch_results);
        }

        for (idx, outcome) in results {
            match outcome {
                Ok(t) => {
                    records[idx].state = FileState::Transcribed;
                    records[idx].transcript_path = Some(t.transcript_path);
                    session
                        .current_session
                        .transcribed
                        .push(records[idx].stem.clone());
                    summary.transcribed += 1;
                }
                Err(e) => {
                    tracing::warn!("transcription failed for {}: {e}", records[idx].stem);
                    self.move_to_failed(&records[idx].source_path);
                    summary.transcribe_failed += 1;
                    summary.retained.push(RetainedItem {
                        stem: records[idx].stem.clone(),
                        reason: "transcription_failed".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn run_process_stage(
        &self,
        records: &mut [FileRecord],
        session: &mut SessionState,
        summary: &mut Summary,
        dry_run: bool,
    ) {
        let processed_dir = self.config.paths.processed_dir();
        for record in records.iter_mut() {
            let Some(transcript_path) = record.transcript_path.clone() else {
                continue;
            };
            let processed = stage_process::process_one(
                &self.pipeline,
                &record.stem,
                &transcript_path,
                &record.source_path,
                &processed_dir,
                dry_run,
            )
            .await;

            record.state = processed.state;
            match processed.state {
                FileState::AnalyzedOk => {
                    if let Some(outcome) = processed.outcome {
                        record.remote_ids = outcome.remote_ids;
                    }
                    session.current_session.analyzed_ok.push(record.stem.clone());
                    summary.processed_ok += 1;
                }
                _ => {
                    session.current_session.analyzed_fail.push(record.stem.clone());
                    summary.processed_fail += 1;
                    if !dry_run {
                        let reason = processed.fail_reason.unwrap_or("analysis_failed");
                        summary.retained.push(RetainedItem {
                            stem: record.stem.clone(),
                            reason: reason.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn run_verify_archive_stage(
        &self,
        records: &mut [FileRecord],
        session: &mut SessionState,
        summary: &mut Summary,
        session_id: Uuid,
    ) {
        let archive_root = self.config.paths.archive_dir();
        for record in records.iter_mut() {
            if record.state != FileState::AnalyzedOk {
                continue;
            }
            let Some(transcript_path) = record.transcript_path.clone() else {
                continue;
            };

            let result = stage_verify_archive::verify_and_archive(
                &self.record_store,
                &record.stem,
                &record.remote_ids,
                &record.source_path,
                &transcript_path,
                &archive_root,
                session_id,
            )
            .await;

            record.state = result.state;
            match result.state {
                FileState::SourceDeleted => {
                    summary.verified += 1;
                    summary.archived += 1;
                    summary.deleted += 1;
                    session
                        .current_session
                        .cleanup_candidates
                        .push(format!("{}:{}", record.stem, record.size_bytes));
                }
                FileState::Retained => {
                    summary.retained.push(RetainedItem {
                        stem: record.stem.clone(),
                        reason: result.retain_reason.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                _ => {}
            }
        }
    }

    fn move_to_failed(&self, source_path: &std::path::Path) {
        let failed_dir = self.config.paths.failed_dir();
        if std::fs::create_dir_all(&failed_dir).is_err() {
            return;
        }
        if let Some(name) = source_path.file_name() {
            let _ = std::fs::rename(source_path, failed_dir.join(name));
        }
    }

    /// Prune archived session subfolders older than the configured
    /// retention window. Never touches sources or the current session's
    /// own archive folder.
    fn cleanup_old_archives(&self, session: &mut SessionState) {
        let archive_root = self.config.paths.archive_dir();
        let Ok(entries) = std::fs::read_dir(&archive_root) else {
            return;
        };
        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.config.retention.archive_retention_days);
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(date_str) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Ok(date) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                continue;
            };
            let date_time = date.and_hms_opt(0, 0, 0).unwrap().and_utc();
            if date_time < cutoff {
                tracing::info!("pruning archived session directory {:?} past retention window", path);
                let _ = std::fs::remove_dir_all(&path);
            }
        }
        session.archive_management.last_cleanup = Some(chrono::Utc::now());
    }
}

fn parse_fingerprint(raw: &str) -> Option<(String, u64)> {
    let (stem, size) = raw.rsplit_once(':')?;
    Some((stem.to_string(), size.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fingerprint_roundtrip() {
        assert_eq!(
            parse_fingerprint("note_001:64000"),
            Some(("note_001".to_string(), 64_000))
        );
        assert_eq!(parse_fingerprint("malformed"), None);
    }

    #[test]
    fn test_summary_default_has_empty_retained() {
        let summary = Summary::default();
        assert!(summary.retained.is_empty());
    }
}
