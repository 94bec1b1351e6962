//! S4 Process: run each transcript through the Transcript Pipeline (C7) and
//! classify it analyzed_ok or analyzed_fail. This stage never deletes
//! anything — failures stay on disk for S5 (which retains them) or a later
//! run.

use crate::core::error::PipelineError;
use crate::core::types::FileState;
use crate::services::pipeline::{ProcessOutcome, TranscriptPipeline};
use std::path::{Path, PathBuf};

pub struct ProcessedFile {
    pub stem: String,
    pub source_path: PathBuf,
    pub state: FileState,
    pub outcome: Option<ProcessOutcome>,
    /// Set only when `state` is `AnalyzedFail`; `None` for every other
    /// state. Distinguishes E4 (record-store create exhausted retries),
    /// E5 (create succeeded but verification returned false), and a
    /// genuine parse/analyze/route failure so S4's caller can retain with
    /// the right reason instead of a single generic label.
    pub fail_reason: Option<&'static str>,
}

/// Process one transcript. `source_path` is the original audio's path
/// (provenance for the sidecar); `transcript_path` is the text file S3
/// produced. A pipeline error or an unverified remote create both demote
/// the file to `AnalyzedFail` — S4 itself never removes anything.
pub async fn process_one(
    pipeline: &TranscriptPipeline,
    stem: &str,
    transcript_path: &Path,
    source_path: &Path,
    processed_dir: &Path,
    dry_run: bool,
) -> ProcessedFile {
    match pipeline
        .process_transcript(transcript_path, source_path, processed_dir, dry_run)
        .await
    {
        Ok(outcome) if dry_run || outcome.succeeded() => ProcessedFile {
            stem: stem.to_string(),
            source_path: source_path.to_path_buf(),
            state: FileState::AnalyzedOk,
            outcome: Some(outcome),
            fail_reason: None,
        },
        Ok(outcome) => {
            tracing::warn!("transcript for {stem} processed but not verified, marking analyzed_fail");
            ProcessedFile {
                stem: stem.to_string(),
                source_path: source_path.to_path_buf(),
                state: FileState::AnalyzedFail,
                outcome: Some(outcome),
                fail_reason: Some("remote_verification_failed"),
            }
        }
        Err(e) => {
            tracing::warn!("processing {stem} failed: {e}");
            let fail_reason = classify_failure(&e);
            ProcessedFile {
                stem: stem.to_string(),
                source_path: source_path.to_path_buf(),
                state: FileState::AnalyzedFail,
                outcome: None,
                fail_reason: Some(fail_reason),
            }
        }
    }
}

/// E4 pins `remote_create_failed` to a record-store error specifically;
/// everything else that can fail before a remote id exists (parsing,
/// analysis, routing, or transport/IO underneath them) is `analysis_failed`.
fn classify_failure(err: &PipelineError) -> &'static str {
    match err {
        PipelineError::RecordStore(_) => "remote_create_failed",
        _ => "analysis_failed",
    }
}
