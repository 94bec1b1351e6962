//! S3 Transcribe: stage shortlisted files to local fast storage, dispatch to
//! the transcription backend chain in bounded parallel batches packed by
//! total estimated duration rather than file count, and write transcript
//! text files.

use crate::core::error::TranscriptionError;
use crate::core::types::{AudioItem, StagedItem, Transcript};
use crate::services::resource_monitor::ResourceMonitor;
use crate::services::transcription::{transcribe_with_failover, TranscriptionBackend};
use crate::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct TranscribeOutcome {
    pub transcript_path: PathBuf,
    pub transcript: Transcript,
}

/// Copy `item.source_path` into the staging directory, verifying the copy
/// is byte-identical in size before trusting it for transcription.
pub fn stage(item: &AudioItem, staging_dir: &std::path::Path) -> Result<StagedItem> {
    std::fs::create_dir_all(staging_dir)?;
    let staged_path = staging_dir.join(
        item.source_path
            .file_name()
            .ok_or_else(|| TranscriptionError::SubprocessFailed("source path has no file name".into()))?,
    );
    std::fs::copy(&item.source_path, &staged_path)?;
    let staged_len = std::fs::metadata(&staged_path)?.len();
    if staged_len != item.size_bytes {
        return Err(TranscriptionError::SubprocessFailed(format!(
            "staged copy size {staged_len} does not match source size {}",
            item.size_bytes
        ))
        .into());
    }
    Ok(StagedItem {
        staged_path,
        source_path: item.source_path.clone(),
        fingerprint: item.fingerprint(),
    })
}

/// Pack items into batches whose summed estimated duration does not exceed
/// `budget_secs`, so one long recording cannot monopolize a worker slot.
/// A single item longer than the budget still gets its own batch.
pub fn pack_batches(items: &[AudioItem], budget_secs: f64) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_total = 0.0;

    for (i, item) in items.iter().enumerate() {
        if !current.is_empty() && current_total + item.estimated_duration_secs > budget_secs {
            batches.push(std::mem::take(&mut current));
            current_total = 0.0;
        }
        current.push(i);
        current_total += item.estimated_duration_secs;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Dynamic per-file timeout from §5: `max(20 min, 0.5 * estimated_duration)`.
pub fn timeout_secs_for(estimated_duration_secs: f64) -> u64 {
    (1200.0_f64).max(0.5 * estimated_duration_secs) as u64
}

/// Transcribe one staged file against the backend chain, writing the result
/// to `transcripts_dir/<stem>.txt`. Returns `Err` on a hard failure (no
/// retry, e.g. permission denied or audio-too-short) or when every backend
/// in the chain is exhausted.
pub async fn transcribe_one(
    staged: &StagedItem,
    backends: &[Arc<dyn TranscriptionBackend>],
    size_bytes: u64,
    estimated_duration_secs: f64,
    transcripts_dir: &std::path::Path,
) -> Result<TranscribeOutcome> {
    let started = std::time::Instant::now();
    let timeout_secs = timeout_secs_for(estimated_duration_secs);

    let (text, backend_name) =
        transcribe_with_failover(backends, &staged.staged_path, size_bytes, timeout_secs).await?;

    if text.trim().is_empty() {
        return Err(TranscriptionError::AudioTooShort(staged.stem().to_string()).into());
    }

    std::fs::create_dir_all(transcripts_dir)?;
    let transcript_path = transcripts_dir.join(format!("{}.txt", staged.stem()));
    std::fs::write(&transcript_path, &text)?;

    let transcript = Transcript {
        text,
        source_stem: staged.stem().to_string(),
        backend_name,
        backend_duration_secs: None,
        processing_time_ms: started.elapsed().as_millis() as u64,
        created_at: Utc::now(),
    };

    Ok(TranscribeOutcome {
        transcript_path,
        transcript,
    })
}

/// Acquire one admission permit for a new worker, polling the resource
/// monitor's CPU soft cap before handing back the semaphore permit. Used by
/// the orchestrator to gate how many of the pool's `permits` are actually
/// dispatched concurrently against the soft cap, on top of the pool's fixed
/// size.
pub async fn admit(semaphore: &Semaphore, resource_monitor: &ResourceMonitor) -> tokio::sync::SemaphorePermit<'_> {
    loop {
        if resource_monitor.admit_new_worker() {
            if let Ok(permit) = semaphore.try_acquire() {
                return permit;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
