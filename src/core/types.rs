//! Core data model for the recall pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Unique identifier for a processing session.
pub type SessionId = uuid::Uuid;

/// A source recording discovered on the USB volume.
///
/// Invariants: never mutated after discovery; `source_path` resolves to a
/// regular, readable file at discovery time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioItem {
    /// Stable filename stem, used as the identity of the recording across
    /// runs (duplicate detection, sidecar naming, archive naming).
    pub stem: String,

    /// Path to the source file on the USB volume.
    pub source_path: PathBuf,

    /// Size in bytes at discovery time.
    pub size_bytes: u64,

    /// Estimated duration. Derived from file size unless the transcription
    /// backend reports a true duration (see `Transcript::backend_duration`).
    pub estimated_duration_secs: f64,

    /// When this item was discovered.
    pub detected_at: DateTime<Utc>,
}

impl AudioItem {
    pub fn new(source_path: PathBuf, size_bytes: u64) -> Self {
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            stem,
            source_path,
            size_bytes,
            estimated_duration_secs: estimate_duration_from_size(size_bytes),
            detected_at: Utc::now(),
        }
    }

    /// The (stem, size) pair used as a stable fingerprint for duplicate
    /// detection across sessions.
    pub fn fingerprint(&self) -> (String, u64) {
        (self.stem.clone(), self.size_bytes)
    }
}

/// Rough duration estimate from file size, assuming 16-bit mono PCM at
/// 16kHz (256000 bits/s = 32000 bytes/s). This is the size-heuristic
/// fallback; a backend-reported duration always takes priority when one is
/// available.
pub fn estimate_duration_from_size(size_bytes: u64) -> f64 {
    const ASSUMED_BYTES_PER_SEC: f64 = 32_000.0;
    size_bytes as f64 / ASSUMED_BYTES_PER_SEC
}

/// A local fast-storage copy of an `AudioItem`, made before transcription so
/// that a flaky USB mount cannot interrupt an in-flight transcribe call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedItem {
    pub staged_path: PathBuf,
    pub source_path: PathBuf,
    pub fingerprint: (String, u64),
}

impl StagedItem {
    pub fn stem(&self) -> &str {
        &self.fingerprint.0
    }
}

/// Transcript text plus provenance, produced by a `TranscriptionBackend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// UTF-8 transcript text. Invariant: non-empty after trimming.
    pub text: String,

    /// Stem of the source recording this transcript was derived from.
    pub source_stem: String,

    /// Name of the backend that produced this transcript (e.g. "cloud",
    /// "local").
    pub backend_name: String,

    /// True end-to-end duration reported by the backend, if any. Preferred
    /// over the size heuristic when present.
    pub backend_duration_secs: Option<f64>,

    /// Wall-clock time the transcription call took.
    pub processing_time_ms: u64,

    pub created_at: DateTime<Utc>,
}

/// Category a transcript is classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Task,
    Note,
    Research,
    Unclear,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Task => "task",
            Category::Note => "note",
            Category::Research => "research",
            Category::Unclear => "unclear",
        }
    }

    /// Parse a trailing explicit marker ("Task.", "note", "RESEARCH") into a
    /// category, case-insensitively.
    pub fn from_marker(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "task" => Some(Category::Task),
            "note" => Some(Category::Note),
            "research" => Some(Category::Research),
            _ => None,
        }
    }
}

/// Confidence level self-reported (directly or indirectly) by the LLM,
/// clamped to a coarse three-level scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        }
    }
}

/// Structured output for one transcript, or one of several records when a
/// transcript yields multiple distinct tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub category: Category,

    /// Always present, at most ~80 characters.
    pub title: String,

    /// Never empty. Cleaned for short form, preserved verbatim for long
    /// form notes/research.
    pub body: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_insights: Vec<String>,

    pub confidence: Confidence,

    /// Project name or hint extracted from the body, prior to catalog
    /// resolution. `None` if no hint was found.
    pub project: Option<String>,

    /// Set when the record requires a human to review routing decisions
    /// (e.g. project resolution fell below threshold).
    pub manual_review: bool,
}

impl AnalysisRecord {
    /// The fallback label attached whenever `manual_review` is set, per the
    /// invariant that a manual-review record always carries a routing
    /// fallback label.
    pub const MANUAL_REVIEW_FALLBACK: &'static str = "needs_human_review";
}

/// Duration classification for task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DurationClass {
    Quick,
    Medium,
    Long,
}

impl DurationClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DurationClass::Quick => "QUICK",
            DurationClass::Medium => "MEDIUM",
            DurationClass::Long => "LONG",
        }
    }
}

/// Full duration decision emitted by the router for task records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurationDecision {
    pub class: DurationClass,
    pub estimated_minutes: u32,
    pub due_date: NaiveDate,
    pub reason: String,
}

/// Tags a record can be routed with. Represented as an enum (rather than a
/// free string) so the router's tag matching is exhaustively testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Communications,
    NeedsHumanReview,
    NeedsExternalInput,
    ManualReview,
}

impl Tag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Communications => "communications",
            Tag::NeedsHumanReview => "needs_human_review",
            Tag::NeedsExternalInput => "needs_external_input",
            Tag::ManualReview => "manual_review",
        }
    }
}

/// An `AnalysisRecord` plus the routing decisions made for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedRecord {
    #[serde(flatten)]
    pub analysis: AnalysisRecord,

    pub project_id: Option<String>,
    pub duration: Option<DurationDecision>,
    pub tags: Vec<Tag>,
    pub icon: String,
}

/// A project known to the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub id: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub status: String,
    pub archived: bool,
}

/// Confidence of a project-name match, and which name string matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMatch {
    pub project_id: String,
    pub confidence: f32,
    pub matched_text: String,
}

/// Per-file lifecycle state, mirroring the orchestrator's state machine.
/// Transitions are monotonic: `can_transition_to` rejects any backward move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileState {
    Discovered,
    Validated,
    Staged,
    Transcribed,
    AnalyzedOk,
    AnalyzedFail,
    VerifiedRemote,
    Archived,
    SourceDeleted,
    /// Terminal safe state: the source is preserved for a later session.
    Retained,
}

impl FileState {
    fn ordinal(self) -> u8 {
        match self {
            FileState::Discovered => 0,
            FileState::Validated => 1,
            FileState::Staged => 2,
            FileState::Transcribed => 3,
            FileState::AnalyzedOk => 4,
            FileState::AnalyzedFail => 4,
            FileState::VerifiedRemote => 5,
            FileState::Archived => 6,
            FileState::SourceDeleted => 7,
            FileState::Retained => 8,
        }
    }

    /// Whether moving from `self` to `next` is a legal, forward-only
    /// transition. `Retained` is reachable from any state (a file can be
    /// retained at any point a stage decides uncertainty wins) but nothing
    /// is reachable from `Retained` or `SourceDeleted`.
    pub fn can_transition_to(self, next: FileState) -> bool {
        if matches!(self, FileState::Retained | FileState::SourceDeleted) {
            return false;
        }
        if next == FileState::Retained {
            return true;
        }
        next.ordinal() > self.ordinal()
            || (self.ordinal() == next.ordinal() && self != next && self.ordinal() == 4)
    }
}

/// Audio sample path utility: whether a path is a regular, non-empty,
/// readable file (used by S1 Detect rejection rules).
pub fn is_readable_nonempty_file(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_item_fingerprint() {
        let item = AudioItem::new(PathBuf::from("/mnt/usb/note_001.wav"), 64_000);
        assert_eq!(item.stem, "note_001");
        assert_eq!(item.fingerprint(), ("note_001".to_string(), 64_000));
    }

    #[test]
    fn test_category_from_marker() {
        assert_eq!(Category::from_marker("Task"), Some(Category::Task));
        assert_eq!(Category::from_marker(" research "), Some(Category::Research));
        assert_eq!(Category::from_marker("banana"), None);
    }

    #[test]
    fn test_state_machine_monotonic() {
        assert!(FileState::Discovered.can_transition_to(FileState::Validated));
        assert!(!FileState::Validated.can_transition_to(FileState::Discovered));
        assert!(FileState::Transcribed.can_transition_to(FileState::AnalyzedFail));
        assert!(FileState::Staged.can_transition_to(FileState::Retained));
        assert!(!FileState::Retained.can_transition_to(FileState::Archived));
        assert!(!FileState::SourceDeleted.can_transition_to(FileState::Retained));
    }

    #[test]
    fn test_duration_from_size() {
        // 10 seconds of 16kHz mono 16-bit PCM is 320_000 bytes.
        let secs = estimate_duration_from_size(320_000);
        assert!((secs - 10.0).abs() < 0.01);
    }
}
