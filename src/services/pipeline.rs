//! Transcript Pipeline (C7): drives a single transcript through
//! Parse → Analyze → Route → Create-remote-record → Verify → Persist
//! sidecar. Used standalone (the `process` CLI command) and from the
//! orchestrator's S4 stage.
//!
//! **Safety rule (authoritative)**: the sidecar JSON is written only after
//! remote creation returns a non-empty id and that id is verified. A failed
//! or unverified remote create leaves no sidecar on disk — this absence is
//! the single signal the orchestrator uses to know a transcript was not
//! successfully processed.

use crate::core::types::{AnalysisRecord, Category, DurationDecision, RoutedRecord};
use crate::services::analyzers::{NoteAnalyzer, TaskAnalyzer};
use crate::services::parser::ContentParser;
use crate::services::record_store::RecordStore;
use crate::services::router::Router;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The outcome of running one transcript through the pipeline.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub source_stem: String,
    pub routed: Vec<RoutedRecord>,
    /// Remote ids in the same order as `routed`. Empty in dry-run mode or
    /// if processing failed before every record was created and verified.
    pub remote_ids: Vec<String>,
    /// Path to the sidecar JSON, if one was written. `None` for dry-run or
    /// a failed/unverified run — the orchestrator treats a `None` sidecar
    /// as the transcript not having been successfully processed.
    pub sidecar_path: Option<PathBuf>,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        !self.routed.is_empty() && self.remote_ids.len() == self.routed.len()
    }
}

pub struct TranscriptPipeline {
    parser: ContentParser,
    task_analyzer: TaskAnalyzer,
    note_analyzer: NoteAnalyzer,
    router: Router,
    record_store: Arc<dyn RecordStore>,
    default_processed_dir: PathBuf,
}

impl TranscriptPipeline {
    pub fn new(
        parser: ContentParser,
        task_analyzer: TaskAnalyzer,
        note_analyzer: NoteAnalyzer,
        router: Router,
        record_store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            parser,
            task_analyzer,
            note_analyzer,
            router,
            record_store,
            default_processed_dir: PathBuf::from("processed"),
        }
    }

    pub fn with_processed_dir(mut self, dir: PathBuf) -> Self {
        self.default_processed_dir = dir;
        self
    }

    /// Run Parse → Analyze → Route for one transcript's raw bytes. Split out
    /// from [`Self::process_transcript`] so the orchestrator's S4 stage can
    /// classify analyzed_ok/analyzed_fail before deciding whether to spend a
    /// remote-store call, and so parser/analyzer failures are distinguishable
    /// from record-store failures.
    async fn analyze_and_route(&self, raw: &[u8]) -> Result<Vec<RoutedRecord>> {
        let parsed = self.parser.parse(raw)?;

        let mut analyses: Vec<AnalysisRecord> = match parsed.category_hint {
            Category::Task => {
                self.task_analyzer
                    .analyze(&parsed.body, parsed.project_hint.clone())
                    .await?
            }
            _ => vec![
                self.note_analyzer
                    .analyze(&parsed.body, parsed.category_hint, parsed.project_hint.clone())
                    .await?,
            ],
        };

        for analysis in &mut analyses {
            if analysis.manual_review && analysis.project.is_none() {
                analysis.project = Some(AnalysisRecord::MANUAL_REVIEW_FALLBACK.to_string());
            }
        }

        let mut routed = Vec::with_capacity(analyses.len());
        for analysis in analyses {
            routed.push(self.router.route(analysis).await?);
        }
        Ok(routed)
    }

    /// Run Parse → Analyze → Route → Create → Verify → Persist for one
    /// transcript file, writing the sidecar under `processed_dir`.
    /// `source_path` is the *original audio* path recorded in the sidecar
    /// for provenance, which may differ from `transcript_path` (the text
    /// file actually being read).
    pub async fn process_transcript(
        &self,
        transcript_path: &Path,
        source_path: &Path,
        processed_dir: &Path,
        dry_run: bool,
    ) -> Result<ProcessOutcome> {
        let stem = transcript_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let raw = tokio::fs::read(transcript_path).await?;
        let routed = self.analyze_and_route(&raw).await?;

        if dry_run {
            tracing::info!(
                "[dry-run] would create {} remote record(s) for {} and write a sidecar",
                routed.len(),
                stem
            );
            return Ok(ProcessOutcome {
                source_stem: stem,
                routed,
                remote_ids: Vec::new(),
                sidecar_path: None,
            });
        }

        let mut remote_ids = Vec::with_capacity(routed.len());
        for record in &routed {
            let remote_id = self.record_store.create(record).await?;
            let verified = self.record_store.verify(&remote_id).await?;
            if !verified {
                tracing::error!(
                    target: "safety",
                    "record {} for {} failed post-create verification",
                    remote_id,
                    stem
                );
                return Ok(ProcessOutcome {
                    source_stem: stem,
                    routed,
                    remote_ids,
                    sidecar_path: None,
                });
            }
            remote_ids.push(remote_id);
        }

        let sidecar_path =
            write_sidecar(processed_dir, &stem, source_path, &routed, &remote_ids).await?;

        Ok(ProcessOutcome {
            source_stem: stem,
            routed,
            remote_ids,
            sidecar_path: Some(sidecar_path),
        })
    }
}

async fn write_sidecar(
    processed_dir: &Path,
    stem: &str,
    source_path: &Path,
    routed: &[RoutedRecord],
    remote_ids: &[String],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(processed_dir).await?;
    let path = processed_dir.join(format!("{stem}_processed.json"));
    let doc = build_sidecar_doc(source_path, routed, remote_ids, Utc::now());
    let json = serde_json::to_string_pretty(&doc)?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(path)
}

#[derive(Debug, Serialize)]
struct SidecarAnalysis<'a> {
    category: &'static str,
    title: &'a str,
    content: &'a str,
    action_items: &'a [String],
    key_insights: &'a [String],
    confidence: &'static str,
    project: Option<&'a str>,
    manual_review: bool,
}

#[derive(Debug, Serialize)]
struct SidecarRouting<'a> {
    project_id: Option<&'a str>,
    duration: Option<&'a DurationDecision>,
    tags: Vec<&'static str>,
    icon: &'a str,
}

#[derive(Debug, Serialize)]
struct SidecarEntry<'a> {
    analysis: SidecarAnalysis<'a>,
    routing: SidecarRouting<'a>,
}

fn to_entry(record: &RoutedRecord) -> SidecarEntry<'_> {
    SidecarEntry {
        analysis: SidecarAnalysis {
            category: record.analysis.category.as_str(),
            title: &record.analysis.title,
            content: &record.analysis.body,
            action_items: &record.analysis.action_items,
            key_insights: &record.analysis.key_insights,
            confidence: record.analysis.confidence.as_str(),
            project: record.analysis.project.as_deref(),
            manual_review: record.analysis.manual_review,
        },
        routing: SidecarRouting {
            project_id: record.project_id.as_deref(),
            duration: record.duration.as_ref(),
            tags: record.tags.iter().map(|t| t.as_str()).collect(),
            icon: &record.icon,
        },
    }
}

/// Single-record and multi-record transcripts render to different sidecar
/// shapes: a bare `analysis`/`routing` pair for one record, or an
/// `analyses` array plus `remote_ids` when a transcript split into several
/// distinct tasks. See SPEC §6 for the schema this mirrors.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SidecarDoc<'a> {
    Single {
        original_file: String,
        analysis: SidecarAnalysis<'a>,
        routing: SidecarRouting<'a>,
        remote_id: &'a str,
        timestamp: DateTime<Utc>,
    },
    Multi {
        original_file: String,
        analyses: Vec<SidecarEntry<'a>>,
        remote_ids: &'a [String],
        timestamp: DateTime<Utc>,
    },
}

fn build_sidecar_doc<'a>(
    source_path: &Path,
    routed: &'a [RoutedRecord],
    remote_ids: &'a [String],
    timestamp: DateTime<Utc>,
) -> SidecarDoc<'a> {
    let original_file = source_path.to_string_lossy().into_owned();
    if routed.len() == 1 {
        let entry = to_entry(&routed[0]);
        SidecarDoc::Single {
            original_file,
            analysis: entry.analysis,
            routing: entry.routing,
            remote_id: &remote_ids[0],
            timestamp,
        }
    } else {
        SidecarDoc::Multi {
            original_file,
            analyses: routed.iter().map(to_entry).collect(),
            remote_ids,
            timestamp,
        }
    }
}

/// Options for the standalone `process` CLI command, which bypasses the
/// orchestrator entirely and operates directly on transcript files already
/// on disk.
pub struct PipelineRunOptions {
    pub dry_run: bool,
    pub file: Option<PathBuf>,
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub ok: usize,
    pub failed: usize,
    pub outcomes: Vec<ProcessOutcome>,
}

impl TranscriptPipeline {
    /// Entry point for the standalone `process` subcommand: runs every
    /// `.txt` transcript under `input_dir` (or a single `file`) through the
    /// pipeline, using the transcript's own path as sidecar provenance since
    /// no orchestrator batch is available to supply the original audio path.
    pub async fn run(&self, options: PipelineRunOptions) -> Result<PipelineSummary> {
        let processed_dir = options
            .output_dir
            .clone()
            .unwrap_or_else(|| self.default_processed_dir.clone());
        let files = self.collect_inputs(&options)?;
        let mut summary = PipelineSummary::default();

        for file in files {
            match self
                .process_transcript(&file, &file, &processed_dir, options.dry_run)
                .await
            {
                Ok(outcome) => {
                    if options.dry_run || outcome.succeeded() {
                        summary.ok += 1;
                    } else {
                        summary.failed += 1;
                    }
                    summary.outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::warn!("processing {:?} failed: {}", file, e);
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    fn collect_inputs(&self, options: &PipelineRunOptions) -> Result<Vec<PathBuf>> {
        if let Some(file) = &options.file {
            return Ok(vec![file.clone()]);
        }
        let dir = options
            .input_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("transcripts"));
        let mut files = Vec::new();
        if dir.is_dir() {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }
}
