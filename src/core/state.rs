//! Durable JSON journal of the current and past orchestrator sessions (C11).
//!
//! `SessionState` is owned exclusively by the orchestrator. Arrays within
//! `current_session` only ever grow; once a session is closed (moved into
//! `previous_sessions`) nothing in it is mutated again.

use crate::core::error::OrchestratorError;
use crate::core::types::SessionId;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageFlags {
    #[serde(default)]
    pub transcription_complete: bool,
    #[serde(default)]
    pub processing_complete: bool,
    #[serde(default)]
    pub archive_complete: bool,
    #[serde(default)]
    pub cleanup_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub discovered: Vec<String>,
    #[serde(default)]
    pub staged: Vec<String>,
    #[serde(default)]
    pub transcribed: Vec<String>,
    #[serde(default)]
    pub analyzed_ok: Vec<String>,
    #[serde(default)]
    pub analyzed_fail: Vec<String>,
    #[serde(default)]
    pub duplicates_skipped: Vec<String>,
    #[serde(default)]
    pub cleanup_candidates: Vec<String>,
    #[serde(default)]
    pub stage_flags: StageFlags,
}

impl CurrentSession {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            discovered: Vec::new(),
            staged: Vec::new(),
            transcribed: Vec::new(),
            analyzed_ok: Vec::new(),
            analyzed_fail: Vec::new(),
            duplicates_skipped: Vec::new(),
            cleanup_candidates: Vec::new(),
            stage_flags: StageFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviousSession {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub cleanup_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files_to_delete: Vec<String>,
    #[serde(default)]
    pub analyzed_ok: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveManagement {
    pub last_cleanup: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files_to_delete: Vec<String>,
    #[serde(default)]
    pub deletion_scheduled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub current_session: CurrentSession,
    #[serde(default)]
    pub previous_sessions: Vec<PreviousSession>,
    #[serde(default)]
    pub archive_management: ArchiveManagement,
}

impl SessionState {
    pub fn new_session(session_id: SessionId) -> Self {
        Self {
            current_session: CurrentSession::new(session_id),
            previous_sessions: Vec::new(),
            archive_management: ArchiveManagement::default(),
        }
    }

    /// Load the journal from disk, or start a fresh one if absent.
    pub fn load_or_new(path: &Path, session_id: SessionId) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new_session(session_id));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| OrchestratorError::SessionState(e.to_string()))?;
        let state: SessionState = serde_json::from_str(&content)
            .map_err(|e| OrchestratorError::SessionState(e.to_string()))?;
        Ok(state)
    }

    /// Persist the journal using an atomic write-rename so a crash mid-write
    /// never leaves a torn file on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = tmp_sibling(path);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Close the current session, moving it into `previous_sessions`. Files
    /// that were analyzed_ok but never reached `SOURCE_DELETED` (i.e. were
    /// retained) become pending-deletion candidates for the *next* run's
    /// duplicate check, not immediate deletion candidates.
    pub fn close_session(&mut self, new_session_id: SessionId) {
        let closed = PreviousSession {
            session_id: self.current_session.session_id,
            started_at: self.current_session.started_at,
            closed_at: Utc::now(),
            cleanup_date: None,
            files_to_delete: self.current_session.cleanup_candidates.clone(),
            analyzed_ok: self.current_session.analyzed_ok.clone(),
        };
        self.previous_sessions.push(closed);
        self.current_session = CurrentSession::new(new_session_id);
    }

    /// Fingerprints of files already processed (deleted) in a past session,
    /// used by S2's duplicate check (P6).
    pub fn known_fingerprints(&self) -> impl Iterator<Item = &str> {
        self.previous_sessions
            .iter()
            .flat_map(|s| s.files_to_delete.iter().map(|s| s.as_str()))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| format!(".{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| ".session_state.json.tmp".to_string());
    path.with_file_name(file_name)
}
