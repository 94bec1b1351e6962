//! S1 Detect: check the USB mount and scan it for candidate audio files.

use crate::core::config::Config;
use crate::core::error::OrchestratorError;
use crate::core::types::{is_readable_nonempty_file, AudioItem};
use crate::Result;
use std::path::Path;

/// Scan the configured USB path for files matching the configured audio
/// extension. Rejects files that are missing, unreadable, or zero bytes; it
/// does not validate decodability or duration (that is S2's job).
///
/// Fatal only when the mount itself is unreachable and `has_backlog` is
/// false — otherwise a missing mount is logged and treated as an empty scan
/// so a run with a staged backlog from a prior interrupted session can still
/// make progress.
pub fn detect(config: &Config, has_backlog: bool) -> Result<Vec<AudioItem>> {
    let usb_path = &config.paths.usb_path;
    if !usb_path.is_dir() {
        if has_backlog {
            tracing::warn!("USB path {:?} unreachable, continuing with staged backlog", usb_path);
            return Ok(Vec::new());
        }
        return Err(OrchestratorError::UsbUnreachable(format!("{usb_path:?} is not a directory")).into());
    }

    let mut items = Vec::new();
    for entry in std::fs::read_dir(usb_path)? {
        let entry = entry?;
        let path = entry.path();
        if !matches_extension(&path, &config.paths.audio_extension) {
            continue;
        }
        if !is_readable_nonempty_file(&path) {
            tracing::debug!("rejecting unreadable or empty file: {:?}", path);
            continue;
        }
        let size_bytes = entry.metadata()?.len();
        items.push(AudioItem::new(path, size_bytes));
    }
    items.sort_by(|a, b| a.stem.cmp(&b.stem));
    tracing::info!("S1 detect: found {} candidate file(s) under {:?}", items.len(), usb_path);
    Ok(items)
}

fn matches_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_finds_matching_extension_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("note_001.wav"), b"RIFF....").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"not audio").unwrap();

        let mut config = Config::default();
        config.paths.usb_path = dir.path().to_path_buf();
        config.paths.audio_extension = "wav".to_string();

        let items = detect(&config, false).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].stem, "note_001");
    }

    #[test]
    fn test_detect_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("empty.wav"), b"").unwrap();

        let mut config = Config::default();
        config.paths.usb_path = dir.path().to_path_buf();
        config.paths.audio_extension = "wav".to_string();

        let items = detect(&config, false).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_detect_missing_mount_with_backlog_is_not_fatal() {
        let mut config = Config::default();
        config.paths.usb_path = std::path::PathBuf::from("/nonexistent/mount/path");
        let items = detect(&config, true).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_detect_missing_mount_without_backlog_is_fatal() {
        let mut config = Config::default();
        config.paths.usb_path = std::path::PathBuf::from("/nonexistent/mount/path");
        assert!(detect(&config, false).is_err());
    }
}
