//! S2 Validate: integrity checks, duration filtering, duplicate detection
//! against past sessions, disk headroom, and backend reachability. Never
//! fails the run — items that don't pass are skipped and logged with a
//! reason.

use crate::core::config::Config;
use crate::core::types::AudioItem;
use crate::services::resource_monitor::ResourceMonitor;
use crate::services::transcription::TranscriptionBackend;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    TooShort,
    TooLong,
    Duplicate,
    Unreadable,
    NoBackendAvailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::TooShort => "too_short",
            SkipReason::TooLong => "too_long",
            SkipReason::Duplicate => "duplicate",
            SkipReason::Unreadable => "unreadable",
            SkipReason::NoBackendAvailable => "no_backend_available",
        }
    }
}

pub struct ValidateOptions<'a> {
    pub known_fingerprints: &'a HashSet<(String, u64)>,
    pub min_duration_secs: Option<f64>,
    pub max_duration_secs: Option<f64>,
    pub duration_filter_enabled: bool,
}

pub struct ValidateOutcome {
    pub shortlist: Vec<AudioItem>,
    pub skipped: Vec<(AudioItem, SkipReason)>,
    /// Disk headroom fell below the configured floor; S2 treats this as a
    /// fatal condition for the run rather than a per-file skip.
    pub disk_floor_violated: bool,
}

/// Run S2 over a detected batch. `backends` is the configured transcription
/// chain; the run proceeds as long as at least one is available.
pub async fn validate(
    config: &Config,
    items: Vec<AudioItem>,
    options: ValidateOptions<'_>,
    resource_monitor: &ResourceMonitor,
    backends: &[Arc<dyn TranscriptionBackend>],
) -> ValidateOutcome {
    let mut shortlist = Vec::new();
    let mut skipped = Vec::new();

    let disk_floor_violated = !resource_monitor.disk_space_ok(&config.paths.project_root);

    let mut any_backend_available = false;
    for backend in backends {
        if backend.available().await {
            any_backend_available = true;
            break;
        }
    }

    for item in items {
        if !any_backend_available {
            skipped.push((item, SkipReason::NoBackendAvailable));
            continue;
        }
        if options.known_fingerprints.contains(&item.fingerprint()) {
            skipped.push((item, SkipReason::Duplicate));
            continue;
        }
        if item.estimated_duration_secs < config.transcription.min_duration_secs {
            skipped.push((item, SkipReason::TooShort));
            continue;
        }
        if options.duration_filter_enabled {
            if let Some(min) = options.min_duration_secs {
                if item.estimated_duration_secs < min {
                    skipped.push((item, SkipReason::TooShort));
                    continue;
                }
            }
            if let Some(max) = options.max_duration_secs {
                if item.estimated_duration_secs > max {
                    skipped.push((item, SkipReason::TooLong));
                    continue;
                }
            }
        }
        shortlist.push(item);
    }

    ValidateOutcome {
        shortlist,
        skipped,
        disk_floor_violated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};

    struct AlwaysAvailable;
    #[async_trait]
    impl TranscriptionBackend for AlwaysAvailable {
        fn name(&self) -> &str {
            "stub"
        }
        async fn available(&self) -> bool {
            true
        }
        fn max_bytes(&self) -> Option<u64> {
            None
        }
        async fn transcribe(&self, _path: &Path, _timeout_secs: u64) -> crate::Result<String> {
            Ok(String::new())
        }
    }

    fn item(stem: &str, size: u64) -> AudioItem {
        AudioItem::new(PathBuf::from(format!("/mnt/usb/{stem}.wav")), size)
    }

    #[tokio::test]
    async fn test_duplicate_against_known_fingerprint_is_skipped() {
        let config = Config::default();
        let monitor = ResourceMonitor::new(&config);
        let backends: Vec<Arc<dyn TranscriptionBackend>> = vec![Arc::new(AlwaysAvailable)];
        let mut known = HashSet::new();
        known.insert(("note_001".to_string(), 64_000));

        let items = vec![item("note_001", 64_000)];
        let outcome = validate(
            &config,
            items,
            ValidateOptions {
                known_fingerprints: &known,
                min_duration_secs: None,
                max_duration_secs: None,
                duration_filter_enabled: false,
            },
            &monitor,
            &backends,
        )
        .await;

        assert!(outcome.shortlist.is_empty());
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].1, SkipReason::Duplicate);
    }

    #[tokio::test]
    async fn test_no_backend_available_skips_everything() {
        let config = Config::default();
        let monitor = ResourceMonitor::new(&config);
        let backends: Vec<Arc<dyn TranscriptionBackend>> = Vec::new();
        let known = HashSet::new();

        let items = vec![item("note_002", 320_000)];
        let outcome = validate(
            &config,
            items,
            ValidateOptions {
                known_fingerprints: &known,
                min_duration_secs: None,
                max_duration_secs: None,
                duration_filter_enabled: false,
            },
            &monitor,
            &backends,
        )
        .await;

        assert!(outcome.shortlist.is_empty());
        assert_eq!(outcome.skipped[0].1, SkipReason::NoBackendAvailable);
    }

    #[tokio::test]
    async fn test_duration_filter_drops_outside_range() {
        let config = Config::default();
        let monitor = ResourceMonitor::new(&config);
        let backends: Vec<Arc<dyn TranscriptionBackend>> = vec![Arc::new(AlwaysAvailable)];
        let known = HashSet::new();

        // ~320_000 bytes estimates to 10s.
        let items = vec![item("note_003", 320_000)];
        let outcome = validate(
            &config,
            items,
            ValidateOptions {
                known_fingerprints: &known,
                min_duration_secs: Some(20.0),
                max_duration_secs: None,
                duration_filter_enabled: true,
            },
            &monitor,
            &backends,
        )
        .await;

        assert!(outcome.shortlist.is_empty());
        assert_eq!(outcome.skipped[0].1, SkipReason::TooShort);
    }
}
