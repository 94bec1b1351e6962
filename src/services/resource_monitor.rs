//! Resource Monitor (C10): CPU sampling and disk-space reporting used for
//! admission control. Passive — it only gates whether a *new* S3 worker may
//! start and whether S2 may proceed; it never throttles workers already
//! running.

use crate::core::config::Config;
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

pub struct ResourceMonitor {
    cpu_soft_cap_percent: f32,
    disk_floor_bytes: u64,
    system: Mutex<System>,
}

impl ResourceMonitor {
    pub fn new(config: &Config) -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self {
            cpu_soft_cap_percent: config.resource_monitor.cpu_soft_cap_percent,
            disk_floor_bytes: config.resource_monitor.disk_floor_mb * 1024 * 1024,
            system: Mutex::new(system),
        }
    }

    /// 1s-averaged global CPU usage, as a percentage in `[0.0, 100.0]`.
    /// `sysinfo` requires two refreshes roughly 1s apart to produce a
    /// meaningful average; callers that need a fresh sample should call
    /// [`Self::sample`] before reading.
    pub fn cpu_usage_percent(&self) -> f32 {
        let system = self.system.lock().unwrap();
        system.global_cpu_info().cpu_usage()
    }

    /// Take a new ~1s CPU sample. Intended to be called on a background
    /// interval by the caller (S3's scheduler), not per admission check.
    pub async fn sample(&self) {
        {
            let mut system = self.system.lock().unwrap();
            system.refresh_cpu();
        }
        tokio::time::sleep(std::time::Duration::from_millis(1000)).await;
        let mut system = self.system.lock().unwrap();
        system.refresh_cpu();
    }

    /// Admission control for S3: a new transcription worker may start only
    /// if the last CPU sample is below the configured soft cap.
    pub fn admit_new_worker(&self) -> bool {
        self.cpu_usage_percent() < self.cpu_soft_cap_percent
    }

    /// Free bytes available on the filesystem containing `path`, or `None`
    /// if it cannot be determined (e.g. no matching mount found).
    pub fn free_disk_bytes(&self, path: &Path) -> Option<u64> {
        let mut system = self.system.lock().unwrap();
        system.refresh_disks_list();
        system.refresh_disks();

        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let mut best: Option<(usize, u64)> = None;
        for disk in system.disks() {
            let mount = disk.mount_point();
            if canonical.starts_with(mount) {
                let depth = mount.components().count();
                if best.map(|(d, _)| depth > d).unwrap_or(true) {
                    best = Some((depth, disk.available_space()));
                }
            }
        }
        best.map(|(_, space)| space)
    }

    /// Whether S2's disk-space floor is satisfied for `path`'s filesystem.
    /// An indeterminate result (no matching mount) does not fail the run;
    /// the floor only fires on a definite shortfall.
    pub fn disk_space_ok(&self, path: &Path) -> bool {
        self.free_disk_bytes(path)
            .map(|free| free >= self.disk_floor_bytes)
            .unwrap_or(true)
    }

    pub fn disk_floor_bytes(&self) -> u64 {
        self.disk_floor_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_control_respects_soft_cap() {
        let mut config = Config::default();
        config.resource_monitor.cpu_soft_cap_percent = 70.0;
        let monitor = ResourceMonitor::new(&config);
        // Freshly constructed with a single refresh, usage reads as a
        // plausible low value rather than a meaningful average; the
        // admission check should still be a well-defined bool either way.
        let _ = monitor.admit_new_worker();
    }

    #[test]
    fn test_disk_space_ok_for_existing_path() {
        let config = Config::default();
        let monitor = ResourceMonitor::new(&config);
        let dir = tempfile::tempdir().unwrap();
        // A real temp dir should resolve to some mount with nonzero space;
        // an indeterminate result also passes (fail-open), so this should
        // never be false on a sane test machine with some free space.
        assert!(monitor.disk_space_ok(dir.path()) || monitor.free_disk_bytes(dir.path()).is_some());
    }
}
