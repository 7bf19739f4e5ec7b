// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The capture pipeline: per-camera supervised transcoder workers, the
//! segment-picker sidecars that index their output, and the supervisor that
//! owns the set.

pub mod picker;
pub mod probe;
pub mod supervisor;
pub mod worker;

use base::time::Time;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How long a child gets after SIGTERM before SIGKILL.
pub const TERMINATE_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Per-camera recording state, shared between worker, picker, supervisor and
/// the `recording_state.json` snapshot.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct RecordingState {
    pub recording: bool,
    pub healthy: bool,
    pub restart_count: u64,
    pub consecutive_failures: u32,
    pub total_uptime_secs: i64,
    pub last_restart: Option<Time>,
    pub last_healthy: Option<Time>,
    pub last_segment: Option<Time>,
    /// Current backoff delay, 0 while capturing.
    pub current_backoff_secs: u64,
}

/// The per-camera directory layout beneath a disk's mount path.
pub struct CameraDirs {
    pub mp4: PathBuf,
    pub logs: PathBuf,
    pub tmp: PathBuf,
}

impl CameraDirs {
    pub fn new(disk_path: &Path, camera: &str) -> Self {
        let root = disk_path.join("recordings").join(camera);
        CameraDirs {
            mp4: root.join("mp4"),
            logs: root.join("logs"),
            tmp: root.join("tmp"),
        }
    }

    pub fn create(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.mp4)?;
        std::fs::create_dir_all(&self.logs)?;
        std::fs::create_dir_all(&self.tmp)
    }
}

/// SIGTERM, a bounded grace, then SIGKILL. Always reaps the child.
pub async fn terminate_child(child: &mut tokio::process::Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }
    match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.kill().await;
        }
    }
}

/// Reads the last `max` bytes of a log file, for error reporting.
pub fn log_tail(path: &Path, max: u64) -> String {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return String::new(),
    };
    let len = f.metadata().map(|m| m.len()).unwrap_or(0);
    if len > max {
        if f.seek(SeekFrom::Start(len - max)).is_err() {
            return String::new();
        }
    }
    let mut buf = Vec::new();
    if f.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_dirs_layout() {
        let dirs = CameraDirs::new(Path::new("/mnt/a"), "cam1");
        assert_eq!(dirs.mp4, Path::new("/mnt/a/recordings/cam1/mp4"));
        assert_eq!(dirs.logs, Path::new("/mnt/a/recordings/cam1/logs"));
        assert_eq!(dirs.tmp, Path::new("/mnt/a/recordings/cam1/tmp"));
    }

    #[test]
    fn log_tail_reads_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, "0123456789").unwrap();
        assert_eq!(log_tail(&path, 4), "6789");
        assert_eq!(log_tail(&path, 100), "0123456789");
        assert_eq!(log_tail(&dir.path().join("missing.log"), 4), "");
    }
}
