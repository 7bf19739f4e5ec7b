// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Persistence of per-camera recording state (`recording_state.json`).
//!
//! Written atomically (temp file + rename) so a crash mid-write leaves the
//! previous snapshot intact. Restored at startup so restart counts and
//! uptime totals survive process restarts.

use crate::capture::supervisor::Supervisor;
use crate::capture::RecordingState;
use base::{err, Error, ErrorKind, ResultExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const STATE_FILE: &str = "recording_state.json";

/// Snapshot cadence.
pub const PERSIST_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StateFile {
    pub cameras: HashMap<String, RecordingState>,
}

/// Loads the snapshot; a missing file is an empty state, a corrupt file is
/// logged and discarded (the counters are best-effort telemetry, recording
/// correctness never depends on them).
pub fn load(state_dir: &Path) -> StateFile {
    let path = state_dir.join(STATE_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "discarding corrupt state file");
                StateFile::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "unable to read state file");
            StateFile::default()
        }
    }
}

/// Atomic write-temp-then-rename store.
pub fn store(state_dir: &Path, state: &StateFile) -> Result<(), Error> {
    let path = state_dir.join(STATE_FILE);
    let tmp = tmp_path(&path);
    let json = serde_json::to_vec_pretty(state).err_kind(ErrorKind::Internal)?;
    std::fs::write(&tmp, &json)
        .map_err(|e| err!(Internal, msg("unable to write {}", tmp.display()), source(e)))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| err!(Internal, msg("unable to rename into {}", path.display()), source(e)))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Snapshots the supervisor's states on a timer, and once more at shutdown.
pub async fn run_persister(
    supervisor: Arc<Supervisor>,
    state_dir: PathBuf,
    shutdown_rx: base::shutdown::Receiver,
) {
    loop {
        let stop = shutdown_rx.wait_timeout(PERSIST_INTERVAL).await.is_err();
        let snapshot = StateFile {
            cameras: supervisor.states(),
        };
        if let Err(e) = store(&state_dir, &snapshot) {
            warn!(err = %e.chain(), "unable to persist recording state");
        }
        if stop {
            info!("final recording-state snapshot written");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::time::Time;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = StateFile::default();
        f.cameras.insert(
            "cam1".to_owned(),
            RecordingState {
                recording: true,
                healthy: true,
                restart_count: 3,
                total_uptime_secs: 7200,
                last_segment: Some(Time(1_700_000_000)),
                ..Default::default()
            },
        );
        store(dir.path(), &f).unwrap();
        let loaded = load(dir.path());
        let cam = &loaded.cameras["cam1"];
        assert_eq!(cam.restart_count, 3);
        assert_eq!(cam.total_uptime_secs, 7200);
        assert_eq!(cam.last_segment, Some(Time(1_700_000_000)));
        // No temp file left behind.
        assert!(!dir.path().join("recording_state.json.tmp").exists());
    }

    #[test]
    fn missing_and_corrupt_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).cameras.is_empty());
        std::fs::write(dir.path().join(STATE_FILE), b"{not json").unwrap();
        assert!(load(dir.path()).cameras.is_empty());
    }
}
