// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The segment-picker sidecar: scans a camera's mp4 directories and ingests
//! completed files into the segment index.
//!
//! A file counts as complete once its size has held steady for one scan
//! cycle and it is at least one segment duration old, i.e. it is no longer
//! the transcoder's current write target. Scanning covers every disk in the
//! pool, so segments written before a disk rotation keep getting picked up
//! from the old disk.

use crate::capture::RecordingState;
use base::clock::Clocks;
use base::time::{self, Duration, Time};
use base::{Error, ErrorKind, ResultExt};
use db::{segments, Database};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Parses `<camera>_YYYYMMDD_HHMMSS.<ext>` into the segment's start time.
/// The timestamp is local wall-clock, per the transcoder's strftime output.
pub fn parse_segment_filename(name: &str, camera: &str) -> Option<Time> {
    let rest = name.strip_prefix(camera)?.strip_prefix('_')?;
    let stem = rest.rsplit_once('.').map(|(s, _ext)| s)?;
    time::parse_local(stem, time::FILENAME_FMT)
}

pub struct Picker {
    camera: String,
    segment_secs: i64,
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    state: Arc<Mutex<RecordingState>>,
    /// Files already ingested (or found already indexed).
    seen: HashSet<PathBuf>,
    /// Last observed size of not-yet-settled files.
    pending: HashMap<PathBuf, u64>,
}

impl Picker {
    pub fn new(
        camera: String,
        segment_secs: i64,
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        state: Arc<Mutex<RecordingState>>,
    ) -> Self {
        Picker {
            camera,
            segment_secs,
            db,
            clocks,
            state,
            seen: HashSet::new(),
            pending: HashMap::new(),
        }
    }

    /// One scan pass over all disks; returns how many new rows were added.
    pub fn scan_once(&mut self) -> Result<usize, Error> {
        let now = self.clocks.now();
        let disks = db::disks::list(&self.db.lock())?;
        // Collect candidates with the database lock released: directory
        // walks can be slow on spinning disks.
        struct Candidate {
            abs: PathBuf,
            rel: String,
            disk_id: String,
            start: Time,
            size: u64,
        }
        let mut settled = Vec::new();
        for disk in &disks {
            let dir = disk
                .path
                .join("recordings")
                .join(&self.camera)
                .join("mp4");
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(_) => continue, // nothing recorded on this disk yet
            };
            for entry in entries {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(camera = %self.camera, err = %e, "unreadable dir entry");
                        continue;
                    }
                };
                let name = entry.file_name();
                let name = match name.to_str() {
                    Some(n) => n,
                    None => continue,
                };
                let start = match parse_segment_filename(name, &self.camera) {
                    Some(t) => t,
                    None => continue,
                };
                let abs = entry.path();
                if self.seen.contains(&abs) {
                    continue;
                }
                let size = match entry.metadata() {
                    Ok(m) => m.len(),
                    Err(e) => {
                        warn!(camera = %self.camera, file = %abs.display(), err = %e, "stat failed");
                        continue;
                    }
                };
                let old_enough = now - start >= Duration::seconds(self.segment_secs);
                let steady = self.pending.get(&abs) == Some(&size);
                if old_enough && steady {
                    settled.push(Candidate {
                        rel: format!("recordings/{}/mp4/{name}", self.camera),
                        abs,
                        disk_id: disk.id.clone(),
                        start,
                        size,
                    });
                } else {
                    self.pending.insert(abs, size);
                }
            }
        }

        let mut inserted = 0;
        if !settled.is_empty() {
            let conn = self.db.lock();
            for c in &settled {
                let end = c.start + Duration::seconds(self.segment_secs);
                match segments::insert(
                    &conn,
                    &segments::SegmentToInsert {
                        camera: &self.camera,
                        disk_id: &c.disk_id,
                        rel_path: &c.rel,
                        start: c.start,
                        end,
                        size_bytes: c.size as i64,
                    },
                )? {
                    Some(_) => {
                        inserted += 1;
                        debug!(camera = %self.camera, file = %c.rel, "segment indexed");
                    }
                    None => {
                        // Already indexed (e.g. before a restart); just
                        // remember it so we stop re-checking.
                    }
                }
                let mut st = self.state.lock().unwrap();
                st.last_segment = Some(st.last_segment.map_or(end, |l| l.max(end)));
            }
        }
        for c in settled {
            self.pending.remove(&c.abs);
            self.seen.insert(c.abs);
        }
        Ok(inserted)
    }

    pub async fn run(mut self, shutdown_rx: base::shutdown::Receiver) {
        loop {
            if let Err(e) = self.scan_once() {
                warn!(camera = %self.camera, err = %e.chain(), "segment scan failed");
            }
            if shutdown_rx.wait_timeout(SCAN_INTERVAL).await.is_err() {
                // Final flush so an in-flight settled file isn't lost across
                // a clean shutdown.
                if let Err(e) = self.scan_once() {
                    warn!(camera = %self.camera, err = %e.chain(), "final segment scan failed");
                }
                info!(camera = %self.camera, "segment picker exiting");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use db::testutil;

    #[test]
    fn filename_parsing() {
        let t = parse_segment_filename("cam1_20240115_120000.mp4", "cam1").unwrap();
        assert_eq!(time::format_local(t, time::FILENAME_FMT), "20240115_120000");
        // Extension is irrelevant.
        assert!(parse_segment_filename("cam1_20240115_120000.ts", "cam1").is_some());
        // Wrong camera, malformed timestamp, stray files.
        assert!(parse_segment_filename("cam2_20240115_120000.mp4", "cam1").is_none());
        assert!(parse_segment_filename("cam1_2024_120000.mp4", "cam1").is_none());
        assert!(parse_segment_filename(".nfs0000", "cam1").is_none());
        assert!(parse_segment_filename("cam1_20240115_120000", "cam1").is_none());
    }

    fn test_picker(dir: &std::path::Path) -> (Picker, Arc<Database>, SimulatedClocks, String) {
        let conn = testutil::conn();
        let db = Arc::new(Database::new(conn).unwrap());
        let disk_id = {
            let c = db.lock();
            let d = db::disks::upsert_candidate(&c, dir, 2, false, Time(0)).unwrap();
            d.id
        };
        // Boot the simulated clock "now"-ish so local filename formatting of
        // recent times works.
        let boot = base::clock::RealClocks.now();
        let clocks = SimulatedClocks::new(boot);
        let state = Arc::new(Mutex::new(RecordingState::default()));
        let picker = Picker::new(
            "cam1".to_owned(),
            60,
            db.clone(),
            Arc::new(clocks.clone()),
            state,
        );
        (picker, db, clocks, disk_id)
    }

    #[test]
    fn settles_then_ingests_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let (mut picker, db, clocks, _disk) = test_picker(dir.path());
        let mp4 = dir.path().join("recordings/cam1/mp4");
        std::fs::create_dir_all(&mp4).unwrap();

        // A segment that started two minutes ago.
        let start = clocks.now() - Duration::seconds(120);
        let name = format!("cam1_{}.mp4", time::format_local(start, time::FILENAME_FMT));
        std::fs::write(mp4.join(&name), vec![0u8; 4096]).unwrap();
        // And the in-flight segment, too fresh to ingest.
        let fresh = clocks.now() - Duration::seconds(10);
        let fresh_name = format!("cam1_{}.mp4", time::format_local(fresh, time::FILENAME_FMT));
        std::fs::write(mp4.join(&fresh_name), vec![0u8; 100]).unwrap();

        // First pass only observes sizes.
        assert_eq!(picker.scan_once().unwrap(), 0);
        // Second pass: steady size + old enough → ingested.
        assert_eq!(picker.scan_once().unwrap(), 1);
        let rows = db::segments::list_intersecting(&db.lock(), "cam1", Time(0), Time(i64::MAX))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start, start);
        assert_eq!(rows[0].end, start + Duration::seconds(60));
        assert_eq!(rows[0].size_bytes, 4096);

        // Re-running over the same directory adds nothing.
        assert_eq!(picker.scan_once().unwrap(), 0);
        assert_eq!(
            db::segments::list_intersecting(&db.lock(), "cam1", Time(0), Time(i64::MAX))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn growing_file_is_not_ingested() {
        let dir = tempfile::tempdir().unwrap();
        let (mut picker, _db, clocks, _disk) = test_picker(dir.path());
        let mp4 = dir.path().join("recordings/cam1/mp4");
        std::fs::create_dir_all(&mp4).unwrap();
        let start = clocks.now() - Duration::seconds(120);
        let name = format!("cam1_{}.mp4", time::format_local(start, time::FILENAME_FMT));
        let path = mp4.join(&name);
        std::fs::write(&path, vec![0u8; 1000]).unwrap();
        assert_eq!(picker.scan_once().unwrap(), 0);
        // Still growing: size changed between cycles.
        std::fs::write(&path, vec![0u8; 2000]).unwrap();
        assert_eq!(picker.scan_once().unwrap(), 0);
        // Now steady.
        assert_eq!(picker.scan_once().unwrap(), 1);
    }

    #[test]
    fn fresh_restart_skips_already_indexed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (mut picker, db, clocks, disk) = test_picker(dir.path());
        let mp4 = dir.path().join("recordings/cam1/mp4");
        std::fs::create_dir_all(&mp4).unwrap();
        let start = clocks.now() - Duration::seconds(180);
        let name = format!("cam1_{}.mp4", time::format_local(start, time::FILENAME_FMT));
        std::fs::write(mp4.join(&name), vec![0u8; 4096]).unwrap();
        // Pre-index the row, as if a previous process run picked it up.
        db::segments::insert(
            &db.lock(),
            &db::segments::SegmentToInsert {
                camera: "cam1",
                disk_id: &disk,
                rel_path: &format!("recordings/cam1/mp4/{name}"),
                start,
                end: start + Duration::seconds(60),
                size_bytes: 4096,
            },
        )
        .unwrap();
        picker.scan_once().unwrap();
        assert_eq!(picker.scan_once().unwrap(), 0);
    }
}
