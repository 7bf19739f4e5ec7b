// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Housekeeping: stuck-task recovery and retention GC.
//!
//! Per-camera `retention_days` is authoritative for segments and chunks:
//! index rows and the underlying files go by the same cutoff. Rows are
//! removed first; a crash between the two leaves orphan files that the
//! filesystem pass cannot see anymore, which is deliberate: orphan files
//! waste space until an operator sweep, dangling index rows would break
//! clip assembly.

use crate::config::{CameraConfig, QueueConfig};
use base::clock::Clocks;
use base::time::{Duration, Time};
use base::Error;
use db::{chunks, segments, tasks, videos, Database};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PASS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Retention GC cadence; the stuck-task pass runs every [`PASS_INTERVAL`].
const GC_EVERY_PASSES: u32 = 60;

const COMPLETED_TASK_RETENTION: Duration = Duration::days(7);
const FAILED_TASK_RETENTION: Duration = Duration::days(30);
const TERMINAL_VIDEO_RETENTION: Duration = Duration::days(30);

/// Local clip artifacts of delivered videos are kept this long.
const LOCAL_CLIP_RETENTION: Duration = Duration::days(1);

#[derive(Debug, Default, PartialEq)]
pub struct GcStats {
    pub segments_deleted: usize,
    pub chunks_deleted: usize,
    pub files_deleted: usize,
    pub tasks_deleted: usize,
    pub videos_deleted: usize,
    pub clips_cleared: usize,
}

pub struct Janitor {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    stuck_after: Duration,
    cameras: Vec<CameraConfig>,
}

impl Janitor {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        queue_cfg: &QueueConfig,
        cameras: Vec<CameraConfig>,
    ) -> Self {
        Janitor {
            db,
            clocks,
            stuck_after: Duration::seconds(queue_cfg.stuck_task_secs),
            cameras,
        }
    }

    /// Returns tasks stranded in `processing` to `pending`.
    pub fn stuck_pass(&self) -> Result<usize, Error> {
        let now = self.clocks.now();
        let n = tasks::requeue_stuck(&self.db.lock(), now - self.stuck_after, now)?;
        if n > 0 {
            warn!(count = n, "requeued stuck tasks");
        }
        Ok(n)
    }

    /// One full retention pass: segment/chunk GC per camera (rows first,
    /// then files), task retention, terminal-video pruning, and local-clip
    /// cleanup for delivered videos.
    pub fn gc_pass(&self) -> Result<GcStats, Error> {
        let now = self.clocks.now();
        let mut stats = GcStats::default();
        let disk_paths: HashMap<String, PathBuf> = {
            let conn = self.db.lock();
            db::disks::list(&conn)?
                .into_iter()
                .map(|d| (d.id, d.path))
                .collect()
        };
        let abs = |disk_id: &str, rel: &str| disk_paths.get(disk_id).map(|p| p.join(rel));

        for cam in &self.cameras {
            let cutoff = now - Duration::days(cam.retention_days);
            let (old_segments, old_chunks) = {
                let conn = self.db.lock();
                let segs = segments::list_older_than(&conn, &cam.name, cutoff)?;
                let cks = chunks::list_older_than(&conn, &cam.name, cutoff)?;
                let seg_ids: Vec<i64> = segs.iter().map(|s| s.id).collect();
                let chunk_ids: Vec<i64> = cks.iter().map(|c| c.id).collect();
                stats.segments_deleted += segments::delete(&conn, &seg_ids)?;
                stats.chunks_deleted += chunks::delete(&conn, &chunk_ids)?;
                (segs, cks)
            };
            for path in old_segments
                .iter()
                .filter_map(|s| abs(&s.disk_id, &s.rel_path))
                .chain(old_chunks.iter().filter_map(|c| abs(&c.disk_id, &c.rel_path)))
            {
                match std::fs::remove_file(&path) {
                    Ok(()) => stats.files_deleted += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), err = %e, "unable to remove file"),
                }
            }
        }

        {
            let conn = self.db.lock();
            stats.tasks_deleted = tasks::delete_finished(
                &conn,
                now - COMPLETED_TASK_RETENTION,
                now - FAILED_TASK_RETENTION,
            )?;
            stats.videos_deleted =
                videos::delete_terminal_older_than(&conn, now - TERMINAL_VIDEO_RETENTION)?;
        }

        // Delivered clips: the object store has them, the disks are for
        // recordings.
        let uploaded = videos::list_ready_with_local(&self.db.lock(), now - LOCAL_CLIP_RETENTION)?;
        for v in uploaded {
            if let Some(local) = &v.local_path {
                let clip = PathBuf::from(local);
                if let Some(dir) = clip.parent() {
                    if let Err(e) = std::fs::remove_dir_all(dir) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %dir.display(), err = %e, "unable to remove clip dir");
                            continue;
                        }
                    }
                }
            }
            videos::clear_local(&self.db.lock(), v.id, now)?;
            stats.clips_cleared += 1;
        }

        if stats != GcStats::default() {
            info!(?stats, "retention gc pass");
        } else {
            debug!("retention gc pass: nothing to do");
        }
        Ok(stats)
    }

    pub async fn run(self, shutdown_rx: base::shutdown::Receiver) {
        let mut passes = 0u32;
        loop {
            if shutdown_rx.wait_timeout(PASS_INTERVAL).await.is_err() {
                return;
            }
            if let Err(e) = self.stuck_pass() {
                warn!(err = %e.chain(), "stuck-task pass failed");
            }
            passes += 1;
            if passes % GC_EVERY_PASSES == 0 {
                if let Err(e) = self.gc_pass() {
                    warn!(err = %e.chain(), "retention gc failed");
                }
            }
        }
    }
}
