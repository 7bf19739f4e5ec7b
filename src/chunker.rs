// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The background chunk builder.
//!
//! Rolls runs of settled, adjacent segments into one pre-concatenated chunk
//! per pass (stream copy, no re-encode). Never on the request critical
//! path: a build failure is logged and the segments stay individually
//! addressable.

use crate::capture::CameraDirs;
use crate::config::{ChunkerConfig, TranscoderConfig};
use crate::ffmpeg;
use base::clock::Clocks;
use base::time::{self, Duration, Time};
use base::{Error, ErrorKind, ResultExt};
use db::segments::Segment;
use db::{chunks, segments, Database};
use std::io::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum wall-clock gap between adjacent segments within one chunk.
pub const MAX_GAP: Duration = Duration::seconds(1);

/// Finds the first run of at least `min` adjacent segments (gap ≤ 1 s, all
/// on one disk), capped at `max`. `segs` must be ordered by start.
pub fn find_run(segs: &[Segment], min: usize, max: usize) -> Option<&[Segment]> {
    let mut run_start = 0;
    for i in 0..=segs.len() {
        let broken = i == segs.len()
            || (i > run_start
                && (segs[i].start - segs[i - 1].end > MAX_GAP
                    || segs[i].disk_id != segs[i - 1].disk_id));
        if broken {
            let len = i - run_start;
            if len >= min {
                return Some(&segs[run_start..run_start + len.min(max)]);
            }
            run_start = i;
        }
    }
    None
}

pub struct Chunker {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    transcoder: TranscoderConfig,
    cfg: ChunkerConfig,
    segment_secs: i64,
    cameras: Vec<String>,
}

impl Chunker {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        transcoder: TranscoderConfig,
        cfg: ChunkerConfig,
        segment_secs: i64,
        cameras: Vec<String>,
    ) -> Self {
        Chunker {
            db,
            clocks,
            transcoder,
            cfg,
            segment_secs,
            cameras,
        }
    }

    fn chunk_duration(&self) -> Duration {
        Duration::seconds(self.cfg.segments_per_chunk as i64 * self.segment_secs)
    }

    /// Candidate segments for a camera's next chunk: settled (older than one
    /// chunk duration), past the chunk watermark, ordered by start.
    fn candidates(&self, camera: &str) -> Result<Vec<Segment>, Error> {
        let now = self.clocks.now();
        let settled_before = now - self.chunk_duration();
        let conn = self.db.lock();
        let watermark = chunks::max_end(&conn, camera)?.unwrap_or(Time(0));
        let segs = segments::list_intersecting(&conn, camera, watermark, settled_before)?;
        Ok(segs
            .into_iter()
            .filter(|s| s.start >= watermark && s.end <= settled_before)
            .collect())
    }

    /// Builds at most one chunk for `camera`. Returns the new chunk id, or
    /// `None` when there's no qualifying run yet.
    pub async fn build_once(&self, camera: &str) -> Result<Option<i64>, Error> {
        let segs = self.candidates(camera)?;
        let run = match find_run(
            &segs,
            self.cfg.min_segments_for_chunk,
            self.cfg.segments_per_chunk,
        ) {
            Some(r) => r,
            None => return Ok(None),
        };
        let disk = {
            let conn = self.db.lock();
            db::disks::get(&conn, &run[0].disk_id)?
                .ok_or_else(|| base::err!(NotFound, msg("disk {} is gone", run[0].disk_id)))?
        };

        let chunk_dir = disk.path.join("chunks").join(camera);
        std::fs::create_dir_all(&chunk_dir).err_kind(ErrorKind::Internal)?;
        let name = format!("{}.mp4", time::format_local(run[0].start, time::FILENAME_FMT));
        let out = chunk_dir.join(&name);

        // Concat list in the camera's tmp dir; stream-copy concatenation.
        let tmp_dir = CameraDirs::new(&disk.path, camera).tmp;
        std::fs::create_dir_all(&tmp_dir).err_kind(ErrorKind::Internal)?;
        let list_path = tmp_dir.join(format!("chunk_{}.txt", run[0].start.0));
        {
            let mut list = std::fs::File::create(&list_path).err_kind(ErrorKind::Internal)?;
            for s in run {
                let abs = disk.path.join(&s.rel_path);
                writeln!(list, "file '{}'", abs.display()).err_kind(ErrorKind::Internal)?;
            }
        }
        let args = ffmpeg::concat_args(&list_path, &out);
        let result = ffmpeg::run(
            &self.transcoder.ffmpeg_bin,
            &args,
            std::time::Duration::from_secs(300),
        )
        .await;
        let _ = std::fs::remove_file(&list_path);
        if let Err(e) = result {
            let _ = std::fs::remove_file(&out);
            return Err(e);
        }

        let ids: Vec<i64> = run.iter().map(|s| s.id).collect();
        let id = chunks::insert(
            &self.db.lock(),
            &chunks::ChunkToInsert {
                camera,
                disk_id: &disk.id,
                rel_path: &format!("chunks/{camera}/{name}"),
                start: run[0].start,
                end: run[run.len() - 1].end,
                segment_ids: &ids,
            },
        )?;
        info!(
            camera,
            chunk = id,
            segments = run.len(),
            start = %run[0].start,
            "chunk built"
        );
        Ok(Some(id))
    }

    pub async fn run(self, shutdown_rx: base::shutdown::Receiver) {
        if !self.cfg.enabled {
            info!("chunk builder disabled");
            return;
        }
        let interval = std::time::Duration::from_secs(self.cfg.interval_secs);
        loop {
            if shutdown_rx.wait_timeout(interval).await.is_err() {
                return;
            }
            for camera in &self.cameras {
                match self.build_once(camera).await {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!(%camera, "no chunkable run"),
                    Err(e) => warn!(%camera, err = %e.chain(), "chunk build failed"),
                }
                if shutdown_rx.check().is_err() {
                    return;
                }
            }
        }
    }
}
