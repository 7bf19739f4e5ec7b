// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The clip assembler: materializes a coverage plan into a watermarked clip
//! plus preview and thumbnail, and drives the video record's lifecycle.
//!
//! Every plan entry is materialized by stream copy; the one and only
//! re-encode is the combined watermark/scale pass. Temporary files live in
//! a per-session directory under the camera's tmp root and are removed on
//! both success and failure; a failed clip leaves only the `failed` video
//! row with the ffmpeg stderr tail.

use crate::config::{AssemblyConfig, TranscoderConfig, WatermarkConfig};
use crate::diskpool::ActiveDisk;
use crate::ffmpeg;
use base::clock::Clocks;
use base::time::{Duration, Time};
use base::{bail, err, Error, ErrorKind, ResultExt};
use db::coverage::{self, CoveragePlan, Source};
use db::videos::{self, VideoStatus};
use db::Database;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Tolerance when deciding whether one chunk extract covers the whole
/// request (the fast path).
const FAST_PATH_SLOP: Duration = Duration::seconds(30);

/// Bound on each ffmpeg pass.
const PASS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(600);

#[derive(Clone, Debug)]
pub struct ClipRequest {
    pub camera: String,
    pub booking_id: String,
    pub raw_booking: Option<String>,
    pub start: Time,
    pub end: Time,
    pub unique_id: String,
}

#[derive(Clone, Debug)]
pub struct AssembledClip {
    pub video_id: i64,
    pub unique_id: String,
    pub clip_path: PathBuf,
    pub preview_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub duration_secs: f64,
    pub size_bytes: i64,
}

/// True when the plan is one chunk extract covering the full request within
/// [`FAST_PATH_SLOP`], so a single cut suffices.
pub fn is_single_full_chunk(plan: &CoveragePlan, start: Time, end: Time) -> bool {
    if plan.entries.len() != 1 {
        return false;
    }
    let e = &plan.entries[0];
    matches!(e.source, Source::ChunkExtract { .. })
        && e.start - start <= FAST_PATH_SLOP
        && end - e.end <= FAST_PATH_SLOP
}

pub struct Assembler {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    transcoder: TranscoderConfig,
    assembly: AssemblyConfig,
    watermark: WatermarkConfig,
    active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
}

impl Assembler {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        transcoder: TranscoderConfig,
        assembly: AssemblyConfig,
        watermark: WatermarkConfig,
        active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
    ) -> Self {
        Assembler {
            db,
            clocks,
            transcoder,
            assembly,
            watermark,
            active_disk_rx,
        }
    }

    /// Assembles the clip for `req`, creating and advancing its video row.
    ///
    /// Re-running for a `ready` unique id is a no-op returning the existing
    /// record; a unique id currently in flight is `AlreadyExists`.
    pub async fn assemble(&self, req: &ClipRequest) -> Result<AssembledClip, Error> {
        if let Some(existing) = videos::get_by_unique_id(&self.db.lock(), &req.unique_id)? {
            return match existing.status {
                VideoStatus::Ready => {
                    info!(unique_id = %req.unique_id, "clip already assembled and delivered");
                    Ok(assembled_from_row(&existing)?)
                }
                VideoStatus::Processing | VideoStatus::Uploading => Err(err!(
                    AlreadyExists,
                    msg("clip {} is already in flight", req.unique_id)
                )),
                _ => Err(err!(
                    FailedPrecondition,
                    msg(
                        "clip {} previously ended as {}",
                        req.unique_id,
                        existing.status.as_str()
                    )
                )),
            };
        }

        let video_id = videos::insert_processing(
            &self.db.lock(),
            &videos::VideoToInsert {
                booking_id: &req.booking_id,
                camera: &req.camera,
                unique_id: &req.unique_id,
                start: req.start,
                end: req.end,
                raw_booking: req.raw_booking.as_deref(),
            },
            self.clocks.now(),
        )?;

        match self.assemble_inner(video_id, req).await {
            Ok(clip) => Ok(clip),
            Err(e) => {
                let reason = format!("{}", e.chain());
                if let Err(te) = videos::transition(
                    &self.db.lock(),
                    video_id,
                    VideoStatus::Failed,
                    Some(ffmpeg::tail(&reason, 1024)),
                    self.clocks.now(),
                ) {
                    warn!(video_id, err = %te.chain(), "unable to mark video failed");
                }
                Err(e)
            }
        }
    }

    async fn assemble_inner(&self, video_id: i64, req: &ClipRequest) -> Result<AssembledClip, Error> {
        let plan = coverage::discover(&self.db.lock(), &req.camera, req.start, req.end)?;
        if plan.is_empty() {
            bail!(NotFound, msg("no sources"));
        }
        if plan.coverage_missing {
            warn!(
                unique_id = %req.unique_id,
                covered = %plan.covered(),
                requested = %(req.end - req.start),
                "assembling with partial coverage"
            );
        }

        let disk = self
            .active_disk_rx
            .borrow()
            .clone()
            .ok_or_else(|| err!(ResourceExhausted, msg("no eligible disk")))?;
        let session = uuid::Uuid::new_v4().to_string();
        let tmp_dir = disk
            .path
            .join("recordings")
            .join(&req.camera)
            .join("tmp")
            .join(&session);
        std::fs::create_dir_all(&tmp_dir).err_kind(ErrorKind::Internal)?;
        let clip_dir = disk.path.join("clips").join(&req.unique_id);
        std::fs::create_dir_all(&clip_dir).err_kind(ErrorKind::Internal)?;

        // Materialization gets a bounded number of attempts; a transient
        // ffmpeg failure (e.g. a segment landing mid-cut) should not burn
        // the whole request.
        let mut attempt = 0u32;
        let clip = loop {
            let result = self
                .materialize(&plan, req, &disk, &tmp_dir, &clip_dir)
                .await;
            match result {
                Ok(c) => {
                    let _ = std::fs::remove_dir_all(&tmp_dir);
                    break c;
                }
                Err(e) => {
                    attempt += 1;
                    let _ = std::fs::remove_dir_all(&tmp_dir);
                    if attempt >= self.assembly.step_attempts {
                        let _ = std::fs::remove_dir_all(&clip_dir);
                        return Err(e);
                    }
                    let delay = base::retry::CAPTURE.jittered(attempt - 1);
                    warn!(
                        unique_id = %req.unique_id,
                        err = %e.chain(),
                        attempt,
                        "materialization failed; retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                    std::fs::create_dir_all(&tmp_dir).err_kind(ErrorKind::Internal)?;
                }
            }
        };

        videos::update_artifacts(
            &self.db.lock(),
            video_id,
            &clip.clip_path.to_string_lossy(),
            &disk.id,
            clip.duration_secs,
            clip.size_bytes,
            self.clocks.now(),
        )?;
        info!(
            unique_id = %req.unique_id,
            duration = clip.duration_secs,
            size = clip.size_bytes,
            "clip assembled"
        );
        Ok(AssembledClip {
            video_id,
            unique_id: req.unique_id.clone(),
            ..clip
        })
    }

    /// Cuts, concatenates, watermarks; produces the three artifacts.
    async fn materialize(
        &self,
        plan: &CoveragePlan,
        req: &ClipRequest,
        disk: &ActiveDisk,
        tmp_dir: &Path,
        clip_dir: &Path,
    ) -> Result<AssembledClip, Error> {
        let disk_paths = self.disk_paths()?;
        let abs = |disk_id: &str, rel: &str| -> Result<PathBuf, Error> {
            disk_paths
                .iter()
                .find(|(id, _)| id == disk_id)
                .map(|(_, p)| p.join(rel))
                .ok_or_else(|| err!(NotFound, msg("disk {disk_id} is gone")))
        };

        let merged = tmp_dir.join("merged.mp4");
        if is_single_full_chunk(plan, req.start, req.end) {
            // Fast path: one stream-copy cut from a single chunk.
            let Source::ChunkExtract { chunk, skip, take } = &plan.entries[0].source else {
                unreachable!("is_single_full_chunk checked the variant");
            };
            let input = abs(&chunk.disk_id, &chunk.rel_path)?;
            debug!(unique_id = %req.unique_id, chunk = chunk.id, "fast path cut");
            self.ffmpeg(&ffmpeg::cut_args(&input, *skip, *take, &merged)).await?;
        } else {
            let mut list = String::new();
            for (i, entry) in plan.entries.iter().enumerate() {
                let part = match &entry.source {
                    Source::ChunkExtract { chunk, skip, take } => {
                        let input = abs(&chunk.disk_id, &chunk.rel_path)?;
                        let part = tmp_dir.join(format!("part{i:03}.mp4"));
                        self.ffmpeg(&ffmpeg::cut_args(&input, *skip, *take, &part)).await?;
                        part
                    }
                    Source::SegmentRef { segment } => abs(&segment.disk_id, &segment.rel_path)?,
                    Source::SegmentExtract { segment, skip, take } => {
                        let input = abs(&segment.disk_id, &segment.rel_path)?;
                        let part = tmp_dir.join(format!("part{i:03}.mp4"));
                        self.ffmpeg(&ffmpeg::cut_args(&input, *skip, *take, &part)).await?;
                        part
                    }
                };
                list.push_str(&format!("file '{}'\n", part.display()));
            }
            let list_path = tmp_dir.join("concat.txt");
            let mut f = std::fs::File::create(&list_path).err_kind(ErrorKind::Internal)?;
            f.write_all(list.as_bytes()).err_kind(ErrorKind::Internal)?;
            drop(f);
            self.ffmpeg(&ffmpeg::concat_args(&list_path, &merged)).await?;
        }

        // The single re-encode: watermark + scale.
        let height = ffmpeg::ladder_height(self.assembly.output_height);
        let wm_png = self.watermark_png(&disk.path, height);
        let clip_path = clip_dir.join(format!("{}.ts", req.unique_id));
        self.ffmpeg(&ffmpeg::watermark_scale_args(
            &merged,
            wm_png.as_deref(),
            &self.watermark,
            height,
            self.transcoder.hw_encoder.as_deref(),
            &clip_path,
        ))
        .await?;

        let duration_secs = ffmpeg::probe_duration(&self.transcoder, &clip_path).await?;
        if duration_secs <= 0.0 {
            bail!(Internal, msg("assembled clip is empty"));
        }

        let thumbnail_path = clip_dir.join(format!("{}.png", req.unique_id));
        self.ffmpeg(&ffmpeg::thumbnail_args(
            &clip_path,
            duration_secs / 2.0,
            &thumbnail_path,
        ))
        .await?;

        let preview_height = ffmpeg::ladder_height(self.assembly.preview_height);
        let preview_path = clip_dir.join(format!("{}_preview.mp4", req.unique_id));
        self.ffmpeg(&ffmpeg::preview_args(&clip_path, preview_height, &preview_path))
            .await?;

        let size_bytes = std::fs::metadata(&clip_path)
            .err_kind(ErrorKind::Internal)?
            .len() as i64;
        Ok(AssembledClip {
            video_id: 0, // filled by the caller
            unique_id: req.unique_id.clone(),
            clip_path,
            preview_path,
            thumbnail_path,
            duration_secs,
            size_bytes,
        })
    }

    async fn ffmpeg(&self, args: &[String]) -> Result<(), Error> {
        ffmpeg::run(&self.transcoder.ffmpeg_bin, args, PASS_TIMEOUT)
            .await
            .map(|_| ())
    }

    fn disk_paths(&self) -> Result<Vec<(String, PathBuf)>, Error> {
        Ok(db::disks::list(&self.db.lock())?
            .into_iter()
            .map(|d| (d.id, d.path))
            .collect())
    }

    /// The ladder watermark PNG on the given disk, if watermarking is
    /// configured and the file exists.
    fn watermark_png(&self, disk_path: &Path, height: u32) -> Option<PathBuf> {
        if self.watermark.venue.is_empty() {
            return None;
        }
        let path = disk_path
            .join("watermark")
            .join(&self.watermark.venue)
            .join(format!("watermark_{height}.png"));
        if path.exists() {
            Some(path)
        } else {
            warn!(path = %path.display(), "watermark file missing; skipping overlay");
            None
        }
    }
}

fn assembled_from_row(v: &db::Video) -> Result<AssembledClip, Error> {
    let clip_path = PathBuf::from(
        v.local_path
            .clone()
            .ok_or_else(|| err!(FailedPrecondition, msg("ready video has no local path")))?,
    );
    let dir = clip_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    Ok(AssembledClip {
        video_id: v.id,
        unique_id: v.unique_id.clone(),
        preview_path: dir.join(format!("{}_preview.mp4", v.unique_id)),
        thumbnail_path: dir.join(format!("{}.png", v.unique_id)),
        clip_path,
        duration_secs: v.duration_secs.unwrap_or(0.0),
        size_bytes: v.size_bytes.unwrap_or(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::coverage::PlanEntry;
    use db::{Chunk, Segment};

    fn chunk_entry(start: i64, end: i64, skip: i64, take: i64) -> PlanEntry {
        PlanEntry {
            source: Source::ChunkExtract {
                chunk: Chunk {
                    id: 1,
                    camera: "cam1".to_owned(),
                    disk_id: "a".to_owned(),
                    rel_path: "chunks/cam1/c.mp4".to_owned(),
                    start: Time(start - skip),
                    end: Time(end),
                    segment_ids: vec![],
                },
                skip: Duration::seconds(skip),
                take: Duration::seconds(take),
            },
            start: Time(start),
            end: Time(end),
        }
    }

    fn seg_entry(start: i64, end: i64) -> PlanEntry {
        PlanEntry {
            source: Source::SegmentRef {
                segment: Segment {
                    id: 1,
                    camera: "cam1".to_owned(),
                    disk_id: "a".to_owned(),
                    rel_path: "recordings/cam1/mp4/s.mp4".to_owned(),
                    start: Time(start),
                    end: Time(end),
                    size_bytes: 0,
                },
            },
            start: Time(start),
            end: Time(end),
        }
    }

    #[test]
    fn fast_path_detection() {
        let full = CoveragePlan {
            entries: vec![chunk_entry(0, 60, 10, 60)],
            coverage_missing: false,
        };
        assert!(is_single_full_chunk(&full, Time(0), Time(60)));

        // Within the 30 s slop on either side still qualifies.
        let near = CoveragePlan {
            entries: vec![chunk_entry(20, 60, 0, 40)],
            coverage_missing: false,
        };
        assert!(is_single_full_chunk(&near, Time(0), Time(80)));

        // A segment entry never takes the fast path.
        let seg = CoveragePlan {
            entries: vec![seg_entry(0, 60)],
            coverage_missing: false,
        };
        assert!(!is_single_full_chunk(&seg, Time(0), Time(60)));

        // Two entries never take the fast path.
        let two = CoveragePlan {
            entries: vec![chunk_entry(0, 30, 0, 30), chunk_entry(30, 60, 0, 30)],
            coverage_missing: false,
        };
        assert!(!is_single_full_chunk(&two, Time(0), Time(60)));

        // Way-short coverage does not.
        let short = CoveragePlan {
            entries: vec![chunk_entry(40, 60, 0, 20)],
            coverage_missing: true,
        };
        assert!(!is_single_full_chunk(&short, Time(0), Time(100)));
    }
}
