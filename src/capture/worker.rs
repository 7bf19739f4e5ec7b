// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The per-camera capture worker: a supervised transcoder child process.
//!
//! State machine: `Idle → Probing → Capturing`, with `Backoff` between
//! failed attempts and a one-hour quiet period when the rolling restart
//! budget is blown. A disk-rotation event re-homes the worker: terminate
//! the child, switch base path, probe again, no backoff. Workers are meant
//! to be long-lived; they retry forever until their shutdown receiver fires.

use crate::capture::{self, probe, CameraDirs, RecordingState};
use crate::config::{CameraConfig, TranscoderConfig};
use crate::diskpool::ActiveDisk;
use crate::ffmpeg;
use base::clock::Clocks;
use base::time::{self, Duration};
use base::{bail, err, retry, Error, ErrorKind, ResultExt};
use db::Database;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Restarts tolerated per rolling hour before the worker goes quiet.
const RESTART_BUDGET_WINDOW: StdDuration = StdDuration::from_secs(3600);

/// Sleep after blowing the restart budget.
const BUDGET_EXHAUSTED_SLEEP: StdDuration = StdDuration::from_secs(3600);

/// Continuous capture needed before the backoff resets to its base.
const BACKOFF_RESET_AFTER: StdDuration = StdDuration::from_secs(3600);

/// Common state shared by all capture workers.
#[derive(Clone)]
pub struct Environment {
    pub db: Arc<Database>,
    pub clocks: Arc<dyn Clocks>,
    pub transcoder: TranscoderConfig,
    pub segment_secs: i64,
}

/// Why `run_once` returned without an error.
enum RunEnd {
    Shutdown,
    Rotated,
}

pub struct Worker {
    camera: CameraConfig,
    env: Environment,
    state: Arc<Mutex<RecordingState>>,
    active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
    shutdown_rx: base::shutdown::Receiver,
    budget: retry::RestartBudget,
}

impl Worker {
    pub fn new(
        camera: CameraConfig,
        env: Environment,
        state: Arc<Mutex<RecordingState>>,
        active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
        shutdown_rx: base::shutdown::Receiver,
    ) -> Self {
        let budget = retry::RestartBudget::new(
            RESTART_BUDGET_WINDOW,
            env.transcoder.restart_limit_per_hour,
        );
        Worker {
            camera,
            env,
            state,
            active_disk_rx,
            shutdown_rx,
            budget,
        }
    }

    pub async fn run(mut self) {
        let name = self.camera.name.clone();
        while self.shutdown_rx.check().is_ok() {
            match self.run_once().await {
                Ok(RunEnd::Shutdown) => break,
                Ok(RunEnd::Rotated) => {
                    info!(camera = %name, "re-homing after disk rotation");
                    continue;
                }
                Err(e) => {
                    let failures = {
                        let mut st = self.state.lock().unwrap();
                        st.recording = false;
                        st.healthy = false;
                        st.restart_count += 1;
                        st.consecutive_failures += 1;
                        st.last_restart = Some(self.env.clocks.now());
                        st.consecutive_failures
                    };
                    let within_budget = self.budget.record(self.env.clocks.monotonic());
                    let delay = if within_budget {
                        retry::CAPTURE.jittered(failures.saturating_sub(1))
                    } else {
                        warn!(camera = %name, "restart budget exhausted; sleeping an hour");
                        BUDGET_EXHAUSTED_SLEEP
                    };
                    warn!(
                        camera = %name,
                        err = %e.chain(),
                        failures,
                        "capture failed; restarting in {delay:?}"
                    );
                    self.state.lock().unwrap().current_backoff_secs = delay.as_secs();
                    if self.shutdown_rx.wait_timeout(delay).await.is_err() {
                        break;
                    }
                    self.state.lock().unwrap().current_backoff_secs = 0;
                }
            }
        }
        let mut st = self.state.lock().unwrap();
        st.recording = false;
        st.healthy = false;
        st.current_backoff_secs = 0;
        info!(camera = %name, "capture worker shut down");
    }

    /// The disk new recordings should land on right now.
    fn current_disk(&self) -> Result<ActiveDisk, Error> {
        self.active_disk_rx
            .borrow()
            .clone()
            .ok_or_else(|| err!(ResourceExhausted, msg("no eligible disk")))
    }

    /// One probe-and-capture attempt. `Ok` means a deliberate stop
    /// (shutdown or rotation); every failure path is an `Err` so the outer
    /// loop applies backoff.
    async fn run_once(&mut self) -> Result<RunEnd, Error> {
        let disk = self.current_disk()?;
        let dirs = CameraDirs::new(&disk.path, &self.camera.name);
        dirs.create().err_kind(ErrorKind::Internal)?;

        let url = self.camera.rtsp_url()?;
        let redacted = self.camera.redacted_rtsp_url()?;
        debug!(camera = %self.camera.name, url = %redacted, "probing");
        let stream_info = tokio::select! {
            _ = self.shutdown_rx.wait() => return Ok(RunEnd::Shutdown),
            r = probe::probe_rtsp(&self.env.transcoder, url.as_str()) => r?,
        };
        info!(
            camera = %self.camera.name,
            codec = ?stream_info.video_codec,
            audio = stream_info.has_audio,
            resolution = self.camera.resolution.as_deref(),
            fps = self.camera.frame_rate,
            disk = %disk.id,
            "starting transcoder"
        );

        let session_ts = time::format_local(self.env.clocks.now(), time::FILENAME_FMT);
        let log_path = dirs.logs.join(format!("transcoder_{session_ts}.log"));
        let log_file = std::fs::File::create(&log_path).err_kind(ErrorKind::Internal)?;
        let pattern = dirs
            .mp4
            .join(format!("{}_%Y%m%d_%H%M%S.mp4", self.camera.name));
        let args = ffmpeg::capture_args(url.as_str(), stream_info, self.env.segment_secs, &pattern);
        let mut child = Command::new(&self.env.transcoder.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                err!(
                    Internal,
                    msg(
                        "unable to spawn {}",
                        self.env.transcoder.ffmpeg_bin.display()
                    ),
                    source(e)
                )
            })?;

        let started_mono = self.env.clocks.monotonic();
        {
            let mut st = self.state.lock().unwrap();
            st.recording = true;
            st.healthy = true;
            st.current_backoff_secs = 0;
            st.last_healthy = Some(self.env.clocks.now());
        }

        let health_interval = StdDuration::from_secs(self.env.transcoder.health_interval_secs);
        let stall = Duration::seconds(self.env.transcoder.stall_timeout_secs);
        let mut disk_rx = self.active_disk_rx.clone();
        loop {
            tokio::select! {
                _ = self.shutdown_rx.wait() => {
                    capture::terminate_child(&mut child).await;
                    return Ok(RunEnd::Shutdown);
                }
                r = disk_rx.changed() => {
                    if r.is_err() {
                        capture::terminate_child(&mut child).await;
                        return Ok(RunEnd::Shutdown);
                    }
                    let new = disk_rx.borrow().clone();
                    if let Some(new) = new {
                        if new.id != disk.id {
                            capture::terminate_child(&mut child).await;
                            return Ok(RunEnd::Rotated);
                        }
                    }
                }
                _ = tokio::time::sleep(health_interval) => {
                    if let Some(status) = child.try_wait().err_kind(ErrorKind::Internal)? {
                        let tail = capture::log_tail(&log_path, 2048);
                        bail!(
                            Unavailable,
                            msg("transcoder exited with {status}: {}", tail.trim_end())
                        );
                    }
                    let now = self.env.clocks.now();
                    let capturing_for = self.env.clocks.monotonic() - started_mono;
                    let last_segment = self.state.lock().unwrap().last_segment;
                    let stalled = capturing_for >= stall.to_std()
                        && last_segment.map_or(true, |l| now - l > stall);
                    if stalled {
                        capture::terminate_child(&mut child).await;
                        bail!(
                            Unavailable,
                            msg("no segment progress in {stall}; restarting transcoder")
                        );
                    }
                    {
                        let mut st = self.state.lock().unwrap();
                        st.healthy = true;
                        st.last_healthy = Some(now);
                        st.total_uptime_secs += health_interval.as_secs() as i64;
                    }
                    if capturing_for >= BACKOFF_RESET_AFTER {
                        self.state.lock().unwrap().consecutive_failures = 0;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The backoff schedule the worker applies: 2 s, 4 s, 8 s … capped.
    #[test]
    fn backoff_schedule_matches_policy() {
        assert_eq!(retry::CAPTURE.delay(0), StdDuration::from_secs(2));
        assert_eq!(retry::CAPTURE.delay(1), StdDuration::from_secs(4));
        assert_eq!(retry::CAPTURE.delay(2), StdDuration::from_secs(8));
        assert_eq!(retry::CAPTURE.delay(30), StdDuration::from_secs(300));
    }

    #[test]
    fn restart_budget_window_matches_policy() {
        let mut budget = retry::RestartBudget::new(RESTART_BUDGET_WINDOW, 50);
        for i in 0..50u64 {
            assert!(budget.record(StdDuration::from_secs(i)), "restart {i}");
        }
        assert!(!budget.record(StdDuration::from_secs(51)));
    }
}
