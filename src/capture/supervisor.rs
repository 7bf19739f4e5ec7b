// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Lifecycle manager for the set of capture workers.
//!
//! One worker plus one segment-picker task per enabled camera, each pair
//! behind its own shutdown channel so cameras stop independently. Workers
//! re-home themselves on disk rotation via the watch channel they hold; the
//! supervisor's own jobs are start/stop/status and bounded graceful
//! shutdown.

use crate::capture::picker::Picker;
use crate::capture::worker::{Environment, Worker};
use crate::capture::RecordingState;
use crate::config::CameraConfig;
use crate::diskpool::ActiveDisk;
use base::{bail, err, shutdown, Error};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Bound on waiting for one camera's tasks at shutdown.
const JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

struct WorkerHandle {
    shutdown_tx: shutdown::Sender,
    joins: Vec<JoinHandle<()>>,
    state: Arc<Mutex<RecordingState>>,
}

pub struct Supervisor {
    env: Environment,
    cameras: Vec<CameraConfig>,
    active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    restored: Mutex<HashMap<String, RecordingState>>,
}

impl Supervisor {
    pub fn new(
        env: Environment,
        cameras: Vec<CameraConfig>,
        active_disk_rx: watch::Receiver<Option<ActiveDisk>>,
        restored: HashMap<String, RecordingState>,
    ) -> Arc<Self> {
        Arc::new(Supervisor {
            env,
            cameras,
            active_disk_rx,
            workers: Mutex::new(HashMap::new()),
            restored: Mutex::new(restored),
        })
    }

    /// Launches one worker per enabled camera. Individual failures are
    /// logged, not fatal: one misconfigured camera must not stop the rest
    /// of the venue from recording.
    pub fn start_all(&self) -> usize {
        let names: Vec<String> = self
            .cameras
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.name.clone())
            .collect();
        let mut started = 0;
        for name in names {
            match self.start_one(&name) {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(camera = %name, err = %e.chain(), "unable to start capture"),
            }
        }
        started
    }

    /// Starts a camera's worker pair. Idempotent: `Ok(false)` when already
    /// running.
    pub fn start_one(&self, camera: &str) -> Result<bool, Error> {
        let cfg = match self.cameras.iter().find(|c| c.name == camera) {
            Some(c) => c.clone(),
            None => bail!(NotFound, msg("no camera named {camera:?}")),
        };
        if !cfg.enabled {
            bail!(FailedPrecondition, msg("camera {camera:?} is disabled"));
        }
        let mut workers = self.workers.lock().unwrap();
        if workers.contains_key(camera) {
            return Ok(false);
        }
        // New captures need somewhere to write; existing workers are
        // allowed to ride out a no-eligible-disk spell, new ones are not.
        if self.active_disk_rx.borrow().is_none() {
            return Err(err!(ResourceExhausted, msg("no eligible disk")));
        }

        // Carry cumulative counters across restarts; transient flags reset.
        let mut state = self
            .restored
            .lock()
            .unwrap()
            .remove(camera)
            .unwrap_or_default();
        state.recording = false;
        state.healthy = false;
        state.current_backoff_secs = 0;
        let state = Arc::new(Mutex::new(state));

        let (shutdown_tx, shutdown_rx) = shutdown::channel();
        let worker = Worker::new(
            cfg.clone(),
            self.env.clone(),
            state.clone(),
            self.active_disk_rx.clone(),
            shutdown_rx.clone(),
        );
        let picker = Picker::new(
            cfg.name.clone(),
            self.env.segment_secs,
            self.env.db.clone(),
            self.env.clocks.clone(),
            state.clone(),
        );
        let joins = vec![
            tokio::spawn(worker.run()),
            tokio::spawn(picker.run(shutdown_rx)),
        ];
        info!(camera, "capture started");
        workers.insert(
            camera.to_owned(),
            WorkerHandle {
                shutdown_tx,
                joins,
                state,
            },
        );
        Ok(true)
    }

    /// Stops a camera's worker pair, waiting boundedly. Idempotent:
    /// `false` when it wasn't running.
    pub async fn stop_one(&self, camera: &str) -> bool {
        let handle = self.workers.lock().unwrap().remove(camera);
        let Some(handle) = handle else {
            return false;
        };
        // Preserve counters in case the camera is started again.
        self.restored.lock().unwrap().insert(
            camera.to_owned(),
            handle.state.lock().unwrap().clone(),
        );
        drop(handle.shutdown_tx);
        for j in handle.joins {
            if tokio::time::timeout(JOIN_TIMEOUT, j).await.is_err() {
                warn!(camera, "worker did not stop in time");
            }
        }
        info!(camera, "capture stopped");
        true
    }

    /// Per-worker status snapshots, sorted by camera name.
    pub fn status(&self) -> Vec<(String, RecordingState)> {
        let workers = self.workers.lock().unwrap();
        let mut out: Vec<(String, RecordingState)> = workers
            .iter()
            .map(|(name, h)| (name.clone(), h.state.lock().unwrap().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Everything for the `recording_state.json` snapshot: live workers
    /// plus states remembered for stopped ones.
    pub fn states(&self) -> HashMap<String, RecordingState> {
        let mut out: HashMap<String, RecordingState> = self.restored.lock().unwrap().clone();
        for (name, state) in self.status() {
            out.insert(name, state);
        }
        out
    }

    /// Graceful shutdown of every worker, bounded per camera.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.workers.lock().unwrap().keys().cloned().collect();
        for name in names {
            self.stop_one(&name).await;
        }
    }
}
