// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The tiered disk pool: discovery, free-space accounting, active-disk
//! selection, and rotation.
//!
//! Rotation is published through a `tokio::sync::watch` channel. The
//! selection is persisted before the value is sent, and a late subscriber
//! simply reads the current value, which is exactly the recovery story the
//! rest of the system relies on: miss the event, re-read the active disk.

use crate::config::StorageConfig;
use base::clock::Clocks;
use base::time::Time;
use base::{err, Error, ErrorKind};
use db::disks::{self, Disk};
use db::Database;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Snapshot of the disk capture workers should write to.
#[derive(Clone, Debug, PartialEq)]
pub struct ActiveDisk {
    pub id: String,
    pub path: std::path::PathBuf,
}

impl From<&Disk> for ActiveDisk {
    fn from(d: &Disk) -> Self {
        ActiveDisk {
            id: d.id.clone(),
            path: d.path.clone(),
        }
    }
}

/// Picks the disk a fresh selection would choose: eligible (enough free
/// space), then lowest priority number, then earliest `created_at`.
pub fn select_eligible(candidates: &[Disk], min_free_bytes: i64) -> Option<&Disk> {
    candidates
        .iter()
        .filter(|d| d.available_bytes >= min_free_bytes)
        .min_by_key(|d| (d.priority, d.created_at))
}

pub struct DiskPool {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    min_free_bytes: i64,
    rescan_interval: std::time::Duration,
    active_tx: watch::Sender<Option<ActiveDisk>>,
}

impl std::fmt::Debug for DiskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskPool")
            .field("min_free_bytes", &self.min_free_bytes)
            .field("rescan_interval", &self.rescan_interval)
            .finish_non_exhaustive()
    }
}

impl DiskPool {
    /// Discovers candidate disks, selects an initial active disk if
    /// possible, and returns the pool plus the rotation channel.
    pub fn new(
        db: Arc<Database>,
        cfg: &StorageConfig,
        clocks: Arc<dyn Clocks>,
    ) -> Result<(Arc<Self>, watch::Receiver<Option<ActiveDisk>>), Error> {
        let now = clocks.now();
        {
            let conn = db.lock();
            for cand in &cfg.disks {
                let d = disks::upsert_candidate(
                    &conn,
                    &cand.path,
                    cand.class.priority(),
                    cfg.override_priorities,
                    now,
                )?;
                match stat_disk(&cand.path) {
                    Ok((total, avail)) => {
                        disks::update_space(&conn, &d.id, total, avail, now)?;
                    }
                    Err(e) => warn!(
                        path = %cand.path.display(),
                        err = %e.chain(),
                        "unable to stat disk; keeping it in the pool"
                    ),
                }
            }
        }
        let (active_tx, active_rx) = watch::channel(None);
        let pool = Arc::new(DiskPool {
            db,
            clocks,
            min_free_bytes: cfg.min_free_bytes(),
            rescan_interval: std::time::Duration::from_secs(cfg.rescan_interval_secs),
            active_tx,
        });
        pool.rescan()?;
        Ok((pool, active_rx))
    }

    /// The current active disk, re-read from the store.
    pub fn active(&self) -> Result<Option<Disk>, Error> {
        disks::active(&self.db.lock())
    }

    /// The active disk, required to be eligible; `ResourceExhausted` with
    /// "no eligible disk" otherwise. New capture starts and clip assembly go
    /// through this.
    pub fn require_eligible_active(&self) -> Result<Disk, Error> {
        match self.active()? {
            Some(d) if d.available_bytes >= self.min_free_bytes => Ok(d),
            _ => Err(err!(ResourceExhausted, msg("no eligible disk"))),
        }
    }

    pub fn snapshot(&self) -> Result<Vec<Disk>, Error> {
        disks::list(&self.db.lock())
    }

    /// Updates every known disk's space numbers and rotates the active disk
    /// if it has fallen below the free-space threshold.
    ///
    /// Per-disk stat failures are logged and do not remove the disk from
    /// the pool; a disk is only forgotten by an explicit admin call.
    pub fn rescan(&self) -> Result<(), Error> {
        let now = self.clocks.now();
        let all = {
            let conn = self.db.lock();
            let all = disks::list(&conn)?;
            for d in &all {
                match stat_disk(&d.path) {
                    Ok((total, avail)) => disks::update_space(&conn, &d.id, total, avail, now)?,
                    Err(e) => warn!(
                        disk = %d.id,
                        path = %d.path.display(),
                        err = %e.chain(),
                        "disk stat failed"
                    ),
                }
            }
            disks::list(&conn)?
        };

        let active = all.iter().find(|d| d.active);
        let active_ok = active.map_or(false, |d| d.available_bytes >= self.min_free_bytes);
        if active_ok {
            // Keep the watch value fresh for first-time subscribers.
            let snap = active.map(ActiveDisk::from);
            self.active_tx.send_if_modified(|cur| {
                if *cur != snap {
                    *cur = snap.clone();
                    true
                } else {
                    false
                }
            });
            return Ok(());
        }

        match select_eligible(&all, self.min_free_bytes) {
            Some(next) => {
                let old_id = active.map(|d| d.id.clone());
                if old_id.as_deref() == Some(next.id.as_str()) {
                    return Ok(());
                }
                // Persist first, then deliver: an observer that misses the
                // event recovers by re-reading the active disk.
                disks::set_active(&mut self.db.lock(), &next.id)?;
                info!(
                    old = old_id.as_deref().unwrap_or("none"),
                    new = %next.id,
                    path = %next.path.display(),
                    available_gb = format!("{:.1}", next.available_gb()),
                    "disk rotation"
                );
                let _ = self.active_tx.send(Some(ActiveDisk::from(next)));
                Ok(())
            }
            None => {
                // Existing workers keep writing to their current disk until
                // it too is exhausted; only new starts fail.
                if active.is_some() {
                    warn!("active disk below free-space threshold and no eligible replacement");
                    Ok(())
                } else {
                    Err(err!(ResourceExhausted, msg("no eligible disk")))
                }
            }
        }
    }

    /// Rescans on a timer until shutdown.
    pub async fn run(self: Arc<Self>, shutdown_rx: base::shutdown::Receiver) {
        loop {
            if shutdown_rx
                .wait_timeout(self.rescan_interval)
                .await
                .is_err()
            {
                break;
            }
            if let Err(e) = self.rescan() {
                error!(err = %e.chain(), "disk rescan failed");
            }
        }
    }
}

/// Total and available bytes for the filesystem holding `path`.
fn stat_disk(path: &Path) -> Result<(i64, i64), Error> {
    let vfs = nix::sys::statvfs::statvfs(path)
        .map_err(|e| err!(Unavailable, msg("statvfs {}", path.display()), source(e)))?;
    let frag = vfs.fragment_size() as i64;
    Ok((
        vfs.blocks() as i64 * frag,
        vfs.blocks_available() as i64 * frag,
    ))
}
