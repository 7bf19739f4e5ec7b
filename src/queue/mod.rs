// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The at-least-once scheduler over the durable task store.
//!
//! Tasks survive process restarts in SQLite; execution is gated on the
//! connectivity probe so clip requests keep enqueuing while the uplink is
//! down and drain within one scheduler cycle of it returning. Upload and
//! notify run in separate bounded pools; the per-video ordering (notify
//! after upload) is producer-enforced: the upload handler enqueues the
//! notify task only after its own success.

pub mod notify;
pub mod upload;

use crate::config::QueueConfig;
use crate::ffmpeg;
use base::clock::Clocks;
use base::time::Duration;
use base::{err, retry, Error};
use db::tasks::{self, Task, TaskStatus, TaskType};
use db::Database;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const CONNECTIVITY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// A task-type executor. `run` is retried by the scheduler per the task's
/// attempt budget; `on_exhausted` fires once when the budget is gone.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, task: &Task) -> Result<(), Error>;
    async fn on_exhausted(&self, _task: &Task) {}
}

pub struct Scheduler {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    cfg: QueueConfig,
    online_rx: watch::Receiver<bool>,
    upload: Arc<dyn TaskHandler>,
    notify: Arc<dyn TaskHandler>,
}

impl Scheduler {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        cfg: QueueConfig,
        online_rx: watch::Receiver<bool>,
        upload: Arc<dyn TaskHandler>,
        notify: Arc<dyn TaskHandler>,
    ) -> Arc<Self> {
        Arc::new(Scheduler {
            db,
            clocks,
            cfg,
            online_rx,
            upload,
            notify,
        })
    }

    pub async fn run(self: Arc<Self>, shutdown_rx: base::shutdown::Receiver) {
        info!("task scheduler running");
        let poll = StdDuration::from_secs(self.cfg.poll_secs);
        loop {
            if shutdown_rx.wait_timeout(poll).await.is_err() {
                info!("task scheduler exiting");
                return;
            }
            if !*self.online_rx.borrow() {
                // Offline: pause execution; enqueues keep landing in the
                // store and drain when the uplink returns.
                continue;
            }
            self.pass().await;
        }
    }

    /// One claim-and-execute cycle over both task types.
    pub(crate) async fn pass(&self) {
        for (type_, pool) in [
            (TaskType::Upload, self.cfg.upload_workers),
            (TaskType::Notify, self.cfg.notify_workers),
        ] {
            let now = self.clocks.now();
            let claimed = match tasks::claim_ready(&self.db.lock(), type_, now, pool) {
                Ok(c) => c,
                Err(e) => {
                    error!(err = %e.chain(), "task claim failed");
                    continue;
                }
            };
            if claimed.is_empty() {
                continue;
            }
            futures::stream::iter(claimed)
                .for_each_concurrent(pool, |t| self.execute(t))
                .await;
        }
    }

    async fn execute(&self, task: Task) {
        let (handler, task_timeout) = match task.type_ {
            TaskType::Upload => (
                &self.upload,
                StdDuration::from_secs(self.cfg.upload_timeout_secs),
            ),
            TaskType::Notify => (
                &self.notify,
                StdDuration::from_secs(self.cfg.notify_timeout_secs),
            ),
        };
        let result = match tokio::time::timeout(task_timeout, handler.run(&task)).await {
            Ok(r) => r,
            Err(_) => Err(err!(
                DeadlineExceeded,
                msg("task did not finish within {task_timeout:?}")
            )),
        };
        let now = self.clocks.now();
        match result {
            Ok(()) => {
                if let Err(e) = tasks::complete(&self.db.lock(), task.id, now) {
                    error!(task = task.id, err = %e.chain(), "unable to mark task completed");
                }
            }
            Err(e) => {
                let msg = ffmpeg::tail(&e.chain().to_string(), 1024).to_owned();
                let delay = retry::TASK.jittered(task.attempts as u32);
                let next_retry = now + Duration::from_std(delay);
                let record_result = tasks::record_failure(&self.db.lock(), task.id, &msg, next_retry, now);
                match record_result {
                    Ok(TaskStatus::Failed) => {
                        warn!(
                            task = task.id,
                            type_ = task.type_.as_str(),
                            err = %e.chain(),
                            "task exhausted its attempts"
                        );
                        handler.on_exhausted(&task).await;
                    }
                    Ok(_) => warn!(
                        task = task.id,
                        type_ = task.type_.as_str(),
                        err = %e.chain(),
                        "task failed; retrying in {delay:?}"
                    ),
                    Err(se) => {
                        error!(task = task.id, err = %se.chain(), "unable to record task failure")
                    }
                }
            }
        }
    }
}

/// Periodic uplink probe feeding the scheduler's online/offline gate.
pub struct Connectivity {
    client: reqwest::Client,
    url: Option<String>,
    interval: StdDuration,
}

impl Connectivity {
    pub fn new(cfg: &QueueConfig) -> Self {
        Connectivity {
            client: reqwest::Client::new(),
            url: cfg.connectivity_url.clone(),
            interval: StdDuration::from_secs(cfg.connectivity_interval_secs),
        }
    }

    /// Probes until shutdown. Any HTTP response at all counts as online;
    /// only transport-level failure flips the gate.
    pub async fn run(self, tx: watch::Sender<bool>, shutdown_rx: base::shutdown::Receiver) {
        let Some(url) = self.url else {
            info!("no connectivity url configured; assuming online");
            return;
        };
        loop {
            let online = self
                .client
                .head(&url)
                .timeout(CONNECTIVITY_TIMEOUT)
                .send()
                .await
                .is_ok();
            let was = *tx.borrow();
            if was != online {
                if online {
                    info!("uplink is back; resuming task execution");
                } else {
                    warn!("uplink unreachable; pausing task execution");
                }
            }
            let _ = tx.send_replace(online);
            if shutdown_rx.wait_timeout(self.interval).await.is_err() {
                return;
            }
        }
    }
}
