// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The upstream notify task: tells the venue-management API a clip is
//! ready, with an HMAC-SHA512-signed form.
//!
//! [`UpstreamNotifier`] is the capability seam; the concrete venue-API
//! client is injected at wiring time so the assembler/queue never hold a
//! direct reference to it.

use crate::queue::TaskHandler;
use base::clock::Clocks;
use base::{bail, err, Error, ErrorKind, ResultExt};
use db::videos::{self, VideoStatus};
use db::{Database, Task};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NotifyPayload {
    pub video_id: i64,
}

/// Everything the upstream callback needs about one clip.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipNotification {
    pub booking_id: String,
    pub unique_id: String,
    pub preview_url: String,
    pub thumbnail_url: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
}

/// Upstream-notify capability; success means the venue API acknowledged the
/// clip.
#[async_trait::async_trait]
pub trait UpstreamNotifier: Send + Sync {
    async fn notify(&self, n: &ClipNotification) -> Result<(), Error>;
}

/// The alphabetised `k=v&k=v` string the signature covers.
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by_key(|(k, _)| *k);
    let mut out = String::new();
    for (i, (k, v)) in sorted.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
    }
    out
}

/// Hex-encoded HMAC-SHA512 of the canonical query string.
pub fn sign(canonical: &str, secret: &str) -> String {
    let key = ring::hmac::Key::new(ring::hmac::HMAC_SHA512, secret.as_bytes());
    let tag = ring::hmac::sign(&key, canonical.as_bytes());
    data_encoding::HEXLOWER.encode(tag.as_ref())
}

#[derive(Debug, Deserialize)]
struct NotifyResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
}

/// The concrete venue-management API client.
pub struct VenueApiNotifier {
    client: reqwest::Client,
    base_url: String,
    venue_code: String,
    token: String,
    secret: String,
}

impl VenueApiNotifier {
    pub fn new(cfg: &crate::config::UpstreamConfig) -> Arc<Self> {
        Arc::new(VenueApiNotifier {
            client: reqwest::Client::new(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            venue_code: cfg.venue_code.clone(),
            token: cfg.token.clone(),
            secret: cfg.secret.clone(),
        })
    }

    fn signed_form(&self, n: &ClipNotification) -> Vec<(&'static str, String)> {
        let mut params: Vec<(&'static str, String)> = vec![
            ("booking_id", n.booking_id.clone()),
            ("unique_id", n.unique_id.clone()),
            ("preview_url", n.preview_url.clone()),
            ("thumbnail_url", n.thumbnail_url.clone()),
            ("start_timestamp", n.start_timestamp.to_string()),
            ("end_timestamp", n.end_timestamp.to_string()),
            ("venue_code", self.venue_code.clone()),
            ("token", self.token.clone()),
        ];
        let signature = sign(&canonical_query(&params), &self.secret);
        params.push(("signature", signature));
        params
    }
}

#[async_trait::async_trait]
impl UpstreamNotifier for VenueApiNotifier {
    async fn notify(&self, n: &ClipNotification) -> Result<(), Error> {
        let form = self.signed_form(n);
        let url = format!("{}/api/video/notify", self.base_url);
        let resp = self
            .client
            .post(&url)
            .form(&form)
            .send()
            .await
            .map_err(|e| err!(Unavailable, msg("notify POST failed"), source(e)))?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            bail!(Unavailable, msg("notify returned {status}"));
        }
        let body: NotifyResponse = resp
            .json()
            .await
            .map_err(|e| err!(Unavailable, msg("unparseable notify response"), source(e)))?;
        if body.error {
            bail!(
                Unavailable,
                msg(
                    "venue api rejected the notify: {}",
                    body.message.as_deref().unwrap_or("no message")
                )
            );
        }
        Ok(())
    }
}

pub struct NotifyHandler {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    notifier: Arc<dyn UpstreamNotifier>,
}

impl NotifyHandler {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        notifier: Arc<dyn UpstreamNotifier>,
    ) -> Arc<Self> {
        Arc::new(NotifyHandler {
            db,
            clocks,
            notifier,
        })
    }
}

#[async_trait::async_trait]
impl TaskHandler for NotifyHandler {
    async fn run(&self, task: &Task) -> Result<(), Error> {
        let p: NotifyPayload =
            serde_json::from_value(task.payload.clone()).err_kind(ErrorKind::InvalidArgument)?;
        let video = {
            let conn = self.db.lock();
            videos::get(&conn, p.video_id)?
                .ok_or_else(|| err!(NotFound, msg("no video {}", p.video_id)))?
        };
        if video.status == VideoStatus::Ready {
            // Replayed task (at-least-once); the upstream already knows.
            return Ok(());
        }
        let n = ClipNotification {
            booking_id: video.booking_id.clone(),
            unique_id: video.unique_id.clone(),
            preview_url: video
                .preview_url
                .clone()
                .ok_or_else(|| err!(FailedPrecondition, msg("video has no preview url")))?,
            thumbnail_url: video
                .thumbnail_url
                .clone()
                .ok_or_else(|| err!(FailedPrecondition, msg("video has no thumbnail url")))?,
            start_timestamp: video.start.0,
            end_timestamp: video.end.0,
        };
        self.notifier.notify(&n).await?;
        videos::transition(
            &self.db.lock(),
            p.video_id,
            VideoStatus::Ready,
            None,
            self.clocks.now(),
        )?;
        info!(unique_id = %video.unique_id, "upstream notified; clip ready");
        Ok(())
    }

    async fn on_exhausted(&self, task: &Task) {
        let Ok(p) = serde_json::from_value::<NotifyPayload>(task.payload.clone()) else {
            return;
        };
        // Artifacts stay in the object store; only the record goes failed.
        let r = videos::transition(
            &self.db.lock(),
            p.video_id,
            VideoStatus::Failed,
            task.last_error.as_deref().or(Some("notify failed")),
            self.clocks.now(),
        );
        if let Err(e) = r {
            warn!(video = p.video_id, err = %e.chain(), "unable to mark video failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base::clock::SimulatedClocks;
    use base::time::Time;
    use db::tasks::{self, TaskType};
    use db::testutil;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn canonical_query_is_alphabetised() {
        let params = vec![
            ("venue_code", "VEN01".to_owned()),
            ("booking_id", "BK/0001".to_owned()),
            ("token", "tok".to_owned()),
        ];
        assert_eq!(
            canonical_query(&params),
            "booking_id=BK/0001&token=tok&venue_code=VEN01"
        );
    }

    #[test]
    fn signature_shape_and_determinism() {
        let sig = sign("a=1&b=2", "secret");
        assert_eq!(sig.len(), 128); // sha512 → 64 bytes → 128 hex chars
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, sign("a=1&b=2", "secret"));
        assert_ne!(sig, sign("a=1&b=3", "secret"));
        assert_ne!(sig, sign("a=1&b=2", "other"));
    }

    struct CountingNotifier {
        calls: AtomicUsize,
        last: std::sync::Mutex<Option<ClipNotification>>,
    }

    #[async_trait::async_trait]
    impl UpstreamNotifier for CountingNotifier {
        async fn notify(&self, n: &ClipNotification) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(n.clone());
            Ok(())
        }
    }

    fn video_with_urls(conn: &rusqlite::Connection) -> i64 {
        let id = videos::insert_processing(
            conn,
            &videos::VideoToInsert {
                booking_id: "BK/0001",
                camera: "cam1",
                unique_id: "uid1",
                start: Time(1000),
                end: Time(1060),
                raw_booking: None,
            },
            Time(2000),
        )
        .unwrap();
        videos::transition(conn, id, VideoStatus::Uploading, None, Time(2001)).unwrap();
        videos::update_urls(conn, id, "https://c/m.ts", "https://c/p.mp4", "https://c/t.png", Time(2002))
            .unwrap();
        id
    }

    #[tokio::test]
    async fn notify_marks_ready_and_is_idempotent() {
        let db = Arc::new(db::Database::new(testutil::conn()).unwrap());
        let video_id = video_with_urls(&db.lock());
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
        });
        let handler = NotifyHandler::new(
            db.clone(),
            Arc::new(SimulatedClocks::new(Time(3000))),
            notifier.clone(),
        );
        let payload = serde_json::to_value(NotifyPayload { video_id }).unwrap();
        let task_id = tasks::enqueue(&db.lock(), TaskType::Notify, &payload, 3, Time(3000)).unwrap();
        let task = tasks::get(&db.lock(), task_id).unwrap().unwrap();

        handler.run(&task).await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        let v = videos::get(&db.lock(), video_id).unwrap().unwrap();
        assert_eq!(v.status, VideoStatus::Ready);
        let n = notifier.last.lock().unwrap().clone().unwrap();
        assert_eq!(n.booking_id, "BK/0001");
        assert_eq!(n.start_timestamp, 1000);
        assert_eq!(n.end_timestamp, 1060);

        // Replay (at-least-once): no second upstream call, still Ok.
        handler.run(&task).await.unwrap();
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_without_urls_is_a_precondition_failure() {
        let db = Arc::new(db::Database::new(testutil::conn()).unwrap());
        let video_id = videos::insert_processing(
            &db.lock(),
            &videos::VideoToInsert {
                booking_id: "BK/0002",
                camera: "cam1",
                unique_id: "uid2",
                start: Time(1000),
                end: Time(1060),
                raw_booking: None,
            },
            Time(2000),
        )
        .unwrap();
        let notifier = Arc::new(CountingNotifier {
            calls: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
        });
        let handler =
            NotifyHandler::new(db.clone(), Arc::new(SimulatedClocks::new(Time(3000))), notifier);
        let payload = serde_json::to_value(NotifyPayload { video_id }).unwrap();
        let task_id = tasks::enqueue(&db.lock(), TaskType::Notify, &payload, 3, Time(3000)).unwrap();
        let task = tasks::get(&db.lock(), task_id).unwrap().unwrap();
        let e = handler.run(&task).await.unwrap_err();
        assert_eq!(e.kind(), ErrorKind::FailedPrecondition);
    }
}
