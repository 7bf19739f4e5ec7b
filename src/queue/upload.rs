// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The upload task: carries a clip's three artifacts to the object store,
//! records the returned URLs, then enqueues the upstream notify.
//!
//! The store itself is behind the [`BlobStore`] capability; the bundled
//! implementation is a plain authenticated HTTP PUT gateway. Handlers are
//! idempotent on the key: re-running an upload overwrites the same keys and
//! re-enqueues a notify, which is itself a no-op once the video is ready.

use crate::assemble::AssembledClip;
use crate::config::ObjectStoreConfig;
use crate::queue::notify::NotifyPayload;
use crate::queue::TaskHandler;
use base::clock::Clocks;
use base::{bail, err, Error, ErrorKind, ResultExt};
use db::tasks::{self, Task, TaskType};
use db::videos::{self, VideoStatus};
use db::Database;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UploadPayload {
    pub video_id: i64,
    pub unique_id: String,
    pub clip_path: String,
    pub preview_path: String,
    pub thumbnail_path: String,
}

/// Object-store keys for one clip's artifacts.
pub fn artifact_keys(unique_id: &str) -> (String, String, String) {
    (
        format!("mp4/{unique_id}.ts"),
        format!("preview/{unique_id}.mp4"),
        format!("thumbnail/{unique_id}.png"),
    )
}

fn content_type(key: &str) -> &'static str {
    match key.rsplit_once('.').map(|(_, ext)| ext) {
        Some("ts") => "video/mp2t",
        Some("mp4") => "video/mp4",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Blob-put capability: `put(key, local_path) -> public url`.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, local_path: &Path) -> Result<String, Error>;
}

/// Authenticated HTTP PUT against an object-store gateway.
pub struct HttpBlobStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    access_token: String,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(cfg: &ObjectStoreConfig) -> Self {
        HttpBlobStore {
            client: reqwest::Client::new(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_owned(),
            bucket: cfg.bucket.clone(),
            access_token: cfg.access_token.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait::async_trait]
impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, local_path: &Path) -> Result<String, Error> {
        let body = tokio::fs::read(local_path).await.map_err(|e| {
            err!(
                FailedPrecondition,
                msg("unable to read {}", local_path.display()),
                source(e)
            )
        })?;
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type(key))
            .body(body)
            .send()
            .await
            .map_err(|e| err!(Unavailable, msg("put {key} failed"), source(e)))?;
        if !resp.status().is_success() {
            bail!(
                Unavailable,
                msg("put {key} returned {}", resp.status())
            );
        }
        Ok(format!("{}/{key}", self.base_url))
    }
}

/// Enqueues the upload for an assembled clip; the caller then moves the
/// video row to `uploading`.
pub fn enqueue_upload(
    conn: &rusqlite::Connection,
    clip: &AssembledClip,
    max_attempts: i32,
    now: base::time::Time,
) -> Result<i64, Error> {
    let payload = serde_json::to_value(UploadPayload {
        video_id: clip.video_id,
        unique_id: clip.unique_id.clone(),
        clip_path: clip.clip_path.to_string_lossy().into_owned(),
        preview_path: clip.preview_path.to_string_lossy().into_owned(),
        thumbnail_path: clip.thumbnail_path.to_string_lossy().into_owned(),
    })
    .err_kind(ErrorKind::Internal)?;
    tasks::enqueue(conn, TaskType::Upload, &payload, max_attempts, now)
}

pub struct UploadHandler {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    store: Arc<dyn BlobStore>,
    notify_max_attempts: i32,
}

impl UploadHandler {
    pub fn new(
        db: Arc<Database>,
        clocks: Arc<dyn Clocks>,
        store: Arc<dyn BlobStore>,
        notify_max_attempts: i32,
    ) -> Arc<Self> {
        Arc::new(UploadHandler {
            db,
            clocks,
            store,
            notify_max_attempts,
        })
    }
}

#[async_trait::async_trait]
impl TaskHandler for UploadHandler {
    async fn run(&self, task: &Task) -> Result<(), Error> {
        let p: UploadPayload =
            serde_json::from_value(task.payload.clone()).err_kind(ErrorKind::InvalidArgument)?;
        let (mp4_key, preview_key, thumbnail_key) = artifact_keys(&p.unique_id);
        let mp4_url = self.store.put(&mp4_key, Path::new(&p.clip_path)).await?;
        let preview_url = self
            .store
            .put(&preview_key, Path::new(&p.preview_path))
            .await?;
        let thumbnail_url = self
            .store
            .put(&thumbnail_key, Path::new(&p.thumbnail_path))
            .await?;

        let now = self.clocks.now();
        let conn = self.db.lock();
        videos::update_urls(&conn, p.video_id, &mp4_url, &preview_url, &thumbnail_url, now)?;
        // Producer-enforced ordering: the notify only exists once the
        // upload has succeeded.
        let notify_payload = serde_json::to_value(NotifyPayload {
            video_id: p.video_id,
        })
        .err_kind(ErrorKind::Internal)?;
        tasks::enqueue(
            &conn,
            TaskType::Notify,
            &notify_payload,
            self.notify_max_attempts,
            now,
        )?;
        info!(unique_id = %p.unique_id, "clip uploaded; notify enqueued");
        Ok(())
    }

    async fn on_exhausted(&self, task: &Task) {
        let Ok(p) = serde_json::from_value::<UploadPayload>(task.payload.clone()) else {
            return;
        };
        let r = videos::transition(
            &self.db.lock(),
            p.video_id,
            VideoStatus::Failed,
            task.last_error.as_deref().or(Some("upload failed")),
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
    use db::testutil;
    use std::sync::Mutex;

    #[test]
    fn keys_and_content_types() {
        let (m, p, t) = artifact_keys("BK_0001_cam1_20240115_120000");
        assert_eq!(m, "mp4/BK_0001_cam1_20240115_120000.ts");
        assert_eq!(p, "preview/BK_0001_cam1_20240115_120000.mp4");
        assert_eq!(t, "thumbnail/BK_0001_cam1_20240115_120000.png");
        assert_eq!(content_type(&m), "video/mp2t");
        assert_eq!(content_type(&p), "video/mp4");
        assert_eq!(content_type(&t), "image/png");
        assert_eq!(content_type("weird"), "application/octet-stream");
    }

    struct FakeStore {
        puts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl BlobStore for FakeStore {
        async fn put(&self, key: &str, _local_path: &Path) -> Result<String, Error> {
            self.puts.lock().unwrap().push(key.to_owned());
            Ok(format!("https://clips.example.net/{key}"))
        }
    }

    fn uploading_video(conn: &rusqlite::Connection) -> i64 {
        let id = videos::insert_processing(
            conn,
            &videos::VideoToInsert {
                booking_id: "BK/0001",
                camera: "cam1",
                unique_id: "BK_0001_cam1_20240115_120000",
                start: Time(1000),
                end: Time(1060),
                raw_booking: None,
            },
            Time(2000),
        )
        .unwrap();
        videos::transition(conn, id, VideoStatus::Uploading, None, Time(2001)).unwrap();
        id
    }

    #[tokio::test]
    async fn upload_records_urls_then_enqueues_notify() {
        let db = Arc::new(db::Database::new(testutil::conn()).unwrap());
        let video_id = uploading_video(&db.lock());
        let store = Arc::new(FakeStore {
            puts: Mutex::new(vec![]),
        });
        let handler = UploadHandler::new(
            db.clone(),
            Arc::new(SimulatedClocks::new(Time(3000))),
            store.clone(),
            3,
        );
        let payload = serde_json::to_value(UploadPayload {
            video_id,
            unique_id: "BK_0001_cam1_20240115_120000".to_owned(),
            clip_path: "/mnt/a/clips/u/u.ts".to_owned(),
            preview_path: "/mnt/a/clips/u/u_preview.mp4".to_owned(),
            thumbnail_path: "/mnt/a/clips/u/u.png".to_owned(),
        })
        .unwrap();
        let task_id = tasks::enqueue(&db.lock(), TaskType::Upload, &payload, 5, Time(3000)).unwrap();
        let task = tasks::get(&db.lock(), task_id).unwrap().unwrap();

        handler.run(&task).await.unwrap();

        assert_eq!(store.puts.lock().unwrap().len(), 3);
        let conn = db.lock();
        let v = videos::get(&conn, video_id).unwrap().unwrap();
        assert_eq!(
            v.mp4_url.as_deref(),
            Some("https://clips.example.net/mp4/BK_0001_cam1_20240115_120000.ts")
        );
        assert!(v.preview_url.is_some());
        assert!(v.thumbnail_url.is_some());
        // A notify task exists only now that the upload has succeeded.
        let notifies = tasks::claim_ready(&conn, TaskType::Notify, Time(4000), 10).unwrap();
        assert_eq!(notifies.len(), 1);
        assert_eq!(notifies[0].payload["video_id"], video_id);
        assert_eq!(notifies[0].max_attempts, 3);
    }

    #[tokio::test]
    async fn exhaustion_fails_video() {
        let db = Arc::new(db::Database::new(testutil::conn()).unwrap());
        let video_id = uploading_video(&db.lock());
        let store = Arc::new(FakeStore {
            puts: Mutex::new(vec![]),
        });
        let handler =
            UploadHandler::new(db.clone(), Arc::new(SimulatedClocks::new(Time(3000))), store, 3);
        let payload = serde_json::to_value(UploadPayload {
            video_id,
            unique_id: "u".to_owned(),
            clip_path: "/gone".to_owned(),
            preview_path: "/gone".to_owned(),
            thumbnail_path: "/gone".to_owned(),
        })
        .unwrap();
        let task_id = tasks::enqueue(&db.lock(), TaskType::Upload, &payload, 1, Time(3000)).unwrap();
        let mut task = tasks::get(&db.lock(), task_id).unwrap().unwrap();
        task.last_error = Some("put failed: 503".to_owned());

        handler.on_exhausted(&task).await;
        let v = videos::get(&db.lock(), video_id).unwrap().unwrap();
        assert_eq!(v.status, VideoStatus::Failed);
        assert_eq!(v.error_message.as_deref(), Some("put failed: 503"));
    }
}
