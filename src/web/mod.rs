// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The booking-trigger control plane.
//!
//! `POST /api/request-booking-video` resolves a camera and today's booking,
//! answers 202 immediately, and detaches a background task (grace sleep →
//! assemble → enqueue upload) that is not bound to the HTTP client's
//! connection. Everything after the 202 reports through the video row and
//! the task queue, not through HTTP.

mod path;

use self::path::Path;
use crate::assemble::{Assembler, ClipRequest};
use crate::capture::supervisor::Supervisor;
use crate::config::{AssemblyConfig, CameraConfig, QueueConfig};
use crate::diskpool::DiskPool;
use crate::json;
use crate::queue::upload;
use base::clock::Clocks;
use base::time::{self, Duration, Time};
use base::{Error, ErrorKind};
use db::videos::VideoStatus;
use db::{bookings, coverage, sysconf, videos, Booking, Database};
use http::header::{self, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use hyper::Body;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

/// Fallback request spacing per field; `system_config` key
/// `rate_limit_secs` overrides at runtime.
const DEFAULT_RATE_LIMIT_SECS: i64 = 30;

/// The request window is the most recent minute.
const WINDOW: Duration = Duration::minutes(1);

/// An HTTP error response. A thin wrapper over the hyper response type
/// allowing automatic conversion from `base::Error`.
struct HttpError(Response<Body>);

impl From<Response<Body>> for HttpError {
    fn from(response: Response<Body>) -> Self {
        HttpError(response)
    }
}

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        use ErrorKind::*;
        let status_code = match err.kind() {
            InvalidArgument | FailedPrecondition => StatusCode::BAD_REQUEST,
            NotFound => StatusCode::NOT_FOUND,
            ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        HttpError(plain_response(status_code, err.to_string()))
    }
}

type ResponseResult = Result<Response<Body>, HttpError>;

fn plain_response<B: Into<Body>>(status: StatusCode, body: B) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))
        .body(body.into())
        .expect("hardcoded head should be valid")
}

fn json_response<T: serde::Serialize>(status: StatusCode, body: &T) -> ResponseResult {
    let body = serde_json::to_vec(body)
        .map_err(|e| HttpError(plain_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())))?;
    Ok(Response::builder()
        .status(status)
        .header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .body(body.into())
        .expect("hardcoded head should be valid"))
}

fn not_found(msg: &str) -> HttpError {
    HttpError(plain_response(StatusCode::NOT_FOUND, msg.to_owned()))
}

fn bad_req(msg: String) -> HttpError {
    HttpError(plain_response(StatusCode::BAD_REQUEST, msg))
}

/// Extracts an `application/json` POST body from a request.
async fn extract_json_body(req: &mut Request<Body>) -> Result<hyper::body::Bytes, HttpError> {
    if *req.method() != Method::POST {
        return Err(plain_response(StatusCode::METHOD_NOT_ALLOWED, "POST expected").into());
    }
    let correct_mime_type = match req.headers().get(header::CONTENT_TYPE) {
        Some(t) if t == "application/json" => true,
        Some(t) if t == "application/json; charset=UTF-8" => true,
        _ => false,
    };
    if !correct_mime_type {
        return Err(bad_req("expected application/json request body".to_owned()));
    }
    let b = std::mem::replace(req.body_mut(), Body::empty());
    hyper::body::to_bytes(b).await.map_err(|e| {
        HttpError(plain_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unable to read request body: {e}"),
        ))
    })
}

/// Camera resolution, in order: explicit name, unique field match, first
/// enabled camera as a compatibility fallback.
pub fn resolve_camera<'a>(
    cameras: &'a [CameraConfig],
    field_id: i64,
    camera_name: Option<&str>,
) -> Option<&'a CameraConfig> {
    if let Some(name) = camera_name {
        if let Some(c) = cameras.iter().find(|c| c.enabled && c.name == name) {
            return Some(c);
        }
    }
    let mut on_field = cameras.iter().filter(|c| c.enabled && c.field_id == field_id);
    if let (Some(c), None) = (on_field.next(), on_field.next()) {
        return Some(c);
    }
    cameras.iter().find(|c| c.enabled)
}

/// Per-field request spacing. Accepting a request records its time; a
/// rejection reports the remaining wait.
pub struct RateLimiter {
    last_accepted: Mutex<HashMap<i64, Time>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, field_id: i64, now: Time, min_interval: Duration) -> Result<(), i64> {
        let mut l = self.last_accepted.lock().unwrap();
        if let Some(&prev) = l.get(&field_id) {
            let since = now - prev;
            if since < min_interval {
                return Err((min_interval - since).as_secs());
            }
        }
        l.insert(field_id, now);
        Ok(())
    }
}

pub struct Config {
    pub db: Arc<Database>,
    pub clocks: Arc<dyn Clocks>,
    pub cameras: Vec<CameraConfig>,
    pub supervisor: Arc<Supervisor>,
    pub assembler: Arc<Assembler>,
    pub diskpool: Arc<DiskPool>,
    pub online_rx: watch::Receiver<bool>,
    pub shutdown_rx: base::shutdown::Receiver,
    pub queue_cfg: QueueConfig,
    pub assembly_cfg: AssemblyConfig,
}

pub struct Service {
    db: Arc<Database>,
    clocks: Arc<dyn Clocks>,
    cameras: Vec<CameraConfig>,
    supervisor: Arc<Supervisor>,
    assembler: Arc<Assembler>,
    diskpool: Arc<DiskPool>,
    online_rx: watch::Receiver<bool>,
    shutdown_rx: base::shutdown::Receiver,
    queue_cfg: QueueConfig,
    assembly_cfg: AssemblyConfig,
    rate: RateLimiter,
    started: std::time::Instant,
}

impl Service {
    pub fn new(config: Config) -> Self {
        Service {
            db: config.db,
            clocks: config.clocks,
            cameras: config.cameras,
            supervisor: config.supervisor,
            assembler: config.assembler,
            diskpool: config.diskpool,
            online_rx: config.online_rx,
            shutdown_rx: config.shutdown_rx,
            queue_cfg: config.queue_cfg,
            assembly_cfg: config.assembly_cfg,
            rate: RateLimiter::new(),
            started: std::time::Instant::now(),
        }
    }

    pub async fn serve(self: Arc<Self>, mut req: Request<Body>) -> Result<Response<Body>, Infallible> {
        let p = Path::decode(req.uri().path());
        let get = *req.method() == Method::GET;
        let result = match p {
            Path::RequestBookingVideo => self.clone().request_booking_video(&mut req).await,
            Path::Status if get => self.status(),
            Path::Health if get => self.health(),
            Path::NotFound => Err(not_found("path not understood")),
            _ => Err(plain_response(StatusCode::METHOD_NOT_ALLOWED, "bad method").into()),
        };
        Ok(result.unwrap_or_else(|e| e.0))
    }

    async fn request_booking_video(self: Arc<Self>, req: &mut Request<Body>) -> ResponseResult {
        let body = extract_json_body(req).await?;
        let r: json::BookingVideoRequest = serde_json::from_slice(&body)
            .map_err(|e| bad_req(format!("invalid request body: {e}")))?;
        let now = self.clocks.now();

        let min_interval = {
            let conn = self.db.lock();
            sysconf::get_i64(&conn, "rate_limit_secs", DEFAULT_RATE_LIMIT_SECS).unwrap_or(DEFAULT_RATE_LIMIT_SECS)
        };
        if let Err(wait) = self
            .rate
            .check(r.field_id, now, Duration::seconds(min_interval))
        {
            return json_response(
                StatusCode::TOO_MANY_REQUESTS,
                &json::RateLimitResponse {
                    wait_time_seconds: wait,
                    field_id: r.field_id,
                },
            );
        }

        let camera = match resolve_camera(&self.cameras, r.field_id, r.camera_name.as_deref()) {
            Some(c) => c.clone(),
            None => return Err(not_found("no enabled camera")),
        };

        let window_end = now;
        let window_start = now - WINDOW;
        let booking = {
            let conn = self.db.lock();
            bookings::find_covering(
                &conn,
                r.field_id,
                &time::format_local(window_start, "%Y-%m-%d"),
                &time::format_local(window_start, "%H:%M:%S"),
                &time::format_local(window_end, "%H:%M:%S"),
            )?
        };
        let booking = match booking {
            Some(b) => b,
            None => return Err(not_found("no booking covering the window")),
        };
        if !coverage::check_availability(&self.db.lock(), &camera.name, window_start, window_end)? {
            return Err(not_found("No video content found"));
        }

        let task_id = Uuid::new_v4().to_string();
        let unique_id = format!(
            "{}_{}_{}",
            booking.booking_id.replace(['/', ' '], "_"),
            camera.name,
            time::format_local(now, time::FILENAME_FMT)
        );
        info!(
            task_id = %task_id,
            booking = %booking.booking_id,
            camera = %camera.name,
            unique_id = %unique_id,
            "clip request accepted"
        );
        let response = json::BookingVideoResponse {
            task_id,
            booking_id: booking.booking_id.clone(),
            camera: camera.name.clone(),
            start_time: time::format_local(window_start, "%Y-%m-%d %H:%M:%S"),
            end_time: time::format_local(window_end, "%Y-%m-%d %H:%M:%S"),
            status: "processing",
        };

        // Detach; errors past this point live in the video row and queue.
        let svc = self.clone();
        tokio::spawn(async move {
            svc.background_assemble(camera, booking, window_start, window_end, unique_id)
                .await;
        });

        json_response(StatusCode::ACCEPTED, &response)
    }

    /// The post-202 pipeline: grace sleep, assemble, enqueue the upload and
    /// move the video to `uploading`.
    async fn background_assemble(
        self: Arc<Self>,
        camera: CameraConfig,
        booking: Booking,
        start: Time,
        end: Time,
        unique_id: String,
    ) {
        let grace_secs = {
            let conn = self.db.lock();
            sysconf::get_i64(&conn, "assembly_grace_secs", self.assembly_cfg.grace_secs as i64)
                .unwrap_or(self.assembly_cfg.grace_secs as i64)
        };
        let grace = std::time::Duration::from_secs(grace_secs.max(0) as u64);
        if self.shutdown_rx.wait_timeout(grace).await.is_err() {
            warn!(unique_id = %unique_id, "shutdown before assembly started");
            return;
        }
        let req = ClipRequest {
            camera: camera.name.clone(),
            booking_id: booking.booking_id.clone(),
            raw_booking: booking.raw_json.clone(),
            start,
            end,
            unique_id: unique_id.clone(),
        };
        let clip = match self.assembler.assemble(&req).await {
            Ok(c) => c,
            Err(e) => {
                warn!(unique_id = %unique_id, err = %e.chain(), "clip assembly failed");
                return;
            }
        };

        let enqueue = base::retry::with_backoff(
            "enqueue upload",
            base::retry::CAPTURE,
            self.assembly_cfg.step_attempts,
            &self.shutdown_rx,
            || async {
                let now = self.clocks.now();
                let conn = self.db.lock();
                let id = upload::enqueue_upload(
                    &conn,
                    &clip,
                    self.queue_cfg.upload_max_attempts,
                    now,
                )?;
                match videos::transition(&conn, clip.video_id, VideoStatus::Uploading, None, now) {
                    Ok(()) => {}
                    // A retried enqueue after a partial failure finds the
                    // video already uploading; that's fine.
                    Err(e) if e.kind() == ErrorKind::FailedPrecondition => {}
                    Err(e) => return Err(e),
                }
                Ok(id)
            },
        )
        .await;
        match enqueue {
            Ok(task) => info!(unique_id = %unique_id, task, "upload enqueued"),
            Err(e) => {
                warn!(unique_id = %unique_id, err = %e.chain(), "unable to enqueue upload");
                let r = videos::transition(
                    &self.db.lock(),
                    clip.video_id,
                    VideoStatus::Failed,
                    Some("unable to enqueue upload"),
                    self.clocks.now(),
                );
                if let Err(te) = r {
                    warn!(unique_id = %unique_id, err = %te.chain(), "unable to mark video failed");
                }
            }
        }
    }

    fn status(&self) -> ResponseResult {
        let cameras = self
            .supervisor
            .status()
            .into_iter()
            .map(|(camera, st)| json::CameraStatus {
                camera,
                healthy: st.healthy,
                recording: st.recording,
                restart_count: st.restart_count,
                last_restart: st.last_restart.map(|t| t.0),
                last_healthy: st.last_healthy.map(|t| t.0),
                last_segment: st.last_segment.map(|t| t.0),
                backoff_secs: st.current_backoff_secs,
            })
            .collect();
        let disks = self
            .diskpool
            .snapshot()
            .map_err(HttpError::from)?
            .into_iter()
            .map(|d| json::DiskStatus {
                id: d.id,
                path: d.path.to_string_lossy().into_owned(),
                priority: d.priority,
                total_gb: d.total_bytes as f64 / 1e9,
                available_gb: d.available_bytes as f64 / 1e9,
                active: d.active,
            })
            .collect();
        let queue = db::tasks::counts(&self.db.lock())
            .map_err(HttpError::from)?
            .into_iter()
            .map(|(task_type, status, count)| json::QueueDepth {
                task_type,
                status,
                count,
            })
            .collect();
        json_response(
            StatusCode::OK,
            &json::StatusResponse {
                cameras,
                disks,
                queue,
                online: *self.online_rx.borrow(),
            },
        )
    }

    fn health(&self) -> ResponseResult {
        json_response(
            StatusCode::OK,
            &json::HealthResponse {
                status: "ok",
                uptime_secs: self.started.elapsed().as_secs(),
            },
        )
    }
}
