// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Serde types for the control-plane API. Field names are snake_case on the
//! wire, matching the venue-management integration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct BookingVideoRequest {
    pub field_id: i64,
    #[serde(default)]
    pub camera_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingVideoResponse {
    pub task_id: String,
    pub booking_id: String,
    pub camera: String,
    pub start_time: String,
    pub end_time: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RateLimitResponse {
    pub wait_time_seconds: i64,
    pub field_id: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub cameras: Vec<CameraStatus>,
    pub disks: Vec<DiskStatus>,
    pub queue: Vec<QueueDepth>,
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct CameraStatus {
    pub camera: String,
    pub healthy: bool,
    pub recording: bool,
    pub restart_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_restart: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_healthy: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_segment: Option<i64>,
    pub backoff_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct DiskStatus {
    pub id: String,
    pub path: String,
    pub priority: i32,
    pub total_gb: f64,
    pub available_gb: f64,
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueDepth {
    pub task_type: String,
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
}
