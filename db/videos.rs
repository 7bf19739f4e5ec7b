// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clip (video) records and their status lifecycle.
//!
//! Transitions are forward-only: `processing → uploading → ready`, with
//! `failed` reachable from `processing` and `uploading`. After the booking
//! endpoint's 202, these rows (plus the task queue) are the operational
//! truth about a clip.

use base::time::Time;
use base::{bail, Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VideoStatus {
    Initial,
    Recording,
    Processing,
    Uploading,
    Ready,
    Failed,
    Unavailable,
    Cancelled,
}

impl VideoStatus {
    pub fn as_str(self) -> &'static str {
        use VideoStatus::*;
        match self {
            Initial => "initial",
            Recording => "recording",
            Processing => "processing",
            Uploading => "uploading",
            Ready => "ready",
            Failed => "failed",
            Unavailable => "unavailable",
            Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        use VideoStatus::*;
        Some(match s {
            "initial" => Initial,
            "recording" => Recording,
            "processing" => Processing,
            "uploading" => Uploading,
            "ready" => Ready,
            "failed" => Failed,
            "unavailable" => Unavailable,
            "cancelled" => Cancelled,
            _ => return None,
        })
    }

    /// Whether `self → to` is a legal lifecycle step.
    pub fn can_transition_to(self, to: VideoStatus) -> bool {
        use VideoStatus::*;
        matches!(
            (self, to),
            (Processing, Uploading)
                | (Processing, Failed)
                | (Processing, Unavailable)
                | (Uploading, Ready)
                | (Uploading, Failed)
        )
    }
}

#[derive(Clone, Debug)]
pub struct Video {
    pub id: i64,
    pub booking_id: String,
    pub camera: String,
    pub unique_id: String,
    pub status: VideoStatus,
    pub start: Time,
    pub end: Time,
    pub local_path: Option<String>,
    pub disk_id: Option<String>,
    pub mp4_url: Option<String>,
    pub preview_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_secs: Option<f64>,
    pub size_bytes: Option<i64>,
    pub raw_booking: Option<String>,
    pub error_message: Option<String>,
    pub created_at: Time,
    pub updated_at: Time,
}

#[derive(Clone, Debug)]
pub struct VideoToInsert<'a> {
    pub booking_id: &'a str,
    pub camera: &'a str,
    pub unique_id: &'a str,
    pub start: Time,
    pub end: Time,
    pub raw_booking: Option<&'a str>,
}

const VIDEO_COLS: &str = "id, booking_id, camera, unique_id, status, start_time, end_time, \
     local_path, disk_id, mp4_url, preview_url, thumbnail_url, duration_secs, size_bytes, \
     raw_booking, error_message, created_at, updated_at";

fn video_from_row(row: &rusqlite::Row) -> rusqlite::Result<Video> {
    let status: String = row.get(4)?;
    let status = VideoStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("bad video status {status:?}").into(),
        )
    })?;
    Ok(Video {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        camera: row.get(2)?,
        unique_id: row.get(3)?,
        status,
        start: Time(row.get(5)?),
        end: Time(row.get(6)?),
        local_path: row.get(7)?,
        disk_id: row.get(8)?,
        mp4_url: row.get(9)?,
        preview_url: row.get(10)?,
        thumbnail_url: row.get(11)?,
        duration_secs: row.get(12)?,
        size_bytes: row.get(13)?,
        raw_booking: row.get(14)?,
        error_message: row.get(15)?,
        created_at: Time(row.get(16)?),
        updated_at: Time(row.get(17)?),
    })
}

/// Creates a clip record in `processing` state.
pub fn insert_processing(conn: &Connection, v: &VideoToInsert, now: Time) -> Result<i64, Error> {
    conn.execute(
        r#"
        insert into video (booking_id, camera, unique_id, status, start_time, end_time,
                           raw_booking, created_at, updated_at)
                   values (:booking_id, :camera, :unique_id, 'processing', :start, :end,
                           :raw_booking, :now, :now)
        "#,
        named_params! {
            ":booking_id": v.booking_id,
            ":camera": v.camera,
            ":unique_id": v.unique_id,
            ":start": v.start.0,
            ":end": v.end.0,
            ":raw_booking": v.raw_booking,
            ":now": now.0,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(conn.last_insert_rowid())
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Video>, Error> {
    conn.query_row(
        &format!("select {VIDEO_COLS} from video where id = :id"),
        named_params! {":id": id},
        video_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

pub fn get_by_unique_id(conn: &Connection, unique_id: &str) -> Result<Option<Video>, Error> {
    conn.query_row(
        &format!("select {VIDEO_COLS} from video where unique_id = :unique_id"),
        named_params! {":unique_id": unique_id},
        video_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

/// Moves a video to `to`, enforcing the forward-only lifecycle.
pub fn transition(
    conn: &Connection,
    id: i64,
    to: VideoStatus,
    error_message: Option<&str>,
    now: Time,
) -> Result<(), Error> {
    let cur = match get(conn, id)? {
        Some(v) => v.status,
        None => bail!(NotFound, msg("no video with id {id}")),
    };
    if !cur.can_transition_to(to) {
        bail!(
            FailedPrecondition,
            msg(
                "video {id}: illegal transition {} -> {}",
                cur.as_str(),
                to.as_str()
            )
        );
    }
    conn.execute(
        r#"
        update video
        set status = :status, error_message = :error_message, updated_at = :now
        where id = :id
        "#,
        named_params! {
            ":status": to.as_str(),
            ":error_message": error_message,
            ":now": now.0,
            ":id": id,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Records the assembler's outputs on the row.
pub fn update_artifacts(
    conn: &Connection,
    id: i64,
    local_path: &str,
    disk_id: &str,
    duration_secs: f64,
    size_bytes: i64,
    now: Time,
) -> Result<(), Error> {
    conn.execute(
        r#"
        update video
        set local_path = :local_path, disk_id = :disk_id,
            duration_secs = :duration_secs, size_bytes = :size_bytes, updated_at = :now
        where id = :id
        "#,
        named_params! {
            ":local_path": local_path,
            ":disk_id": disk_id,
            ":duration_secs": duration_secs,
            ":size_bytes": size_bytes,
            ":now": now.0,
            ":id": id,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Records the object-store URLs after a successful upload.
pub fn update_urls(
    conn: &Connection,
    id: i64,
    mp4_url: &str,
    preview_url: &str,
    thumbnail_url: &str,
    now: Time,
) -> Result<(), Error> {
    conn.execute(
        r#"
        update video
        set mp4_url = :mp4_url, preview_url = :preview_url,
            thumbnail_url = :thumbnail_url, updated_at = :now
        where id = :id
        "#,
        named_params! {
            ":mp4_url": mp4_url,
            ":preview_url": preview_url,
            ":thumbnail_url": thumbnail_url,
            ":now": now.0,
            ":id": id,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Janitor: `ready` videos whose artifacts are uploaded but still on local
/// disk, last touched before `cutoff`.
pub fn list_ready_with_local(conn: &Connection, cutoff: Time) -> Result<Vec<Video>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {VIDEO_COLS} from video
            where status = 'ready' and local_path is not null and updated_at < :cutoff
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map(named_params! {":cutoff": cutoff.0}, video_from_row)
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

/// Clears the local path after the janitor removes the on-disk artifacts.
pub fn clear_local(conn: &Connection, id: i64, now: Time) -> Result<(), Error> {
    conn.execute(
        "update video set local_path = null, updated_at = :now where id = :id",
        named_params! {":now": now.0, ":id": id},
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Janitor: prunes terminal rows older than the cutoff.
pub fn delete_terminal_older_than(conn: &Connection, cutoff: Time) -> Result<usize, Error> {
    conn.execute(
        r#"
        delete from video
        where status in ('failed', 'cancelled') and updated_at < :cutoff
        "#,
        named_params! {":cutoff": cutoff.0},
    )
    .err_kind(ErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    fn new_video(conn: &Connection) -> i64 {
        insert_processing(
            conn,
            &VideoToInsert {
                booking_id: "BK/0001",
                camera: "cam1",
                unique_id: "BK_0001_cam1_20240115_120000",
                start: Time(1000),
                end: Time(1060),
                raw_booking: Some(r#"{"booking_id":"BK/0001"}"#),
            },
            Time(2000),
        )
        .unwrap()
    }

    #[test]
    fn happy_lifecycle() {
        let conn = testutil::conn();
        let id = new_video(&conn);
        assert_eq!(get(&conn, id).unwrap().unwrap().status, VideoStatus::Processing);
        transition(&conn, id, VideoStatus::Uploading, None, Time(2001)).unwrap();
        transition(&conn, id, VideoStatus::Ready, None, Time(2002)).unwrap();
        let v = get(&conn, id).unwrap().unwrap();
        assert_eq!(v.status, VideoStatus::Ready);
        assert_eq!(v.updated_at, Time(2002));
    }

    #[test]
    fn no_backward_transitions() {
        let conn = testutil::conn();
        let id = new_video(&conn);
        transition(&conn, id, VideoStatus::Uploading, None, Time(2001)).unwrap();
        let e = transition(&conn, id, VideoStatus::Processing, None, Time(2002)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::FailedPrecondition);
        // Terminal states stay terminal.
        transition(&conn, id, VideoStatus::Failed, Some("boom"), Time(2003)).unwrap();
        let e = transition(&conn, id, VideoStatus::Ready, None, Time(2004)).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::FailedPrecondition);
        let v = get(&conn, id).unwrap().unwrap();
        assert_eq!(v.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn unique_id_lookup() {
        let conn = testutil::conn();
        let id = new_video(&conn);
        let v = get_by_unique_id(&conn, "BK_0001_cam1_20240115_120000")
            .unwrap()
            .unwrap();
        assert_eq!(v.id, id);
        assert!(get_by_unique_id(&conn, "nope").unwrap().is_none());
    }
}
