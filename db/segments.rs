// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The segment index: the authoritative mapping from (camera, time interval)
//! to an on-disk recording file.

use base::time::{Duration, Time};
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};

/// Tolerance for duplicate detection on (camera, start).
pub const INSERT_TOLERANCE: Duration = Duration::seconds(1);

#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub camera: String,
    pub disk_id: String,
    pub rel_path: String,
    pub start: Time,
    pub end: Time,
    pub size_bytes: i64,
}

#[derive(Clone, Debug)]
pub struct SegmentToInsert<'a> {
    pub camera: &'a str,
    pub disk_id: &'a str,
    pub rel_path: &'a str,
    pub start: Time,
    pub end: Time,
    pub size_bytes: i64,
}

const SEGMENT_COLS: &str = "id, camera, disk_id, rel_path, start_time, end_time, size_bytes";

fn segment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Segment> {
    Ok(Segment {
        id: row.get(0)?,
        camera: row.get(1)?,
        disk_id: row.get(2)?,
        rel_path: row.get(3)?,
        start: Time(row.get(4)?),
        end: Time(row.get(5)?),
        size_bytes: row.get(6)?,
    })
}

/// Records a completed segment. Idempotent on (camera, start) within
/// [`INSERT_TOLERANCE`]: re-recording an already-indexed file returns
/// `None` instead of a new row id.
pub fn insert(conn: &Connection, s: &SegmentToInsert) -> Result<Option<i64>, Error> {
    let existing: Option<i64> = conn
        .query_row(
            r#"
            select id from segment
            where camera = :camera
              and start_time between :start - :tol and :start + :tol
            "#,
            named_params! {
                ":camera": s.camera,
                ":start": s.start.0,
                ":tol": INSERT_TOLERANCE.as_secs(),
            },
            |row| row.get(0),
        )
        .optional()
        .err_kind(ErrorKind::Internal)?;
    if existing.is_some() {
        return Ok(None);
    }
    conn.execute(
        r#"
        insert into segment (camera, disk_id, rel_path, start_time, end_time, size_bytes)
                     values (:camera, :disk_id, :rel_path, :start, :end, :size_bytes)
        "#,
        named_params! {
            ":camera": s.camera,
            ":disk_id": s.disk_id,
            ":rel_path": s.rel_path,
            ":start": s.start.0,
            ":end": s.end.0,
            ":size_bytes": s.size_bytes,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(Some(conn.last_insert_rowid()))
}

/// Returns all segments intersecting `[start, end)`, ordered by start.
pub fn list_intersecting(
    conn: &Connection,
    camera: &str,
    start: Time,
    end: Time,
) -> Result<Vec<Segment>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {SEGMENT_COLS} from segment
            where camera = :camera and start_time < :end and end_time > :start
            order by start_time
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map(
            named_params! {":camera": camera, ":start": start.0, ":end": end.0},
            segment_from_row,
        )
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

/// Retention GC listing: segments wholly before `cutoff`. The caller removes
/// the rows with [`delete`] and is responsible for unlinking the files.
pub fn list_older_than(
    conn: &Connection,
    camera: &str,
    cutoff: Time,
) -> Result<Vec<Segment>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {SEGMENT_COLS} from segment
            where camera = :camera and end_time < :cutoff
            order by start_time
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map(
            named_params! {":camera": camera, ":cutoff": cutoff.0},
            segment_from_row,
        )
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

pub fn delete(conn: &Connection, ids: &[i64]) -> Result<usize, Error> {
    let mut n = 0;
    let mut stmt = conn
        .prepare_cached("delete from segment where id = :id")
        .err_kind(ErrorKind::Internal)?;
    for id in ids {
        n += stmt
            .execute(named_params! {":id": id})
            .err_kind(ErrorKind::Internal)?;
    }
    Ok(n)
}

/// The end of the most recent segment for a camera, if any.
pub fn latest_end(conn: &Connection, camera: &str) -> Result<Option<Time>, Error> {
    conn.query_row(
        "select max(end_time) from segment where camera = :camera",
        named_params! {":camera": camera},
        |row| row.get::<_, Option<i64>>(0),
    )
    .err_kind(ErrorKind::Internal)
    .map(|o| o.map(Time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn insert_is_idempotent_within_tolerance() {
        let conn = testutil::conn();
        let disk = testutil::add_disk(&conn, "/mnt/a");
        let s = SegmentToInsert {
            camera: "cam1",
            disk_id: &disk,
            rel_path: "recordings/cam1/mp4/cam1_20240115_120000.mp4",
            start: Time(1000),
            end: Time(1060),
            size_bytes: 1 << 20,
        };
        assert!(insert(&conn, &s).unwrap().is_some());
        assert_eq!(insert(&conn, &s).unwrap(), None);
        // 1 s of clock skew still counts as the same segment…
        assert_eq!(
            insert(&conn, &SegmentToInsert { start: Time(1001), ..s.clone() })
                .unwrap(),
            None
        );
        // …but the next segment boundary does not.
        assert!(insert(
            &conn,
            &SegmentToInsert {
                rel_path: "recordings/cam1/mp4/cam1_20240115_120100.mp4",
                start: Time(1060),
                end: Time(1120),
                ..s.clone()
            }
        )
        .unwrap()
        .is_some());
    }

    #[test]
    fn list_intersecting_half_open() {
        let conn = testutil::conn();
        let disk = testutil::add_disk(&conn, "/mnt/a");
        for i in 0..5i64 {
            testutil::add_segment(&conn, "cam1", &disk, Time(1000 + i * 60), Time(1060 + i * 60));
        }
        // Query exactly one segment's bounds.
        let got = list_intersecting(&conn, "cam1", Time(1060), Time(1120)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].start, Time(1060));
        // A query ending at a segment's start excludes it.
        let got = list_intersecting(&conn, "cam1", Time(1000), Time(1060)).unwrap();
        assert_eq!(got.len(), 1);
        // Spanning query touches every overlapping segment, ascending.
        let got = list_intersecting(&conn, "cam1", Time(1030), Time(1250)).unwrap();
        assert_eq!(got.len(), 5);
        assert!(got.windows(2).all(|w| w[0].start < w[1].start));
        // Other camera: nothing.
        assert!(list_intersecting(&conn, "cam2", Time(0), Time(9999))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn retention_cutoff() {
        let conn = testutil::conn();
        let disk = testutil::add_disk(&conn, "/mnt/a");
        testutil::add_segment(&conn, "cam1", &disk, Time(0), Time(60));
        testutil::add_segment(&conn, "cam1", &disk, Time(60), Time(120));
        testutil::add_segment(&conn, "cam1", &disk, Time(120), Time(180));
        let old = list_older_than(&conn, "cam1", Time(120)).unwrap();
        assert_eq!(old.len(), 2);
        let ids: Vec<i64> = old.iter().map(|s| s.id).collect();
        assert_eq!(delete(&conn, &ids).unwrap(), 2);
        assert_eq!(latest_end(&conn, "cam1").unwrap(), Some(Time(180)));
        assert!(list_older_than(&conn, "cam1", Time(120)).unwrap().is_empty());
    }
}
