// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The chunk index: pre-concatenated runs of adjacent segments, sharing the
//! segment index's query surface. Chunks are immutable after creation.

use base::time::Time;
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection};

#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub id: i64,
    pub camera: String,
    pub disk_id: String,
    pub rel_path: String,
    pub start: Time,
    pub end: Time,
    pub segment_ids: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct ChunkToInsert<'a> {
    pub camera: &'a str,
    pub disk_id: &'a str,
    pub rel_path: &'a str,
    pub start: Time,
    pub end: Time,
    pub segment_ids: &'a [i64],
}

const CHUNK_COLS: &str = "id, camera, disk_id, rel_path, start_time, end_time, segment_ids";

fn chunk_from_row(row: &rusqlite::Row) -> rusqlite::Result<Chunk> {
    let ids_json: String = row.get(6)?;
    let segment_ids = serde_json::from_str(&ids_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(Chunk {
        id: row.get(0)?,
        camera: row.get(1)?,
        disk_id: row.get(2)?,
        rel_path: row.get(3)?,
        start: Time(row.get(4)?),
        end: Time(row.get(5)?),
        segment_ids,
    })
}

pub fn insert(conn: &Connection, c: &ChunkToInsert) -> Result<i64, Error> {
    let ids_json = serde_json::to_string(c.segment_ids).err_kind(ErrorKind::Internal)?;
    conn.execute(
        r#"
        insert into chunk (camera, disk_id, rel_path, start_time, end_time, segment_ids)
                   values (:camera, :disk_id, :rel_path, :start, :end, :segment_ids)
        "#,
        named_params! {
            ":camera": c.camera,
            ":disk_id": c.disk_id,
            ":rel_path": c.rel_path,
            ":start": c.start.0,
            ":end": c.end.0,
            ":segment_ids": ids_json,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(conn.last_insert_rowid())
}

/// Returns all chunks intersecting `[start, end)`, ordered by start.
pub fn list_intersecting(
    conn: &Connection,
    camera: &str,
    start: Time,
    end: Time,
) -> Result<Vec<Chunk>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {CHUNK_COLS} from chunk
            where camera = :camera and start_time < :end and end_time > :start
            order by start_time
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map(
            named_params! {":camera": camera, ":start": start.0, ":end": end.0},
            chunk_from_row,
        )
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

/// The chunker's watermark: the latest chunked instant for a camera.
pub fn max_end(conn: &Connection, camera: &str) -> Result<Option<Time>, Error> {
    conn.query_row(
        "select max(end_time) from chunk where camera = :camera",
        named_params! {":camera": camera},
        |row| row.get::<_, Option<i64>>(0),
    )
    .err_kind(ErrorKind::Internal)
    .map(|o| o.map(Time))
}

pub fn list_older_than(conn: &Connection, camera: &str, cutoff: Time) -> Result<Vec<Chunk>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {CHUNK_COLS} from chunk
            where camera = :camera and end_time < :cutoff
            order by start_time
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map(
            named_params! {":camera": camera, ":cutoff": cutoff.0},
            chunk_from_row,
        )
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

pub fn delete(conn: &Connection, ids: &[i64]) -> Result<usize, Error> {
    let mut n = 0;
    let mut stmt = conn
        .prepare_cached("delete from chunk where id = :id")
        .err_kind(ErrorKind::Internal)?;
    for id in ids {
        n += stmt
            .execute(named_params! {":id": id})
            .err_kind(ErrorKind::Internal)?;
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn roundtrip_segment_ids() {
        let conn = testutil::conn();
        let disk = testutil::add_disk(&conn, "/mnt/a");
        let id = insert(
            &conn,
            &ChunkToInsert {
                camera: "cam1",
                disk_id: &disk,
                rel_path: "chunks/cam1/20240115_120000.mp4",
                start: Time(1000),
                end: Time(1900),
                segment_ids: &[1, 2, 3],
            },
        )
        .unwrap();
        let got = list_intersecting(&conn, "cam1", Time(1500), Time(1600)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, id);
        assert_eq!(got[0].segment_ids, vec![1, 2, 3]);
        assert_eq!(max_end(&conn, "cam1").unwrap(), Some(Time(1900)));
        assert_eq!(max_end(&conn, "cam2").unwrap(), None);
    }
}
