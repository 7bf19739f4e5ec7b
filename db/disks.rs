// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Persisted records for the tiered disk pool.
//!
//! The disk pool component (`diskpool` in the main crate) is the sole
//! mutator of the `active` flag; everything else reads snapshots.

use base::time::Time;
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq)]
pub struct Disk {
    pub id: String,
    pub path: PathBuf,
    pub priority: i32,
    pub total_bytes: i64,
    pub available_bytes: i64,
    pub active: bool,
    pub created_at: Time,
    pub last_scan: Option<Time>,
}

impl Disk {
    pub fn available_gb(&self) -> f64 {
        self.available_bytes as f64 / 1e9
    }
}

fn disk_from_row(row: &rusqlite::Row) -> rusqlite::Result<Disk> {
    Ok(Disk {
        id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        priority: row.get(2)?,
        total_bytes: row.get(3)?,
        available_bytes: row.get(4)?,
        active: row.get(5)?,
        created_at: Time(row.get(6)?),
        last_scan: row.get::<_, Option<i64>>(7)?.map(Time),
    })
}

const DISK_COLS: &str =
    "id, path, priority, total_bytes, available_bytes, active, created_at, last_scan";

/// Ensures a row exists for the given mount path, creating one with a fresh
/// opaque id if needed. Priorities are stable across restarts: an existing
/// row keeps its priority unless `override_priority` is set.
pub fn upsert_candidate(
    conn: &Connection,
    path: &std::path::Path,
    priority: i32,
    override_priority: bool,
    now: Time,
) -> Result<Disk, Error> {
    let path_str = path.to_string_lossy();
    let existing: Option<Disk> = conn
        .query_row(
            &format!("select {DISK_COLS} from disk where path = :path"),
            named_params! {":path": path_str},
            disk_from_row,
        )
        .optional()
        .err_kind(ErrorKind::Internal)?;
    if let Some(mut d) = existing {
        if override_priority && d.priority != priority {
            conn.execute(
                "update disk set priority = :priority where id = :id",
                named_params! {":priority": priority, ":id": d.id},
            )
            .err_kind(ErrorKind::Internal)?;
            d.priority = priority;
        }
        return Ok(d);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        r#"
        insert into disk (id, path, priority, total_bytes, available_bytes, active, created_at)
                  values (:id, :path, :priority, 0, 0, 0, :created_at)
        "#,
        named_params! {
            ":id": id,
            ":path": path_str,
            ":priority": priority,
            ":created_at": now.0,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(Disk {
        id,
        path: path.to_owned(),
        priority,
        total_bytes: 0,
        available_bytes: 0,
        active: false,
        created_at: now,
        last_scan: None,
    })
}

pub fn update_space(
    conn: &Connection,
    id: &str,
    total_bytes: i64,
    available_bytes: i64,
    now: Time,
) -> Result<(), Error> {
    conn.execute(
        r#"
        update disk
        set total_bytes = :total, available_bytes = :available, last_scan = :now
        where id = :id
        "#,
        named_params! {
            ":total": total_bytes,
            ":available": available_bytes,
            ":now": now.0,
            ":id": id,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

pub fn list(conn: &Connection) -> Result<Vec<Disk>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "select {DISK_COLS} from disk order by priority, created_at"
        ))
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map([], disk_from_row)
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Disk>, Error> {
    conn.query_row(
        &format!("select {DISK_COLS} from disk where id = :id"),
        named_params! {":id": id},
        disk_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

pub fn active(conn: &Connection) -> Result<Option<Disk>, Error> {
    conn.query_row(
        &format!("select {DISK_COLS} from disk where active = 1"),
        [],
        disk_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

/// Marks `id` the single active disk. The clear+set runs in one transaction
/// so the "at most one active" invariant holds even across a crash.
pub fn set_active(conn: &mut Connection, id: &str) -> Result<(), Error> {
    let tx = conn.transaction().err_kind(ErrorKind::Internal)?;
    tx.execute("update disk set active = 0 where active = 1", [])
        .err_kind(ErrorKind::Internal)?;
    let n = tx
        .execute(
            "update disk set active = 1 where id = :id",
            named_params! {":id": id},
        )
        .err_kind(ErrorKind::Internal)?;
    if n != 1 {
        return Err(base::err!(NotFound, msg("no disk with id {id}")));
    }
    tx.commit().err_kind(ErrorKind::Internal)
}

/// Removes a disk record; only reachable from an explicit admin call.
pub fn forget(conn: &Connection, id: &str) -> Result<bool, Error> {
    let n = conn
        .execute("delete from disk where id = :id", named_params! {":id": id})
        .err_kind(ErrorKind::Internal)?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn upsert_is_stable() {
        let conn = testutil::conn();
        let now = Time(1_700_000_000);
        let d1 = upsert_candidate(&conn, std::path::Path::new("/mnt/ext"), 1, false, now).unwrap();
        let d2 = upsert_candidate(&conn, std::path::Path::new("/mnt/ext"), 3, false, now).unwrap();
        assert_eq!(d1.id, d2.id);
        assert_eq!(d2.priority, 1); // not overridden
        let d3 = upsert_candidate(&conn, std::path::Path::new("/mnt/ext"), 3, true, now).unwrap();
        assert_eq!(d3.priority, 3);
    }

    #[test]
    fn at_most_one_active() {
        let mut conn = testutil::conn();
        let now = Time(1_700_000_000);
        let a = upsert_candidate(&conn, std::path::Path::new("/mnt/a"), 1, false, now).unwrap();
        let b = upsert_candidate(&conn, std::path::Path::new("/mnt/b"), 2, false, now).unwrap();
        set_active(&mut conn, &a.id).unwrap();
        assert_eq!(active(&conn).unwrap().unwrap().id, a.id);
        set_active(&mut conn, &b.id).unwrap();
        let l = list(&conn).unwrap();
        assert_eq!(l.iter().filter(|d| d.active).count(), 1);
        assert_eq!(active(&conn).unwrap().unwrap().id, b.id);
    }

    #[test]
    fn set_active_unknown_disk() {
        let mut conn = testutil::conn();
        let e = set_active(&mut conn, "nope").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }
}
