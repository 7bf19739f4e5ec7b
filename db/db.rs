// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Database open/init logic and the connection wrapper.
//!
//! SQLite is a single-writer store; the [`Database`] wrapper serialises all
//! access through one mutex. Query callbacks therefore run with the lock
//! held and should be quick. The capture path keeps its database work to one
//! small insert per completed segment, so this is comfortably cheap.

use base::{bail, err, Error, ResultExt};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

/// Expected value of `pragma user_version`.
pub const EXPECTED_SCHEMA_VERSION: i32 = 1;

/// Initializes the database schema. Idempotent: refuses to touch a database
/// that already has one.
pub fn init(conn: &mut Connection) -> Result<(), Error> {
    if schema_version(conn)? != 0 {
        bail!(AlreadyExists, msg("database is already initialized"));
    }
    let tx = conn
        .transaction()
        .err_kind(base::ErrorKind::Internal)?;
    tx.execute_batch(include_str!("schema.sql"))
        .err_kind(base::ErrorKind::Internal)?;
    tx.commit().err_kind(base::ErrorKind::Internal)?;
    info!("database initialized");
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i32, Error> {
    conn.query_row("pragma user_version", [], |row| row.get(0))
        .err_kind(base::ErrorKind::Internal)
}

fn set_pragmas(conn: &Connection) -> Result<(), Error> {
    // WAL so the task-queue workers and the capture path don't block each
    // other's reads; a busy timeout because writers do still queue.
    conn.execute_batch(
        r#"
        pragma journal_mode = wal;
        pragma synchronous = normal;
        pragma foreign_keys = on;
        pragma busy_timeout = 10000;
        "#,
    )
    .err_kind(base::ErrorKind::Internal)
}

/// Opens the database file, checking the schema version.
pub fn open(path: &Path) -> Result<Connection, Error> {
    let conn = Connection::open(path).map_err(|e| {
        err!(
            Internal,
            msg("unable to open database at {}", path.display()),
            source(e)
        )
    })?;
    set_pragmas(&conn)?;
    let ver = schema_version(&conn)?;
    if ver == 0 {
        bail!(
            FailedPrecondition,
            msg(
                "no database at {}; run the `init` subcommand first",
                path.display()
            )
        );
    }
    if ver != EXPECTED_SCHEMA_VERSION {
        bail!(
            FailedPrecondition,
            msg("database schema version is {ver}, expected {EXPECTED_SCHEMA_VERSION}")
        );
    }
    Ok(conn)
}

/// Creates (if needed) and opens the database file.
pub fn open_or_init(path: &Path) -> Result<Connection, Error> {
    let mut conn = Connection::open(path).map_err(|e| {
        err!(
            Internal,
            msg("unable to open database at {}", path.display()),
            source(e)
        )
    })?;
    set_pragmas(&conn)?;
    if schema_version(&conn)? == 0 {
        init(&mut conn)?;
    }
    drop(conn);
    open(path)
}

/// The single-writer connection wrapper shared across components.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(conn: Connection) -> Result<Self, Error> {
        let ver = schema_version(&conn)?;
        if ver != EXPECTED_SCHEMA_VERSION {
            bail!(
                FailedPrecondition,
                msg("database schema version is {ver}, expected {EXPECTED_SCHEMA_VERSION}")
            );
        }
        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    /// Acquires the connection. Hold briefly.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_and_version_check() {
        let mut conn = Connection::open_in_memory().unwrap();
        init(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), EXPECTED_SCHEMA_VERSION);
        // A second init is refused.
        let e = init(&mut conn).unwrap_err();
        assert_eq!(e.kind(), base::ErrorKind::AlreadyExists);
    }

    #[test]
    fn open_without_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.db");
        // Create an empty file with no schema.
        Connection::open(&path).unwrap();
        let e = open(&path).unwrap_err();
        assert_eq!(e.kind(), base::ErrorKind::FailedPrecondition);
    }

    #[test]
    fn open_or_init_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("videos.db");
        let conn = open_or_init(&path).unwrap();
        drop(conn);
        open(&path).unwrap();
    }
}
