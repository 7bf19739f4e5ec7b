// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Typed accessors over the `system_config` table, for values an operator
//! may tune without a restart. Static wiring stays in the TOML config file.

use base::time::Time;
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};

pub fn get_str(conn: &Connection, key: &str, default: &str) -> Result<String, Error> {
    let v: Option<String> = conn
        .query_row(
            "select value from system_config where key = :key",
            named_params! {":key": key},
            |row| row.get(0),
        )
        .optional()
        .err_kind(ErrorKind::Internal)?;
    Ok(v.unwrap_or_else(|| default.to_owned()))
}

pub fn get_i64(conn: &Connection, key: &str, default: i64) -> Result<i64, Error> {
    let v = get_str(conn, key, "")?;
    if v.is_empty() {
        return Ok(default);
    }
    v.parse()
        .map_err(|_| base::err!(FailedPrecondition, msg("system_config {key} is not an integer: {v:?}")))
}

pub fn get_bool(conn: &Connection, key: &str, default: bool) -> Result<bool, Error> {
    let v = get_str(conn, key, "")?;
    match v.as_str() {
        "" => Ok(default),
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(base::err!(
            FailedPrecondition,
            msg("system_config {key} is not a bool: {v:?}")
        )),
    }
}

pub fn get_json<T: serde::de::DeserializeOwned>(
    conn: &Connection,
    key: &str,
) -> Result<Option<T>, Error> {
    let v = get_str(conn, key, "")?;
    if v.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&v)
        .map(Some)
        .map_err(|e| base::err!(FailedPrecondition, msg("system_config {key} is not valid json"), source(e)))
}

pub fn set(conn: &Connection, key: &str, value: &str, now: Time) -> Result<(), Error> {
    conn.execute(
        r#"
        insert into system_config (key, value, updated_at) values (:key, :value, :now)
        on conflict (key) do update set value = excluded.value, updated_at = excluded.updated_at
        "#,
        named_params! {":key": key, ":value": value, ":now": now.0},
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}
