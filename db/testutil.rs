// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Utilities for automated testing involving the persistence library. Used
//! by both the `pitchside_db` crate itself and the `pitchside_nvr` crate.

use crate::db;
use crate::disks;
use crate::segments;
use base::time::Time;
use rusqlite::Connection;

static INIT: std::sync::Once = std::sync::Once::new();

/// Performs global initialization for tests (logging).
pub fn init() {
    INIT.call_once(|| {
        base::tracing_setup::install_for_tests();
    });
}

/// An initialized in-memory database connection.
pub fn conn() -> Connection {
    init();
    let mut conn = Connection::open_in_memory().unwrap();
    db::init(&mut conn).unwrap();
    conn
}

/// Adds a disk record for `path`, returning its id.
pub fn add_disk(conn: &Connection, path: &str) -> String {
    let d = disks::upsert_candidate(
        conn,
        std::path::Path::new(path),
        2,
        false,
        Time(1_700_000_000),
    )
    .unwrap();
    disks::update_space(conn, &d.id, 500 << 30, 400 << 30, Time(1_700_000_000)).unwrap();
    d.id
}

/// Adds a segment row with a filename derived from its start.
pub fn add_segment(conn: &Connection, camera: &str, disk_id: &str, start: Time, end: Time) -> i64 {
    segments::insert(
        conn,
        &segments::SegmentToInsert {
            camera,
            disk_id,
            rel_path: &format!("recordings/{camera}/mp4/{camera}_{}.mp4", start.0),
            start,
            end,
            size_bytes: 4 << 20,
        },
    )
    .unwrap()
    .expect("fixture segments should not collide")
}

/// Adds a booking row.
pub fn add_booking(
    conn: &Connection,
    booking_id: &str,
    field_id: i64,
    date: &str,
    start_time: &str,
    end_time: &str,
    status: &str,
) {
    crate::bookings::upsert(
        conn,
        &crate::bookings::Booking {
            booking_id: booking_id.to_owned(),
            order_detail_id: None,
            field_id,
            date: date.to_owned(),
            start_time: start_time.to_owned(),
            end_time: end_time.to_owned(),
            status: status.to_owned(),
            raw_json: Some(format!(
                r#"{{"booking_id":{booking_id:?},"field_id":{field_id}}}"#
            )),
            synced_at: Some(Time(1_700_000_000)),
        },
    )
    .unwrap()
}
