// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Booking rows. An external sync job populates these; the core only reads
//! them, except for [`upsert`], which is the sync job's ingest point.
//!
//! `date` (`YYYY-MM-DD`) and the times of day (`HH:MM:SS`, zero-padded) are
//! stored as text in the appliance's local zone; lexicographic order equals
//! chronological order, which keeps the covering-window query a plain
//! string comparison.

use base::time::Time;
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};

pub const STATUS_SUCCESS: &str = "success";

#[derive(Clone, Debug, PartialEq)]
pub struct Booking {
    pub booking_id: String,
    pub order_detail_id: Option<String>,
    pub field_id: i64,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub raw_json: Option<String>,
    pub synced_at: Option<Time>,
}

const BOOKING_COLS: &str =
    "booking_id, order_detail_id, field_id, date, start_time, end_time, status, raw_json, synced_at";

fn booking_from_row(row: &rusqlite::Row) -> rusqlite::Result<Booking> {
    Ok(Booking {
        booking_id: row.get(0)?,
        order_detail_id: row.get(1)?,
        field_id: row.get(2)?,
        date: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        status: row.get(6)?,
        raw_json: row.get(7)?,
        synced_at: row.get::<_, Option<i64>>(8)?.map(Time),
    })
}

pub fn upsert(conn: &Connection, b: &Booking) -> Result<(), Error> {
    conn.execute(
        r#"
        insert into booking (booking_id, order_detail_id, field_id, date, start_time,
                             end_time, status, raw_json, synced_at)
                     values (:booking_id, :order_detail_id, :field_id, :date, :start_time,
                             :end_time, :status, :raw_json, :synced_at)
        on conflict (booking_id) do update set
            order_detail_id = excluded.order_detail_id,
            field_id = excluded.field_id,
            date = excluded.date,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            status = excluded.status,
            raw_json = excluded.raw_json,
            synced_at = excluded.synced_at
        "#,
        named_params! {
            ":booking_id": b.booking_id,
            ":order_detail_id": b.order_detail_id,
            ":field_id": b.field_id,
            ":date": b.date,
            ":start_time": b.start_time,
            ":end_time": b.end_time,
            ":status": b.status,
            ":raw_json": b.raw_json,
            ":synced_at": b.synced_at.map(|t| t.0),
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Finds the `success` booking on `date` for `field_id` whose time-of-day
/// range covers `[window_start, window_end]`.
pub fn find_covering(
    conn: &Connection,
    field_id: i64,
    date: &str,
    window_start: &str,
    window_end: &str,
) -> Result<Option<Booking>, Error> {
    conn.query_row(
        &format!(
            r#"
            select {BOOKING_COLS} from booking
            where field_id = :field_id and date = :date and status = :status
              and start_time <= :window_start and end_time >= :window_end
            order by start_time
            limit 1
            "#
        ),
        named_params! {
            ":field_id": field_id,
            ":date": date,
            ":status": STATUS_SUCCESS,
            ":window_start": window_start,
            ":window_end": window_end,
        },
        booking_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn covering_lookup() {
        let conn = testutil::conn();
        testutil::add_booking(&conn, "BK/0001", 1, "2024-01-15", "11:30:00", "13:00:00", "success");
        testutil::add_booking(&conn, "BK/0002", 1, "2024-01-15", "14:00:00", "15:00:00", "cancelled");

        let b = find_covering(&conn, 1, "2024-01-15", "11:59:00", "12:00:00")
            .unwrap()
            .unwrap();
        assert_eq!(b.booking_id, "BK/0001");

        // Window outside the booking.
        assert!(find_covering(&conn, 1, "2024-01-15", "13:30:00", "13:31:00")
            .unwrap()
            .is_none());
        // Cancelled bookings never match.
        assert!(find_covering(&conn, 1, "2024-01-15", "14:10:00", "14:11:00")
            .unwrap()
            .is_none());
        // Wrong field or date.
        assert!(find_covering(&conn, 2, "2024-01-15", "11:59:00", "12:00:00")
            .unwrap()
            .is_none());
        assert!(find_covering(&conn, 1, "2024-01-16", "11:59:00", "12:00:00")
            .unwrap()
            .is_none());
    }

    #[test]
    fn upsert_replaces() {
        let conn = testutil::conn();
        testutil::add_booking(&conn, "BK/0001", 1, "2024-01-15", "11:30:00", "13:00:00", "success");
        testutil::add_booking(&conn, "BK/0001", 1, "2024-01-15", "11:30:00", "13:00:00", "cancelled");
        assert!(find_covering(&conn, 1, "2024-01-15", "12:00:00", "12:01:00")
            .unwrap()
            .is_none());
    }
}
