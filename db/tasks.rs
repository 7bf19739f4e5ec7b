// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! The durable task store backing the at-least-once scheduler.
//!
//! Claiming uses a compare-and-swap on status so that only one worker holds
//! `processing` for a given task; tasks stranded in `processing` (a crash
//! mid-handler) are returned to `pending` by the janitor and re-executed,
//! which is where the "at least once" comes from.

use base::time::Time;
use base::{Error, ErrorKind, ResultExt};
use rusqlite::{named_params, Connection, OptionalExtension};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TaskType {
    Upload,
    Notify,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Upload => "upload",
            TaskType::Notify => "notify",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(TaskType::Upload),
            "notify" => Some(TaskType::Notify),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: i64,
    pub type_: TaskType,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_retry_at: Time,
    pub status: TaskStatus,
    pub last_error: Option<String>,
    pub created_at: Time,
    pub updated_at: Time,
}

const TASK_COLS: &str = "id, type, payload, attempts, max_attempts, next_retry_at, status, \
     last_error, created_at, updated_at";

fn task_from_row(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let type_str: String = row.get(1)?;
    let type_ = TaskType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("bad task type {type_str:?}").into(),
        )
    })?;
    let payload_str: String = row.get(2)?;
    let payload = serde_json::from_str(&payload_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_str: String = row.get(6)?;
    let status = TaskStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("bad task status {status_str:?}").into(),
        )
    })?;
    Ok(Task {
        id: row.get(0)?,
        type_,
        payload,
        attempts: row.get(3)?,
        max_attempts: row.get(4)?,
        next_retry_at: Time(row.get(5)?),
        status,
        last_error: row.get(7)?,
        created_at: Time(row.get(8)?),
        updated_at: Time(row.get(9)?),
    })
}

/// Enqueues a task, runnable immediately.
pub fn enqueue(
    conn: &Connection,
    type_: TaskType,
    payload: &serde_json::Value,
    max_attempts: i32,
    now: Time,
) -> Result<i64, Error> {
    let payload = serde_json::to_string(payload).err_kind(ErrorKind::Internal)?;
    conn.execute(
        r#"
        insert into pending_task (type, payload, attempts, max_attempts, next_retry_at,
                                  status, created_at, updated_at)
                          values (:type, :payload, 0, :max_attempts, :next_retry_at,
                                  'pending', :now, :now)
        "#,
        named_params! {
            ":type": type_.as_str(),
            ":payload": payload,
            ":max_attempts": max_attempts,
            ":next_retry_at": now.0,
            ":now": now.0,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(conn.last_insert_rowid())
}

/// Claims up to `limit` runnable tasks of the given type, atomically moving
/// each `pending → processing`. Tasks another worker claimed between the
/// select and the update are skipped.
pub fn claim_ready(
    conn: &Connection,
    type_: TaskType,
    now: Time,
    limit: usize,
) -> Result<Vec<Task>, Error> {
    let mut stmt = conn
        .prepare_cached(&format!(
            r#"
            select {TASK_COLS} from pending_task
            where status = 'pending' and type = :type and next_retry_at <= :now
            order by next_retry_at
            limit :limit
            "#
        ))
        .err_kind(ErrorKind::Internal)?;
    let candidates = stmt
        .query_map(
            named_params! {":type": type_.as_str(), ":now": now.0, ":limit": limit as i64},
            task_from_row,
        )
        .err_kind(ErrorKind::Internal)?
        .collect::<rusqlite::Result<Vec<Task>>>()
        .err_kind(ErrorKind::Internal)?;
    let mut claimed = Vec::with_capacity(candidates.len());
    for mut t in candidates {
        let n = conn
            .execute(
                r#"
                update pending_task set status = 'processing', updated_at = :now
                where id = :id and status = 'pending'
                "#,
                named_params! {":now": now.0, ":id": t.id},
            )
            .err_kind(ErrorKind::Internal)?;
        if n == 1 {
            t.status = TaskStatus::Processing;
            claimed.push(t);
        }
    }
    Ok(claimed)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Task>, Error> {
    conn.query_row(
        &format!("select {TASK_COLS} from pending_task where id = :id"),
        named_params! {":id": id},
        task_from_row,
    )
    .optional()
    .err_kind(ErrorKind::Internal)
}

/// Marks a claimed task done.
pub fn complete(conn: &Connection, id: i64, now: Time) -> Result<(), Error> {
    conn.execute(
        r#"
        update pending_task
        set status = 'completed', attempts = attempts + 1, last_error = null, updated_at = :now
        where id = :id
        "#,
        named_params! {":now": now.0, ":id": id},
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(())
}

/// Records a failed attempt: back to `pending` with a retry time, or
/// `failed` once attempts are exhausted. Returns the resulting status.
pub fn record_failure(
    conn: &Connection,
    id: i64,
    error: &str,
    next_retry_at: Time,
    now: Time,
) -> Result<TaskStatus, Error> {
    let (attempts, max_attempts): (i32, i32) = conn
        .query_row(
            "select attempts, max_attempts from pending_task where id = :id",
            named_params! {":id": id},
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .err_kind(ErrorKind::Internal)?;
    let attempts = attempts + 1;
    let status = if attempts >= max_attempts {
        TaskStatus::Failed
    } else {
        TaskStatus::Pending
    };
    conn.execute(
        r#"
        update pending_task
        set status = :status, attempts = :attempts, last_error = :error,
            next_retry_at = :next_retry_at, updated_at = :now
        where id = :id
        "#,
        named_params! {
            ":status": status.as_str(),
            ":attempts": attempts,
            ":error": error,
            ":next_retry_at": next_retry_at.0,
            ":now": now.0,
            ":id": id,
        },
    )
    .err_kind(ErrorKind::Internal)?;
    Ok(status)
}

/// Janitor: returns tasks stranded in `processing` since before `stuck_before`
/// to `pending`.
pub fn requeue_stuck(conn: &Connection, stuck_before: Time, now: Time) -> Result<usize, Error> {
    conn.execute(
        r#"
        update pending_task
        set status = 'pending', next_retry_at = :now, updated_at = :now
        where status = 'processing' and updated_at < :stuck_before
        "#,
        named_params! {":stuck_before": stuck_before.0, ":now": now.0},
    )
    .err_kind(ErrorKind::Internal)
}

/// Janitor: retention for finished tasks.
pub fn delete_finished(
    conn: &Connection,
    completed_before: Time,
    failed_before: Time,
) -> Result<usize, Error> {
    conn.execute(
        r#"
        delete from pending_task
        where (status = 'completed' and updated_at < :completed_before)
           or (status = 'failed' and updated_at < :failed_before)
        "#,
        named_params! {":completed_before": completed_before.0, ":failed_before": failed_before.0},
    )
    .err_kind(ErrorKind::Internal)
}

/// Queue depths by (type, status), for the status endpoint.
pub fn counts(conn: &Connection) -> Result<Vec<(String, String, i64)>, Error> {
    let mut stmt = conn
        .prepare_cached(
            "select type, status, count(*) from pending_task group by type, status",
        )
        .err_kind(ErrorKind::Internal)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .err_kind(ErrorKind::Internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .err_kind(ErrorKind::Internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use serde_json::json;

    #[test]
    fn claim_is_exclusive() {
        let conn = testutil::conn();
        let id = enqueue(&conn, TaskType::Upload, &json!({"video_id": 1}), 5, Time(100)).unwrap();
        let first = claim_ready(&conn, TaskType::Upload, Time(100), 10).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);
        assert_eq!(first[0].status, TaskStatus::Processing);
        // A second claim finds nothing.
        assert!(claim_ready(&conn, TaskType::Upload, Time(100), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn claim_respects_type_and_retry_time() {
        let conn = testutil::conn();
        enqueue(&conn, TaskType::Notify, &json!({}), 3, Time(100)).unwrap();
        assert!(claim_ready(&conn, TaskType::Upload, Time(100), 10)
            .unwrap()
            .is_empty());
        // Not yet due.
        assert!(claim_ready(&conn, TaskType::Notify, Time(99), 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            claim_ready(&conn, TaskType::Notify, Time(100), 10).unwrap().len(),
            1
        );
    }

    #[test]
    fn failure_retries_then_exhausts() {
        let conn = testutil::conn();
        let id = enqueue(&conn, TaskType::Notify, &json!({}), 3, Time(100)).unwrap();
        for attempt in 1..=3i32 {
            let claimed = claim_ready(&conn, TaskType::Notify, Time(1000 * attempt as i64), 10)
                .unwrap();
            assert_eq!(claimed.len(), 1, "attempt {attempt}");
            let status = record_failure(
                &conn,
                id,
                "connection refused",
                Time(1000 * attempt as i64 + 30),
                Time(1000 * attempt as i64),
            )
            .unwrap();
            if attempt < 3 {
                assert_eq!(status, TaskStatus::Pending);
            } else {
                assert_eq!(status, TaskStatus::Failed);
            }
        }
        let t = get(&conn, id).unwrap().unwrap();
        assert_eq!(t.attempts, 3);
        assert!(t.attempts <= t.max_attempts);
        assert_eq!(t.last_error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn completed_task_records_success() {
        let conn = testutil::conn();
        let id = enqueue(&conn, TaskType::Upload, &json!({}), 5, Time(100)).unwrap();
        claim_ready(&conn, TaskType::Upload, Time(100), 1).unwrap();
        complete(&conn, id, Time(101)).unwrap();
        let t = get(&conn, id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.attempts, 1);
        assert_eq!(t.last_error, None);
    }

    #[test]
    fn stuck_tasks_return_to_pending() {
        let conn = testutil::conn();
        let id = enqueue(&conn, TaskType::Upload, &json!({}), 5, Time(100)).unwrap();
        claim_ready(&conn, TaskType::Upload, Time(100), 1).unwrap();
        // Not stuck yet at t=400 with a 600 s deadline.
        assert_eq!(requeue_stuck(&conn, Time(0), Time(400)).unwrap(), 0);
        assert_eq!(requeue_stuck(&conn, Time(200), Time(800)).unwrap(), 1);
        let t = get(&conn, id).unwrap().unwrap();
        assert_eq!(t.status, TaskStatus::Pending);
        // And it is immediately claimable again.
        assert_eq!(
            claim_ready(&conn, TaskType::Upload, Time(800), 1).unwrap().len(),
            1
        );
    }

    #[test]
    fn retention_deletes_by_status() {
        let conn = testutil::conn();
        let done = enqueue(&conn, TaskType::Upload, &json!({}), 5, Time(100)).unwrap();
        claim_ready(&conn, TaskType::Upload, Time(100), 1).unwrap();
        complete(&conn, done, Time(100)).unwrap();
        let failed = enqueue(&conn, TaskType::Notify, &json!({}), 1, Time(100)).unwrap();
        claim_ready(&conn, TaskType::Notify, Time(100), 1).unwrap();
        record_failure(&conn, failed, "x", Time(130), Time(100)).unwrap();
        // completed: 7-day cutoff passed; failed: 30-day cutoff not yet.
        let n = delete_finished(&conn, Time(200), Time(50)).unwrap();
        assert_eq!(n, 1);
        assert!(get(&conn, done).unwrap().is_none());
        assert!(get(&conn, failed).unwrap().is_some());
    }

    #[test]
    fn counts_by_type_and_status() {
        let conn = testutil::conn();
        enqueue(&conn, TaskType::Upload, &json!({}), 5, Time(100)).unwrap();
        enqueue(&conn, TaskType::Upload, &json!({}), 5, Time(100)).unwrap();
        enqueue(&conn, TaskType::Notify, &json!({}), 3, Time(100)).unwrap();
        let c = counts(&conn).unwrap();
        assert!(c.contains(&("upload".to_owned(), "pending".to_owned(), 2)));
        assert!(c.contains(&("notify".to_owned(), "pending".to_owned(), 1)));
    }
}
