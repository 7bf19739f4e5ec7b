// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Pitchside NVR's state store and the query logic layered on it.
//!
//! Everything persistent lives in a single SQLite file (`videos.db`): the
//! disk pool's records, the segment and chunk indexes, clip (video) records,
//! bookings, the durable task queue, and the `system_config` table. See
//! `schema.sql` for a detailed description.

pub mod bookings;
pub mod chunks;
pub mod coverage;
pub mod db;
pub mod disks;
pub mod segments;
pub mod sysconf;
pub mod tasks;
pub mod testutil;
pub mod videos;

pub use crate::bookings::Booking;
pub use crate::chunks::Chunk;
pub use crate::coverage::{CoveragePlan, PlanEntry, Source};
pub use crate::db::Database;
pub use crate::disks::Disk;
pub use crate::segments::Segment;
pub use crate::tasks::{Task, TaskStatus, TaskType};
pub use crate::videos::{Video, VideoStatus};
