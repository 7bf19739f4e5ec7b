// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Time and durations as whole unix seconds.
//!
//! Segment boundaries, booking windows, and retry schedules all work at
//! 1-second resolution, so that is the native unit here. The local wall
//! clock appears only at the filesystem boundary: segment filenames embed
//! local time, and [`format_local`]/[`parse_local`] are the single place
//! where the conversion happens.

use chrono::{Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Timestamp format embedded in segment filenames and chunk names.
pub const FILENAME_FMT: &str = "%Y%m%d_%H%M%S";

/// A wall-clock time, as whole seconds since the unix epoch.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct Time(pub i64);

/// A nonnegative-or-negative span of whole seconds.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct Duration(pub i64);

impl Time {
    pub fn as_unix(self) -> i64 {
        self.0
    }
}

impl Duration {
    pub const fn seconds(s: i64) -> Self {
        Duration(s)
    }

    pub const fn minutes(m: i64) -> Self {
        Duration(m * 60)
    }

    pub const fn hours(h: i64) -> Self {
        Duration(h * 3600)
    }

    pub const fn days(d: i64) -> Self {
        Duration(d * 86400)
    }

    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// Converts to a `std::time::Duration`, clamping negatives to zero.
    pub fn to_std(self) -> std::time::Duration {
        std::time::Duration::from_secs(self.0.max(0) as u64)
    }

    pub fn from_std(d: std::time::Duration) -> Self {
        Duration(d.as_secs() as i64)
    }
}

impl Add<Duration> for Time {
    type Output = Time;
    fn add(self, rhs: Duration) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl AddAssign<Duration> for Time {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl Sub<Duration> for Time {
    type Output = Time;
    fn sub(self, rhs: Duration) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl SubAssign<Duration> for Time {
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 -= rhs.0;
    }
}

impl Sub<Time> for Time {
    type Output = Duration;
    fn sub(self, rhs: Time) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl Add<Duration> for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0 + rhs.0)
    }
}

impl Sub<Duration> for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration(self.0 - rhs.0)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Local.timestamp_opt(self.0, 0).single() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%z")),
            None => write!(f, "@{}", self.0),
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = self.0;
        if s < 0 {
            write!(f, "-")?;
            s = -s;
        }
        let (h, rem) = (s / 3600, s % 3600);
        let (m, sec) = (rem / 60, rem % 60);
        if h > 0 {
            write!(f, "{h}h{m:02}m{sec:02}s")
        } else if m > 0 {
            write!(f, "{m}m{sec:02}s")
        } else {
            write!(f, "{sec}s")
        }
    }
}

/// Renders `t` in the appliance's local zone with a `strftime` format.
pub fn format_local(t: Time, fmt: &str) -> String {
    match Local.timestamp_opt(t.0, 0).single() {
        Some(dt) => dt.format(fmt).to_string(),
        None => format!("@{}", t.0),
    }
}

/// Parses a local-zone timestamp rendered with `fmt`; returns `None` when the
/// string doesn't match or names a nonexistent local time (DST gap).
pub fn parse_local(s: &str, fmt: &str) -> Option<Time> {
    let naive = NaiveDateTime::parse_from_str(s, fmt).ok()?;
    // `earliest` resolves DST-fold ambiguity deterministically.
    let dt = Local.from_local_datetime(&naive).earliest()?;
    Some(Time(dt.timestamp()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let t = Time(1_700_000_000);
        assert_eq!(t + Duration::minutes(1) - t, Duration::seconds(60));
        assert_eq!(t - Duration::hours(1), Time(1_700_000_000 - 3600));
        assert_eq!(Duration::days(7).as_secs(), 604_800);
    }

    #[test]
    fn duration_display() {
        assert_eq!(Duration::seconds(5).to_string(), "5s");
        assert_eq!(Duration::seconds(65).to_string(), "1m05s");
        assert_eq!(Duration::seconds(3661).to_string(), "1h01m01s");
        assert_eq!(Duration::seconds(-30).to_string(), "-30s");
    }

    #[test]
    fn negative_duration_to_std_clamps() {
        assert_eq!(Duration::seconds(-5).to_std(), std::time::Duration::ZERO);
    }

    #[test]
    fn filename_roundtrip() {
        // Mid-January noon: not a DST transition instant in any zone the
        // appliance plausibly runs in.
        let t = parse_local("20240115_120000", FILENAME_FMT).unwrap();
        assert_eq!(format_local(t, FILENAME_FMT), "20240115_120000");
        let t2 = parse_local("20240115_120100", FILENAME_FMT).unwrap();
        assert_eq!(t2 - t, Duration::minutes(1));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_local("not-a-time", FILENAME_FMT), None);
        assert_eq!(parse_local("2024011_120000", FILENAME_FMT), None);
    }
}
