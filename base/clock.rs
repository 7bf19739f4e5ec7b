// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Clock interface and implementations for testability.
//!
//! Scheduling decisions (retry math, rate limiting, settling heuristics)
//! read the clock through [`Clocks`] so tests can drive them with
//! [`SimulatedClocks`] instead of sleeping. Actual waiting is tokio's job;
//! this trait only answers "what time is it".

use crate::time::Time;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration as StdDuration, Instant, SystemTime, UNIX_EPOCH};
use tracing::warn;

pub trait Clocks: Send + Sync + 'static {
    /// The current wall-clock time.
    fn now(&self) -> Time;

    /// Time since an arbitrary epoch, from a monotonic clock.
    fn monotonic(&self) -> StdDuration;
}

#[derive(Copy, Clone, Default)]
pub struct RealClocks;

fn process_start() -> Instant {
    static START: OnceLock<Instant> = OnceLock::new();
    *START.get_or_init(Instant::now)
}

impl Clocks for RealClocks {
    fn now(&self) -> Time {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Time(d.as_secs() as i64),
            Err(e) => {
                // Clock before 1970; carry on with 0 rather than panicking.
                warn!(err = %e, "system clock is before the epoch");
                Time(0)
            }
        }
    }

    fn monotonic(&self) -> StdDuration {
        Instant::now().duration_since(process_start())
    }
}

/// Warns when a guarded section took longer than a second, using a lazily
/// built label.
pub struct TimerGuard<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> {
    clocks: &'a C,
    label_f: Option<F>,
    start: StdDuration,
}

impl<'a, C: Clocks + ?Sized, S: AsRef<str>, F: FnOnce() -> S + 'a> TimerGuard<'a, C, S, F> {
    pub fn new(clocks: &'a C, label_f: F) -> Self {
        TimerGuard {
            clocks,
            label_f: Some(label_f),
            start: clocks.monotonic(),
        }
    }
}

impl<'a, C, S, F> Drop for TimerGuard<'a, C, S, F>
where
    C: Clocks + ?Sized,
    S: AsRef<str>,
    F: FnOnce() -> S + 'a,
{
    fn drop(&mut self) {
        let elapsed = self.clocks.monotonic() - self.start;
        if elapsed.as_secs() >= 1 {
            let label_f = self.label_f.take().unwrap();
            warn!("{} took {:?}!", label_f().as_ref(), elapsed);
        }
    }
}

/// Simulated clock for testing; advances only on [`SimulatedClocks::advance`].
#[derive(Clone)]
pub struct SimulatedClocks(Arc<SimulatedClocksInner>);

struct SimulatedClocksInner {
    boot: Time,
    uptime: Mutex<StdDuration>,
}

impl SimulatedClocks {
    pub fn new(boot: Time) -> Self {
        SimulatedClocks(Arc::new(SimulatedClocksInner {
            boot,
            uptime: Mutex::new(StdDuration::ZERO),
        }))
    }

    pub fn advance(&self, how_long: StdDuration) {
        let mut l = self.0.uptime.lock().unwrap();
        *l += how_long;
    }
}

impl Clocks for SimulatedClocks {
    fn now(&self) -> Time {
        self.0.boot + crate::time::Duration::from_std(*self.0.uptime.lock().unwrap())
    }

    fn monotonic(&self) -> StdDuration {
        *self.0.uptime.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_advance() {
        let c = SimulatedClocks::new(Time(1000));
        assert_eq!(c.now(), Time(1000));
        c.advance(StdDuration::from_secs(90));
        assert_eq!(c.now(), Time(1090));
        assert_eq!(c.monotonic(), StdDuration::from_secs(90));
    }

    #[test]
    fn real_monotonic_is_monotonic() {
        let c = RealClocks;
        let a = c.monotonic();
        let b = c.monotonic();
        assert!(b >= a);
    }
}
