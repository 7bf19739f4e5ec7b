// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Exponential backoff with jitter, and retry helpers built on it.

use crate::shutdown;
use crate::Error;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// An exponential backoff policy: `base * 2^attempt`, capped.
#[derive(Copy, Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

/// Capture-worker restarts: 2 s, 4 s, 8 s, … capped at 5 min.
pub const CAPTURE: Backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(300));

/// Durable-queue retries: 30 s, 1 m, 2 m, … capped at 1 h.
pub const TASK: Backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(3600));

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Backoff { base, cap }
    }

    /// The undithered delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).unwrap_or(self.cap).min(self.cap)
    }

    /// [`Backoff::delay`] with ±25% jitter, so a fleet of failing workers
    /// doesn't reconnect in lockstep.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let d = self.delay(attempt);
        d.mul_f64(rand::thread_rng().gen_range(0.75..=1.25))
    }
}

/// A rolling-window restart budget.
///
/// `record` returns false once `limit` restarts have landed within `window`;
/// the caller is expected to go quiet for a while.
pub struct RestartBudget {
    window: Duration,
    limit: usize,
    events: VecDeque<Duration>,
}

impl RestartBudget {
    pub fn new(window: Duration, limit: usize) -> Self {
        RestartBudget {
            window,
            limit,
            events: VecDeque::new(),
        }
    }

    /// Records a restart at monotonic time `now`; false means over budget.
    pub fn record(&mut self, now: Duration) -> bool {
        while let Some(&front) = self.events.front() {
            if now.saturating_sub(front) > self.window {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.events.push_back(now);
        self.events.len() <= self.limit
    }

    pub fn count(&self) -> usize {
        self.events.len()
    }
}

/// Runs `f` up to `max_attempts` times with jittered backoff between
/// failures, honouring shutdown between attempts.
pub async fn with_backoff<T, F, Fut>(
    label: &str,
    backoff: Backoff,
    max_attempts: u32,
    shutdown_rx: &shutdown::Receiver,
    mut f: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(t) => return Ok(t),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(e);
                }
                let sleep_for = backoff.jittered(attempt - 1);
                warn!(
                    err = %e.chain(),
                    attempt,
                    "{label} failed; retrying in {sleep_for:?}"
                );
                shutdown_rx.check()?;
                tokio::time::sleep(sleep_for).await;
                shutdown_rx.check()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_and_caps() {
        let b = Backoff::new(Duration::from_secs(2), Duration::from_secs(300));
        assert_eq!(b.delay(0), Duration::from_secs(2));
        assert_eq!(b.delay(1), Duration::from_secs(4));
        assert_eq!(b.delay(2), Duration::from_secs(8));
        assert_eq!(b.delay(7), Duration::from_secs(256));
        assert_eq!(b.delay(8), Duration::from_secs(300));
        assert_eq!(b.delay(100), Duration::from_secs(300));
    }

    #[test]
    fn jitter_within_bounds() {
        let b = Backoff::new(Duration::from_secs(30), Duration::from_secs(3600));
        for attempt in 0..6 {
            let exact = b.delay(attempt);
            for _ in 0..50 {
                let j = b.jittered(attempt);
                assert!(j >= exact.mul_f64(0.75), "{j:?} < 0.75 * {exact:?}");
                assert!(j <= exact.mul_f64(1.25), "{j:?} > 1.25 * {exact:?}");
            }
        }
    }

    #[test]
    fn restart_budget_rolls() {
        let mut budget = RestartBudget::new(Duration::from_secs(3600), 3);
        assert!(budget.record(Duration::from_secs(0)));
        assert!(budget.record(Duration::from_secs(10)));
        assert!(budget.record(Duration::from_secs(20)));
        assert!(!budget.record(Duration::from_secs(30)));
        // Old events age out of the window.
        assert!(budget.record(Duration::from_secs(3621)));
        assert_eq!(budget.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn with_backoff_gives_up_after_max_attempts() {
        let (_tx, rx) = crate::shutdown::channel();
        let mut calls = 0u32;
        let r: Result<(), Error> = with_backoff(
            "test-op",
            Backoff::new(Duration::from_millis(1), Duration::from_millis(10)),
            3,
            &rx,
            || {
                calls += 1;
                async { Err(crate::err!(Unavailable, msg("nope"))) }
            },
        )
        .await;
        assert!(r.is_err());
        assert_eq!(calls, 3);
    }
}
