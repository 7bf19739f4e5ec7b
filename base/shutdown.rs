// This file is part of Pitchside NVR, a sports-venue network video recorder.
// Copyright (C) 2026 The Pitchside NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Tools for propagating a graceful shutdown signal through the program.
//!
//! Dropping the single [`Sender`] requests shutdown. The [`Receiver`] can be
//! cloned freely, polled cheaply with [`Receiver::check`] inside loops, or
//! awaited in async code. Every long-running task takes a receiver; nothing
//! is fire-and-forget.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct ShutdownError;

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("shutdown requested")
    }
}

impl std::error::Error for ShutdownError {}

impl From<ShutdownError> for crate::Error {
    fn from(e: ShutdownError) -> Self {
        crate::Error::wrap(crate::ErrorKind::Cancelled, e)
    }
}

pub struct Sender(CancellationToken);

impl Drop for Sender {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

#[derive(Clone)]
pub struct Receiver(CancellationToken);

impl Receiver {
    pub fn check(&self) -> Result<(), ShutdownError> {
        if self.0.is_cancelled() {
            Err(ShutdownError)
        } else {
            Ok(())
        }
    }

    /// Resolves when shutdown is requested.
    pub async fn wait(&self) {
        self.0.cancelled().await
    }

    /// Waits up to `timeout`; `Ok(())` if the timeout elapsed first,
    /// `Err(ShutdownError)` if shutdown was requested.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), ShutdownError> {
        match tokio::time::timeout(timeout, self.0.cancelled()).await {
            Ok(()) => Err(ShutdownError),
            Err(_elapsed) => Ok(()),
        }
    }
}

/// Returns a sender and receiver for graceful shutdown.
pub fn channel() -> (Sender, Receiver) {
    let token = CancellationToken::new();
    (Sender(token.clone()), Receiver(token))
}

#[cfg(test)]
mod tests {
    #[test]
    fn simple_check() {
        let (tx, rx) = super::channel();
        rx.check().unwrap();
        drop(tx);
        rx.check().unwrap_err();
    }

    #[tokio::test]
    async fn wait_resolves_on_drop() {
        let (tx, rx) = super::channel();
        let h = tokio::spawn(async move { rx.wait().await });
        drop(tx);
        h.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout() {
        let (tx, rx) = super::channel();
        rx.wait_timeout(std::time::Duration::from_millis(10))
            .await
            .unwrap();
        drop(tx);
        rx.wait_timeout(std::time::Duration::from_secs(1000))
            .await
            .unwrap_err();
    }
}
