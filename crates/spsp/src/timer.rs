// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Recurring timer with clean shutdown.
//!
//! Drives the subscription-database ticks on both node types. The callback
//! runs on a dedicated background thread; the first execution happens after
//! the first full interval, not immediately. Dropping the timer signals the
//! thread and joins it.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Periodic background timer.
///
/// Dropping the sender half of the stop channel disconnects the receiver and
/// unblocks the worker's `recv_timeout`, so shutdown needs no shared flag.
pub struct PeriodicTimer {
    /// Dropping this signals the worker to exit via channel disconnect.
    /// Must be dropped BEFORE joining the thread.
    stop_tx: Option<mpsc::Sender<()>>,
    /// Worker thread handle, joined on drop.
    thread: Option<JoinHandle<()>>,
}

impl PeriodicTimer {
    /// Starts a timer calling `cb` every `interval` on a thread named
    /// `name`.
    pub fn new<F>(name: &str, interval: Duration, mut cb: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Fixed cadence: schedule against absolute deadlines so a
                // slow callback does not accumulate drift.
                let mut next = Instant::now() + interval;
                loop {
                    let timeout = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(timeout) {
                        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            cb();
                            next += interval;
                        }
                    }
                }
            })
            .ok();

        PeriodicTimer {
            stop_tx: Some(stop_tx),
            thread,
        }
    }

    /// Signals the worker to stop and waits for it to finish.
    fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
