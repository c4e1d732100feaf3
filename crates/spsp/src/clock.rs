// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock access for time synchronization.
//!
//! A bridge answers `TIME_REQ` with the current wall-clock time in
//! milliseconds; a client applies a validated `TIME_RES` timestamp to the
//! system clock. Setting the clock is a privileged platform call and may
//! fail; the caller treats that as a failed synchronization.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sets the wall clock to `millis` since the Unix epoch.
///
/// Returns false when the platform call fails (e.g. missing privileges) or
/// the platform offers no way to set the clock.
#[cfg(unix)]
pub fn set_wall_clock(millis: u64) -> bool {
    let tv = libc::timeval {
        tv_sec: (millis / 1000) as libc::time_t,
        tv_usec: ((millis % 1000) * 1000) as libc::suseconds_t,
    };
    // SAFETY: settimeofday reads the timeval and a null timezone pointer.
    unsafe { libc::settimeofday(&tv, std::ptr::null()) == 0 }
}

/// Platforms without a supported clock-setting call fail the sync.
#[cfg(not(unix))]
pub fn set_wall_clock(_millis: u64) -> bool {
    false
}
