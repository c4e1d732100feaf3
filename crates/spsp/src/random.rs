// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cryptographically strong random bytes.
//!
//! Packet nonces must be unpredictable; a colliding nonce under the same
//! password would reuse a keystream. All randomness therefore comes from the
//! platform CSPRNG via `getrandom`.

use std::fmt;

/// Platform random generator failure.
///
/// Surfaced out of packet serialization when the OS entropy source fails.
#[derive(Debug)]
pub struct RandomError(getrandom::Error);

impl fmt::Display for RandomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "random generator failed: {}", self.0)
    }
}

impl std::error::Error for RandomError {}

/// Fills `buf` with cryptographically strong random bytes.
pub fn fill(buf: &mut [u8]) -> Result<(), RandomError> {
    getrandom::getrandom(buf).map_err(RandomError)
}
