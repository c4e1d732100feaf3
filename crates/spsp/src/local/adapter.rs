// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wireless driver adapter interface.
//!
//! The engine delegates all wire I/O to an [`Adapter`]. Implementations wrap
//! whatever the platform offers: vendor ESP-NOW primitives, 802.11 action
//! frame injection, or an in-memory fabric for tests.

use crate::addr::MacAddr;
use std::fmt;

/// Receive callback: `(src, frame, rssi)`.
///
/// Must be invoked from a context that allows the callee to issue new
/// [`Adapter::send`] calls without self-deadlock; drivers whose receive path
/// holds internal locks detach delivery onto a fresh thread.
pub type RecvCallback = Box<dyn Fn(MacAddr, Vec<u8>, i32) + Send + Sync>;

/// Send callback: `(dst, delivered)`.
///
/// Fires exactly once per successful [`Adapter::send`] call, from a thread
/// that is never blocked by receive processing. When `send` returns an
/// error, no callback fires for that invocation.
pub type SendCallback = Box<dyn Fn(MacAddr, bool) + Send + Sync>;

/// Driver-reported failure (socket errors, peer registration, ...).
#[derive(Debug)]
pub struct AdapterError {
    what: String,
}

impl AdapterError {
    pub fn new(what: impl Into<String>) -> Self {
        AdapterError { what: what.into() }
    }
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter error: {}", self.what)
    }
}

impl std::error::Error for AdapterError {}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        AdapterError::new(e.to_string())
    }
}

/// Low-level wireless driver capability.
pub trait Adapter: Send + Sync + 'static {
    /// Transmits one frame to `dst`. Delivery is reported asynchronously
    /// through the send callback. For a broadcast destination, adapters may
    /// transmit without peer registration.
    fn send(&self, dst: MacAddr, frame: &[u8]) -> Result<(), AdapterError>;

    /// Registers `peer` for the duration of a send, on platforms that
    /// require it. May be a no-op.
    fn add_peer(&self, peer: MacAddr) -> Result<(), AdapterError>;

    /// Removes a previously registered `peer`. May be a no-op; idempotent
    /// removal is not required.
    fn remove_peer(&self, peer: MacAddr) -> Result<(), AdapterError>;

    /// Installs the receive callback. Set before any traffic flows.
    fn set_recv_cb(&self, cb: RecvCallback);

    /// Installs the send callback. Set before any traffic flows.
    fn set_send_cb(&self, cb: SendCallback);

    /// MAC address of the underlying interface.
    fn local_addr(&self) -> MacAddr;
}

impl<A: Adapter + ?Sized> Adapter for std::sync::Arc<A> {
    fn send(&self, dst: MacAddr, frame: &[u8]) -> Result<(), AdapterError> {
        (**self).send(dst, frame)
    }

    fn add_peer(&self, peer: MacAddr) -> Result<(), AdapterError> {
        (**self).add_peer(peer)
    }

    fn remove_peer(&self, peer: MacAddr) -> Result<(), AdapterError> {
        (**self).remove_peer(peer)
    }

    fn set_recv_cb(&self, cb: RecvCallback) {
        (**self).set_recv_cb(cb);
    }

    fn set_send_cb(&self, cb: SendCallback) {
        (**self).set_send_cb(cb);
    }

    fn local_addr(&self) -> MacAddr {
        (**self).local_addr()
    }
}
