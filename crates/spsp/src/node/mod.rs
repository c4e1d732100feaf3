// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node types: clients and bridges.
//!
//! A [`Client`] publishes and subscribes through its local layer only; a
//! [`Bridge`] additionally owns a far layer and translates between the two.
//! Both keep a wildcard-trie subscription database with lifetimes driven by
//! a periodic timer.

mod bridge;
mod client;

pub use bridge::{
    Bridge, BridgeConfig, BridgeReporting, BRIDGE_SUB_LIFETIME, BRIDGE_SUB_NO_EXPIRE,
};
pub use client::{Client, ClientConfig, ClientReporting, ClientSubDbConfig};

use crate::addr::MacAddr;
use std::sync::Arc;

/// Callback for incoming subscription data: `(topic, payload)`.
///
/// Shared by the node with every dispatch that matches, so it is reference
/// counted. Keep it short; long work belongs on a thread of its own.
pub type SubscribeCb = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Root of the reserved reporting topic namespace.
pub const REPORTING_TOPIC: &str = "_report";
/// RSSI reports: `_report/rssi/<peer_hex>`.
pub const REPORTING_RSSI_SUBTOPIC: &str = "rssi";
/// Probe payload reports: `_report/probe_payload/<peer_hex>`.
pub const REPORTING_PROBE_PAYLOAD_SUBTOPIC: &str = "probe_payload";
/// Node version publication: `_report/version`.
pub const REPORTING_VERSION_SUBTOPIC: &str = "version";

pub(crate) fn rssi_report_topic(addr: MacAddr) -> String {
    format!(
        "{}/{}/{}",
        REPORTING_TOPIC,
        REPORTING_RSSI_SUBTOPIC,
        addr.to_hex()
    )
}

pub(crate) fn probe_payload_report_topic(addr: MacAddr) -> String {
    format!(
        "{}/{}/{}",
        REPORTING_TOPIC,
        REPORTING_PROBE_PAYLOAD_SUBTOPIC,
        addr.to_hex()
    )
}

pub(crate) fn version_report_topic() -> String {
    format!("{}/{}", REPORTING_TOPIC, REPORTING_VERSION_SUBTOPIC)
}
