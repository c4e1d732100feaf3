// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # SPSP - Simple Publish/Subscribe Protocol
//!
//! A small publish/subscribe fabric connecting severely constrained
//! wireless endpoints ("clients") to a conventional messaging backend
//! ("far layer") by way of intermediary "bridges". Clients speak a compact,
//! encrypted, single-hop wireless protocol to a bridge; the bridge
//! translates between that protocol and an IP-based pub/sub system. Topic
//! semantics (slash-delimited levels, `+` single-level wildcard, terminal
//! `#` multi-level wildcard) mirror MQTT.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spsp::{Client, ClientConfig, EspNow, EspNowConfig};
//! # fn wiring(adapter: impl spsp::Adapter, wifi: impl spsp::WifiChannelControl) {
//! // Wireless engine over a platform driver adapter
//! let espnow = EspNow::new(adapter, wifi, EspNowConfig {
//!     ssid: 0x01020304,
//!     password: *b"01234567890123456789012345678901",
//!     ..EspNowConfig::default()
//! });
//!
//! // Client node on top of it
//! let client = Client::new(espnow.clone(), ClientConfig::default());
//!
//! // Discover the nearest bridge, then publish
//! if espnow.connect_to_bridge(None).is_some() {
//!     client.publish("sensors/temperature", b"21.5");
//! }
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                        Application                           |
//! |        Client / Bridge  (publish, subscribe, callbacks)      |
//! +--------------------------------------------------------------+
//! |  Local layer (ESP-NOW engine)      |  Far layer              |
//! |  framing | encryption | discovery  |  MQTT | local broker    |
//! +--------------------------------------------------------------+
//! |  Driver adapter (vendor ESP-NOW, 802.11 injection, mock)     |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Client`] | Wireless endpoint publishing/subscribing through a bridge |
//! | [`Bridge`] | Node bridging wireless peers to a far-layer backend |
//! | [`EspNow`] | Local-layer protocol engine over a driver [`Adapter`] |
//! | [`LocalBroker`] | In-process far layer (no upstream broker needed) |
//! | [`Mqtt`] | Far layer over a platform [`MqttAdapter`] |
//! | [`WildcardTrie`] | MQTT-style topic index used by both node types |
//!
//! Layers are capability traits, not class hierarchies: nodes are generic
//! over [`LocalLayer`] / [`FarLayer`], and each layer delivers inbound
//! traffic upward through a non-owning observer handle wired at node
//! construction. The application owns nodes and layers.

/// Peer addresses (6-byte MAC).
pub mod addr;
/// Wire packet serializer/deserializer.
pub mod codec;
/// Wall-clock access for time synchronization.
pub mod clock;
/// Keystream encryption of packet payloads.
pub mod crypto;
/// Far layer: upstream pub/sub transports.
pub mod far;
/// Local layer: the single-hop wireless protocol engine.
pub mod local;
/// Local-layer messages.
pub mod message;
/// Node types: clients and bridges.
pub mod node;
/// Cryptographically strong random bytes.
pub mod random;
/// Recurring timer with clean shutdown.
pub mod timer;
/// Topic index with `+`/`#` wildcard matching.
pub mod trie;
/// Wireless channel control capability.
pub mod wifi;

pub use addr::MacAddr;
pub use codec::{Codec, DecodeError, SerializeError};
pub use far::{ConnectionError, FarLayer, FarNode, LocalBroker, Mqtt, MqttAdapter, MqttConfig};
pub use local::{
    Adapter, AdapterError, BridgeConn, EspNow, EspNowConfig, LocalLayer, LocalNode,
};
pub use message::{Message, MessageType};
pub use node::{
    Bridge, BridgeConfig, BridgeReporting, Client, ClientConfig, ClientReporting,
    ClientSubDbConfig, SubscribeCb,
};
pub use random::RandomError;
pub use timer::PeriodicTimer;
pub use trie::WildcardTrie;
pub use wifi::{ChannelRestrictions, WifiChannelControl};

/// SPSP version string, exchanged in probes and version reports.
pub const VERSION: &str = "0.6.0";
