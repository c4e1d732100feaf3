// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local layer: the single-hop wireless side of the fabric.
//!
//! The local layer carries framed, encrypted [`Message`]s between a node and
//! its wireless peers. It is a capability set, not a class hierarchy: nodes
//! are generic over [`LocalLayer`], and the layer delivers inbound traffic
//! upward through a non-owning [`LocalNode`] observer handle set once at
//! construction. The application owns both and wires them.

mod adapter;
mod espnow;

pub use adapter::{Adapter, AdapterError, RecvCallback, SendCallback};
pub use espnow::{BridgeConn, EspNow, EspNowConfig, SEND_BUCKETS};

use crate::addr::MacAddr;
use crate::message::Message;
use std::sync::{Arc, Weak};

/// Downward capability: what a node can ask of its local layer.
pub trait LocalLayer: Send + Sync + 'static {
    /// Sends `msg` to its destination peer, blocking until the link-layer
    /// delivery outcome is known. An all-zeroes destination address means
    /// "the discovered bridge".
    fn send(&self, msg: &Message) -> bool;

    /// This node's own wireless address.
    fn local_addr(&self) -> MacAddr;

    /// Installs the node observer for upward delivery. Called once, by the
    /// node constructor.
    fn set_node(&self, node: Weak<dyn LocalNode>);
}

/// Upward capability: how the local layer reaches its attached node.
pub trait LocalNode: Send + Sync {
    /// Delivers a received message for dispatch. `rssi` is the received
    /// signal strength in dBm, when the driver reports one.
    fn receive_local(self: Arc<Self>, msg: Message, rssi: Option<i32>);

    /// Re-sends subscribe requests for every topic currently in the node's
    /// subscription database. Called by the layer after (re)connecting.
    fn resubscribe_all(&self);
}
