// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Far layer: the upstream pub/sub side of the fabric.
//!
//! A bridge forwards local traffic upward through a [`FarLayer`] (an MQTT
//! broker connection, or the in-process [`LocalBroker`]) and receives
//! subscription data back through the [`FarNode`] observer handle. Like the
//! local layer, this is a capability set: the bridge owns the layer, the
//! layer observes the bridge.

mod local_broker;
mod mqtt;

pub use local_broker::LocalBroker;
pub use mqtt::{
    Mqtt, MqttAdapter, MqttConfig, MqttConnectedCallback, MqttSubDataCallback,
};

use std::fmt;
use std::sync::{Arc, Weak};

/// Far-layer connection failure, fatal to the object being constructed.
#[derive(Debug)]
pub struct ConnectionError {
    what: String,
}

impl ConnectionError {
    pub fn new(what: impl Into<String>) -> Self {
        ConnectionError { what: what.into() }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection error: {}", self.what)
    }
}

impl std::error::Error for ConnectionError {}

/// Downward capability: what a bridge can ask of its far layer.
pub trait FarLayer: Send + Sync + 'static {
    /// Publishes `payload` under `topic` on behalf of `source` (a peer
    /// address string, or the bridge's own). Fire-and-forget in concrete
    /// transports.
    fn publish(&self, source: &str, topic: &str, payload: &[u8]) -> bool;

    /// Subscribes upstream to `topic`. Blocks until acknowledged in
    /// concrete transports.
    fn subscribe(&self, topic: &str) -> bool;

    /// Unsubscribes upstream from `topic`.
    fn unsubscribe(&self, topic: &str) -> bool;

    /// Installs the node observer for upward delivery. Called once, by the
    /// node constructor.
    fn set_node(&self, node: Weak<dyn FarNode>);
}

impl<T: FarLayer + ?Sized> FarLayer for Arc<T> {
    fn publish(&self, source: &str, topic: &str, payload: &[u8]) -> bool {
        (**self).publish(source, topic, payload)
    }

    fn subscribe(&self, topic: &str) -> bool {
        (**self).subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        (**self).unsubscribe(topic)
    }

    fn set_node(&self, node: Weak<dyn FarNode>) {
        (**self).set_node(node)
    }
}

/// Upward capability: how the far layer reaches its attached bridge.
pub trait FarNode: Send + Sync {
    /// Delivers subscription data received from upstream.
    fn receive_far(self: Arc<Self>, topic: &str, payload: &[u8]);

    /// Re-subscribes every topic currently in the node's subscription
    /// database. Called by the layer after a successful reconnection.
    fn resubscribe_all(&self);
}
