// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT far layer.
//!
//! Generic over a platform [`MqttAdapter`] that owns the actual broker
//! connection. This layer adds the SPSP topic scheme
//! (`<prefix>/<source>/<topic>`), blocks construction until the first
//! successful connection, and turns later reconnections into a
//! `resubscribe_all` on the attached node.

use crate::far::{ConnectionError, FarLayer, FarNode};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Connected callback, fired by the adapter on every successful
/// (re)connection to the broker.
pub type MqttConnectedCallback = Box<dyn Fn() + Send + Sync>;

/// Subscription data callback: `(topic, payload)`.
pub type MqttSubDataCallback = Box<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Platform MQTT client capability.
///
/// Concrete implementations (an `esp-mqtt` wrapper, a mosquitto wrapper, a
/// test double) live outside this crate. `subscribe` and `unsubscribe`
/// block until the broker acknowledges; `publish` is fire-and-forget.
pub trait MqttAdapter: Send + Sync + 'static {
    fn publish(&self, topic: &str, payload: &[u8]) -> bool;
    fn subscribe(&self, topic: &str) -> bool;
    fn unsubscribe(&self, topic: &str) -> bool;

    /// Installs the connected callback. Set before connecting.
    fn set_connected_cb(&self, cb: MqttConnectedCallback);

    /// Installs the subscription data callback. Set before connecting.
    fn set_sub_data_cb(&self, cb: MqttSubDataCallback);
}

/// MQTT layer configuration.
#[derive(Clone)]
pub struct MqttConfig {
    /// Topic prefix; publishes go to `<prefix>/<source>/<topic>`.
    pub pub_topic_prefix: String,
    /// How long construction waits for the first successful connection.
    pub connection_timeout: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            pub_topic_prefix: "spsp".into(),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

/// Signal for the initial connection.
struct ConnectedSignal {
    connected: Mutex<bool>,
    cv: Condvar,
}

impl ConnectedSignal {
    fn new() -> Self {
        ConnectedSignal {
            connected: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn notify(&self) {
        let mut connected = self.connected.lock();
        *connected = true;
        self.cv.notify_all();
    }

    fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut connected = self.connected.lock();
        while !*connected {
            if self.cv.wait_until(&mut connected, deadline).timed_out() {
                return *connected;
            }
        }
        true
    }
}

struct Inner<A: MqttAdapter> {
    conf: MqttConfig,
    adapter: A,
    /// True until the constructor has seen the first connection.
    initializing: AtomicBool,
    signal: ConnectedSignal,
    node: RwLock<Option<Weak<dyn FarNode>>>,
}

/// MQTT far layer. Cheap to clone; clones share the connection.
pub struct Mqtt<A: MqttAdapter> {
    inner: Arc<Inner<A>>,
}

impl<A: MqttAdapter> Clone for Mqtt<A> {
    fn clone(&self) -> Self {
        Mqtt {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: MqttAdapter> Mqtt<A> {
    /// Creates the layer and blocks until the adapter reports its first
    /// successful connection, up to the configured timeout.
    pub fn new(adapter: A, conf: MqttConfig) -> Result<Self, ConnectionError> {
        let timeout = conf.connection_timeout;
        let inner = Arc::new(Inner {
            conf,
            adapter,
            initializing: AtomicBool::new(true),
            signal: ConnectedSignal::new(),
            node: RwLock::new(None),
        });

        let weak = Arc::downgrade(&inner);
        inner.adapter.set_connected_cb(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.connected_cb();
            }
        }));

        let weak = Arc::downgrade(&inner);
        inner.adapter.set_sub_data_cb(Box::new(move |topic, payload| {
            if let Some(inner) = weak.upgrade() {
                inner.sub_data_cb(topic, payload);
            }
        }));

        log::info!(
            "[MQTT] attempting connection with timeout {} ms",
            timeout.as_millis()
        );
        if !inner.signal.wait(timeout) {
            log::error!("[MQTT] connection timeout");
            return Err(ConnectionError::new("connection timeout"));
        }

        inner.initializing.store(false, Ordering::Release);
        log::info!("[MQTT] initialized");

        Ok(Mqtt { inner })
    }
}

impl<A: MqttAdapter> Inner<A> {
    fn connected_cb(&self) {
        if self.initializing.load(Ordering::Acquire) {
            self.signal.notify();
        } else {
            // Successful reconnection: renew all upstream subscriptions.
            log::info!("[MQTT] reconnected");
            if let Some(node) = self.node.read().as_ref().and_then(Weak::upgrade) {
                node.resubscribe_all();
            }
        }
    }

    fn sub_data_cb(&self, topic: &str, payload: &[u8]) {
        if let Some(node) = self.node.read().as_ref().and_then(Weak::upgrade) {
            node.receive_far(topic, payload);
        }
    }
}

impl<A: MqttAdapter> FarLayer for Mqtt<A> {
    fn publish(&self, source: &str, topic: &str, payload: &[u8]) -> bool {
        log::debug!(
            "[MQTT] publish: {} B to topic '{}' from {}",
            payload.len(),
            topic,
            source
        );
        let extended = format!("{}/{}/{}", self.inner.conf.pub_topic_prefix, source, topic);
        self.inner.adapter.publish(&extended, payload)
    }

    fn subscribe(&self, topic: &str) -> bool {
        log::debug!("[MQTT] subscribe to topic '{}'", topic);
        self.inner.adapter.subscribe(topic)
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        log::debug!("[MQTT] unsubscribe from topic '{}'", topic);
        self.inner.adapter.unsubscribe(topic)
    }

    fn set_node(&self, node: Weak<dyn FarNode>) {
        *self.inner.node.write() = Some(node);
    }
}
