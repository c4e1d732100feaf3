// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared test harness: an in-memory wireless fabric.
//!
//! Every registered port is an [`Adapter`]; frames sent on a channel reach
//! all other ports tuned to it (unicast reaches just the addressee).
//! Deliveries and send confirmations run on fresh threads, matching the
//! adapter contract real drivers must honor.

#![allow(dead_code)]

use parking_lot::{Mutex, RwLock};
use spsp::local::{RecvCallback, SendCallback};
use spsp::wifi::ChannelRestrictions;
use spsp::{Adapter, AdapterError, FarLayer, FarNode, MacAddr, WifiChannelControl};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Default received signal strength when none is configured for a link.
const DEFAULT_RSSI: i32 = -50;

struct PortState {
    addr: MacAddr,
    channel: AtomicU8,
    recv_cb: RwLock<Option<RecvCallback>>,
    send_cb: RwLock<Option<SendCallback>>,
    /// Every frame this port transmitted: `(dst, frame)`.
    frames_out: Mutex<Vec<(MacAddr, Vec<u8>)>>,
}

struct FabricInner {
    ports: Mutex<HashMap<MacAddr, Arc<PortState>>>,
    /// Signal strength seen by `to` for frames from `from`.
    rssi: Mutex<HashMap<(MacAddr, MacAddr), i32>>,
}

/// In-memory radio medium.
#[derive(Clone)]
pub struct Fabric {
    inner: Arc<FabricInner>,
}

impl Fabric {
    pub fn new() -> Self {
        Fabric {
            inner: Arc::new(FabricInner {
                ports: Mutex::new(HashMap::new()),
                rssi: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Registers a port with `addr` on channel 1 and returns its adapter
    /// and WiFi control handles.
    pub fn port(&self, addr: MacAddr) -> (Port, PortWifi) {
        self.port_with_channels(addr, ChannelRestrictions { low: 1, high: 11 })
    }

    pub fn port_with_channels(
        &self,
        addr: MacAddr,
        restrictions: ChannelRestrictions,
    ) -> (Port, PortWifi) {
        let state = Arc::new(PortState {
            addr,
            channel: AtomicU8::new(restrictions.low),
            recv_cb: RwLock::new(None),
            send_cb: RwLock::new(None),
            frames_out: Mutex::new(Vec::new()),
        });
        self.inner.ports.lock().insert(addr, Arc::clone(&state));

        let port = Port {
            state: Arc::clone(&state),
            fabric: Arc::clone(&self.inner),
        };
        let wifi = PortWifi {
            state,
            restrictions,
        };
        (port, wifi)
    }

    /// Configures the signal strength `to` sees for frames from `from`.
    pub fn set_rssi(&self, from: MacAddr, to: MacAddr, rssi: i32) {
        self.inner.rssi.lock().insert((from, to), rssi);
    }

    /// Frames transmitted by `addr` so far.
    pub fn frames_from(&self, addr: MacAddr) -> Vec<(MacAddr, Vec<u8>)> {
        self.inner
            .ports
            .lock()
            .get(&addr)
            .map(|p| p.frames_out.lock().clone())
            .unwrap_or_default()
    }
}

/// One endpoint of the fabric; implements the driver adapter contract.
#[derive(Clone)]
pub struct Port {
    state: Arc<PortState>,
    fabric: Arc<FabricInner>,
}

impl Adapter for Port {
    fn send(&self, dst: MacAddr, frame: &[u8]) -> Result<(), AdapterError> {
        self.state.frames_out.lock().push((dst, frame.to_vec()));

        let src = self.state.addr;
        let channel = self.state.channel.load(Ordering::SeqCst);

        // Snapshot receivers tuned to our channel
        let receivers: Vec<Arc<PortState>> = {
            let ports = self.fabric.ports.lock();
            ports
                .values()
                .filter(|p| {
                    p.addr != src
                        && p.channel.load(Ordering::SeqCst) == channel
                        && (dst.is_broadcast() || p.addr == dst)
                })
                .cloned()
                .collect()
        };

        // Unicast without a reachable addressee gets no link-layer ACK
        let delivered = dst.is_broadcast() || !receivers.is_empty();

        for receiver in receivers {
            let rssi = self
                .fabric
                .rssi
                .lock()
                .get(&(src, receiver.addr))
                .copied()
                .unwrap_or(DEFAULT_RSSI);
            let frame = frame.to_vec();
            // Fresh thread per delivery: receivers may send from their
            // receive path.
            std::thread::spawn(move || {
                if let Some(cb) = receiver.recv_cb.read().as_ref() {
                    cb(src, frame, rssi);
                }
            });
        }

        // Send confirmation from its own thread, never the caller's
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || {
            if let Some(cb) = state.send_cb.read().as_ref() {
                cb(dst, delivered);
            }
        });

        Ok(())
    }

    fn add_peer(&self, _peer: MacAddr) -> Result<(), AdapterError> {
        Ok(())
    }

    fn remove_peer(&self, _peer: MacAddr) -> Result<(), AdapterError> {
        Ok(())
    }

    fn set_recv_cb(&self, cb: RecvCallback) {
        *self.state.recv_cb.write() = Some(cb);
    }

    fn set_send_cb(&self, cb: SendCallback) {
        *self.state.send_cb.write() = Some(cb);
    }

    fn local_addr(&self) -> MacAddr {
        self.state.addr
    }
}

/// Channel control bound to a fabric port.
#[derive(Clone)]
pub struct PortWifi {
    state: Arc<PortState>,
    restrictions: ChannelRestrictions,
}

impl WifiChannelControl for PortWifi {
    fn channel(&self) -> u8 {
        self.state.channel.load(Ordering::SeqCst)
    }

    fn set_channel(&self, channel: u8) {
        self.state.channel.store(channel, Ordering::SeqCst);
    }

    fn channel_restrictions(&self) -> ChannelRestrictions {
        self.restrictions
    }
}

/// Far-layer double recording all downward calls.
pub struct RecordingFar {
    pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub subscribed: Mutex<Vec<String>>,
    pub unsubscribed: Mutex<Vec<String>>,
    pub subscribe_ok: AtomicBool,
    node: RwLock<Option<Weak<dyn FarNode>>>,
}

impl RecordingFar {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingFar {
            published: Mutex::new(Vec::new()),
            subscribed: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            subscribe_ok: AtomicBool::new(true),
            node: RwLock::new(None),
        })
    }

    /// Delivers a message as if it came from upstream.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        if let Some(node) = self.node.read().as_ref().and_then(Weak::upgrade) {
            node.receive_far(topic, payload);
        }
    }
}

impl FarLayer for RecordingFar {
    fn publish(&self, source: &str, topic: &str, payload: &[u8]) -> bool {
        self.published
            .lock()
            .push((source.into(), topic.into(), payload.to_vec()));
        true
    }

    fn subscribe(&self, topic: &str) -> bool {
        if self.subscribe_ok.load(Ordering::SeqCst) {
            self.subscribed.lock().push(topic.into());
            true
        } else {
            false
        }
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        self.unsubscribed.lock().push(topic.into());
        true
    }

    fn set_node(&self, node: Weak<dyn FarNode>) {
        *self.node.write() = Some(node);
    }
}

/// Bridge reporting with every flag off, so tests can count exact far
/// publishes.
pub fn quiet_reporting() -> spsp::BridgeReporting {
    spsp::BridgeReporting {
        version: false,
        probe_payload: false,
        rssi_on_probe: false,
        rssi_on_pub: false,
        rssi_on_sub: false,
        rssi_on_unsub: false,
    }
}

/// Client reporting with RSSI reports off.
pub fn quiet_client_reporting() -> spsp::ClientReporting {
    spsp::ClientReporting {
        rssi_on_probe: false,
    }
}

/// Polls `cond` until it holds or two seconds pass.
pub fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
