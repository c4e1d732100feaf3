// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge node.
//!
//! A bridge answers discovery probes, forwards peer publishes upward,
//! maintains the per-peer subscription database and fans far-layer messages
//! out to every matching subscriber. Remote entries expire unless renewed by
//! the client; the bridge's own in-process subscriptions never expire.
//!
//! The far layer is subscribed exactly once per distinct topic: on the first
//! insertion. The last removal triggers an upstream unsubscribe, so the set
//! of upstream subscriptions always equals the set of topics in the
//! database.

use crate::addr::MacAddr;
use crate::clock;
use crate::far::{FarLayer, FarNode};
use crate::local::{LocalLayer, LocalNode};
use crate::message::{Message, MessageType};
use crate::node::{
    probe_payload_report_topic, rssi_report_topic, version_report_topic, SubscribeCb,
};
use crate::timer::PeriodicTimer;
use crate::trie::WildcardTrie;
use crate::VERSION;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Default remote subscription lifetime, in timer ticks (minutes).
pub const BRIDGE_SUB_LIFETIME: u8 = 15;
/// Sentinel lifetime for entries that never expire (local subscriptions).
pub const BRIDGE_SUB_NO_EXPIRE: u8 = u8::MAX;

/// Bridge reporting options.
#[derive(Clone)]
pub struct BridgeReporting {
    /// Publish the SPSP version on construction.
    pub version: bool,
    /// Report the payload of `PROBE_REQ` (typically a firmware version).
    pub probe_payload: bool,
    /// Report RSSI on `PROBE_REQ`.
    pub rssi_on_probe: bool,
    /// Report RSSI on `PUB`.
    pub rssi_on_pub: bool,
    /// Report RSSI on `SUB_REQ`.
    pub rssi_on_sub: bool,
    /// Report RSSI on `UNSUB`.
    pub rssi_on_unsub: bool,
}

impl Default for BridgeReporting {
    fn default() -> Self {
        BridgeReporting {
            version: true,
            probe_payload: true,
            rssi_on_probe: true,
            rssi_on_pub: true,
            rssi_on_sub: true,
            rssi_on_unsub: true,
        }
    }
}

/// Bridge configuration. Everything here is optional.
#[derive(Clone)]
pub struct BridgeConfig {
    pub reporting: BridgeReporting,
    /// Subscription database tick interval. One remote lifetime unit is one
    /// tick, so the default minute gives [`BRIDGE_SUB_LIFETIME`] minutes.
    pub sub_db_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            reporting: BridgeReporting::default(),
            sub_db_interval: Duration::from_secs(60),
        }
    }
}

/// Single subscriber entry. Local subscriptions (zeroes address) carry the
/// callback and never expire.
struct SubEntry {
    lifetime: u8,
    cb: Option<SubscribeCb>,
}

type SubMap = HashMap<MacAddr, SubEntry>;

struct BridgeInner<L: LocalLayer, F: FarLayer> {
    /// Self-handle for background work spawned from handlers.
    this: Weak<BridgeInner<L, F>>,
    conf: BridgeConfig,
    local_layer: L,
    far_layer: F,
    sub_db: Mutex<WildcardTrie<SubMap>>,
}

/// Bridge node over a local layer `L` and a far layer `F`.
pub struct Bridge<L: LocalLayer, F: FarLayer> {
    inner: Arc<BridgeInner<L, F>>,
    _sub_db_timer: PeriodicTimer,
}

impl<L: LocalLayer, F: FarLayer> Bridge<L, F> {
    /// Creates a bridge over the two layers and attaches itself as both
    /// layers' node observer.
    pub fn new(local_layer: L, far_layer: F, conf: BridgeConfig) -> Self {
        let interval = conf.sub_db_interval;
        let inner = Arc::new_cyclic(|this| BridgeInner {
            this: this.clone(),
            conf,
            local_layer,
            far_layer,
            sub_db: Mutex::new(WildcardTrie::new()),
        });

        inner
            .local_layer
            .set_node(Arc::downgrade(&inner) as Weak<dyn LocalNode>);
        inner
            .far_layer
            .set_node(Arc::downgrade(&inner) as Weak<dyn FarNode>);

        let weak = Arc::downgrade(&inner);
        let timer = PeriodicTimer::new("spsp-bridge-subdb", interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.sub_db_tick();
            }
        });

        if inner.conf.reporting.version {
            inner.publish_version();
        }

        log::info!("[Bridge] initialized");
        Bridge {
            inner,
            _sub_db_timer: timer,
        }
    }

    /// Publishes `payload` to `topic` upstream, with this bridge's own MAC
    /// as the source.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        self.inner.publish(topic, payload)
    }

    /// Subscribes this bridge itself to `topic`; `cb` receives matching
    /// far-layer data. Never expires.
    pub fn subscribe<C>(&self, topic: &str, cb: C) -> bool
    where
        C: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        log::debug!("[Bridge] subscribing locally to topic '{}'", topic);
        self.inner
            .sub_db_insert(topic, MacAddr::zeroes(), Some(Arc::new(cb)))
    }

    /// Removes this bridge's own subscription to `topic`.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        log::debug!("[Bridge] unsubscribing locally from topic '{}'", topic);
        self.inner.sub_db_remove(topic, MacAddr::zeroes());
        true
    }

    /// Re-sends far-layer subscriptions for every stored topic.
    pub fn resubscribe_all(&self) {
        FarNode::resubscribe_all(&*self.inner);
    }
}

impl<L: LocalLayer, F: FarLayer> Drop for Bridge<L, F> {
    fn drop(&mut self) {
        log::info!("[Bridge] deinitialized");
    }
}

impl<L: LocalLayer, F: FarLayer> BridgeInner<L, F> {
    fn send_local(&self, msg: &Message) -> bool {
        log::info!("[Bridge] sending local msg: {}", msg);
        let delivered = self.local_layer.send(msg);
        if delivered {
            log::debug!("[Bridge] message delivered: {}", msg);
        } else {
            log::warn!("[Bridge] message not delivered: {}", msg);
        }
        delivered
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        log::debug!(
            "[Bridge] publishing locally: topic '{}', {} B payload",
            topic,
            payload.len()
        );
        self.far_layer
            .publish(&self.local_layer.local_addr().to_hex(), topic, payload)
    }

    fn publish_version(&self) {
        let _ = self.publish(&version_report_topic(), VERSION.as_bytes());
    }

    /// Publishes the RSSI of a message received from `addr`.
    /// Fire-and-forget; delivery status is not checked.
    fn publish_rssi(&self, addr: MacAddr, rssi: Option<i32>) {
        let Some(rssi) = rssi else { return };
        let Some(this) = self.this.upgrade() else { return };
        std::thread::spawn(move || {
            let _ = this.publish(&rssi_report_topic(addr), rssi.to_string().as_bytes());
        });
    }

    /// Inserts `addr` under `topic`, subscribing upstream first when the
    /// topic is brand new. A failed upstream subscribe inserts nothing.
    fn sub_db_insert(&self, topic: &str, addr: MacAddr, cb: Option<SubscribeCb>) -> bool {
        let mut db = self.sub_db.lock();

        if db.get(topic).is_none() {
            if !self.far_layer.subscribe(topic) {
                log::error!(
                    "[Bridge] sub DB: subscribe to topic '{}' failed, not inserting anything",
                    topic
                );
                return false;
            }
            db.insert(topic, SubMap::new());
        }

        let entry = if addr.is_zeroes() {
            SubEntry {
                lifetime: BRIDGE_SUB_NO_EXPIRE,
                cb,
            }
        } else {
            SubEntry {
                lifetime: BRIDGE_SUB_LIFETIME,
                cb: None,
            }
        };

        if addr.is_zeroes() {
            log::debug!(
                "[Bridge] sub DB: inserted local entry for topic '{}' (no expiration)",
                topic
            );
        } else {
            log::debug!(
                "[Bridge] sub DB: inserted {}@{} (expires in {} min)",
                addr,
                topic,
                entry.lifetime
            );
        }

        if let Some(map) = db.get_mut(topic) {
            map.insert(addr, entry);
        }
        true
    }

    /// Removes `addr` from `topic`, then drops topics left without
    /// subscribers.
    fn sub_db_remove(&self, topic: &str, addr: MacAddr) {
        {
            let mut db = self.sub_db.lock();
            let Some(map) = db.get_mut(topic) else {
                return;
            };
            map.remove(&addr);
            log::debug!("[Bridge] sub DB: removed addr {} on topic '{}'", addr, topic);
        }

        self.sub_db_remove_unused_topics();
    }

    fn process_probe_req(&self, req: &Message, rssi: Option<i32>) -> bool {
        if self.conf.reporting.rssi_on_probe {
            self.publish_rssi(req.addr, rssi);
        }
        if self.conf.reporting.probe_payload {
            let _ = self.publish(&probe_payload_report_topic(req.addr), &req.payload);
        }

        self.send_local(&Message {
            kind: MessageType::ProbeRes,
            addr: req.addr,
            topic: String::new(),
            payload: VERSION.as_bytes().to_vec(),
        })
    }

    fn process_pub(&self, req: &Message, rssi: Option<i32>) -> bool {
        if self.conf.reporting.rssi_on_pub {
            self.publish_rssi(req.addr, rssi);
        }
        self.far_layer
            .publish(&req.addr.to_hex(), &req.topic, &req.payload)
    }

    fn process_sub_req(&self, req: &Message, rssi: Option<i32>) -> bool {
        if self.conf.reporting.rssi_on_sub {
            self.publish_rssi(req.addr, rssi);
        }
        self.sub_db_insert(&req.topic, req.addr, None)
    }

    fn process_unsub(&self, req: &Message, rssi: Option<i32>) -> bool {
        if self.conf.reporting.rssi_on_unsub {
            self.publish_rssi(req.addr, rssi);
        }
        self.sub_db_remove(&req.topic, req.addr);
        true
    }

    fn process_time_req(&self, req: &Message) -> bool {
        self.send_local(&Message {
            kind: MessageType::TimeRes,
            addr: req.addr,
            topic: String::new(),
            payload: clock::now_millis().to_string().into_bytes(),
        })
    }

    /// Sends received subscription data down to a wireless peer.
    fn publish_sub_data(&self, addr: MacAddr, topic: &str, payload: &[u8]) -> bool {
        log::debug!(
            "[Bridge] sending SUB_DATA to {}: topic '{}', {} B payload",
            addr,
            topic,
            payload.len()
        );
        self.send_local(&Message {
            kind: MessageType::SubData,
            addr,
            topic: topic.to_string(),
            payload: payload.to_vec(),
        })
    }

    fn sub_db_tick(&self) {
        log::debug!("[Bridge] sub DB: tick running");

        self.sub_db_decrement_lifetimes();
        self.sub_db_remove_expired_entries();
        self.sub_db_remove_unused_topics();

        log::debug!("[Bridge] sub DB: tick done");
    }

    fn sub_db_decrement_lifetimes(&self) {
        let mut db = self.sub_db.lock();
        db.for_each_mut(|_, map| {
            for entry in map.values_mut() {
                if entry.lifetime != BRIDGE_SUB_NO_EXPIRE {
                    entry.lifetime = entry.lifetime.saturating_sub(1);
                }
            }
        });
    }

    fn sub_db_remove_expired_entries(&self) {
        let mut db = self.sub_db.lock();
        db.for_each_mut(|topic, map| {
            map.retain(|addr, entry| {
                if entry.lifetime == 0 {
                    log::debug!(
                        "[Bridge] sub DB: removed expired addr {} from topic '{}'",
                        addr,
                        topic
                    );
                    false
                } else {
                    true
                }
            });
        });
    }

    /// Unsubscribes upstream from topics with no subscribers left; a failed
    /// unsubscribe keeps the topic for retry on the next tick.
    fn sub_db_remove_unused_topics(&self) {
        let mut db = self.sub_db.lock();

        let mut unused = Vec::new();
        db.for_each(|topic, map| {
            if map.is_empty() {
                unused.push(topic.to_string());
            }
        });

        for topic in unused {
            if self.far_layer.unsubscribe(&topic) {
                db.remove(&topic);
                log::debug!("[Bridge] sub DB: removed unused topic '{}'", topic);
            } else {
                log::error!(
                    "[Bridge] sub DB: topic '{}' can't be unsubscribed, will try again in next tick",
                    topic
                );
            }
        }
    }
}

impl<L: LocalLayer, F: FarLayer> LocalNode for BridgeInner<L, F> {
    fn receive_local(self: Arc<Self>, msg: Message, rssi: Option<i32>) {
        match rssi {
            Some(rssi) => log::info!("[Bridge] received local msg: {} ({} dBm)", msg, rssi),
            None => log::info!("[Bridge] received local msg: {}", msg),
        }

        let processed = match msg.kind {
            MessageType::ProbeReq => self.process_probe_req(&msg, rssi),
            MessageType::Pub => self.process_pub(&msg, rssi),
            MessageType::SubReq => self.process_sub_req(&msg, rssi),
            MessageType::Unsub => self.process_unsub(&msg, rssi),
            MessageType::TimeReq => self.process_time_req(&msg),
            _ => false,
        };

        if processed {
            log::debug!("[Bridge] message processed: {}", msg);
        } else {
            log::warn!("[Bridge] message not processed: {}", msg);
        }
    }

    fn resubscribe_all(&self) {
        FarNode::resubscribe_all(self);
    }
}

impl<L: LocalLayer, F: FarLayer> FarNode for BridgeInner<L, F> {
    fn receive_far(self: Arc<Self>, topic: &str, payload: &[u8]) {
        log::debug!(
            "[Bridge] received far msg: topic '{}', {} B payload",
            topic,
            payload.len()
        );

        // Snapshot the matching entries, then dispatch outside the lock.
        let targets: Vec<(MacAddr, Option<SubscribeCb>)> = {
            let db = self.sub_db.lock();
            db.matches(topic)
                .iter()
                .flat_map(|(_, map)| {
                    map.iter()
                        .map(|(addr, entry)| (*addr, entry.cb.clone()))
                })
                .collect()
        };

        for (addr, cb) in targets {
            let topic = topic.to_string();
            let payload = payload.to_vec();
            if addr.is_zeroes() {
                // This node's own subscription
                let Some(cb) = cb else { continue };
                log::debug!(
                    "[Bridge] calling user callback for topic '{}' in new thread",
                    topic
                );
                std::thread::spawn(move || cb(&topic, &payload));
            } else {
                // Wireless subscriber; sending blocks, keep the far-layer
                // thread free.
                let this = Arc::clone(&self);
                std::thread::spawn(move || {
                    let _ = this.publish_sub_data(addr, &topic, &payload);
                });
            }
        }
    }

    fn resubscribe_all(&self) {
        let db = self.sub_db.lock();
        for topic in db.keys() {
            if !self.far_layer.subscribe(&topic) {
                log::warn!("[Bridge] resubscribe to topic {} failed", topic);
            }
        }
        log::debug!("[Bridge] resubscribed to {} topics", db.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    struct StubLocal {
        sent: Mutex<Vec<Message>>,
        node: RwLock<Option<Weak<dyn LocalNode>>>,
    }

    impl StubLocal {
        fn new() -> Arc<Self> {
            Arc::new(StubLocal {
                sent: Mutex::new(Vec::new()),
                node: RwLock::new(None),
            })
        }

        fn sent_of_kind(&self, kind: MessageType) -> Vec<Message> {
            self.sent
                .lock()
                .iter()
                .filter(|m| m.kind == kind)
                .cloned()
                .collect()
        }

        fn inject(&self, msg: Message, rssi: Option<i32>) {
            if let Some(node) = self.node.read().as_ref().and_then(Weak::upgrade) {
                node.receive_local(msg, rssi);
            }
        }
    }

    impl LocalLayer for Arc<StubLocal> {
        fn send(&self, msg: &Message) -> bool {
            self.sent.lock().push(msg.clone());
            true
        }

        fn local_addr(&self) -> MacAddr {
            MacAddr([0xB0, 0, 0, 0, 0, 0xEE])
        }

        fn set_node(&self, node: Weak<dyn LocalNode>) {
            *self.node.write() = Some(node);
        }
    }

    struct StubFar {
        published: Mutex<Vec<(String, String, Vec<u8>)>>,
        subscribed: Mutex<Vec<String>>,
        unsubscribed: Mutex<Vec<String>>,
        subscribe_ok: AtomicBool,
        unsubscribe_ok: AtomicBool,
        node: RwLock<Option<Weak<dyn FarNode>>>,
    }

    impl StubFar {
        fn new() -> Arc<Self> {
            Arc::new(StubFar {
                published: Mutex::new(Vec::new()),
                subscribed: Mutex::new(Vec::new()),
                unsubscribed: Mutex::new(Vec::new()),
                subscribe_ok: AtomicBool::new(true),
                unsubscribe_ok: AtomicBool::new(true),
                node: RwLock::new(None),
            })
        }

        fn inject(&self, topic: &str, payload: &[u8]) {
            if let Some(node) = self.node.read().as_ref().and_then(Weak::upgrade) {
                node.receive_far(topic, payload);
            }
        }
    }

    impl FarLayer for Arc<StubFar> {
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
            if self.unsubscribe_ok.load(Ordering::SeqCst) {
                self.unsubscribed.lock().push(topic.into());
                true
            } else {
                false
            }
        }

        fn set_node(&self, node: Weak<dyn FarNode>) {
            *self.node.write() = Some(node);
        }
    }

    fn quiet_reporting() -> BridgeReporting {
        BridgeReporting {
            version: false,
            probe_payload: false,
            rssi_on_probe: false,
            rssi_on_pub: false,
            rssi_on_sub: false,
            rssi_on_unsub: false,
        }
    }

    fn bridge(
        local: &Arc<StubLocal>,
        far: &Arc<StubFar>,
        reporting: BridgeReporting,
    ) -> Bridge<Arc<StubLocal>, Arc<StubFar>> {
        Bridge::new(
            Arc::clone(local),
            Arc::clone(far),
            BridgeConfig {
                reporting,
                sub_db_interval: Duration::from_secs(3600),
            },
        )
    }

    fn peer(n: u8) -> MacAddr {
        MacAddr([2, 3, 4, 5, 6, n])
    }

    fn wait_for<C: Fn() -> bool>(cond: C) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn test_version_published_on_construction() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(
            &local,
            &far,
            BridgeReporting {
                version: true,
                ..quiet_reporting()
            },
        );
        let published = far.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "b00000000ee");
        assert_eq!(published[0].1, "_report/version");
        assert_eq!(published[0].2, VERSION.as_bytes());
    }

    #[test]
    fn test_probe_req_answered_with_version() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::ProbeReq,
                addr: peer(1),
                topic: String::new(),
                payload: b"fw-1.2".to_vec(),
            },
            Some(-55),
        );

        let responses = local.sent_of_kind(MessageType::ProbeRes);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].addr, peer(1));
        assert_eq!(responses[0].payload, VERSION.as_bytes());
    }

    #[test]
    fn test_probe_req_reports_rssi_and_payload() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(
            &local,
            &far,
            BridgeReporting {
                probe_payload: true,
                rssi_on_probe: true,
                ..quiet_reporting()
            },
        );

        local.inject(
            Message {
                kind: MessageType::ProbeReq,
                addr: peer(7),
                topic: String::new(),
                payload: b"fw-1.2".to_vec(),
            },
            Some(-55),
        );

        wait_for(|| far.published.lock().len() >= 2);
        let published = far.published.lock();
        let topics: Vec<&str> = published.iter().map(|(_, t, _)| t.as_str()).collect();
        assert!(topics.contains(&"_report/probe_payload/020304050607"));
        assert!(topics.contains(&"_report/rssi/020304050607"));
        let rssi = published
            .iter()
            .find(|(_, t, _)| t.starts_with("_report/rssi/"))
            .unwrap();
        assert_eq!(rssi.2, b"-55");
    }

    #[test]
    fn test_pub_forwarded_to_far_layer() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::Pub,
                addr: peer(1),
                topic: "abc".into(),
                payload: b"123".to_vec(),
            },
            Some(-60),
        );

        let published = far.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "020304050601");
        assert_eq!(published[0].1, "abc");
        assert_eq!(published[0].2, b"123");
    }

    #[test]
    fn test_sub_req_subscribes_far_once_per_topic() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        let sub = |p: u8| Message {
            kind: MessageType::SubReq,
            addr: peer(p),
            topic: "abc/#".into(),
            payload: Vec::new(),
        };
        local.inject(sub(1), Some(-60));
        local.inject(sub(2), Some(-61));

        assert_eq!(*far.subscribed.lock(), vec!["abc/#".to_string()]);
    }

    #[test]
    fn test_sub_req_with_failing_far_subscribe_inserts_nothing() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());
        far.subscribe_ok.store(false, Ordering::SeqCst);

        local.inject(
            Message {
                kind: MessageType::SubReq,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            Some(-60),
        );

        // Nothing stored: far delivery finds no subscriber
        far.inject("abc", b"123");
        std::thread::sleep(Duration::from_millis(30));
        assert!(local.sent_of_kind(MessageType::SubData).is_empty());
    }

    #[test]
    fn test_unsub_of_last_peer_unsubscribes_far() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::SubReq,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            None,
        );
        local.inject(
            Message {
                kind: MessageType::Unsub,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            None,
        );

        assert_eq!(*far.unsubscribed.lock(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_fan_out_to_remote_and_local_subscribers() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        // Three remote subscribers whose patterns all match "abc/def"
        for (p, pattern) in [(1, "abc/+"), (2, "abc/#"), (3, "abc/def")] {
            local.inject(
                Message {
                    kind: MessageType::SubReq,
                    addr: peer(p),
                    topic: pattern.into(),
                    payload: Vec::new(),
                },
                None,
            );
        }
        // Plus one local subscription
        let hits = Arc::new(Mutex::new(0u32));
        let h = Arc::clone(&hits);
        assert!(bridge.subscribe("abc/#", move |topic, payload| {
            assert_eq!(topic, "abc/def");
            assert_eq!(payload, b"123");
            *h.lock() += 1;
        }));

        far.inject("abc/def", b"123");

        wait_for(|| local.sent_of_kind(MessageType::SubData).len() >= 3 && *hits.lock() >= 1);
        let sub_data = local.sent_of_kind(MessageType::SubData);
        assert_eq!(sub_data.len(), 3, "exactly one SUB_DATA per remote peer");
        let mut dsts: Vec<MacAddr> = sub_data.iter().map(|m| m.addr).collect();
        dsts.sort();
        assert_eq!(dsts, vec![peer(1), peer(2), peer(3)]);
        assert!(sub_data
            .iter()
            .all(|m| m.topic == "abc/def" && m.payload == b"123"));
        assert_eq!(*hits.lock(), 1, "exactly one local callback invocation");
    }

    #[test]
    fn test_non_matching_far_message_goes_nowhere() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::SubReq,
                addr: peer(1),
                topic: "abc/+".into(),
                payload: Vec::new(),
            },
            None,
        );

        far.inject("xyz", b"123");
        std::thread::sleep(Duration::from_millis(30));
        assert!(local.sent_of_kind(MessageType::SubData).is_empty());
    }

    #[test]
    fn test_time_req_answered_with_wall_clock() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let _bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::TimeReq,
                addr: peer(1),
                topic: String::new(),
                payload: Vec::new(),
            },
            None,
        );

        let responses = local.sent_of_kind(MessageType::TimeRes);
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].addr, peer(1));
        let millis: u64 = std::str::from_utf8(&responses[0].payload)
            .unwrap()
            .parse()
            .unwrap();
        assert!(millis >= 1_000_000_000_000);
    }

    #[test]
    fn test_remote_entries_expire_after_lifetime_ticks() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::SubReq,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            None,
        );

        for _ in 0..BRIDGE_SUB_LIFETIME {
            bridge.inner.sub_db_tick();
        }

        // Entry expired, topic unsubscribed upstream
        assert_eq!(*far.unsubscribed.lock(), vec!["abc".to_string()]);
        far.inject("abc", b"123");
        std::thread::sleep(Duration::from_millis(30));
        assert!(local.sent_of_kind(MessageType::SubData).is_empty());
    }

    #[test]
    fn test_renewal_resets_remote_lifetime() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        let sub = Message {
            kind: MessageType::SubReq,
            addr: peer(1),
            topic: "abc".into(),
            payload: Vec::new(),
        };
        local.inject(sub.clone(), None);
        for _ in 0..(BRIDGE_SUB_LIFETIME - 1) {
            bridge.inner.sub_db_tick();
        }
        // Renewed just before expiry
        local.inject(sub, None);
        for _ in 0..(BRIDGE_SUB_LIFETIME - 1) {
            bridge.inner.sub_db_tick();
        }

        assert!(far.unsubscribed.lock().is_empty());
        far.inject("abc", b"x");
        wait_for(|| !local.sent_of_kind(MessageType::SubData).is_empty());
        assert_eq!(local.sent_of_kind(MessageType::SubData).len(), 1);
    }

    #[test]
    fn test_local_subscription_survives_ticks() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        let hits = Arc::new(Mutex::new(0u32));
        let h = Arc::clone(&hits);
        assert!(bridge.subscribe("abc", move |_, _| *h.lock() += 1));

        for _ in 0..(2 * BRIDGE_SUB_LIFETIME as usize) {
            bridge.inner.sub_db_tick();
        }

        far.inject("abc", b"x");
        wait_for(|| *hits.lock() >= 1);
        assert_eq!(*hits.lock(), 1);
        assert!(far.unsubscribed.lock().is_empty());
    }

    #[test]
    fn test_failed_far_unsubscribe_retries_next_tick() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        local.inject(
            Message {
                kind: MessageType::SubReq,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            None,
        );

        far.unsubscribe_ok.store(false, Ordering::SeqCst);
        local.inject(
            Message {
                kind: MessageType::Unsub,
                addr: peer(1),
                topic: "abc".into(),
                payload: Vec::new(),
            },
            None,
        );
        assert!(far.unsubscribed.lock().is_empty());

        // Next tick retries and succeeds
        far.unsubscribe_ok.store(true, Ordering::SeqCst);
        bridge.inner.sub_db_tick();
        assert_eq!(*far.unsubscribed.lock(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_resubscribe_all_covers_stored_topics() {
        let (local, far) = (StubLocal::new(), StubFar::new());
        let bridge = bridge(&local, &far, quiet_reporting());

        for (p, topic) in [(1, "a"), (2, "b")] {
            local.inject(
                Message {
                    kind: MessageType::SubReq,
                    addr: peer(p),
                    topic: topic.into(),
                    payload: Vec::new(),
                },
                None,
            );
        }

        far.subscribed.lock().clear();
        bridge.resubscribe_all();
        let mut resubscribed = far.subscribed.lock().clone();
        resubscribed.sort();
        assert_eq!(resubscribed, vec!["a".to_string(), "b".to_string()]);
    }
}
