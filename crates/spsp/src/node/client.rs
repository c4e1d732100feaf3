// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client node.
//!
//! A client publishes and subscribes through the bridge discovered by its
//! local layer. Subscriptions live in a wildcard trie with a countdown
//! lifetime and are renewed by re-sending `SUB_REQ` before the bridge-side
//! entry would expire. The client can also synchronize its wall clock with
//! the bridge through a single `TIME_REQ`/`TIME_RES` exchange.

use crate::clock;
use crate::local::{LocalLayer, LocalNode};
use crate::message::{Message, MessageType};
use crate::node::{rssi_report_topic, SubscribeCb};
use crate::timer::PeriodicTimer;
use crate::trie::WildcardTrie;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Timestamps below this (2001-09-09 in ms) are rejected as bogus.
const TIME_SYNC_FLOOR_MS: u64 = 1_000_000_000_000;

/// Client reporting options.
#[derive(Clone)]
pub struct ClientReporting {
    /// Report RSSI of received `PROBE_RES` messages.
    pub rssi_on_probe: bool,
}

impl Default for ClientReporting {
    fn default() -> Self {
        ClientReporting {
            rssi_on_probe: true,
        }
    }
}

/// Client subscription database tuning.
#[derive(Clone)]
pub struct ClientSubDbConfig {
    /// How often lifetimes are decremented and expired entries renewed.
    /// Should be at least 5x shorter than `sub_lifetime`.
    pub interval: Duration,
    /// Lifetime of a subscription; it is renewed before this expires.
    pub sub_lifetime: Duration,
}

impl Default for ClientSubDbConfig {
    fn default() -> Self {
        ClientSubDbConfig {
            interval: Duration::from_secs(60),
            sub_lifetime: Duration::from_secs(10 * 60),
        }
    }
}

/// Client configuration. Everything here is optional.
#[derive(Clone)]
pub struct ClientConfig {
    pub reporting: ClientReporting,
    pub sub_db: ClientSubDbConfig,
    /// How long to wait for `TIME_RES` before giving up.
    pub time_sync_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reporting: ClientReporting::default(),
            sub_db: ClientSubDbConfig::default(),
            time_sync_timeout: Duration::from_secs(2),
        }
    }
}

struct SubEntry {
    lifetime: Duration,
    cb: SubscribeCb,
}

struct TimeSyncState {
    ongoing: bool,
    result: Option<bool>,
}

struct ClientInner<L: LocalLayer> {
    /// Self-handle for background publishes spawned from handlers.
    this: Weak<ClientInner<L>>,
    conf: ClientConfig,
    local_layer: L,
    sub_db: Mutex<WildcardTrie<SubEntry>>,
    time_sync: Mutex<TimeSyncState>,
    time_sync_cv: Condvar,
}

/// Client node over a local layer `L`.
pub struct Client<L: LocalLayer> {
    inner: Arc<ClientInner<L>>,
    _sub_db_timer: PeriodicTimer,
}

impl<L: LocalLayer> Client<L> {
    /// Creates a client over `local_layer` and attaches itself as the
    /// layer's node observer.
    pub fn new(local_layer: L, conf: ClientConfig) -> Self {
        let interval = conf.sub_db.interval;
        let inner = Arc::new_cyclic(|this| ClientInner {
            this: this.clone(),
            conf,
            local_layer,
            sub_db: Mutex::new(WildcardTrie::new()),
            time_sync: Mutex::new(TimeSyncState {
                ongoing: false,
                result: None,
            }),
            time_sync_cv: Condvar::new(),
        });

        inner
            .local_layer
            .set_node(Arc::downgrade(&inner) as Weak<dyn LocalNode>);

        let weak = Arc::downgrade(&inner);
        let timer = PeriodicTimer::new("spsp-client-subdb", interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.sub_db_tick();
            }
        });

        log::info!("[Client] initialized");
        Client {
            inner,
            _sub_db_timer: timer,
        }
    }

    /// Publishes `payload` to `topic` through the bridge.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        self.inner.publish(topic, payload)
    }

    /// Subscribes to `topic`; `cb` receives matching `SUB_DATA`. The
    /// subscription is renewed automatically until [`unsubscribe`]
    /// (Self::unsubscribe) is called.
    pub fn subscribe<F>(&self, topic: &str, cb: F) -> bool
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        self.inner.subscribe(topic, Arc::new(cb))
    }

    /// Unsubscribes from `topic`.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.inner.unsubscribe(topic)
    }

    /// Re-sends `SUB_REQ` for every subscribed topic.
    pub fn resubscribe_all(&self) {
        LocalNode::resubscribe_all(&*self.inner);
    }

    /// Synchronizes the wall clock with the bridge, blocking up to the
    /// configured timeout.
    pub fn sync_time(&self) -> bool {
        self.inner.sync_time()
    }
}

impl<L: LocalLayer> Drop for Client<L> {
    fn drop(&mut self) {
        log::info!("[Client] deinitialized");
    }
}

impl<L: LocalLayer> ClientInner<L> {
    fn send_local(&self, msg: &Message) -> bool {
        log::info!("[Client] sending local msg: {}", msg);
        let delivered = self.local_layer.send(msg);
        if delivered {
            log::debug!("[Client] message delivered: {}", msg);
        } else {
            log::warn!("[Client] message not delivered: {}", msg);
        }
        delivered
    }

    fn send_subscribe(&self, topic: &str) -> bool {
        self.send_local(&Message::to_bridge(MessageType::SubReq, topic, Vec::new()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        log::debug!(
            "[Client] publishing: topic '{}', {} B payload",
            topic,
            payload.len()
        );

        if topic.is_empty() {
            log::warn!("[Client] can't publish to empty topic");
            return false;
        }

        self.send_local(&Message::to_bridge(
            MessageType::Pub,
            topic,
            payload.to_vec(),
        ))
    }

    fn subscribe(&self, topic: &str, cb: SubscribeCb) -> bool {
        log::debug!("[Client] subscribing to topic '{}'", topic);

        if topic.is_empty() {
            log::warn!("[Client] can't subscribe to empty topic");
            return false;
        }

        if !self.send_subscribe(topic) {
            return false;
        }

        let mut db = self.sub_db.lock();
        db.insert(
            topic,
            SubEntry {
                lifetime: self.conf.sub_db.sub_lifetime,
                cb,
            },
        );
        true
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        log::debug!("[Client] unsubscribing from topic '{}'", topic);

        if topic.is_empty() {
            log::warn!("[Client] can't unsubscribe from empty topic");
            return false;
        }

        {
            let mut db = self.sub_db.lock();
            if db.remove(topic).is_none() {
                log::warn!(
                    "[Client] can't unsubscribe from not-subscribed topic '{}'",
                    topic
                );
                return false;
            }
        }

        // Best effort: if this is lost, the bridge-side entry just times
        // out in a couple of minutes.
        self.send_local(&Message::to_bridge(MessageType::Unsub, topic, Vec::new()));
        true
    }

    fn sync_time(&self) -> bool {
        log::debug!("[Client] time sync: start");

        {
            let mut state = self.time_sync.lock();
            state.ongoing = true;
            state.result = None;
        }

        if !self.send_local(&Message::to_bridge(MessageType::TimeReq, "", Vec::new())) {
            self.time_sync_reset();
            log::error!("[Client] time sync: request can't be sent");
            return false;
        }

        let deadline = Instant::now() + self.conf.time_sync_timeout;
        let mut state = self.time_sync.lock();
        while state.result.is_none() {
            if self.time_sync_cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        let ok = state.result.take().unwrap_or(false);
        state.ongoing = false;
        drop(state);

        if ok {
            log::debug!("[Client] time sync: success");
        } else {
            log::error!("[Client] time sync: timeout or invalid bridge response");
        }
        ok
    }

    fn time_sync_reset(&self) {
        let mut state = self.time_sync.lock();
        state.ongoing = false;
        state.result = None;
    }

    fn process_probe_res(&self, msg: &Message, rssi: Option<i32>) -> bool {
        if self.conf.reporting.rssi_on_probe {
            self.publish_rssi(msg.addr, rssi);
        }
        true
    }

    fn process_sub_data(&self, msg: &Message) -> bool {
        let callbacks: Vec<SubscribeCb> = {
            let db = self.sub_db.lock();
            db.matches(&msg.topic)
                .into_iter()
                .map(|(_, entry)| Arc::clone(&entry.cb))
                .collect()
        };

        // User callbacks run outside the database lock; they may well call
        // back into this node.
        for cb in callbacks {
            log::debug!("[Client] calling user callback for topic '{}'", msg.topic);
            cb(&msg.topic, &msg.payload);
        }
        true
    }

    fn process_time_res(&self, msg: &Message) -> bool {
        let mut state = self.time_sync.lock();

        if !state.ongoing {
            return false;
        }

        let millis = std::str::from_utf8(&msg.payload)
            .ok()
            .and_then(|s| s.parse::<u64>().ok());

        let ok = match millis {
            Some(ms) if ms >= TIME_SYNC_FLOOR_MS => {
                if clock::set_wall_clock(ms) {
                    log::info!("[Client] time sync: set current time to {}", ms);
                    true
                } else {
                    log::error!("[Client] time sync: setting wall clock failed");
                    false
                }
            }
            _ => {
                log::error!("[Client] time sync: invalid time received from bridge");
                false
            }
        };

        state.result = Some(ok);
        self.time_sync_cv.notify_all();
        ok
    }

    /// Publishes the RSSI of a message received from `addr`.
    /// Fire-and-forget; delivery status is not checked.
    fn publish_rssi(&self, addr: crate::addr::MacAddr, rssi: Option<i32>) {
        let Some(rssi) = rssi else { return };
        let Some(this) = self.this.upgrade() else { return };
        std::thread::spawn(move || {
            let _ = this.publish(&rssi_report_topic(addr), rssi.to_string().as_bytes());
        });
    }

    fn sub_db_tick(&self) {
        log::debug!("[Client] sub DB: tick running");

        let interval = self.conf.sub_db.interval;
        let sub_lifetime = self.conf.sub_db.sub_lifetime;

        let mut db = self.sub_db.lock();
        let mut expired = Vec::new();
        db.for_each_mut(|topic, entry| {
            entry.lifetime = entry.lifetime.saturating_sub(interval);
            if entry.lifetime.is_zero() {
                expired.push(topic.to_string());
            }
        });

        for topic in expired {
            log::debug!("[Client] sub DB: topic '{}' expired (renewing)", topic);
            if self.send_subscribe(&topic) {
                if let Some(entry) = db.get_mut(&topic) {
                    entry.lifetime = sub_lifetime;
                }
            } else {
                log::error!(
                    "[Client] sub DB: topic '{}' can't be extended, will try again in next tick",
                    topic
                );
            }
        }

        log::debug!("[Client] sub DB: tick done");
    }
}

impl<L: LocalLayer> LocalNode for ClientInner<L> {
    fn receive_local(self: Arc<Self>, msg: Message, rssi: Option<i32>) {
        match rssi {
            Some(rssi) => log::info!("[Client] received local msg: {} ({} dBm)", msg, rssi),
            None => log::info!("[Client] received local msg: {}", msg),
        }

        let processed = match msg.kind {
            MessageType::ProbeRes => self.process_probe_res(&msg, rssi),
            MessageType::SubData => self.process_sub_data(&msg),
            MessageType::TimeRes => self.process_time_res(&msg),
            _ => false,
        };

        if processed {
            log::debug!("[Client] message processed: {}", msg);
        } else {
            log::warn!("[Client] message not processed: {}", msg);
        }
    }

    fn resubscribe_all(&self) {
        let db = self.sub_db.lock();
        db.for_each(|topic, _| {
            if !self.send_subscribe(topic) {
                log::warn!("[Client] resubscribe to topic {} failed", topic);
            }
        });
    }
}
