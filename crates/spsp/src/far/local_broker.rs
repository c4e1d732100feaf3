// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process far layer.
//!
//! Acts as a tiny local MQTT-like server: a wildcard trie of live
//! subscriptions, with published messages reflected back to the attached
//! node when any subscription matches. Useful for self-contained bridges
//! with no upstream broker.

use crate::far::{FarLayer, FarNode};
use crate::trie::WildcardTrie;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};

struct Inner {
    /// Topic prefix for publishing (may be empty).
    topic_prefix: String,
    subs: Mutex<WildcardTrie<()>>,
    node: RwLock<Option<Weak<dyn FarNode>>>,
}

/// Local broker far layer. Cheap to clone; clones share the broker.
pub struct LocalBroker {
    inner: Arc<Inner>,
}

impl Clone for LocalBroker {
    fn clone(&self) -> Self {
        LocalBroker {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new("spsp")
    }
}

impl LocalBroker {
    /// Creates a broker publishing under `topic_prefix` (may be empty).
    pub fn new(topic_prefix: impl Into<String>) -> Self {
        log::info!("[LocalBroker] initialized");
        LocalBroker {
            inner: Arc::new(Inner {
                topic_prefix: topic_prefix.into(),
                subs: Mutex::new(WildcardTrie::new()),
                node: RwLock::new(None),
            }),
        }
    }
}

impl FarLayer for LocalBroker {
    fn publish(&self, source: &str, topic: &str, payload: &[u8]) -> bool {
        log::debug!(
            "[LocalBroker] publish: {} B to topic '{}' from {}",
            payload.len(),
            topic,
            source
        );

        let extended = if self.inner.topic_prefix.is_empty() {
            format!("{}/{}", source, topic)
        } else {
            format!("{}/{}/{}", self.inner.topic_prefix, source, topic)
        };

        let subscribed = !self.inner.subs.lock().matches(&extended).is_empty();
        if subscribed {
            if let Some(node) = self.inner.node.read().as_ref().and_then(Weak::upgrade) {
                // Reflect back off the caller's thread; the node's
                // receive path may block on local-layer sends.
                let payload = payload.to_vec();
                std::thread::spawn(move || node.receive_far(&extended, &payload));
            }
        }

        true
    }

    fn subscribe(&self, topic: &str) -> bool {
        log::debug!("[LocalBroker] subscribe to topic '{}'", topic);
        self.inner.subs.lock().insert(topic, ());
        true
    }

    fn unsubscribe(&self, topic: &str) -> bool {
        log::debug!("[LocalBroker] unsubscribe from topic '{}'", topic);
        self.inner.subs.lock().remove(topic).is_some()
    }

    fn set_node(&self, node: Weak<dyn FarNode>) {
        *self.inner.node.write() = Some(node);
    }
}
