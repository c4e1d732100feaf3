// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local-layer messages.
//!
//! A [`Message`] is what flows between a node and its local layer: a typed
//! record with a peer address, a topic and a payload. On receive the address
//! is the source peer; on send it is the destination, where the all-zeroes
//! address means "the discovered bridge".

use crate::addr::MacAddr;
use std::fmt;

/// Local message type. The wire encoding is a single byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    None = 0,
    /// Reserved, currently unused.
    Ok = 1,
    /// Reserved, currently unused.
    Fail = 2,
    ProbeReq = 10,
    ProbeRes = 11,
    Pub = 20,
    SubReq = 30,
    SubData = 31,
    Unsub = 32,
    TimeReq = 40,
    TimeRes = 41,
}

impl MessageType {
    /// Decodes a wire byte. Unknown values are a protocol error.
    pub fn from_u8(b: u8) -> Option<Self> {
        Some(match b {
            0 => MessageType::None,
            1 => MessageType::Ok,
            2 => MessageType::Fail,
            10 => MessageType::ProbeReq,
            11 => MessageType::ProbeRes,
            20 => MessageType::Pub,
            30 => MessageType::SubReq,
            31 => MessageType::SubData,
            32 => MessageType::Unsub,
            40 => MessageType::TimeReq,
            41 => MessageType::TimeRes,
            _ => return None,
        })
    }

    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::None => "NONE",
            MessageType::Ok => "OK",
            MessageType::Fail => "FAIL",
            MessageType::ProbeReq => "PROBE_REQ",
            MessageType::ProbeRes => "PROBE_RES",
            MessageType::Pub => "PUB",
            MessageType::SubReq => "SUB_REQ",
            MessageType::SubData => "SUB_DATA",
            MessageType::Unsub => "UNSUB",
            MessageType::TimeReq => "TIME_REQ",
            MessageType::TimeRes => "TIME_RES",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message exchanged between a node and its local layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Type of message.
    pub kind: MessageType,
    /// Source (on receive) or destination (on send) peer address.
    /// All-zeroes on send means "the discovered bridge".
    pub addr: MacAddr,
    /// Topic (UTF-8, at most 255 bytes on the wire).
    pub topic: String,
    /// Payload (raw bytes, at most 255 bytes on the wire).
    pub payload: Vec<u8>,
}

impl Message {
    /// Convenience constructor for bridge-bound messages (zeroes address).
    pub fn to_bridge(kind: MessageType, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Message {
            kind,
            addr: MacAddr::zeroes(),
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} ({} B payload)",
            self.kind,
            self.addr,
            if self.topic.is_empty() {
                "(no topic)"
            } else {
                &self.topic
            },
            self.payload.len()
        )
    }
}
