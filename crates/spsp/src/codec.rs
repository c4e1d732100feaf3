// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire packet serializer and deserializer.
//!
//! Packet layout (packed, little-endian):
//!
//! ```text
//! offset  size  field
//!   0      4   ssid               (u32, network-wide identifier)
//!   4      8   nonce              (random bytes per packet)
//!  12      1   version            (= 1)
//!  13      1   type                                       +
//!  14      3   reserved (= 0)                             |
//!  17      1   checksum                                   | encrypted
//!  18      1   topic_len                                  | region
//!  19      1   payload_len                                |
//!  20     ..   topic || payload                           +
//! ```
//!
//! The checksum is the 8-bit modular sum of the encrypted region computed
//! with the checksum field zeroed, written before encryption and recomputed
//! after decryption. Deserialization never panics; every malformed input is
//! reported as a [`DecodeError`].

use crate::addr::MacAddr;
use crate::crypto;
use crate::message::{Message, MessageType};
use crate::random::{self, RandomError};
use std::fmt;

/// Current protocol version.
pub const PROTO_VERSION: u8 = 1;
/// Password length in bytes.
pub const PASSWORD_LEN: usize = 32;
/// Length of the per-packet encryption nonce.
pub const NONCE_LEN: usize = 8;
/// Packet header length (`ssid` + nonce + version).
pub const HEADER_LEN: usize = 13;
/// Payload header length (type + reserved + checksum + lengths).
pub const PAYLOAD_HEADER_LEN: usize = 7;
/// Minimum total packet length (empty topic and payload).
pub const MIN_PACKET_LEN: usize = HEADER_LEN + PAYLOAD_HEADER_LEN;
/// Maximum total packet length (single-frame limit).
pub const MAX_PACKET_LEN: usize = 250;

// Offsets within the encrypted region
const REGION_TYPE: usize = 0;
const REGION_CHECKSUM: usize = 4;
const REGION_TOPIC_LEN: usize = 5;
const REGION_PAYLOAD_LEN: usize = 6;

/// Serialization failure.
#[derive(Debug)]
pub enum SerializeError {
    /// Total packet length would exceed [`MAX_PACKET_LEN`].
    PacketTooLarge { len: usize },
    /// The platform RNG failed while generating the nonce.
    Random(RandomError),
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializeError::PacketTooLarge { len } => {
                write!(f, "packet too big ({} > {} bytes)", len, MAX_PACKET_LEN)
            }
            SerializeError::Random(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SerializeError {}

impl From<RandomError> for SerializeError {
    fn from(e: RandomError) -> Self {
        SerializeError::Random(e)
    }
}

/// Deserialization failure. Logged at debug by the engine and dropped.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Shorter than the minimum packet.
    TooShort { len: usize },
    /// SSID in the header differs from ours.
    SsidMismatch { got: u32 },
    /// Unsupported protocol version.
    VersionMismatch { got: u8 },
    /// Checksum of the decrypted region does not match.
    ChecksumMismatch { got: u8, computed: u8 },
    /// Declared topic/payload lengths do not add up to the region length.
    LengthMismatch { declared: usize, actual: usize },
    /// Unknown message type byte.
    UnknownType { got: u8 },
    /// Topic bytes are not valid UTF-8.
    TopicNotUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { len } => {
                write!(f, "packet too short ({} < {} bytes)", len, MIN_PACKET_LEN)
            }
            DecodeError::SsidMismatch { got } => write!(f, "different SSID ({:#010x})", got),
            DecodeError::VersionMismatch { got } => {
                write!(f, "different protocol version ({} != {})", got, PROTO_VERSION)
            }
            DecodeError::ChecksumMismatch { got, computed } => {
                write!(f, "invalid checksum ({} != {})", got, computed)
            }
            DecodeError::LengthMismatch { declared, actual } => {
                write!(f, "invalid region length ({} != {} bytes)", declared, actual)
            }
            DecodeError::UnknownType { got } => write!(f, "unknown message type ({})", got),
            DecodeError::TopicNotUtf8 => write!(f, "topic is not valid UTF-8"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Packet codec for one network (SSID + password).
#[derive(Clone)]
pub struct Codec {
    ssid: u32,
    password: [u8; PASSWORD_LEN],
}

impl Codec {
    /// Creates a codec for the given network identifier and password.
    pub fn new(ssid: u32, password: [u8; PASSWORD_LEN]) -> Self {
        Codec { ssid, password }
    }

    /// Total packet length `msg` serializes to.
    pub fn packet_len(msg: &Message) -> usize {
        MIN_PACKET_LEN + msg.topic.len() + msg.payload.len()
    }

    /// Serializes `msg` into a framed, encrypted packet.
    pub fn serialize(&self, msg: &Message) -> Result<Vec<u8>, SerializeError> {
        let len = Self::packet_len(msg);
        if len > MAX_PACKET_LEN {
            return Err(SerializeError::PacketTooLarge { len });
        }

        let mut buf = vec![0u8; len];
        buf[0..4].copy_from_slice(&self.ssid.to_le_bytes());
        random::fill(&mut buf[4..4 + NONCE_LEN])?;
        buf[12] = PROTO_VERSION;

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&buf[4..4 + NONCE_LEN]);

        let topic_len = msg.topic.len();
        let region = &mut buf[HEADER_LEN..];
        region[REGION_TYPE] = msg.kind as u8;
        // reserved bytes and checksum stay zero for the checksum pass
        region[REGION_TOPIC_LEN] = topic_len as u8;
        region[REGION_PAYLOAD_LEN] = msg.payload.len() as u8;
        region[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + topic_len]
            .copy_from_slice(msg.topic.as_bytes());
        region[PAYLOAD_HEADER_LEN + topic_len..].copy_from_slice(&msg.payload);

        region[REGION_CHECKSUM] = checksum(region, 0);
        crypto::xor_keystream(&self.password, &nonce, region);

        Ok(buf)
    }

    /// Deserializes a received packet from `src`.
    pub fn deserialize(&self, src: MacAddr, data: &[u8]) -> Result<Message, DecodeError> {
        if data.len() < MIN_PACKET_LEN {
            return Err(DecodeError::TooShort { len: data.len() });
        }

        let mut ssid_bytes = [0u8; 4];
        ssid_bytes.copy_from_slice(&data[0..4]);
        let ssid = u32::from_le_bytes(ssid_bytes);
        if ssid != self.ssid {
            return Err(DecodeError::SsidMismatch { got: ssid });
        }
        if data[12] != PROTO_VERSION {
            return Err(DecodeError::VersionMismatch { got: data[12] });
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&data[4..4 + NONCE_LEN]);

        let mut region = data[HEADER_LEN..].to_vec();
        crypto::xor_keystream(&self.password, &nonce, &mut region);

        let stored = region[REGION_CHECKSUM];
        let computed = checksum(&region, stored);
        if stored != computed {
            return Err(DecodeError::ChecksumMismatch {
                got: stored,
                computed,
            });
        }

        let topic_len = region[REGION_TOPIC_LEN] as usize;
        let payload_len = region[REGION_PAYLOAD_LEN] as usize;
        let declared = PAYLOAD_HEADER_LEN + topic_len + payload_len;
        if declared != region.len() {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: region.len(),
            });
        }

        let kind = MessageType::from_u8(region[REGION_TYPE])
            .ok_or(DecodeError::UnknownType {
                got: region[REGION_TYPE],
            })?;
        let topic = std::str::from_utf8(&region[PAYLOAD_HEADER_LEN..PAYLOAD_HEADER_LEN + topic_len])
            .map_err(|_| DecodeError::TopicNotUtf8)?
            .to_string();
        let payload = region[PAYLOAD_HEADER_LEN + topic_len..].to_vec();

        Ok(Message {
            kind,
            addr: src,
            topic,
            payload,
        })
    }
}

/// 8-bit modular sum of `region`, with the already-written checksum byte
/// backed out of the total.
fn checksum(region: &[u8], existing: u8) -> u8 {
    region
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
        .wrapping_sub(existing)
}
