// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ESP-NOW over 802.11: radiotap and action frame layout.
//!
//! ESP-NOW frames are vendor-specific action frames carrying the Espressif
//! OUI. On capture, frames arrive with a receive radiotap header whose
//! variable field set must be walked to find the antenna signal; on
//! transmit, a fixed 9-byte injection radiotap header is prepended.

use spsp::MacAddr;

/// 802.11 frame control type byte of an action frame.
pub const FRAME_TYPE_ACTION: u8 = 0xD0;
/// 802.11 frame control type byte of an ACK.
pub const FRAME_TYPE_ACK: u8 = 0xD4;

/// Espressif OUI used in ESP-NOW action frames.
pub const ESPNOW_OUI: [u8; 3] = [0x18, 0xFE, 0x34];
/// Vendor-specific element ID.
const ELEMENT_ID: u8 = 221;
/// Vendor-specific element type for ESP-NOW.
const ELEMENT_TYPE: u8 = 0x04;
/// Vendor-specific element version.
const ELEMENT_VERSION: u8 = 0x01;
/// Public action category.
const CATEGORY_VENDOR: u8 = 0x7F;

/// Fixed transmit radiotap header: version 0, length 9, present = RATE,
/// data rate 1 Mb/s. No `FCS-at-end` flag.
pub const TX_RADIOTAP: [u8; 9] = [0x00, 0x00, 0x09, 0x00, 0x04, 0x00, 0x00, 0x00, 0x02];

/// Byte offsets within an action frame (after the radiotap header).
const OFF_DST: usize = 4;
const OFF_SRC: usize = 10;
const OFF_BSSID: usize = 16;
const OFF_CATEGORY: usize = 24;
const OFF_OUI: usize = 25;
const OFF_ELEMENT: usize = 32;
const OFF_PAYLOAD: usize = 39;

/// Action frame length without payload.
pub const ACTION_FRAME_LEN: usize = OFF_PAYLOAD;

/// ACK frames are frame control + duration + receiver address.
const ACK_FRAME_LEN: usize = 10;

/// Vendor element length field counts type, version and 3 OUI bytes.
const ELEMENT_OVERHEAD: u8 = 5;

// Radiotap present flags (bit numbers per the radiotap spec)
const PRESENT_TSFT: u32 = 1 << 0;
const PRESENT_FLAGS: u32 = 1 << 1;
const PRESENT_RATE: u32 = 1 << 2;
const PRESENT_CHANNEL: u32 = 1 << 3;
const PRESENT_FHSS: u32 = 1 << 4;
const PRESENT_ANT_SIGNAL: u32 = 1 << 5;
const PRESENT_EXT: u32 = 1 << 31;

/// Fields extracted from a receive radiotap header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRadiotap {
    /// Total radiotap header length; the 802.11 frame starts here.
    pub len: usize,
    /// Antenna signal in dBm, when present.
    pub rssi: Option<i32>,
}

/// Builds a transmit-ready frame: injection radiotap plus an ESP-NOW
/// action frame carrying `payload`.
pub fn build_action_frame(dst: MacAddr, src: MacAddr, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(TX_RADIOTAP.len() + ACTION_FRAME_LEN + payload.len());
    frame.extend_from_slice(&TX_RADIOTAP);

    let base = frame.len();
    frame.resize(base + ACTION_FRAME_LEN + payload.len(), 0);
    let action = &mut frame[base..];

    action[0] = FRAME_TYPE_ACTION;
    // flags, duration and sequence stay zero (sequence is set in hardware)
    action[OFF_DST..OFF_DST + 6].copy_from_slice(dst.as_bytes());
    action[OFF_SRC..OFF_SRC + 6].copy_from_slice(src.as_bytes());
    action[OFF_BSSID..OFF_BSSID + 6].copy_from_slice(&[0xFF; 6]);
    action[OFF_CATEGORY] = CATEGORY_VENDOR;
    action[OFF_OUI..OFF_OUI + 3].copy_from_slice(&ESPNOW_OUI);
    // 4 "random" bytes at offset 28 stay zero
    action[OFF_ELEMENT] = ELEMENT_ID;
    action[OFF_ELEMENT + 1] = payload.len() as u8 + ELEMENT_OVERHEAD;
    action[OFF_ELEMENT + 2..OFF_ELEMENT + 5].copy_from_slice(&ESPNOW_OUI);
    action[OFF_ELEMENT + 5] = ELEMENT_TYPE;
    action[OFF_ELEMENT + 6] = ELEMENT_VERSION;
    action[OFF_PAYLOAD..].copy_from_slice(payload);

    frame
}

/// Walks a receive radiotap header, returning its length and the antenna
/// signal when present. Returns `None` on malformed headers.
pub fn parse_radiotap(data: &[u8]) -> Option<ParsedRadiotap> {
    if data.len() < 8 {
        return None;
    }

    let declared_len = u16::from_le_bytes([data[2], data[3]]) as usize;
    let present = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if declared_len < 8 || data.len() < declared_len {
        return None;
    }

    // Skip extension words of the `present` bitmask
    let mut offset = 8;
    let mut ext = present;
    while ext & PRESENT_EXT != 0 {
        if offset + 4 > declared_len {
            return None;
        }
        ext = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        offset += 4;
    }

    // Walk the fields we care about; all fields are naturally aligned in
    // practice for this set, matching the reference capture path.
    if present & PRESENT_TSFT != 0 {
        offset += 8;
    }
    if present & PRESENT_FLAGS != 0 {
        offset += 1;
    }
    if present & PRESENT_RATE != 0 {
        offset += 1;
    }
    if present & PRESENT_CHANNEL != 0 {
        offset += 4;
    }
    if present & PRESENT_FHSS != 0 {
        offset += 2;
    }

    let mut rssi = None;
    if present & PRESENT_ANT_SIGNAL != 0 {
        if offset >= declared_len {
            return None;
        }
        rssi = Some(data[offset] as i8 as i32);
    }

    Some(ParsedRadiotap {
        len: declared_len,
        rssi,
    })
}

/// A captured ESP-NOW action frame.
#[derive(Debug, PartialEq, Eq)]
pub struct CapturedAction<'a> {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub payload: &'a [u8],
}

/// Parses an 802.11 action frame (radiotap already stripped).
pub fn parse_action_frame(data: &[u8]) -> Option<CapturedAction<'_>> {
    if data.len() < ACTION_FRAME_LEN || data[0] != FRAME_TYPE_ACTION {
        return None;
    }

    let element_len = data[OFF_ELEMENT + 1];
    if element_len < ELEMENT_OVERHEAD {
        return None;
    }
    let payload_len = (element_len - ELEMENT_OVERHEAD) as usize;
    if data.len() < ACTION_FRAME_LEN + payload_len {
        return None;
    }

    let mut dst = [0u8; 6];
    dst.copy_from_slice(&data[OFF_DST..OFF_DST + 6]);
    let mut src = [0u8; 6];
    src.copy_from_slice(&data[OFF_SRC..OFF_SRC + 6]);

    Some(CapturedAction {
        src: MacAddr(src),
        dst: MacAddr(dst),
        payload: &data[OFF_PAYLOAD..OFF_PAYLOAD + payload_len],
    })
}

/// Whether `data` is a link-layer ACK addressed to `local`.
pub fn is_ack_for(data: &[u8], local: MacAddr) -> bool {
    data.len() >= ACK_FRAME_LEN
        && data[0] == FRAME_TYPE_ACK
        && &data[OFF_DST..OFF_DST + 6] == local.as_bytes()
}

/// BPF program matching ESP-NOW traffic for `local`: action frames
/// addressed to it (or broadcast) and ACKs for it. Generated from the
/// reference `tcpdump -dd` output, with the two MAC words patched in.
pub fn bpf_filter(local: MacAddr) -> Vec<libc::sock_filter> {
    let mac = local.as_bytes();
    let mac_hi = (u32::from(mac[0]) << 8) | u32::from(mac[1]);
    let mac_lo = (u32::from(mac[2]) << 24)
        | (u32::from(mac[3]) << 16)
        | (u32::from(mac[4]) << 8)
        | u32::from(mac[5]);

    let prog: [(u16, u8, u8, u32); 46] = [
        (0x30, 0, 0, 0x0000_0003),
        (0x64, 0, 0, 0x0000_0008),
        (0x07, 0, 0, 0x0000_0000),
        (0x30, 0, 0, 0x0000_0002),
        (0x4C, 0, 0, 0x0000_0000),
        (0x07, 0, 0, 0x0000_0000),
        (0x50, 0, 0, 0x0000_0000),
        (0x54, 0, 0, 0x0000_00FC),
        (0x15, 0, 28, 0x0000_00D0),
        (0x50, 0, 0, 0x0000_0000),
        (0x45, 34, 0, 0x0000_0004),
        (0x45, 0, 9, 0x0000_0008),
        (0x50, 0, 0, 0x0000_0001),
        (0x45, 0, 7, 0x0000_0001),
        (0x40, 0, 0, 0x0000_0012),
        (0x15, 0, 2, mac_lo),
        (0x48, 0, 0, 0x0000_0010),
        (0x15, 10, 27, mac_hi),
        (0x15, 0, 26, 0xFFFF_FFFF),
        (0x48, 0, 0, 0x0000_0010),
        (0x15, 7, 24, 0x0000_FFFF),
        (0x40, 0, 0, 0x0000_0006),
        (0x15, 0, 2, mac_lo),
        (0x48, 0, 0, 0x0000_0004),
        (0x15, 3, 20, mac_hi),
        (0x15, 0, 19, 0xFFFF_FFFF),
        (0x48, 0, 0, 0x0000_0004),
        (0x15, 0, 17, 0x0000_FFFF),
        (0x40, 0, 0, 0x0000_0018),
        (0x15, 0, 15, 0x7F18_FE34),
        (0x50, 0, 0, 0x0000_0020),
        (0x15, 0, 13, 0x0000_00DD),
        (0x40, 0, 0, 0x0000_0021),
        (0x54, 0, 0, 0x00FF_FFFF),
        (0x15, 0, 10, 0x0018_FE34),
        (0x50, 0, 0, 0x0000_0025),
        (0x15, 7, 8, 0x0000_0004),
        (0x50, 0, 0, 0x0000_0000),
        (0x54, 0, 0, 0x0000_00FC),
        (0x15, 0, 5, 0x0000_00D4),
        (0x40, 0, 0, 0x0000_0006),
        (0x15, 0, 3, mac_lo),
        (0x48, 0, 0, 0x0000_0004),
        (0x15, 0, 1, mac_hi),
        (0x06, 0, 0, 0x0004_0000),
        (0x06, 0, 0, 0x0000_0000),
    ];

    prog.iter()
        .map(|&(code, jt, jf, k)| libc::sock_filter { code, jt, jf, k })
        .collect()
}
