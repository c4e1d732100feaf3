// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Packet payload encryption.
//!
//! A ChaCha20 keystream keyed by the 32-byte network password and
//! initialized from the 8-byte per-packet nonce is XORed in place over the
//! encrypted region. Encryption and decryption are the same operation; there
//! is no MAC, integrity relies on the checksum inside the encrypted region.
//!
//! Nonce convention: the cipher takes a 12-byte IETF nonce, built as four
//! zero bytes followed by the 8-byte packet nonce, with the block counter
//! starting at 0. Client and bridge must agree on this extension for packets
//! to decrypt.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;

use crate::codec::{NONCE_LEN, PASSWORD_LEN};

/// Applies the keystream for (`password`, `nonce`) over `data` in place.
pub fn xor_keystream(password: &[u8; PASSWORD_LEN], nonce: &[u8; NONCE_LEN], data: &mut [u8]) {
    let mut iv = [0u8; 12];
    iv[4..].copy_from_slice(nonce);
    let mut cipher = ChaCha20::new(password.into(), (&iv).into());
    cipher.apply_keystream(data);
}
