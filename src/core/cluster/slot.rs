// src/core/cluster/slot.rs

//! Implements the hash-slot algorithm used to route a key to a slot index.

use bytes::Bytes;
use crc::{CRC_32_ISO_HDLC, Crc};

/// The default number of routing slots when not overridden by configuration.
pub const DEFAULT_SLOT_COUNT: u32 = 1024;

/// `crc` crate's `CRC_32_ISO_HDLC` is the standard IEEE 802.3 CRC-32
/// polynomial, matching the backend's own per-key migration hashing.
const CRC32_ALGO: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Calculates the hash slot for a given key against `slot_count` slots.
///
/// If the key contains a hash tag -- a substring enclosed in `{...}` with a
/// non-empty inner span -- only the bytes inside the first such tag are
/// hashed; otherwise the whole key is hashed. An empty tag (`{}`) is not
/// recognized and falls through to hashing the whole key.
pub fn get_slot(key: &Bytes, slot_count: u32) -> u32 {
    CRC32_ALGO.checksum(hash_tag_or_key(key)) % slot_count
}

/// Returns the bytes that should actually be hashed for `key`: the contents
/// of its first non-empty `{...}` hash tag, or the whole key otherwise.
pub fn hash_tag_or_key(key: &Bytes) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(end_offset) = key[start + 1..].iter().position(|&b| b == b'}')
    {
        let end = start + 1 + end_offset;
        if end > start + 1 {
            return &key[start + 1..end];
        }
    }
    key
}
