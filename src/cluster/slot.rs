//! Redis Cluster slot calculation.
//!
//! Redis Cluster uses CRC16 to map keys to slots (0-16383).
//! This module provides utilities for calculating slot numbers from keys.

use crc::{Crc, CRC_16_XMODEM};

/// Number of hash slots in Redis Cluster.
pub const SLOT_COUNT: u16 = 16384;

/// CRC-16/XMODEM algorithm used by Redis.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the Redis Cluster slot for a given key.
///
/// Redis uses CRC16 modulo 16384 for slot calculation.
/// If the key contains `{...}`, only the content inside the braces
/// is used for hashing (hash tags).
///
/// # Arguments
///
/// * `key` - The Redis key to calculate the slot for
///
/// # Returns
///
/// The slot number (0-16383)
///
/// # Examples
///
/// ```
/// use shardis::cluster::key_slot;
///
/// assert_eq!(key_slot(b"foo"), key_slot(b"foo"));
/// assert_eq!(key_slot(b"{user1000}.following"), key_slot(b"{user1000}.followers"));
/// assert_ne!(key_slot(b"user1000"), key_slot(b"user2000"));
/// ```
pub fn key_slot(key: &[u8]) -> u16 {
    let hash_key = extract_hash_tag(key);
    let crc = CRC16.checksum(hash_key);
    crc % SLOT_COUNT
}

/// Extracts the hash tag from a key.
///
/// Redis hash tags are defined by `{...}`:
/// - `{user1000}.following` → hash tag is `user1000`
/// - `foo{bar}baz` → hash tag is `bar`
/// - `foo{}{bar}` → no valid hash tag (empty first pair), use whole key
/// - `foo` → no hash tag, use whole key
fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(end) = key[start + 1..].iter().position(|&b| b == b'}') {
            let tag_start = start + 1;
            let tag_end = tag_start + end;

            // Only use hash tag if it's non-empty
            if tag_end > tag_start {
                return &key[tag_start..tag_end];
            }
        }
    }

    key
}
