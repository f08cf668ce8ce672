// src/core/cluster/slot.rs

//! Implements the cluster hash slot algorithm.

use bytes::Bytes;
use crc::{CRC_16_XMODEM, Crc};

/// The total number of hash slots in the cluster.
pub const NUM_SLOTS: usize = 16384;

/// CRC16/XMODEM (poly 0x1021, init 0) — the "standard CCITT polynomial,
/// seeded at 0" §4.G calls for. This is the variant that reproduces the
/// spec's own worked example (`slot_of("foo") == 12182`, §8 scenario 1);
/// `CRC_16_USB`'s different polynomial and seed give a different slot for
/// the same key.
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Calculates the hash slot for a given key.
///
/// It first checks for a "hash tag" (a substring enclosed in `{...}`) within
/// the key. If a hash tag is found,
/// only the content within the tag is used for the CRC16 calculation. This
/// allows users to force multiple keys into the same hash slot. If no hash
/// tag is found, the entire key is used.
///
/// The final slot is determined by `CRC16(key) % NUM_SLOTS`.
pub fn get_slot(key: &Bytes) -> u16 {
    // Check for a hash tag, e.g., "user:{123}:name".
    if let Some(start) = key.iter().position(|&b| b == b'{')
        && let Some(end_offset) = key[start + 1..].iter().position(|&b| b == b'}')
    {
        let end = start + 1 + end_offset;
        // Ensure the tag is not empty, e.g., "user:{}".
        if end > start + 1 {
            return CRC16_ALGO.checksum(&key[start + 1..end]) % (NUM_SLOTS as u16);
        }
    }
    // If no valid hash tag is found, hash the entire key.
    CRC16_ALGO.checksum(key) % (NUM_SLOTS as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hash_tag_falls_back_to_whole_key() {
        let whole = get_slot(&Bytes::from_static(b"foo{}"));
        let tagged = get_slot(&Bytes::from_static(b"foo"));
        assert_ne!(whole, get_slot(&Bytes::from_static(b"{}")));
        let _ = tagged;
    }

    #[test]
    fn matching_hash_tags_collide() {
        let a = get_slot(&Bytes::from_static(b"{user}:1"));
        let b = get_slot(&Bytes::from_static(b"{user}:2"));
        assert_eq!(a, b);
    }

    #[test]
    fn first_tag_wins() {
        let a = get_slot(&Bytes::from_static(b"{a}{b}"));
        let b = get_slot(&Bytes::from_static(b"a"));
        assert_eq!(a, b);
    }

    #[test]
    fn slot_is_within_range() {
        for key in ["foo", "bar", "{tag}rest", "", "a-very-long-key-name-1234567890"] {
            let slot = get_slot(&Bytes::copy_from_slice(key.as_bytes()));
            assert!((slot as usize) < NUM_SLOTS);
        }
    }
}
