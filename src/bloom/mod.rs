//! Per-segment bloom filter.
//!
//! A fixed-size bit array consulted before a segment's index is binary
//! searched: a negative answer proves the key is absent, a positive answer
//! still requires confirmation against the index.
//!
//! Four bit positions are derived from a single 128-bit xxh3 hash of the
//! key, split into four 32-bit lanes, each reduced modulo the array size in
//! bits. All bit manipulation uses bitwise operators.
//!
//! The filter is never serialized: segments rebuild it from their index
//! keys at open time, so the on-disk format carries no filter block.


use xxhash_rust::xxh3::xxh3_128;

/// Size of the bit array in bytes (~10 KiB per segment).
pub const BLOOM_FILTER_BYTES: usize = 10 * 1024;

const BLOOM_FILTER_BITS: u32 = (BLOOM_FILTER_BYTES * 8) as u32;

/// Fixed-size bloom filter over segment keys.
pub struct BloomFilter {
    bits: Box<[u8; BLOOM_FILTER_BYTES]>,
}

impl BloomFilter {
    /// Creates an empty filter (all bits clear).
    pub fn new() -> Self {
        Self {
            bits: Box::new([0u8; BLOOM_FILTER_BYTES]),
        }
    }

    /// Marks a key as present.
    pub fn insert(&mut self, key: &[u8]) {
        for lane in hash_lanes(key) {
            self.set_bit(lane % BLOOM_FILTER_BITS);
        }
    }

    /// Tests a key for membership.
    ///
    /// `false` guarantees the key was never inserted; `true` may be a false
    /// positive.
    pub fn contains(&self, key: &[u8]) -> bool {
        hash_lanes(key)
            .iter()
            .all(|lane| self.get_bit(lane % BLOOM_FILTER_BITS))
    }

    fn set_bit(&mut self, index: u32) {
        let byte = (index / 8) as usize;
        let bit = index % 8;
        self.bits[byte] |= 1 << bit;
    }

    fn get_bit(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let bit = index % 8;
        self.bits[byte] & (1 << bit) != 0
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits one 128-bit hash of the key into four independent 32-bit lanes.
fn hash_lanes(key: &[u8]) -> [u32; 4] {
    let h = xxh3_128(key);
    [
        h as u32,
        (h >> 32) as u32,
        (h >> 64) as u32,
        (h >> 96) as u32,
    ]
}
