//! 64-bit MurmurHash2 over byte keys.
//!
//! The output is part of the on-disk format: records are placed by the low
//! bits of this hash, so any change here orphans every existing table.

const SEED: u32 = 0xe17a_1465;
const M: u64 = 0xc6a4_a793_5bd1_e995;
const R: u32 = 47;

/// Hashes `data`, always returning a value below `2^63`.
pub fn murmur_hash(data: &[u8]) -> u64 {
    let len = data.len() as u64;
    let mut h = u64::from(SEED) ^ len.wrapping_mul(M);

    let mut blocks = data.chunks_exact(8);
    for block in &mut blocks {
        let mut k = u64::from_le_bytes([
            block[0], block[1], block[2], block[3], block[4], block[5], block[6], block[7],
        ]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        for (i, &b) in tail.iter().enumerate().rev() {
            h ^= u64::from(b) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;

    // clear the sign bit
    (h << 1) >> 1
}

/// Returns the smallest integer above `start` whose native-endian bytes hash
/// to the same low `bits` bits as `start`'s.
///
/// Used to build keys that all land in one bucket.
pub fn find_collision(start: u64, bits: u32) -> u64 {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let target = murmur_hash(&start.to_ne_bytes()) & mask;
    let mut candidate = start.wrapping_add(1);
    while murmur_hash(&candidate.to_ne_bytes()) & mask != target {
        candidate = candidate.wrapping_add(1);
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_matches_reference_vectors() {
        assert_eq!(murmur_hash(b""), 0x1bfa_e0a4_e613_fc3c);
        assert_eq!(murmur_hash(b"a"), 0x081c_cc83_1546_66a7);
        assert_eq!(murmur_hash(b"hello"), 0x4656_272f_1aa3_2ab5);
        assert_eq!(murmur_hash(b"hello world!"), 0x16b1_7bea_7cc4_027e);
        assert_eq!(murmur_hash(b"0123456789abcdef"), 0x256e_4ce8_3ead_c694);
        assert_eq!(murmur_hash(&0u64.to_le_bytes()), 0x3187_b4a8_ec70_61ab);
        assert_eq!(murmur_hash(&1u64.to_le_bytes()), 0x5b45_ef0c_dc9d_d012);
        assert_eq!(murmur_hash(&42u64.to_le_bytes()), 0x0a5c_1929_2f4c_f743);
    }

    #[test]
    #[cfg(target_endian = "little")]
    fn test_collisions_follow_the_search_order() {
        assert_eq!(find_collision(1, 16), 91_520);
        assert_eq!(find_collision(91_520, 16), 111_949);
    }

    #[test]
    fn test_collisions_share_low_bits() {
        let mut key = 7u64;
        for _ in 0..8 {
            let next = find_collision(key, 10);
            assert!(next > key);
            assert_eq!(
                murmur_hash(&next.to_ne_bytes()) & 0x3ff,
                murmur_hash(&key.to_ne_bytes()) & 0x3ff
            );
            key = next;
        }
    }

    proptest! {
        #[test]
        fn prop_hash_is_non_negative(data in prop::collection::vec(any::<u8>(), 0..64)) {
            prop_assert!(murmur_hash(&data) < (1u64 << 63));
        }

        #[test]
        fn prop_hash_is_deterministic(data in prop::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(murmur_hash(&data), murmur_hash(&data.clone()));
        }
    }
}
