//! Uniform grain hashing and hash-band partitioning.
//!
//! Reminder rows are spread over a small set of partitions derived from the
//! top bits of the grain's uniform hash, stored rebias-shifted into signed
//! 32-bit space so the database's ordered comparisons over the hash column
//! line up with ring order over the unsigned hash space.

use crate::grain::GrainRef;
use sha2::{Digest, Sha256};

/// Number of top hash bits used as the reminder partition index.
/// 2^6 = 64 partitions.
pub const REMINDER_PARTITION_BITS: u32 = 6;

/// Uniform 32-bit hash over a grain identity.
///
/// The hash must be stable across processes: reminder rows written by one
/// host are range-scanned by another, and both must agree on the row's ring
/// position.
pub trait UniformHasher: Send + Sync {
    fn uniform_hash(&self, grain: &GrainRef) -> u32;
}

/// Default hasher: the first four big-endian bytes of SHA-256 over the
/// encoded grain key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl UniformHasher for Sha256Hasher {
    fn uniform_hash(&self, grain: &GrainRef) -> u32 {
        let digest = Sha256::digest(grain.encode());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

/// Map an unsigned hash onto the signed range the database sorts by.
///
/// A wrapping add of `i32::MIN` is a monotonic bijection from `u32` order to
/// `i32` order, so range predicates over the signed column are equivalent to
/// ring-range predicates over the unsigned hash space.
pub fn rebias_to_signed(hash: u32) -> i32 {
    hash.wrapping_add(1 << 31) as i32
}

/// Partition index for a rebiased hash: its top `bits` bits, arithmetic
/// shift, so rows cluster into `2^bits` contiguous hash bands.
pub fn partition_of(signed_hash: i32, bits: u32) -> i8 {
    (signed_hash >> (32 - bits)) as i8
}

/// Inclusive list of partitions spanned by the rebiased hash interval
/// `[start, end]`. Callers split wraparound ranges before calling, so
/// `start <= end` always holds here.
pub fn partitions_for_range(start: u32, end: u32) -> Vec<i8> {
    debug_assert!(start <= end);
    let first = partition_of(rebias_to_signed(start), REMINDER_PARTITION_BITS);
    let last = partition_of(rebias_to_signed(end), REMINDER_PARTITION_BITS);
    (first..=last).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebias_preserves_order() {
        let samples = [0u32, 1, 0x7fff_ffff, 0x8000_0000, 0xffff_fffe, u32::MAX];
        for pair in samples.windows(2) {
            assert!(rebias_to_signed(pair[0]) < rebias_to_signed(pair[1]));
        }
        assert_eq!(rebias_to_signed(0), i32::MIN);
        assert_eq!(rebias_to_signed(u32::MAX), i32::MAX);
    }

    #[test]
    fn partition_covers_signed_byte_range() {
        assert_eq!(partition_of(i32::MIN, REMINDER_PARTITION_BITS), -32);
        assert_eq!(partition_of(i32::MAX, REMINDER_PARTITION_BITS), 31);
        assert_eq!(partition_of(0, REMINDER_PARTITION_BITS), 0);
    }

    #[test]
    fn full_range_spans_all_partitions() {
        let all = partitions_for_range(0, u32::MAX);
        assert_eq!(all.len(), 64);
        assert_eq!(*all.first().unwrap(), -32);
        assert_eq!(*all.last().unwrap(), 31);
        assert!(all.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn narrow_range_is_a_single_partition() {
        let parts = partitions_for_range(100, 200);
        assert_eq!(parts, vec![-32]);
    }

    #[test]
    fn wrap_boundary_is_covered_by_the_two_sub_scans() {
        // A ring arc crossing zero: [0xFFFFFFF0, MAX] plus [0, 0x10].
        let high = partitions_for_range(0xffff_fff0, u32::MAX);
        let low = partitions_for_range(0, 0x10);
        assert_eq!(high, vec![31]);
        assert_eq!(low, vec![-32]);
    }

    #[test]
    fn default_hasher_is_stable_and_spreads() {
        let hasher = Sha256Hasher;
        let a = hasher.uniform_hash(&GrainRef::Integer(1));
        assert_eq!(a, hasher.uniform_hash(&GrainRef::Integer(1)));
        assert_ne!(a, hasher.uniform_hash(&GrainRef::Integer(2)));
    }
}
