//! Proof of work: compact targets, the retarget schedule, and seed
//! rotation
//!
//! Difficulty retargets every [`BLOCKS_PER_RETARGET`] blocks toward
//! [`TARGET_SECONDS_PER_BLOCK`]; the proof-of-work hash mixes the block
//! id with an opaque 32-byte seed that rotates every
//! [`SEED_PER_RETARGET`] retarget windows.

use crate::constants::{
    BLOCKS_PER_RETARGET, SEED_PER_RETARGET, TARGET_SECONDS_PER_BLOCK,
};
use crate::error::ChainError;
use crate::types::{sha3_256, sha3_256_all, Hash};

/// Compact bits of the genesis block: near-maximum target, every hash
/// qualifies until the first retarget.
pub const GENESIS_BITS: u64 = 0x207f_ffff;

/// Maximum compact target (minimum difficulty).
pub const MAX_BITS: u64 = 0x207f_ffff;

/// InitialSeed is SHA3-256 of 32 zero bytes.
pub fn initial_seed() -> Hash {
    sha3_256(&[0u8; 32])
}

/// 256-bit unsigned integer, little-endian limbs. Just enough arithmetic
/// for target expansion and retargeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct U256([u64; 4]);

impl U256 {
    pub const ZERO: U256 = U256([0; 4]);

    pub fn from_be_bytes(bytes: &[u8; 32]) -> U256 {
        let mut limbs = [0u64; 4];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            limbs[3 - i] = u64::from_be_bytes(chunk.try_into().expect("8-byte chunk"));
        }
        U256(limbs)
    }

    pub fn from_u64(v: u64) -> U256 {
        U256([v, 0, 0, 0])
    }

    /// Multiply by a small factor; None on overflow past 256 bits.
    pub fn checked_mul_u64(&self, factor: u64) -> Option<U256> {
        let mut limbs = [0u64; 4];
        let mut carry: u128 = 0;
        for i in 0..4 {
            let product = self.0[i] as u128 * factor as u128 + carry;
            limbs[i] = product as u64;
            carry = product >> 64;
        }
        if carry != 0 {
            return None;
        }
        Some(U256(limbs))
    }

    /// Integer division by a small divisor.
    pub fn div_u64(&self, divisor: u64) -> U256 {
        debug_assert!(divisor != 0);
        let mut limbs = [0u64; 4];
        let mut rem: u128 = 0;
        for i in (0..4).rev() {
            let acc = (rem << 64) | self.0[i] as u128;
            limbs[i] = (acc / divisor as u128) as u64;
            rem = acc % divisor as u128;
        }
        U256(limbs)
    }

    fn shl_bytes(&self, n: usize) -> Option<U256> {
        let mut bytes = self.to_be_bytes();
        for &b in &bytes[..n.min(32)] {
            if b != 0 {
                return None;
            }
        }
        bytes.copy_within(n.., 0);
        for b in &mut bytes[32 - n..] {
            *b = 0;
        }
        Some(U256::from_be_bytes(&bytes))
    }

    fn shr_bytes(&self, n: usize) -> U256 {
        if n >= 32 {
            return U256::ZERO;
        }
        let bytes = self.to_be_bytes();
        let mut shifted = [0u8; 32];
        shifted[n..].copy_from_slice(&bytes[..32 - n]);
        U256::from_be_bytes(&shifted)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for i in 0..4 {
            bytes[(3 - i) * 8..(4 - i) * 8].copy_from_slice(&self.0[i].to_be_bytes());
        }
        bytes
    }

    fn bit_len(&self) -> usize {
        for i in (0..4).rev() {
            if self.0[i] != 0 {
                return i * 64 + (64 - self.0[i].leading_zeros() as usize);
            }
        }
        0
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                std::cmp::Ordering::Equal => continue,
                ordering => return ordering,
            }
        }
        std::cmp::Ordering::Equal
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// ExpandTarget converts compact bits into the full 256-bit target.
/// Layout: one exponent byte over a 23-bit mantissa.
pub fn expand_target(bits: u64) -> Result<U256, ChainError> {
    let exponent = ((bits >> 24) & 0xff) as usize;
    let mantissa = bits & 0x007f_ffff;
    if bits & 0x0080_0000 != 0 {
        return Err(ChainError::BadBits);
    }
    if exponent > 32 {
        return Err(ChainError::BadBits);
    }
    let base = U256::from_u64(mantissa);
    if exponent <= 3 {
        Ok(base.shr_bytes(3 - exponent))
    } else {
        base.shl_bytes(exponent - 3).ok_or(ChainError::BadBits)
    }
}

/// CompressTarget converts a target back to compact bits, rounding down.
pub fn compress_target(target: &U256) -> u64 {
    if *target == U256::ZERO {
        return 0;
    }
    let mut exponent = (target.bit_len() + 7) / 8;
    let mut mantissa = if exponent <= 3 {
        let bytes = target.to_be_bytes();
        let mut m: u64 = 0;
        for &b in &bytes[32 - exponent..] {
            m = (m << 8) | b as u64;
        }
        m << (8 * (3 - exponent))
    } else {
        let shifted = target.shr_bytes(exponent - 3);
        shifted.0[0]
    };
    // keep the sign bit of the mantissa clear
    if mantissa & 0x0080_0000 != 0 {
        mantissa >>= 8;
        exponent += 1;
    }
    ((exponent as u64) << 24) | (mantissa & 0x007f_ffff)
}

/// CheckProofOfWork reports whether the block hash, mixed with the
/// rotating seed, meets the compact target.
pub fn check_proof_of_work(block_hash: &Hash, seed: &Hash, bits: u64) -> bool {
    let Ok(target) = expand_target(bits) else {
        return false;
    };
    let mixed = sha3_256_all(&[block_hash, seed]);
    U256::from_be_bytes(&mixed) <= target
}

/// CalcNextBits computes the compact target of the block following a
/// parent at `parent_height`, retargeting on window boundaries.
///
/// `window_start_timestamp` is the timestamp of the block
/// `BLOCKS_PER_RETARGET - 1` blocks behind the parent.
pub fn calc_next_bits(
    parent_height: u64,
    parent_bits: u64,
    parent_timestamp: u64,
    window_start_timestamp: u64,
) -> u64 {
    if (parent_height + 1) % BLOCKS_PER_RETARGET != 0 || parent_height == 0 {
        return parent_bits;
    }

    let expected = (BLOCKS_PER_RETARGET - 1) * TARGET_SECONDS_PER_BLOCK;
    let actual = parent_timestamp.saturating_sub(window_start_timestamp).max(1);
    // clamp to one quarter / four times the expected span
    let clamped = actual.clamp(expected / 4, expected * 4).max(1);

    let Ok(old_target) = expand_target(parent_bits) else {
        return parent_bits;
    };
    let new_target = match old_target.checked_mul_u64(clamped) {
        Some(t) => t.div_u64(expected),
        None => old_target.div_u64(expected).checked_mul_u64(clamped).unwrap_or(old_target),
    };

    let new_bits = compress_target(&new_target);
    new_bits.min(MAX_BITS)
}

/// CalcNextSeed derives the proof-of-work seed of a child block: the
/// parent's hash on a seed-rotation boundary, the parent's seed
/// otherwise.
pub fn calc_next_seed(parent_height: u64, parent_hash: &Hash, parent_seed: &Hash) -> Hash {
    if parent_height == 0 {
        return initial_seed();
    }
    if (parent_height + 1) % (SEED_PER_RETARGET * BLOCKS_PER_RETARGET) == 0 {
        *parent_hash
    } else {
        *parent_seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_compress_round_trip() {
        for bits in [GENESIS_BITS, 0x1d00_ffff, 0x1b0404cb, 0x0300_ffff] {
            let target = expand_target(bits).unwrap();
            assert_eq!(compress_target(&target), bits);
        }
    }

    #[test]
    fn test_expand_rejects_bad_bits() {
        assert!(expand_target(0xff00_0001).is_err());
        // sign bit set in mantissa
        assert!(expand_target(0x0280_0000).is_err());
    }

    #[test]
    fn test_genesis_target_is_minable() {
        // with the genesis target roughly half of all hashes qualify;
        // a short nonce scan must find one
        let seed = initial_seed();
        let found = (0u8..=255).any(|nonce| check_proof_of_work(&[nonce; 32], &seed, GENESIS_BITS));
        assert!(found);
    }

    #[test]
    fn test_tight_target_rejects() {
        // exponent 1: target is tiny
        assert!(!check_proof_of_work(&[0xau8; 32], &initial_seed(), 0x0100_0001));
    }

    #[test]
    fn test_no_retarget_off_boundary() {
        assert_eq!(calc_next_bits(5, GENESIS_BITS, 1_000, 0), GENESIS_BITS);
        assert_eq!(calc_next_bits(0, GENESIS_BITS, 1_000, 0), GENESIS_BITS);
    }

    #[test]
    fn test_retarget_on_boundary_adjusts() {
        let parent_height = BLOCKS_PER_RETARGET - 1; // height 10, next is 11
        let bits = 0x1d00_ffff;
        let expected_span = (BLOCKS_PER_RETARGET - 1) * TARGET_SECONDS_PER_BLOCK;

        // blocks came exactly on schedule: unchanged (modulo rounding)
        let same = calc_next_bits(parent_height, bits, expected_span, 0);
        assert_eq!(same, bits);

        // blocks came twice as fast: difficulty rises (target shrinks)
        let faster = calc_next_bits(parent_height, bits, expected_span / 2, 0);
        let faster_target = expand_target(faster).unwrap();
        let base_target = expand_target(bits).unwrap();
        assert!(faster_target < base_target);

        // blocks came slow: difficulty drops (target grows)
        let slower = calc_next_bits(parent_height, bits, expected_span * 2, 0);
        let slower_target = expand_target(slower).unwrap();
        assert!(slower_target > base_target);
    }

    #[test]
    fn test_seed_rotation() {
        let parent_hash = [0xabu8; 32];
        let seed = [0xcdu8; 32];
        let rotation = SEED_PER_RETARGET * BLOCKS_PER_RETARGET;

        assert_eq!(calc_next_seed(0, &parent_hash, &seed), initial_seed());
        assert_eq!(calc_next_seed(5, &parent_hash, &seed), seed);
        assert_eq!(calc_next_seed(rotation - 1, &parent_hash, &seed), parent_hash);
        assert_eq!(calc_next_seed(rotation, &parent_hash, &seed), seed);
    }
}
