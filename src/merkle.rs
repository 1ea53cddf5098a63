//! Merkle roots over transaction ids and transaction status flags
//!
//! Binary tree with domain-separated leaf and interior prefixes; an
//! unbalanced level splits at the largest power of two below the count,
//! so no leaf is ever duplicated.

use crate::types::{sha3_256_all, Hash};

const LEAF_PREFIX: &[u8] = &[0x00];
const INTERIOR_PREFIX: &[u8] = &[0x01];

/// TxMerkleRoot computes the root over the transaction ids of a block.
pub fn tx_merkle_root(tx_ids: &[Hash]) -> Hash {
    let leaves: Vec<&[u8]> = tx_ids.iter().map(|id| id.as_slice()).collect();
    merkle_root(&leaves)
}

/// TxStatusMerkleRoot commits to the per-transaction status flags.
pub fn tx_status_merkle_root(statuses: &[bool]) -> Hash {
    let bytes: Vec<[u8; 1]> = statuses.iter().map(|s| [*s as u8]).collect();
    let leaves: Vec<&[u8]> = bytes.iter().map(|b| b.as_slice()).collect();
    merkle_root(&leaves)
}

fn merkle_root(leaves: &[&[u8]]) -> Hash {
    match leaves.len() {
        0 => [0u8; 32],
        1 => sha3_256_all(&[LEAF_PREFIX, leaves[0]]),
        n => {
            let split = largest_power_of_two_below(n);
            let left = merkle_root(&leaves[..split]);
            let right = merkle_root(&leaves[split..]);
            sha3_256_all(&[INTERIOR_PREFIX, &left, &right])
        }
    }
}

fn largest_power_of_two_below(n: usize) -> usize {
    debug_assert!(n > 1);
    let mut p = 1;
    while p * 2 < n {
        p *= 2;
    }
    p
}
