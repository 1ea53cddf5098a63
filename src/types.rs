//! Core types shared across the validation and assembly layers

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// Hash type: 256-bit content hash
pub type Hash = [u8; 32];

/// Asset identifier, structurally a hash
pub type AssetId = Hash;

/// Account address: 20 bytes derived from a standard program hash
pub type Address = [u8; 20];

/// A quantity of some asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset_id: AssetId,
    pub amount: u64,
}

impl AssetAmount {
    pub fn new(asset_id: AssetId, amount: u64) -> Self {
        AssetAmount { asset_id, amount }
    }
}

/// A VM program. Identity is structural.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Program {
    pub vm_version: u64,
    pub code: Vec<u8>,
}

impl Program {
    pub fn new(vm_version: u64, code: Vec<u8>) -> Self {
        Program { vm_version, code }
    }
}

/// SHA3-256 of one byte string.
pub fn sha3_256(data: &[u8]) -> Hash {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-256 over the concatenation of several byte strings.
pub fn sha3_256_all(parts: &[&[u8]]) -> Hash {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// The 20-byte script hash committed by pay-to-witness programs:
/// RIPEMD-160 of SHA3-256.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest as _, Ripemd160};
    let digest = Ripemd160::digest(sha3_256(data));
    digest.into()
}

/// Converts a standard-program hash into a 20-byte address, keeping the
/// rightmost 20 bytes and left-padding short inputs with zeros.
pub fn address_from_hash(hash: &[u8]) -> Address {
    let mut addr = [0u8; 20];
    if hash.len() >= 20 {
        addr.copy_from_slice(&hash[hash.len() - 20..]);
    } else {
        addr[20 - hash.len()..].copy_from_slice(hash);
    }
    addr
}

/// Short hex form of a hash for log fields.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..4])
}
