//! Consensus constants and the block subsidy schedule

use crate::types::AssetId;

/// Max gas that one block contains
pub const MAX_BLOCK_GAS: u64 = 10_000_000;

/// Native-asset units burned per unit of VM gas
pub const VM_GAS_RATE: i64 = 200;

/// Gas charged per serialized transaction byte
pub const STORAGE_GAS_RATE: i64 = 1;

/// Upper bound on the gas budget a single transaction can buy
pub const MAX_GAS_AMOUNT: i64 = 5_000_000;

/// Validation work a transaction may consume before proving it can pay
pub const DEFAULT_GAS_CREDIT: i64 = 30_000;

/// Number of blocks a coinbase output stays unspendable
pub const COINBASE_PENDING_BLOCK_NUMBER: u64 = 10;

/// Blocks between difficulty retargets
pub const BLOCKS_PER_RETARGET: u64 = 11;

/// Retarget aims for one block per this many seconds
pub const TARGET_SECONDS_PER_BLOCK: u64 = 13;

/// The proof-of-work seed rotates every this many retarget windows
pub const SEED_PER_RETARGET: u64 = 7;

/// Maximum number of seconds a block time is allowed to be ahead of now
pub const MAX_TIME_OFFSET_SECONDS: u64 = 60 * 60;

/// Number of ancestors that feed the past-median-time calculation
pub const MEDIAN_TIME_BLOCKS: usize = 11;

/// Size of the data push in a pay-to-witness-script-hash program
pub const P2WSH_DATA_SIZE: usize = 20;

/// Upper bound on the coinbase arbitrary field
pub const COINBASE_ARBITRARY_SIZE_LIMIT: usize = 128;

/// Subsidy paid by every post-genesis block
const BASE_SUBSIDY: u64 = 750_000_000;

/// Total native units created by the genesis block
pub const INITIAL_BLOCK_SUBSIDY: u64 = 140_700_000_750_000_000;

/// Subsidy halving interval; effectively infinite, the subsidy is flat
const SUBSIDY_REDUCTION_INTERVAL: u64 = u64::MAX;

/// Fee ceiling enforced by the transaction pool
pub const MAX_TX_FEE: u64 = INITIAL_BLOCK_SUBSIDY;

/// Default time-to-live stamped onto signing templates
pub const MAX_TX_TTL_SECONDS: u64 = 5 * 60;

/// NativeAssetID is the asset id of the chain's native asset, the only
/// asset that pays gas: ffffffff…ffff
pub const NATIVE_ASSET_ID: AssetId = [0xff; 32];

/// Human-readable alias of the native asset
pub const NATIVE_ASSET_ALIAS: &str = "HYB";

/// BlockSubsidy calculates the coinbase reward for the given block height.
pub fn block_subsidy(height: u64) -> u64 {
    if height == 0 {
        return INITIAL_BLOCK_SUBSIDY;
    }
    BASE_SUBSIDY >> (height / SUBSIDY_REDUCTION_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_subsidy() {
        assert_eq!(block_subsidy(0), INITIAL_BLOCK_SUBSIDY);
    }

    #[test]
    fn test_subsidy_is_flat_after_genesis() {
        for height in [1u64, 2, 1_000, 840_000, u64::MAX - 1] {
            assert_eq!(block_subsidy(height), 750_000_000);
        }
    }
}
