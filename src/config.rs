//! Network parameters and the genesis block

use std::sync::Arc;

use crate::block::{Block, BlockCommitment, BlockHeader};
use crate::constants::{INITIAL_BLOCK_SUBSIDY, NATIVE_ASSET_ID};
use crate::contract_vm::ContractVm;
use crate::merkle::{tx_merkle_root, tx_status_merkle_root};
use crate::pow::GENESIS_BITS;
use crate::wire::{CoinbaseInput, Tx, TxData, TxInput, TxOutput, TypedInput, ASSET_VERSION};

/// The networks this chain runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Main,
    Test,
    Solo,
}

impl Network {
    pub fn name(&self) -> &'static str {
        match self {
            Network::Main => "main",
            Network::Test => "test",
            Network::Solo => "solo",
        }
    }
}

/// Node-level configuration threaded into the chain facade. No ambient
/// globals; every consumer receives this by handle.
#[derive(Clone)]
pub struct Config {
    pub network: Network,
    /// Mirror native-asset flows into the account-state store
    pub support_balance_in_state_db: bool,
    /// Control program coinbase outputs pay to; the default coinbase
    /// program when absent
    pub coinbase_program: Option<Vec<u8>>,
    /// Contract VM backing the hybrid opcodes; absent means those
    /// programs fail gas-only
    pub contract_vm: Option<Arc<dyn ContractVm + Send + Sync>>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Solo,
            support_balance_in_state_db: true,
            coinbase_program: None,
            contract_vm: None,
        }
    }
}

/// The program controlling the genesis output: a P2WSH pay-to-witness
/// program over a fixed 20-byte hash.
fn genesis_control_program() -> Vec<u8> {
    hex::decode("0014a07c9dd4d7c8b2fd2e7d3ab1b32459b2ae1b0b5c")
        .expect("static genesis control program")
}

/// The transaction that creates the initial native supply.
pub fn genesis_tx() -> Tx {
    let data = TxData {
        version: 1,
        serialized_size: 0,
        time_range: 0,
        inputs: vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Coinbase(CoinbaseInput {
                arbitrary: b"A ledger is a promise the network keeps. -- Sep/01/2018.".to_vec(),
            }),
        }],
        outputs: vec![TxOutput::new(
            NATIVE_ASSET_ID,
            INITIAL_BLOCK_SUBSIDY,
            genesis_control_program(),
        )],
        reference_data: Vec::new(),
    };
    Tx::new(data).expect("genesis transaction maps")
}

/// GenesisBlock returns the genesis block for the configured network.
/// The state root starts zero; account-mode initialization derives and
/// stamps the seeded root.
pub fn genesis_block(config: &Config) -> Block {
    let tx = genesis_tx();
    let transactions_merkle_root = tx_merkle_root(&[tx.id()]);
    let transaction_status_hash = tx_status_merkle_root(&[false]);

    let (timestamp, nonce) = match config.network {
        Network::Main => (1535735358, 1530935879),
        Network::Test => (1535703376, 1530936083),
        Network::Solo => (1535703376, 42),
    };

    Block {
        header: BlockHeader {
            version: 1,
            height: 0,
            previous_block_hash: [0u8; 32],
            timestamp,
            nonce,
            bits: GENESIS_BITS,
            block_commitment: BlockCommitment {
                transactions_merkle_root,
                transaction_status_hash,
                state_root: [0u8; 32],
            },
        },
        transactions: vec![tx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segwit;

    #[test]
    fn test_genesis_tx_is_standard_coinbase() {
        let tx = genesis_tx();
        assert_eq!(tx.data.inputs.len(), 1);
        assert!(matches!(tx.data.inputs[0].typed, TypedInput::Coinbase(_)));
        assert_eq!(tx.data.outputs[0].asset_amount.amount, INITIAL_BLOCK_SUBSIDY);
        assert!(segwit::is_p2wsh_script(&tx.data.outputs[0].control_program));
    }

    #[test]
    fn test_genesis_blocks_differ_per_network() {
        let main = genesis_block(&Config {
            network: Network::Main,
            ..Config::default()
        });
        let solo = genesis_block(&Config {
            network: Network::Solo,
            ..Config::default()
        });
        assert_ne!(main.hash(), solo.hash());
        assert_eq!(main.header.height, 0);
        assert_eq!(main.transactions.len(), 1);
    }

    #[test]
    fn test_genesis_commits_to_its_transaction() {
        let block = genesis_block(&Config::default());
        let root = tx_merkle_root(&[block.transactions[0].id()]);
        assert_eq!(block.header.block_commitment.transactions_merkle_root, root);
    }
}
