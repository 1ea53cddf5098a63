//! Blocks, per-transaction status flags, and block validation

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::BlockNode;
use crate::constants::{block_subsidy, MAX_BLOCK_GAS, MAX_TIME_OFFSET_SECONDS};
use crate::encoding;
use crate::entry::Entry;
use crate::error::{ChainError, ValidationError};
use crate::merkle::{tx_merkle_root, tx_status_merkle_root};
use crate::pow;
use crate::state::{AccountState, TxLog};
use crate::types::{sha3_256_all, short_hex, Hash};
use crate::validation::{validate_tx, BlockContext};
use crate::vm::ChainContext;
use crate::wire::Tx;

/// The roots a block commits to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockCommitment {
    pub transactions_merkle_root: Hash,
    pub transaction_status_hash: Hash,
    pub state_root: Hash,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u64,
    pub height: u64,
    pub previous_block_hash: Hash,
    pub timestamp: u64,
    pub nonce: u64,
    pub bits: u64,
    pub block_commitment: BlockCommitment,
}

impl BlockHeader {
    /// Content hash of the header.
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::new();
        let _ = encoding::write_varint63(&mut buf, self.version);
        let _ = encoding::write_varint63(&mut buf, self.height);
        encoding::write_hash(&mut buf, &self.previous_block_hash);
        let _ = encoding::write_varint63(&mut buf, self.timestamp);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        encoding::write_hash(&mut buf, &self.block_commitment.transactions_merkle_root);
        encoding::write_hash(&mut buf, &self.block_commitment.transaction_status_hash);
        encoding::write_hash(&mut buf, &self.block_commitment.state_root);
        sha3_256_all(&[b"blockheader:", buf.as_slice()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Tx>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// The validation-facing view of this block.
    pub fn context(&self) -> BlockContext {
        BlockContext {
            version: self.header.version,
            height: self.header.height,
            first_tx_id: self.transactions.first().map(|tx| tx.id()),
        }
    }
}

/// Per-transaction verdicts and contract logs of one block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionStatus {
    entries: Vec<TxStatusEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxStatusEntry {
    pub status_fail: bool,
    pub logs: Vec<TxLog>,
}

impl TransactionStatus {
    pub fn new() -> Self {
        TransactionStatus::default()
    }

    fn entry_mut(&mut self, index: usize) -> &mut TxStatusEntry {
        if self.entries.len() <= index {
            self.entries.resize_with(index + 1, TxStatusEntry::default);
        }
        &mut self.entries[index]
    }

    pub fn set_status(&mut self, index: usize, status_fail: bool) {
        self.entry_mut(index).status_fail = status_fail;
    }

    pub fn set_logs(&mut self, index: usize, logs: Vec<TxLog>) {
        self.entry_mut(index).logs = logs;
    }

    pub fn get_status(&self, index: usize) -> Option<bool> {
        self.entries.get(index).map(|e| e.status_fail)
    }

    /// The flag vector committed by the status merkle root.
    pub fn verify_status(&self) -> Vec<bool> {
        self.entries.iter().map(|e| e.status_fail).collect()
    }
}

/// ValidateBlockHeader checks a block's header against its parent node.
pub fn validate_block_header(
    block: &Block,
    parent: &BlockNode,
    now: u64,
) -> Result<(), ChainError> {
    let header = &block.header;
    if header.version < parent.version {
        return Err(ChainError::VersionRegression {
            parent: parent.version,
            block: header.version,
        });
    }
    if header.height != parent.height + 1 {
        return Err(ChainError::MisorderedBlockHeight {
            parent: parent.height,
            block: header.height,
        });
    }
    if header.bits != parent.calc_next_bits() {
        return Err(ChainError::BadBits);
    }
    if parent.hash != header.previous_block_hash {
        return Err(ChainError::MismatchedBlock(
            format!(
                "previous block ID {}, block wants {}",
                short_hex(&parent.hash),
                short_hex(&header.previous_block_hash)
            )
            .into(),
        ));
    }

    if header.timestamp > now + MAX_TIME_OFFSET_SECONDS {
        return Err(ChainError::BadTimestamp);
    }
    if header.timestamp <= parent.calc_past_median_time() {
        return Err(ChainError::BadTimestamp);
    }

    if !pow::check_proof_of_work(&block.hash(), &parent.calc_next_seed(), header.bits) {
        return Err(ChainError::WorkProof);
    }
    Ok(())
}

/// ValidateBlock validates a block and the transactions within against
/// the account state rooted at the parent.
pub fn validate_block(
    block: &Block,
    parent: &BlockNode,
    chain: &dyn ChainContext,
    state_db: &mut dyn AccountState,
    now: u64,
) -> Result<TransactionStatus, ChainError> {
    validate_block_header(block, parent, now)?;

    let block_hash = block.hash();
    let block_context = block.context();
    let mut tx_status = TransactionStatus::new();
    let mut block_gas_sum: u64 = 0;
    let mut coinbase_amount = block_subsidy(block.header.height);

    for (i, tx) in block.transactions.iter().enumerate() {
        let revision = state_db.snapshot();
        state_db.prepare(tx.id(), block_hash, i);

        let (gas_status, verdict) = validate_tx(&tx.entries, &block_context, chain, state_db);
        if !gas_status.gas_valid {
            let err = verdict.err().unwrap_or(ValidationError::OverGasCredit);
            return Err(ChainError::Validation(err.ctx(format!(
                "validate of transaction {} of {}",
                i,
                block.transactions.len()
            ))));
        }
        let gas_only = verdict.is_err();
        if gas_only {
            state_db.revert_to_snapshot(revision);
        }
        state_db.finalise();

        tx_status.set_logs(i, state_db.get_logs(&tx.id()));
        tx_status.set_status(i, gas_only);
        coinbase_amount += gas_status.asset_value;
        block_gas_sum += gas_status.gas_used as u64;
        if block_gas_sum > MAX_BLOCK_GAS {
            return Err(ChainError::OverBlockLimit);
        }
    }

    check_coinbase_amount(block, coinbase_amount)?;

    let tx_ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id()).collect();
    if tx_merkle_root(&tx_ids) != block.header.block_commitment.transactions_merkle_root {
        return Err(ChainError::MismatchedMerkleRoot(
            "transaction id merkle root".into(),
        ));
    }
    if tx_status_merkle_root(&tx_status.verify_status())
        != block.header.block_commitment.transaction_status_hash
    {
        return Err(ChainError::MismatchedMerkleRoot(
            "transaction status merkle root".into(),
        ));
    }

    let state_root = state_db.intermediate_root(true);
    if state_root != block.header.block_commitment.state_root {
        return Err(ChainError::MismatchedMerkleRoot("state root".into()));
    }

    debug!(
        height = block.header.height,
        gas = block_gas_sum,
        txs = block.transactions.len(),
        "block validated"
    );
    Ok(tx_status)
}

/// The coinbase output must pay exactly the subsidy plus the gas fees
/// collected from the block's transactions.
fn check_coinbase_amount(block: &Block, amount: u64) -> Result<(), ChainError> {
    let coinbase = block
        .transactions
        .first()
        .ok_or_else(|| ChainError::Validation(ValidationError::WrongCoinbaseTransaction))?;
    let result_id = coinbase
        .entries
        .header
        .result_ids
        .first()
        .ok_or_else(|| ChainError::Validation(ValidationError::WrongCoinbaseTransaction))?;
    let output = match coinbase.entries.get(result_id) {
        Ok(Entry::Output(output)) => output,
        _ => return Err(ChainError::Validation(ValidationError::WrongCoinbaseTransaction)),
    };
    if output.source.value.amount != amount {
        return Err(ChainError::Validation(ValidationError::WrongCoinbaseTransaction));
    }
    Ok(())
}
