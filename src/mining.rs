//! Block-template assembly
//!
//! Selects pool transactions in admission order, runs each against a
//! snapshot of the account state, enforces the block gas cap, builds
//! the coinbase paying subsidy plus fees, and fills in the three
//! commitment roots. This is the only producer of coinbase
//! transactions.

use rand::Rng;
use tracing::{error, warn};

use crate::block::{Block, BlockHeader, TransactionStatus};
use crate::chain::{unix_now, Chain};
use crate::constants::{
    block_subsidy, COINBASE_ARBITRARY_SIZE_LIMIT, MAX_BLOCK_GAS, NATIVE_ASSET_ID,
    TARGET_SECONDS_PER_BLOCK,
};
use crate::error::{ChainError, ValidationError};
use crate::state::AccountState;
use crate::txbuilder::{SigningInstruction, TemplateBuilder};
use crate::txpool::{TxDesc, TxPool};
use crate::types::{short_hex, Hash};
use crate::utxo::UtxoViewpoint;
use crate::validation::{validate_tx, BlockContext};
use crate::vm::ChainContext;
use crate::vmutil;
use crate::wire::{CoinbaseInput, Tx, TxInput, TxOutput, TypedInput, ASSET_VERSION};

/// createCoinbaseTx returns a coinbase transaction paying the block
/// subsidy plus the collected fees to the given control program; when
/// none is configured the output is redeemable by anyone.
pub fn create_coinbase_tx(
    coinbase_program: Option<&[u8]>,
    fees: u64,
    block_height: u64,
) -> Result<Tx, ChainError> {
    let amount = fees + block_subsidy(block_height);

    let mut arbitrary = vec![0x00];
    arbitrary.extend_from_slice(block_height.to_string().as_bytes());

    let script = match coinbase_program {
        Some(program) => program.to_vec(),
        None => vmutil::default_coinbase_program(),
    };

    if arbitrary.len() > COINBASE_ARBITRARY_SIZE_LIMIT {
        return Err(ChainError::Validation(
            ValidationError::CoinbaseArbitraryOversize,
        ));
    }

    let mut builder = TemplateBuilder::new(None);
    builder
        .add_input(
            TxInput {
                asset_version: ASSET_VERSION,
                typed: TypedInput::Coinbase(CoinbaseInput { arbitrary }),
            },
            SigningInstruction::default(),
        )
        .map_err(ChainError::Validation)?;
    builder
        .add_output(TxOutput::new(NATIVE_ASSET_ID, amount, script))
        .map_err(ChainError::Validation)?;

    let (template, _) = builder.build()?;
    Ok(template.transaction)
}

/// NewBlockTemplate returns a new block, ready to be solved, assembled
/// from the chain's transaction pool.
pub fn new_block_template(
    chain: &Chain,
    tx_pool: &TxPool,
    coinbase_program: Option<&[u8]>,
) -> Result<Block, ChainError> {
    let mut view = UtxoViewpoint::new();
    let mut tx_status = TransactionStatus::new();
    tx_status.set_status(0, false);
    let mut gas_used: u64 = 0;
    let mut tx_fee: u64 = 0;

    // pre-block info for the next block
    let best_header = chain.best_block_header();
    let best_hash = best_header.hash();
    let next_height = best_header.height + 1;
    let next_bits = chain.calc_next_bits(&best_hash)?;

    let mut block_time = unix_now() + rand::thread_rng().gen_range(0..TARGET_SECONDS_PER_BLOCK);
    if block_time < best_header.timestamp {
        block_time = best_header.timestamp;
    }

    let block_context = BlockContext {
        version: 1,
        height: next_height,
        first_tx_id: None,
    };

    let mut state_db = chain.new_state(&best_header.block_commitment.state_root)?;

    // pool transactions in admission order, ties broken by id
    let mut descs: Vec<TxDesc> = tx_pool.get_transactions();
    descs.sort_by(|a, b| a.added.cmp(&b.added).then(a.tx.id().cmp(&b.tx.id())));

    let mut transactions: Vec<Tx> = Vec::with_capacity(descs.len() + 1);
    for desc in descs {
        let tx = &desc.tx;
        let tx_id = tx.id();
        let mut gas_only_tx = false;

        if let Err(err) = chain.get_transactions_utxo(&mut view, &[&tx.entries]) {
            error!(tx = %short_hex(&tx_id), %err, "mining block generation skipping tx");
            tx_pool.remove_transaction(&tx_id);
            continue;
        }

        let revision = state_db.snapshot();
        state_db.prepare(tx_id, [0u8; 32], transactions.len() + 1);
        let (gas_status, verdict) = validate_tx(&tx.entries, &block_context, chain, &mut state_db);
        if let Err(err) = verdict {
            if !gas_status.gas_valid {
                warn!(tx = %short_hex(&tx_id), %err, "mining block generation skipping tx");
                tx_pool.remove_transaction(&tx_id);
                state_db.revert_to_snapshot(revision);
                continue;
            }
            gas_only_tx = true;
        }

        if gas_used + gas_status.gas_used as u64 > MAX_BLOCK_GAS {
            state_db.revert_to_snapshot(revision);
            break;
        }

        if let Err(err) = view.apply_transaction(next_height, &tx.entries, gas_only_tx) {
            warn!(tx = %short_hex(&tx_id), %err, "mining block generation skipping tx");
            tx_pool.remove_transaction(&tx_id);
            state_db.revert_to_snapshot(revision);
            continue;
        }

        if gas_only_tx {
            state_db.revert_to_snapshot(revision);
        }
        state_db.finalise();

        let index = transactions.len() + 1;
        tx_status.set_logs(index, state_db.get_logs(&tx_id));
        tx_status.set_status(index, gas_only_tx);
        transactions.push(tx.as_ref().clone());
        gas_used += gas_status.gas_used as u64;
        tx_fee += desc.fee;

        if gas_used == MAX_BLOCK_GAS {
            break;
        }
    }

    // the coinbase collects the fees of everything included
    let coinbase = create_coinbase_tx(coinbase_program, tx_fee, next_height)?;
    let coinbase_id = coinbase.id();
    let mut all_transactions = vec![coinbase];
    all_transactions.append(&mut transactions);

    if chain.supports_account_balances() {
        let coinbase_context = BlockContext {
            version: 1,
            height: next_height,
            first_tx_id: Some(coinbase_id),
        };
        let (_, verdict) = validate_tx(
            &all_transactions[0].entries,
            &coinbase_context,
            chain,
            &mut state_db,
        );
        verdict.map_err(|e| ChainError::Validation(e.ctx("validating coinbase tx")))?;
        state_db.finalise();
    }

    let tx_ids: Vec<Hash> = all_transactions.iter().map(|tx| tx.id()).collect();
    let transactions_merkle_root = crate::merkle::tx_merkle_root(&tx_ids);
    let transaction_status_hash =
        crate::merkle::tx_status_merkle_root(&tx_status.verify_status());
    let state_root = state_db.intermediate_root(true);

    Ok(Block {
        header: BlockHeader {
            version: 1,
            height: next_height,
            previous_block_hash: best_hash,
            timestamp: block_time,
            nonce: 0,
            bits: next_bits,
            block_commitment: crate::block::BlockCommitment {
                transactions_merkle_root,
                transaction_status_hash,
                state_root,
            },
        },
        transactions: all_transactions,
    })
}
