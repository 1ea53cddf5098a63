//! Full-stack assembly: chain bootstrap from genesis, pool admission,
//! template building, nonce search, and block connection.

use std::sync::Arc;

use hybrid_consensus::chain::{Chain, MemStore, Store};
use hybrid_consensus::config::{Config, Network};
use hybrid_consensus::constants::{block_subsidy, NATIVE_ASSET_ID};
use hybrid_consensus::error::{ChainError, PoolError};
use hybrid_consensus::mining::new_block_template;
use hybrid_consensus::opcodes::OP_TRUE;
use hybrid_consensus::pow;
use hybrid_consensus::txpool::TxPool;
use hybrid_consensus::types::{hash160, AssetAmount, Hash};
use hybrid_consensus::utxo::UtxoEntry;
use hybrid_consensus::vmutil;
use hybrid_consensus::wire::{
    SpendCommitment, SpendInput, Tx, TxData, TxInput, TxOutput, TypedInput, ASSET_VERSION,
};

fn test_config() -> Config {
    Config {
        network: Network::Solo,
        support_balance_in_state_db: true,
        coinbase_program: None,
        contract_vm: None,
    }
}

fn new_chain() -> (Arc<Chain>, Arc<TxPool>, Arc<MemStore>) {
    let store = Arc::new(MemStore::new());
    let pool = Arc::new(TxPool::new(store.clone()));
    let chain = Arc::new(
        Chain::new(store.clone(), pool.clone(), test_config()).expect("chain bootstraps"),
    );
    (chain, pool, store)
}

/// Builds a spend of a freshly seeded UTXO and registers that UTXO with
/// the store so the pool and the assembler can resolve it.
fn seeded_spend(store: &MemStore, source_byte: u8, amount: u64, fee: u64) -> Arc<Tx> {
    let script = vec![OP_TRUE];
    let control_program = vmutil::p2wsh_program(&hash160(&script));
    let tx = Tx::new(TxData {
        version: 1,
        serialized_size: 0,
        time_range: 0,
        inputs: vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Spend(SpendInput {
                commitment: SpendCommitment {
                    asset_amount: AssetAmount::new(NATIVE_ASSET_ID, amount),
                    source_id: [source_byte; 32],
                    source_position: 0,
                    vm_version: 1,
                    control_program: control_program.clone(),
                },
                arguments: vec![script],
            }),
        }],
        outputs: vec![TxOutput::new(
            NATIVE_ASSET_ID,
            amount - fee,
            vmutil::p2wsh_program(&[source_byte; 20]),
        )],
        reference_data: vec![],
    })
    .unwrap();

    store.insert_utxo(
        tx.entries.spent_output_ids[0],
        UtxoEntry {
            source_id: [source_byte; 32],
            source_pos: 0,
            asset_id: NATIVE_ASSET_ID,
            amount,
            control_program,
            is_coinbase: false,
            block_height: 0,
            spent: false,
        },
    );
    Arc::new(tx)
}

fn mine(block: &mut hybrid_consensus::Block, seed: &Hash) {
    for nonce in 0..100_000u64 {
        block.header.nonce = nonce;
        if pow::check_proof_of_work(&block.hash(), seed, block.header.bits) {
            return;
        }
    }
    panic!("no nonce found under the test target");
}

#[test]
fn test_chain_bootstraps_from_genesis() {
    let (chain, _, _) = new_chain();
    assert_eq!(chain.best_block_height(), 0);

    let genesis = chain.best_block_header();
    assert_eq!(genesis.height, 0);
    // account mode derives a non-zero genesis state root
    assert_ne!(genesis.block_commitment.state_root, [0u8; 32]);

    // reopening the same store resumes the same tip
    let store = chain.store().clone();
    let pool = Arc::new(TxPool::new(store.clone()));
    let reopened = Chain::new(store, pool, test_config()).unwrap();
    assert_eq!(reopened.best_block_hash(), chain.best_block_hash());
}

#[test]
fn test_validate_admit_assemble_connect() {
    let (chain, pool, store) = new_chain();
    let tx = seeded_spend(&store, 0x31, 1_000_000_000, 1_000_000);

    // validate against the tip, then hand to the pool
    let result = chain.validate_tx(&tx).unwrap();
    assert!(result.gas_state.gas_valid);
    assert!(result.gas_only.is_none());
    let fee = result.gas_state.asset_value;
    assert_eq!(fee, 1_000_000);

    let is_orphan = chain
        .process_transaction(tx.clone(), false, result.height, fee)
        .unwrap();
    assert!(!is_orphan);

    // a second validation short-circuits on pool membership
    assert_eq!(
        chain.validate_tx(&tx).unwrap_err(),
        ChainError::Pool(PoolError::TransactionInPool)
    );

    // assemble the template
    let mut block = new_block_template(&chain, &pool, None).unwrap();
    assert_eq!(block.header.height, 1);
    assert_eq!(block.transactions.len(), 2);
    assert_eq!(block.transactions[1].id(), tx.id());

    // exactly one coinbase, at index zero, paying subsidy plus fees
    let coinbase_amount = block.transactions[0].data.outputs[0].asset_amount.amount;
    assert_eq!(coinbase_amount, block_subsidy(1) + fee);

    // solve and connect
    let parent = chain.best_node();
    let seed = parent.calc_next_seed();
    mine(&mut block, &seed);
    chain.process_block(block.clone()).unwrap();

    assert_eq!(chain.best_block_height(), 1);
    assert_eq!(chain.best_block_hash(), block.hash());

    // the spent UTXO is gone, the created one is present
    assert!(store.get_utxo(&tx.entries.spent_output_ids[0]).is_none());
    let created = store
        .get_utxo(&tx.entries.header.result_ids[0])
        .expect("created utxo persisted");
    assert_eq!(created.amount, 999_000_000);

    // pool drained by the connected block
    assert!(!pool.is_transaction_in_pool(&tx.id()));

    // waiter returns immediately once the height exists
    chain.block_waiter(1);
}

#[test]
fn test_template_orders_by_admission_and_caps_gas() {
    let (chain, pool, store) = new_chain();

    let first = seeded_spend(&store, 0x41, 1_000_000_000, 1_000_000);
    let second = seeded_spend(&store, 0x42, 2_000_000_000, 1_000_000);

    for tx in [&first, &second] {
        let result = chain.validate_tx(tx).unwrap();
        chain
            .process_transaction(tx.clone(), false, result.height, result.gas_state.asset_value)
            .unwrap();
    }

    let block = new_block_template(&chain, &pool, None).unwrap();
    assert_eq!(block.transactions.len(), 3);
    // admission order preserved behind the coinbase
    assert_eq!(block.transactions[1].id(), first.id());
    assert_eq!(block.transactions[2].id(), second.id());

    // coinbase collects both fees
    let coinbase_amount = block.transactions[0].data.outputs[0].asset_amount.amount;
    assert_eq!(coinbase_amount, block_subsidy(1) + 2_000_000);
}

#[test]
fn test_block_gas_cap_limits_inclusion() {
    let (chain, pool, store) = new_chain();

    // storage-heavy transactions: ~900k gas each, so eleven fit under
    // the 10M block cap and the twelfth does not
    let script = vec![OP_TRUE];
    let control_program = vmutil::p2wsh_program(&hash160(&script));
    let mut txs = Vec::new();
    for i in 0..12u8 {
        let tx = Tx::new(TxData {
            version: 1,
            serialized_size: 0,
            time_range: 0,
            inputs: vec![TxInput {
                asset_version: ASSET_VERSION,
                typed: TypedInput::Spend(SpendInput {
                    commitment: SpendCommitment {
                        asset_amount: AssetAmount::new(NATIVE_ASSET_ID, 10_000_000_000),
                        source_id: [0x70 + i; 32],
                        source_position: 0,
                        vm_version: 1,
                        control_program: control_program.clone(),
                    },
                    arguments: vec![script.clone()],
                }),
            }],
            outputs: vec![TxOutput::new(
                NATIVE_ASSET_ID,
                9_000_000_000,
                vmutil::p2wsh_program(&[0x70 + i; 20]),
            )],
            reference_data: vec![0u8; 900_000],
        })
        .unwrap();

        store.insert_utxo(
            tx.entries.spent_output_ids[0],
            UtxoEntry {
                source_id: [0x70 + i; 32],
                source_pos: 0,
                asset_id: NATIVE_ASSET_ID,
                amount: 10_000_000_000,
                control_program: control_program.clone(),
                is_coinbase: false,
                block_height: 0,
                spent: false,
            },
        );
        let tx = Arc::new(tx);
        let result = chain.validate_tx(&tx).unwrap();
        assert!(result.gas_state.gas_used > 900_000);
        chain
            .process_transaction(tx.clone(), false, result.height, result.gas_state.asset_value)
            .unwrap();
        txs.push(tx);
    }

    let block = new_block_template(&chain, &pool, None).unwrap();
    // coinbase plus exactly eleven transactions
    assert_eq!(block.transactions.len(), 12);

    // everything beyond the cap stayed in the pool
    let included: Vec<_> = block.transactions[1..].iter().map(|tx| tx.id()).collect();
    let left_out = txs
        .iter()
        .filter(|tx| !included.contains(&tx.id()))
        .count();
    assert_eq!(left_out, 1);
    assert!(txs.iter().any(|tx| pool.is_transaction_in_pool(&tx.id())));
}

#[test]
fn test_rejected_tx_lands_in_err_cache() {
    let (chain, pool, store) = new_chain();
    // dust fee: cannot cover storage gas
    let tx = seeded_spend(&store, 0x51, 1_000_000_000, 200);

    let err = chain.validate_tx(&tx).unwrap_err();
    assert!(pool.is_in_err_cache(&tx.id()));

    // the second attempt returns the cached rejection
    assert_eq!(chain.validate_tx(&tx).unwrap_err(), err);
}

#[test]
fn test_template_evicts_double_spends() {
    let (chain, pool, store) = new_chain();
    let tx = seeded_spend(&store, 0x61, 1_000_000_000, 1_000_000);

    let result = chain.validate_tx(&tx).unwrap();
    chain
        .process_transaction(tx.clone(), false, result.height, result.gas_state.asset_value)
        .unwrap();

    // the UTXO vanishes out from under the pool
    store.remove_utxo(&tx.entries.spent_output_ids[0]);

    let block = new_block_template(&chain, &pool, None).unwrap();
    assert_eq!(block.transactions.len(), 1);
    assert!(!pool.is_transaction_in_pool(&tx.id()));
}
