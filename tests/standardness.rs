//! Standardness closure: a transaction passes iff every gas-paying
//! input spends a pay-to-witness program and every native-asset output
//! pays to one.

use hybrid_consensus::constants::NATIVE_ASSET_ID;
use hybrid_consensus::error::ValidationError;
use hybrid_consensus::opcodes::{OP_DUP, OP_TRUE};
use hybrid_consensus::state::MemoryAccountState;
use hybrid_consensus::types::{hash160, AssetAmount, Hash};
use hybrid_consensus::validation::{validate_tx, BlockContext};
use hybrid_consensus::vm::ChainContext;
use hybrid_consensus::vmutil;
use hybrid_consensus::wire::{
    SpendCommitment, SpendInput, Tx, TxData, TxInput, TxOutput, TypedInput, ASSET_VERSION,
};

struct AccountChain;

impl ChainContext for AccountChain {
    fn best_block_info(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    fn get_block_hash_by_height(&self, _height: u64) -> Hash {
        [0u8; 32]
    }
}

fn spend_input(asset: Hash, amount: u64, control_program: Vec<u8>, args: Vec<Vec<u8>>) -> TxInput {
    TxInput {
        asset_version: ASSET_VERSION,
        typed: TypedInput::Spend(SpendInput {
            commitment: SpendCommitment {
                asset_amount: AssetAmount::new(asset, amount),
                source_id: [1u8; 32],
                source_position: 0,
                vm_version: 1,
                control_program,
            },
            arguments: args,
        }),
    }
}

fn standard_native_input(amount: u64) -> TxInput {
    spend_input(
        NATIVE_ASSET_ID,
        amount,
        vmutil::p2wsh_program(&hash160(&[OP_TRUE])),
        vec![vec![OP_TRUE]],
    )
}

fn build_tx(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Tx {
    Tx::new(TxData {
        version: 1,
        serialized_size: 0,
        time_range: 0,
        inputs,
        outputs,
        reference_data: vec![],
    })
    .unwrap()
}

fn verdict_of(tx: &Tx) -> Result<(), ValidationError> {
    let block = BlockContext {
        version: 1,
        height: 5,
        first_tx_id: None,
    };
    let mut state = MemoryAccountState::new();
    validate_tx(&tx.entries, &block, &AccountChain, &mut state).1
}

#[test]
fn test_gas_input_must_spend_p2w_program() {
    // a raw non-witness program guarding a native spend is not standard
    let tx = build_tx(
        vec![spend_input(
            NATIVE_ASSET_ID,
            1_000_000_000,
            vec![OP_DUP, OP_TRUE],
            vec![],
        )],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );
    assert_eq!(
        verdict_of(&tx).unwrap_err().root(),
        &ValidationError::NotStandardTx
    );
}

#[test]
fn test_native_output_must_pay_to_p2w_program() {
    let tx = build_tx(
        vec![standard_native_input(1_000_000_000)],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vec![OP_DUP, OP_TRUE],
        )],
    );
    assert_eq!(
        verdict_of(&tx).unwrap_err().root(),
        &ValidationError::NotStandardTx
    );
}

#[test]
fn test_p2w_families_are_standard() {
    for control_program in [
        vmutil::p2wsh_program(&[0x22; 20]),
        vec![OP_TRUE],
        vmutil::p2contract_program(0, &[0x33; 20]),
    ] {
        let tx = build_tx(
            vec![standard_native_input(1_000_000_000)],
            vec![TxOutput::new(NATIVE_ASSET_ID, 999_000_000, control_program)],
        );
        verdict_of(&tx).unwrap();
    }
}

#[test]
fn test_non_native_output_program_is_unconstrained() {
    let asset_x: Hash = [0x0c; 32];
    let tx = build_tx(
        vec![
            standard_native_input(1_000_000_000),
            spend_input(
                asset_x,
                700,
                vmutil::p2wsh_program(&hash160(&[OP_TRUE])),
                vec![vec![OP_TRUE]],
            ),
        ],
        vec![
            TxOutput::new(
                NATIVE_ASSET_ID,
                999_000_000,
                vmutil::p2wsh_program(&[0x22; 20]),
            ),
            // arbitrary program on a non-native output
            TxOutput::new(asset_x, 700, vec![OP_DUP, OP_TRUE, OP_TRUE]),
        ],
    );
    verdict_of(&tx).unwrap();
}

#[test]
fn test_retirement_output_is_standard() {
    let asset_x: Hash = [0x0c; 32];
    let tx = build_tx(
        vec![
            standard_native_input(1_000_000_000),
            spend_input(
                asset_x,
                700,
                vmutil::p2wsh_program(&hash160(&[OP_TRUE])),
                vec![vec![OP_TRUE]],
            ),
        ],
        vec![
            TxOutput::new(
                NATIVE_ASSET_ID,
                999_000_000,
                vmutil::p2wsh_program(&[0x22; 20]),
            ),
            TxOutput::new(asset_x, 700, vmutil::retire_program(b"burn")),
        ],
    );
    verdict_of(&tx).unwrap();
}
