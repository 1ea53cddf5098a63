//! Gas accounting at the transaction boundary: the credit ceiling for
//! unproven budgets, storage-gas coverage, and the gas-only degraded
//! mode for program failures after the budget is proven.

use hybrid_consensus::constants::{DEFAULT_GAS_CREDIT, NATIVE_ASSET_ID};
use hybrid_consensus::error::ValidationError;
use hybrid_consensus::opcodes::{OP_0, OP_TRUE};
use hybrid_consensus::state::MemoryAccountState;
use hybrid_consensus::types::{hash160, AssetAmount, Hash};
use hybrid_consensus::validation::{validate_tx, BlockContext};
use hybrid_consensus::vm::ChainContext;
use hybrid_consensus::vmutil;
use hybrid_consensus::wire::{
    CreationInput, SpendCommitment, SpendInput, Tx, TxData, TxInput, TxOutput, TypedInput,
    ASSET_VERSION,
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

fn spend_with_witness(amount: u64, script: Vec<u8>) -> TxInput {
    TxInput {
        asset_version: ASSET_VERSION,
        typed: TypedInput::Spend(SpendInput {
            commitment: SpendCommitment {
                asset_amount: AssetAmount::new(NATIVE_ASSET_ID, amount),
                source_id: [1u8; 32],
                source_position: 0,
                vm_version: 1,
                control_program: vmutil::p2wsh_program(&hash160(&script)),
            },
            arguments: vec![script],
        }),
    }
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

fn block() -> BlockContext {
    BlockContext {
        version: 1,
        height: 5,
        first_tx_id: None,
    }
}

#[test]
fn test_dust_fee_cannot_cover_storage() {
    // fee 200 buys exactly one unit of gas; the witness program cannot
    // even start, so the transaction rejects with its budget unproven
    let tx = build_tx(
        vec![spend_with_witness(1_000_000_000, vec![OP_TRUE])],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_999_800,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    assert!(verdict.is_err());
    assert!(!gas.gas_valid);
    assert_eq!(gas.gas_left, 1);

    // raising the fee to a sane level admits the same shape
    let tx = build_tx(
        vec![spend_with_witness(1_000_000_000, vec![OP_TRUE])],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );
    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
}

#[test]
fn test_gas_input_over_credit_rejected() {
    // a witness script long enough to burn past the credit before the
    // budget is proven: ~200 pushes at the base instruction cost
    let mut script = vec![OP_TRUE; 200];
    script.push(OP_TRUE);

    let tx = build_tx(
        vec![spend_with_witness(2_000_000_000_000, script)],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            1_000_000_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    assert_eq!(verdict.unwrap_err().root(), &ValidationError::OverGasCredit);
    assert!(!gas.gas_valid);
    // the ceiling tripped on the first usage update past the credit
    assert!(gas.gas_used > DEFAULT_GAS_CREDIT);
}

#[test]
fn test_failing_witness_rejects_without_budget() {
    // witness script whose hash does not match the spent program
    let tx = build_tx(
        vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Spend(SpendInput {
                commitment: SpendCommitment {
                    asset_amount: AssetAmount::new(NATIVE_ASSET_ID, 1_000_000_000),
                    source_id: [1u8; 32],
                    source_position: 0,
                    vm_version: 1,
                    control_program: vmutil::p2wsh_program(&hash160(&[OP_TRUE])),
                },
                arguments: vec![vec![OP_0]],
            }),
        }],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    assert!(verdict.is_err());
    // a failed gas input never proves the budget
    assert!(!gas.gas_valid);
}

#[test]
fn test_program_failure_after_proven_budget_is_gas_only() {
    // a creation whose ownership proof fails: the creation is not a gas
    // input, so it runs only after the budget was proven by the spend
    let failing_script = vec![OP_0];
    let creation = TxInput {
        asset_version: ASSET_VERSION,
        typed: TypedInput::Creation(CreationInput {
            nonce: 1,
            data: vec![],
            vm_version: 1,
            control_program: vmutil::p2wsh_program(&hash160(&failing_script)),
            arguments: vec![failing_script],
        }),
    };

    let tx = build_tx(
        vec![spend_with_witness(1_000_000_000, vec![OP_TRUE]), creation],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            900_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    assert!(verdict.is_err());
    // gas-valid failure: keep the transaction, flag its status
    assert!(gas.gas_valid);
    assert!(gas.gas_used > 0);
    assert_eq!(gas.asset_value, 100_000_000);
}

#[test]
fn test_storage_gas_charged_once_budget_proven() {
    let tx = build_tx(
        vec![spend_with_witness(1_000_000_000, vec![OP_TRUE])],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    verdict.unwrap();
    assert_eq!(gas.storage_gas, tx.data.serialized_size as i64);
    assert!(gas.gas_used >= gas.storage_gas);
}

#[test]
fn test_straightforward_control_program_validates() {
    // a bare OP_TRUE control program is standard and runs as-is,
    // without the P2SH conversion
    let tx = build_tx(
        vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Spend(SpendInput {
                commitment: SpendCommitment {
                    asset_amount: AssetAmount::new(NATIVE_ASSET_ID, 1_000_000_000),
                    source_id: [1u8; 32],
                    source_position: 0,
                    vm_version: 1,
                    control_program: vec![OP_TRUE],
                },
                arguments: vec![],
            }),
        }],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block(), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
}
