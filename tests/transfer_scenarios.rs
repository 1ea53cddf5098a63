//! End-to-end transfer scenarios through the validation state machine:
//! native transfers, multi-input merges, deposits into the account
//! ledger, withdrawals back out of it, and coinbase shape limits.

use hybrid_consensus::constants::NATIVE_ASSET_ID;
use hybrid_consensus::error::ValidationError;
use hybrid_consensus::opcodes::OP_TRUE;
use hybrid_consensus::state::{AccountState, MemoryAccountState};
use hybrid_consensus::types::{hash160, Address, AssetAmount, Hash};
use hybrid_consensus::validation::{validate_tx, BlockContext};
use hybrid_consensus::vm::ChainContext;
use hybrid_consensus::vmutil;
use hybrid_consensus::wire::{
    CoinbaseInput, SpendCommitment, SpendInput, Tx, TxData, TxInput, TxOutput, TypedInput,
    WithdrawalInput, ASSET_VERSION,
};

/// Chain stub with account-balance mirroring enabled.
struct AccountChain;

impl ChainContext for AccountChain {
    fn best_block_info(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    fn get_block_hash_by_height(&self, _height: u64) -> Hash {
        [0u8; 32]
    }
}

fn true_script() -> Vec<u8> {
    vec![OP_TRUE]
}

/// A spend of `amount` guarded by a P2WSH program over the TRUE script.
fn native_spend_input(source_byte: u8, amount: u64) -> TxInput {
    asset_spend_input(source_byte, NATIVE_ASSET_ID, amount)
}

fn asset_spend_input(source_byte: u8, asset: Hash, amount: u64) -> TxInput {
    TxInput {
        asset_version: ASSET_VERSION,
        typed: TypedInput::Spend(SpendInput {
            commitment: SpendCommitment {
                asset_amount: AssetAmount::new(asset, amount),
                source_id: [source_byte; 32],
                source_position: 0,
                vm_version: 1,
                control_program: vmutil::p2wsh_program(&hash160(&true_script())),
            },
            arguments: vec![true_script()],
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

fn block_at(height: u64) -> BlockContext {
    BlockContext {
        version: 1,
        height,
        first_tx_id: None,
    }
}

#[test]
fn test_native_transfer_accepted() {
    let receiver: Address = [0x22; 20];
    let tx = build_tx(
        vec![native_spend_input(1, 1_000_000_000)],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&receiver),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
    // the native surplus is the fee
    assert_eq!(gas.asset_value, 1_000_000);
    assert!(gas.gas_used > 0);

    // the receiving address was credited on the account side
    assert_eq!(state.get_balance(&receiver), 999_000_000);
}

#[test]
fn test_two_input_merge_balances() {
    let tx = build_tx(
        vec![
            native_spend_input(1, 500_000_000),
            native_spend_input(2, 500_000_000),
        ],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            900_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
    assert_eq!(gas.asset_value, 100_000_000);
}

#[test]
fn test_unbalanced_non_native_asset_rejected() {
    let asset_x: Hash = [0x0a; 32];
    // 500 units of X in, only 400 out
    let tx = build_tx(
        vec![
            native_spend_input(1, 1_000_000_000),
            asset_spend_input(2, asset_x, 500),
        ],
        vec![
            TxOutput::new(
                NATIVE_ASSET_ID,
                900_000_000,
                vmutil::p2wsh_program(&[0x22; 20]),
            ),
            TxOutput::new(asset_x, 400, vmutil::p2wsh_program(&[0x33; 20])),
        ],
    );

    let mut state = MemoryAccountState::new();
    let (_, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    assert!(matches!(
        verdict.unwrap_err().root(),
        ValidationError::Unbalanced(_)
    ));
}

#[test]
fn test_non_native_conservation_accepted() {
    let asset_x: Hash = [0x0a; 32];
    let tx = build_tx(
        vec![
            native_spend_input(1, 1_000_000_000),
            asset_spend_input(2, asset_x, 500),
        ],
        vec![
            TxOutput::new(
                NATIVE_ASSET_ID,
                900_000_000,
                vmutil::p2wsh_program(&[0x22; 20]),
            ),
            TxOutput::new(asset_x, 500, vmutil::p2wsh_program(&[0x33; 20])),
        ],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
}

#[test]
fn test_deposit_credits_account_side() {
    let deposit_addr: Address = [0xaa; 20];
    let tx = build_tx(
        vec![native_spend_input(1, 1_000_000_000)],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            900_000_000,
            vmutil::deposit_program(0, &deposit_addr),
        )],
    );

    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
    assert_eq!(state.get_balance(&deposit_addr), 900_000_000);
}

#[test]
fn test_withdrawal_debits_account_side() {
    let account: Address = [0xbb; 20];
    let receiver: Address = [0x22; 20];
    let tx = build_tx(
        vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Withdrawal(WithdrawalInput {
                asset_amount: AssetAmount::new(NATIVE_ASSET_ID, 1_000_000_000),
                withdraw_program: vmutil::withdraw_program(0, &account),
                vm_version: 1,
                control_program: vmutil::p2wsh_program(&hash160(&true_script())),
                arguments: vec![true_script()],
            }),
        }],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            900_000_000,
            vmutil::p2wsh_program(&receiver),
        )],
    );

    let mut state = MemoryAccountState::new();
    state.add_balance(&account, 2_000_000_000);
    state.finalise();

    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    verdict.unwrap();
    assert!(gas.gas_valid);
    assert_eq!(state.get_balance(&account), 1_000_000_000);
    assert_eq!(state.get_balance(&receiver), 900_000_000);
}

#[test]
fn test_withdrawal_requires_balance() {
    let account: Address = [0xbb; 20];
    let tx = build_tx(
        vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Withdrawal(WithdrawalInput {
                asset_amount: AssetAmount::new(NATIVE_ASSET_ID, 500_000_000),
                withdraw_program: vmutil::withdraw_program(0, &account),
                vm_version: 1,
                control_program: vmutil::p2wsh_program(&hash160(&true_script())),
                arguments: vec![true_script()],
            }),
        }],
        vec![TxOutput::new(
            NATIVE_ASSET_ID,
            400_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
    );

    // the account holds nothing; the withdraw program fails while the
    // gas budget is still unproven, so the transaction rejects outright
    let mut state = MemoryAccountState::new();
    let (gas, verdict) = validate_tx(&tx.entries, &block_at(5), &AccountChain, &mut state);
    assert!(verdict.is_err());
    assert!(!gas.gas_valid);
}

#[test]
fn test_coinbase_arbitrary_oversize_rejected() {
    let data = TxData {
        version: 1,
        serialized_size: 0,
        time_range: 0,
        inputs: vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Coinbase(CoinbaseInput {
                arbitrary: vec![0u8; 129],
            }),
        }],
        outputs: vec![TxOutput::new(
            NATIVE_ASSET_ID,
            750_000_000,
            vmutil::default_coinbase_program(),
        )],
        reference_data: vec![],
    };
    let tx = Tx::new(data).unwrap();

    let block = BlockContext {
        version: 1,
        height: 1,
        first_tx_id: Some(tx.id()),
    };
    let mut state = MemoryAccountState::new();
    let (_, verdict) = validate_tx(&tx.entries, &block, &AccountChain, &mut state);
    assert_eq!(
        verdict.unwrap_err().root(),
        &ValidationError::CoinbaseArbitraryOversize
    );
}

#[test]
fn test_coinbase_outside_first_slot_rejected() {
    let data = TxData {
        version: 1,
        serialized_size: 0,
        time_range: 0,
        inputs: vec![TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Coinbase(CoinbaseInput {
                arbitrary: b"late".to_vec(),
            }),
        }],
        outputs: vec![TxOutput::new(
            NATIVE_ASSET_ID,
            750_000_000,
            vmutil::default_coinbase_program(),
        )],
        reference_data: vec![],
    };
    let tx = Tx::new(data).unwrap();

    // some other transaction occupies slot zero
    let block = BlockContext {
        version: 1,
        height: 1,
        first_tx_id: Some([0x77; 32]),
    };
    let mut state = MemoryAccountState::new();
    let (_, verdict) = validate_tx(&tx.entries, &block, &AccountChain, &mut state);
    assert_eq!(
        verdict.unwrap_err().root(),
        &ValidationError::WrongCoinbaseTransaction
    );
}

#[test]
fn test_expired_time_range_rejected() {
    let mut data = TxData {
        version: 1,
        serialized_size: 0,
        time_range: 4,
        inputs: vec![native_spend_input(1, 1_000_000_000)],
        outputs: vec![TxOutput::new(
            NATIVE_ASSET_ID,
            999_000_000,
            vmutil::p2wsh_program(&[0x22; 20]),
        )],
        reference_data: vec![],
    };
    data.encode().unwrap();
    let tx = Tx::new(data).unwrap();

    let mut state = MemoryAccountState::new();
    let (_, verdict) = validate_tx(&tx.entries, &block_at(10), &AccountChain, &mut state);
    assert_eq!(verdict.unwrap_err().root(), &ValidationError::BadTimeRange);

    let mut state = MemoryAccountState::new();
    let (_, verdict) = validate_tx(&tx.entries, &block_at(3), &AccountChain, &mut state);
    assert!(verdict.is_ok());
}
