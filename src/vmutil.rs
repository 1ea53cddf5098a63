//! Program construction helpers
//!
//! Builders for every program shape the chain recognizes: witness
//! script hashes, deposits and withdrawals, retirements, the default
//! coinbase program, contract programs, and the standard multisig form.

use crate::error::VmError;
use crate::opcodes::*;
use crate::vm::{self, int64_bytes};

/// Incremental program builder.
#[derive(Debug, Default)]
pub struct Builder {
    program: Vec<u8>,
}

impl Builder {
    pub fn new() -> Self {
        Builder::default()
    }

    /// Appends a bare opcode.
    pub fn add_op(&mut self, op: u8) -> &mut Self {
        self.program.push(op);
        self
    }

    /// Appends a push of `data`, choosing the shortest encoding.
    pub fn add_data(&mut self, data: &[u8]) -> &mut Self {
        match data.len() {
            0 => self.program.push(OP_0),
            len @ 1..=75 => {
                self.program.push(len as u8);
                self.program.extend_from_slice(data);
            }
            len @ 76..=255 => {
                self.program.push(OP_PUSHDATA1);
                self.program.push(len as u8);
                self.program.extend_from_slice(data);
            }
            len @ 256..=65535 => {
                self.program.push(OP_PUSHDATA2);
                self.program.extend_from_slice(&(len as u16).to_le_bytes());
                self.program.extend_from_slice(data);
            }
            len => {
                self.program.push(OP_PUSHDATA4);
                self.program.extend_from_slice(&(len as u32).to_le_bytes());
                self.program.extend_from_slice(data);
            }
        }
        self
    }

    /// Appends a push of an integer, using the small-integer opcodes
    /// where possible.
    pub fn add_int64(&mut self, n: i64) -> &mut Self {
        match n {
            0 => self.add_op(OP_0),
            -1 => self.add_op(OP_1NEGATE),
            1..=16 => self.add_op(OP_1 + (n as u8) - 1),
            _ => self.add_data(&int64_bytes(n)),
        }
    }

    pub fn build(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.program)
    }
}

/// IsUnspendable checks whether a control program can never be satisfied.
pub fn is_unspendable(prog: &[u8]) -> bool {
    !prog.is_empty() && prog[0] == OP_FAIL
}

/// DefaultCoinbaseProgram generates the program controlling a coinbase
/// output when no account manager is configured.
pub fn default_coinbase_program() -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_TRUE);
    builder.build()
}

/// P2WSHProgram returns the segwit pay-to-script-hash program.
pub fn p2wsh_program(hash: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_int64(0);
    builder.add_data(hash);
    builder.build()
}

/// RetireProgram generates the program for a retirement output.
pub fn retire_program(comment: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_FAIL);
    if !comment.is_empty() {
        builder.add_data(comment);
    }
    builder.build()
}

/// P2SHProgram is the expanded form a P2WSH program converts into before
/// execution: hash the witness script, compare, then run it as a
/// predicate.
pub fn p2sh_program(script_hash: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_DUP);
    builder.add_op(OP_HASH160);
    builder.add_data(script_hash);
    builder.add_op(OP_EQUALVERIFY);
    builder.add_int64(-1);
    builder.add_op(OP_SWAP);
    builder.add_int64(0);
    builder.add_op(OP_CHECKPREDICATE);
    builder.build()
}

/// DepositProgram generates the program for a deposit output.
pub fn deposit_program(vm_type: i64, address: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_0);
    builder.add_int64(vm_type);
    builder.add_data(address);
    builder.add_op(OP_DEPOSIT);
    builder.build()
}

/// WithdrawProgram generates the program authorizing an account-side
/// debit.
pub fn withdraw_program(vm_type: i64, address: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_0);
    builder.add_int64(vm_type);
    builder.add_data(address);
    builder.add_op(OP_WITHDRAW);
    builder.build()
}

/// P2ContractProgram pays to a deployed contract address.
pub fn p2contract_program(vm_type: i64, address: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_int64(0);
    builder.add_int64(vm_type);
    builder.add_data(address);
    builder.build()
}

/// CreateContractProgram wraps deployment code for a creation input.
pub fn create_contract_program(code: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_0);
    builder.add_data(code);
    builder.add_op(OP_CREATE);
    builder.build()
}

/// CallContractProgram wraps call input data (legacy form).
pub fn call_contract_program(input: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_0);
    builder.add_data(input);
    builder.add_op(OP_CALL);
    builder.build()
}

/// ContractProgram wraps call input data (preferred form).
pub fn contract_program(input: &[u8]) -> Vec<u8> {
    let mut builder = Builder::new();
    builder.add_op(OP_0);
    builder.add_data(input);
    builder.add_op(OP_CONTRACT);
    builder.build()
}

/// P2SPMultiSigProgram generates the standard multisig control program:
/// the signer pushes its signatures, the program supplies the key set
/// and quorum and checks them against the entry sighash.
pub fn p2sp_multisig_program(pubkeys: &[[u8; 32]], quorum: usize) -> Result<Vec<u8>, VmError> {
    check_multisig_params(quorum as i64, pubkeys.len() as i64)?;
    let mut builder = Builder::new();
    builder.add_op(OP_TXSIGHASH);
    for pubkey in pubkeys {
        builder.add_data(pubkey);
    }
    builder.add_int64(quorum as i64);
    builder.add_int64(pubkeys.len() as i64);
    builder.add_op(OP_CHECKMULTISIG);
    Ok(builder.build())
}

/// ParseP2SPMultiSigProgram recovers the key set and quorum from a
/// standard multisig program.
pub fn parse_p2sp_multisig_program(program: &[u8]) -> Result<(Vec<[u8; 32]>, usize), VmError> {
    let insts = vm::parse_program(program)?;
    if insts.len() < 4 {
        return Err(VmError::ShortProgram);
    }

    // count backwards from CHECKMULTISIG in case of a leading prefix
    let n_pubkeys = instruction_int64(&insts[insts.len() - 2])?;
    if n_pubkeys as usize > insts.len().saturating_sub(4) {
        return Err(VmError::ShortProgram);
    }
    let quorum = instruction_int64(&insts[insts.len() - 3])?;
    check_multisig_params(quorum, n_pubkeys)?;

    let first = insts.len() - 3 - n_pubkeys as usize;
    let mut pubkeys = Vec::with_capacity(n_pubkeys as usize);
    for inst in &insts[first..first + n_pubkeys as usize] {
        let key: [u8; 32] = inst
            .data
            .as_slice()
            .try_into()
            .map_err(|_| VmError::BadValue("pubkey must be 32 bytes".into()))?;
        pubkeys.push(key);
    }
    Ok((pubkeys, quorum as usize))
}

/// Integer value of an instruction, covering the small-integer opcodes
/// that carry no immediate data.
fn instruction_int64(inst: &vm::Instruction) -> Result<i64, VmError> {
    match inst.op {
        OP_0 => Ok(0),
        OP_1NEGATE => Ok(-1),
        OP_1..=OP_16 => Ok((inst.op - OP_1 + 1) as i64),
        _ => vm::as_int64(&inst.data),
    }
}

fn check_multisig_params(quorum: i64, n_pubkeys: i64) -> Result<(), VmError> {
    if quorum < 0 {
        return Err(VmError::BadValue("negative quorum".into()));
    }
    if n_pubkeys < 0 {
        return Err(VmError::BadValue("negative pubkey count".into()));
    }
    if quorum > n_pubkeys {
        return Err(VmError::BadValue("quorum too big".into()));
    }
    if quorum == 0 && n_pubkeys > 0 {
        return Err(VmError::BadValue("quorum empty with non-empty pubkey list".into()));
    }
    Ok(())
}
