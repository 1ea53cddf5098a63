//! The bounded-cost stack VM
//!
//! Every witness program runs through [`verify`]: the witness arguments
//! seed the data stack, the program executes instruction by instruction
//! against a run limit, and the program succeeds when the final stack
//! top is truthy. Each executed instruction costs [`VM_GAS_RATE`] gas
//! plus opcode-specific surcharges; crossing the run limit aborts with
//! `RunLimitExceeded`.
//!
//! The hybrid opcodes (`CREATE`, `CALL`, `CONTRACT`) delegate to the
//! attached contract VM; `DEPOSIT` and `WITHDRAW` move native-asset
//! value between the UTXO side and the account side directly.

use std::collections::HashMap;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

use crate::constants::{NATIVE_ASSET_ID, VM_GAS_RATE};
use crate::contract_vm::{ContractVm, NULL_CONTRACT_VM};
use crate::entry::Entry;
use crate::error::VmError;
use crate::opcodes::*;
use crate::state::AccountState;
use crate::types::{address_from_hash, sha3_256, AssetId, Hash};

/// Longest program the parser will accept.
const MAX_PROGRAM_SIZE: usize = 10_000;

/// Deepest the data or alt stack may grow.
const MAX_STACK_DEPTH: usize = 1_000;

pub type Result<T, E = VmError> = std::result::Result<T, E>;

/// Read access to the chain the VM runs against.
pub trait ChainContext {
    /// Height, timestamp and bits of the best block.
    fn best_block_info(&self) -> (u64, u64, u64);

    /// Block hash at the given height; needed by the contract VM's
    /// blockhash lookups. Zero when unknown.
    fn get_block_hash_by_height(&self, height: u64) -> Hash;

    /// Whether native-asset flows mirror into the account-state store.
    fn supports_account_balances(&self) -> bool {
        true
    }

    /// The contract VM hybrid opcodes delegate to.
    fn contract_vm(&self) -> &dyn ContractVm {
        &NULL_CONTRACT_VM
    }
}

/// Chain context with no chain behind it; hybrid opcodes that need
/// chain state fail gas-only.
pub struct NullChainContext;

impl ChainContext for NullChainContext {
    fn best_block_info(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }

    fn get_block_hash_by_height(&self, _height: u64) -> Hash {
        [0u8; 32]
    }

    fn supports_account_balances(&self) -> bool {
        false
    }
}

/// One decoded instruction: the opcode and its immediate data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub op: u8,
    pub data: Vec<u8>,
}

/// Decodes a program into its instruction list. Total on every byte
/// string; truncated pushes are `ShortProgram`.
pub fn parse_program(prog: &[u8]) -> Result<Vec<Instruction>> {
    if prog.len() > MAX_PROGRAM_SIZE {
        return Err(VmError::LongProgram);
    }
    let mut instructions = Vec::new();
    let mut pc = 0usize;
    while pc < prog.len() {
        let op = prog[pc];
        pc += 1;
        let data_len = match op {
            OP_DATA_1..=OP_DATA_75 => op as usize,
            OP_PUSHDATA1 => {
                let &len = prog.get(pc).ok_or(VmError::ShortProgram)?;
                pc += 1;
                len as usize
            }
            OP_PUSHDATA2 => {
                let bytes = prog.get(pc..pc + 2).ok_or(VmError::ShortProgram)?;
                pc += 2;
                u16::from_le_bytes([bytes[0], bytes[1]]) as usize
            }
            OP_PUSHDATA4 => {
                let bytes = prog.get(pc..pc + 4).ok_or(VmError::ShortProgram)?;
                pc += 4;
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
            _ => 0,
        };
        let data = if data_len > 0 {
            let bytes = prog.get(pc..pc + data_len).ok_or(VmError::ShortProgram)?;
            pc += data_len;
            bytes.to_vec()
        } else {
            Vec::new()
        };
        instructions.push(Instruction { op, data });
    }
    Ok(instructions)
}

/// Interprets stack bytes as an int64: little-endian, at most 8 bytes;
/// exactly 8 bytes reinterpret as two's complement.
pub fn as_int64(data: &[u8]) -> Result<i64> {
    if data.len() > 8 {
        return Err(VmError::Range);
    }
    let mut raw = [0u8; 8];
    raw[..data.len()].copy_from_slice(data);
    let value = u64::from_le_bytes(raw);
    if data.len() < 8 && value > i64::MAX as u64 {
        return Err(VmError::Range);
    }
    Ok(value as i64)
}

/// Minimal stack encoding of an int64; negative values keep all 8 bytes.
pub fn int64_bytes(n: i64) -> Vec<u8> {
    if n == 0 {
        return Vec::new();
    }
    let raw = (n as u64).to_le_bytes();
    if n < 0 {
        return raw.to_vec();
    }
    let used = 8 - (n.leading_zeros() as usize) / 8;
    raw[..used].to_vec()
}

/// Stack truthiness: any nonzero byte.
pub fn as_bool(data: &[u8]) -> bool {
    data.iter().any(|&b| b != 0)
}

fn bool_bytes(b: bool) -> Vec<u8> {
    if b {
        vec![1]
    } else {
        Vec::new()
    }
}

/// Cost of a signature-check opcode over `n_keys` keys and `quorum`
/// required signatures.
fn checksig_cost(n_keys: i64, quorum: i64) -> i64 {
    1314 + 984 * n_keys - 72 * quorum - 63
}

/// Introspection hook for `CHECKOUTPUT`: the entry being validated plus
/// the full entry map it may reference.
pub struct EntryChecker<'a> {
    pub entry: &'a Entry,
    pub entries: &'a HashMap<Hash, Entry>,
}

impl EntryChecker<'_> {
    /// True when destination `index` of the current entry carries
    /// exactly `amount` of `asset_id` under the given program.
    pub fn check_output(
        &self,
        index: u64,
        amount: u64,
        asset_id: &[u8],
        vm_version: u64,
        code: &[u8],
        expansion: bool,
    ) -> Result<bool> {
        let check_entry = |e: &Entry| -> Result<bool> {
            let check = |prog_version: u64, prog_code: &[u8], value_asset: &AssetId, value_amount: u64| {
                prog_version == vm_version
                    && prog_code == code
                    && value_asset.as_slice() == asset_id
                    && value_amount == amount
            };
            match e {
                Entry::Output(o) => Ok(check(
                    o.control_program.vm_version,
                    &o.control_program.code,
                    &o.source.value.asset_id,
                    o.source.value.amount,
                )),
                Entry::Retirement(r) => {
                    // a retirement matches only the empty program, except
                    // under expansion where the caller's code is accepted
                    let prog_code: &[u8] = if expansion { code } else { &[] };
                    Ok(check(0, prog_code, &r.source.value.asset_id, r.source.value.amount))
                }
                Entry::Deposit(d) => Ok(check(
                    d.control_program.vm_version,
                    &d.control_program.code,
                    &d.source.value.asset_id,
                    d.source.value.amount,
                )),
                _ => Err(VmError::Context),
            }
        };

        let check_mux = |m: &crate::entry::Mux| -> Result<bool> {
            let dest = m
                .witness_destinations
                .get(index as usize)
                .ok_or_else(|| VmError::BadValue(format!("index {index} out of range").into()))?;
            let e = self
                .entries
                .get(&dest.ref_id)
                .ok_or_else(|| VmError::Unexpected("missing mux destination entry".into()))?;
            check_entry(e)
        };

        let dest_ref = match self.entry {
            Entry::Mux(m) => return check_mux(m),
            Entry::Issuance(iss) => {
                &iss.witness_destination.as_ref().ok_or(VmError::Context)?.ref_id
            }
            Entry::Spend(sp) => {
                &sp.witness_destination.as_ref().ok_or(VmError::Context)?.ref_id
            }
            _ => return Err(VmError::Context),
        };
        let e = self
            .entries
            .get(dest_ref)
            .ok_or_else(|| VmError::Unexpected("missing destination entry".into()))?;
        if let Entry::Mux(m) = e {
            return check_mux(m);
        }
        if index != 0 {
            return Err(VmError::BadValue(format!("index {index} >= 1").into()));
        }
        check_entry(e)
    }
}

/// Per-entry execution context handed to [`verify`].
pub struct Context<'a> {
    pub chain: &'a dyn ChainContext,
    pub state: &'a mut dyn AccountState,

    pub vm_version: u64,
    pub code: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,

    pub entry_id: Hash,
    pub tx_version: u64,
    pub block_height: u64,
    pub tx_sig_hash: Hash,
    pub num_results: u64,

    pub asset_id: Option<AssetId>,
    pub amount: Option<u64>,
    pub dest_pos: Option<u64>,
    pub spent_output_id: Option<Hash>,
    pub entry_checker: Option<EntryChecker<'a>>,
}

/// Runs the context's program against `gas_budget` gas. Returns the gas
/// remaining on success; a failed program surfaces as an error
/// (`FalseResult` for a falsy final stack).
pub fn verify(context: &mut Context<'_>, gas_budget: i64) -> Result<i64> {
    if context.vm_version != 1 {
        return Err(VmError::UnsupportedVm(context.vm_version));
    }
    if gas_budget < 0 {
        return Err(VmError::RunLimitExceeded);
    }

    let code = context.code.clone();
    let arguments = context.arguments.clone();

    let mut vm = VirtualMachine {
        context,
        run_limit: gas_budget,
        data_stack: Vec::new(),
        alt_stack: Vec::new(),
        expansion_reserved: false,
    };
    for arg in arguments {
        vm.apply_cost(8 + arg.len() as i64)?;
        vm.push(arg)?;
    }
    vm.run(&code)?;

    let ok = vm.data_stack.last().map(|top| as_bool(top)).unwrap_or(false);
    if !ok {
        return Err(VmError::FalseResult);
    }
    Ok(vm.run_limit)
}

struct VirtualMachine<'a, 'ctx> {
    context: &'a mut Context<'ctx>,
    run_limit: i64,
    data_stack: Vec<Vec<u8>>,
    alt_stack: Vec<Vec<u8>>,
    expansion_reserved: bool,
}

impl VirtualMachine<'_, '_> {
    fn apply_cost(&mut self, cost: i64) -> Result<()> {
        if cost > self.run_limit {
            return Err(VmError::RunLimitExceeded);
        }
        self.run_limit -= cost;
        Ok(())
    }

    fn push(&mut self, data: Vec<u8>) -> Result<()> {
        if self.data_stack.len() >= MAX_STACK_DEPTH {
            return Err(VmError::Range);
        }
        self.data_stack.push(data);
        Ok(())
    }

    fn push_bool(&mut self, b: bool) -> Result<()> {
        self.push(bool_bytes(b))
    }

    fn push_int64(&mut self, n: i64) -> Result<()> {
        self.push(int64_bytes(n))
    }

    fn pop(&mut self) -> Result<Vec<u8>> {
        self.data_stack.pop().ok_or(VmError::DataStackUnderflow)
    }

    fn pop_int64(&mut self) -> Result<i64> {
        let data = self.pop()?;
        as_int64(&data)
    }

    fn pop_bool(&mut self) -> Result<bool> {
        Ok(as_bool(&self.pop()?))
    }

    fn run(&mut self, program: &[u8]) -> Result<()> {
        let instructions = parse_program(program)?;
        for instruction in &instructions {
            self.step(instruction)?;
        }
        Ok(())
    }

    fn step(&mut self, instruction: &Instruction) -> Result<()> {
        self.apply_cost(VM_GAS_RATE)?;
        let op = instruction.op;
        match op {
            OP_FALSE => self.push(Vec::new())?,
            OP_DATA_1..=OP_DATA_75 | OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                self.apply_cost(instruction.data.len() as i64)?;
                self.push(instruction.data.clone())?;
            }
            OP_1NEGATE => self.push_int64(-1)?,
            OP_1..=OP_16 => self.push_int64((op - OP_1 + 1) as i64)?,
            OP_NOP => {}
            OP_VERIFY => {
                if !self.pop_bool()? {
                    return Err(VmError::VerifyFailed);
                }
            }
            OP_FAIL => return Err(VmError::Return),

            OP_TOALTSTACK => {
                let item = self.pop()?;
                if self.alt_stack.len() >= MAX_STACK_DEPTH {
                    return Err(VmError::Range);
                }
                self.alt_stack.push(item);
            }
            OP_FROMALTSTACK => {
                let item = self.alt_stack.pop().ok_or(VmError::AltStackUnderflow)?;
                self.push(item)?;
            }
            OP_DEPTH => {
                let depth = self.data_stack.len() as i64;
                self.push_int64(depth)?;
            }
            OP_DROP => {
                self.pop()?;
            }
            OP_DUP => {
                let top = self.data_stack.last().ok_or(VmError::DataStackUnderflow)?.clone();
                self.push(top)?;
            }
            OP_OVER => {
                let len = self.data_stack.len();
                if len < 2 {
                    return Err(VmError::DataStackUnderflow);
                }
                let item = self.data_stack[len - 2].clone();
                self.push(item)?;
            }
            OP_SWAP => {
                let len = self.data_stack.len();
                if len < 2 {
                    return Err(VmError::DataStackUnderflow);
                }
                self.data_stack.swap(len - 1, len - 2);
            }

            OP_EQUAL | OP_EQUALVERIFY => {
                let a = self.pop()?;
                let b = self.pop()?;
                let eq = a == b;
                if op == OP_EQUALVERIFY {
                    if !eq {
                        return Err(VmError::VerifyFailed);
                    }
                } else {
                    self.push_bool(eq)?;
                }
            }

            OP_NOT => {
                let v = self.pop_bool()?;
                self.push_bool(!v)?;
            }
            OP_ADD => {
                let b = self.pop_int64()?;
                let a = self.pop_int64()?;
                let sum = a.checked_add(b).ok_or(VmError::Range)?;
                self.push_int64(sum)?;
            }
            OP_SUB => {
                let b = self.pop_int64()?;
                let a = self.pop_int64()?;
                let diff = a.checked_sub(b).ok_or(VmError::Range)?;
                self.push_int64(diff)?;
            }
            OP_NUMEQUAL => {
                let b = self.pop_int64()?;
                let a = self.pop_int64()?;
                self.push_bool(a == b)?;
            }
            OP_MIN => {
                let b = self.pop_int64()?;
                let a = self.pop_int64()?;
                self.push_int64(a.min(b))?;
            }

            OP_HASH160 => {
                let data = self.pop()?;
                self.apply_cost(64 + data.len() as i64)?;
                self.push(crate::types::hash160(&data).to_vec())?;
            }
            OP_SHA3 => {
                let data = self.pop()?;
                self.apply_cost(64 + data.len() as i64)?;
                self.push(sha3_256(&data).to_vec())?;
            }
            OP_CHECKSIG => self.op_checksig()?,
            OP_CHECKMULTISIG => self.op_checkmultisig()?,
            OP_TXSIGHASH => {
                self.apply_cost(256)?;
                let hash = self.context.tx_sig_hash;
                self.push(hash.to_vec())?;
            }

            OP_CHECKPREDICATE => self.op_checkpredicate()?,
            OP_CHECKOUTPUT => self.op_checkoutput()?,

            OP_CREATE => self.op_create()?,
            OP_CALL | OP_CONTRACT => self.op_call()?,
            OP_DEPOSIT => self.op_deposit()?,
            OP_WITHDRAW => self.op_withdraw()?,

            _ => return Err(VmError::DisallowedOpcode(op)),
        }
        Ok(())
    }

    fn op_checksig(&mut self) -> Result<()> {
        self.apply_cost(checksig_cost(1, 1))?;
        let pubkey = self.pop()?;
        let msg = self.pop()?;
        let sig = self.pop()?;
        if msg.len() != 32 {
            return Err(VmError::BadValue("message must be 32 bytes".into()));
        }
        self.push_bool(verify_ed25519(&pubkey, &msg, &sig))
    }

    fn op_checkmultisig(&mut self) -> Result<()> {
        let n_keys = self.pop_int64()?;
        let quorum = self.pop_int64()?;
        if n_keys < 0 || quorum < 0 || quorum > n_keys || (quorum == 0 && n_keys > 0) {
            return Err(VmError::BadValue("bad multisig params".into()));
        }
        self.apply_cost(checksig_cost(n_keys, quorum))?;
        let mut pubkeys = Vec::with_capacity(n_keys as usize);
        for _ in 0..n_keys {
            pubkeys.push(self.pop()?);
        }
        let msg = self.pop()?;
        if msg.len() != 32 {
            return Err(VmError::BadValue("message must be 32 bytes".into()));
        }
        let mut sigs = Vec::with_capacity(quorum as usize);
        for _ in 0..quorum {
            sigs.push(self.pop()?);
        }

        // each signature must match a key; keys are consumed in order
        let mut key_idx = 0usize;
        for sig in &sigs {
            let mut matched = false;
            while key_idx < pubkeys.len() {
                let key = &pubkeys[key_idx];
                key_idx += 1;
                if verify_ed25519(key, &msg, sig) {
                    matched = true;
                    break;
                }
            }
            if !matched {
                return self.push_bool(false);
            }
        }
        self.push_bool(true)
    }

    fn op_checkpredicate(&mut self) -> Result<()> {
        self.apply_cost(256)?;
        let mut limit = self.pop_int64()?;
        let predicate = self.pop()?;
        let mut n = self.pop_int64()?;
        if limit < 0 {
            return Err(VmError::BadValue("negative checkpredicate limit".into()));
        }
        // a negative count moves the whole remaining stack
        if n < 0 {
            n = self.data_stack.len() as i64;
        }
        if n as usize > self.data_stack.len() {
            return Err(VmError::DataStackUnderflow);
        }
        if limit == 0 {
            limit = self.run_limit;
        }
        self.apply_cost(limit)?;

        let split = self.data_stack.len() - n as usize;
        let moved = self.data_stack.split_off(split);
        let mut child = VirtualMachine {
            context: &mut *self.context,
            run_limit: limit,
            data_stack: moved,
            alt_stack: Vec::new(),
            expansion_reserved: self.expansion_reserved,
        };
        let outcome = child.run(&predicate);
        let ok = outcome.is_ok()
            && child.data_stack.last().map(|top| as_bool(top)).unwrap_or(false);
        let leftover = child.run_limit;
        // unused child budget flows back
        self.run_limit += leftover;
        self.push_bool(ok)
    }

    fn op_checkoutput(&mut self) -> Result<()> {
        self.apply_cost(64)?;
        let code = self.pop()?;
        let vm_version = self.pop_int64()?;
        let asset_id = self.pop()?;
        let amount = self.pop_int64()?;
        let index = self.pop_int64()?;
        if vm_version < 0 || amount < 0 || index < 0 {
            return Err(VmError::BadValue("negative checkoutput operand".into()));
        }
        let checker = self.context.entry_checker.as_ref().ok_or(VmError::Context)?;
        let ok = checker.check_output(
            index as u64,
            amount as u64,
            &asset_id,
            vm_version as u64,
            &code,
            self.expansion_reserved,
        )?;
        self.push_bool(ok)
    }

    fn op_create(&mut self) -> Result<()> {
        let code = self.pop()?;
        let version = self.pop_int64()?;
        if version != 0 {
            return Err(VmError::UnknownVersion);
        }
        let nonce = self.pop_int64()?;
        let sender = self.pop()?;
        let from = address_from_hash(&sender);
        let value = self.native_value();

        debug!(
            sender = %hex::encode(from),
            nonce,
            code_len = code.len(),
            "create contract"
        );
        let gas_limit = self.run_limit.max(0) as u64;
        let chain = self.context.chain;
        let outcome = chain.contract_vm().create(
            &mut *self.context.state,
            from,
            nonce as u64,
            &code,
            value,
            gas_limit,
        )?;
        self.apply_cost(outcome.gas_used as i64)?;
        if outcome.return_data.is_empty() {
            self.push_bool(true)
        } else {
            self.push(outcome.return_data)
        }
    }

    fn op_call(&mut self) -> Result<()> {
        let input = self.pop()?;
        let version = self.pop_int64()?;
        if version != 0 {
            return Err(VmError::UnknownVersion);
        }
        let to_bytes = self.pop()?;
        let to = address_from_hash(&to_bytes);
        let nonce = self.pop_int64()?;
        let sender = self.pop()?;
        let from = address_from_hash(&sender);
        let value = self.native_value();
        if value > 0 {
            // attached value lands on the caller before the transfer
            self.context.state.add_balance(&from, value);
        }

        debug!(
            sender = %hex::encode(from),
            to = %hex::encode(to),
            nonce,
            input_len = input.len(),
            "call contract"
        );
        let gas_limit = self.run_limit.max(0) as u64;
        let chain = self.context.chain;
        let outcome = chain.contract_vm().call(
            &mut *self.context.state,
            from,
            nonce as u64,
            to,
            &input,
            value,
            gas_limit,
        )?;
        self.apply_cost(outcome.gas_used as i64)?;
        if outcome.return_data.is_empty() {
            self.push_bool(true)
        } else {
            self.push(outcome.return_data)
        }
    }

    fn op_deposit(&mut self) -> Result<()> {
        let (vm_type, address) = self.pop_vaab_operands()?;
        let amount = self.native_value();
        debug!(
            caller = %hex::encode(address),
            vm_type,
            amount,
            "deposit"
        );
        if self.is_native_entry() {
            self.context.state.add_balance(&address, amount);
        }
        self.push_bool(true)
    }

    fn op_withdraw(&mut self) -> Result<()> {
        let (vm_type, address) = self.pop_vaab_operands()?;
        let amount = self.native_value();
        debug!(
            caller = %hex::encode(address),
            vm_type,
            amount,
            "withdraw"
        );
        if self.is_native_entry() {
            if !self.context.state.can_transfer(&address, amount) {
                return Err(VmError::InsufficientBalance);
            }
            self.context.state.sub_balance(&address, amount);
        }
        self.push_bool(true)
    }

    /// Shared operand handling for DEPOSIT/WITHDRAW: pops the address,
    /// the vm type, and the version, in that order.
    fn pop_vaab_operands(&mut self) -> Result<(u64, crate::types::Address)> {
        let address_bytes = self.pop()?;
        let vm_type = self.pop_int64()?;
        if vm_type != 0 {
            return Err(VmError::UnknownVmType);
        }
        let version = self.pop_int64()?;
        if version != 0 {
            return Err(VmError::UnknownVersion);
        }
        Ok((vm_type as u64, address_from_hash(&address_bytes)))
    }

    fn is_native_entry(&self) -> bool {
        self.context.asset_id.as_ref() == Some(&NATIVE_ASSET_ID)
    }

    fn native_value(&self) -> u64 {
        if self.is_native_entry() {
            self.context.amount.unwrap_or(0)
        } else {
            0
        }
    }
}

fn verify_ed25519(pubkey: &[u8], msg: &[u8], sig: &[u8]) -> bool {
    let Ok(key_bytes) = <&[u8; 32]>::try_from(pubkey) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(key_bytes) else {
        return false;
    };
    let Ok(sig_bytes) = <&[u8; 64]>::try_from(sig) else {
        return false;
    };
    key.verify(msg, &Signature::from_bytes(sig_bytes)).is_ok()
}
