//! The transaction validation state machine
//!
//! `validate_tx` walks the entries graph once, memoizing per-entry
//! results, enforcing balance and reference invariants, running every
//! witness program through the stack VM, and threading gas through
//! [`GasState`]. It returns the gas state alongside the verdict so
//! callers can distinguish gas-valid program failures (keep the
//! transaction as gas-only) from outright rejection.

use std::collections::HashMap;

use tracing::debug;

use crate::constants::{COINBASE_ARBITRARY_SIZE_LIMIT, NATIVE_ASSET_ID};
use crate::entry::{entry_id, Entry, TxEntries, ValueDestination, ValueSource};
use crate::error::ValidationError;
use crate::gas::GasState;
use crate::segwit;
use crate::state::AccountState;
use crate::types::{address_from_hash, sha3_256_all, short_hex, AssetId, Hash, Program};
use crate::vm::{self, ChainContext, Context, EntryChecker};

/// The slice of block context a transaction is validated against.
#[derive(Debug, Clone, Default)]
pub struct BlockContext {
    pub version: u64,
    pub height: u64,
    /// Id of the block's first transaction; a coinbase entry is only
    /// valid inside that transaction.
    pub first_tx_id: Option<Hash>,
}

/// Context threaded through the walk of one transaction's graph.
pub struct ValidationState<'a> {
    chain: &'a dyn ChainContext,
    state_db: &'a mut dyn AccountState,
    block: &'a BlockContext,
    tx: &'a TxEntries,
    gas_status: GasState,
    /// Memoized per-entry validation results
    cache: HashMap<Hash, Result<(), ValidationError>>,
}

/// ValidateTx validates a transaction against the given block context,
/// chain handle and account-state store.
pub fn validate_tx(
    tx: &TxEntries,
    block: &BlockContext,
    chain: &dyn ChainContext,
    state_db: &mut dyn AccountState,
) -> (GasState, Result<(), ValidationError>) {
    let mut state = ValidationState {
        chain,
        state_db,
        block,
        tx,
        gas_status: GasState::default(),
        cache: HashMap::new(),
    };
    let verdict = state.validate();
    (state.gas_status, verdict)
}

/// Dry-runs the hybrid program of a single contract-bearing entry with
/// an unbounded budget, reporting the gas it would consume.
pub fn estimate_contract_gas(
    entry: &Entry,
    tx: &TxEntries,
    block: &BlockContext,
    chain: &dyn ChainContext,
    state_db: &mut dyn AccountState,
) -> Result<GasState, ValidationError> {
    state_db.prepare(tx.id, [0u8; 32], 0);

    let mut state = ValidationState {
        chain,
        state_db,
        block,
        tx,
        gas_status: GasState {
            gas_valid: true,
            gas_left: i64::MAX,
            ..GasState::default()
        },
        cache: HashMap::new(),
    };

    let program_and_args = match entry {
        Entry::Creation(c) if segwit::is_op_create(&c.input.code) => {
            Some((&c.input, contract_args(&c.from, c.nonce, None)?))
        }
        Entry::Call(c) if segwit::is_op_call(&c.input.code) => {
            Some((&c.input, contract_args(&c.from, c.nonce, Some(c.to.code.clone()))?))
        }
        Entry::Contract(c) if segwit::is_op_contract(&c.input.code) => {
            Some((&c.input, contract_args(&c.from, c.nonce, Some(c.to.clone()))?))
        }
        Entry::Deposit(d) if segwit::is_op_deposit(&d.control_program.code) => {
            Some((&d.control_program, Vec::new()))
        }
        Entry::Withdrawal(w) if segwit::is_op_withdraw(&w.withdraw_program.code) => {
            Some((&w.withdraw_program, Vec::new()))
        }
        Entry::Creation(_) | Entry::Call(_) | Entry::Contract(_) | Entry::Deposit(_)
        | Entry::Withdrawal(_) => None,
        _ => {
            return Err(ValidationError::BadEntryType(
                "entry carries no contract program".into(),
            ))
        }
    };

    if let Some((prog, args)) = program_and_args {
        let gas_left = state.run_program(entry, prog, args)?;
        state.gas_status.update_usage(gas_left)?;
    }

    debug!(gas_used = state.gas_status.gas_used, "estimated contract gas");
    Ok(state.gas_status)
}

impl<'a> ValidationState<'a> {
    fn validate(&mut self) -> Result<(), ValidationError> {
        if self.block.version == 1 && self.tx.header.version != 1 {
            return Err(ValidationError::TxVersion {
                block: self.block.version,
                tx: self.tx.header.version,
            });
        }
        if self.tx.header.serialized_size == 0 {
            return Err(ValidationError::WrongTransactionSize);
        }
        check_time_range(self.tx, self.block)?;
        check_standard_tx(self.tx)?;

        let tx_id = self.tx.id;
        self.check_valid(&tx_id)
    }

    fn check_valid(&mut self, entry_ref: &Hash) -> Result<(), ValidationError> {
        if let Some(cached) = self.cache.get(entry_ref) {
            return cached.clone();
        }
        let result = self.check_valid_uncached(*entry_ref);
        self.cache.insert(*entry_ref, result.clone());
        result
    }

    fn check_valid_uncached(&mut self, id: Hash) -> Result<(), ValidationError> {
        let tx = self.tx;
        let entry = tx.get(&id)?;

        match entry {
            Entry::Header(header) => {
                for (i, result_id) in header.result_ids.iter().enumerate() {
                    self.check_valid(result_id)
                        .map_err(|e| e.ctx(format!("checking result {i}")))?;
                }

                if header.version == 1 && header.result_ids.is_empty() {
                    // legacy transactions carry no results; fall back to
                    // checking the mux directly
                    self.check_valid(&header.mux_id)
                        .map_err(|e| e.ctx(format!("checking entry {}", short_hex(&id))))?;
                }
            }

            Entry::Mux(mux) => {
                let mut parity: HashMap<AssetId, i64> = HashMap::new();
                for (i, src) in mux.sources.iter().enumerate() {
                    if src.value.amount > i64::MAX as u64 {
                        return Err(ValidationError::BadAmount);
                    }
                    let sum = parity.entry(src.value.asset_id).or_insert(0);
                    *sum = sum.checked_add(src.value.amount as i64).ok_or_else(|| {
                        ValidationError::Overflow(
                            format!(
                                "adding {} units of asset {} from mux source {} overflows int64",
                                src.value.amount,
                                short_hex(&src.value.asset_id),
                                i
                            )
                            .into(),
                        )
                    })?;
                }

                for (i, dest) in mux.witness_destinations.iter().enumerate() {
                    let sum = parity.get_mut(&dest.value.asset_id).ok_or_else(|| {
                        ValidationError::NoSource(
                            format!(
                                "mux destination {}, asset {}, has no corresponding source",
                                i,
                                short_hex(&dest.value.asset_id)
                            )
                            .into(),
                        )
                    })?;
                    if dest.value.amount > i64::MAX as u64 {
                        return Err(ValidationError::BadAmount);
                    }
                    *sum = sum.checked_sub(dest.value.amount as i64).ok_or_else(|| {
                        ValidationError::Overflow(
                            format!(
                                "subtracting {} units of asset {} from mux destination {} underflows int64",
                                dest.value.amount,
                                short_hex(&dest.value.asset_id),
                                i
                            )
                            .into(),
                        )
                    })?;
                }

                for (asset_id, amount) in &parity {
                    if *asset_id == NATIVE_ASSET_ID {
                        self.gas_status
                            .set_gas(*amount, tx.header.serialized_size as i64)?;
                        debug!(storage_gas = self.gas_status.storage_gas, "mux");
                    } else if *amount != 0 {
                        return Err(ValidationError::Unbalanced(
                            format!(
                                "asset {} sources - destinations = {} (should be 0)",
                                short_hex(asset_id),
                                amount
                            )
                            .into(),
                        ));
                    }
                }

                for input_id in &tx.gas_input_ids {
                    self.check_valid(input_id)
                        .map_err(|e| e.ctx("checking gas input"))?;
                }

                for (i, dest) in mux.witness_destinations.iter().enumerate() {
                    self.check_valid_dest(&id, i as u64, dest)
                        .map_err(|e| e.ctx(format!("checking mux destination {i}")))?;
                }

                if !tx.gas_input_ids.is_empty() {
                    self.gas_status.set_gas_valid()?;
                }

                for (i, src) in mux.sources.iter().enumerate() {
                    self.check_valid_src(&id, i as u64, src)
                        .map_err(|e| e.ctx(format!("checking mux source {i}")))?;
                }
            }

            Entry::Output(output) => {
                self.check_valid_src(&id, 0, &output.source)
                    .map_err(|e| e.ctx("checking output source"))?;

                if self.chain.supports_account_balances()
                    && output.source.value.asset_id == NATIVE_ASSET_ID
                {
                    let hash = segwit::get_hash_from_standard_prog(&output.control_program.code)?;
                    let addr = address_from_hash(&hash);
                    self.state_db.add_balance(&addr, output.source.value.amount);
                }
            }

            Entry::Retirement(retirement) => {
                self.check_valid_src(&id, 0, &retirement.source)
                    .map_err(|e| e.ctx("checking retirement source"))?;
            }

            Entry::Issuance(issuance) => {
                let computed = issuance.witness_asset_definition.compute_asset_id();
                if computed != issuance.value.asset_id {
                    return Err(ValidationError::MismatchedAssetId(
                        format!(
                            "asset ID is {}, issuance wants {}",
                            short_hex(&computed),
                            short_hex(&issuance.value.asset_id)
                        )
                        .into(),
                    ));
                }

                let gas_left = self
                    .run_program(
                        entry,
                        &issuance.witness_asset_definition.issuance_program,
                        issuance.witness_arguments.clone(),
                    )
                    .map_err(|e| e.ctx("checking issuance program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "issue");
                self.gas_status.update_usage(gas_left)?;

                let dest = issuance
                    .witness_destination
                    .as_ref()
                    .ok_or_else(|| ValidationError::MissingField("issuance destination".into()))?;
                self.check_valid_dest(&id, 0, dest)
                    .map_err(|e| e.ctx("checking issuance destination"))?;
            }

            Entry::Creation(creation) => {
                let gas_left = self
                    .run_program(entry, &creation.from, creation.witness_arguments.clone())
                    .map_err(|e| e.ctx("checking creation control program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "creation");
                self.gas_status.update_usage(gas_left)?;

                if segwit::is_op_create(&creation.input.code) {
                    let args = contract_args(&creation.from, creation.nonce, None)?;
                    let gas_left = self
                        .run_program(entry, &creation.input, args)
                        .map_err(|e| e.ctx("checking creation program"))?;
                    debug!(gas_used = self.gas_status.gas_left - gas_left, "creation");
                    self.gas_status.update_usage(gas_left)?;
                }
            }

            Entry::Call(call) => {
                let gas_left = self
                    .run_program(entry, &call.from, call.witness_arguments.clone())
                    .map_err(|e| e.ctx("checking call control program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "call");
                self.gas_status.update_usage(gas_left)?;

                if segwit::is_op_call(&call.input.code) {
                    let args = contract_args(&call.from, call.nonce, Some(call.to.code.clone()))?;
                    let gas_left = self
                        .run_program(entry, &call.input, args)
                        .map_err(|e| e.ctx("checking call program"))?;
                    debug!(gas_used = self.gas_status.gas_left - gas_left, "call");
                    self.gas_status.update_usage(gas_left)?;
                }
            }

            Entry::Contract(contract) => {
                let gas_left = self
                    .run_program(entry, &contract.from, contract.witness_arguments.clone())
                    .map_err(|e| e.ctx("checking contract control program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "contract");
                self.gas_status.update_usage(gas_left)?;

                if segwit::is_op_contract(&contract.input.code) {
                    let args = contract_args(&contract.from, contract.nonce, Some(contract.to.clone()))?;
                    let gas_left = self
                        .run_program(entry, &contract.input, args)
                        .map_err(|e| e.ctx("checking contract program"))?;
                    debug!(gas_used = self.gas_status.gas_left - gas_left, "contract");
                    self.gas_status.update_usage(gas_left)?;
                }
            }

            Entry::Deposit(deposit) => {
                self.check_valid_src(&id, 0, &deposit.source)
                    .map_err(|e| e.ctx("checking deposit source"))?;

                if segwit::is_op_deposit(&deposit.control_program.code) {
                    let gas_left = self
                        .run_program(entry, &deposit.control_program, Vec::new())
                        .map_err(|e| e.ctx("checking deposit program"))?;
                    debug!(gas_used = self.gas_status.gas_left - gas_left, "deposit");
                    self.gas_status.update_usage(gas_left)?;
                }
            }

            Entry::Withdrawal(withdrawal) => {
                let gas_left = self
                    .run_program(
                        entry,
                        &withdrawal.control_program,
                        withdrawal.witness_arguments.clone(),
                    )
                    .map_err(|e| e.ctx("checking withdrawal control program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "withdrawal");
                self.gas_status.update_usage(gas_left)?;

                let dest = withdrawal.witness_destination.as_ref().ok_or_else(|| {
                    ValidationError::MissingField("withdrawal destination".into())
                })?;
                self.check_valid_dest(&id, 0, dest)
                    .map_err(|e| e.ctx("checking withdrawal destination"))?;

                if segwit::is_op_withdraw(&withdrawal.withdraw_program.code) {
                    let gas_left = self
                        .run_program(entry, &withdrawal.withdraw_program, Vec::new())
                        .map_err(|e| e.ctx("checking withdrawal program"))?;
                    debug!(gas_used = self.gas_status.gas_left - gas_left, "withdrawal");
                    self.gas_status.update_usage(gas_left)?;
                }
            }

            Entry::Spend(spend) => {
                let spent_output = tx
                    .output(&spend.spent_output_id)
                    .map_err(|e| e.ctx("getting spend prevout"))?;

                let gas_left = self
                    .run_program(
                        entry,
                        &spent_output.control_program,
                        spend.witness_arguments.clone(),
                    )
                    .map_err(|e| e.ctx("checking control program"))?;
                debug!(gas_used = self.gas_status.gas_left - gas_left, "spend");
                self.gas_status.update_usage(gas_left)?;

                let dest = spend
                    .witness_destination
                    .as_ref()
                    .ok_or_else(|| ValidationError::MissingField("spend destination".into()))?;
                if spent_output.source.value != dest.value {
                    return Err(ValidationError::MismatchedValue(
                        format!(
                            "previous output is for {} unit(s) of {}, spend wants {} unit(s) of {}",
                            spent_output.source.value.amount,
                            short_hex(&spent_output.source.value.asset_id),
                            dest.value.amount,
                            short_hex(&dest.value.asset_id)
                        )
                        .into(),
                    ));
                }

                self.check_valid_dest(&id, 0, dest)
                    .map_err(|e| e.ctx("checking spend destination"))?;

                if self.chain.supports_account_balances()
                    && spent_output.source.value.asset_id == NATIVE_ASSET_ID
                {
                    let hash =
                        segwit::get_hash_from_standard_prog(&spent_output.control_program.code)?;
                    let addr = address_from_hash(&hash);
                    self.state_db
                        .sub_balance(&addr, spent_output.source.value.amount);
                }
            }

            Entry::Coinbase(coinbase) => {
                if self.block.first_tx_id != Some(tx.id) {
                    return Err(ValidationError::WrongCoinbaseTransaction);
                }

                let dest = coinbase
                    .witness_destination
                    .as_ref()
                    .ok_or_else(|| ValidationError::MissingField("coinbase destination".into()))?;
                if dest.value.asset_id != NATIVE_ASSET_ID {
                    return Err(ValidationError::WrongCoinbaseAsset);
                }

                if coinbase.arbitrary.len() > COINBASE_ARBITRARY_SIZE_LIMIT {
                    return Err(ValidationError::CoinbaseArbitraryOversize);
                }

                self.check_valid_dest(&id, 0, dest)
                    .map_err(|e| e.ctx("checking coinbase destination"))?;

                // the coinbase pays no gas; it is valid once every check
                // above has passed
                self.gas_status.gas_valid = true;
            }
        }

        Ok(())
    }

    /// Validates one value source of the entry `owner_id`: the referenced
    /// entry must validate, and its destination at the mirrored position
    /// must point back with the same value.
    fn check_valid_src(
        &mut self,
        owner_id: &Hash,
        source_pos: u64,
        vs: &ValueSource,
    ) -> Result<(), ValidationError> {
        let tx = self.tx;
        let referenced = tx.get(&vs.ref_id)?;

        self.check_valid(&vs.ref_id)
            .map_err(|e| e.ctx("checking value source"))?;

        let dest = match referenced {
            Entry::Coinbase(e) => single_dest(&e.witness_destination, vs.position, "coinbase")?,
            Entry::Issuance(e) => single_dest(&e.witness_destination, vs.position, "issuance")?,
            Entry::Spend(e) => single_dest(&e.witness_destination, vs.position, "spend")?,
            Entry::Creation(e) => single_dest(&e.witness_destination, vs.position, "creation")?,
            Entry::Call(e) => single_dest(&e.witness_destination, vs.position, "call")?,
            Entry::Contract(e) => single_dest(&e.witness_destination, vs.position, "contract")?,
            Entry::Withdrawal(e) => single_dest(&e.witness_destination, vs.position, "withdrawal")?,
            Entry::Mux(mux) => {
                mux.witness_destinations
                    .get(vs.position as usize)
                    .ok_or_else(|| {
                        ValidationError::Position(
                            format!(
                                "invalid position {} for {}-destination mux source",
                                vs.position,
                                mux.witness_destinations.len()
                            )
                            .into(),
                        )
                    })?
            }
            other => {
                return Err(ValidationError::BadEntryType(
                    format!(
                        "value source is {}, should be an input entry or mux",
                        other.type_tag()
                    )
                    .into(),
                ))
            }
        };

        if dest.ref_id != *owner_id {
            return Err(ValidationError::MismatchedReference(
                format!(
                    "value source for {} has disagreeing destination {}",
                    short_hex(owner_id),
                    short_hex(&dest.ref_id)
                )
                .into(),
            ));
        }
        if dest.position != source_pos {
            return Err(ValidationError::MismatchedPosition(
                format!(
                    "value source position {} disagrees with {}",
                    dest.position, source_pos
                )
                .into(),
            ));
        }
        if dest.value != vs.value {
            return Err(ValidationError::MismatchedValue(
                format!(
                    "source value {}:{} disagrees with {}:{}",
                    short_hex(&dest.value.asset_id),
                    dest.value.amount,
                    short_hex(&vs.value.asset_id),
                    vs.value.amount
                )
                .into(),
            ));
        }

        Ok(())
    }

    /// Validates one value destination of the entry `owner_id`,
    /// re-enforcing reference symmetry from the receiving side.
    fn check_valid_dest(
        &mut self,
        owner_id: &Hash,
        dest_pos: u64,
        vd: &ValueDestination,
    ) -> Result<(), ValidationError> {
        let tx = self.tx;
        let referenced = tx.get(&vd.ref_id)?;

        let src = match referenced {
            Entry::Output(e) => single_src(&e.source, vd.position, "output")?,
            Entry::Retirement(e) => single_src(&e.source, vd.position, "retirement")?,
            Entry::Deposit(e) => single_src(&e.source, vd.position, "deposit")?,
            Entry::Mux(mux) => mux.sources.get(vd.position as usize).ok_or_else(|| {
                ValidationError::Position(
                    format!(
                        "invalid position {} for {}-source mux destination",
                        vd.position,
                        mux.sources.len()
                    )
                    .into(),
                )
            })?,
            other => {
                return Err(ValidationError::BadEntryType(
                    format!(
                        "value destination is {}, should be output, retirement, deposit or mux",
                        other.type_tag()
                    )
                    .into(),
                ))
            }
        };

        if src.ref_id != *owner_id {
            return Err(ValidationError::MismatchedReference(
                format!(
                    "value destination for {} has disagreeing source {}",
                    short_hex(owner_id),
                    short_hex(&src.ref_id)
                )
                .into(),
            ));
        }
        if src.position != dest_pos {
            return Err(ValidationError::MismatchedPosition(
                format!(
                    "value destination position {} disagrees with {}",
                    src.position, dest_pos
                )
                .into(),
            ));
        }
        if src.value != vd.value {
            return Err(ValidationError::MismatchedValue(
                format!(
                    "destination value {}:{} disagrees with {}:{}",
                    short_hex(&src.value.asset_id),
                    src.value.amount,
                    short_hex(&vd.value.asset_id),
                    vd.value.amount
                )
                .into(),
            ));
        }

        Ok(())
    }

    /// Runs one witness program through the stack VM against the current
    /// gas budget, returning the gas left on success.
    fn run_program(
        &mut self,
        entry: &Entry,
        prog: &Program,
        args: Vec<Vec<u8>>,
    ) -> Result<i64, ValidationError> {
        let mut context = new_tx_vm_context(
            self.chain,
            &mut *self.state_db,
            self.block,
            self.tx,
            entry,
            prog,
            args,
        );
        Ok(vm::verify(&mut context, self.gas_status.gas_left)?)
    }
}

/// The `[from_hash, nonce, (to)]` argument vector for hybrid programs.
fn contract_args(
    from: &Program,
    nonce: u64,
    to: Option<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, ValidationError> {
    let from_hash = segwit::get_hash_from_standard_prog(&from.code)?;
    let mut args = vec![from_hash, vm::int64_bytes(nonce as i64)];
    if let Some(to) = to {
        args.push(to);
    }
    Ok(args)
}

fn single_dest<'e>(
    dest: &'e Option<ValueDestination>,
    position: u64,
    kind: &'static str,
) -> Result<&'e ValueDestination, ValidationError> {
    if position != 0 {
        return Err(ValidationError::Position(
            format!("invalid position {position} for {kind} source").into(),
        ));
    }
    dest.as_ref().ok_or_else(|| {
        ValidationError::MissingField(format!("{kind} missing destination").into())
    })
}

fn single_src<'e>(
    src: &'e ValueSource,
    position: u64,
    kind: &'static str,
) -> Result<&'e ValueSource, ValidationError> {
    if position != 0 {
        return Err(ValidationError::Position(
            format!("invalid position {position} for {kind} destination").into(),
        ));
    }
    Ok(src)
}

/// Every gas-paying input must spend a pay-to-witness program, and every
/// native-asset output must pay to one.
pub fn check_standard_tx(tx: &TxEntries) -> Result<(), ValidationError> {
    for id in &tx.gas_input_ids {
        match tx.get(id)? {
            Entry::Spend(spend) => {
                let spent_output = tx.output(&spend.spent_output_id)?;
                if !segwit::is_p2w_script(&spent_output.control_program.code) {
                    return Err(ValidationError::NotStandardTx);
                }
            }
            Entry::Withdrawal(withdrawal) => {
                if !segwit::is_p2w_script(&withdrawal.control_program.code) {
                    return Err(ValidationError::NotStandardTx);
                }
            }
            _ => return Err(ValidationError::NotStandardTx),
        }
    }

    for id in &tx.header.result_ids {
        let Entry::Output(output) = tx.get(id)? else {
            continue;
        };
        if output.source.value.asset_id != NATIVE_ASSET_ID {
            continue;
        }
        if !segwit::is_p2w_script(&output.control_program.code) {
            return Err(ValidationError::NotStandardTx);
        }
    }
    Ok(())
}

/// A nonzero time range is a height bound the containing block must not
/// have passed.
pub fn check_time_range(tx: &TxEntries, block: &BlockContext) -> Result<(), ValidationError> {
    if tx.header.time_range == 0 {
        return Ok(());
    }
    if tx.header.time_range < block.height {
        return Err(ValidationError::BadTimeRange);
    }
    Ok(())
}

/// NewTxVMContext assembles the VM context for one witness program of
/// one entry.
fn new_tx_vm_context<'c>(
    chain: &'c dyn ChainContext,
    state: &'c mut dyn AccountState,
    block: &BlockContext,
    tx: &'c TxEntries,
    entry: &'c Entry,
    prog: &Program,
    args: Vec<Vec<u8>>,
) -> Context<'c> {
    let mut asset_id = None;
    let mut amount = None;
    let mut dest_pos = None;
    let mut spent_output_id = None;

    match entry {
        Entry::Issuance(iss) => {
            asset_id = Some(iss.value.asset_id);
            amount = Some(iss.value.amount);
            dest_pos = iss.witness_destination.as_ref().map(|d| d.position);
        }
        Entry::Spend(sp) => {
            if let Ok(spent_output) = tx.output(&sp.spent_output_id) {
                asset_id = Some(spent_output.source.value.asset_id);
                amount = Some(spent_output.source.value.amount);
            }
            dest_pos = sp.witness_destination.as_ref().map(|d| d.position);
            spent_output_id = Some(sp.spent_output_id);
        }
        Entry::Creation(_) | Entry::Call(_) | Entry::Contract(_) => {
            asset_id = Some(NATIVE_ASSET_ID);
            amount = Some(0);
        }
        Entry::Deposit(d) => {
            asset_id = Some(d.source.value.asset_id);
            amount = Some(d.source.value.amount);
        }
        Entry::Withdrawal(w) => {
            asset_id = Some(w.value.asset_id);
            amount = Some(w.value.amount);
            dest_pos = w.witness_destination.as_ref().map(|d| d.position);
        }
        _ => {}
    }

    let eid = entry_id(entry);

    Context {
        chain,
        state,
        vm_version: prog.vm_version,
        code: witness_program(&prog.code),
        arguments: args,
        entry_id: eid,
        tx_version: tx.header.version,
        block_height: block.height,
        tx_sig_hash: sha3_256_all(&[&eid, &tx.id]),
        num_results: tx.header.result_ids.len() as u64,
        asset_id,
        amount,
        dest_pos,
        spent_output_id,
        entry_checker: Some(EntryChecker {
            entry,
            entries: &tx.entries,
        }),
    }
}

/// A P2WSH program executes in its expanded P2SH form; everything else
/// runs as-is.
fn witness_program(code: &[u8]) -> Vec<u8> {
    if segwit::is_p2wsh_script(code) {
        if let Ok(converted) = segwit::convert_p2sh_program(code) {
            return converted;
        }
    }
    code.to_vec()
}
