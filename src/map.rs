//! Wire-to-entries mapping
//!
//! Builds the content-addressed entries graph from a wire transaction:
//! one entry per input, the balancing mux, one result entry per output
//! (classified into output, retirement or deposit by its program), and
//! the header. Value sources and destinations are wired symmetrically
//! so the validator can enforce reference symmetry.

use std::collections::HashMap;

use crate::constants::NATIVE_ASSET_ID;
use crate::entry::{
    entry_id, Coinbase, Creation, Deposit, Entry, Issuance, Mux, Output, Retirement, Spend,
    TxEntries, TxHeader, ValueDestination, ValueSource, Withdrawal,
};
use crate::entry::{Call, Contract};
use crate::error::ValidationError;
use crate::opcodes::OP_TRUE;
use crate::segwit;
use crate::types::{sha3_256, AssetAmount, Program};
use crate::vmutil;
use crate::wire::{TxData, TypedInput};

/// MapTx converts a wire transaction into its entries-based
/// representation.
pub fn map_tx(data: &TxData) -> Result<TxEntries, ValidationError> {
    let mut entries: HashMap<crate::types::Hash, Entry> = HashMap::new();

    // first pass: one entry per input, plus the prevout entry a spend
    // re-creates from its commitment
    let mut input_entries: Vec<Entry> = Vec::with_capacity(data.inputs.len());
    let mut mux_sources: Vec<ValueSource> = Vec::with_capacity(data.inputs.len());

    for (i, input) in data.inputs.iter().enumerate() {
        let ordinal = i as u64;
        match &input.typed {
            TypedInput::Issuance(inp) => {
                let value = AssetAmount::new(inp.asset_id(), inp.amount);
                let issuance = Entry::Issuance(Issuance {
                    nonce_hash: inp.nonce_hash(),
                    value,
                    ordinal,
                    witness_asset_definition: inp.definition(),
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&issuance),
                    value,
                    position: 0,
                });
                input_entries.push(issuance);
            }
            TypedInput::Spend(inp) => {
                let c = &inp.commitment;
                let prevout = Entry::Output(Output {
                    source: ValueSource {
                        ref_id: c.source_id,
                        value: c.asset_amount,
                        position: c.source_position,
                    },
                    control_program: Program::new(c.vm_version, c.control_program.clone()),
                    ordinal: 0,
                });
                let prevout_id = entry_id(&prevout);
                entries.insert(prevout_id, prevout);

                let spend = Entry::Spend(Spend {
                    spent_output_id: prevout_id,
                    ordinal,
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&spend),
                    value: c.asset_amount,
                    position: 0,
                });
                input_entries.push(spend);
            }
            TypedInput::Coinbase(inp) => {
                let coinbase = Entry::Coinbase(Coinbase {
                    arbitrary: inp.arbitrary.clone(),
                    witness_destination: None,
                });
                let out = data.outputs.first().ok_or_else(|| {
                    ValidationError::MissingField("coinbase transaction has no output".into())
                })?;
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&coinbase),
                    value: out.asset_amount,
                    position: 0,
                });
                input_entries.push(coinbase);
            }
            TypedInput::Creation(inp) => {
                let creation = Entry::Creation(Creation {
                    nonce: inp.nonce,
                    from: Program::new(inp.vm_version, inp.control_program.clone()),
                    input: Program::new(inp.vm_version, inp.data.clone()),
                    ordinal,
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&creation),
                    value: AssetAmount::new([0u8; 32], 0),
                    position: 0,
                });
                input_entries.push(creation);
            }
            TypedInput::Call(inp) => {
                let call = Entry::Call(Call {
                    nonce: inp.nonce,
                    from: Program::new(inp.vm_version, inp.control_program.clone()),
                    to: Program::new(inp.vm_version, inp.to.clone()),
                    input: Program::new(inp.vm_version, inp.data.clone()),
                    ordinal,
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&call),
                    value: AssetAmount::new([0u8; 32], 0),
                    position: 0,
                });
                input_entries.push(call);
            }
            TypedInput::Contract(inp) => {
                let contract = Entry::Contract(Contract {
                    nonce: inp.nonce,
                    from: Program::new(inp.vm_version, inp.control_program.clone()),
                    to: inp.to.clone(),
                    input: Program::new(inp.vm_version, inp.data.clone()),
                    ordinal,
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&contract),
                    value: AssetAmount::new([0u8; 32], 0),
                    position: 0,
                });
                input_entries.push(contract);
            }
            TypedInput::Withdrawal(inp) => {
                let withdrawal = Entry::Withdrawal(Withdrawal {
                    control_program: Program::new(inp.vm_version, inp.control_program.clone()),
                    value: inp.asset_amount,
                    withdraw_program: Program::new(inp.vm_version, inp.withdraw_program.clone()),
                    ordinal,
                    witness_arguments: inp.arguments.clone(),
                    witness_destination: None,
                });
                mux_sources.push(ValueSource {
                    ref_id: entry_id(&withdrawal),
                    value: inp.asset_amount,
                    position: 0,
                });
                input_entries.push(withdrawal);
            }
        }
    }

    // the mux id commits to its sources and program only, so it can be
    // derived before the destinations exist
    let mut mux = Mux {
        sources: mux_sources,
        program: Program::new(1, vec![OP_TRUE]),
        witness_destinations: Vec::new(),
    };
    let mux_id = entry_id(&Entry::Mux(mux.clone()));

    // connect the inputs to the mux
    for entry in &mut input_entries {
        let (dest_value, dest_pos) = match entry {
            Entry::Spend(s) => (mux.sources[s.ordinal as usize].value, s.ordinal),
            Entry::Issuance(iss) => (iss.value, iss.ordinal),
            Entry::Creation(c) => (mux.sources[c.ordinal as usize].value, c.ordinal),
            Entry::Call(c) => (mux.sources[c.ordinal as usize].value, c.ordinal),
            Entry::Contract(c) => (mux.sources[c.ordinal as usize].value, c.ordinal),
            Entry::Withdrawal(w) => (w.value, w.ordinal),
            Entry::Coinbase(_) => (mux.sources[0].value, 0),
            _ => continue,
        };
        let dest = ValueDestination {
            ref_id: mux_id,
            value: dest_value,
            position: dest_pos,
        };
        match entry {
            Entry::Spend(s) => s.witness_destination = Some(dest),
            Entry::Issuance(iss) => iss.witness_destination = Some(dest),
            Entry::Creation(c) => c.witness_destination = Some(dest),
            Entry::Call(c) => c.witness_destination = Some(dest),
            Entry::Contract(c) => c.witness_destination = Some(dest),
            Entry::Withdrawal(w) => w.witness_destination = Some(dest),
            Entry::Coinbase(cb) => cb.witness_destination = Some(dest),
            _ => {}
        }
    }

    // convert the wire outputs into result entries
    let mut result_ids = Vec::with_capacity(data.outputs.len());
    let mut results = Vec::with_capacity(data.outputs.len());
    for (i, out) in data.outputs.iter().enumerate() {
        let src = ValueSource {
            ref_id: mux_id,
            value: out.asset_amount,
            position: i as u64,
        };
        let result = if vmutil::is_unspendable(&out.control_program) {
            Entry::Retirement(Retirement {
                source: src.clone(),
                ordinal: i as u64,
            })
        } else if segwit::is_op_deposit(&out.control_program) {
            Entry::Deposit(Deposit {
                source: src.clone(),
                control_program: Program::new(out.vm_version, out.control_program.clone()),
                ordinal: i as u64,
            })
        } else {
            Entry::Output(Output {
                source: src.clone(),
                control_program: Program::new(out.vm_version, out.control_program.clone()),
                ordinal: i as u64,
            })
        };
        let result_id = entry_id(&result);
        mux.witness_destinations.push(ValueDestination {
            ref_id: result_id,
            value: src.value,
            position: 0,
        });
        result_ids.push(result_id);
        results.push(result);
    }

    let header = TxHeader {
        version: data.version,
        serialized_size: data.serialized_size,
        time_range: data.time_range,
        result_ids,
        mux_id,
        refdata_hash: sha3_256(&data.reference_data),
    };
    let header_entry = Entry::Header(header.clone());
    let tx_id = entry_id(&header_entry);

    // derived index vectors
    let mut input_ids = vec![[0u8; 32]; data.inputs.len()];
    let mut spent_output_ids = Vec::new();
    let mut gas_input_ids = Vec::new();
    for entry in &input_entries {
        let id = entry_id(entry);
        if let Some(ordinal) = entry.ordinal() {
            if (ordinal as usize) < input_ids.len() {
                input_ids[ordinal as usize] = id;
            }
        }
        match entry {
            Entry::Spend(s) => {
                spent_output_ids.push(s.spent_output_id);
                let native = s
                    .witness_destination
                    .as_ref()
                    .map(|d| d.value.asset_id == NATIVE_ASSET_ID)
                    .unwrap_or(false);
                if native {
                    gas_input_ids.push(id);
                }
            }
            Entry::Withdrawal(w) => {
                if w.value.asset_id == NATIVE_ASSET_ID {
                    gas_input_ids.push(id);
                }
            }
            _ => {}
        }
    }

    for entry in input_entries {
        entries.insert(entry_id(&entry), entry);
    }
    for result in results {
        entries.insert(entry_id(&result), result);
    }
    entries.insert(mux_id, Entry::Mux(mux));
    entries.insert(tx_id, header_entry);

    Ok(TxEntries {
        id: tx_id,
        header,
        entries,
        input_ids,
        spent_output_ids,
        gas_input_ids,
    })
}
