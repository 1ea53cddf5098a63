//! The transaction-entries graph
//!
//! A transaction is validated in its entries form: a map of
//! content-addressed, immutable entries connected by value sources and
//! value destinations. Every entry id commits to the entry's type tag
//! and its commitment fields; witness fields (arguments, destinations)
//! stay outside the hash.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::encoding;
use crate::error::ValidationError;
use crate::types::{sha3_256, sha3_256_all, AssetAmount, Hash, Program};

/// Identifies where value originates: the referenced entry, the value
/// carried, and the position within the referenced entry's destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueSource {
    pub ref_id: Hash,
    pub value: AssetAmount,
    pub position: u64,
}

/// Identifies where value flows; symmetric to [`ValueSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueDestination {
    pub ref_id: Hash,
    pub value: AssetAmount,
    pub position: u64,
}

/// The definition of a non-native asset: a hash over the raw definition
/// document plus the program that authorizes issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub data: Hash,
    pub issuance_program: Program,
}

impl AssetDefinition {
    /// Derives the asset id this definition commits to.
    pub fn compute_asset_id(&self) -> Hash {
        let mut body = Vec::new();
        encoding::write_hash(&mut body, &self.data);
        write_program(&mut body, &self.issuance_program);
        sha3_256_all(&[b"assetid:", body.as_slice()])
    }
}

/// Root of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHeader {
    pub version: u64,
    pub serialized_size: u64,
    pub time_range: u64,
    pub result_ids: Vec<Hash>,
    pub mux_id: Hash,
    pub refdata_hash: Hash,
}

/// The single balancing node between a transaction's inputs and outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mux {
    pub sources: Vec<ValueSource>,
    pub program: Program,
    pub witness_destinations: Vec<ValueDestination>,
}

/// Creates new units of a non-native asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issuance {
    pub nonce_hash: Hash,
    pub value: AssetAmount,
    pub ordinal: u64,
    pub witness_asset_definition: AssetDefinition,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// Consumes a prior output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Spend {
    pub spent_output_id: Hash,
    pub ordinal: u64,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// The unique input of the first transaction in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coinbase {
    pub arbitrary: Vec<u8>,
    pub witness_destination: Option<ValueDestination>,
}

/// Deploys a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creation {
    pub nonce: u64,
    pub from: Program,
    pub input: Program,
    pub ordinal: u64,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// Invokes a contract. Superseded by [`Contract`] but still valid on the
/// wire; the two carry distinct hash tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub nonce: u64,
    pub from: Program,
    pub to: Program,
    pub input: Program,
    pub ordinal: u64,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// Invokes a contract, addressing the callee by raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub nonce: u64,
    pub from: Program,
    pub to: Vec<u8>,
    pub input: Program,
    pub ordinal: u64,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// Moves native-asset value from the UTXO side to the account side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub source: ValueSource,
    pub control_program: Program,
    pub ordinal: u64,
}

/// Moves account-side value back to the UTXO side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub control_program: Program,
    pub value: AssetAmount,
    pub withdraw_program: Program,
    pub ordinal: u64,
    pub witness_arguments: Vec<Vec<u8>>,
    pub witness_destination: Option<ValueDestination>,
}

/// Creates a new spendable UTXO.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub source: ValueSource,
    pub control_program: Program,
    pub ordinal: u64,
}

/// Burns value; its control program must be unspendable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Retirement {
    pub source: ValueSource,
    pub ordinal: u64,
}

/// Closed set of entry variants. The validator matches exhaustively.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry {
    Header(TxHeader),
    Mux(Mux),
    Issuance(Issuance),
    Spend(Spend),
    Coinbase(Coinbase),
    Creation(Creation),
    Call(Call),
    Contract(Contract),
    Deposit(Deposit),
    Withdrawal(Withdrawal),
    Output(Output),
    Retirement(Retirement),
}

impl Entry {
    /// Hash tag committing to the entry's type and format revision.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Entry::Header(_) => "txheader",
            Entry::Mux(_) => "mux1",
            Entry::Issuance(_) => "issuance1",
            Entry::Spend(_) => "spend1",
            Entry::Coinbase(_) => "coinbase1",
            Entry::Creation(_) => "creation1",
            Entry::Call(_) => "call1",
            Entry::Contract(_) => "contract1",
            Entry::Deposit(_) => "deposit1",
            Entry::Withdrawal(_) => "withdrawal1",
            Entry::Output(_) => "output1",
            Entry::Retirement(_) => "retirement1",
        }
    }

    /// Serializes the commitment fields for hashing. Witness fields
    /// (arguments, destinations) are deliberately excluded so that
    /// signing does not change an entry's identity.
    fn write_for_hash(&self, buf: &mut Vec<u8>) {
        match self {
            Entry::Header(h) => {
                write_u64(buf, h.version);
                write_u64(buf, h.time_range);
                encoding::write_hash(buf, &h.refdata_hash);
                write_u64(buf, h.result_ids.len() as u64);
                for id in &h.result_ids {
                    encoding::write_hash(buf, id);
                }
            }
            Entry::Mux(m) => {
                write_u64(buf, m.sources.len() as u64);
                for src in &m.sources {
                    write_value_source(buf, src);
                }
                write_program(buf, &m.program);
            }
            Entry::Issuance(iss) => {
                encoding::write_hash(buf, &iss.nonce_hash);
                write_asset_amount(buf, &iss.value);
            }
            Entry::Spend(sp) => {
                encoding::write_hash(buf, &sp.spent_output_id);
            }
            Entry::Coinbase(cb) => {
                write_bytes(buf, &cb.arbitrary);
            }
            Entry::Creation(c) => {
                write_u64(buf, c.nonce);
                write_program(buf, &c.from);
                write_program(buf, &c.input);
            }
            Entry::Call(c) => {
                write_u64(buf, c.nonce);
                write_program(buf, &c.from);
                write_program(buf, &c.to);
                write_program(buf, &c.input);
            }
            Entry::Contract(c) => {
                write_u64(buf, c.nonce);
                write_program(buf, &c.from);
                write_bytes(buf, &c.to);
                write_program(buf, &c.input);
            }
            Entry::Deposit(d) => {
                write_value_source(buf, &d.source);
                write_program(buf, &d.control_program);
            }
            Entry::Withdrawal(w) => {
                write_program(buf, &w.control_program);
                write_asset_amount(buf, &w.value);
                write_program(buf, &w.withdraw_program);
            }
            Entry::Output(o) => {
                write_value_source(buf, &o.source);
                write_program(buf, &o.control_program);
            }
            Entry::Retirement(r) => {
                write_value_source(buf, &r.source);
            }
        }
    }

    /// Ordinal linking an input-side entry back to its wire position.
    pub fn ordinal(&self) -> Option<u64> {
        match self {
            Entry::Issuance(e) => Some(e.ordinal),
            Entry::Spend(e) => Some(e.ordinal),
            Entry::Coinbase(_) => Some(0),
            Entry::Creation(e) => Some(e.ordinal),
            Entry::Call(e) => Some(e.ordinal),
            Entry::Contract(e) => Some(e.ordinal),
            Entry::Deposit(e) => Some(e.ordinal),
            Entry::Withdrawal(e) => Some(e.ordinal),
            _ => None,
        }
    }
}

/// Content-addresses an entry: SHA3 over the tagged digest of its
/// commitment serialization.
pub fn entry_id(entry: &Entry) -> Hash {
    let mut body = Vec::new();
    entry.write_for_hash(&mut body);
    let inner = sha3_256(&body);
    sha3_256_all(&[b"entryid:", entry.type_tag().as_bytes(), b":", &inner])
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    // commitment values are always below 2^63
    encoding::write_varint63(buf, v & (i64::MAX as u64)).expect("varint63 in range");
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    write_u64(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn write_program(buf: &mut Vec<u8>, prog: &Program) {
    write_u64(buf, prog.vm_version);
    write_bytes(buf, &prog.code);
}

fn write_asset_amount(buf: &mut Vec<u8>, value: &AssetAmount) {
    encoding::write_hash(buf, &value.asset_id);
    write_u64(buf, value.amount);
}

fn write_value_source(buf: &mut Vec<u8>, src: &ValueSource) {
    encoding::write_hash(buf, &src.ref_id);
    write_asset_amount(buf, &src.value);
    write_u64(buf, src.position);
}

/// The entries form of a transaction: the header, the full entry map,
/// and the derived index vectors the validator needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEntries {
    pub id: Hash,
    pub header: TxHeader,
    pub entries: HashMap<Hash, Entry>,
    /// 1:1 correspondence with the wire inputs
    pub input_ids: Vec<Hash>,
    pub spent_output_ids: Vec<Hash>,
    /// Entries that pay gas: native spends and withdrawals
    pub gas_input_ids: Vec<Hash>,
}

impl TxEntries {
    pub fn get(&self, id: &Hash) -> Result<&Entry, ValidationError> {
        self.entries
            .get(id)
            .ok_or_else(|| ValidationError::MissingEntry(hex::encode(id).into()))
    }

    /// Fetches an entry that must be an output.
    pub fn output(&self, id: &Hash) -> Result<&Output, ValidationError> {
        match self.get(id)? {
            Entry::Output(o) => Ok(o),
            other => Err(ValidationError::BadEntryType(
                format!("entry {} is {}, want output1", hex::encode(id), other.type_tag()).into(),
            )),
        }
    }

    /// Fetches an entry that must be a spend.
    pub fn spend(&self, id: &Hash) -> Result<&Spend, ValidationError> {
        match self.get(id)? {
            Entry::Spend(s) => Ok(s),
            other => Err(ValidationError::BadEntryType(
                format!("entry {} is {}, want spend1", hex::encode(id), other.type_tag()).into(),
            )),
        }
    }

    /// Sighash for input `n`: SHA3 over the input entry id and the tx id.
    pub fn sig_hash(&self, n: usize) -> Hash {
        sha3_256_all(&[&self.input_ids[n], &self.id])
    }
}
