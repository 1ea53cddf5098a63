//! Wire form of transactions
//!
//! The wire layout frames every input as `(asset_version, commitment,
//! witness)` where commitment and witness are extensible strings. Input
//! discriminator bytes: 0=Issuance, 1=Spend, 2=Coinbase, 3=Creation,
//! 4=Call, 5=Contract, 6=Withdrawal. The entries graph derived from
//! this form is what the validator actually walks.

use serde::{Deserialize, Serialize};

use crate::encoding::{
    read_extensible_string, read_hash, read_varint63, read_varstr31, read_varstr_list,
    write_extensible_string, write_hash, write_varint63, write_varstr31, write_varstr_list,
};
use crate::entry::{self, AssetDefinition, TxEntries};
use crate::error::{EncodingError, ValidationError};
use crate::map::map_tx;
use crate::types::{sha3_256, AssetAmount, AssetId, Hash, Program};

/// Input discriminator bytes.
pub const ISSUANCE_INPUT_TYPE: u8 = 0;
pub const SPEND_INPUT_TYPE: u8 = 1;
pub const COINBASE_INPUT_TYPE: u8 = 2;
pub const CREATION_INPUT_TYPE: u8 = 3;
pub const CALL_INPUT_TYPE: u8 = 4;
pub const CONTRACT_INPUT_TYPE: u8 = 5;
pub const WITHDRAWAL_INPUT_TYPE: u8 = 6;

/// Asset format version understood by this node.
pub const ASSET_VERSION: u64 = 1;

/// Top-level wire input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub asset_version: u64,
    pub typed: TypedInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypedInput {
    Issuance(IssuanceInput),
    Spend(SpendInput),
    Coinbase(CoinbaseInput),
    Creation(CreationInput),
    Call(CallInput),
    Contract(ContractInput),
    Withdrawal(WithdrawalInput),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceInput {
    pub nonce: Vec<u8>,
    pub amount: u64,
    pub asset_definition: Vec<u8>,
    pub vm_version: u64,
    pub issuance_program: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,
}

impl IssuanceInput {
    /// Hash committing to the issuance nonce.
    pub fn nonce_hash(&self) -> Hash {
        sha3_256(&self.nonce)
    }

    /// Hash of the raw asset definition document.
    pub fn asset_definition_hash(&self) -> Hash {
        sha3_256(&self.asset_definition)
    }

    pub fn definition(&self) -> AssetDefinition {
        AssetDefinition {
            data: self.asset_definition_hash(),
            issuance_program: Program::new(self.vm_version, self.issuance_program.clone()),
        }
    }

    /// The asset id this input issues.
    pub fn asset_id(&self) -> AssetId {
        self.definition().compute_asset_id()
    }
}

/// Commitment of a spend: everything identifying the prevout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendCommitment {
    pub asset_amount: AssetAmount,
    pub source_id: Hash,
    pub source_position: u64,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
}

impl SpendCommitment {
    /// Content id of the output this spend consumes.
    pub fn spent_output_id(&self) -> Hash {
        let prevout = entry::Entry::Output(entry::Output {
            source: entry::ValueSource {
                ref_id: self.source_id,
                value: self.asset_amount,
                position: self.source_position,
            },
            control_program: Program::new(self.vm_version, self.control_program.clone()),
            // ordinal does not matter for prevouts, only for result outputs
            ordinal: 0,
        });
        entry::entry_id(&prevout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendInput {
    pub commitment: SpendCommitment,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseInput {
    pub arbitrary: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationInput {
    pub nonce: u64,
    pub data: Vec<u8>,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallInput {
    pub nonce: u64,
    pub to: Vec<u8>,
    pub data: Vec<u8>,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractInput {
    pub nonce: u64,
    pub to: Vec<u8>,
    pub data: Vec<u8>,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalInput {
    pub asset_amount: AssetAmount,
    pub withdraw_program: Vec<u8>,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
    pub arguments: Vec<Vec<u8>>,
}

impl TxInput {
    /// The value this input brings into the transaction, if any.
    pub fn asset_amount(&self) -> AssetAmount {
        match &self.typed {
            TypedInput::Issuance(inp) => AssetAmount::new(inp.asset_id(), inp.amount),
            TypedInput::Spend(inp) => inp.commitment.asset_amount,
            TypedInput::Withdrawal(inp) => inp.asset_amount,
            _ => AssetAmount::new([0u8; 32], 0),
        }
    }

    /// The program guarding this input, if any.
    pub fn control_program(&self) -> Option<&[u8]> {
        match &self.typed {
            TypedInput::Issuance(inp) => Some(&inp.issuance_program),
            TypedInput::Spend(inp) => Some(&inp.commitment.control_program),
            TypedInput::Contract(inp) => Some(&inp.control_program),
            TypedInput::Withdrawal(inp) => Some(&inp.control_program),
            _ => None,
        }
    }

    pub fn arguments(&self) -> &[Vec<u8>] {
        match &self.typed {
            TypedInput::Issuance(inp) => &inp.arguments,
            TypedInput::Spend(inp) => &inp.arguments,
            TypedInput::Creation(inp) => &inp.arguments,
            TypedInput::Call(inp) => &inp.arguments,
            TypedInput::Contract(inp) => &inp.arguments,
            TypedInput::Withdrawal(inp) => &inp.arguments,
            TypedInput::Coinbase(_) => &[],
        }
    }

    pub fn set_arguments(&mut self, args: Vec<Vec<u8>>) {
        match &mut self.typed {
            TypedInput::Issuance(inp) => inp.arguments = args,
            TypedInput::Spend(inp) => inp.arguments = args,
            TypedInput::Creation(inp) => inp.arguments = args,
            TypedInput::Call(inp) => inp.arguments = args,
            TypedInput::Contract(inp) => inp.arguments = args,
            TypedInput::Withdrawal(inp) => inp.arguments = args,
            TypedInput::Coinbase(_) => {}
        }
    }

    pub fn input_type(&self) -> u8 {
        match &self.typed {
            TypedInput::Issuance(_) => ISSUANCE_INPUT_TYPE,
            TypedInput::Spend(_) => SPEND_INPUT_TYPE,
            TypedInput::Coinbase(_) => COINBASE_INPUT_TYPE,
            TypedInput::Creation(_) => CREATION_INPUT_TYPE,
            TypedInput::Call(_) => CALL_INPUT_TYPE,
            TypedInput::Contract(_) => CONTRACT_INPUT_TYPE,
            TypedInput::Withdrawal(_) => WITHDRAWAL_INPUT_TYPE,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        write_varint63(buf, self.asset_version)?;
        write_extensible_string(buf, |inner| self.write_commitment(inner))?;
        write_extensible_string(buf, |inner| self.write_witness(inner))
    }

    fn write_commitment(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if self.asset_version != ASSET_VERSION {
            return Ok(());
        }
        buf.push(self.input_type());
        match &self.typed {
            TypedInput::Issuance(inp) => {
                write_varstr31(buf, &inp.nonce)?;
                write_hash(buf, &inp.asset_id());
                write_varint63(buf, inp.amount)
            }
            TypedInput::Spend(inp) => write_extensible_string(buf, |inner| {
                let c = &inp.commitment;
                write_hash(inner, &c.asset_amount.asset_id);
                write_varint63(inner, c.asset_amount.amount)?;
                write_hash(inner, &c.source_id);
                write_varint63(inner, c.source_position)?;
                write_varint63(inner, c.vm_version)?;
                write_varstr31(inner, &c.control_program)
            }),
            TypedInput::Coinbase(inp) => write_varstr31(buf, &inp.arbitrary),
            TypedInput::Creation(inp) => {
                write_varint63(buf, inp.nonce)?;
                write_varstr31(buf, &inp.data)?;
                write_varint63(buf, inp.vm_version)?;
                write_varstr31(buf, &inp.control_program)
            }
            TypedInput::Call(inp) => {
                write_varint63(buf, inp.nonce)?;
                write_varstr31(buf, &inp.to)?;
                write_varstr31(buf, &inp.data)?;
                write_varint63(buf, inp.vm_version)?;
                write_varstr31(buf, &inp.control_program)
            }
            TypedInput::Contract(inp) => {
                write_varint63(buf, inp.nonce)?;
                write_varstr31(buf, &inp.to)?;
                write_varstr31(buf, &inp.data)?;
                write_varint63(buf, inp.vm_version)?;
                write_varstr31(buf, &inp.control_program)
            }
            TypedInput::Withdrawal(inp) => {
                write_hash(buf, &inp.asset_amount.asset_id);
                write_varint63(buf, inp.asset_amount.amount)?;
                write_varstr31(buf, &inp.withdraw_program)?;
                write_varint63(buf, inp.vm_version)?;
                write_varstr31(buf, &inp.control_program)
            }
        }
    }

    fn write_witness(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        if self.asset_version != ASSET_VERSION {
            return Ok(());
        }
        match &self.typed {
            TypedInput::Issuance(inp) => {
                write_varstr31(buf, &inp.asset_definition)?;
                write_varint63(buf, inp.vm_version)?;
                write_varstr31(buf, &inp.issuance_program)?;
                write_varstr_list(buf, &inp.arguments)
            }
            TypedInput::Coinbase(_) => Ok(()),
            other => {
                let args = match other {
                    TypedInput::Spend(inp) => &inp.arguments,
                    TypedInput::Creation(inp) => &inp.arguments,
                    TypedInput::Call(inp) => &inp.arguments,
                    TypedInput::Contract(inp) => &inp.arguments,
                    TypedInput::Withdrawal(inp) => &inp.arguments,
                    _ => unreachable!(),
                };
                write_varstr_list(buf, args)
            }
        }
    }

    fn read_from(r: &mut &[u8]) -> Result<Self, EncodingError> {
        let asset_version = read_varint63(r)?;
        let mut committed_asset_id: Option<Hash> = None;

        let typed = read_extensible_string(r, |inner| {
            if asset_version != ASSET_VERSION {
                return Err(EncodingError::BadDiscriminator(0xff));
            }
            let (&ic_type, rest) = inner.split_first().ok_or(EncodingError::UnexpectedEof)?;
            *inner = rest;
            match ic_type {
                ISSUANCE_INPUT_TYPE => {
                    let nonce = read_varstr31(inner)?;
                    committed_asset_id = Some(read_hash(inner)?);
                    let amount = read_varint63(inner)?;
                    Ok(TypedInput::Issuance(IssuanceInput {
                        nonce,
                        amount,
                        // witness fields land in the second pass; the
                        // committed asset id is cross-checked there
                        asset_definition: Vec::new(),
                        vm_version: 0,
                        issuance_program: Vec::new(),
                        arguments: Vec::new(),
                    }))
                }
                SPEND_INPUT_TYPE => {
                    let commitment = read_extensible_string(inner, |sc| {
                        let asset_id = read_hash(sc)?;
                        let amount = read_varint63(sc)?;
                        Ok(SpendCommitment {
                            asset_amount: AssetAmount::new(asset_id, amount),
                            source_id: read_hash(sc)?,
                            source_position: read_varint63(sc)?,
                            vm_version: read_varint63(sc)?,
                            control_program: read_varstr31(sc)?,
                        })
                    })?;
                    Ok(TypedInput::Spend(SpendInput {
                        commitment,
                        arguments: Vec::new(),
                    }))
                }
                COINBASE_INPUT_TYPE => Ok(TypedInput::Coinbase(CoinbaseInput {
                    arbitrary: read_varstr31(inner)?,
                })),
                CREATION_INPUT_TYPE => Ok(TypedInput::Creation(CreationInput {
                    nonce: read_varint63(inner)?,
                    data: read_varstr31(inner)?,
                    vm_version: read_varint63(inner)?,
                    control_program: read_varstr31(inner)?,
                    arguments: Vec::new(),
                })),
                CALL_INPUT_TYPE => Ok(TypedInput::Call(CallInput {
                    nonce: read_varint63(inner)?,
                    to: read_varstr31(inner)?,
                    data: read_varstr31(inner)?,
                    vm_version: read_varint63(inner)?,
                    control_program: read_varstr31(inner)?,
                    arguments: Vec::new(),
                })),
                CONTRACT_INPUT_TYPE => Ok(TypedInput::Contract(ContractInput {
                    nonce: read_varint63(inner)?,
                    to: read_varstr31(inner)?,
                    data: read_varstr31(inner)?,
                    vm_version: read_varint63(inner)?,
                    control_program: read_varstr31(inner)?,
                    arguments: Vec::new(),
                })),
                WITHDRAWAL_INPUT_TYPE => {
                    let asset_id = read_hash(inner)?;
                    let amount = read_varint63(inner)?;
                    Ok(TypedInput::Withdrawal(WithdrawalInput {
                        asset_amount: AssetAmount::new(asset_id, amount),
                        withdraw_program: read_varstr31(inner)?,
                        vm_version: read_varint63(inner)?,
                        control_program: read_varstr31(inner)?,
                        arguments: Vec::new(),
                    }))
                }
                other => Err(EncodingError::BadDiscriminator(other)),
            }
        })?;

        let mut input = TxInput {
            asset_version,
            typed,
        };

        read_extensible_string(r, |inner| {
            if input.asset_version != ASSET_VERSION {
                return Ok(());
            }
            match &mut input.typed {
                TypedInput::Issuance(inp) => {
                    inp.asset_definition = read_varstr31(inner)?;
                    inp.vm_version = read_varint63(inner)?;
                    inp.issuance_program = read_varstr31(inner)?;
                    if Some(inp.asset_id()) != committed_asset_id {
                        return Err(EncodingError::BadAssetId);
                    }
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
                TypedInput::Coinbase(_) => Ok(()),
                TypedInput::Spend(inp) => {
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
                TypedInput::Creation(inp) => {
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
                TypedInput::Call(inp) => {
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
                TypedInput::Contract(inp) => {
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
                TypedInput::Withdrawal(inp) => {
                    inp.arguments = read_varstr_list(inner)?;
                    Ok(())
                }
            }
        })?;

        Ok(input)
    }
}

/// Wire output: `(asset_version, commitment, witness)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub asset_version: u64,
    pub asset_amount: AssetAmount,
    pub vm_version: u64,
    pub control_program: Vec<u8>,
}

impl TxOutput {
    pub fn new(asset_id: AssetId, amount: u64, control_program: Vec<u8>) -> Self {
        TxOutput {
            asset_version: ASSET_VERSION,
            asset_amount: AssetAmount::new(asset_id, amount),
            vm_version: 1,
            control_program,
        }
    }

    fn write_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        write_varint63(buf, self.asset_version)?;
        write_extensible_string(buf, |inner| {
            write_hash(inner, &self.asset_amount.asset_id);
            write_varint63(inner, self.asset_amount.amount)?;
            write_varint63(inner, self.vm_version)?;
            write_varstr31(inner, &self.control_program)
        })?;
        // output witness is empty in this format revision
        write_extensible_string(buf, |_| Ok(()))
    }

    fn read_from(r: &mut &[u8]) -> Result<Self, EncodingError> {
        let asset_version = read_varint63(r)?;
        let (asset_amount, vm_version, control_program) = read_extensible_string(r, |inner| {
            let asset_id = read_hash(inner)?;
            let amount = read_varint63(inner)?;
            let vm_version = read_varint63(inner)?;
            let control_program = read_varstr31(inner)?;
            Ok((AssetAmount::new(asset_id, amount), vm_version, control_program))
        })?;
        read_extensible_string(r, |_| Ok(()))?;
        Ok(TxOutput {
            asset_version,
            asset_amount,
            vm_version,
            control_program,
        })
    }
}

/// The wire transaction.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TxData {
    pub version: u64,
    pub serialized_size: u64,
    pub time_range: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub reference_data: Vec<u8>,
}

impl TxData {
    /// Serializes the transaction and stamps `serialized_size`.
    pub fn encode(&mut self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::new();
        write_varint63(&mut buf, self.version)?;
        write_varint63(&mut buf, self.time_range)?;
        write_varstr31(&mut buf, &self.reference_data)?;
        write_varint63(&mut buf, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.write_to(&mut buf)?;
        }
        write_varint63(&mut buf, self.outputs.len() as u64)?;
        for output in &self.outputs {
            output.write_to(&mut buf)?;
        }
        self.serialized_size = buf.len() as u64;
        Ok(buf)
    }

    /// Parses a serialized transaction, recording the consumed size.
    pub fn decode(bytes: &[u8]) -> Result<Self, EncodingError> {
        let mut r: &[u8] = bytes;
        let version = read_varint63(&mut r)?;
        let time_range = read_varint63(&mut r)?;
        let reference_data = read_varstr31(&mut r)?;
        let input_count = read_varint63(&mut r)?;
        let mut inputs = Vec::with_capacity(input_count.min(64) as usize);
        for _ in 0..input_count {
            inputs.push(TxInput::read_from(&mut r)?);
        }
        let output_count = read_varint63(&mut r)?;
        let mut outputs = Vec::with_capacity(output_count.min(64) as usize);
        for _ in 0..output_count {
            outputs.push(TxOutput::read_from(&mut r)?);
        }
        Ok(TxData {
            version,
            serialized_size: (bytes.len() - r.len()) as u64,
            time_range,
            inputs,
            outputs,
            reference_data,
        })
    }
}

/// A transaction in both its wire and entries forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub data: TxData,
    pub entries: TxEntries,
}

impl Tx {
    /// Builds the entries graph from the wire form. The serialized size
    /// is stamped first so the header commits to it.
    pub fn new(mut data: TxData) -> Result<Self, ValidationError> {
        if data.serialized_size == 0 {
            data.encode()
                .map_err(|e| ValidationError::MissingField(e.to_string().into()))?;
        }
        let entries = map_tx(&data)?;
        Ok(Tx { data, entries })
    }

    pub fn id(&self) -> Hash {
        self.entries.id
    }
}
