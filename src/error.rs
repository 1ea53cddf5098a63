//! Error types for transaction and block validation

use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while decoding or encoding the wire form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("varint63 out of range")]
    Range,

    #[error("length prefix {0} exceeds limit {1}")]
    LengthLimit(u64, u64),

    #[error("unsupported input type {0}")]
    BadDiscriminator(u8),

    #[error("asset ID does not match other issuance parameters")]
    BadAssetId,
}

/// Errors raised by the stack VM.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("data stack underflow")]
    DataStackUnderflow,

    #[error("alt stack underflow")]
    AltStackUnderflow,

    #[error("bad value: {0}")]
    BadValue(Cow<'static, str>),

    #[error("operation not valid in this context")]
    Context,

    #[error("disallowed opcode 0x{0:02x}")]
    DisallowedOpcode(u8),

    #[error("division by zero")]
    DivZero,

    #[error("false VM result")]
    FalseResult,

    #[error("program size exceeds limit")]
    LongProgram,

    #[error("value out of range")]
    Range,

    #[error("RETURN executed")]
    Return,

    #[error("run limit exceeded")]
    RunLimitExceeded,

    #[error("unexpected end of program")]
    ShortProgram,

    #[error("bad token in program")]
    Token,

    #[error("unexpected error: {0}")]
    Unexpected(Cow<'static, str>),

    #[error("unsupported VM version {0}")]
    UnsupportedVm(u64),

    #[error("VERIFY failed")]
    VerifyFailed,

    #[error("insufficient balance for transfer")]
    InsufficientBalance,

    #[error("unknown vm type")]
    UnknownVmType,

    #[error("unknown version number")]
    UnknownVersion,

    #[error("no contract VM attached")]
    NoContractVm,
}

/// Errors raised while validating a transaction against the chain tip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid transaction version: block {block}, transaction {tx}")]
    TxVersion { block: u64, tx: u64 },

    #[error("invalid transaction size")]
    WrongTransactionSize,

    #[error("invalid transaction time range")]
    BadTimeRange,

    #[error("not standard transaction")]
    NotStandardTx,

    #[error("wrong coinbase transaction")]
    WrongCoinbaseTransaction,

    #[error("wrong coinbase asset ID")]
    WrongCoinbaseAsset,

    #[error("coinbase arbitrary size is larger than limit")]
    CoinbaseArbitraryOversize,

    #[error("mismatched asset ID: {0}")]
    MismatchedAssetId(Cow<'static, str>),

    #[error("mismatched value source/dest position: {0}")]
    MismatchedPosition(Cow<'static, str>),

    #[error("mismatched reference: {0}")]
    MismatchedReference(Cow<'static, str>),

    #[error("mismatched value: {0}")]
    MismatchedValue(Cow<'static, str>),

    #[error("missing required field: {0}")]
    MissingField(Cow<'static, str>),

    #[error("missing entry: {0}")]
    MissingEntry(Cow<'static, str>),

    #[error("invalid entry type: {0}")]
    BadEntryType(Cow<'static, str>),

    #[error("amount exceeds maximum value 2^63")]
    BadAmount,

    #[error("no source for value: {0}")]
    NoSource(Cow<'static, str>),

    #[error("arithmetic overflow/underflow: {0}")]
    Overflow(Cow<'static, str>),

    #[error("invalid source or destination position: {0}")]
    Position(Cow<'static, str>),

    #[error("unbalanced asset amount between input and output: {0}")]
    Unbalanced(Cow<'static, str>),

    #[error("all gas credit has been spent")]
    OverGasCredit,

    #[error("gas usage calculation got a math error: {0}")]
    GasCalculate(Cow<'static, str>),

    #[error("program failed: {0}")]
    Vm(#[from] VmError),

    #[error("{context}: {source}")]
    Context {
        context: Cow<'static, str>,
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Wraps the error with a short description of what was being checked.
    pub fn ctx(self, context: impl Into<Cow<'static, str>>) -> Self {
        ValidationError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strips context wrappers to reach the originating error.
    pub fn root(&self) -> &ValidationError {
        let mut err = self;
        while let ValidationError::Context { source, .. } = err {
            err = source;
        }
        err
    }
}

/// Errors raised while applying transactions to a UTXO viewpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("utxo not found")]
    MissingUtxo,

    #[error("utxo has already been spent")]
    SpentUtxo,

    #[error("coinbase utxo is not mature")]
    ImmatureCoinbase,
}

/// Errors raised by the transaction pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction rejected: double spend")]
    Rejected,

    #[error("transaction is an orphan")]
    OrphanTx,

    #[error("transaction fee exceeds the ceiling")]
    ExtTxFee,

    #[error("transaction is already in the pool")]
    TransactionInPool,
}

/// Umbrella error for the chain facade and block processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error("block timestamp is not in the valid range")]
    BadTimestamp,

    #[error("block bits is invalid")]
    BadBits,

    #[error("mismatched block: {0}")]
    MismatchedBlock(Cow<'static, str>),

    #[error("mismatched merkle root: {0}")]
    MismatchedMerkleRoot(Cow<'static, str>),

    #[error("misordered block height: parent {parent}, block {block}")]
    MisorderedBlockHeight { parent: u64, block: u64 },

    #[error("block's gas is over the limit")]
    OverBlockLimit,

    #[error("invalid difficulty proof of work")]
    WorkProof,

    #[error("version regression: parent {parent}, block {block}")]
    VersionRegression { parent: u64, block: u64 },

    #[error("store error: {0}")]
    Store(Cow<'static, str>),

    #[error("unknown block referenced: {0}")]
    UnknownBlock(Cow<'static, str>),
}

pub type Result<T, E = ValidationError> = std::result::Result<T, E>;
