//! # hybrid-consensus
//!
//! Transaction-validation and block-assembly core of a hybrid UTXO /
//! account-ledger chain with an embedded stack VM.
//!
//! The core answers two questions deterministically: is a candidate
//! transaction acceptable against the current best chain tip, and what
//! block can be assembled from the pending pool. It also owns the
//! per-transaction gas accounting that drives fees and the block gas
//! limit.
//!
//! ## Architecture
//!
//! Layers, leaves first:
//!
//! - [`types`], [`encoding`]: hashes, asset amounts, programs, codecs
//! - [`segwit`]: the program classifier deciding which output shapes
//!   are spendable, depositable and standard
//! - [`vm`]: the bounded-cost stack interpreter with the hybrid
//!   opcodes that bridge into the contract VM and the account ledger
//! - [`entry`], [`wire`], [`map`]: the content-addressed entries graph
//!   and its wire form
//! - [`gas`], [`validation`]: per-transaction gas accounting and the
//!   validation state machine
//! - [`mining`], [`txpool`], [`chain`]: block-template assembly, the
//!   transaction pool, and the chain facade
//!
//! Stores are passed in by handle; the crate holds no ambient global
//! state.
//!
//! ## Usage
//!
//! ```rust
//! use hybrid_consensus::state::MemoryAccountState;
//! use hybrid_consensus::validation::{validate_tx, BlockContext};
//! use hybrid_consensus::vm::NullChainContext;
//! use hybrid_consensus::wire::Tx;
//!
//! let tx = hybrid_consensus::config::genesis_tx();
//! let block = BlockContext {
//!     version: 1,
//!     height: 0,
//!     first_tx_id: Some(tx.id()),
//! };
//! let mut state = MemoryAccountState::new();
//! let (gas, verdict) = validate_tx(&tx.entries, &block, &NullChainContext, &mut state);
//! assert!(verdict.is_ok() && gas.gas_valid);
//! ```

pub mod block;
pub mod chain;
pub mod config;
pub mod constants;
pub mod contract_vm;
pub mod encoding;
pub mod entry;
pub mod error;
pub mod gas;
pub mod map;
pub mod merkle;
pub mod mining;
pub mod opcodes;
pub mod pow;
pub mod segwit;
pub mod state;
pub mod txbuilder;
pub mod txpool;
pub mod types;
pub mod utxo;
pub mod validation;
pub mod vm;
pub mod vmutil;
pub mod wire;

pub use block::{Block, BlockHeader, TransactionStatus};
pub use chain::{Chain, MemStore, Store, VerifyResult};
pub use config::{Config, Network};
pub use error::{ChainError, PoolError, ValidationError, VmError};
pub use gas::GasState;
pub use txpool::TxPool;
pub use validation::{validate_tx, BlockContext};
pub use wire::{Tx, TxData};
