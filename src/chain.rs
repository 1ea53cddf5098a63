//! The chain facade: best-tip tracking, block index, store contract,
//! and the transaction entry points the node layer calls
//!
//! The best tip lives behind one mutex with a condition variable;
//! writers hold it only for the short critical section that promotes a
//! new best node, and `block_waiter` parks on the condvar until a
//! height arrives.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, info};

use crate::block::{validate_block, Block, BlockHeader, TransactionStatus};
use crate::config::{genesis_block, Config};
use crate::constants::{BLOCKS_PER_RETARGET, MEDIAN_TIME_BLOCKS, NATIVE_ASSET_ID};
use crate::contract_vm::{ContractVm, NULL_CONTRACT_VM};
use crate::entry::TxEntries;
use crate::error::{ChainError, PoolError, ValidationError};
use crate::gas::GasState;
use crate::pow;
use crate::segwit;
use crate::state::{AccountState, KvStore, MemKv, MemoryAccountState};
use crate::txpool::TxPool;
use crate::types::{address_from_hash, short_hex, Address, Hash};
use crate::utxo::{UtxoEntry, UtxoViewpoint};
use crate::validation::{validate_tx, BlockContext};
use crate::vm::ChainContext;
use crate::wire::Tx;

/// The store's view of where the main chain ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStoreState {
    pub height: u64,
    pub hash: Hash,
}

/// Persistent storage contract for blockchain data. The core treats the
/// implementation as uninterpreted.
pub trait Store: Send + Sync {
    fn block_exists(&self, hash: &Hash) -> bool;
    fn get_block(&self, hash: &Hash) -> Option<Block>;
    fn get_store_status(&self) -> Option<BlockStoreState>;
    fn get_transaction_status(&self, hash: &Hash) -> Result<TransactionStatus, ChainError>;
    fn get_utxo(&self, id: &Hash) -> Option<UtxoEntry>;

    /// Fills the viewpoint with the stored UTXOs the given transactions
    /// spend. Missing entries are simply not added; applying the
    /// transaction surfaces them.
    fn get_transactions_utxo(
        &self,
        view: &mut UtxoViewpoint,
        txs: &[&TxEntries],
    ) -> Result<(), ChainError>;

    /// Main-chain headers in height order.
    fn load_block_index(&self) -> Result<Vec<BlockHeader>, ChainError>;
    fn save_block(&self, block: &Block, status: &TransactionStatus) -> Result<(), ChainError>;
    fn save_chain_status(&self, node: &BlockNode, view: &UtxoViewpoint)
        -> Result<(), ChainError>;

    /// The raw key-value store backing account state.
    fn db(&self) -> &dyn KvStore;
}

/// One block header in the index, linked to its parent.
#[derive(Debug, Clone)]
pub struct BlockNode {
    pub parent: Option<Arc<BlockNode>>,
    pub hash: Hash,
    pub version: u64,
    pub height: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub bits: u64,
    pub seed: Hash,
    pub transactions_merkle_root: Hash,
    pub transaction_status_hash: Hash,
    pub state_root: Hash,
}

impl BlockNode {
    pub fn new(header: &BlockHeader, parent: Option<Arc<BlockNode>>) -> BlockNode {
        let seed = match &parent {
            None => pow::initial_seed(),
            Some(p) => p.calc_next_seed(),
        };
        BlockNode {
            parent,
            hash: header.hash(),
            version: header.version,
            height: header.height,
            timestamp: header.timestamp,
            nonce: header.nonce,
            bits: header.bits,
            seed,
            transactions_merkle_root: header.block_commitment.transactions_merkle_root,
            transaction_status_hash: header.block_commitment.transaction_status_hash,
            state_root: header.block_commitment.state_root,
        }
    }

    /// Rebuilds the header this node was created from.
    pub fn block_header(&self) -> BlockHeader {
        BlockHeader {
            version: self.version,
            height: self.height,
            previous_block_hash: self.parent.as_ref().map(|p| p.hash).unwrap_or([0u8; 32]),
            timestamp: self.timestamp,
            nonce: self.nonce,
            bits: self.bits,
            block_commitment: crate::block::BlockCommitment {
                transactions_merkle_root: self.transactions_merkle_root,
                transaction_status_hash: self.transaction_status_hash,
                state_root: self.state_root,
            },
        }
    }

    pub fn ancestor(&self, height: u64) -> Option<&BlockNode> {
        let mut node = self;
        while node.height > height {
            node = node.parent.as_deref()?;
        }
        (node.height == height).then_some(node)
    }

    /// Compact target of the next block.
    pub fn calc_next_bits(&self) -> u64 {
        let window_start = if (self.height + 1) % BLOCKS_PER_RETARGET == 0 && self.height != 0 {
            self.ancestor(self.height + 1 - BLOCKS_PER_RETARGET)
                .map(|node| node.timestamp)
                .unwrap_or(self.timestamp)
        } else {
            self.timestamp
        };
        pow::calc_next_bits(self.height, self.bits, self.timestamp, window_start)
    }

    /// Proof-of-work seed of the next block.
    pub fn calc_next_seed(&self) -> Hash {
        pow::calc_next_seed(self.height, &self.hash, &self.seed)
    }

    /// Median timestamp of the last [`MEDIAN_TIME_BLOCKS`] blocks.
    pub fn calc_past_median_time(&self) -> u64 {
        let mut timestamps = Vec::with_capacity(MEDIAN_TIME_BLOCKS);
        let mut node = Some(self);
        while let Some(current) = node {
            timestamps.push(current.timestamp);
            if timestamps.len() == MEDIAN_TIME_BLOCKS {
                break;
            }
            node = current.parent.as_deref();
        }
        timestamps.sort_unstable();
        timestamps[timestamps.len() / 2]
    }
}

/// In-memory index over every known block node.
#[derive(Default)]
pub struct BlockIndex {
    index: HashMap<Hash, Arc<BlockNode>>,
    main_chain: Vec<Arc<BlockNode>>,
}

impl BlockIndex {
    pub fn new() -> Self {
        BlockIndex::default()
    }

    pub fn add_node(&mut self, node: Arc<BlockNode>) {
        self.index.insert(node.hash, node);
    }

    pub fn get_node(&self, hash: &Hash) -> Option<Arc<BlockNode>> {
        self.index.get(hash).cloned()
    }

    pub fn best_node(&self) -> Option<Arc<BlockNode>> {
        self.main_chain.last().cloned()
    }

    pub fn in_main_chain(&self, hash: &Hash) -> bool {
        self.index
            .get(hash)
            .map(|node| {
                self.main_chain
                    .get(node.height as usize)
                    .map(|main| main.hash == *hash)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn node_by_height(&self, height: u64) -> Option<Arc<BlockNode>> {
        self.main_chain.get(height as usize).cloned()
    }

    /// Makes `node` the main-chain tip, rebuilding the height vector
    /// along its ancestry.
    pub fn set_main_chain(&mut self, node: &Arc<BlockNode>) {
        let mut chain = Vec::with_capacity(node.height as usize + 1);
        let mut current = Some(Arc::clone(node));
        while let Some(n) = current {
            current = n.parent.clone();
            chain.push(n);
        }
        chain.reverse();
        self.main_chain = chain;
    }
}

/// Outcome of validating a transaction against the current tip.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub height: u64,
    pub gas_state: GasState,
    /// Program failure of a gas-valid transaction; keep but flag
    pub gas_only: Option<ValidationError>,
}

/// Chain provides functions for working with the block chain.
pub struct Chain {
    store: Arc<dyn Store>,
    tx_pool: Arc<TxPool>,
    config: Config,
    index: RwLock<BlockIndex>,
    best: Mutex<Arc<BlockNode>>,
    cond: Condvar,
}

impl Chain {
    /// NewChain opens (or initializes) a chain on the given store.
    pub fn new(store: Arc<dyn Store>, tx_pool: Arc<TxPool>, config: Config) -> Result<Chain, ChainError> {
        if store.get_store_status().is_none() {
            init_chain_status(store.as_ref(), &config)?;
        }

        let headers = store.load_block_index()?;
        if headers.is_empty() {
            return Err(ChainError::Store("empty block index".into()));
        }

        let mut index = BlockIndex::new();
        let mut parent: Option<Arc<BlockNode>> = None;
        for header in &headers {
            let node = Arc::new(BlockNode::new(header, parent.clone()));
            index.add_node(Arc::clone(&node));
            parent = Some(node);
        }
        let best = parent.expect("non-empty header chain");
        index.set_main_chain(&best);

        Ok(Chain {
            store,
            tx_pool,
            config,
            index: RwLock::new(index),
            best: Mutex::new(best),
            cond: Condvar::new(),
        })
    }

    pub fn best_node(&self) -> Arc<BlockNode> {
        Arc::clone(&self.best.lock())
    }

    /// BestBlockHeight returns the current height of the blockchain.
    pub fn best_block_height(&self) -> u64 {
        self.best.lock().height
    }

    pub fn best_block_hash(&self) -> Hash {
        self.best.lock().hash
    }

    pub fn best_block_header(&self) -> BlockHeader {
        self.best.lock().block_header()
    }

    pub fn in_main_chain(&self, hash: &Hash) -> bool {
        self.index.read().in_main_chain(hash)
    }

    pub fn get_header_by_height(&self, height: u64) -> Option<BlockHeader> {
        self.index
            .read()
            .node_by_height(height)
            .map(|node| node.block_header())
    }

    /// CalcNextSeed returns the seed for the block after `prev`.
    pub fn calc_next_seed(&self, prev: &Hash) -> Result<Hash, ChainError> {
        let node = self
            .index
            .read()
            .get_node(prev)
            .ok_or_else(|| ChainError::UnknownBlock(hex::encode(prev).into()))?;
        Ok(node.calc_next_seed())
    }

    /// CalcNextBits returns the difficulty for the block after `prev`.
    pub fn calc_next_bits(&self, prev: &Hash) -> Result<u64, ChainError> {
        let node = self
            .index
            .read()
            .get_node(prev)
            .ok_or_else(|| ChainError::UnknownBlock(hex::encode(prev).into()))?;
        Ok(node.calc_next_bits())
    }

    pub fn get_transaction_status(&self, hash: &Hash) -> Result<TransactionStatus, ChainError> {
        self.store.get_transaction_status(hash)
    }

    /// GetTransactionsUtxo fills the view with the UTXOs the given
    /// transactions spend.
    pub fn get_transactions_utxo(
        &self,
        view: &mut UtxoViewpoint,
        txs: &[&TxEntries],
    ) -> Result<(), ChainError> {
        self.store.get_transactions_utxo(view, txs)
    }

    pub fn get_tx_pool(&self) -> &Arc<TxPool> {
        &self.tx_pool
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Opens a mutable account-state view rooted at the given state root.
    pub fn new_state(&self, state_root: &Hash) -> Result<MemoryAccountState, ChainError> {
        MemoryAccountState::load(self.store.db(), state_root)
            .map_err(|e| ChainError::Store(e.to_string().into()))
    }

    pub fn current_state(&self) -> Result<MemoryAccountState, ChainError> {
        self.new_state(&self.best.lock().state_root)
    }

    pub fn get_account_nonce(&self, address: &[u8]) -> Result<u64, ChainError> {
        let state = self.current_state()?;
        Ok(state.get_nonce(&address_from_hash(address)))
    }

    pub fn get_account_balance(&self, address: &[u8]) -> Result<u64, ChainError> {
        let state = self.current_state()?;
        Ok(state.get_balance(&address_from_hash(address)))
    }

    /// CanTransfer reports whether `address` holds at least `amount`.
    pub fn can_transfer(&self, address: &Address, amount: u64) -> Result<bool, ChainError> {
        let state = self.current_state()?;
        Ok(state.can_transfer(address, amount))
    }

    /// ValidateTx validates the given transaction against the best tip.
    /// A cache holds recent rejections and is consulted first.
    pub fn validate_tx(&self, tx: &Tx) -> Result<VerifyResult, ChainError> {
        let tx_id = tx.id();
        if self.tx_pool.is_in_err_cache(&tx_id) {
            return Err(self
                .tx_pool
                .get_err_cache(&tx_id)
                .unwrap_or(ChainError::Pool(PoolError::Rejected)));
        }
        if self.tx_pool.is_transaction_in_pool(&tx_id) {
            return Err(ChainError::Pool(PoolError::TransactionInPool));
        }

        let best = self.best_node();
        let block_context = BlockContext {
            version: best.version,
            height: best.height,
            first_tx_id: None,
        };

        let mut state_db = self.new_state(&best.state_root)?;
        state_db.prepare(tx_id, [0u8; 32], 0);

        let (gas_state, verdict) = validate_tx(&tx.entries, &block_context, self, &mut state_db);
        if !gas_state.gas_valid {
            let err = ChainError::Validation(
                verdict.err().unwrap_or(ValidationError::OverGasCredit),
            );
            self.tx_pool.add_err_cache(&tx_id, err.clone());
            return Err(err);
        }

        Ok(VerifyResult {
            height: best.height,
            gas_state,
            gas_only: verdict.err(),
        })
    }

    /// ProcessTransaction hands an already-validated transaction to the
    /// pool. Returns true when it was parked as an orphan.
    pub fn process_transaction(
        &self,
        tx: Arc<Tx>,
        status_fail: bool,
        height: u64,
        fee: u64,
    ) -> Result<bool, PoolError> {
        self.tx_pool.process_transaction(tx, status_fail, height, fee)
    }

    /// ProcessBlock connects a block extending the current best chain.
    pub fn process_block(&self, block: Block) -> Result<(), ChainError> {
        let parent = self
            .index
            .read()
            .get_node(&block.header.previous_block_hash)
            .ok_or_else(|| {
                ChainError::UnknownBlock(hex::encode(block.header.previous_block_hash).into())
            })?;
        if parent.hash != self.best.lock().hash {
            return Err(ChainError::MismatchedBlock(
                "block does not extend the best chain".into(),
            ));
        }

        let mut state_db = self.new_state(&parent.state_root)?;
        let mut view = UtxoViewpoint::new();
        let entries: Vec<&TxEntries> = block.transactions.iter().map(|tx| &tx.entries).collect();
        self.store.get_transactions_utxo(&mut view, &entries)?;

        let status = validate_block(&block, &parent, self, &mut state_db, unix_now())?;

        for (i, tx) in block.transactions.iter().enumerate() {
            view.apply_transaction(
                block.header.height,
                &tx.entries,
                status.get_status(i).unwrap_or(false),
            )?;
            self.tx_pool.remove_transaction(&tx.id());
        }

        state_db
            .commit(self.store.db())
            .map_err(|e| ChainError::Store(e.to_string().into()))?;
        self.store.save_block(&block, &status)?;

        let node = Arc::new(BlockNode::new(&block.header, Some(parent)));
        self.set_state(node, &view)
    }

    /// Promotes a new best node. Held briefly; waiters wake on the
    /// condvar broadcast.
    fn set_state(&self, node: Arc<BlockNode>, view: &UtxoViewpoint) -> Result<(), ChainError> {
        self.store.save_chain_status(&node, view)?;

        {
            let mut index = self.index.write();
            index.add_node(Arc::clone(&node));
            index.set_main_chain(&node);
        }
        let mut best = self.best.lock();
        *best = Arc::clone(&node);
        info!(height = node.height, hash = %short_hex(&node.hash), "chain best status has been updated");
        drop(best);
        self.cond.notify_all();
        Ok(())
    }

    /// BlockWaiter parks until the main chain reaches `height`.
    pub fn block_waiter(&self, height: u64) {
        let mut best = self.best.lock();
        while best.height < height {
            self.cond.wait(&mut best);
        }
    }
}

impl ChainContext for Chain {
    fn best_block_info(&self) -> (u64, u64, u64) {
        let best = self.best.lock();
        (best.height, best.timestamp, best.bits)
    }

    fn get_block_hash_by_height(&self, height: u64) -> Hash {
        self.index
            .read()
            .node_by_height(height)
            .map(|node| node.hash)
            .unwrap_or([0u8; 32])
    }

    fn supports_account_balances(&self) -> bool {
        self.config.support_balance_in_state_db
    }

    fn contract_vm(&self) -> &dyn ContractVm {
        match &self.config.contract_vm {
            Some(vm) => vm.as_ref(),
            None => &NULL_CONTRACT_VM,
        }
    }
}

/// Seeds the store with the genesis block. In account mode the genesis
/// balances are derived by walking the genesis outputs whose program is
/// a standard shape and whose asset is native; the resulting
/// intermediate root becomes the genesis state root.
fn init_chain_status(store: &dyn Store, config: &Config) -> Result<(), ChainError> {
    let mut block = genesis_block(config);

    if config.support_balance_in_state_db {
        let mut state = MemoryAccountState::new();
        for tx in &block.transactions {
            for output in &tx.data.outputs {
                if output.asset_amount.asset_id != NATIVE_ASSET_ID {
                    continue;
                }
                if !segwit::is_p2w_script(&output.control_program) {
                    continue;
                }
                let hash = segwit::get_hash_from_standard_prog(&output.control_program)
                    .map_err(|e| ChainError::Store(e.to_string().into()))?;
                state.add_balance(&address_from_hash(&hash), output.asset_amount.amount);
            }
        }
        let root = state
            .commit(store.db())
            .map_err(|e| ChainError::Store(e.to_string().into()))?;
        block.header.block_commitment.state_root = root;
    }

    let mut tx_status = TransactionStatus::new();
    for i in 0..block.transactions.len() {
        tx_status.set_status(i, false);
    }
    store.save_block(&block, &tx_status)?;

    let mut view = UtxoViewpoint::new();
    for tx in &block.transactions {
        view.apply_transaction(0, &tx.entries, false)?;
    }

    let node = BlockNode::new(&block.header, None);
    debug!(hash = %short_hex(&node.hash), "initialized chain from genesis");
    store.save_chain_status(&node, &view)
}

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// In-memory [`Store`] for tests and solo deployments.
pub struct MemStore {
    kv: MemKv,
    inner: RwLock<MemStoreInner>,
}

#[derive(Default)]
struct MemStoreInner {
    blocks: HashMap<Hash, Block>,
    statuses: HashMap<Hash, TransactionStatus>,
    main_chain: Vec<Hash>,
    utxos: HashMap<Hash, UtxoEntry>,
    status: Option<BlockStoreState>,
}

impl MemStore {
    pub fn new() -> Self {
        MemStore {
            kv: MemKv::new(),
            inner: RwLock::new(MemStoreInner::default()),
        }
    }

    /// Seeds a spendable UTXO directly; test scaffolding.
    pub fn insert_utxo(&self, id: Hash, entry: UtxoEntry) {
        self.inner.write().utxos.insert(id, entry);
    }

    /// Drops a UTXO out from under the pool; test scaffolding.
    pub fn remove_utxo(&self, id: &Hash) {
        self.inner.write().utxos.remove(id);
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl Store for MemStore {
    fn block_exists(&self, hash: &Hash) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn get_block(&self, hash: &Hash) -> Option<Block> {
        self.inner.read().blocks.get(hash).cloned()
    }

    fn get_store_status(&self) -> Option<BlockStoreState> {
        self.inner.read().status.clone()
    }

    fn get_transaction_status(&self, hash: &Hash) -> Result<TransactionStatus, ChainError> {
        self.inner
            .read()
            .statuses
            .get(hash)
            .cloned()
            .ok_or_else(|| ChainError::Store("transaction status not found".into()))
    }

    fn get_utxo(&self, id: &Hash) -> Option<UtxoEntry> {
        self.inner
            .read()
            .utxos
            .get(id)
            .filter(|entry| !entry.spent)
            .cloned()
    }

    fn get_transactions_utxo(
        &self,
        view: &mut UtxoViewpoint,
        txs: &[&TxEntries],
    ) -> Result<(), ChainError> {
        let inner = self.inner.read();
        for tx in txs {
            for spent in &tx.spent_output_ids {
                if view.entries.contains_key(spent) {
                    continue;
                }
                if let Some(entry) = inner.utxos.get(spent) {
                    view.entries.insert(*spent, entry.clone());
                }
            }
        }
        Ok(())
    }

    fn load_block_index(&self) -> Result<Vec<BlockHeader>, ChainError> {
        let inner = self.inner.read();
        inner
            .main_chain
            .iter()
            .map(|hash| {
                inner
                    .blocks
                    .get(hash)
                    .map(|b| b.header.clone())
                    .ok_or_else(|| ChainError::Store("main chain references missing block".into()))
            })
            .collect()
    }

    fn save_block(&self, block: &Block, status: &TransactionStatus) -> Result<(), ChainError> {
        let hash = block.hash();
        let mut inner = self.inner.write();
        inner.blocks.insert(hash, block.clone());
        inner.statuses.insert(hash, status.clone());
        Ok(())
    }

    fn save_chain_status(
        &self,
        node: &BlockNode,
        view: &UtxoViewpoint,
    ) -> Result<(), ChainError> {
        let mut inner = self.inner.write();
        for (id, entry) in &view.entries {
            if entry.spent {
                inner.utxos.remove(id);
            } else {
                inner.utxos.insert(*id, entry.clone());
            }
        }
        let height = node.height as usize;
        inner.main_chain.truncate(height);
        inner.main_chain.push(node.hash);
        inner.status = Some(BlockStoreState {
            height: node.height,
            hash: node.hash,
        });
        Ok(())
    }

    fn db(&self) -> &dyn KvStore {
        &self.kv
    }
}
