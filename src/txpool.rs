//! The transaction pool: admitted, orphan and rejected views
//!
//! Admitted transactions carry an admission serial so block assembly
//! can order them deterministically; orphans wait for their inputs to
//! materialize; a bounded error cache short-circuits revalidation of
//! recently rejected transactions.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::chain::Store;
use crate::constants::MAX_TX_FEE;
use crate::error::{ChainError, PoolError};
use crate::types::{short_hex, Hash};
use crate::wire::Tx;

/// Capacity of the rejection cache.
const ERR_CACHE_CAPACITY: usize = 1_000;

/// One admitted (or orphaned) transaction with its pool metadata.
#[derive(Clone)]
pub struct TxDesc {
    pub tx: Arc<Tx>,
    /// Admission serial; strictly increasing, never reused
    pub added: u64,
    pub status_fail: bool,
    pub height: u64,
    pub fee: u64,
}

/// Event emitted when a transaction enters the admitted view.
#[derive(Clone)]
pub enum TxPoolMsg {
    NewTransaction(Arc<Tx>),
}

struct PoolInner {
    serial: u64,
    pool: HashMap<Hash, TxDesc>,
    orphans: HashMap<Hash, TxDesc>,
    /// spent-output id -> admitted tx claiming it
    claimed: HashMap<Hash, Hash>,
    err_cache: LruCache<Hash, ChainError>,
    subscribers: Vec<Sender<TxPoolMsg>>,
}

pub struct TxPool {
    store: Arc<dyn Store>,
    inner: Mutex<PoolInner>,
}

impl TxPool {
    pub fn new(store: Arc<dyn Store>) -> Self {
        TxPool {
            store,
            inner: Mutex::new(PoolInner {
                serial: 0,
                pool: HashMap::new(),
                orphans: HashMap::new(),
                claimed: HashMap::new(),
                err_cache: LruCache::new(
                    NonZeroUsize::new(ERR_CACHE_CAPACITY).expect("nonzero capacity"),
                ),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Attempts to admit a transaction, resolving its inputs against
    /// the UTXO store. Returns true when the transaction was parked as
    /// an orphan instead.
    pub fn process_transaction(
        &self,
        tx: Arc<Tx>,
        status_fail: bool,
        height: u64,
        fee: u64,
    ) -> Result<bool, PoolError> {
        if fee > MAX_TX_FEE {
            return Err(PoolError::ExtTxFee);
        }

        let tx_id = tx.id();
        let mut inner = self.inner.lock();

        if inner.pool.contains_key(&tx_id) {
            return Err(PoolError::TransactionInPool);
        }

        for spent in &tx.entries.spent_output_ids {
            if let Some(claimant) = inner.claimed.get(spent) {
                if *claimant != tx_id {
                    return Err(PoolError::Rejected);
                }
            }
        }

        let resolvable = tx
            .entries
            .spent_output_ids
            .iter()
            .all(|spent| self.store.get_utxo(spent).is_some());

        inner.serial += 1;
        let desc = TxDesc {
            tx: Arc::clone(&tx),
            added: inner.serial,
            status_fail,
            height,
            fee,
        };

        if !resolvable {
            debug!(tx = %short_hex(&tx_id), "transaction parked as orphan");
            inner.orphans.insert(tx_id, desc);
            return Ok(true);
        }

        self.admit(&mut inner, tx_id, desc);
        self.promote_orphans(&mut inner);
        Ok(false)
    }

    fn admit(&self, inner: &mut PoolInner, tx_id: Hash, desc: TxDesc) {
        for spent in &desc.tx.entries.spent_output_ids {
            inner.claimed.insert(*spent, tx_id);
        }
        let tx = Arc::clone(&desc.tx);
        inner.pool.insert(tx_id, desc);
        inner
            .subscribers
            .retain(|sub| sub.send(TxPoolMsg::NewTransaction(Arc::clone(&tx))).is_ok());
        debug!(tx = %short_hex(&tx_id), pool_size = inner.pool.len(), "transaction admitted");
    }

    /// Moves orphans whose inputs have become resolvable into the pool.
    fn promote_orphans(&self, inner: &mut PoolInner) {
        let ready: Vec<Hash> = inner
            .orphans
            .iter()
            .filter(|(id, desc)| {
                desc.tx.entries.spent_output_ids.iter().all(|spent| {
                    self.store.get_utxo(spent).is_some()
                        && inner
                            .claimed
                            .get(spent)
                            .map(|claimant| claimant == *id)
                            .unwrap_or(true)
                })
            })
            .map(|(id, _)| *id)
            .collect();
        for id in ready {
            if let Some(desc) = inner.orphans.remove(&id) {
                self.admit(inner, id, desc);
            }
        }
    }

    /// Snapshot of the admitted view, read-consistent under one lock.
    pub fn get_transactions(&self) -> Vec<TxDesc> {
        self.inner.lock().pool.values().cloned().collect()
    }

    pub fn is_transaction_in_pool(&self, tx_id: &Hash) -> bool {
        self.inner.lock().pool.contains_key(tx_id)
    }

    pub fn orphan_count(&self) -> usize {
        self.inner.lock().orphans.len()
    }

    /// Evicts a transaction; a later re-admission of the same id must
    /// succeed again.
    pub fn remove_transaction(&self, tx_id: &Hash) {
        let mut inner = self.inner.lock();
        if let Some(desc) = inner.pool.remove(tx_id) {
            for spent in &desc.tx.entries.spent_output_ids {
                inner.claimed.remove(spent);
            }
            debug!(tx = %short_hex(tx_id), "transaction removed from pool");
        }
        inner.orphans.remove(tx_id);
    }

    pub fn add_err_cache(&self, tx_id: &Hash, err: ChainError) {
        self.inner.lock().err_cache.put(*tx_id, err);
    }

    pub fn get_err_cache(&self, tx_id: &Hash) -> Option<ChainError> {
        self.inner.lock().err_cache.get(tx_id).cloned()
    }

    pub fn is_in_err_cache(&self, tx_id: &Hash) -> bool {
        self.inner.lock().err_cache.contains(tx_id)
    }

    /// Registers for admission events.
    pub fn subscribe(&self) -> Receiver<TxPoolMsg> {
        let (sender, receiver) = channel();
        self.inner.lock().subscribers.push(sender);
        receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemStore;
    use crate::constants::NATIVE_ASSET_ID;
    use crate::types::AssetAmount;
    use crate::utxo::UtxoEntry;
    use crate::vmutil;
    use crate::wire::{SpendCommitment, SpendInput, TxData, TxInput, TxOutput, TypedInput};

    fn spend_tx(source_byte: u8, amount: u64) -> Arc<Tx> {
        let data = TxData {
            version: 1,
            serialized_size: 0,
            time_range: 0,
            inputs: vec![TxInput {
                asset_version: 1,
                typed: TypedInput::Spend(SpendInput {
                    commitment: SpendCommitment {
                        asset_amount: AssetAmount::new(NATIVE_ASSET_ID, amount),
                        source_id: [source_byte; 32],
                        source_position: 0,
                        vm_version: 1,
                        control_program: vmutil::p2wsh_program(&[0x11; 20]),
                    },
                    arguments: vec![],
                }),
            }],
            outputs: vec![TxOutput::new(
                NATIVE_ASSET_ID,
                amount - 100,
                vmutil::p2wsh_program(&[0x22; 20]),
            )],
            reference_data: vec![],
        };
        Arc::new(Tx::new(data).unwrap())
    }

    fn seed_utxo(store: &MemStore, id: Hash, amount: u64) {
        store.insert_utxo(
            id,
            UtxoEntry {
                source_id: [0u8; 32],
                source_pos: 0,
                asset_id: NATIVE_ASSET_ID,
                amount,
                control_program: vmutil::p2wsh_program(&[0x11; 20]),
                is_coinbase: false,
                block_height: 0,
                spent: false,
            },
        );
    }

    #[test]
    fn test_admit_then_remove_then_readmit() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store.clone());
        let tx = spend_tx(1, 1_000);
        seed_utxo(&store, tx.entries.spent_output_ids[0], 1_000);

        assert!(!pool.process_transaction(tx.clone(), false, 1, 100).unwrap());
        assert!(pool.is_transaction_in_pool(&tx.id()));
        assert_eq!(
            pool.process_transaction(tx.clone(), false, 1, 100),
            Err(PoolError::TransactionInPool)
        );

        pool.remove_transaction(&tx.id());
        assert!(!pool.is_transaction_in_pool(&tx.id()));
        assert!(!pool.process_transaction(tx.clone(), false, 1, 100).unwrap());
    }

    #[test]
    fn test_double_spend_rejected() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store.clone());
        let tx1 = spend_tx(1, 1_000);
        seed_utxo(&store, tx1.entries.spent_output_ids[0], 1_000);

        // conflicting spend of the same prevout with a different output
        let mut data = tx1.data.clone();
        data.outputs[0].asset_amount.amount = 800;
        data.serialized_size = 0;
        let tx2 = Arc::new(Tx::new(data).unwrap());
        assert_eq!(tx1.entries.spent_output_ids, tx2.entries.spent_output_ids);
        assert_ne!(tx1.id(), tx2.id());

        pool.process_transaction(tx1, false, 1, 100).unwrap();
        assert_eq!(
            pool.process_transaction(tx2, false, 1, 100),
            Err(PoolError::Rejected)
        );
    }

    #[test]
    fn test_unresolvable_inputs_park_as_orphan() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store.clone());
        let tx = spend_tx(1, 1_000);

        assert!(pool.process_transaction(tx.clone(), false, 1, 100).unwrap());
        assert!(!pool.is_transaction_in_pool(&tx.id()));
        assert_eq!(pool.orphan_count(), 1);
    }

    #[test]
    fn test_fee_ceiling() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store);
        let tx = spend_tx(1, 1_000);
        assert_eq!(
            pool.process_transaction(tx, false, 1, MAX_TX_FEE + 1),
            Err(PoolError::ExtTxFee)
        );
    }

    #[test]
    fn test_err_cache_round_trip() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store);
        let id = [9u8; 32];
        assert!(!pool.is_in_err_cache(&id));
        pool.add_err_cache(&id, ChainError::Pool(PoolError::Rejected));
        assert!(pool.is_in_err_cache(&id));
        assert_eq!(
            pool.get_err_cache(&id),
            Some(ChainError::Pool(PoolError::Rejected))
        );
    }

    #[test]
    fn test_admission_event_emitted() {
        let store = Arc::new(MemStore::new());
        let pool = TxPool::new(store.clone());
        let receiver = pool.subscribe();
        let tx = spend_tx(1, 1_000);
        seed_utxo(&store, tx.entries.spent_output_ids[0], 1_000);

        pool.process_transaction(tx.clone(), false, 1, 100).unwrap();
        match receiver.try_recv() {
            Ok(TxPoolMsg::NewTransaction(seen)) => assert_eq!(seen.id(), tx.id()),
            other => panic!("expected admission event, got {:?}", other.is_err()),
        }
    }
}
