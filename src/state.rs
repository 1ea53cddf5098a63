//! Account-side state: the narrow capability the validator mutates and
//! the key-value contract it is persisted through
//!
//! The authoritative account trie is an external collaborator. The core
//! only needs balances, nonces, a snapshot stack, and a deterministic
//! 32-byte commitment; this module supplies the capability trait plus an
//! in-memory journaling implementation persisted through the [`KvStore`]
//! contract.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::encoding;
use crate::error::EncodingError;
use crate::types::{Address, Hash};

/// One log record emitted by a contract execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLog {
    pub address: Vec<u8>,
    pub topics: Vec<Vec<u8>>,
    pub data: Vec<u8>,
}

/// The account record tracked per 20-byte address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u64,
    pub code_hash: Hash,
    pub storage_root: Hash,
}

impl Default for Account {
    fn default() -> Self {
        Account {
            nonce: 0,
            balance: 0,
            code_hash: [0u8; 32],
            storage_root: [0u8; 32],
        }
    }
}

impl Account {
    fn is_empty(&self) -> bool {
        self.nonce == 0
            && self.balance == 0
            && self.code_hash == [0u8; 32]
            && self.storage_root == [0u8; 32]
    }
}

/// The account-state capability handed to the validator and the VM.
///
/// Snapshots form a stack: `snapshot` returns a revision, and
/// `revert_to_snapshot` unwinds every mutation made after it.
/// `finalise` seals the journal so later reverts cannot cross it.
pub trait AccountState {
    fn get_balance(&self, addr: &Address) -> u64;
    fn set_balance(&mut self, addr: &Address, balance: u64);
    fn add_balance(&mut self, addr: &Address, amount: u64);
    fn sub_balance(&mut self, addr: &Address, amount: u64);
    fn get_nonce(&self, addr: &Address) -> u64;
    fn set_nonce(&mut self, addr: &Address, nonce: u64);

    /// True when `addr` can pay `amount` without the gas to move it.
    fn can_transfer(&self, addr: &Address, amount: u64) -> bool {
        self.get_balance(addr) >= amount
    }

    fn snapshot(&mut self) -> usize;
    fn revert_to_snapshot(&mut self, revision: usize);
    fn finalise(&mut self);

    /// Derives the 32-byte commitment to the current account set,
    /// additionally sealing the journal when `commit` is set.
    fn intermediate_root(&mut self, commit: bool) -> Hash;

    /// Marks the transaction whose effects are being recorded.
    fn prepare(&mut self, tx_hash: Hash, block_hash: Hash, index: usize);

    fn add_log(&mut self, log: TxLog);
    fn get_logs(&self, tx_hash: &Hash) -> Vec<TxLog>;
}

/// Storage contract for state persistence.
pub trait KvStore {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    fn put(&self, key: &[u8], value: &[u8]);
    fn delete(&self, key: &[u8]);
    fn has(&self, key: &[u8]) -> bool;
    fn batch(&self) -> Box<dyn KvBatch + '_>;
}

/// Write batch over a [`KvStore`]. Tracks `value_size` so callers can
/// enforce write caps.
pub trait KvBatch {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
    fn value_size(&self) -> usize;
    fn reset(&mut self);
    fn write(&mut self);
}

/// In-memory key-value store with interior mutability, usable as a
/// thread-safe store handle in tests and solo deployments.
#[derive(Default)]
pub struct MemKv {
    map: parking_lot::RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemKv {
    pub fn new() -> Self {
        MemKv::default()
    }
}

impl KvStore for MemKv {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.read().get(key).cloned()
    }

    fn put(&self, key: &[u8], value: &[u8]) {
        self.map.write().insert(key.to_vec(), value.to_vec());
    }

    fn delete(&self, key: &[u8]) {
        self.map.write().remove(key);
    }

    fn has(&self, key: &[u8]) -> bool {
        self.map.read().contains_key(key)
    }

    fn batch(&self) -> Box<dyn KvBatch + '_> {
        Box::new(MemBatch {
            store: self,
            writes: Vec::new(),
            value_size: 0,
        })
    }
}

enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

struct MemBatch<'a> {
    store: &'a MemKv,
    writes: Vec<BatchOp>,
    value_size: usize,
}

impl KvBatch for MemBatch<'_> {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.value_size += value.len();
        self.writes.push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.value_size += 1;
        self.writes.push(BatchOp::Delete(key.to_vec()));
    }

    fn value_size(&self) -> usize {
        self.value_size
    }

    fn reset(&mut self) {
        self.writes.clear();
        self.value_size = 0;
    }

    fn write(&mut self) {
        let mut map = self.store.map.write();
        for op in self.writes.drain(..) {
            match op {
                BatchOp::Put(k, v) => {
                    map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        self.value_size = 0;
    }
}

/// Journal record: the account value before a mutation.
struct JournalEntry {
    addr: Address,
    prev: Option<Account>,
}

/// Journaling in-memory account state rooted at a stored commitment.
pub struct MemoryAccountState {
    accounts: BTreeMap<Address, Account>,
    journal: Vec<JournalEntry>,
    logs: Vec<(Hash, TxLog)>,
    current_tx: Hash,
}

const STATE_KEY_PREFIX: &[u8] = b"acct-state:";

fn state_key(root: &Hash) -> Vec<u8> {
    let mut key = STATE_KEY_PREFIX.to_vec();
    key.extend_from_slice(root);
    key
}

impl MemoryAccountState {
    pub fn new() -> Self {
        MemoryAccountState {
            accounts: BTreeMap::new(),
            journal: Vec::new(),
            logs: Vec::new(),
            current_tx: [0u8; 32],
        }
    }

    /// Materializes the account set committed under `root`. The zero
    /// root is the empty state.
    pub fn load(store: &dyn KvStore, root: &Hash) -> Result<Self, EncodingError> {
        let mut state = MemoryAccountState::new();
        if *root == [0u8; 32] {
            return Ok(state);
        }
        let raw = store.get(&state_key(root)).ok_or(EncodingError::UnexpectedEof)?;
        let mut r: &[u8] = &raw;
        let count = encoding::read_varint63(&mut r)?;
        for _ in 0..count {
            let addr_bytes = encoding::read_varstr31(&mut r)?;
            if addr_bytes.len() != 20 {
                return Err(EncodingError::LengthLimit(addr_bytes.len() as u64, 20));
            }
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&addr_bytes);
            let account = Account {
                nonce: encoding::read_varint63(&mut r)?,
                balance: encoding::read_varint63(&mut r)?,
                code_hash: encoding::read_hash(&mut r)?,
                storage_root: encoding::read_hash(&mut r)?,
            };
            state.accounts.insert(addr, account);
        }
        Ok(state)
    }

    /// Persists the current account set under its root through a write
    /// batch, returning the root. Balances above 2^63 never occur (the
    /// native supply is far below), so varint63 encoding is safe.
    pub fn commit(&mut self, store: &dyn KvStore) -> Result<Hash, EncodingError> {
        let root = self.intermediate_root(true);
        let mut buf = Vec::new();
        let live: Vec<(&Address, &Account)> =
            self.accounts.iter().filter(|(_, a)| !a.is_empty()).collect();
        encoding::write_varint63(&mut buf, live.len() as u64)?;
        for (addr, account) in live {
            encoding::write_varstr31(&mut buf, addr)?;
            encoding::write_varint63(&mut buf, account.nonce)?;
            encoding::write_varint63(&mut buf, account.balance)?;
            encoding::write_hash(&mut buf, &account.code_hash);
            encoding::write_hash(&mut buf, &account.storage_root);
        }
        let mut batch = store.batch();
        batch.put(&state_key(&root), &buf);
        batch.write();
        Ok(root)
    }

    fn record(&mut self, addr: &Address) {
        self.journal.push(JournalEntry {
            addr: *addr,
            prev: self.accounts.get(addr).cloned(),
        });
    }

    fn account_mut(&mut self, addr: &Address) -> &mut Account {
        self.record(addr);
        self.accounts.entry(*addr).or_default()
    }
}

impl Default for MemoryAccountState {
    fn default() -> Self {
        MemoryAccountState::new()
    }
}

impl AccountState for MemoryAccountState {
    fn get_balance(&self, addr: &Address) -> u64 {
        self.accounts.get(addr).map(|a| a.balance).unwrap_or(0)
    }

    fn set_balance(&mut self, addr: &Address, balance: u64) {
        self.account_mut(addr).balance = balance;
    }

    fn add_balance(&mut self, addr: &Address, amount: u64) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_add(amount);
    }

    fn sub_balance(&mut self, addr: &Address, amount: u64) {
        let account = self.account_mut(addr);
        account.balance = account.balance.saturating_sub(amount);
    }

    fn get_nonce(&self, addr: &Address) -> u64 {
        self.accounts.get(addr).map(|a| a.nonce).unwrap_or(0)
    }

    fn set_nonce(&mut self, addr: &Address, nonce: u64) {
        self.account_mut(addr).nonce = nonce;
    }

    fn snapshot(&mut self) -> usize {
        self.journal.len()
    }

    fn revert_to_snapshot(&mut self, revision: usize) {
        while self.journal.len() > revision {
            let entry = self.journal.pop().expect("journal entry present");
            match entry.prev {
                Some(prev) => {
                    self.accounts.insert(entry.addr, prev);
                }
                None => {
                    self.accounts.remove(&entry.addr);
                }
            }
        }
    }

    fn finalise(&mut self) {
        self.journal.clear();
    }

    fn intermediate_root(&mut self, commit: bool) -> Hash {
        let mut hasher = Sha3_256::new();
        hasher.update(b"stateroot:");
        let mut any = false;
        for (addr, account) in &self.accounts {
            if account.is_empty() {
                continue;
            }
            any = true;
            hasher.update(addr);
            hasher.update(account.nonce.to_le_bytes());
            hasher.update(account.balance.to_le_bytes());
            hasher.update(account.code_hash);
            hasher.update(account.storage_root);
        }
        if commit {
            self.journal.clear();
        }
        if !any {
            return [0u8; 32];
        }
        hasher.finalize().into()
    }

    fn prepare(&mut self, tx_hash: Hash, _block_hash: Hash, _index: usize) {
        self.current_tx = tx_hash;
    }

    fn add_log(&mut self, log: TxLog) {
        self.logs.push((self.current_tx, log));
    }

    fn get_logs(&self, tx_hash: &Hash) -> Vec<TxLog> {
        self.logs
            .iter()
            .filter(|(h, _)| h == tx_hash)
            .map(|(_, l)| l.clone())
            .collect()
    }
}
