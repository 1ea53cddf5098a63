//! UTXO entries and the mutable viewpoint the assembler and block
//! connector apply transactions through

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::{COINBASE_PENDING_BLOCK_NUMBER, NATIVE_ASSET_ID};
use crate::entry::{Entry, TxEntries};
use crate::error::ViewError;
use crate::types::{AssetId, Hash};

/// One unspent output as tracked by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub source_id: Hash,
    pub source_pos: u64,
    pub asset_id: AssetId,
    pub amount: u64,
    pub control_program: Vec<u8>,
    pub is_coinbase: bool,
    pub block_height: u64,
    pub spent: bool,
}

/// A set of UTXO entries being mutated by candidate transactions.
#[derive(Debug, Clone, Default)]
pub struct UtxoViewpoint {
    pub entries: HashMap<Hash, UtxoEntry>,
}

impl UtxoViewpoint {
    pub fn new() -> Self {
        UtxoViewpoint::default()
    }

    /// Spends the transaction's inputs and records its outputs. For a
    /// gas-only transaction (`status_fail`), only native-asset flows
    /// apply; the rest of the transaction is treated as void.
    pub fn apply_transaction(
        &mut self,
        block_height: u64,
        tx: &TxEntries,
        status_fail: bool,
    ) -> Result<(), ViewError> {
        let is_coinbase = tx
            .entries
            .values()
            .any(|e| matches!(e, Entry::Coinbase(_)));

        for spent_output_id in &tx.spent_output_ids {
            let asset_id = tx
                .output(spent_output_id)
                .map(|o| o.source.value.asset_id)
                .map_err(|_| ViewError::MissingUtxo)?;
            if status_fail && asset_id != NATIVE_ASSET_ID {
                continue;
            }

            let utxo = self
                .entries
                .get_mut(spent_output_id)
                .ok_or(ViewError::MissingUtxo)?;
            if utxo.is_coinbase
                && block_height < utxo.block_height + COINBASE_PENDING_BLOCK_NUMBER
            {
                return Err(ViewError::ImmatureCoinbase);
            }
            if utxo.spent {
                return Err(ViewError::SpentUtxo);
            }
            utxo.spent = true;
        }

        for result_id in &tx.header.result_ids {
            let Ok(Entry::Output(output)) = tx.get(result_id) else {
                continue;
            };
            if status_fail && output.source.value.asset_id != NATIVE_ASSET_ID {
                continue;
            }
            self.entries.insert(
                *result_id,
                UtxoEntry {
                    source_id: output.source.ref_id,
                    source_pos: output.source.position,
                    asset_id: output.source.value.asset_id,
                    amount: output.source.value.amount,
                    control_program: output.control_program.code.clone(),
                    is_coinbase,
                    block_height,
                    spent: false,
                },
            );
        }
        Ok(())
    }

    /// Applies every transaction of a block in order.
    pub fn apply_block(
        &mut self,
        block_height: u64,
        txs: &[&TxEntries],
        statuses: &[bool],
    ) -> Result<(), ViewError> {
        for (i, tx) in txs.iter().enumerate() {
            let status_fail = statuses.get(i).copied().unwrap_or(false);
            self.apply_transaction(block_height, tx, status_fail)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssetAmount;
    use crate::vmutil;
    use crate::wire::{SpendCommitment, SpendInput, Tx, TxData, TxInput, TxOutput, TypedInput};

    fn utxo(id_byte: u8, amount: u64, is_coinbase: bool, height: u64) -> (Hash, UtxoEntry) {
        (
            [id_byte; 32],
            UtxoEntry {
                source_id: [0u8; 32],
                source_pos: 0,
                asset_id: NATIVE_ASSET_ID,
                amount,
                control_program: vmutil::p2wsh_program(&[0x11; 20]),
                is_coinbase,
                block_height: height,
                spent: false,
            },
        )
    }

    fn spend_tx(amount: u64) -> Tx {
        let data = TxData {
            version: 1,
            serialized_size: 0,
            time_range: 0,
            inputs: vec![TxInput {
                asset_version: 1,
                typed: TypedInput::Spend(SpendInput {
                    commitment: SpendCommitment {
                        asset_amount: AssetAmount::new(NATIVE_ASSET_ID, amount),
                        source_id: [9u8; 32],
                        source_position: 0,
                        vm_version: 1,
                        control_program: vmutil::p2wsh_program(&[0x11; 20]),
                    },
                    arguments: vec![],
                }),
            }],
            outputs: vec![TxOutput::new(
                NATIVE_ASSET_ID,
                amount,
                vmutil::p2wsh_program(&[0x22; 20]),
            )],
            reference_data: vec![],
        };
        Tx::new(data).unwrap()
    }

    #[test]
    fn test_apply_spends_and_creates() {
        let tx = spend_tx(1_000);
        let prevout_id = tx.entries.spent_output_ids[0];
        let mut view = UtxoViewpoint::new();
        view.entries.insert(
            prevout_id,
            UtxoEntry {
                source_id: [9u8; 32],
                source_pos: 0,
                asset_id: NATIVE_ASSET_ID,
                amount: 1_000,
                control_program: vmutil::p2wsh_program(&[0x11; 20]),
                is_coinbase: false,
                block_height: 1,
                spent: false,
            },
        );

        view.apply_transaction(5, &tx.entries, false).unwrap();
        assert!(view.entries[&prevout_id].spent);
        let created = &view.entries[&tx.entries.header.result_ids[0]];
        assert_eq!(created.amount, 1_000);
        assert!(!created.spent);

        // double spend of the same prevout fails
        assert_eq!(
            view.apply_transaction(5, &tx.entries, false),
            Err(ViewError::SpentUtxo)
        );
    }

    #[test]
    fn test_utxo_entry_serde_round_trip() {
        let (_, entry) = utxo(3, 1_234, true, 42);
        let json = serde_json::to_string(&entry).unwrap();
        let back: UtxoEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_missing_utxo_rejected() {
        let tx = spend_tx(1_000);
        let mut view = UtxoViewpoint::new();
        assert_eq!(
            view.apply_transaction(5, &tx.entries, false),
            Err(ViewError::MissingUtxo)
        );
    }

    #[test]
    fn test_coinbase_maturity_window() {
        let tx = spend_tx(1_000);
        let prevout_id = tx.entries.spent_output_ids[0];
        let (_, mut entry) = utxo(0, 1_000, true, 100);
        entry.control_program = vmutil::p2wsh_program(&[0x11; 20]);

        // one block short of maturity
        let mut view = UtxoViewpoint::new();
        view.entries.insert(prevout_id, entry.clone());
        assert_eq!(
            view.apply_transaction(100 + COINBASE_PENDING_BLOCK_NUMBER - 1, &tx.entries, false),
            Err(ViewError::ImmatureCoinbase)
        );

        // exactly mature
        let mut view = UtxoViewpoint::new();
        view.entries.insert(prevout_id, entry);
        view.apply_transaction(100 + COINBASE_PENDING_BLOCK_NUMBER, &tx.entries, false)
            .unwrap();
    }
}
