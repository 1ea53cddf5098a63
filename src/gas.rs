//! Per-transaction gas accounting
//!
//! A transaction buys gas with its native-asset surplus at the mux.
//! Until `set_gas_valid` flips, the state machine runs on credit: it may
//! consume up to `DEFAULT_GAS_CREDIT` of work before the transaction
//! has proven it can pay, so malformed witnesses are rejected cheaply.

use tracing::debug;

use crate::constants::{DEFAULT_GAS_CREDIT, MAX_GAS_AMOUNT, STORAGE_GAS_RATE, VM_GAS_RATE};
use crate::error::ValidationError;

/// GasState records the gas usage status of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GasState {
    /// Native-asset units paid as gas
    pub asset_value: u64,
    pub gas_left: i64,
    pub gas_used: i64,
    pub gas_valid: bool,
    pub storage_gas: i64,
}

impl GasState {
    /// Prices the native surplus into a gas budget and computes the
    /// storage gas owed for the serialized size.
    pub fn set_gas(&mut self, asset_value: i64, tx_size: i64) -> Result<(), ValidationError> {
        if asset_value < 0 {
            return Err(ValidationError::GasCalculate("input value is negative".into()));
        }

        self.asset_value = asset_value as u64;

        self.gas_left = asset_value
            .checked_div(VM_GAS_RATE)
            .ok_or_else(|| ValidationError::GasCalculate("setGas calc gas amount".into()))?;

        if self.gas_left > MAX_GAS_AMOUNT {
            self.gas_left = MAX_GAS_AMOUNT;
        }

        self.storage_gas = tx_size
            .checked_mul(STORAGE_GAS_RATE)
            .ok_or_else(|| ValidationError::GasCalculate("setGas calc tx storage gas".into()))?;
        Ok(())
    }

    /// Charges the storage gas and marks the budget as proven. Requires
    /// the budget to cover the storage gas.
    pub fn set_gas_valid(&mut self) -> Result<(), ValidationError> {
        self.gas_left = self
            .gas_left
            .checked_sub(self.storage_gas)
            .filter(|left| *left >= 0)
            .ok_or_else(|| ValidationError::GasCalculate("setGasValid calc gasLeft".into()))?;

        self.gas_used = self
            .gas_used
            .checked_add(self.storage_gas)
            .ok_or_else(|| ValidationError::GasCalculate("setGasValid calc gasUsed".into()))?;

        self.gas_valid = true;
        Ok(())
    }

    /// Records a program run that left `gas_left` gas, enforcing the
    /// credit ceiling while the budget is unproven.
    pub fn update_usage(&mut self, gas_left: i64) -> Result<(), ValidationError> {
        if gas_left < 0 {
            return Err(ValidationError::GasCalculate("updateUsage input negative gas".into()));
        }

        let used = self
            .gas_left
            .checked_sub(gas_left)
            .ok_or_else(|| ValidationError::GasCalculate("updateUsage calc gas diff".into()))?;
        self.gas_used += used;
        self.gas_left = gas_left;
        debug!(gas_used = self.gas_used, gas_left = self.gas_left, "gas usage updated");

        if !self.gas_valid && (self.gas_used > DEFAULT_GAS_CREDIT || self.storage_gas > self.gas_left)
        {
            return Err(ValidationError::OverGasCredit);
        }
        Ok(())
    }
}
