//! Contract-VM hooks
//!
//! The embedded contract VM is an uninterpreted collaborator: the stack
//! VM's hybrid opcodes hand it a sender, a nonce and input bytes, and it
//! reports back return data and the gas it consumed. A deployment
//! without an attached VM degrades to a gas-only transaction.

use crate::error::VmError;
use crate::state::AccountState;
use crate::types::Address;

/// Result of one contract-VM invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractOutcome {
    pub return_data: Vec<u8>,
    pub gas_used: u64,
}

/// Deployment and invocation hooks called by the hybrid opcodes.
pub trait ContractVm: Sync {
    /// Deploys `code` on behalf of `sender`, mutating the account state.
    fn create(
        &self,
        state: &mut dyn AccountState,
        sender: Address,
        nonce: u64,
        code: &[u8],
        value: u64,
        gas_limit: u64,
    ) -> Result<ContractOutcome, VmError>;

    /// Executes the contract at `to` with `input` on behalf of `sender`.
    #[allow(clippy::too_many_arguments)]
    fn call(
        &self,
        state: &mut dyn AccountState,
        sender: Address,
        nonce: u64,
        to: Address,
        input: &[u8],
        value: u64,
        gas_limit: u64,
    ) -> Result<ContractOutcome, VmError>;
}

/// Stub used when no contract VM is attached. Hybrid create/call opcodes
/// fail, which the validator treats as a gas-only program failure.
pub struct NullContractVm;

/// Shared instance for contexts that carry no contract VM.
pub static NULL_CONTRACT_VM: NullContractVm = NullContractVm;

impl ContractVm for NullContractVm {
    fn create(
        &self,
        _state: &mut dyn AccountState,
        _sender: Address,
        _nonce: u64,
        _code: &[u8],
        _value: u64,
        _gas_limit: u64,
    ) -> Result<ContractOutcome, VmError> {
        Err(VmError::NoContractVm)
    }

    fn call(
        &self,
        _state: &mut dyn AccountState,
        _sender: Address,
        _nonce: u64,
        _to: Address,
        _input: &[u8],
        _value: u64,
        _gas_limit: u64,
    ) -> Result<ContractOutcome, VmError> {
        Err(VmError::NoContractVm)
    }
}
