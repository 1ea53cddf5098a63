//! Transaction template building and signing scaffolding
//!
//! A `TemplateBuilder` accumulates inputs, outputs and signing
//! instructions, then produces a `Template`: the mapped transaction
//! plus the witness components each input still needs. Templates carry
//! a `max_time`; restricting it can only narrow the window.

use crate::chain::unix_now;
use crate::constants::MAX_TX_TTL_SECONDS;
use crate::error::{ChainError, ValidationError};
use crate::wire::{Tx, TxData, TxInput, TxOutput};

/// A key reference inside a signing instruction: the extended public
/// key and the derivation path that leads to the signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyId {
    pub xpub: Vec<u8>,
    pub derivation_path: Vec<Vec<u8>>,
}

/// A witness the signer still has to materialize for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessComponent {
    /// Multisig over the entry sighash; carries the witness script
    Signature(SignatureWitness),
    /// Raw multisig over the entry sighash, no script to reveal
    RawTxSig(RawTxSigWitness),
    /// Literal data pushed as-is
    Data(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureWitness {
    pub quorum: usize,
    pub keys: Vec<KeyId>,
    /// The program whose hash the spent output commits to
    pub program: Vec<u8>,
    pub signatures: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTxSigWitness {
    pub quorum: usize,
    pub keys: Vec<KeyId>,
    pub signatures: Vec<Vec<u8>>,
}

impl WitnessComponent {
    /// Appends this component's final witness arguments.
    pub fn materialize(&self, args: &mut Vec<Vec<u8>>) {
        match self {
            WitnessComponent::Signature(sw) => {
                args.extend(sw.signatures.iter().cloned());
                args.push(sw.program.clone());
            }
            WitnessComponent::RawTxSig(rw) => {
                args.extend(rw.signatures.iter().cloned());
            }
            WitnessComponent::Data(data) => args.push(data.clone()),
        }
    }
}

/// What one input needs before the transaction can be submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningInstruction {
    pub position: u32,
    pub witness_components: Vec<WitnessComponent>,
}

/// A partially signed transaction.
#[derive(Debug, Clone)]
pub struct Template {
    pub transaction: Tx,
    pub signing_instructions: Vec<SigningInstruction>,
    pub local: bool,
    /// Unix seconds after which the template must not be submitted
    pub max_time: u64,
}

impl Template {
    /// Applies every materialized witness component onto the wire
    /// transaction's arguments.
    pub fn apply_witnesses(&mut self) -> Result<(), ValidationError> {
        let mut data = self.transaction.data.clone();
        for instruction in &self.signing_instructions {
            let mut args = Vec::new();
            for component in &instruction.witness_components {
                component.materialize(&mut args);
            }
            let input = data
                .inputs
                .get_mut(instruction.position as usize)
                .ok_or_else(|| {
                    ValidationError::MissingField("signing instruction position".into())
                })?;
            input.set_arguments(args);
        }
        data.serialized_size = 0;
        self.transaction = Tx::new(data)?;
        Ok(())
    }
}

type BuildCallback = Box<dyn FnOnce() -> Result<(), ChainError>>;

/// TemplateBuilder accumulates a transaction under construction.
pub struct TemplateBuilder {
    base: Option<TxData>,
    inputs: Vec<TxInput>,
    signing_instructions: Vec<SigningInstruction>,
    outputs: Vec<TxOutput>,
    min_time: u64,
    max_time: u64,
    time_range: u64,
    reference_data: Vec<u8>,
    rollbacks: Vec<Box<dyn FnOnce()>>,
    callbacks: Vec<BuildCallback>,
}

impl TemplateBuilder {
    /// NewBuilder returns a builder whose template expires at `max_time`
    /// (defaulting to now + the template TTL).
    pub fn new(max_time: Option<u64>) -> Self {
        TemplateBuilder {
            base: None,
            inputs: Vec::new(),
            signing_instructions: Vec::new(),
            outputs: Vec::new(),
            min_time: 0,
            max_time: max_time.unwrap_or_else(|| unix_now() + MAX_TX_TTL_SECONDS),
            time_range: 0,
            rollbacks: Vec::new(),
            callbacks: Vec::new(),
            reference_data: Vec::new(),
        }
    }

    /// Starts from an existing partial transaction.
    pub fn with_base(mut self, base: TxData) -> Self {
        self.base = Some(base);
        self
    }

    pub fn add_input(
        &mut self,
        input: TxInput,
        instruction: SigningInstruction,
    ) -> Result<(), ValidationError> {
        if input.asset_amount().amount > i64::MAX as u64 {
            return Err(ValidationError::BadAmount);
        }
        self.inputs.push(input);
        self.signing_instructions.push(instruction);
        Ok(())
    }

    pub fn add_output(&mut self, output: TxOutput) -> Result<(), ValidationError> {
        if output.asset_amount.amount > i64::MAX as u64 {
            return Err(ValidationError::BadAmount);
        }
        self.outputs.push(output);
        Ok(())
    }

    /// Raises the lower bound of the validity window.
    pub fn restrict_min_time(&mut self, t: u64) {
        if t > self.min_time {
            self.min_time = t;
        }
    }

    /// Lowers the upper bound of the validity window; never widens it.
    pub fn restrict_max_time(&mut self, t: u64) {
        if t < self.max_time {
            self.max_time = t;
        }
    }

    pub fn max_time(&self) -> u64 {
        self.max_time
    }

    pub fn set_time_range(&mut self, time_range: u64) {
        self.time_range = time_range;
    }

    pub fn set_reference_data(&mut self, data: Vec<u8>) -> Result<(), ValidationError> {
        if !self.reference_data.is_empty() && self.reference_data != data {
            return Err(ValidationError::MissingField(
                "conflicting reference data".into(),
            ));
        }
        self.reference_data = data;
        Ok(())
    }

    /// Registers an undo hook for side effects of building actions,
    /// e.g. UTXO reservations. Rollback is best-effort.
    pub fn on_rollback(&mut self, rollback: Box<dyn FnOnce()>) {
        self.rollbacks.push(rollback);
    }

    /// Registers a hook that runs after all actions built successfully.
    pub fn on_build(&mut self, callback: BuildCallback) {
        self.callbacks.push(callback);
    }

    /// Runs every rollback hook.
    pub fn rollback(mut self) {
        for rollback in self.rollbacks.drain(..) {
            rollback();
        }
    }

    /// Assembles the template and the final wire transaction.
    pub fn build(mut self) -> Result<(Template, TxData), ChainError> {
        for callback in self.callbacks.drain(..) {
            callback()?;
        }

        let mut tx = self.base.take().unwrap_or(TxData {
            version: 1,
            ..TxData::default()
        });

        if self.time_range != 0 {
            tx.time_range = self.time_range;
        }
        if !self.reference_data.is_empty() {
            tx.reference_data = self.reference_data;
        }

        tx.outputs.append(&mut self.outputs);

        let mut instructions = Vec::with_capacity(self.signing_instructions.len());
        for (input, mut instruction) in self.inputs.drain(..).zip(self.signing_instructions.drain(..))
        {
            instruction.position = tx.inputs.len() as u32;
            tx.inputs.push(input);
            instructions.push(instruction);
        }

        tx.serialized_size = 0;
        tx.encode()
            .map_err(|e| ChainError::Store(e.to_string().into()))?;

        let template = Template {
            transaction: Tx::new(tx.clone()).map_err(ChainError::Validation)?,
            signing_instructions: instructions,
            local: true,
            max_time: self.max_time,
        };
        Ok((template, tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::NATIVE_ASSET_ID;
    use crate::types::AssetAmount;
    use crate::vmutil;
    use crate::wire::{SpendCommitment, SpendInput, TypedInput, ASSET_VERSION};

    fn spend_input(amount: u64) -> TxInput {
        TxInput {
            asset_version: ASSET_VERSION,
            typed: TypedInput::Spend(SpendInput {
                commitment: SpendCommitment {
                    asset_amount: AssetAmount::new(NATIVE_ASSET_ID, amount),
                    source_id: [1u8; 32],
                    source_position: 0,
                    vm_version: 1,
                    control_program: vmutil::p2wsh_program(&[0x11; 20]),
                },
                arguments: vec![],
            }),
        }
    }

    #[test]
    fn test_build_assigns_positions() {
        let mut builder = TemplateBuilder::new(Some(10_000));
        builder
            .add_input(spend_input(500), SigningInstruction::default())
            .unwrap();
        builder
            .add_input(spend_input(700), SigningInstruction::default())
            .unwrap();
        builder
            .add_output(TxOutput::new(
                NATIVE_ASSET_ID,
                1_100,
                vmutil::p2wsh_program(&[0x22; 20]),
            ))
            .unwrap();

        let (template, tx) = builder.build().unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(template.signing_instructions[0].position, 0);
        assert_eq!(template.signing_instructions[1].position, 1);
        assert!(tx.serialized_size > 0);
        assert_eq!(template.max_time, 10_000);
    }

    #[test]
    fn test_restrict_max_time_never_widens() {
        let mut builder = TemplateBuilder::new(Some(1_000));
        builder.restrict_max_time(2_000);
        assert_eq!(builder.max_time(), 1_000);
        builder.restrict_max_time(500);
        assert_eq!(builder.max_time(), 500);
    }

    #[test]
    fn test_oversized_amount_rejected() {
        let mut builder = TemplateBuilder::new(None);
        let err = builder.add_output(TxOutput::new(
            NATIVE_ASSET_ID,
            u64::MAX,
            vmutil::p2wsh_program(&[0x22; 20]),
        ));
        assert_eq!(err, Err(ValidationError::BadAmount));
    }

    #[test]
    fn test_apply_witnesses_sets_arguments() {
        let mut builder = TemplateBuilder::new(None);
        builder
            .add_input(
                spend_input(500),
                SigningInstruction {
                    position: 0,
                    witness_components: vec![
                        WitnessComponent::Data(vec![0xaa]),
                        WitnessComponent::Data(vec![0xbb]),
                    ],
                },
            )
            .unwrap();
        let (mut template, _) = builder.build().unwrap();
        template.apply_witnesses().unwrap();
        assert_eq!(
            template.transaction.data.inputs[0].arguments(),
            &[vec![0xaa], vec![0xbb]]
        );
    }

    #[test]
    fn test_rollback_hooks_run() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let fired = Arc::new(AtomicBool::new(false));
        let mut builder = TemplateBuilder::new(None);
        let flag = Arc::clone(&fired);
        builder.on_rollback(Box::new(move || flag.store(true, Ordering::SeqCst)));
        builder.rollback();
        assert!(fired.load(Ordering::SeqCst));
    }
}
