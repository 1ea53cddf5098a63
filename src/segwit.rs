//! Program classifier: which script shapes are spendable, depositable
//! and standard
//!
//! Classification is total on the byte string. A program that parses
//! into none of the recognized shapes simply classifies as nothing and
//! is rejected by the standardness check if it guards a gas-paying edge.

use crate::constants::P2WSH_DATA_SIZE;
use crate::error::VmError;
use crate::opcodes::*;
use crate::vm::parse_program;
use crate::vmutil;

/// IsP2WScript reports whether the program belongs to one of the
/// pay-to-witness families accepted on gas-paying edges.
pub fn is_p2w_script(prog: &[u8]) -> bool {
    is_p2wsh_script(prog) || is_straightforward(prog) || is_p2contract_program(prog)
}

/// A single OP_TRUE or OP_FAIL.
pub fn is_straightforward(prog: &[u8]) -> bool {
    let Ok(insts) = parse_program(prog) else {
        return false;
    };
    if insts.len() != 1 {
        return false;
    }
    insts[0].op == OP_TRUE || insts[0].op == OP_FAIL
}

/// Version push followed by a 20-byte script-hash push.
pub fn is_p2wsh_script(prog: &[u8]) -> bool {
    let Ok(insts) = parse_program(prog) else {
        return false;
    };
    if insts.len() != 2 {
        return false;
    }
    if insts[0].op > OP_16 {
        return false;
    }
    insts[1].op == OP_DATA_20 && insts[1].data.len() == P2WSH_DATA_SIZE
}

/// Version push, contract-VM tag, 20-byte contract address.
pub fn is_p2contract_program(prog: &[u8]) -> bool {
    let Ok(insts) = parse_program(prog) else {
        return false;
    };
    if insts.len() != 3 {
        return false;
    }

    let version = &insts[0];
    let vm_type = &insts[1];

    if version.op > OP_16 {
        return false;
    }
    if vm_type.op != VM_EVM {
        return false;
    }

    insts[2].op == OP_DATA_20 && insts[2].data.len() == 20
}

/// Version push, vm tag, 20-byte address, trailing OP_DEPOSIT.
pub fn is_op_deposit(prog: &[u8]) -> bool {
    is_vaab_program(prog, OP_DEPOSIT)
}

/// Version push, vm tag, 20-byte address, trailing OP_WITHDRAW.
pub fn is_op_withdraw(prog: &[u8]) -> bool {
    is_vaab_program(prog, OP_WITHDRAW)
}

fn is_vaab_program(prog: &[u8], trailing: u8) -> bool {
    let Ok(insts) = parse_program(prog) else {
        return false;
    };
    if insts.len() != 4 {
        return false;
    }

    let version = &insts[0];
    let vm_type = &insts[1];
    let address = &insts[2];

    if version.op > OP_16 {
        return false;
    }
    if vm_type.op > OP_16 {
        return false;
    }
    if address.op != OP_DATA_20 || address.data.len() != 20 {
        return false;
    }

    insts[3].op == trailing
}

/// A creation input whose code carries a trailing OP_CREATE.
pub fn is_op_create(prog: &[u8]) -> bool {
    is_contract_input(prog, OP_CREATE)
}

/// A call input whose code carries a trailing OP_CALL.
pub fn is_op_call(prog: &[u8]) -> bool {
    is_contract_input(prog, OP_CALL)
}

/// A contract input whose code carries a trailing OP_CONTRACT.
pub fn is_op_contract(prog: &[u8]) -> bool {
    is_contract_input(prog, OP_CONTRACT)
}

fn is_contract_input(prog: &[u8], trailing: u8) -> bool {
    let Ok(insts) = parse_program(prog) else {
        return false;
    };
    if insts.len() != 3 {
        return false;
    }

    let version = &insts[0];
    let input = &insts[1];

    if version.op > OP_16 {
        return false;
    }
    if input.op < OP_DATA_1 || input.op > OP_PUSHDATA4 {
        return false;
    }

    insts[2].op == trailing
}

/// The address bytes carried by an op-deposit or op-withdraw program.
pub fn address_from_vaab_prog(prog: &[u8]) -> Result<Vec<u8>, VmError> {
    let insts = parse_program(prog)?;
    if insts.len() != 4 {
        return Err(VmError::ShortProgram);
    }
    Ok(insts[2].data.clone())
}

/// GetHashFromStandardProg extracts the address hash of a standard
/// program: the data of its final push.
pub fn get_hash_from_standard_prog(prog: &[u8]) -> Result<Vec<u8>, VmError> {
    let insts = parse_program(prog)?;
    let last = insts.last().ok_or(VmError::ShortProgram)?;
    Ok(last.data.clone())
}

/// ConvertP2SHProgram expands a P2WSH program into its executable P2SH
/// form.
pub fn convert_p2sh_program(prog: &[u8]) -> Result<Vec<u8>, VmError> {
    let insts = parse_program(prog)?;
    if insts.len() != 2 {
        return Err(VmError::ShortProgram);
    }
    if insts[0].op != OP_0 {
        return Err(VmError::BadValue("unknown P2WSH version number".into()));
    }
    Ok(vmutil::p2sh_program(&insts[1].data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: [u8; 20] = [0x42; 20];

    #[test]
    fn test_p2wsh_classification() {
        let prog = vmutil::p2wsh_program(&ADDR);
        assert!(is_p2wsh_script(&prog));
        assert!(is_p2w_script(&prog));
        assert!(!is_p2contract_program(&prog));
        assert!(!is_op_deposit(&prog));
    }

    #[test]
    fn test_p2wsh_requires_20_byte_hash() {
        let prog = vmutil::p2wsh_program(&[0x42; 19]);
        assert!(!is_p2wsh_script(&prog));
        let prog = vmutil::p2wsh_program(&[0x42; 32]);
        assert!(!is_p2wsh_script(&prog));
    }

    #[test]
    fn test_straightforward_classification() {
        assert!(is_straightforward(&[OP_TRUE]));
        assert!(is_straightforward(&[OP_FAIL]));
        assert!(!is_straightforward(&[OP_TRUE, OP_TRUE]));
        assert!(!is_straightforward(&[]));
    }

    #[test]
    fn test_p2contract_classification() {
        let prog = vmutil::p2contract_program(0, &ADDR);
        assert!(is_p2contract_program(&prog));
        assert!(is_p2w_script(&prog));
    }

    #[test]
    fn test_deposit_withdraw_classification() {
        let deposit = vmutil::deposit_program(0, &ADDR);
        let withdraw = vmutil::withdraw_program(0, &ADDR);
        assert!(is_op_deposit(&deposit));
        assert!(!is_op_withdraw(&deposit));
        assert!(is_op_withdraw(&withdraw));
        assert!(!is_op_deposit(&withdraw));
        assert_eq!(address_from_vaab_prog(&deposit).unwrap(), ADDR.to_vec());
    }

    #[test]
    fn test_contract_input_classification() {
        assert!(is_op_create(&vmutil::create_contract_program(b"code")));
        assert!(is_op_call(&vmutil::call_contract_program(b"input")));
        assert!(is_op_contract(&vmutil::contract_program(b"input")));
        assert!(!is_op_call(&vmutil::create_contract_program(b"code")));
    }

    #[test]
    fn test_hash_extraction() {
        let prog = vmutil::p2wsh_program(&ADDR);
        assert_eq!(get_hash_from_standard_prog(&prog).unwrap(), ADDR.to_vec());
    }

    #[test]
    fn test_malformed_programs_classify_as_none() {
        // truncated push
        let prog = vec![0x05, 0x01, 0x02];
        assert!(!is_p2w_script(&prog));
        assert!(!is_op_deposit(&prog));
        assert!(!is_straightforward(&prog));
    }
}
