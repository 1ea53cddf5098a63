//! Opcode constants for the stack VM
//!
//! All opcodes are single bytes. Pushes of 1–75 bytes are encoded
//! directly as the length; longer pushes use the PUSHDATA forms.

// ============================================================================
// PUSH OPCODES (0x00 - 0x60)
// ============================================================================

/// OP_FALSE / OP_0 - Push the empty string
pub const OP_FALSE: u8 = 0x00;
pub const OP_0: u8 = 0x00;

/// OP_DATA_1 through OP_DATA_75 - Push the next 1..=75 bytes as data
pub const OP_DATA_1: u8 = 0x01;
pub const OP_DATA_20: u8 = 0x14;
pub const OP_DATA_32: u8 = 0x20;
pub const OP_DATA_75: u8 = 0x4b;

/// OP_PUSHDATA1 - Push, next byte holds the data length
pub const OP_PUSHDATA1: u8 = 0x4c;

/// OP_PUSHDATA2 - Push, next 2 bytes (little-endian) hold the data length
pub const OP_PUSHDATA2: u8 = 0x4d;

/// OP_PUSHDATA4 - Push, next 4 bytes (little-endian) hold the data length
pub const OP_PUSHDATA4: u8 = 0x4e;

/// OP_1NEGATE - Push -1
pub const OP_1NEGATE: u8 = 0x4f;

/// OP_TRUE / OP_1 - Push 1
pub const OP_TRUE: u8 = 0x51;
pub const OP_1: u8 = 0x51;

/// OP_2 through OP_16 - Push the small integer 2..=16
pub const OP_2: u8 = 0x52;
pub const OP_16: u8 = 0x60;

// ============================================================================
// CONTROL FLOW (0x61 - 0x6a)
// ============================================================================

/// OP_NOP - No operation
pub const OP_NOP: u8 = 0x61;

/// OP_VERIFY - Fail the program unless the top stack value is true
pub const OP_VERIFY: u8 = 0x69;

/// OP_FAIL - Fail the program unconditionally; leads every
/// unspendable/retirement program
pub const OP_FAIL: u8 = 0x6a;

// ============================================================================
// STACK OPERATIONS (0x6b - 0x7d)
// ============================================================================

/// OP_TOALTSTACK - Move the top item to the alt stack
pub const OP_TOALTSTACK: u8 = 0x6b;

/// OP_FROMALTSTACK - Move the top alt-stack item back to the data stack
pub const OP_FROMALTSTACK: u8 = 0x6c;

/// OP_DEPTH - Push the number of data-stack items
pub const OP_DEPTH: u8 = 0x74;

/// OP_DROP - Remove the top stack item
pub const OP_DROP: u8 = 0x75;

/// OP_DUP - Duplicate the top stack item
pub const OP_DUP: u8 = 0x76;

/// OP_OVER - Copy the second-to-top stack item to the top
pub const OP_OVER: u8 = 0x78;

/// OP_SWAP - Swap the top two stack items
pub const OP_SWAP: u8 = 0x7c;

// ============================================================================
// COMPARISON (0x87 - 0x88)
// ============================================================================

/// OP_EQUAL - Push 1 if the top two items are byte-equal, 0 otherwise
pub const OP_EQUAL: u8 = 0x87;

/// OP_EQUALVERIFY - OP_EQUAL followed by OP_VERIFY
pub const OP_EQUALVERIFY: u8 = 0x88;

// ============================================================================
// NUMERIC (0x91 - 0xa3)
// ============================================================================

/// OP_NOT - 0 and 1 are flipped, anything else becomes 0
pub const OP_NOT: u8 = 0x91;

/// OP_ADD - Pop a and b, push a + b
pub const OP_ADD: u8 = 0x93;

/// OP_SUB - Pop a and b, push a - b
pub const OP_SUB: u8 = 0x94;

/// OP_NUMEQUAL - Push 1 if the top two numbers are equal
pub const OP_NUMEQUAL: u8 = 0x9c;

/// OP_MIN - Push the smaller of the top two numbers
pub const OP_MIN: u8 = 0xa3;

// ============================================================================
// CRYPTO (0xa9 - 0xae)
// ============================================================================

/// OP_HASH160 - RIPEMD-160 of SHA3-256 of the top item
pub const OP_HASH160: u8 = 0xa9;

/// OP_SHA3 - SHA3-256 of the top item
pub const OP_SHA3: u8 = 0xaa;

/// OP_CHECKSIG - Verify a signature over a 32-byte message
pub const OP_CHECKSIG: u8 = 0xac;

/// OP_CHECKMULTISIG - Verify a quorum of signatures over a 32-byte message
pub const OP_CHECKMULTISIG: u8 = 0xad;

/// OP_TXSIGHASH - Push the sighash of the current entry
pub const OP_TXSIGHASH: u8 = 0xae;

// ============================================================================
// INTROSPECTION (0xc0 - 0xc1)
// ============================================================================

/// OP_CHECKPREDICATE - Run a nested program against moved stack items
pub const OP_CHECKPREDICATE: u8 = 0xc0;

/// OP_CHECKOUTPUT - Check that a transaction result matches the given
/// (amount, asset, program) triple
pub const OP_CHECKOUTPUT: u8 = 0xc1;

// ============================================================================
// HYBRID OPCODES (0xd0 - 0xd4) - delegate to the contract VM or the
// account-state store
// ============================================================================

/// OP_CREATE - Deploy a contract
pub const OP_CREATE: u8 = 0xd0;

/// OP_CALL - Invoke a contract (legacy form, callee as program)
pub const OP_CALL: u8 = 0xd1;

/// OP_CONTRACT - Invoke a contract (preferred form, callee as address)
pub const OP_CONTRACT: u8 = 0xd2;

/// OP_DEPOSIT - Credit the entry's value to an account balance
pub const OP_DEPOSIT: u8 = 0xd3;

/// OP_WITHDRAW - Debit the entry's value from an account balance
pub const OP_WITHDRAW: u8 = 0xd4;

// ============================================================================
// VM TYPE TAGS
// ============================================================================

/// VM_EVM - vm type tag of the only supported contract VM. Pushed as the
/// integer 0, so it shares its byte with OP_0.
pub const VM_EVM: u8 = OP_0;
