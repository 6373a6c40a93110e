//! NeoVM script construction
//!
//! Provides the opcode subset needed to build invocation scripts,
//! verification contracts (single and multi-signature) and dynamic
//! contract calls.

use thiserror::Error;

use super::params::ContractParameter;
use super::types::ScriptHash;
use crate::crypto::hash::sha256;
use crate::crypto::keys::PublicKey;

// =============================================================================
// Opcodes
// =============================================================================

/// NeoVM opcodes used by this crate
pub mod opcode {
    pub const PUSHINT8: u8 = 0x00;
    pub const PUSHINT16: u8 = 0x01;
    pub const PUSHINT32: u8 = 0x02;
    pub const PUSHINT64: u8 = 0x03;
    pub const PUSHINT128: u8 = 0x04;
    pub const PUSHT: u8 = 0x08;
    pub const PUSHF: u8 = 0x09;
    pub const PUSHNULL: u8 = 0x0B;
    pub const PUSHDATA1: u8 = 0x0C;
    pub const PUSHDATA2: u8 = 0x0D;
    pub const PUSHDATA4: u8 = 0x0E;
    pub const PUSHM1: u8 = 0x0F;
    pub const PUSH0: u8 = 0x10;
    pub const PUSH1: u8 = 0x11;
    pub const PUSH16: u8 = 0x20;
    pub const SYSCALL: u8 = 0x41;
    pub const PACK: u8 = 0xC0;
    pub const NEWARRAY0: u8 = 0xC2;
}

/// Interop service names
pub mod interop {
    pub const CHECK_SIG: &str = "System.Crypto.CheckSig";
    pub const CHECK_MULTISIG: &str = "System.Crypto.CheckMultisig";
    pub const CONTRACT_CALL: &str = "System.Contract.Call";
}

/// `CallFlags.All`
pub const CALL_FLAGS_ALL: u8 = 0x0F;

/// Upper bound on keys in a multi-signature contract
pub const MAX_MULTISIG_KEYS: usize = 1024;

/// Interop id: first four bytes of SHA-256 over the ASCII service name
pub fn interop_id(name: &str) -> [u8; 4] {
    let digest = sha256(name.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Invalid threshold: {threshold} of {keys} keys")]
    InvalidThreshold { threshold: usize, keys: usize },
    #[error("Too many keys: {0}")]
    TooManyKeys(usize),
    #[error("Duplicate public key: {0}")]
    DuplicateKey(String),
}

// =============================================================================
// Script Builder
// =============================================================================

/// Incremental NeoVM script writer
#[derive(Debug, Default, Clone)]
pub struct ScriptBuilder {
    script: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self { script: Vec::new() }
    }

    pub fn emit(&mut self, op: u8) -> &mut Self {
        self.script.push(op);
        self
    }

    /// Push a byte string with the smallest PUSHDATA form that fits
    pub fn emit_push_bytes(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len < 0x100 {
            self.script.push(opcode::PUSHDATA1);
            self.script.push(len as u8);
        } else if len < 0x1_0000 {
            self.script.push(opcode::PUSHDATA2);
            self.script.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.script.push(opcode::PUSHDATA4);
            self.script.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.script.extend_from_slice(data);
        self
    }

    pub fn emit_push_str(&mut self, value: &str) -> &mut Self {
        self.emit_push_bytes(value.as_bytes())
    }

    pub fn emit_push_bool(&mut self, value: bool) -> &mut Self {
        self.emit(if value { opcode::PUSHT } else { opcode::PUSHF })
    }

    pub fn emit_push_null(&mut self) -> &mut Self {
        self.emit(opcode::PUSHNULL)
    }

    /// Push an integer: `PUSHM1`/`PUSH0..PUSH16` for small values, otherwise
    /// the narrowest `PUSHINT*` holding its two's complement form.
    pub fn emit_push_int(&mut self, value: i128) -> &mut Self {
        if (-1..=16).contains(&value) {
            return self.emit((opcode::PUSH0 as i128 + value) as u8);
        }
        let bytes = value.to_le_bytes();
        let (op, width) = [
            (opcode::PUSHINT8, 1usize),
            (opcode::PUSHINT16, 2),
            (opcode::PUSHINT32, 4),
            (opcode::PUSHINT64, 8),
        ]
        .into_iter()
        .find(|(_, width)| {
            let bits = (*width as u32) * 8 - 1;
            value >= -(1i128 << bits) && value < (1i128 << bits)
        })
        .unwrap_or((opcode::PUSHINT128, 16));
        self.script.push(op);
        self.script.extend_from_slice(&bytes[..width]);
        self
    }

    pub fn emit_syscall(&mut self, name: &str) -> &mut Self {
        self.script.push(opcode::SYSCALL);
        self.script.extend_from_slice(&interop_id(name));
        self
    }

    /// Call `method` on `contract` with `CallFlags.All`
    pub fn emit_dynamic_call(
        &mut self,
        contract: &ScriptHash,
        method: &str,
        args: &[ContractParameter],
    ) -> &mut Self {
        if args.is_empty() {
            self.emit(opcode::NEWARRAY0);
        } else {
            for arg in args.iter().rev() {
                arg.emit(self);
            }
            self.emit_push_int(args.len() as i128);
            self.emit(opcode::PACK);
        }
        self.emit_push_int(CALL_FLAGS_ALL as i128);
        self.emit_push_str(method);
        self.emit_push_bytes(contract.as_bytes());
        self.emit_syscall(interop::CONTRACT_CALL)
    }

    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.script
    }
}

// =============================================================================
// Verification Contracts
// =============================================================================

/// A verification contract script together with its script hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    script: Vec<u8>,
    script_hash: ScriptHash,
}

impl Contract {
    fn from_script(script: Vec<u8>) -> Self {
        let script_hash = ScriptHash::from_script(&script);
        Self {
            script,
            script_hash,
        }
    }

    /// `PUSHDATA1 <key> SYSCALL CheckSig`
    pub fn signature(key: &PublicKey) -> Self {
        let mut sb = ScriptBuilder::new();
        sb.emit_push_bytes(key.as_bytes())
            .emit_syscall(interop::CHECK_SIG);
        Self::from_script(sb.into_bytes())
    }

    /// `PUSH m, PUSHDATA1 <key>..., PUSH n, SYSCALL CheckMultisig`
    ///
    /// Keys are sorted before emission, so the result does not depend on
    /// the order they are passed in.
    pub fn multisig(threshold: usize, keys: &[PublicKey]) -> Result<Self, ScriptError> {
        if keys.len() > MAX_MULTISIG_KEYS {
            return Err(ScriptError::TooManyKeys(keys.len()));
        }
        if threshold == 0 || threshold > keys.len() {
            return Err(ScriptError::InvalidThreshold {
                threshold,
                keys: keys.len(),
            });
        }
        let mut sorted = keys.to_vec();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ScriptError::DuplicateKey(pair[0].to_hex()));
        }

        let mut sb = ScriptBuilder::new();
        sb.emit_push_int(threshold as i128);
        for key in &sorted {
            sb.emit_push_bytes(key.as_bytes());
        }
        sb.emit_push_int(sorted.len() as i128)
            .emit_syscall(interop::CHECK_MULTISIG);
        Ok(Self::from_script(sb.into_bytes()))
    }

    pub fn script(&self) -> &[u8] {
        &self.script
    }

    pub fn script_hash(&self) -> ScriptHash {
        self.script_hash
    }

    pub fn address(&self) -> String {
        self.script_hash.to_address()
    }
}
