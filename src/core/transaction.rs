//! Neo N3 transaction model
//!
//! Binary layout:
//! `version u8 | nonce u32 | system_fee i64 | network_fee i64 |
//!  valid_until_block u32 | signers | attributes | script | witnesses`
//!
//! The hash covers everything before the witnesses, so attaching or
//! replacing witnesses never changes it.

use bitflags::bitflags;

use super::codec::{BinReader, BinWriter, CodecError};
use super::types::{ScriptHash, TxHash};
use crate::crypto::keys::PublicKey;
use crate::crypto::message::transaction_sign_data;

// =============================================================================
// Constants
// =============================================================================

/// Only version 0 is defined
pub const TX_VERSION: u8 = 0;

/// Maximum serialized transaction size
pub const MAX_TRANSACTION_SIZE: usize = 102_400;

/// Signers plus attributes may not exceed this
pub const MAX_TRANSACTION_ATTRIBUTES: usize = 16;

/// Maximum entries in a signer's allowed contracts or groups
pub const MAX_SUBITEMS: usize = 16;

/// Maximum invocation script length
pub const MAX_INVOCATION_SCRIPT: usize = 1024;

/// Maximum verification script length
pub const MAX_VERIFICATION_SCRIPT: usize = 1024;

const MAX_SCRIPT_LEN: usize = u16::MAX as usize;

bitflags! {
    /// Scope in which a signer's witness is valid
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WitnessScope: u8 {
        const CALLED_BY_ENTRY = 0x01;
        const CUSTOM_CONTRACTS = 0x10;
        const CUSTOM_GROUPS = 0x20;
        const WITNESS_RULES = 0x40;
        const GLOBAL = 0x80;
    }
}

// =============================================================================
// Signer
// =============================================================================

/// An account whose witness the transaction requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signer {
    pub account: ScriptHash,
    pub scopes: WitnessScope,
    pub allowed_contracts: Vec<ScriptHash>,
    pub allowed_groups: Vec<PublicKey>,
}

impl Signer {
    /// Signer with the given scope and no custom contracts or groups
    pub fn new(account: ScriptHash, scopes: WitnessScope) -> Self {
        Self {
            account,
            scopes,
            allowed_contracts: Vec::new(),
            allowed_groups: Vec::new(),
        }
    }

    /// Signer limited to the entry script
    pub fn called_by_entry(account: ScriptHash) -> Self {
        Self::new(account, WitnessScope::CALLED_BY_ENTRY)
    }

    fn encode(&self, writer: &mut BinWriter) -> Result<(), CodecError> {
        if self.scopes.contains(WitnessScope::WITNESS_RULES) {
            return Err(CodecError::Unsupported("witness rules scope"));
        }
        writer.write_bytes(self.account.as_bytes());
        writer.write_u8(self.scopes.bits());
        if self.scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
            writer.write_var_int(self.allowed_contracts.len() as u64);
            for contract in &self.allowed_contracts {
                writer.write_bytes(contract.as_bytes());
            }
        }
        if self.scopes.contains(WitnessScope::CUSTOM_GROUPS) {
            writer.write_var_int(self.allowed_groups.len() as u64);
            for group in &self.allowed_groups {
                writer.write_bytes(group.as_bytes());
            }
        }
        Ok(())
    }

    fn decode(reader: &mut BinReader<'_>) -> Result<Self, CodecError> {
        let account = ScriptHash::from_bytes(reader.read_array()?);
        let raw = reader.read_u8()?;
        let scopes = WitnessScope::from_bits(raw).ok_or(CodecError::UnknownTag {
            kind: "witness scope",
            tag: raw,
        })?;
        if scopes.contains(WitnessScope::GLOBAL) && scopes != WitnessScope::GLOBAL {
            return Err(CodecError::Invalid(
                "global scope cannot be combined".to_string(),
            ));
        }
        if scopes.contains(WitnessScope::WITNESS_RULES) {
            return Err(CodecError::Unsupported("witness rules scope"));
        }

        let mut signer = Signer::new(account, scopes);
        if scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
            let count = reader.read_var_int(MAX_SUBITEMS as u64)?;
            for _ in 0..count {
                signer
                    .allowed_contracts
                    .push(ScriptHash::from_bytes(reader.read_array()?));
            }
        }
        if scopes.contains(WitnessScope::CUSTOM_GROUPS) {
            let count = reader.read_var_int(MAX_SUBITEMS as u64)?;
            for _ in 0..count {
                let bytes: [u8; 33] = reader.read_array()?;
                let key = PublicKey::from_hex(&hex::encode(bytes))
                    .map_err(|e| CodecError::Invalid(e.to_string()))?;
                signer.allowed_groups.push(key);
            }
        }
        Ok(signer)
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Transaction attributes understood by this crate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionAttribute {
    HighPriority,
    NotValidBefore { height: u32 },
    Conflicts { hash: TxHash },
}

impl TransactionAttribute {
    const HIGH_PRIORITY: u8 = 0x01;
    const NOT_VALID_BEFORE: u8 = 0x20;
    const CONFLICTS: u8 = 0x21;

    fn encode(&self, writer: &mut BinWriter) {
        match self {
            TransactionAttribute::HighPriority => writer.write_u8(Self::HIGH_PRIORITY),
            TransactionAttribute::NotValidBefore { height } => {
                writer.write_u8(Self::NOT_VALID_BEFORE);
                writer.write_u32(*height);
            }
            TransactionAttribute::Conflicts { hash } => {
                writer.write_u8(Self::CONFLICTS);
                writer.write_bytes(hash.as_bytes());
            }
        }
    }

    fn decode(reader: &mut BinReader<'_>) -> Result<Self, CodecError> {
        match reader.read_u8()? {
            Self::HIGH_PRIORITY => Ok(TransactionAttribute::HighPriority),
            Self::NOT_VALID_BEFORE => Ok(TransactionAttribute::NotValidBefore {
                height: reader.read_u32()?,
            }),
            Self::CONFLICTS => Ok(TransactionAttribute::Conflicts {
                hash: TxHash::from_bytes(reader.read_array()?),
            }),
            tag => Err(CodecError::UnknownTag {
                kind: "attribute",
                tag,
            }),
        }
    }
}

// =============================================================================
// Witness
// =============================================================================

/// Invocation and verification script pair authorizing one signer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Witness {
    pub invocation: Vec<u8>,
    pub verification: Vec<u8>,
}

impl Witness {
    pub fn new(invocation: Vec<u8>, verification: Vec<u8>) -> Self {
        Self {
            invocation,
            verification,
        }
    }

    /// Both scripts empty: the account is a deployed contract whose
    /// `verify` method is run instead
    pub fn is_contract_placeholder(&self) -> bool {
        self.invocation.is_empty() && self.verification.is_empty()
    }

    /// Ready for broadcast: both scripts set, or both empty
    pub fn is_complete(&self) -> bool {
        self.invocation.is_empty() == self.verification.is_empty()
    }

    fn encode(&self, writer: &mut BinWriter) {
        writer.write_var_bytes(&self.invocation);
        writer.write_var_bytes(&self.verification);
    }

    fn decode(reader: &mut BinReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            invocation: reader.read_var_bytes(MAX_INVOCATION_SCRIPT)?,
            verification: reader.read_var_bytes(MAX_VERIFICATION_SCRIPT)?,
        })
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A Neo N3 transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u8,
    pub nonce: u32,
    pub system_fee: i64,
    pub network_fee: i64,
    pub valid_until_block: u32,
    pub signers: Vec<Signer>,
    pub attributes: Vec<TransactionAttribute>,
    pub script: Vec<u8>,
    pub witnesses: Vec<Witness>,
}

impl Transaction {
    /// Transaction with a random nonce and no fees or witnesses
    pub fn new(script: Vec<u8>, signers: Vec<Signer>, valid_until_block: u32) -> Self {
        Self {
            version: TX_VERSION,
            nonce: rand::random(),
            system_fee: 0,
            network_fee: 0,
            valid_until_block,
            signers,
            attributes: Vec::new(),
            script,
            witnesses: Vec::new(),
        }
    }

    /// First signer pays the fees
    pub fn sender(&self) -> Option<ScriptHash> {
        self.signers.first().map(|s| s.account)
    }

    /// Position of `account` among the signers
    pub fn signer_index(&self, account: &ScriptHash) -> Option<usize> {
        self.signers.iter().position(|s| &s.account == account)
    }

    fn encode_unsigned(&self, writer: &mut BinWriter) -> Result<(), CodecError> {
        writer.write_u8(self.version);
        writer.write_u32(self.nonce);
        writer.write_i64(self.system_fee);
        writer.write_i64(self.network_fee);
        writer.write_u32(self.valid_until_block);
        writer.write_var_int(self.signers.len() as u64);
        for signer in &self.signers {
            signer.encode(writer)?;
        }
        writer.write_var_int(self.attributes.len() as u64);
        for attribute in &self.attributes {
            attribute.encode(writer);
        }
        writer.write_var_bytes(&self.script);
        Ok(())
    }

    /// Serialized form without witnesses
    pub fn unsigned_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = BinWriter::with_capacity(256);
        self.encode_unsigned(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Full serialized form, witnesses included
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = BinWriter::with_capacity(512);
        self.encode_unsigned(&mut writer)?;
        writer.write_var_int(self.witnesses.len() as u64);
        for witness in &self.witnesses {
            witness.encode(&mut writer);
        }
        let bytes = writer.into_bytes();
        if bytes.len() > MAX_TRANSACTION_SIZE {
            return Err(CodecError::TooLong(
                bytes.len() as u64,
                MAX_TRANSACTION_SIZE as u64,
            ));
        }
        Ok(bytes)
    }

    /// SHA-256 over the unsigned serialization
    pub fn hash(&self) -> Result<TxHash, CodecError> {
        Ok(TxHash::digest(&self.unsigned_bytes()?))
    }

    /// Bytes each witness signs on the given network
    pub fn sign_data(&self, network: u32) -> Result<Vec<u8>, CodecError> {
        Ok(transaction_sign_data(network, self.hash()?.as_bytes()))
    }

    /// Decode a full transaction
    ///
    /// Witnesses may be absent entirely; if present there must be one
    /// per signer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > MAX_TRANSACTION_SIZE {
            return Err(CodecError::TooLong(
                bytes.len() as u64,
                MAX_TRANSACTION_SIZE as u64,
            ));
        }
        let mut reader = BinReader::new(bytes);

        let version = reader.read_u8()?;
        if version != TX_VERSION {
            return Err(CodecError::UnknownTag {
                kind: "transaction version",
                tag: version,
            });
        }
        let nonce = reader.read_u32()?;
        let system_fee = reader.read_i64()?;
        let network_fee = reader.read_i64()?;
        if system_fee < 0 || network_fee < 0 {
            return Err(CodecError::Invalid("negative fee".to_string()));
        }
        let valid_until_block = reader.read_u32()?;

        let signer_count = reader.read_var_int(MAX_TRANSACTION_ATTRIBUTES as u64)? as usize;
        if signer_count == 0 {
            return Err(CodecError::Invalid("no signers".to_string()));
        }
        let mut signers: Vec<Signer> = Vec::with_capacity(signer_count);
        for _ in 0..signer_count {
            let signer = Signer::decode(&mut reader)?;
            if signers.iter().any(|s| s.account == signer.account) {
                return Err(CodecError::Invalid(format!(
                    "duplicate signer {}",
                    signer.account
                )));
            }
            signers.push(signer);
        }

        let attribute_limit = (MAX_TRANSACTION_ATTRIBUTES - signer_count) as u64;
        let attribute_count = reader.read_var_int(attribute_limit)? as usize;
        let mut attributes = Vec::with_capacity(attribute_count);
        for _ in 0..attribute_count {
            attributes.push(TransactionAttribute::decode(&mut reader)?);
        }

        let script = reader.read_var_bytes(MAX_SCRIPT_LEN)?;
        if script.is_empty() {
            return Err(CodecError::Invalid("empty script".to_string()));
        }

        let witness_count = reader.read_var_int(signer_count as u64)? as usize;
        if witness_count != 0 && witness_count != signer_count {
            return Err(CodecError::Invalid(format!(
                "{} witnesses for {} signers",
                witness_count, signer_count
            )));
        }
        let mut witnesses = Vec::with_capacity(witness_count);
        for _ in 0..witness_count {
            witnesses.push(Witness::decode(&mut reader)?);
        }
        reader.finish()?;

        Ok(Self {
            version,
            nonce,
            system_fee,
            network_fee,
            valid_until_block,
            signers,
            attributes,
            script,
            witnesses,
        })
    }
}
