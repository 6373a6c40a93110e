//! Neo N3 primitives
//!
//! This module contains the building blocks shared by the settlement engine:
//! - Binary codec (little-endian integers, var-ints, var-bytes)
//! - Script hashes, transaction hashes and addresses
//! - NeoVM script builder and verification contracts
//! - Contract invocation parameters
//! - Transactions, signers, attributes and witnesses

pub mod codec;
pub mod params;
pub mod script;
pub mod transaction;
pub mod types;

pub use codec::{BinReader, BinWriter, CodecError};
pub use params::{parse_amount, ContractParameter, ParseError};
pub use script::{Contract, ScriptBuilder, ScriptError};
pub use transaction::{
    Signer, Transaction, TransactionAttribute, Witness, WitnessScope, MAX_TRANSACTION_SIZE,
};
pub use types::{ScriptHash, TxHash};
