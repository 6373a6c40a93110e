//! Settlement errors

use thiserror::Error;

use super::transaction::TransactionStatus;
use crate::core::{CodecError, ParseError, ScriptError, TxHash};
use crate::crypto::KeyError;
use crate::rpc::RpcError;
use crate::storage::StoreError;

/// Errors related to multi-signature settlement
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Invalid signature from {0}")]
    InvalidSignature(String),
    #[error("Signer not authorized: {0}")]
    NotAuthorized(String),
    #[error("Decision already submitted by {0}")]
    AlreadySubmitted(String),
    #[error("Construction error: {0}")]
    Construction(String),
    #[error("Network error: {0}")]
    Network(#[from] RpcError),
    #[error("Threshold unreachable: {rejections} rejections, at most {tolerated} tolerated")]
    ThresholdUnreachable { rejections: usize, tolerated: usize },
    #[error("Transaction expired at block {0}")]
    Expired(u32),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TxHash),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Transaction is {0}")]
    TransactionClosed(TransactionStatus),
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    #[error("Invalid account: {0}")]
    InvalidAccount(String),
    #[error("Invalid proposal: {0}")]
    InvalidProposal(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Parameter error: {0}")]
    Parse(#[from] ParseError),
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

