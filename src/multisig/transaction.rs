//! Proposed multi-signature transactions and owner decisions
//!
//! A `TransactionRecord` keeps the raw Neo transaction as it evolves from
//! unsigned to fully witnessed. Its hash is always derived from the raw
//! bytes; any mismatch is reported as a construction error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::account::Account;
use super::error::SettlementError;
use super::witness::WitnessPlan;
use crate::core::{ScriptHash, Transaction, TxHash};
use crate::crypto::PublicKey;

// =============================================================================
// Kind and Status
// =============================================================================

/// What a transaction does on chain
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionKind {
    /// Arbitrary contract invocation
    Invoke { contract: ScriptHash, method: String },
    /// NEP-17 token transfer out of the account
    Transfer {
        asset: ScriptHash,
        to: ScriptHash,
        amount: String,
    },
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Invoke { contract, method } => {
                write!(f, "invoke {}.{}", contract, method)
            }
            TransactionKind::Transfer { asset, to, amount } => {
                write!(f, "transfer {} of {} to {}", amount, asset, to.to_address())
            }
        }
    }
}

/// Settlement status of a transaction
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Collecting owner decisions
    Signing,
    /// Submitted, waiting for confirmation
    Executing,
    /// Confirmed on chain
    Executed,
    /// Submission failed or can no longer confirm
    Failed,
    /// Vetoed, or too many owners rejected
    Rejected,
    /// Validity deadline passed while still signing
    Expired,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Signing | TransactionStatus::Executing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Signing => "Signing",
            TransactionStatus::Executing => "Executing",
            TransactionStatus::Executed => "Executed",
            TransactionStatus::Failed => "Failed",
            TransactionStatus::Rejected => "Rejected",
            TransactionStatus::Expired => "Expired",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Sign Result
// =============================================================================

/// One owner's decision on one transaction
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignResult {
    pub transaction: TxHash,
    pub signer: PublicKey,
    pub approved: bool,
    /// Raw 64-byte signature as hex; only meaningful when approved
    pub signature: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl SignResult {
    pub fn approval(transaction: TxHash, signer: PublicKey, signature: String) -> Self {
        Self {
            transaction,
            signer,
            approved: true,
            signature: Some(signature),
            submitted_at: Utc::now(),
        }
    }

    pub fn rejection(transaction: TxHash, signer: PublicKey) -> Self {
        Self {
            transaction,
            signer,
            approved: false,
            signature: None,
            submitted_at: Utc::now(),
        }
    }

    /// Decoded signature bytes of an approval
    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        if !self.approved {
            return None;
        }
        self.signature
            .as_deref()
            .and_then(|sig| hex::decode(sig).ok())
    }
}

// =============================================================================
// Transaction Record
// =============================================================================

/// Persisted form of a transaction record
#[derive(Clone, Debug, Serialize, Deserialize)]
struct TransactionData {
    hash: TxHash,
    account: ScriptHash,
    kind: TransactionKind,
    plan: WitnessPlan,
    #[serde(with = "hex::serde")]
    raw: Vec<u8>,
    valid_until_block: u32,
    status: TransactionStatus,
    #[serde(default)]
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// A proposed transaction and its settlement state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionData", into = "TransactionData")]
pub struct TransactionRecord {
    hash: TxHash,
    account: ScriptHash,
    kind: TransactionKind,
    plan: WitnessPlan,
    raw: Vec<u8>,
    valid_until_block: u32,
    status: TransactionStatus,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    submitted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// New record in `Signing` status
    pub fn new(
        account: &Account,
        kind: TransactionKind,
        plan: WitnessPlan,
        transaction: &Transaction,
    ) -> Result<Self, SettlementError> {
        let now = Utc::now();
        Ok(Self {
            hash: transaction.hash()?,
            account: account.script_hash(),
            kind,
            plan,
            raw: transaction.to_bytes()?,
            valid_until_block: transaction.valid_until_block,
            status: TransactionStatus::Signing,
            failure_reason: None,
            created_at: now,
            submitted_at: None,
            updated_at: now,
        })
    }

    pub fn hash(&self) -> TxHash {
        self.hash
    }

    pub fn account(&self) -> ScriptHash {
        self.account
    }

    pub fn kind(&self) -> &TransactionKind {
        &self.kind
    }

    pub fn plan(&self) -> &WitnessPlan {
        &self.plan
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn valid_until_block(&self) -> u32 {
        self.valid_until_block
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Decode the raw bytes
    pub fn transaction(&self) -> Result<Transaction, SettlementError> {
        Ok(Transaction::from_bytes(&self.raw)?)
    }

    /// Replace the raw bytes with a re-witnessed version of the same
    /// transaction. Fails if the new bytes hash differently.
    pub fn set_transaction(&mut self, transaction: &Transaction) -> Result<(), SettlementError> {
        let hash = transaction.hash()?;
        if hash != self.hash {
            return Err(SettlementError::Construction(format!(
                "hash mismatch: record {} but raw data hashes to {}",
                self.hash, hash
            )));
        }
        let raw = transaction.to_bytes()?;
        if raw != self.raw {
            self.raw = raw;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub(crate) fn set_status(&mut self, status: TransactionStatus, reason: Option<String>) {
        self.status = status;
        if reason.is_some() {
            self.failure_reason = reason;
        }
        self.updated_at = Utc::now();
    }

    pub(crate) fn mark_submitted(&mut self, at: DateTime<Utc>) {
        self.submitted_at = Some(at);
        self.updated_at = at;
    }
}

impl TryFrom<TransactionData> for TransactionRecord {
    type Error = SettlementError;

    fn try_from(data: TransactionData) -> Result<Self, Self::Error> {
        let transaction = Transaction::from_bytes(&data.raw)?;
        let hash = transaction.hash()?;
        if hash != data.hash {
            return Err(SettlementError::Construction(format!(
                "hash mismatch: record {} but raw data hashes to {}",
                data.hash, hash
            )));
        }
        Ok(Self {
            hash,
            account: data.account,
            kind: data.kind,
            plan: data.plan,
            raw: data.raw,
            valid_until_block: transaction.valid_until_block,
            status: data.status,
            failure_reason: data.failure_reason,
            created_at: data.created_at,
            submitted_at: data.submitted_at,
            updated_at: data.updated_at,
        })
    }
}

impl From<TransactionRecord> for TransactionData {
    fn from(record: TransactionRecord) -> Self {
        Self {
            hash: record.hash,
            account: record.account,
            kind: record.kind,
            plan: record.plan,
            raw: record.raw,
            valid_until_block: record.valid_until_block,
            status: record.status,
            failure_reason: record.failure_reason,
            created_at: record.created_at,
            submitted_at: record.submitted_at,
            updated_at: record.updated_at,
        }
    }
}
