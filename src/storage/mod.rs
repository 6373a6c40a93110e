//! Record storage for accounts, transactions and sign results

pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::{SqliteStore, StorageConfig, StorageStats};

use async_trait::async_trait;
use std::io;
use thiserror::Error;

use crate::core::{ScriptHash, TxHash};
use crate::multisig::{Account, SignResult, TransactionRecord, TransactionStatus};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Duplicate {0}")]
    Duplicate(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Transaction {0} was updated concurrently")]
    Conflict(TxHash),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// A transaction loaded together with its account and every decision
///
/// `revision` identifies the stored version of the record; a commit based
/// on an older revision is refused.
#[derive(Clone, Debug)]
pub struct TransactionSnapshot {
    pub record: TransactionRecord,
    pub account: Account,
    pub sign_results: Vec<SignResult>,
    pub revision: u64,
}

/// Transactional store the settlement engine runs against
///
/// Each method is atomic. `commit` applies a record update and an optional
/// new sign result together or not at all, and only if the stored record
/// is still at `revision`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fails with `Duplicate` if the account already exists
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    async fn account(&self, script_hash: &ScriptHash) -> Result<Option<Account>, StoreError>;

    async fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Fails with `Duplicate` if the hash is already known, `NotFound` if
    /// the account is not
    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Consistent view of a transaction, its account and its decisions
    async fn snapshot(&self, hash: &TxHash) -> Result<Option<TransactionSnapshot>, StoreError>;

    /// Replace a stored record and optionally append a sign result.
    ///
    /// A second result for the same signer is a `Duplicate`; a stale
    /// `revision` is a `Conflict`. Returns the new revision.
    async fn commit(
        &self,
        record: &TransactionRecord,
        revision: u64,
        sign_result: Option<&SignResult>,
    ) -> Result<u64, StoreError>;

    /// Hashes of transactions currently in `status`, oldest first
    async fn transactions_with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<TxHash>, StoreError>;

    async fn transactions_for_account(
        &self,
        account: &ScriptHash,
    ) -> Result<Vec<TransactionRecord>, StoreError>;
}
