//! SQLite record store
//!
//! The CLI commands and the reconciliation daemon run as separate processes
//! against one database file. SQLite serializes their writers, and every
//! transaction row carries a revision so a commit based on a stale read is
//! refused instead of overwriting a newer one.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{RecordStore, StoreError, TransactionSnapshot};
use crate::core::{ScriptHash, TxHash};
use crate::multisig::{Account, SignResult, TransactionRecord, TransactionStatus};

/// Storage configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    /// How long a writer waits for another process's write lock
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".settlement_data"),
            database_file: "records.db".to_string(),
            busy_timeout: Duration::from_secs(5),
            max_connections: 4,
        }
    }
}

impl StorageConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }
}

/// Storage statistics
#[derive(Debug)]
pub struct StorageStats {
    pub accounts: usize,
    pub transactions: usize,
    pub sign_results: usize,
    pub file_size: u64,
}

const SCHEMA: [&str; 6] = [
    "CREATE TABLE IF NOT EXISTS accounts (
        script_hash TEXT PRIMARY KEY,
        body        TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        hash        TEXT PRIMARY KEY,
        account     TEXT NOT NULL REFERENCES accounts(script_hash),
        status      TEXT NOT NULL,
        created_at  INTEGER NOT NULL,
        revision    INTEGER NOT NULL,
        body        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS transactions_by_status ON transactions(status, created_at)",
    "CREATE INDEX IF NOT EXISTS transactions_by_account ON transactions(account, created_at)",
    "CREATE TABLE IF NOT EXISTS sign_results (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        tx_hash     TEXT NOT NULL REFERENCES transactions(hash),
        signer      TEXT NOT NULL,
        body        TEXT NOT NULL,
        UNIQUE (tx_hash, signer)
    )",
    "CREATE INDEX IF NOT EXISTS sign_results_by_tx ON sign_results(tx_hash, seq)",
];

/// Record store backed by a SQLite database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    config: StorageConfig,
}

impl SqliteStore {
    /// Open (creating if needed) the database under `config.data_dir`
    pub async fn open(config: StorageConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.data_dir)?;
        let options = SqliteConnectOptions::new()
            .filename(config.database_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let store = Self { pool, config };
        let stats = store.stats().await?;
        log::info!(
            "Opened {:?}: {} accounts, {} transactions",
            store.config.database_path(),
            stats.accounts,
            stats.transactions
        );
        Ok(store)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Get storage statistics
    pub async fn stats(&self) -> Result<StorageStats, StoreError> {
        let accounts = self.count("SELECT COUNT(*) FROM accounts").await?;
        let transactions = self.count("SELECT COUNT(*) FROM transactions").await?;
        let sign_results = self.count("SELECT COUNT(*) FROM sign_results").await?;
        let path = self.config.database_path();
        let file_size = if path.exists() {
            fs::metadata(&path)?.len()
        } else {
            0
        };
        Ok(StorageStats {
            accounts,
            transactions,
            sign_results,
            file_size,
        })
    }

    async fn count(&self, query: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn decode<T: DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<T, StoreError> {
    let body: String = row.try_get(column)?;
    Ok(serde_json::from_str(&body)?)
}

fn revision_of(row: &SqliteRow) -> Result<u64, StoreError> {
    let revision: i64 = row.try_get("revision")?;
    u64::try_from(revision)
        .map_err(|_| StoreError::InvalidData(format!("negative revision {}", revision)))
}

fn to_db_revision(revision: u64) -> Result<i64, StoreError> {
    i64::try_from(revision)
        .map_err(|_| StoreError::InvalidData(format!("revision {} out of range", revision)))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let result = sqlx::query("INSERT INTO accounts (script_hash, body) VALUES ($1, $2)")
            .bind(account.script_hash().to_string())
            .bind(serde_json::to_string(account)?)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Duplicate(format!(
                "account {}",
                account.address()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn account(&self, script_hash: &ScriptHash) -> Result<Option<Account>, StoreError> {
        sqlx::query("SELECT body FROM accounts WHERE script_hash = $1")
            .bind(script_hash.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| decode(&row, "body"))
            .transpose()
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        sqlx::query("SELECT body FROM accounts ORDER BY script_hash")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| decode(row, "body"))
            .collect()
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO transactions (hash, account, status, created_at, revision, body)
                VALUES ($1, $2, $3, $4, 1, $5)",
        )
        .bind(record.hash().to_string())
        .bind(record.account().to_string())
        .bind(record.status().to_string())
        .bind(record.created_at().timestamp_micros())
        .bind(serde_json::to_string(record)?)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::Duplicate(format!("transaction {}", record.hash())))
            }
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StoreError::NotFound(format!("account {}", record.account())))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn snapshot(&self, hash: &TxHash) -> Result<Option<TransactionSnapshot>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let key = hash.to_string();

        let Some(row) = sqlx::query("SELECT revision, body FROM transactions WHERE hash = $1")
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let record: TransactionRecord = decode(&row, "body")?;
        let revision = revision_of(&row)?;
        if record.hash() != *hash {
            return Err(StoreError::InvalidData(format!(
                "transaction stored under {} hashes to {}",
                hash,
                record.hash()
            )));
        }

        let account: Account = match sqlx::query("SELECT body FROM accounts WHERE script_hash = $1")
            .bind(record.account().to_string())
            .fetch_optional(&mut *tx)
            .await?
        {
            Some(row) => decode(&row, "body")?,
            None => return Err(StoreError::NotFound(format!("account {}", record.account()))),
        };

        let sign_results = sqlx::query("SELECT body FROM sign_results WHERE tx_hash = $1 ORDER BY seq")
            .bind(key.as_str())
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| decode(row, "body"))
            .collect::<Result<Vec<SignResult>, _>>()?;

        tx.commit().await?;
        Ok(Some(TransactionSnapshot {
            record,
            account,
            sign_results,
            revision,
        }))
    }

    async fn commit(
        &self,
        record: &TransactionRecord,
        revision: u64,
        sign_result: Option<&SignResult>,
    ) -> Result<u64, StoreError> {
        let hash = record.hash();
        let key = hash.to_string();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE transactions SET status = $1, body = $2, revision = revision + 1
                WHERE hash = $3 AND revision = $4",
        )
        .bind(record.status().to_string())
        .bind(serde_json::to_string(record)?)
        .bind(key.as_str())
        .bind(to_db_revision(revision)?)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM transactions WHERE hash = $1")
                .bind(key.as_str())
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => StoreError::Conflict(hash),
                None => StoreError::NotFound(format!("transaction {}", hash)),
            });
        }

        if let Some(result) = sign_result {
            if result.transaction != hash {
                return Err(StoreError::InvalidData(format!(
                    "sign result for {} committed with {}",
                    result.transaction, hash
                )));
            }
            let inserted =
                sqlx::query("INSERT INTO sign_results (tx_hash, signer, body) VALUES ($1, $2, $3)")
                    .bind(key.as_str())
                    .bind(result.signer.to_string())
                    .bind(serde_json::to_string(result)?)
                    .execute(&mut *tx)
                    .await;
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(StoreError::Duplicate(format!(
                        "decision by {} on {}",
                        result.signer, hash
                    )))
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(revision + 1)
    }

    async fn transactions_with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<TxHash>, StoreError> {
        sqlx::query("SELECT hash FROM transactions WHERE status = $1 ORDER BY created_at, rowid")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                let hash: String = row.try_get("hash")?;
                hash.parse::<TxHash>()
                    .map_err(|e| StoreError::InvalidData(format!("hash {}: {}", hash, e)))
            })
            .collect()
    }

    async fn transactions_for_account(
        &self,
        account: &ScriptHash,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        sqlx::query("SELECT body FROM transactions WHERE account = $1 ORDER BY created_at, rowid")
            .bind(account.to_string())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| decode(row, "body"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::tests::{account, sample};

    async fn open(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::open(StorageConfig::in_dir(dir.path())).await.unwrap()
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (owners, account) = account();
        let record = sample(&account);
        {
            let store = open(&temp_dir).await;
            store.insert_account(&account).await.unwrap();
            store.insert_transaction(&record).await.unwrap();
            let rejection = SignResult::rejection(record.hash(), owners[1].public_key.clone());
            store.commit(&record, 1, Some(&rejection)).await.unwrap();
        }

        let reopened = open(&temp_dir).await;
        let snapshot = reopened.snapshot(&record.hash()).await.unwrap().unwrap();
        assert_eq!(snapshot.record, record);
        assert_eq!(snapshot.account.address(), account.address());
        assert_eq!(snapshot.sign_results.len(), 1);
        assert_eq!(snapshot.revision, 2);

        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.accounts, 1);
        assert_eq!(stats.transactions, 1);
        assert_eq!(stats.sign_results, 1);
        assert!(stats.file_size > 0);
    }

    #[tokio::test]
    async fn test_constraints() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(&temp_dir).await;
        let (owners, account) = account();
        let record = sample(&account);

        assert!(matches!(
            store.insert_transaction(&record).await,
            Err(StoreError::NotFound(_))
        ));
        store.insert_account(&account).await.unwrap();
        assert!(matches!(
            store.insert_account(&account).await,
            Err(StoreError::Duplicate(_))
        ));
        store.insert_transaction(&record).await.unwrap();
        assert!(matches!(
            store.insert_transaction(&record).await,
            Err(StoreError::Duplicate(_))
        ));

        let first = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        let revision = store.commit(&record, 1, Some(&first)).await.unwrap();
        let again = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        assert!(matches!(
            store.commit(&record, revision, Some(&again)).await,
            Err(StoreError::Duplicate(_))
        ));
        // the failed commit rolled back its revision bump
        let snapshot = store.snapshot(&record.hash()).await.unwrap().unwrap();
        assert_eq!(snapshot.revision, revision);
        assert_eq!(snapshot.sign_results.len(), 1);

        assert!(matches!(
            store.commit(&sample(&account), 1, None).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stores_sharing_a_directory_see_each_other() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cli = open(&temp_dir).await;
        let daemon = open(&temp_dir).await;

        let (owners, first) = account();
        cli.insert_account(&first).await.unwrap();
        assert!(daemon.account(&first.script_hash()).await.unwrap().is_some());

        let (_, second) = account();
        daemon.insert_account(&second).await.unwrap();
        assert_eq!(cli.accounts().await.unwrap().len(), 2);

        let mut record = sample(&first);
        cli.insert_transaction(&record).await.unwrap();
        assert_eq!(
            daemon
                .transactions_with_status(TransactionStatus::Signing)
                .await
                .unwrap(),
            vec![record.hash()]
        );

        // both read revision 1; the daemon's later write must not win
        let decision = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        cli.commit(&record, 1, Some(&decision)).await.unwrap();
        record.set_status(TransactionStatus::Expired, None);
        assert!(matches!(
            daemon.commit(&record, 1, None).await,
            Err(StoreError::Conflict(_))
        ));

        let snapshot = daemon.snapshot(&record.hash()).await.unwrap().unwrap();
        assert_eq!(snapshot.record.status(), TransactionStatus::Signing);
        assert_eq!(snapshot.sign_results, vec![decision]);
    }

    #[tokio::test]
    async fn test_corrupt_row_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open(&temp_dir).await;
        let (_, account) = account();
        store.insert_account(&account).await.unwrap();
        sqlx::query("UPDATE accounts SET body = '{not json'")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.account(&account.script_hash()).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
