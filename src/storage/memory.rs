//! In-memory record store
//!
//! Used for tests and dry runs. Mutations are applied to a copy of the
//! state and swapped in only when they succeed.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{RecordStore, StoreError, TransactionSnapshot};
use crate::core::{ScriptHash, TxHash};
use crate::multisig::{Account, SignResult, TransactionRecord, TransactionStatus};

#[derive(Debug, Clone)]
struct StoredTransaction {
    record: TransactionRecord,
    revision: u64,
}

#[derive(Debug, Clone, Default)]
struct StoreState {
    accounts: BTreeMap<ScriptHash, Account>,
    transactions: BTreeMap<TxHash, StoredTransaction>,
    sign_results: BTreeMap<TxHash, Vec<SignResult>>,
}

/// Record store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutate<T, F>(&self, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut StoreState) -> Result<T, StoreError>,
    {
        let mut state = self.state.write();
        let mut next = state.clone();
        let value = apply(&mut next)?;
        *state = next;
        Ok(value)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.mutate(|state| {
            let key = account.script_hash();
            if state.accounts.contains_key(&key) {
                return Err(StoreError::Duplicate(format!("account {}", account.address())));
            }
            state.accounts.insert(key, account.clone());
            Ok(())
        })
    }

    async fn account(&self, script_hash: &ScriptHash) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().accounts.get(script_hash).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.state.read().accounts.values().cloned().collect())
    }

    async fn insert_transaction(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        self.mutate(|state| {
            if !state.accounts.contains_key(&record.account()) {
                return Err(StoreError::NotFound(format!("account {}", record.account())));
            }
            if state.transactions.contains_key(&record.hash()) {
                return Err(StoreError::Duplicate(format!("transaction {}", record.hash())));
            }
            state.transactions.insert(
                record.hash(),
                StoredTransaction {
                    record: record.clone(),
                    revision: 1,
                },
            );
            Ok(())
        })
    }

    async fn snapshot(&self, hash: &TxHash) -> Result<Option<TransactionSnapshot>, StoreError> {
        let state = self.state.read();
        let Some(stored) = state.transactions.get(hash) else {
            return Ok(None);
        };
        let account = stored.record.account();
        let account = state
            .accounts
            .get(&account)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", account)))?;
        Ok(Some(TransactionSnapshot {
            record: stored.record.clone(),
            account: account.clone(),
            sign_results: state.sign_results.get(hash).cloned().unwrap_or_default(),
            revision: stored.revision,
        }))
    }

    async fn commit(
        &self,
        record: &TransactionRecord,
        revision: u64,
        sign_result: Option<&SignResult>,
    ) -> Result<u64, StoreError> {
        self.mutate(|state| {
            let hash = record.hash();
            let stored = state
                .transactions
                .get_mut(&hash)
                .ok_or_else(|| StoreError::NotFound(format!("transaction {}", hash)))?;
            if stored.revision != revision {
                return Err(StoreError::Conflict(hash));
            }
            stored.record = record.clone();
            stored.revision += 1;
            let next = stored.revision;

            if let Some(result) = sign_result {
                if result.transaction != hash {
                    return Err(StoreError::InvalidData(format!(
                        "sign result for {} committed with {}",
                        result.transaction, hash
                    )));
                }
                let results = state.sign_results.entry(hash).or_default();
                if results.iter().any(|r| r.signer == result.signer) {
                    return Err(StoreError::Duplicate(format!(
                        "decision by {} on {}",
                        result.signer, hash
                    )));
                }
                results.push(result.clone());
            }
            Ok(next)
        })
    }

    async fn transactions_with_status(
        &self,
        status: TransactionStatus,
    ) -> Result<Vec<TxHash>, StoreError> {
        let state = self.state.read();
        let mut matching: Vec<&TransactionRecord> = state
            .transactions
            .values()
            .map(|s| &s.record)
            .filter(|r| r.status() == status)
            .collect();
        matching.sort_by_key(|r| r.created_at());
        Ok(matching.into_iter().map(TransactionRecord::hash).collect())
    }

    async fn transactions_for_account(
        &self,
        account: &ScriptHash,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.state.read();
        let mut records: Vec<TransactionRecord> = state
            .transactions
            .values()
            .map(|s| &s.record)
            .filter(|r| &r.account() == account)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at());
        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::Transaction;
    use crate::crypto::KeyPair;
    use crate::multisig::{FeePayer, TransactionKind, WitnessPlan};

    pub(crate) fn sample(account: &Account) -> TransactionRecord {
        let plan = WitnessPlan::new(FeePayer::Account, None);
        let mut tx = Transaction::new(vec![0x40], plan.signers(account), 100);
        tx.witnesses = plan.placeholder_witnesses(account);
        let kind = TransactionKind::Invoke {
            contract: ScriptHash::from_bytes([4; 20]),
            method: "run".to_string(),
        };
        TransactionRecord::new(account, kind, plan, &tx).unwrap()
    }

    pub(crate) fn account() -> (Vec<KeyPair>, Account) {
        let owners: Vec<KeyPair> = (0..2).map(|_| KeyPair::generate()).collect();
        let account = Account::new(
            1,
            owners.iter().map(|k| k.public_key.clone()).collect(),
            None,
        )
        .unwrap();
        (owners, account)
    }

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let store = MemoryStore::new();
        let (owners, account) = account();
        store.insert_account(&account).await.unwrap();
        assert!(matches!(
            store.insert_account(&account).await,
            Err(StoreError::Duplicate(_))
        ));

        let record = sample(&account);
        store.insert_transaction(&record).await.unwrap();
        assert!(matches!(
            store.insert_transaction(&record).await,
            Err(StoreError::Duplicate(_))
        ));

        let rejection = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        assert_eq!(store.commit(&record, 1, Some(&rejection)).await.unwrap(), 2);

        let snapshot = store.snapshot(&record.hash()).await.unwrap().unwrap();
        assert_eq!(snapshot.record, record);
        assert_eq!(snapshot.account, account);
        assert_eq!(snapshot.sign_results, vec![rejection]);
        assert_eq!(snapshot.revision, 2);
        assert!(store.snapshot(&TxHash::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_requires_account() {
        let store = MemoryStore::new();
        let (_, account) = account();
        assert!(matches!(
            store.insert_transaction(&sample(&account)).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_decision_leaves_record_unchanged() {
        let store = MemoryStore::new();
        let (owners, account) = account();
        store.insert_account(&account).await.unwrap();
        let mut record = sample(&account);
        store.insert_transaction(&record).await.unwrap();

        let first = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        let revision = store.commit(&record, 1, Some(&first)).await.unwrap();

        record.set_status(TransactionStatus::Rejected, Some("test".to_string()));
        let again = SignResult::rejection(record.hash(), owners[0].public_key.clone());
        assert!(matches!(
            store.commit(&record, revision, Some(&again)).await,
            Err(StoreError::Duplicate(_))
        ));

        let snapshot = store.snapshot(&record.hash()).await.unwrap().unwrap();
        assert_eq!(snapshot.record.status(), TransactionStatus::Signing);
        assert_eq!(snapshot.sign_results.len(), 1);
        assert_eq!(snapshot.revision, revision);
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let (_, account) = account();
        store.insert_account(&account).await.unwrap();
        let mut record = sample(&account);
        store.insert_transaction(&record).await.unwrap();

        record.set_status(TransactionStatus::Expired, None);
        store.commit(&record, 1, None).await.unwrap();
        assert!(matches!(
            store.commit(&record, 1, None).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_status_index() {
        let store = MemoryStore::new();
        let (_, account) = account();
        store.insert_account(&account).await.unwrap();
        let mut record = sample(&account);
        store.insert_transaction(&record).await.unwrap();
        assert_eq!(
            store
                .transactions_with_status(TransactionStatus::Signing)
                .await
                .unwrap(),
            vec![record.hash()]
        );

        record.set_status(TransactionStatus::Expired, None);
        store.commit(&record, 1, None).await.unwrap();
        assert!(store
            .transactions_with_status(TransactionStatus::Signing)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .transactions_for_account(&account.script_hash())
                .await
                .unwrap()[0]
                .status(),
            TransactionStatus::Expired
        );
    }
}
