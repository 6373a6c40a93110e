//! Settlement engine
//!
//! Coordinates accounts, proposals and owner decisions against a record
//! store and a chain. All mutations of one transaction run under that
//! transaction's lock, so a decision and a reconciliation tick never
//! interleave on the same record.

use chrono::Utc;
use futures::future::join_all;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use super::account::Account;
use super::error::SettlementError;
use super::ledger::{Decision, SignRequestLedger};
use super::lifecycle::{self, Broadcast};
use super::proposal::{decimals_script, invoke_script, transfer_script, ProposalKind, ProposalRequest};
use super::transaction::{SignResult, TransactionRecord, TransactionStatus};
use super::witness::{try_assemble, AdditionalSigner};
use crate::config::SettlementConfig;
use crate::core::{ScriptHash, Transaction, TxHash};
use crate::crypto::{transaction_sign_data, PublicKey};
use crate::rpc::{with_timeout, ChainRpc, RpcError};
use crate::storage::{RecordStore, StoreError, TransactionSnapshot};

// =============================================================================
// Tick Report
// =============================================================================

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Open transactions looked at
    pub checked: usize,
    pub broadcast: usize,
    pub rebroadcast: usize,
    pub executed: usize,
    pub expired: usize,
    pub failed: usize,
    /// Network or store failures; retried next tick
    pub errors: usize,
}

impl TickReport {
    /// Nothing changed and nothing went wrong
    pub fn is_idle(&self) -> bool {
        self.broadcast + self.rebroadcast + self.executed + self.expired + self.failed + self.errors
            == 0
    }

    fn count(&mut self, outcome: TickOutcome) {
        match outcome {
            TickOutcome::Unchanged => {}
            TickOutcome::Broadcast => self.broadcast += 1,
            TickOutcome::Rebroadcast => self.rebroadcast += 1,
            TickOutcome::Executed => self.executed += 1,
            TickOutcome::Expired => self.expired += 1,
            TickOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "checked {}, broadcast {}, re-sent {}, executed {}, expired {}, failed {}, errors {}",
            self.checked,
            self.broadcast,
            self.rebroadcast,
            self.executed,
            self.expired,
            self.failed,
            self.errors
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Unchanged,
    Broadcast,
    Rebroadcast,
    Executed,
    Expired,
    Failed,
}

// =============================================================================
// Engine
// =============================================================================

/// Attempts at a decision when another writer keeps moving the record
const MAX_COMMIT_ATTEMPTS: usize = 3;

/// Multi-signature settlement engine
pub struct SettlementEngine {
    store: Arc<dyn RecordStore>,
    chain: Arc<dyn ChainRpc>,
    config: SettlementConfig,
    locks: Mutex<HashMap<TxHash, Arc<AsyncMutex<()>>>>,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        chain: Arc<dyn ChainRpc>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            chain,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    fn lock_for(&self, hash: &TxHash) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(*hash).or_default().clone()
    }

    /// Drop locks nobody is holding or waiting on
    fn prune_locks(&self) {
        self.locks.lock().retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn call<T, F>(&self, call: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        with_timeout(self.config.rpc_timeout(), call).await
    }

    // -------------------------------------------------------------------------
    // Accounts
    // -------------------------------------------------------------------------

    /// Register an account; registering the same keys and threshold again
    /// returns the existing account
    pub async fn register_account(
        &self,
        threshold: usize,
        public_keys: Vec<PublicKey>,
        label: Option<String>,
    ) -> Result<Account, SettlementError> {
        let account = Account::new(threshold, public_keys, label)?;
        if let Some(existing) = self.store.account(&account.script_hash()).await? {
            return Ok(existing);
        }
        match self.store.insert_account(&account).await {
            Ok(()) => {
                info!(
                    "Registered {} account {}",
                    account.description(),
                    account.address()
                );
                Ok(account)
            }
            Err(StoreError::Duplicate(_)) => self.account(&account.script_hash()).await,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn account(&self, script_hash: &ScriptHash) -> Result<Account, SettlementError> {
        self.store
            .account(script_hash)
            .await?
            .ok_or_else(|| SettlementError::AccountNotFound(script_hash.to_address()))
    }

    pub async fn accounts(&self) -> Result<Vec<Account>, SettlementError> {
        Ok(self.store.accounts().await?)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn snapshot(&self, hash: &TxHash) -> Result<TransactionSnapshot, SettlementError> {
        self.store
            .snapshot(hash)
            .await?
            .ok_or(SettlementError::TransactionNotFound(*hash))
    }

    pub async fn transaction(&self, hash: &TxHash) -> Result<TransactionRecord, SettlementError> {
        Ok(self.snapshot(hash).await?.record)
    }

    pub async fn sign_results(&self, hash: &TxHash) -> Result<Vec<SignResult>, SettlementError> {
        Ok(self.snapshot(hash).await?.sign_results)
    }

    /// Transactions of an account, oldest first
    pub async fn list_transactions(
        &self,
        account: &ScriptHash,
    ) -> Result<Vec<TransactionRecord>, SettlementError> {
        self.account(account).await?;
        Ok(self.store.transactions_for_account(account).await?)
    }

    /// Exact bytes an owner signs to approve `hash`
    pub async fn sign_data(&self, hash: &TxHash) -> Result<Vec<u8>, SettlementError> {
        self.snapshot(hash).await?;
        Ok(transaction_sign_data(
            self.config.network_magic,
            hash.as_bytes(),
        ))
    }

    // -------------------------------------------------------------------------
    // Proposal
    // -------------------------------------------------------------------------

    /// Build, price and store a new transaction in `Signing` status
    pub async fn propose(
        &self,
        request: ProposalRequest,
    ) -> Result<TransactionRecord, SettlementError> {
        let account = self.account(&request.account).await?;
        let plan = request.plan(&account)?;

        let target = request.kind.target();
        self.require_contract(&target).await?;
        if let Some(AdditionalSigner::Contract(hash)) = plan.additional() {
            self.require_contract(hash).await?;
        }

        let script = match &request.kind {
            ProposalKind::Invoke {
                contract,
                method,
                params,
            } => invoke_script(contract, method, params),
            ProposalKind::Transfer { asset, to, amount } => {
                let decimals = self.token_decimals(asset).await?;
                transfer_script(asset, &account.script_hash(), to, amount, decimals)?
            }
        };

        let block_count = self.call(self.chain.block_count()).await?;
        let valid_until = block_count.saturating_add(self.config.valid_block_window);
        let mut tx = Transaction::new(script, plan.signers(&account), valid_until);

        let test_run = self
            .call(self.chain.invoke_script(&tx.script, &tx.signers))
            .await?;
        if !test_run.is_halt() {
            return Err(SettlementError::InvalidProposal(format!(
                "test invocation ended in {}: {}",
                test_run.state,
                test_run.exception.unwrap_or_default()
            )));
        }
        tx.system_fee = test_run.gas_consumed;

        tx.witnesses = plan.placeholder_witnesses(&account);
        let unsigned = tx.to_bytes()?;
        tx.network_fee = self.call(self.chain.calculate_network_fee(&unsigned)).await?;

        let record = TransactionRecord::new(&account, request.record_kind(), plan, &tx)?;
        match self.store.insert_transaction(&record).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(SettlementError::InvalidProposal(format!(
                    "transaction {} already exists",
                    record.hash()
                )))
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "Proposed {} from {} as {} (valid until block {})",
            record.kind(),
            account.address(),
            record.hash(),
            valid_until
        );
        Ok(record)
    }

    async fn require_contract(&self, hash: &ScriptHash) -> Result<(), SettlementError> {
        match self.call(self.chain.contract_state(hash)).await? {
            Some(_) => Ok(()),
            None => Err(SettlementError::InvalidProposal(format!(
                "contract {} is not deployed",
                hash
            ))),
        }
    }

    async fn token_decimals(&self, asset: &ScriptHash) -> Result<u8, SettlementError> {
        let result = self
            .call(self.chain.invoke_script(&decimals_script(asset), &[]))
            .await?;
        let decimals = if result.is_halt() {
            result.first_integer()
        } else {
            None
        };
        decimals
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| {
                SettlementError::InvalidProposal(format!("cannot read decimals of {}", asset))
            })
    }

    // -------------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------------

    /// Validate and record one owner's decision, then re-assemble and
    /// broadcast if every witness is now satisfied
    ///
    /// Validation failures leave the store untouched. A decision on a
    /// transaction already past its deadline expires it instead.
    pub async fn submit_sign_result(
        &self,
        hash: &TxHash,
        decision: Decision,
    ) -> Result<TransactionStatus, SettlementError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let mut attempt = 1;
        loop {
            match self.apply_decision(hash, &decision).await {
                Err(SettlementError::Store(StoreError::Conflict(_)))
                    if attempt < MAX_COMMIT_ATTEMPTS =>
                {
                    warn!("Transaction {} changed underneath a decision, retrying", hash);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn apply_decision(
        &self,
        hash: &TxHash,
        decision: &Decision,
    ) -> Result<TransactionStatus, SettlementError> {
        let TransactionSnapshot {
            mut record,
            account,
            mut sign_results,
            mut revision,
        } = self.snapshot(hash).await?;

        let result = SignRequestLedger::new(&record, &account, &sign_results)
            .check(decision, self.config.network_magic)?;

        match self.call(self.chain.block_count()).await {
            Ok(count) if lifecycle::is_expired(&record, count) => {
                let deadline = record.valid_until_block();
                let reason = format!("block count {} passed deadline {}", count, deadline);
                lifecycle::transition(&mut record, TransactionStatus::Expired, Some(reason))?;
                self.commit(&record, &mut revision, None).await?;
                return Err(SettlementError::Expired(deadline));
            }
            Ok(_) => {}
            Err(e) => warn!("Block count unavailable while signing {}: {}", hash, e),
        }

        info!(
            "{} {} transaction {}",
            result.signer.address(),
            if result.approved { "approved" } else { "rejected" },
            hash
        );
        sign_results.push(result.clone());

        let rejection = SignRequestLedger::new(&record, &account, &sign_results).rejection();
        if let Some(rejection) = rejection {
            lifecycle::transition(
                &mut record,
                TransactionStatus::Rejected,
                Some(rejection.to_string()),
            )?;
            self.commit(&record, &mut revision, Some(&result)).await?;
            return Ok(record.status());
        }

        let ready = reassemble(&mut record, &account, &sign_results);
        self.commit(&record, &mut revision, Some(&result)).await?;
        if ready {
            self.submit(&mut record, &mut revision).await?;
        }
        Ok(record.status())
    }

    async fn commit(
        &self,
        record: &TransactionRecord,
        revision: &mut u64,
        sign_result: Option<&SignResult>,
    ) -> Result<(), SettlementError> {
        match self.store.commit(record, *revision, sign_result).await {
            Ok(next) => {
                *revision = next;
                Ok(())
            }
            Err(StoreError::Duplicate(_)) => Err(SettlementError::AlreadySubmitted(
                sign_result
                    .map(|r| r.signer.address())
                    .unwrap_or_default(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Broadcast a ready transaction and persist the outcome
    ///
    /// If another writer moved the record meanwhile, its stored version wins.
    async fn submit(
        &self,
        record: &mut TransactionRecord,
        revision: &mut u64,
    ) -> Result<Broadcast, SettlementError> {
        let outcome =
            lifecycle::broadcast(self.chain.as_ref(), record, self.config.rpc_timeout()).await?;
        match self.commit(record, revision, None).await {
            Ok(()) => Ok(outcome),
            Err(SettlementError::Store(StoreError::Conflict(hash))) => {
                warn!("Transaction {} was updated elsewhere during broadcast", hash);
                let stored = self.snapshot(&hash).await?;
                *record = stored.record;
                *revision = stored.revision;
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    // -------------------------------------------------------------------------
    // Reconciliation
    // -------------------------------------------------------------------------

    /// One reconciliation pass over every open transaction
    ///
    /// Never fails: per-transaction errors are logged and counted.
    pub async fn reconcile_tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let block_count = match self.call(self.chain.block_count()).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Block count unavailable, skipping deadline checks: {}", e);
                report.errors += 1;
                None
            }
        };

        let mut open = Vec::new();
        for status in [TransactionStatus::Signing, TransactionStatus::Executing] {
            match self.store.transactions_with_status(status).await {
                Ok(hashes) => open.extend(hashes),
                Err(e) => {
                    warn!("Cannot list {} transactions: {}", status, e);
                    report.errors += 1;
                }
            }
        }
        report.checked = open.len();

        let outcomes = join_all(open.iter().map(|hash| self.reconcile_one(hash, block_count))).await;
        for (hash, outcome) in open.iter().zip(outcomes) {
            match outcome {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    warn!("Reconciliation of {} failed: {}", hash, e);
                    report.errors += 1;
                }
            }
        }

        self.prune_locks();
        report
    }

    async fn reconcile_one(
        &self,
        hash: &TxHash,
        block_count: Option<u32>,
    ) -> Result<TickOutcome, SettlementError> {
        let lock = self.lock_for(hash);
        let _guard = lock.lock().await;

        let Some(TransactionSnapshot {
            mut record,
            account,
            sign_results,
            mut revision,
        }) = self.store.snapshot(hash).await?
        else {
            return Ok(TickOutcome::Unchanged);
        };

        match record.status() {
            TransactionStatus::Signing => {
                self.reconcile_signing(&mut record, &mut revision, &account, &sign_results, block_count)
                    .await
            }
            TransactionStatus::Executing => {
                self.reconcile_executing(&mut record, &mut revision, block_count)
                    .await
            }
            _ => Ok(TickOutcome::Unchanged),
        }
    }

    async fn reconcile_signing(
        &self,
        record: &mut TransactionRecord,
        revision: &mut u64,
        account: &Account,
        sign_results: &[SignResult],
        block_count: Option<u32>,
    ) -> Result<TickOutcome, SettlementError> {
        if let Some(count) = block_count {
            if lifecycle::is_expired(record, count) {
                let reason = format!(
                    "block count {} passed deadline {}",
                    count,
                    record.valid_until_block()
                );
                lifecycle::transition(record, TransactionStatus::Expired, Some(reason))?;
                self.commit(record, revision, None).await?;
                return Ok(TickOutcome::Expired);
            }
        }

        let before = record.updated_at();
        let ready = reassemble(record, account, sign_results);
        if record.updated_at() != before {
            self.commit(record, revision, None).await?;
        }
        if !ready {
            return Ok(TickOutcome::Unchanged);
        }

        match self.submit(record, revision).await? {
            Broadcast::Submitted { .. } => Ok(TickOutcome::Broadcast),
            Broadcast::Failed(_) => Ok(TickOutcome::Failed),
        }
    }

    async fn reconcile_executing(
        &self,
        record: &mut TransactionRecord,
        revision: &mut u64,
        block_count: Option<u32>,
    ) -> Result<TickOutcome, SettlementError> {
        let hash = record.hash();
        let height = self.call(self.chain.transaction_height(&hash)).await?;
        if height > 0 {
            lifecycle::transition(record, TransactionStatus::Executed, None)?;
            self.commit(record, revision, None).await?;
            info!("Transaction {} confirmed at height {}", hash, height);
            return Ok(TickOutcome::Executed);
        }

        if let Some(count) = block_count {
            if lifecycle::is_unconfirmable(record, count) {
                let reason = format!("not confirmed by block {}", record.valid_until_block());
                lifecycle::transition(record, TransactionStatus::Failed, Some(reason))?;
                self.commit(record, revision, None).await?;
                return Ok(TickOutcome::Failed);
            }
        }

        let due = match record.submitted_at() {
            Some(at) => Utc::now()
                .signed_duration_since(at)
                .to_std()
                .map(|elapsed| elapsed >= self.config.rebroadcast_after())
                .unwrap_or(false),
            None => true,
        };
        if due && lifecycle::rebroadcast(self.chain.as_ref(), record, self.config.rpc_timeout()).await
        {
            self.commit(record, revision, None).await?;
            return Ok(TickOutcome::Rebroadcast);
        }
        Ok(TickOutcome::Unchanged)
    }
}

/// Rebuild the witnesses of `record` from `results`; true when ready
///
/// Construction errors are logged and leave the record as it was.
fn reassemble(record: &mut TransactionRecord, account: &Account, results: &[SignResult]) -> bool {
    let assembled = record
        .transaction()
        .and_then(|tx| try_assemble(&tx, account, record.plan(), results));
    let assembly = match assembled {
        Ok(assembly) => assembly,
        Err(e) => {
            error!("Cannot assemble {}: {}", record.hash(), e);
            return false;
        }
    };
    if let Err(e) = record.set_transaction(&assembly.transaction) {
        error!("Cannot assemble {}: {}", record.hash(), e);
        return false;
    }
    assembly.ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::multisig::witness::FeePayer;
    use crate::rpc::{InvokeResult, MemoryChain};
    use crate::storage::MemoryStore;

    fn target() -> ScriptHash {
        ScriptHash::from_bytes([0x42; 20])
    }

    struct Fixture {
        owners: Vec<KeyPair>,
        account: Account,
        chain: Arc<MemoryChain>,
        store: Arc<MemoryStore>,
        engine: Arc<SettlementEngine>,
    }

    impl Fixture {
        async fn new(threshold: usize, n: usize) -> Self {
            Self::with_config(threshold, n, SettlementConfig::default()).await
        }

        async fn with_config(threshold: usize, n: usize, config: SettlementConfig) -> Self {
            let chain = Arc::new(MemoryChain::new(100));
            chain.deploy_contract(target(), "Target");
            let store = Arc::new(MemoryStore::new());
            let engine = Arc::new(SettlementEngine::new(store.clone(), chain.clone(), config));

            let mut owners: Vec<KeyPair> = (0..n).map(|_| KeyPair::generate()).collect();
            owners.sort_by(|a, b| a.public_key.cmp(&b.public_key));
            let account = engine
                .register_account(
                    threshold,
                    owners.iter().map(|k| k.public_key.clone()).collect(),
                    Some("treasury".to_string()),
                )
                .await
                .unwrap();
            Self {
                owners,
                account,
                chain,
                store,
                engine,
            }
        }

        fn request(&self, fee_payer: FeePayer, additional: Option<AdditionalSigner>) -> ProposalRequest {
            ProposalRequest {
                account: self.account.script_hash(),
                proposer: self.owners[0].public_key.clone(),
                kind: ProposalKind::Invoke {
                    contract: target(),
                    method: "execute".to_string(),
                    params: Vec::new(),
                },
                fee_payer,
                additional,
            }
        }

        async fn propose(&self, fee_payer: FeePayer) -> TxHash {
            self.engine
                .propose(self.request(fee_payer, None))
                .await
                .unwrap()
                .hash()
        }

        async fn approve(&self, signer: &KeyPair, hash: &TxHash) -> Decision {
            let data = self.engine.sign_data(hash).await.unwrap();
            Decision::approve(signer.public_key.clone(), signer.sign_hex(&data))
        }

        async fn submit(&self, hash: &TxHash, decision: Decision) -> TransactionStatus {
            self.engine.submit_sign_result(hash, decision).await.unwrap()
        }

        async fn status(&self, hash: &TxHash) -> TransactionStatus {
            self.engine.transaction(hash).await.unwrap().status()
        }
    }

    #[tokio::test]
    async fn test_register_account_is_idempotent() {
        let f = Fixture::new(2, 3).await;
        let again = f
            .engine
            .register_account(2, f.account.public_keys().to_vec(), None)
            .await
            .unwrap();
        assert_eq!(again, f.account);
        assert_eq!(again.label(), Some("treasury"));
        assert_eq!(f.engine.accounts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_propose_prices_and_stores() {
        let f = Fixture::new(2, 3).await;
        let record = f
            .engine
            .propose(f.request(FeePayer::Account, None))
            .await
            .unwrap();
        assert_eq!(record.status(), TransactionStatus::Signing);
        assert_eq!(record.valid_until_block(), 100 + 5760);

        let tx = record.transaction().unwrap();
        assert_eq!(tx.system_fee, 997_775);
        assert!(tx.network_fee > 1_000_000);
        assert_eq!(tx.signers.len(), 1);
        assert_eq!(tx.witnesses.len(), 1);
        assert!(tx.witnesses[0].invocation.is_empty());
        assert_eq!(tx.witnesses[0].verification, f.account.verification_script());

        let listed = f.engine.list_transactions(&f.account.script_hash()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].hash(), record.hash());
    }

    #[tokio::test]
    async fn test_propose_transfer_uses_token_decimals() {
        let f = Fixture::new(2, 3).await;
        let request = ProposalRequest {
            kind: ProposalKind::Transfer {
                asset: target(),
                to: ScriptHash::from_bytes([7; 20]),
                amount: "2.5".to_string(),
            },
            ..f.request(FeePayer::Account, None)
        };
        let record = f.engine.propose(request).await.unwrap();
        let tx = record.transaction().unwrap();
        let expected = transfer_script(
            &target(),
            &f.account.script_hash(),
            &ScriptHash::from_bytes([7; 20]),
            "2.5",
            8,
        )
        .unwrap();
        assert_eq!(tx.script, expected);
    }

    #[tokio::test]
    async fn test_propose_rejections() {
        let f = Fixture::new(2, 3).await;

        let outsider = ProposalRequest {
            proposer: KeyPair::generate().public_key,
            ..f.request(FeePayer::Account, None)
        };
        assert!(matches!(
            f.engine.propose(outsider).await,
            Err(SettlementError::NotAuthorized(_))
        ));

        let undeployed = f.request(
            FeePayer::Account,
            Some(AdditionalSigner::Contract(ScriptHash::from_bytes([9; 20]))),
        );
        assert!(matches!(
            f.engine.propose(undeployed).await,
            Err(SettlementError::InvalidProposal(_))
        ));

        f.chain.set_invoke_result(InvokeResult {
            state: "FAULT".to_string(),
            gas_consumed: 0,
            exception: Some("insufficient balance".to_string()),
            stack: Vec::new(),
        });
        assert!(matches!(
            f.engine.propose(f.request(FeePayer::Account, None)).await,
            Err(SettlementError::InvalidProposal(_))
        ));

        let unknown = ProposalRequest {
            account: ScriptHash::from_bytes([1; 20]),
            ..f.request(FeePayer::Account, None)
        };
        assert!(matches!(
            f.engine.propose(unknown).await,
            Err(SettlementError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_propose_with_contract_signer() {
        let f = Fixture::new(2, 3).await;
        let verifier = ScriptHash::from_bytes([0x77; 20]);
        f.chain.deploy_contract(verifier, "Verifier");
        let record = f
            .engine
            .propose(f.request(FeePayer::Account, Some(AdditionalSigner::Contract(verifier))))
            .await
            .unwrap();
        let tx = record.transaction().unwrap();
        assert_eq!(tx.signers.len(), 2);
        assert_eq!(tx.signers[1].account, verifier);
        assert!(tx.witnesses[1].verification.is_empty());

        // contract witnesses need no signature: the quorum alone completes it
        f.submit(&record.hash(), f.approve(&f.owners[0], &record.hash()).await).await;
        let status = f
            .submit(&record.hash(), f.approve(&f.owners[1], &record.hash()).await)
            .await;
        assert_eq!(status, TransactionStatus::Executing);
    }

    #[tokio::test]
    async fn test_two_of_three_broadcasts_on_second_approval() {
        let f = Fixture::new(2, 3).await;
        let hash = f.propose(FeePayer::Account).await;

        let status = f.submit(&hash, f.approve(&f.owners[2], &hash).await).await;
        assert_eq!(status, TransactionStatus::Signing);
        assert_eq!(f.chain.submission_count(), 0);

        let status = f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        assert_eq!(status, TransactionStatus::Executing);
        assert!(f.chain.is_pooled(&hash));

        let sent = Transaction::from_bytes(&f.chain.submissions()[0]).unwrap();
        assert_eq!(sent.hash().unwrap(), hash);
        // two PUSHDATA1 64-byte signatures
        assert_eq!(sent.witnesses[0].invocation.len(), 2 * 66);
        assert_eq!(sent.witnesses[0].verification, f.account.verification_script());

        let record = f.engine.transaction(&hash).await.unwrap();
        assert!(record.submitted_at().is_some());
        assert_eq!(record.raw(), f.chain.submissions()[0].as_slice());
    }

    #[tokio::test]
    async fn test_owner_fee_payer_slot_required() {
        let f = Fixture::new(2, 3).await;
        let payer = &f.owners[2];
        let hash = f.propose(FeePayer::Owner(payer.public_key.clone())).await;

        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        let status = f.submit(&hash, f.approve(&f.owners[1], &hash).await).await;
        assert_eq!(status, TransactionStatus::Signing);

        let status = f.submit(&hash, f.approve(payer, &hash).await).await;
        assert_eq!(status, TransactionStatus::Executing);
        let sent = Transaction::from_bytes(&f.chain.submissions()[0]).unwrap();
        assert_eq!(sent.witnesses.len(), 2);
        assert_eq!(sent.witnesses[0].invocation.len(), 66);
    }

    #[tokio::test]
    async fn test_fee_payer_rejection_is_a_veto() {
        let f = Fixture::new(2, 3).await;
        let payer = &f.owners[2];
        let hash = f.propose(FeePayer::Owner(payer.public_key.clone())).await;

        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        f.submit(&hash, f.approve(&f.owners[1], &hash).await).await;
        let status = f
            .submit(&hash, Decision::reject(payer.public_key.clone()))
            .await;
        assert_eq!(status, TransactionStatus::Rejected);
        assert!(f
            .engine
            .transaction(&hash)
            .await
            .unwrap()
            .failure_reason()
            .is_some());
        assert_eq!(f.chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_threshold() {
        let f = Fixture::new(2, 3).await;
        let hash = f.propose(FeePayer::Account).await;

        let status = f
            .submit(&hash, Decision::reject(f.owners[0].public_key.clone()))
            .await;
        assert_eq!(status, TransactionStatus::Signing);

        let status = f
            .submit(&hash, Decision::reject(f.owners[1].public_key.clone()))
            .await;
        assert_eq!(status, TransactionStatus::Rejected);

        let late = f
            .engine
            .submit_sign_result(&hash, f.approve(&f.owners[2], &hash).await)
            .await;
        assert!(matches!(
            late,
            Err(SettlementError::TransactionClosed(TransactionStatus::Rejected))
        ));
    }

    #[tokio::test]
    async fn test_validation_errors_leave_store_untouched() {
        let f = Fixture::new(2, 3).await;
        let hash = f.propose(FeePayer::Account).await;
        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        let before = f.engine.snapshot(&hash).await.unwrap();

        let duplicate = f
            .engine
            .submit_sign_result(&hash, f.approve(&f.owners[0], &hash).await)
            .await;
        assert!(matches!(duplicate, Err(SettlementError::AlreadySubmitted(_))));

        let outsider = KeyPair::generate();
        let unauthorized = f
            .engine
            .submit_sign_result(&hash, f.approve(&outsider, &hash).await)
            .await;
        assert!(matches!(unauthorized, Err(SettlementError::NotAuthorized(_))));

        let forged = Decision::approve(
            f.owners[1].public_key.clone(),
            f.owners[1].sign_hex(b"something else"),
        );
        let invalid = f.engine.submit_sign_result(&hash, forged).await;
        assert!(matches!(invalid, Err(SettlementError::InvalidSignature(_))));

        let after = f.engine.snapshot(&hash).await.unwrap();
        assert_eq!(after.sign_results, before.sign_results);
        assert_eq!(after.record, before.record);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let f = Fixture::new(1, 1).await;
        let missing = TxHash::from_bytes([5; 32]);
        assert!(matches!(
            f.engine
                .submit_sign_result(&missing, Decision::reject(f.owners[0].public_key.clone()))
                .await,
            Err(SettlementError::TransactionNotFound(_))
        ));
        assert!(f.engine.sign_data(&missing).await.is_err());
    }

    #[tokio::test]
    async fn test_tick_expires_unsigned_transaction() {
        let f = Fixture::new(2, 3).await;
        let hash = f.propose(FeePayer::Account).await;
        let deadline = f.engine.transaction(&hash).await.unwrap().valid_until_block();

        f.chain.set_block_count(deadline);
        let report = f.engine.reconcile_tick().await;
        assert!(report.is_idle());
        assert_eq!(f.status(&hash).await, TransactionStatus::Signing);

        f.chain.set_block_count(deadline + 1);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.expired, 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Expired);

        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.checked, 0);
    }

    #[tokio::test]
    async fn test_refused_submission_fails_without_retry() {
        let f = Fixture::new(1, 2).await;
        let hash = f.propose(FeePayer::Account).await;
        f.chain.fail_sends(Some(RpcError::Node {
            code: -500,
            message: "InsufficientFunds".to_string(),
        }));

        let status = f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        assert_eq!(status, TransactionStatus::Failed);
        let reason = f.engine.transaction(&hash).await.unwrap().failure_reason().map(str::to_string);
        assert!(reason.map_or(false, |r| !r.is_empty()));
        assert_eq!(f.chain.submission_count(), 1);

        f.chain.fail_sends(None);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.checked, 0);
        assert_eq!(f.chain.submission_count(), 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_send_errors_fail_and_are_never_resent() {
        let errors = [
            RpcError::Transport("connection reset".to_string()),
            RpcError::Timeout(std::time::Duration::from_secs(1)),
        ];
        for error in errors {
            let f = Fixture::new(1, 2).await;
            let hash = f.propose(FeePayer::Account).await;
            f.chain.fail_sends(Some(error));

            let status = f.submit(&hash, f.approve(&f.owners[1], &hash).await).await;
            assert_eq!(status, TransactionStatus::Failed);
            let record = f.engine.transaction(&hash).await.unwrap();
            assert!(record
                .failure_reason()
                .map_or(false, |r| r.starts_with("submission failed")));
            assert!(record.submitted_at().is_none());
            assert_eq!(f.chain.submission_count(), 1);

            f.chain.fail_sends(None);
            let report = f.engine.reconcile_tick().await;
            assert_eq!(report.checked, 0);
            assert_eq!(f.chain.submission_count(), 1);
            assert_eq!(f.status(&hash).await, TransactionStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_decision_past_deadline_expires() {
        let f = Fixture::new(1, 2).await;
        let hash = f.propose(FeePayer::Account).await;
        let deadline = f.engine.transaction(&hash).await.unwrap().valid_until_block();
        let decision = f.approve(&f.owners[0], &hash).await;

        f.chain.set_block_count(deadline + 1);
        let result = f.engine.submit_sign_result(&hash, decision).await;
        assert!(matches!(result, Err(SettlementError::Expired(block)) if block == deadline));
        assert_eq!(f.status(&hash).await, TransactionStatus::Expired);
        assert!(f.engine.sign_results(&hash).await.unwrap().is_empty());
        assert_eq!(f.chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_tick_confirms_executing() {
        let f = Fixture::new(1, 1).await;
        let hash = f.propose(FeePayer::Account).await;
        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;

        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.executed, 0);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executing);

        f.chain.advance(1);
        f.chain.confirm(&hash);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.executed, 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executed);
    }

    #[tokio::test]
    async fn test_unconfirmed_past_deadline_fails() {
        let f = Fixture::new(1, 1).await;
        let hash = f.propose(FeePayer::Account).await;
        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        let deadline = f.engine.transaction(&hash).await.unwrap().valid_until_block();

        f.chain.set_block_count(deadline + 2);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn test_rebroadcast_after_delay() {
        let config = SettlementConfig {
            rebroadcast_after_secs: 0,
            ..Default::default()
        };
        let f = Fixture::with_config(1, 1, config).await;
        let hash = f.propose(FeePayer::Account).await;
        f.submit(&hash, f.approve(&f.owners[0], &hash).await).await;
        assert_eq!(f.chain.submission_count(), 1);

        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.rebroadcast, 1);
        assert_eq!(f.chain.submission_count(), 2);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executing);

        f.chain
            .fail_sends(Some(RpcError::Transport("down".to_string())));
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.rebroadcast, 0);
        assert_eq!(report.errors, 0);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executing);
    }

    #[tokio::test]
    async fn test_query_failures_do_not_change_state() {
        let f = Fixture::new(1, 1).await;
        let signing = f.propose(FeePayer::Account).await;
        let executing = f.propose(FeePayer::Account).await;
        f.submit(&executing, f.approve(&f.owners[0], &executing).await).await;

        f.chain
            .fail_queries(Some(RpcError::Timeout(std::time::Duration::from_secs(1))));
        f.chain.set_block_count(1_000_000);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.checked, 2);
        assert!(report.errors >= 2);
        assert_eq!(f.status(&signing).await, TransactionStatus::Signing);
        assert_eq!(f.status(&executing).await, TransactionStatus::Executing);

        f.chain.fail_queries(None);
        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_tick_catches_up_after_missed_broadcast() {
        let f = Fixture::new(2, 2).await;
        let hash = f.propose(FeePayer::Account).await;

        // decisions recorded straight into the store, as if the process
        // stopped before broadcasting
        let snapshot = f.engine.snapshot(&hash).await.unwrap();
        let mut revision = snapshot.revision;
        for owner in &f.owners {
            let data = f.engine.sign_data(&hash).await.unwrap();
            let result = SignResult::approval(hash, owner.public_key.clone(), owner.sign_hex(&data));
            revision = f
                .store
                .commit(&snapshot.record, revision, Some(&result))
                .await
                .unwrap();
        }

        let report = f.engine.reconcile_tick().await;
        assert_eq!(report.broadcast, 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executing);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decisions_broadcast_once() {
        let f = Fixture::new(3, 5).await;
        let hash = f.propose(FeePayer::Account).await;

        let mut decisions = Vec::new();
        for owner in &f.owners {
            decisions.push(f.approve(owner, &hash).await);
        }
        let handles: Vec<_> = decisions
            .into_iter()
            .map(|decision| {
                let engine = f.engine.clone();
                tokio::spawn(async move { engine.submit_sign_result(&hash, decision).await })
            })
            .collect();

        let tick_engine = f.engine.clone();
        let tick = tokio::spawn(async move { tick_engine.reconcile_tick().await });

        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(
                    e,
                    SettlementError::TransactionClosed(TransactionStatus::Executing)
                )),
            }
        }
        tick.await.unwrap();

        assert_eq!(accepted, 3);
        assert_eq!(f.chain.submission_count(), 1);
        assert_eq!(f.status(&hash).await, TransactionStatus::Executing);
        assert_eq!(f.engine.sign_results(&hash).await.unwrap().len(), 3);
    }
}
