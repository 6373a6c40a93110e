//! CLI commands for the settlement engine
//!
//! Implements all command handlers for the CLI interface.

use std::sync::Arc;

use crate::config::SettlementConfig;
use crate::core::{ContractParameter, ScriptHash, TxHash};
use crate::crypto::{is_valid_public_key_hex, PublicKey};
use crate::multisig::{
    AdditionalSigner, Decision, FeePayer, ProposalKind, ProposalRequest, SettlementEngine,
    TransactionRecord,
};
use crate::rpc::JsonRpcChain;
use crate::service::ReconciliationLoop;
use crate::storage::SqliteStore;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Application state
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub store: Arc<SqliteStore>,
    pub config: SettlementConfig,
}

impl AppState {
    /// Open the record store and connect the chain client
    pub async fn new(config: SettlementConfig) -> CliResult<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(config.storage()).await?);
        let chain = Arc::new(JsonRpcChain::new(&config.rpc_url, config.rpc_timeout())?);
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            chain,
            config.clone(),
        ));
        Ok(Self {
            engine,
            store,
            config,
        })
    }
}

// =============================================================================
// Argument parsing
// =============================================================================

/// Comma-separated compressed public keys
pub fn parse_keys(input: &str) -> CliResult<Vec<PublicKey>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(|k| PublicKey::from_hex(k).map_err(Into::into))
        .collect()
}

/// `account` (or nothing) for the account itself, otherwise an owner key
pub fn parse_fee_payer(input: Option<&str>) -> CliResult<FeePayer> {
    match input.map(str::trim) {
        None | Some("") | Some("account") => Ok(FeePayer::Account),
        Some(key) => Ok(FeePayer::Owner(PublicKey::from_hex(key)?)),
    }
}

/// A public key for a single-signature signer, otherwise a contract hash
/// or address
pub fn parse_additional(input: Option<&str>) -> CliResult<Option<AdditionalSigner>> {
    let Some(value) = input.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if is_valid_public_key_hex(value) {
        return Ok(Some(AdditionalSigner::Key(PublicKey::from_hex(value)?)));
    }
    Ok(Some(AdditionalSigner::Contract(ScriptHash::parse_any(value)?)))
}

async fn print_record(state: &AppState, record: &TransactionRecord) -> CliResult<()> {
    let results = state.engine.sign_results(&record.hash()).await?;
    let approvals = results.iter().filter(|r| r.approved).count();
    println!("   {} [{}]", record.hash(), record.status());
    println!("   ├─ {}", record.kind());
    println!(
        "   ├─ Decisions: {} approved, {} rejected",
        approvals,
        results.len() - approvals
    );
    println!("   └─ Valid until block {}", record.valid_until_block());
    Ok(())
}

// =============================================================================
// Accounts
// =============================================================================

/// Register a multi-signature account
pub async fn cmd_account_create(
    state: &AppState,
    threshold: usize,
    keys: &str,
    label: Option<String>,
) -> CliResult<()> {
    let keys = parse_keys(keys)?;
    let account = state.engine.register_account(threshold, keys, label).await?;

    println!("✅ Account registered!");
    println!("   📫 Address: {}", account.address());
    println!("   🔐 Policy: {}", account.description());
    println!("   #️⃣  Script hash: {}", account.script_hash());
    for (i, owner) in account.owner_addresses().iter().enumerate() {
        println!("   👤 Owner {}: {}", i + 1, owner);
    }
    Ok(())
}

/// Show one account
pub async fn cmd_account_show(state: &AppState, address: &str) -> CliResult<()> {
    let account = state.engine.account(&ScriptHash::parse_any(address)?).await?;

    println!("🔐 Account {}", account.address());
    if let Some(label) = account.label() {
        println!("   Label: {}", label);
    }
    println!("   Policy: {}", account.description());
    println!("   Created: {}", account.created_at());
    println!("   Verification script: {}", hex::encode(account.verification_script()));
    for key in account.public_keys() {
        println!("   👤 {} ({})", key.address(), key);
    }
    Ok(())
}

/// List every registered account
pub async fn cmd_account_list(state: &AppState) -> CliResult<()> {
    let accounts = state.engine.accounts().await?;
    if accounts.is_empty() {
        println!("🔐 No accounts registered yet.");
        return Ok(());
    }
    println!("🔐 Accounts ({}):", accounts.len());
    for account in accounts {
        println!(
            "   {} {} {}",
            account.address(),
            account.description(),
            account.label().unwrap_or_default()
        );
    }
    Ok(())
}

// =============================================================================
// Transactions
// =============================================================================

/// List the transactions of an account
pub async fn cmd_tx_list(state: &AppState, address: &str) -> CliResult<()> {
    let records = state
        .engine
        .list_transactions(&ScriptHash::parse_any(address)?)
        .await?;
    if records.is_empty() {
        println!("📭 No transactions for {}", address);
        return Ok(());
    }
    println!("📜 Transactions ({}):", records.len());
    for record in &records {
        print_record(state, record).await?;
    }
    Ok(())
}

/// Show one transaction with every decision
pub async fn cmd_tx_show(state: &AppState, hash: &str) -> CliResult<()> {
    let hash: TxHash = hash.parse()?;
    let snapshot = state.engine.snapshot(&hash).await?;
    let record = &snapshot.record;

    println!("📜 Transaction {}", record.hash());
    println!("   Account: {}", snapshot.account.address());
    println!("   Action: {}", record.kind());
    println!("   Status: {}", record.status());
    if let Some(reason) = record.failure_reason() {
        println!("   Reason: {}", reason);
    }
    println!("   Valid until block: {}", record.valid_until_block());
    println!("   Created: {}", record.created_at());
    if let Some(at) = record.submitted_at() {
        println!("   Submitted: {}", at);
    }
    for result in &snapshot.sign_results {
        let mark = if result.approved { "✅" } else { "❌" };
        println!("   {} {} at {}", mark, result.signer.address(), result.submitted_at);
    }
    println!("   Raw: {}", hex::encode(record.raw()));
    Ok(())
}

/// Print the bytes an owner signs for a transaction
pub async fn cmd_sign_data(state: &AppState, hash: &str) -> CliResult<()> {
    let hash: TxHash = hash.parse()?;
    let data = state.engine.sign_data(&hash).await?;
    println!("{}", hex::encode(data));
    Ok(())
}

/// Submit an approval or rejection
pub async fn cmd_sign(
    state: &AppState,
    hash: &str,
    signer: &str,
    approve: bool,
    signature: Option<String>,
) -> CliResult<()> {
    let hash: TxHash = hash.parse()?;
    let signer = PublicKey::from_hex(signer)?;
    let decision = if approve {
        let signature = signature.ok_or("--signature is required to approve")?;
        Decision::approve(signer, signature)
    } else {
        Decision::reject(signer)
    };

    let status = state.engine.submit_sign_result(&hash, decision).await?;
    println!("✅ Decision recorded for {}", hash);
    println!("   Status: {}", status);
    Ok(())
}

/// Propose a NEP-17 transfer out of an account
#[allow(clippy::too_many_arguments)]
pub async fn cmd_propose_transfer(
    state: &AppState,
    account: &str,
    proposer: &str,
    asset: &str,
    to: &str,
    amount: &str,
    fee_payer: Option<&str>,
    additional: Option<&str>,
) -> CliResult<()> {
    let request = ProposalRequest {
        account: ScriptHash::parse_any(account)?,
        proposer: PublicKey::from_hex(proposer)?,
        kind: ProposalKind::Transfer {
            asset: ScriptHash::parse_any(asset)?,
            to: ScriptHash::parse_any(to)?,
            amount: amount.to_string(),
        },
        fee_payer: parse_fee_payer(fee_payer)?,
        additional: parse_additional(additional)?,
    };
    propose(state, request).await
}

/// Propose a contract invocation from an account
#[allow(clippy::too_many_arguments)]
pub async fn cmd_propose_invoke(
    state: &AppState,
    account: &str,
    proposer: &str,
    contract: &str,
    method: &str,
    params: Option<&str>,
    fee_payer: Option<&str>,
    additional: Option<&str>,
) -> CliResult<()> {
    let params = match params {
        Some(json) => ContractParameter::list_from_json(&serde_json::from_str(json)?)?,
        None => Vec::new(),
    };
    let request = ProposalRequest {
        account: ScriptHash::parse_any(account)?,
        proposer: PublicKey::from_hex(proposer)?,
        kind: ProposalKind::Invoke {
            contract: ScriptHash::parse_any(contract)?,
            method: method.to_string(),
            params,
        },
        fee_payer: parse_fee_payer(fee_payer)?,
        additional: parse_additional(additional)?,
    };
    propose(state, request).await
}

async fn propose(state: &AppState, request: ProposalRequest) -> CliResult<()> {
    let record = state.engine.propose(request).await?;
    let tx = record.transaction()?;

    println!("✅ Transaction proposed!");
    println!("   #️⃣  Hash: {}", record.hash());
    println!("   📝 {}", record.kind());
    println!("   ⛽ System fee: {}", tx.system_fee);
    println!("   ⛽ Network fee: {}", tx.network_fee);
    println!("   ⏳ Valid until block: {}", record.valid_until_block());
    println!(
        "   ✍️  Owners sign: {}",
        hex::encode(state.engine.sign_data(&record.hash()).await?)
    );
    Ok(())
}

/// Run the reconciliation loop until Ctrl+C
pub async fn cmd_run(state: &AppState) -> CliResult<()> {
    let stats = state.store.stats().await?;
    println!("🔄 Reconciling against {}", state.config.rpc_url);
    println!(
        "   {} accounts, {} transactions, every {}s",
        stats.accounts, stats.transactions, state.config.reconcile_interval_secs
    );

    let handle = ReconciliationLoop::new(state.engine.clone()).spawn();
    tokio::signal::ctrl_c().await?;
    println!("\n📴 Shutting down...");
    let ticks = handle.stop().await;
    println!("✅ Stopped after {} ticks", ticks);
    Ok(())
}
