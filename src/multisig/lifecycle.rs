//! Transaction lifecycle
//!
//! ```text
//! Signing ──> Executing ──> Executed
//!    │            └───────> Failed
//!    ├──> Rejected
//!    ├──> Expired
//!    └──> Failed      (submission failed)
//! ```
//!
//! Terminal statuses never change again.

use chrono::Utc;
use log::{info, warn};
use std::time::Duration;

use super::error::SettlementError;
use super::transaction::{TransactionRecord, TransactionStatus};
use crate::rpc::{with_timeout, ChainRpc};

/// Whether the state machine allows `from -> to`
pub fn can_transition(from: TransactionStatus, to: TransactionStatus) -> bool {
    use TransactionStatus::*;
    matches!(
        (from, to),
        (Signing, Executing)
            | (Signing, Rejected)
            | (Signing, Expired)
            | (Signing, Failed)
            | (Executing, Executed)
            | (Executing, Failed)
    )
}

/// Move `record` to `to`, recording `reason` when given
pub fn transition(
    record: &mut TransactionRecord,
    to: TransactionStatus,
    reason: Option<String>,
) -> Result<(), SettlementError> {
    let from = record.status();
    if !can_transition(from, to) {
        return Err(SettlementError::InvalidTransition { from, to });
    }
    match &reason {
        Some(reason) => info!("Transaction {}: {} -> {} ({})", record.hash(), from, to, reason),
        None => info!("Transaction {}: {} -> {}", record.hash(), from, to),
    }
    record.set_status(to, reason);
    Ok(())
}

/// A `Signing` transaction the chain can no longer include
pub fn is_expired(record: &TransactionRecord, block_count: u32) -> bool {
    record.status() == TransactionStatus::Signing && block_count > record.valid_until_block()
}

/// An `Executing` transaction whose last valid block is already sealed
pub fn is_unconfirmable(record: &TransactionRecord, block_count: u32) -> bool {
    record.status() == TransactionStatus::Executing
        && block_count > record.valid_until_block().saturating_add(1)
}

/// Outcome of a broadcast attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Broadcast {
    /// Accepted by the node; `already_known` when it had it already
    Submitted { already_known: bool },
    /// Submission failed; the transaction is now `Failed` and is never
    /// re-sent
    Failed(String),
}

/// Submit a fully witnessed `Signing` transaction
///
/// The record is updated in place; the caller persists it.
pub async fn broadcast(
    chain: &dyn ChainRpc,
    record: &mut TransactionRecord,
    timeout: Duration,
) -> Result<Broadcast, SettlementError> {
    let status = record.status();
    if status != TransactionStatus::Signing {
        return Err(SettlementError::TransactionClosed(status));
    }

    match with_timeout(timeout, chain.send_raw_transaction(record.raw())).await {
        Ok(hash) => {
            if hash != record.hash() {
                warn!(
                    "Node reported hash {} for transaction {}",
                    hash,
                    record.hash()
                );
            }
            transition(record, TransactionStatus::Executing, None)?;
            record.mark_submitted(Utc::now());
            Ok(Broadcast::Submitted {
                already_known: false,
            })
        }
        Err(e) if e.is_already_exists() => {
            info!("Transaction {} already known to the node", record.hash());
            transition(record, TransactionStatus::Executing, None)?;
            record.mark_submitted(Utc::now());
            Ok(Broadcast::Submitted {
                already_known: true,
            })
        }
        Err(e) => {
            let reason = format!("submission failed: {}", e);
            warn!("Submission of {} failed: {}", record.hash(), e);
            transition(record, TransactionStatus::Failed, Some(reason.clone()))?;
            Ok(Broadcast::Failed(reason))
        }
    }
}

/// Re-send an `Executing` transaction that has not confirmed yet
///
/// Errors are logged and otherwise ignored. Returns true when the node
/// accepted or already had the transaction.
pub async fn rebroadcast(
    chain: &dyn ChainRpc,
    record: &mut TransactionRecord,
    timeout: Duration,
) -> bool {
    if record.status() != TransactionStatus::Executing {
        return false;
    }
    match with_timeout(timeout, chain.send_raw_transaction(record.raw())).await {
        Ok(_) => {
            info!("Re-sent transaction {}", record.hash());
            record.mark_submitted(Utc::now());
            true
        }
        Err(e) if e.is_already_exists() => {
            record.mark_submitted(Utc::now());
            true
        }
        Err(e) => {
            warn!("Re-send of {} failed: {}", record.hash(), e);
            false
        }
    }
}
