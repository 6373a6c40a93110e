//! Sign request ledger
//!
//! Validates owner decisions before they are recorded and decides when
//! the recorded rejections make a transaction impossible to complete.

use std::collections::BTreeSet;
use std::fmt;

use super::account::Account;
use super::error::SettlementError;
use super::transaction::{SignResult, TransactionRecord, TransactionStatus};
use crate::crypto::{transaction_sign_data, verify_with_key, PublicKey};

/// A decision as submitted by a signer
#[derive(Clone, Debug)]
pub struct Decision {
    pub signer: PublicKey,
    pub approved: bool,
    /// Hex signature, required when approving
    pub signature: Option<String>,
}

impl Decision {
    pub fn approve(signer: PublicKey, signature: impl Into<String>) -> Self {
        Self {
            signer,
            approved: true,
            signature: Some(signature.into()),
        }
    }

    pub fn reject(signer: PublicKey) -> Self {
        Self {
            signer,
            approved: false,
            signature: None,
        }
    }
}

/// Why a transaction can no longer be completed
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The fee payer or key-type additional signer refused
    Veto(PublicKey),
    /// Too many owners refused for the threshold to be reachable
    ThresholdUnreachable { rejections: usize, tolerated: usize },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Veto(key) => write!(f, "rejected by required signer {}", key.address()),
            Rejection::ThresholdUnreachable {
                rejections,
                tolerated,
            } => write!(
                f,
                "{}",
                SettlementError::ThresholdUnreachable {
                    rejections: *rejections,
                    tolerated: *tolerated,
                }
            ),
        }
    }
}

/// Read-only view over one transaction's recorded decisions
pub struct SignRequestLedger<'a> {
    record: &'a TransactionRecord,
    account: &'a Account,
    results: &'a [SignResult],
}

impl<'a> SignRequestLedger<'a> {
    pub fn new(
        record: &'a TransactionRecord,
        account: &'a Account,
        results: &'a [SignResult],
    ) -> Self {
        Self {
            record,
            account,
            results,
        }
    }

    pub fn has_decided(&self, signer: &PublicKey) -> bool {
        self.results.iter().any(|r| &r.signer == signer)
    }

    /// Validate a decision and turn it into a `SignResult`
    ///
    /// Nothing is recorded here; the caller persists the result.
    pub fn check(&self, decision: &Decision, network: u32) -> Result<SignResult, SettlementError> {
        let status = self.record.status();
        if status != TransactionStatus::Signing {
            return Err(SettlementError::TransactionClosed(status));
        }
        if !self.record.plan().is_authorized(self.account, &decision.signer) {
            return Err(SettlementError::NotAuthorized(decision.signer.address()));
        }
        if self.has_decided(&decision.signer) {
            return Err(SettlementError::AlreadySubmitted(decision.signer.address()));
        }

        let hash = self.record.hash();
        if !decision.approved {
            return Ok(SignResult::rejection(hash, decision.signer.clone()));
        }

        let signature = decision
            .signature
            .as_deref()
            .ok_or_else(|| SettlementError::InvalidSignature(decision.signer.address()))?;
        let message = transaction_sign_data(network, hash.as_bytes());
        if !verify_with_key(&message, &decision.signer, signature) {
            return Err(SettlementError::InvalidSignature(decision.signer.address()));
        }
        Ok(SignResult::approval(
            hash,
            decision.signer.clone(),
            signature.to_ascii_lowercase(),
        ))
    }

    /// Distinct owners who rejected
    pub fn owner_rejections(&self) -> usize {
        self.results
            .iter()
            .filter(|r| !r.approved && self.account.is_owner(&r.signer))
            .map(|r| &r.signer)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distinct owners who approved
    pub fn owner_approvals(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.approved && self.account.is_owner(&r.signer))
            .map(|r| &r.signer)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// A veto from a required single signer wins outright; otherwise the
    /// transaction is dead once owner rejections exceed `owners - threshold`.
    pub fn rejection(&self) -> Option<Rejection> {
        let plan = self.record.plan();
        if let Some(result) = self
            .results
            .iter()
            .find(|r| !r.approved && plan.veto_holder(&r.signer))
        {
            return Some(Rejection::Veto(result.signer.clone()));
        }

        let rejections = self.owner_rejections();
        let tolerated = self.account.tolerated_rejections();
        if rejections > tolerated {
            return Some(Rejection::ThresholdUnreachable {
                rejections,
                tolerated,
            });
        }
        None
    }
}
