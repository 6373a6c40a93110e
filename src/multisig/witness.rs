//! Witness planning and assembly
//!
//! A `WitnessPlan` fixes which witness slots a transaction needs. Assembly
//! rebuilds every slot from the current set of approvals, so its output is
//! a pure function of that set: repeated or reordered calls produce the
//! same bytes.

use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::Account;
use super::error::SettlementError;
use super::transaction::SignResult;
use crate::core::{Contract, ScriptBuilder, ScriptHash, Signer, Transaction, Witness};
use crate::crypto::keys::{PublicKey, SIGNATURE_LEN};

// =============================================================================
// Plan
// =============================================================================

/// Who pays the network and system fees
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum FeePayer {
    /// The multi-signature account pays
    Account,
    /// One owner pays from their own single-signature account
    Owner(PublicKey),
}

/// Extra authorizer required beyond the owner quorum
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AdditionalSigner {
    /// A single-signature account
    Key(PublicKey),
    /// A deployed contract verified by its own `verify` method
    Contract(ScriptHash),
}

/// The closed set of witness layouts a transaction can have
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum WitnessPlan {
    FeePayerOnly {
        fee_payer: FeePayer,
    },
    FeePayerPlusAdditionalSigner {
        fee_payer: FeePayer,
        additional: AdditionalSigner,
    },
}

/// One required witness
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessSlot {
    /// Owner paying fees with a signature account
    FeePayer(PublicKey),
    /// The multi-signature account itself
    Quorum,
    AdditionalKey(PublicKey),
    AdditionalContract(ScriptHash),
}

impl WitnessSlot {
    pub fn script_hash(&self, account: &Account) -> ScriptHash {
        match self {
            WitnessSlot::FeePayer(key) | WitnessSlot::AdditionalKey(key) => {
                Contract::signature(key).script_hash()
            }
            WitnessSlot::Quorum => account.script_hash(),
            WitnessSlot::AdditionalContract(hash) => *hash,
        }
    }

    /// Verification script, empty for contract signers
    pub fn verification_script(&self, account: &Account) -> Vec<u8> {
        match self {
            WitnessSlot::FeePayer(key) | WitnessSlot::AdditionalKey(key) => {
                Contract::signature(key).script().to_vec()
            }
            WitnessSlot::Quorum => account.verification_script().to_vec(),
            WitnessSlot::AdditionalContract(_) => Vec::new(),
        }
    }
}

impl WitnessPlan {
    pub fn new(fee_payer: FeePayer, additional: Option<AdditionalSigner>) -> Self {
        match additional {
            None => WitnessPlan::FeePayerOnly { fee_payer },
            Some(additional) => WitnessPlan::FeePayerPlusAdditionalSigner {
                fee_payer,
                additional,
            },
        }
    }

    pub fn fee_payer(&self) -> &FeePayer {
        match self {
            WitnessPlan::FeePayerOnly { fee_payer }
            | WitnessPlan::FeePayerPlusAdditionalSigner { fee_payer, .. } => fee_payer,
        }
    }

    pub fn additional(&self) -> Option<&AdditionalSigner> {
        match self {
            WitnessPlan::FeePayerOnly { .. } => None,
            WitnessPlan::FeePayerPlusAdditionalSigner { additional, .. } => Some(additional),
        }
    }

    /// Slots in signer order: fee payer, account, additional signer
    pub fn slots(&self) -> Vec<WitnessSlot> {
        let mut slots = Vec::with_capacity(3);
        if let FeePayer::Owner(key) = self.fee_payer() {
            slots.push(WitnessSlot::FeePayer(key.clone()));
        }
        slots.push(WitnessSlot::Quorum);
        match self.additional() {
            Some(AdditionalSigner::Key(key)) => slots.push(WitnessSlot::AdditionalKey(key.clone())),
            Some(AdditionalSigner::Contract(hash)) => {
                slots.push(WitnessSlot::AdditionalContract(*hash))
            }
            None => {}
        }
        slots
    }

    /// Transaction signers, all limited to the entry script
    pub fn signers(&self, account: &Account) -> Vec<Signer> {
        self.slots()
            .iter()
            .map(|slot| Signer::called_by_entry(slot.script_hash(account)))
            .collect()
    }

    /// Unsigned witnesses: verification script set, invocation empty
    pub fn placeholder_witnesses(&self, account: &Account) -> Vec<Witness> {
        self.slots()
            .iter()
            .map(|slot| Witness::new(Vec::new(), slot.verification_script(account)))
            .collect()
    }

    /// Keys allowed to submit a decision: the owners plus a key-type
    /// additional signer
    pub fn is_authorized(&self, account: &Account, key: &PublicKey) -> bool {
        account.is_owner(key) || matches!(self.additional(), Some(AdditionalSigner::Key(k)) if k == key)
    }

    /// Parties whose single rejection makes the transaction impossible
    pub fn veto_holder(&self, key: &PublicKey) -> bool {
        matches!(self.fee_payer(), FeePayer::Owner(k) if k == key)
            || matches!(self.additional(), Some(AdditionalSigner::Key(k)) if k == key)
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Result of an assembly pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assembly {
    pub transaction: Transaction,
    /// Every slot is satisfied
    pub ready: bool,
    /// Owners whose signatures were placed in the quorum witness
    pub quorum_signers: Vec<PublicKey>,
}

fn push_signatures<'a>(signatures: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    for signature in signatures {
        sb.emit_push_bytes(signature);
    }
    sb.into_bytes()
}

/// Rebuild every witness of `tx` from the approvals in `results`
///
/// Each owner contributes at most one signature; when more than the
/// threshold have approved, the lowest keys in contract order are used.
/// A slot whose account is missing from the signers is a construction
/// error and leaves the transaction untouched.
pub fn try_assemble(
    tx: &Transaction,
    account: &Account,
    plan: &WitnessPlan,
    results: &[SignResult],
) -> Result<Assembly, SettlementError> {
    let slots = plan.slots();
    if tx.signers.len() != slots.len() {
        return Err(SettlementError::Construction(format!(
            "transaction has {} signers, plan requires {}",
            tx.signers.len(),
            slots.len()
        )));
    }

    // One signature per approving key; ties resolved by byte order so the
    // choice never depends on arrival order.
    let mut approvals: BTreeMap<PublicKey, Vec<u8>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.approved) {
        let Some(signature) = result.signature_bytes() else {
            warn!(
                "Ignoring unreadable signature from {} on {}",
                result.signer.address(),
                result.transaction
            );
            continue;
        };
        if signature.len() != SIGNATURE_LEN {
            warn!(
                "Ignoring {}-byte signature from {} on {}",
                signature.len(),
                result.signer.address(),
                result.transaction
            );
            continue;
        }
        match approvals.get(&result.signer) {
            Some(existing) if *existing <= signature => {}
            _ => {
                approvals.insert(result.signer.clone(), signature);
            }
        }
    }

    let mut witnesses = vec![Witness::default(); tx.signers.len()];
    let mut ready = true;
    let mut quorum_signers = Vec::new();

    for slot in &slots {
        let hash = slot.script_hash(account);
        let index = tx.signer_index(&hash).ok_or_else(|| {
            let address = hash.to_address();
            error!(
                "Construction error: signer {} missing from transaction {:?}",
                address,
                tx.hash().ok()
            );
            SettlementError::Construction(format!("signer {} not found in transaction", address))
        })?;
        let verification = slot.verification_script(account);

        let (invocation, satisfied) = match slot {
            WitnessSlot::FeePayer(key) | WitnessSlot::AdditionalKey(key) => {
                match approvals.get(key) {
                    Some(signature) => (push_signatures([signature.as_slice()]), true),
                    None => (Vec::new(), false),
                }
            }
            WitnessSlot::Quorum => {
                let chosen: Vec<(&PublicKey, &Vec<u8>)> = approvals
                    .iter()
                    .filter(|(key, _)| account.is_owner(key))
                    .take(account.threshold())
                    .collect();
                if chosen.len() == account.threshold() {
                    quorum_signers = chosen.iter().map(|(key, _)| (*key).clone()).collect();
                    (
                        push_signatures(chosen.iter().map(|(_, sig)| sig.as_slice())),
                        true,
                    )
                } else {
                    (Vec::new(), false)
                }
            }
            WitnessSlot::AdditionalContract(_) => (Vec::new(), true),
        };

        ready &= satisfied;
        witnesses[index] = Witness::new(invocation, verification);
    }

    let mut transaction = tx.clone();
    transaction.witnesses = witnesses;
    Ok(Assembly {
        transaction,
        ready,
        quorum_signers,
    })
}
