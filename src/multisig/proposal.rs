//! Proposal requests
//!
//! Validation and script construction for new multi-signature
//! transactions. Chain lookups (block count, fees, contract state) are
//! done by the engine; everything here is pure.

use std::collections::BTreeSet;

use super::account::Account;
use super::error::SettlementError;
use super::transaction::TransactionKind;
use super::witness::{AdditionalSigner, FeePayer, WitnessPlan};
use crate::core::{parse_amount, ContractParameter, ScriptBuilder, ScriptHash};
use crate::crypto::PublicKey;

/// What the proposer wants the account to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProposalKind {
    Invoke {
        contract: ScriptHash,
        method: String,
        params: Vec<ContractParameter>,
    },
    /// NEP-17 transfer; `amount` is a decimal string in token units
    Transfer {
        asset: ScriptHash,
        to: ScriptHash,
        amount: String,
    },
}

impl ProposalKind {
    /// Contract that must be deployed for the proposal to make sense
    pub fn target(&self) -> ScriptHash {
        match self {
            ProposalKind::Invoke { contract, .. } => *contract,
            ProposalKind::Transfer { asset, .. } => *asset,
        }
    }
}

/// A request to create a new transaction for an account
#[derive(Clone, Debug)]
pub struct ProposalRequest {
    pub account: ScriptHash,
    pub proposer: PublicKey,
    pub kind: ProposalKind,
    pub fee_payer: FeePayer,
    pub additional: Option<AdditionalSigner>,
}

impl ProposalRequest {
    /// Check the request against the account and derive its witness plan
    pub fn plan(&self, account: &Account) -> Result<WitnessPlan, SettlementError> {
        if !account.is_owner(&self.proposer) {
            return Err(SettlementError::NotAuthorized(self.proposer.address()));
        }
        if let FeePayer::Owner(key) = &self.fee_payer {
            if !account.is_owner(key) {
                return Err(SettlementError::InvalidProposal(format!(
                    "fee payer {} is neither the account nor one of its owners",
                    key.address()
                )));
            }
        }

        let plan = WitnessPlan::new(self.fee_payer.clone(), self.additional.clone());
        let mut seen = BTreeSet::new();
        for signer in plan.signers(account) {
            if !seen.insert(signer.account) {
                return Err(SettlementError::InvalidProposal(format!(
                    "signer {} appears twice",
                    signer.account.to_address()
                )));
            }
        }
        Ok(plan)
    }

    /// Record kind stored with the transaction
    pub fn record_kind(&self) -> TransactionKind {
        match &self.kind {
            ProposalKind::Invoke {
                contract, method, ..
            } => TransactionKind::Invoke {
                contract: *contract,
                method: method.clone(),
            },
            ProposalKind::Transfer { asset, to, amount } => TransactionKind::Transfer {
                asset: *asset,
                to: *to,
                amount: amount.trim().to_string(),
            },
        }
    }
}

/// `asset.decimals()`
pub fn decimals_script(asset: &ScriptHash) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(asset, "decimals", &[]);
    sb.into_bytes()
}

/// `asset.transfer(from, to, amount, null)` with `amount` scaled by `decimals`
pub fn transfer_script(
    asset: &ScriptHash,
    from: &ScriptHash,
    to: &ScriptHash,
    amount: &str,
    decimals: u8,
) -> Result<Vec<u8>, SettlementError> {
    let units = parse_amount(amount, decimals)?;
    if units <= 0 {
        return Err(SettlementError::InvalidProposal(format!(
            "transfer amount must be positive: {}",
            amount
        )));
    }
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(
        asset,
        "transfer",
        &[
            ContractParameter::Hash160(*from),
            ContractParameter::Hash160(*to),
            ContractParameter::Integer(units),
            ContractParameter::Any,
        ],
    );
    Ok(sb.into_bytes())
}

/// Script for a generic invocation
pub fn invoke_script(contract: &ScriptHash, method: &str, params: &[ContractParameter]) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(contract, method, params);
    sb.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::script::{interop, interop_id, opcode};
    use crate::crypto::KeyPair;

    fn account() -> (Vec<KeyPair>, Account) {
        let owners: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let account = Account::new(
            2,
            owners.iter().map(|k| k.public_key.clone()).collect(),
            None,
        )
        .unwrap();
        (owners, account)
    }

    fn request(account: &Account, proposer: PublicKey) -> ProposalRequest {
        ProposalRequest {
            account: account.script_hash(),
            proposer,
            kind: ProposalKind::Transfer {
                asset: ScriptHash::from_bytes([1; 20]),
                to: ScriptHash::from_bytes([2; 20]),
                amount: " 1.5 ".to_string(),
            },
            fee_payer: FeePayer::Account,
            additional: None,
        }
    }

    #[test]
    fn test_proposer_must_be_owner() {
        let (owners, account) = account();
        assert!(request(&account, owners[0].public_key.clone())
            .plan(&account)
            .is_ok());

        let outsider = KeyPair::generate().public_key;
        assert!(matches!(
            request(&account, outsider).plan(&account),
            Err(SettlementError::NotAuthorized(_))
        ));
    }

    #[test]
    fn test_fee_payer_must_be_owner() {
        let (owners, account) = account();
        let mut req = request(&account, owners[0].public_key.clone());
        req.fee_payer = FeePayer::Owner(owners[1].public_key.clone());
        assert_eq!(req.plan(&account).unwrap().slots().len(), 2);

        req.fee_payer = FeePayer::Owner(KeyPair::generate().public_key);
        assert!(matches!(
            req.plan(&account),
            Err(SettlementError::InvalidProposal(_))
        ));
    }

    #[test]
    fn test_duplicate_signers_rejected() {
        let (owners, account) = account();
        let mut req = request(&account, owners[0].public_key.clone());
        req.fee_payer = FeePayer::Owner(owners[1].public_key.clone());
        req.additional = Some(AdditionalSigner::Key(owners[1].public_key.clone()));
        assert!(matches!(
            req.plan(&account),
            Err(SettlementError::InvalidProposal(_))
        ));

        req.fee_payer = FeePayer::Account;
        req.additional = Some(AdditionalSigner::Contract(account.script_hash()));
        assert!(matches!(
            req.plan(&account),
            Err(SettlementError::InvalidProposal(_))
        ));
    }

    #[test]
    fn test_record_kind_trims_amount() {
        let (owners, account) = account();
        let req = request(&account, owners[0].public_key.clone());
        match req.record_kind() {
            TransactionKind::Transfer { amount, .. } => assert_eq!(amount, "1.5"),
            other => panic!("unexpected kind {:?}", other),
        }
        assert_eq!(req.kind.target(), ScriptHash::from_bytes([1; 20]));
    }

    #[test]
    fn test_transfer_script_layout() {
        let asset = ScriptHash::from_bytes([0xcf; 20]);
        let from = ScriptHash::from_bytes([1; 20]);
        let to = ScriptHash::from_bytes([2; 20]);
        let script = transfer_script(&asset, &from, &to, "1.5", 8).unwrap();

        // null data argument comes first, then 150_000_000 as PUSHINT32
        assert_eq!(script[0], opcode::PUSHNULL);
        assert_eq!(script[1], opcode::PUSHINT32);
        assert_eq!(&script[2..6], &150_000_000u32.to_le_bytes());
        assert_eq!(&script[script.len() - 4..], &interop_id(interop::CONTRACT_CALL));
        assert!(script
            .windows(8)
            .any(|w| w == b"transfer"));
    }

    #[test]
    fn test_transfer_amount_validation() {
        let asset = ScriptHash::from_bytes([0xcf; 20]);
        let from = ScriptHash::ZERO;
        assert!(matches!(
            transfer_script(&asset, &from, &from, "0", 8),
            Err(SettlementError::InvalidProposal(_))
        ));
        assert!(matches!(
            transfer_script(&asset, &from, &from, "1.123", 2),
            Err(SettlementError::Parse(_))
        ));
    }

    #[test]
    fn test_decimals_script_has_no_arguments() {
        let script = decimals_script(&ScriptHash::from_bytes([3; 20]));
        assert_eq!(script[0], opcode::NEWARRAY0);
    }
}
