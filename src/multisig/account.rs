//! Multi-signature account
//!
//! An account is fully described by its owner keys and threshold. The
//! verification script, script hash and address are derived from those
//! two and never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::SettlementError;
use crate::core::{Contract, ScriptHash};
use crate::crypto::PublicKey;

/// Persisted form of an account
#[derive(Clone, Debug, Serialize, Deserialize)]
struct AccountData {
    threshold: usize,
    public_keys: Vec<PublicKey>,
    #[serde(default)]
    label: Option<String>,
    created_at: DateTime<Utc>,
}

/// An M-of-N multi-signature account
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "AccountData", into = "AccountData")]
pub struct Account {
    threshold: usize,
    public_keys: Vec<PublicKey>,
    label: Option<String>,
    created_at: DateTime<Utc>,
    contract: Contract,
}

impl Account {
    /// Create an account from owner keys and a threshold
    ///
    /// Keys are stored sorted; duplicates and thresholds outside
    /// `1..=keys.len()` are rejected.
    pub fn new(
        threshold: usize,
        public_keys: Vec<PublicKey>,
        label: Option<String>,
    ) -> Result<Self, SettlementError> {
        Self::build(AccountData {
            threshold,
            public_keys,
            label,
            created_at: Utc::now(),
        })
    }

    fn build(data: AccountData) -> Result<Self, SettlementError> {
        let contract = Contract::multisig(data.threshold, &data.public_keys)
            .map_err(|e| SettlementError::InvalidAccount(e.to_string()))?;
        let mut public_keys = data.public_keys;
        public_keys.sort();
        Ok(Self {
            threshold: data.threshold,
            public_keys,
            label: data.label,
            created_at: data.created_at,
            contract,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Owner keys in contract order
    pub fn public_keys(&self) -> &[PublicKey] {
        &self.public_keys
    }

    pub fn owner_count(&self) -> usize {
        self.public_keys.len()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_owner(&self, key: &PublicKey) -> bool {
        self.public_keys.binary_search(key).is_ok()
    }

    /// Owner addresses, in the same order as the keys
    pub fn owner_addresses(&self) -> Vec<String> {
        self.public_keys.iter().map(PublicKey::address).collect()
    }

    pub fn verification_script(&self) -> &[u8] {
        self.contract.script()
    }

    pub fn script_hash(&self) -> ScriptHash {
        self.contract.script_hash()
    }

    pub fn address(&self) -> String {
        self.contract.address()
    }

    /// Owner rejections the account can absorb and still reach its threshold
    pub fn tolerated_rejections(&self) -> usize {
        self.public_keys.len() - self.threshold
    }

    /// e.g. "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.public_keys.len())
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.threshold == other.threshold && self.public_keys == other.public_keys
    }
}

impl Eq for Account {}

impl TryFrom<AccountData> for Account {
    type Error = SettlementError;

    fn try_from(data: AccountData) -> Result<Self, Self::Error> {
        Self::build(data)
    }
}

impl From<Account> for AccountData {
    fn from(account: Account) -> Self {
        Self {
            threshold: account.threshold,
            public_keys: account.public_keys,
            label: account.label,
            created_at: account.created_at,
        }
    }
}
