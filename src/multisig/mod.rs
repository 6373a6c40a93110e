//! Multi-signature settlement
//!
//! Turns independent owner decisions into one broadcast transaction:
//! - `Account`: M-of-N owner set and its verification contract
//! - `SignRequestLedger`: validates decisions and detects rejection
//! - `try_assemble`: deterministic witness construction
//! - `lifecycle`: status transitions and submission
//! - `SettlementEngine`: proposals, decisions and reconciliation ticks
//!
//! # Example
//!
//! ```ignore
//! let engine = SettlementEngine::new(store, chain, SettlementConfig::default());
//! let account = engine.register_account(2, owner_keys, None)?;
//!
//! // Propose a transaction
//! let record = engine.propose(request).await?;
//!
//! // Owners sign `engine.sign_data(&hash)` locally and submit signatures
//! engine.submit_sign_result(&record.hash(), Decision::approve(key1, sig1)).await?;
//! engine.submit_sign_result(&record.hash(), Decision::approve(key2, sig2)).await?;
//!
//! // Broadcast happened with the second approval; confirmation follows
//! engine.reconcile_tick().await;
//! ```

pub mod account;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod manager;
pub mod proposal;
pub mod transaction;
pub mod witness;

pub use account::Account;
pub use error::SettlementError;
pub use ledger::{Decision, Rejection, SignRequestLedger};
pub use lifecycle::Broadcast;
pub use manager::{SettlementEngine, TickReport};
pub use proposal::{ProposalKind, ProposalRequest};
pub use transaction::{SignResult, TransactionKind, TransactionRecord, TransactionStatus};
pub use witness::{try_assemble, AdditionalSigner, Assembly, FeePayer, WitnessPlan, WitnessSlot};
