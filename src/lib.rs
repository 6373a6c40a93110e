//! Multisig-Settlement: multi-signature transaction assembly for Neo N3
//!
//! This crate coordinates M-of-N accounts whose owners sign independently:
//! - Secp256r1 signature validation over the network-bound sign data
//! - Deterministic witness assembly with a lowest-key quorum rule
//! - Per-transaction ledger of approvals and rejections
//! - Status lifecycle from Signing through Executing to a terminal state
//! - Periodic reconciliation against a Neo JSON-RPC node
//! - SQLite record store shared safely between processes
//!
//! # Example
//!
//! ```ignore
//! use multisig_settlement::{MemoryChain, MemoryStore, SettlementConfig, SettlementEngine};
//! use std::sync::Arc;
//!
//! let engine = SettlementEngine::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MemoryChain::new(100)),
//!     SettlementConfig::default(),
//! );
//! let account = engine.register_account(2, owner_keys, Some("treasury".into())).await?;
//! println!("Address: {}", account.address());
//!
//! let record = engine.propose(request).await?;
//! let status = engine.submit_sign_result(&record.hash(), decision).await?;
//! let report = engine.reconcile_tick().await;
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod crypto;
pub mod multisig;
pub mod rpc;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use config::{ConfigError, SettlementConfig};
pub use core::{ScriptHash, Transaction, TxHash};
pub use crypto::{KeyPair, PublicKey};
pub use multisig::{
    Account, Decision, ProposalKind, ProposalRequest, SettlementEngine, SettlementError,
    TickReport, TransactionRecord, TransactionStatus,
};
pub use rpc::{ChainRpc, JsonRpcChain, MemoryChain, RpcError};
pub use service::{ReconcilerHandle, ReconciliationLoop};
pub use storage::{MemoryStore, RecordStore, SqliteStore, StorageConfig};
