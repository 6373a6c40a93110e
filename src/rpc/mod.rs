//! Chain RPC collaborator
//!
//! The settlement engine only needs a handful of node queries. Every call
//! may fail transiently; callers treat a failure as "unknown", never as a
//! negative answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::core::{ScriptHash, Signer, TxHash};

pub mod client;
pub mod memory;

pub use client::JsonRpcChain;
pub use memory::MemoryChain;

/// Node error code for a transaction already in the pool or chain
pub const ERROR_ALREADY_EXISTS: i64 = -501;

/// Node error codes meaning "no such item"
const UNKNOWN_ITEM_CODES: [i64; 3] = [-100, -102, -103];

/// RPC errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Node error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    /// The node already knows this transaction
    pub fn is_already_exists(&self) -> bool {
        match self {
            RpcError::Node { code, message } => {
                *code == ERROR_ALREADY_EXISTS
                    || message.to_ascii_lowercase().contains("already exists")
            }
            _ => false,
        }
    }

    /// The node does not know the requested item
    pub fn is_unknown_item(&self) -> bool {
        match self {
            RpcError::Node { code, message } => {
                UNKNOWN_ITEM_CODES.contains(code) || message.starts_with("Unknown")
            }
            _ => false,
        }
    }

    /// No answer was obtained; the request may or may not have been applied
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout(_))
    }
}

/// Deployed contract summary
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractState {
    pub id: i32,
    pub hash: ScriptHash,
    pub name: String,
}

/// Outcome of a test invocation
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct InvokeResult {
    /// `HALT` or `FAULT`
    pub state: String,
    pub gas_consumed: i64,
    pub exception: Option<String>,
    pub stack: Vec<serde_json::Value>,
}

impl InvokeResult {
    pub fn is_halt(&self) -> bool {
        self.state == "HALT"
    }

    /// First stack item as an integer
    pub fn first_integer(&self) -> Option<i128> {
        let item = self.stack.first()?;
        if item.get("type")?.as_str()? != "Integer" {
            return None;
        }
        match item.get("value")? {
            serde_json::Value::String(s) => s.parse().ok(),
            serde_json::Value::Number(n) => n.as_i64().map(i128::from),
            _ => None,
        }
    }
}

/// Queries the settlement engine issues against a Neo node
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Number of blocks in the chain (height of the next block)
    async fn block_count(&self) -> Result<u32, RpcError>;

    /// Height of the block containing `hash`, or 0 if unknown
    async fn transaction_height(&self, hash: &TxHash) -> Result<u32, RpcError>;

    /// Relay a serialized transaction
    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError>;

    /// Deployed contract at `hash`, if any
    async fn contract_state(&self, hash: &ScriptHash) -> Result<Option<ContractState>, RpcError>;

    /// Network fee the node would charge for a serialized transaction
    async fn calculate_network_fee(&self, raw: &[u8]) -> Result<i64, RpcError>;

    /// Test-run a script with the given signers
    async fn invoke_script(&self, script: &[u8], signers: &[Signer])
        -> Result<InvokeResult, RpcError>;
}

/// Bound a chain call by `limit`
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let exists = RpcError::Node {
            code: -501,
            message: "AlreadyExists".to_string(),
        };
        assert!(exists.is_already_exists());
        assert!(!exists.is_transient());

        let legacy = RpcError::Node {
            code: -500,
            message: "Block or transaction already exists".to_string(),
        };
        assert!(legacy.is_already_exists());

        let unknown = RpcError::Node {
            code: -103,
            message: "Unknown transaction".to_string(),
        };
        assert!(unknown.is_unknown_item());
        assert!(!unknown.is_already_exists());

        assert!(RpcError::Transport("refused".to_string()).is_transient());
        assert!(RpcError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn test_first_integer() {
        let result = InvokeResult {
            state: "HALT".to_string(),
            gas_consumed: 0,
            exception: None,
            stack: vec![serde_json::json!({"type": "Integer", "value": "8"})],
        };
        assert!(result.is_halt());
        assert_eq!(result.first_integer(), Some(8));

        let empty = InvokeResult {
            stack: Vec::new(),
            ..result
        };
        assert_eq!(empty.first_integer(), None);
    }

    #[tokio::test]
    async fn test_with_timeout_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<u32, RpcError>(1)
        };
        let result = with_timeout(Duration::from_millis(10), slow).await;
        assert_eq!(result, Err(RpcError::Timeout(Duration::from_millis(10))));

        let fast = async { Ok::<u32, RpcError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await, Ok(7));
    }
}
