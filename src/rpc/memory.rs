//! In-memory chain
//!
//! Stands in for a Neo node in tests and dry runs: block height is set by
//! hand, submissions are recorded, and failures can be injected.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{ChainRpc, ContractState, InvokeResult, RpcError, ERROR_ALREADY_EXISTS};
use crate::core::{ScriptHash, Signer, Transaction, TxHash};

#[derive(Default)]
struct ChainState {
    heights: HashMap<TxHash, u32>,
    pool: HashMap<TxHash, Vec<u8>>,
    submissions: Vec<Vec<u8>>,
    contracts: HashMap<ScriptHash, ContractState>,
    send_error: Option<RpcError>,
    query_error: Option<RpcError>,
    invoke_result: Option<InvokeResult>,
}

/// A scriptable chain for tests
pub struct MemoryChain {
    block_count: AtomicU32,
    network_fee: i64,
    state: Mutex<ChainState>,
}

impl MemoryChain {
    pub fn new(block_count: u32) -> Self {
        Self {
            block_count: AtomicU32::new(block_count),
            network_fee: 1_000_000,
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn set_block_count(&self, count: u32) {
        self.block_count.store(count, Ordering::SeqCst);
    }

    pub fn advance(&self, blocks: u32) {
        self.block_count.fetch_add(blocks, Ordering::SeqCst);
    }

    /// Include a pooled transaction in the current block
    pub fn confirm(&self, hash: &TxHash) {
        let height = self.block_count.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        state.pool.remove(hash);
        state.heights.insert(*hash, height);
    }

    pub fn deploy_contract(&self, hash: ScriptHash, name: &str) {
        let mut state = self.state.lock();
        let id = state.contracts.len() as i32 + 1;
        state.contracts.insert(
            hash,
            ContractState {
                id,
                hash,
                name: name.to_string(),
            },
        );
    }

    /// Every subsequent send fails with `error` until cleared
    pub fn fail_sends(&self, error: Option<RpcError>) {
        self.state.lock().send_error = error;
    }

    /// Every subsequent height or block query fails with `error` until cleared
    pub fn fail_queries(&self, error: Option<RpcError>) {
        self.state.lock().query_error = error;
    }

    pub fn set_invoke_result(&self, result: InvokeResult) {
        self.state.lock().invoke_result = Some(result);
    }

    /// Raw bytes of every accepted or re-sent submission, in order
    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    pub fn is_pooled(&self, hash: &TxHash) -> bool {
        self.state.lock().pool.contains_key(hash)
    }

    fn check_queries(&self) -> Result<(), RpcError> {
        match &self.state.lock().query_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MemoryChain {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ChainRpc for MemoryChain {
    async fn block_count(&self) -> Result<u32, RpcError> {
        self.check_queries()?;
        Ok(self.block_count.load(Ordering::SeqCst))
    }

    async fn transaction_height(&self, hash: &TxHash) -> Result<u32, RpcError> {
        self.check_queries()?;
        Ok(self.state.lock().heights.get(hash).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> Result<TxHash, RpcError> {
        let tx = Transaction::from_bytes(raw).map_err(|e| RpcError::Node {
            code: -500,
            message: format!("invalid transaction: {}", e),
        })?;
        let hash = tx
            .hash()
            .map_err(|e| RpcError::Malformed(e.to_string()))?;

        let mut state = self.state.lock();
        state.submissions.push(raw.to_vec());
        if let Some(error) = &state.send_error {
            return Err(error.clone());
        }
        if state.pool.contains_key(&hash) || state.heights.contains_key(&hash) {
            return Err(RpcError::Node {
                code: ERROR_ALREADY_EXISTS,
                message: "AlreadyExists".to_string(),
            });
        }
        if tx.valid_until_block < self.block_count.load(Ordering::SeqCst) {
            return Err(RpcError::Node {
                code: -500,
                message: "Expired".to_string(),
            });
        }
        state.pool.insert(hash, raw.to_vec());
        Ok(hash)
    }

    async fn contract_state(&self, hash: &ScriptHash) -> Result<Option<ContractState>, RpcError> {
        self.check_queries()?;
        Ok(self.state.lock().contracts.get(hash).cloned())
    }

    async fn calculate_network_fee(&self, raw: &[u8]) -> Result<i64, RpcError> {
        self.check_queries()?;
        Ok(self.network_fee + raw.len() as i64 * 1000)
    }

    async fn invoke_script(
        &self,
        _script: &[u8],
        _signers: &[Signer],
    ) -> Result<InvokeResult, RpcError> {
        self.check_queries()?;
        Ok(self
            .state
            .lock()
            .invoke_result
            .clone()
            .unwrap_or_else(|| InvokeResult {
                state: "HALT".to_string(),
                gas_consumed: 997_775,
                exception: None,
                stack: vec![serde_json::json!({"type": "Integer", "value": "8"})],
            }))
    }
}
