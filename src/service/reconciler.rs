//! Periodic reconciliation loop
//!
//! The chain offers no push notifications, so open transactions are
//! re-examined on a fixed interval until shut down.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::multisig::SettlementEngine;

/// Drives `SettlementEngine::reconcile_tick` on an interval
pub struct ReconciliationLoop {
    engine: Arc<SettlementEngine>,
    interval: Duration,
}

/// Running loop; dropping it also stops the loop
pub struct ReconcilerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<u64>,
}

impl ReconcilerHandle {
    /// Stop after the current tick and return the number of ticks run
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown_tx.send(()).await;
        match self.task.await {
            Ok(ticks) => ticks,
            Err(e) => {
                log::error!("Reconciliation task ended abnormally: {}", e);
                0
            }
        }
    }
}

impl ReconciliationLoop {
    pub fn new(engine: Arc<SettlementEngine>) -> Self {
        let interval = engine.config().reconcile_interval();
        Self { engine, interval }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run on the current runtime in a background task
    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        ReconcilerHandle { shutdown_tx, task }
    }

    /// Tick until a shutdown message arrives or every sender is dropped
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> u64 {
        log::info!(
            "Reconciliation loop started, interval {:?}",
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.engine.reconcile_tick().await;
                    ticks += 1;
                    if report.is_idle() {
                        log::debug!("Reconciliation tick {}: {}", ticks, report);
                    } else {
                        log::info!("Reconciliation tick {}: {}", ticks, report);
                    }
                }
                _ = shutdown_rx.recv() => {
                    log::info!("Reconciliation loop shutting down...");
                    break;
                }
            }
        }
        ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettlementConfig;
    use crate::core::ScriptHash;
    use crate::crypto::KeyPair;
    use crate::multisig::{FeePayer, ProposalKind, ProposalRequest, TransactionStatus};
    use crate::rpc::{MemoryChain, RpcError};
    use crate::storage::MemoryStore;

    async fn engine_with_proposal() -> (Arc<MemoryChain>, Arc<SettlementEngine>, crate::core::TxHash) {
        let chain = Arc::new(MemoryChain::new(10));
        let target = ScriptHash::from_bytes([0x42; 20]);
        chain.deploy_contract(target, "Target");
        let engine = Arc::new(SettlementEngine::new(
            Arc::new(MemoryStore::new()),
            chain.clone(),
            SettlementConfig {
                valid_block_window: 5,
                ..Default::default()
            },
        ));
        let owner = KeyPair::generate();
        let account = engine
            .register_account(1, vec![owner.public_key.clone()], None)
            .await
            .unwrap();
        let record = engine
            .propose(ProposalRequest {
                account: account.script_hash(),
                proposer: owner.public_key.clone(),
                kind: ProposalKind::Invoke {
                    contract: target,
                    method: "run".to_string(),
                    params: Vec::new(),
                },
                fee_payer: FeePayer::Account,
                additional: None,
            })
            .await
            .unwrap();
        (chain, engine, record.hash())
    }

    async fn wait_for(engine: &SettlementEngine, hash: &crate::core::TxHash, status: TransactionStatus) {
        for _ in 0..200 {
            if engine.transaction(hash).await.unwrap().status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("transaction never reached {}", status);
    }

    #[tokio::test]
    async fn test_loop_expires_and_stops() {
        let (chain, engine, hash) = engine_with_proposal().await;
        let handle = ReconciliationLoop::new(engine.clone())
            .with_interval(Duration::from_millis(10))
            .spawn();

        chain.set_block_count(100);
        wait_for(&engine, &hash, TransactionStatus::Expired).await;

        let ticks = handle.stop().await;
        assert!(ticks >= 1);
    }

    #[tokio::test]
    async fn test_loop_survives_network_failures() {
        let (chain, engine, hash) = engine_with_proposal().await;
        chain.fail_queries(Some(RpcError::Transport("refused".to_string())));
        let handle = ReconciliationLoop::new(engine.clone())
            .with_interval(Duration::from_millis(10))
            .spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            engine.transaction(&hash).await.unwrap().status(),
            TransactionStatus::Signing
        );

        chain.fail_queries(None);
        chain.set_block_count(100);
        wait_for(&engine, &hash, TransactionStatus::Expired).await;
        assert!(handle.stop().await >= 2);
    }

    #[tokio::test]
    async fn test_dropped_handle_ends_loop() {
        let (_, engine, _) = engine_with_proposal().await;
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(
            ReconciliationLoop::new(engine)
                .with_interval(Duration::from_millis(10))
                .run(shutdown_rx),
        );
        drop(shutdown_tx);
        let ticks = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(ticks <= 1);
    }
}
