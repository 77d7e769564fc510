//! 核心審計邏輯模塊
//!
//! 每個節點按固定的狀態序列推進：
//!
//! ```text
//! CheckLedger ──(已有條目)──▶ Skipped
//!     │
//!     ▼
//! Enumerate ──(聯絡資訊缺失 / 枚舉失敗)──▶ Aborted
//!     │
//!     ▼
//! AuditShards ──(游標錯誤 / 分片任務崩潰)──▶ Aborted
//!     │
//!     ▼
//! Commit ──▶ Audited | CommitFailed
//! ```
//!
//! 節點之間由信號量限制並發；節點內部在從游標拉取下一個分片之前先取得許可，
//! 因此同時進行中的分片驗證永遠不超過 `shard_concurrency`，游標在許可用盡時自然暫停。
//!
//! 審計結果只在節點的全部分片完成後一次性提交。運行被中斷（future 被丟棄）時，
//! 進行中的任務隨 `JoinSet` 一起中止，賬本中不會留下部分結果。

use crate::bridge_client::{BridgeClient, BridgeCredentials};
use crate::enumerator::ShardEnumerator;
use crate::error::{AuditorError, Result};
use crate::index::{ContactDirectory, ShardIndex, ShardStream, SnapshotIndex};
use crate::index_client::HttpIndexClient;
use crate::ledger::{Ledger, RedbLedger};
use crate::negotiator::RetrievalNegotiator;
use crate::network::{NetworkClient, NetworkGateway};
use crate::report::{NodeAuditOutcome, RunSummary};
use crate::retry::RetryConfig;
use crate::shard_path::ShardPathResolver;
use crate::storage_node_client::StorageNodeClient;
use crate::types::{AuditResult, AuditorConfig, Contact, NodeId};
use crate::worker::{ShardVerifier, ShardWorker};
use futures::TryStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// 單個節點審計的中間狀態
enum NodeAuditState {
    CheckLedger,
    Enumerate,
    AuditShards { contact: Contact, cursor: ShardStream },
    Commit { result: AuditResult },
}

#[derive(Clone)]
pub struct Auditor {
    ledger: Arc<dyn Ledger>,
    contacts: Arc<dyn ContactDirectory>,
    enumerator: ShardEnumerator,
    worker: ShardWorker,
    node_concurrency: usize,
    shard_concurrency: usize,
}

impl Auditor {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        contacts: Arc<dyn ContactDirectory>,
        enumerator: ShardEnumerator,
        worker: ShardWorker,
    ) -> Self {
        let defaults = AuditorConfig::default();
        Self {
            ledger,
            contacts,
            enumerator,
            worker,
            node_concurrency: defaults.node_concurrency,
            shard_concurrency: defaults.shard_concurrency,
        }
    }

    /// 設置節點與分片並發上限（最小為 1）
    pub fn with_concurrency(mut self, node_concurrency: usize, shard_concurrency: usize) -> Self {
        self.node_concurrency = node_concurrency.max(1);
        self.shard_concurrency = shard_concurrency.max(1);
        self
    }

    /// 根據配置組裝完整的審計流水線
    pub fn from_config(config: &AuditorConfig) -> Result<Self> {
        info!("Initializing Auditor (data dir: {:?})", config.data_dir);

        let ledger: Arc<dyn Ledger> = Arc::new(RedbLedger::open(config.ledger_path())?);
        let retry = RetryConfig::with_max_retries(config.max_retries);

        let (index, contacts): (Arc<dyn ShardIndex>, Arc<dyn ContactDirectory>) =
            match &config.index_snapshot_path {
                Some(path) => {
                    let snapshot = Arc::new(SnapshotIndex::from_json_file(path)?);
                    let index: Arc<dyn ShardIndex> = snapshot.clone();
                    let contacts: Arc<dyn ContactDirectory> = snapshot;
                    (index, contacts)
                }
                None => {
                    let client = Arc::new(
                        HttpIndexClient::new(
                            config.index_url.clone(),
                            config.http_timeout_secs,
                            config.index_page_size,
                        )?
                        .with_retry(retry.clone()),
                    );
                    let index: Arc<dyn ShardIndex> = client.clone();
                    let contacts: Arc<dyn ContactDirectory> = client;
                    (index, contacts)
                }
            };

        let credentials = config
            .bridge_rpc_user
            .clone()
            .map(|user| BridgeCredentials {
                user,
                password: config.bridge_rpc_password.clone(),
            });
        let bridge = BridgeClient::new(
            config.bridge_rpc_url.clone(),
            credentials,
            config.http_timeout_secs,
        )?;
        let storage = StorageNodeClient::with_connect_timeout(config.http_timeout_secs)?;
        let network: Arc<dyn NetworkClient> = Arc::new(NetworkGateway::new(bridge, storage));

        let negotiator = RetrievalNegotiator::new(
            network.clone(),
            Duration::from_secs(config.negotiation_timeout_secs),
            retry,
        );
        let verifier = ShardVerifier::new(
            network,
            ShardPathResolver::new(config.shard_root()),
            Duration::from_secs(config.transfer_timeout_secs),
        );

        let auditor = Self::new(
            ledger,
            contacts,
            ShardEnumerator::new(index, config.sampling),
            ShardWorker::new(negotiator, verifier),
        )
        .with_concurrency(config.node_concurrency, config.shard_concurrency);

        info!(
            "Auditor ready: node concurrency {}, shard concurrency {}, sampling {:?}",
            auditor.node_concurrency, auditor.shard_concurrency, config.sampling
        );

        Ok(auditor)
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// 審計節點列表
    ///
    /// 單個節點的失敗只反映在匯總中，不會中止其他節點。
    pub async fn run(&self, nodes: Vec<NodeId>) -> RunSummary {
        let start = Instant::now();
        let mut seen = HashSet::new();
        let nodes: Vec<NodeId> = nodes
            .into_iter()
            .filter(|node_id| seen.insert(node_id.clone()))
            .collect();

        info!("========================================");
        info!(
            "Starting audit run: {} node(s), up to {} at a time",
            nodes.len(),
            self.node_concurrency
        );
        info!("========================================");

        let permits = Arc::new(Semaphore::new(self.node_concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = RunSummary::default();

        for node_id in nodes {
            let permit = match permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Node semaphore closed: {}", e);
                    break;
                }
            };

            let auditor = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = auditor.audit_node(&node_id).await;
                (node_id, outcome)
            });

            // 順便收取已完成的節點
            while let Some(joined) = tasks.try_join_next() {
                Self::record_node(&mut summary, joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            Self::record_node(&mut summary, joined);
        }

        info!(
            "Audit run completed in {:.2}s",
            start.elapsed().as_secs_f64()
        );
        summary
    }

    fn record_node(
        summary: &mut RunSummary,
        joined: std::result::Result<(NodeId, NodeAuditOutcome), JoinError>,
    ) {
        match joined {
            Ok((node_id, outcome)) => summary.record(node_id, outcome),
            Err(e) => error!("Node audit task failed: {}", e),
        }
    }

    /// 審計單個節點
    pub async fn audit_node(&self, node_id: &NodeId) -> NodeAuditOutcome {
        let start = Instant::now();
        let mut state = NodeAuditState::CheckLedger;

        loop {
            state = match state {
                NodeAuditState::CheckLedger => match self.ledger.has(node_id).await {
                    Ok(true) => {
                        info!("Node {} already audited, skipping", node_id);
                        return NodeAuditOutcome::Skipped;
                    }
                    Ok(false) => NodeAuditState::Enumerate,
                    Err(e) => {
                        error!("Cannot read ledger for node {}: {}", node_id, e);
                        return NodeAuditOutcome::Aborted {
                            reason: e.to_string(),
                        };
                    }
                },

                NodeAuditState::Enumerate => {
                    let contact = match self.contacts.find_contact(node_id).await {
                        Ok(contact) => contact,
                        Err(e) => {
                            error!("Cannot audit node {}: {}", node_id, e);
                            return NodeAuditOutcome::Aborted {
                                reason: e.to_string(),
                            };
                        }
                    };

                    match self.enumerator.enumerate(node_id).await {
                        Ok(cursor) => {
                            info!(
                                "Auditing node {} at {}:{}",
                                node_id, contact.address, contact.port
                            );
                            NodeAuditState::AuditShards { contact, cursor }
                        }
                        Err(e) => {
                            error!("Cannot enumerate shards for node {}: {}", node_id, e);
                            return NodeAuditOutcome::Aborted {
                                reason: e.to_string(),
                            };
                        }
                    }
                }

                NodeAuditState::AuditShards { contact, cursor } => {
                    match self.audit_shards(node_id, contact, cursor).await {
                        Ok(result) => NodeAuditState::Commit { result },
                        Err(e) => {
                            error!(
                                "Shard audit for node {} aborted, nothing committed: {}",
                                node_id, e
                            );
                            return NodeAuditOutcome::Aborted {
                                reason: e.to_string(),
                            };
                        }
                    }
                }

                NodeAuditState::Commit { result } => {
                    let shards = result.len();
                    let passed = result.values().filter(|ok| **ok).count();

                    return match self.ledger.commit(node_id, &result).await {
                        Ok(()) => {
                            info!(
                                "Node {} audited in {:.2}s: {}/{} shard(s) passed",
                                node_id,
                                start.elapsed().as_secs_f64(),
                                passed,
                                shards
                            );
                            NodeAuditOutcome::Audited { shards, passed }
                        }
                        Err(e) => {
                            error!(
                                "Failed to commit results for node {} ({} shard(s)): {}",
                                node_id, shards, e
                            );
                            NodeAuditOutcome::CommitFailed {
                                reason: e.to_string(),
                            }
                        }
                    };
                }
            };
        }
    }

    /// 以有界並發消費游標，收集節點的全部分片結果
    ///
    /// 返回錯誤時丟棄 `tasks`，中止所有進行中的分片任務。
    async fn audit_shards(
        &self,
        node_id: &NodeId,
        contact: Contact,
        mut cursor: ShardStream,
    ) -> Result<AuditResult> {
        let contact = Arc::new(contact);
        let permits = Arc::new(Semaphore::new(self.shard_concurrency));
        let mut tasks: JoinSet<(String, bool)> = JoinSet::new();
        let mut result = AuditResult::new();

        loop {
            // 許可用盡時在此等待，游標保持暫停
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AuditorError::Other(anyhow::anyhow!("shard semaphore closed: {}", e)))?;

            while let Some(joined) = tasks.try_join_next() {
                let (digest, ok) = joined.map_err(shard_task_failed)?;
                result.insert(digest, ok);
            }

            let shard = match cursor.try_next().await? {
                Some(shard) => shard,
                None => break,
            };
            debug!("Dispatching shard {} for node {}", shard.hash, node_id);

            let worker = self.worker.clone();
            let contact = contact.clone();
            let node_id = node_id.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let ok = worker.process(&node_id, &contact, &shard).await;
                (shard.hash, ok)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (digest, ok) = joined.map_err(shard_task_failed)?;
            result.insert(digest, ok);
        }

        if result.is_empty() {
            warn!("Node {} has no active shards to audit", node_id);
        }

        Ok(result)
    }
}

fn shard_task_failed(e: JoinError) -> AuditorError {
    AuditorError::Other(anyhow::anyhow!("shard task failed: {}", e))
}
