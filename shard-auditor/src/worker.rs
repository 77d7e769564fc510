//! 分片下載與驗證
//!
//! 單個分片的完整流程：
//!
//! ```text
//! 選擇合約 ─▶ 協商檢索指針 ─▶ 流式下載 ─┬─▶ 增量摘要 ─▶ 比對
//!                                      └─▶ 寫入 {root}/ab/cd/abcd...
//! ```
//!
//! 任何失敗（無合約、協商錯誤、無令牌、傳輸錯誤、超時、摘要不符）都記錄為 `false`
//! 並寫日誌，不會向上拋出。嘗試下載後，文件總是留在解析出的路徑上，
//! 即使摘要不符，以便事後離線檢查。

use crate::digest::DigestVerifier;
use crate::error::{AuditorError, Result};
use crate::negotiator::RetrievalNegotiator;
use crate::network::NetworkClient;
use crate::retry::with_timeout;
use crate::shard_path::ShardPathResolver;
use crate::types::{Contact, NodeId, RetrievalPointer, ShardDescriptor};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

/// 分片下載驗證器
#[derive(Clone)]
pub struct ShardVerifier {
    network: Arc<dyn NetworkClient>,
    resolver: ShardPathResolver,
    transfer_timeout: Duration,
}

impl ShardVerifier {
    pub fn new(
        network: Arc<dyn NetworkClient>,
        resolver: ShardPathResolver,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            network,
            resolver,
            transfer_timeout,
        }
    }

    pub fn resolver(&self) -> &ShardPathResolver {
        &self.resolver
    }

    /// 下載並驗證分片，僅當計算出的摘要等於預期摘要時返回 `true`
    pub async fn verify(
        &self,
        contact: &Contact,
        shard: &ShardDescriptor,
        pointer: &RetrievalPointer,
    ) -> bool {
        match self.transfer(contact, shard, pointer).await {
            Ok(digest) if digest.matches(&shard.hash) => {
                debug!(
                    "✓ Shard {} verified ({} bytes) on node {}",
                    shard.hash,
                    digest.bytes_seen(),
                    contact.node_id
                );
                true
            }
            Ok(digest) => {
                let bytes = digest.bytes_seen();
                warn!(
                    "✗ Shard {} digest mismatch on node {}: got {} ({} bytes)",
                    shard.hash,
                    contact.node_id,
                    digest.finalize_hex(),
                    bytes
                );
                false
            }
            Err(e) => {
                warn!(
                    "✗ Shard {} transfer from node {} failed: {}",
                    shard.hash, contact.node_id, e
                );
                false
            }
        }
    }

    async fn transfer(
        &self,
        contact: &Contact,
        shard: &ShardDescriptor,
        pointer: &RetrievalPointer,
    ) -> Result<DigestVerifier> {
        let token = pointer.usable_token().ok_or(AuditorError::InvalidPointer)?;
        let path = self.resolver.prepare(&shard.hash).await?;
        let file = tokio::fs::File::create(&path).await?;

        with_timeout("shard transfer", self.transfer_timeout, async {
            let mut writer = BufWriter::new(file);
            let mut stream = self
                .network
                .open_shard_download(contact, &shard.hash, token)
                .await?;

            let mut verifier = DigestVerifier::new();
            let streamed: Result<()> = async {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    verifier.update(&chunk);
                    writer.write_all(&chunk).await?;
                }
                Ok(())
            }
            .await;

            // 傳輸中斷時已收到的字節也要落盤
            writer.flush().await?;
            streamed?;

            Ok::<_, AuditorError>(verifier)
        })
        .await
    }
}

/// 驅動單個分片從協商到驗證的完整流程
#[derive(Clone)]
pub struct ShardWorker {
    negotiator: RetrievalNegotiator,
    verifier: ShardVerifier,
}

impl ShardWorker {
    pub fn new(negotiator: RetrievalNegotiator, verifier: ShardVerifier) -> Self {
        Self {
            negotiator,
            verifier,
        }
    }

    /// 審計節點上的一個分片
    pub async fn process(&self, node_id: &NodeId, contact: &Contact, shard: &ShardDescriptor) -> bool {
        let contract = match shard.contract_for(node_id) {
            Some(contract) => contract,
            None => {
                warn!("Shard {} has no contract for node {}", shard.hash, node_id);
                return false;
            }
        };

        let pointer = match self.negotiator.negotiate(contact, contract).await {
            Ok(pointer) => pointer,
            Err(e) => {
                warn!(
                    "No retrieval pointer for shard {} on node {}: {}",
                    shard.hash, node_id, e
                );
                return false;
            }
        };

        if pointer.usable_token().is_none() {
            warn!(
                "No token for contact {} and contract on shard {}",
                node_id, shard.hash
            );
            return false;
        }

        self.verifier.verify(contact, shard, &pointer).await
    }
}
