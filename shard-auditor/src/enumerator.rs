//! 分片枚舉器
//!
//! 為指定節點構造查詢：合約指向該節點且存儲窗口尚未結束。
//! 在 [`SamplingMode::RandomOffset`] 下每次枚舉使用新的隨機摘要偏移量，
//! 只覆蓋偏移量之後的分片；[`SamplingMode::Exhaustive`] 則枚舉全部。
//!
//! 返回的流在本地再次應用過濾條件，不依賴索引實現的正確性。

use crate::error::Result;
use crate::index::{ShardIndex, ShardQuery, ShardStream};
use crate::types::{NodeId, SamplingMode};
use chrono::Utc;
use futures::{future, StreamExt, TryStreamExt};
use rand::RngCore;
use std::sync::Arc;
use tracing::debug;

/// 隨機偏移量字節數（與 SHA-256 摘要等長）
const OFFSET_BYTES: usize = 32;

#[derive(Clone)]
pub struct ShardEnumerator {
    index: Arc<dyn ShardIndex>,
    sampling: SamplingMode,
}

impl ShardEnumerator {
    pub fn new(index: Arc<dyn ShardIndex>, sampling: SamplingMode) -> Self {
        Self { index, sampling }
    }

    /// 構造查詢條件
    pub fn build_query(&self, node_id: &NodeId, now_ms: i64) -> ShardQuery {
        let hash_gte = match self.sampling {
            SamplingMode::Exhaustive => None,
            SamplingMode::RandomOffset => Some(random_offset()),
        };

        ShardQuery {
            node_id: node_id.clone(),
            store_end_gte: now_ms,
            hash_gte,
        }
    }

    /// 打開節點的分片游標
    pub async fn enumerate(&self, node_id: &NodeId) -> Result<ShardStream> {
        let query = self.build_query(node_id, Utc::now().timestamp_millis());

        debug!(
            "Enumerating shards for node {} (store_end >= {}, offset: {:?})",
            node_id, query.store_end_gte, query.hash_gte
        );

        let stream = self.index.query(query.clone()).await?;
        let filtered = stream.try_filter(move |shard| future::ready(query.matches(shard)));

        Ok(filtered.boxed())
    }
}

fn random_offset() -> String {
    let mut bytes = [0u8; OFFSET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
