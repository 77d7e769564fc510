//! 分片索引與聯絡資訊目錄接口
//!
//! 審計流程通過這兩個接口獲取外部數據：
//! - [`ShardIndex`]: 按節點和存儲窗口查詢分片，返回惰性的分片流
//! - [`ContactDirectory`]: 按節點標識查找聯絡資訊
//!
//! 分片流是拉取式的：消費者不輪詢即「暫停」，再次輪詢即「恢復」，
//! 不會丟失或重複元素。任何可分頁的數據源都可以實現 [`ShardIndex`]。
//!
//! [`SnapshotIndex`] 從 JSON 快照加載，適用於離線審計和測試。

use crate::error::{AuditorError, Result};
use crate::types::{Contact, NodeId, ShardDescriptor};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// 惰性分片流
pub type ShardStream = BoxStream<'static, Result<ShardDescriptor>>;

/// 分片查詢條件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardQuery {
    /// 合約必須指向該節點
    pub node_id: NodeId,

    /// 合約存儲窗口結束時間下限（Unix 毫秒）
    pub store_end_gte: i64,

    /// 可選：分片摘要下限（抽樣偏移量）
    pub hash_gte: Option<String>,
}

impl ShardQuery {
    /// 分片是否滿足查詢條件
    pub fn matches(&self, shard: &ShardDescriptor) -> bool {
        if !shard.has_active_contract(&self.node_id, self.store_end_gte) {
            return false;
        }
        match &self.hash_gte {
            Some(offset) => shard.hash.as_str() >= offset.as_str(),
            None => true,
        }
    }
}

/// 分片索引
#[async_trait]
pub trait ShardIndex: Send + Sync {
    /// 打開查詢游標
    async fn query(&self, query: ShardQuery) -> Result<ShardStream>;
}

/// 節點聯絡資訊目錄
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// 查找聯絡資訊，找不到時返回 [`AuditorError::ContactNotFound`]
    async fn find_contact(&self, node_id: &NodeId) -> Result<Contact>;
}

/// 快照文件格式
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(default)]
    pub contacts: Vec<Contact>,

    #[serde(default)]
    pub shards: Vec<ShardDescriptor>,
}

/// 內存中的分片索引和聯絡資訊目錄
///
/// 分片按摘要排序返回，與帶摘要索引的數據庫游標行為一致
#[derive(Debug, Clone, Default)]
pub struct SnapshotIndex {
    contacts: HashMap<NodeId, Contact>,
    shards: Vec<ShardDescriptor>,
}

impl SnapshotIndex {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        let contacts = snapshot
            .contacts
            .into_iter()
            .map(|c| (c.node_id.clone(), c))
            .collect();

        let mut shards = snapshot.shards;
        shards.sort_by(|a, b| a.hash.cmp(&b.hash));

        Self { contacts, shards }
    }

    /// 從 JSON 快照文件加載
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuditorError::Index(format!("Failed to read snapshot {:?}: {}", path, e))
        })?;
        let snapshot: IndexSnapshot = serde_json::from_str(&content)?;

        info!(
            "Loaded index snapshot {:?}: {} contacts, {} shards",
            path,
            snapshot.contacts.len(),
            snapshot.shards.len()
        );

        Ok(Self::new(snapshot))
    }
}

#[async_trait]
impl ShardIndex for SnapshotIndex {
    async fn query(&self, query: ShardQuery) -> Result<ShardStream> {
        let matching: Vec<Result<ShardDescriptor>> = self
            .shards
            .iter()
            .filter(|shard| query.matches(shard))
            .cloned()
            .map(Ok)
            .collect();

        Ok(stream::iter(matching).boxed())
    }
}

#[async_trait]
impl ContactDirectory for SnapshotIndex {
    async fn find_contact(&self, node_id: &NodeId) -> Result<Contact> {
        self.contacts
            .get(node_id)
            .cloned()
            .ok_or_else(|| AuditorError::ContactNotFound(node_id.to_string()))
    }
}
