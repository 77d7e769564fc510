//! 共享數據類型定義
//!
//! 本模塊定義分片審計中各個子系統共享的數據結構

use crate::error::{AuditorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 節點標識的字節長度（20 字節，40 個十六進制字符）
pub const NODE_ID_BYTES: usize = 20;

/// 存儲節點標識
///
/// 以小寫十六進制表示的 20 字節地址，作為賬本鍵和枚舉過濾條件
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = AuditorError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.len() != NODE_ID_BYTES * 2 {
            return Err(AuditorError::InvalidNodeId(format!(
                "expected {} hex characters, got {}: {:?}",
                NODE_ID_BYTES * 2,
                trimmed.len(),
                trimmed
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AuditorError::InvalidNodeId(format!(
                "non-hex characters in {:?}",
                trimmed
            )));
        }
        Ok(NodeId(trimmed.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for NodeId {
    type Error = AuditorError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 節點聯絡資訊
///
/// 由外部目錄提供，審計流程只關心其中的網絡地址和節點標識
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub address: String,

    pub port: u16,

    #[serde(rename = "nodeID")]
    pub node_id: NodeId,

    /// 協議版本等元數據，原樣轉發
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// 存儲合約
///
/// 將分片摘要綁定到節點，存儲窗口為 `[store_begin, store_end)`（Unix 毫秒）。
/// 其餘合約字段保存在 `extra` 中，協商時原樣轉發給橋接服務
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    #[serde(rename = "nodeID")]
    pub node_id: NodeId,

    pub data_hash: String,

    pub store_begin: i64,

    pub store_end: i64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Contract {
    /// 存儲窗口在 `now_ms` 時是否尚未結束
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.store_end >= now_ms
    }
}

/// 分片描述
///
/// 由分片枚舉器產生；同一分片可能有多份合約（副本）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    /// 預期內容摘要（十六進制，反序列化時統一為小寫）
    #[serde(deserialize_with = "deserialize_lowercase_hex")]
    pub hash: String,

    #[serde(default)]
    pub contracts: Vec<Contract>,
}

impl ShardDescriptor {
    /// 找到與指定節點相關的合約
    pub fn contract_for(&self, node_id: &NodeId) -> Option<&Contract> {
        self.contracts.iter().find(|c| &c.node_id == node_id)
    }

    /// 是否存在一份屬於 `node_id` 且在 `now_ms` 仍有效的合約
    pub fn has_active_contract(&self, node_id: &NodeId, now_ms: i64) -> bool {
        self.contracts
            .iter()
            .any(|c| &c.node_id == node_id && c.is_active_at(now_ms))
    }
}

/// 檢索指針
///
/// 短期有效，僅適用於一對 (contact, contract)。令牌缺失表示節點目前無法提供該分片
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalPointer {
    #[serde(default)]
    pub token: Option<String>,
}

impl RetrievalPointer {
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// 返回非空令牌（如有）
    pub fn usable_token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// 單個節點的審計結果：分片摘要 → 是否通過
pub type AuditResult = BTreeMap<String, bool>;

/// 分片抽樣模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// 枚舉所有匹配的分片
    Exhaustive,
    /// 每次運行從隨機摘要偏移量開始，只審計偏移量之後的分片
    #[default]
    RandomOffset,
}

impl FromStr for SamplingMode {
    type Err = AuditorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "exhaustive" => Ok(SamplingMode::Exhaustive),
            "random_offset" => Ok(SamplingMode::RandomOffset),
            other => Err(AuditorError::Config(format!(
                "Unknown sampling mode: {}",
                other
            ))),
        }
    }
}

/// 審計節點運行時配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
    /// 數據目錄（賬本與下載的分片）
    pub data_dir: PathBuf,

    /// 分片索引服務 API 端點
    pub index_url: String,

    /// 每次分頁查詢的分片數量
    pub index_page_size: usize,

    /// 可選：JSON 快照文件，設置後取代 HTTP 索引
    pub index_snapshot_path: Option<PathBuf>,

    /// 網絡橋接服務 JSON-RPC 端點
    pub bridge_rpc_url: String,

    pub bridge_rpc_user: Option<String>,

    pub bridge_rpc_password: Option<String>,

    /// 同時審計的節點數上限
    pub node_concurrency: usize,

    /// 每個節點同時進行中的分片驗證數上限
    pub shard_concurrency: usize,

    /// 檢索指針協商超時（秒）
    pub negotiation_timeout_secs: u64,

    /// 分片傳輸超時（秒）
    pub transfer_timeout_secs: u64,

    /// HTTP 請求超時（秒）
    pub http_timeout_secs: u64,

    /// 暫時性錯誤的最大重試次數
    pub max_retries: u32,

    pub sampling: SamplingMode,

    /// 要審計的節點標識
    pub nodes: Vec<String>,
}

impl AuditorConfig {
    /// 賬本數據庫文件路徑
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("statedb")
    }

    /// 分片下載根目錄
    pub fn shard_root(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// 解析配置中的節點列表
    pub fn node_ids(&self) -> Result<Vec<NodeId>> {
        self.nodes.iter().map(|s| s.parse()).collect()
    }
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_url: "http://127.0.0.1:6382".to_string(),
            index_page_size: 100,
            index_snapshot_path: None,
            bridge_rpc_url: "http://127.0.0.1:8080".to_string(),
            bridge_rpc_user: None,
            bridge_rpc_password: None,
            node_concurrency: 10,
            shard_concurrency: 10,
            negotiation_timeout_secs: 30,
            transfer_timeout_secs: 300,
            http_timeout_secs: 30,
            max_retries: 3,
            sampling: SamplingMode::default(),
            nodes: Vec::new(),
        }
    }
}

fn deserialize_lowercase_hex<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer).map(|hash| hash.to_ascii_lowercase())
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("shard-auditor"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// 解析節點列表文本
///
/// 每行一個節點標識；忽略空行與 `#` 註釋，重複項只保留第一次出現
pub fn parse_node_list(text: &str) -> Result<Vec<NodeId>> {
    let mut seen = HashSet::new();
    let mut nodes = Vec::new();

    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let node_id: NodeId = line.parse()?;
        if seen.insert(node_id.clone()) {
            nodes.push(node_id);
        }
    }

    Ok(nodes)
}
