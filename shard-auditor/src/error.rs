//! 審計節點統一錯誤類型定義
//!
//! 本模塊定義了分片審計過程中可能遇到的所有錯誤類型，
//! 使用 thiserror crate 提供良好的錯誤鏈和上下文信息。
//!
//! 錯誤的傳播範圍各不相同：
//! - 賬本讀取失敗、聯絡資訊缺失：中止單個節點的審計
//! - 協商失敗、傳輸失敗：僅影響單個分片，記錄為 `false`
//! - 任何錯誤都不會終止整個多節點運行

use thiserror::Error;

/// 審計節點錯誤類型
#[derive(Error, Debug)]
pub enum AuditorError {
    /// 賬本讀取失敗
    ///
    /// 不可視為「尚未審計」，該節點的審計必須中止
    #[error("Ledger read error: {0}")]
    LedgerRead(String),

    /// 賬本寫入失敗
    ///
    /// 節點保持未提交狀態，下次運行時重試
    #[error("Ledger write error: {0}")]
    LedgerWrite(String),

    /// 賬本中已存在該節點的條目
    #[error("Node {0} already has a ledger entry")]
    AlreadyAudited(String),

    /// 找不到節點的聯絡資訊
    #[error("Contact not found for node {0}")]
    ContactNotFound(String),

    /// 檢索指針協商失敗
    #[error("Retrieval pointer negotiation failed: {0}")]
    Negotiation(String),

    /// 檢索指針沒有可用的令牌
    #[error("Retrieval pointer has no usable token")]
    InvalidPointer,

    /// 分片傳輸失敗（流錯誤、HTTP 錯誤）
    #[error("Shard transfer failed: {0}")]
    Transfer(String),

    /// 操作超時
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// 無效的分片摘要
    #[error("Invalid shard digest: {0}")]
    InvalidDigest(String),

    /// 無效的節點標識
    #[error("Invalid node identity: {0}")]
    InvalidNodeId(String),

    /// 分片索引查詢失敗
    #[error("Shard index error: {0}")]
    Index(String),

    /// 配置錯誤
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP 請求錯誤
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// 序列化/反序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O 錯誤
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 通用錯誤
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AuditorError {
    /// 是否為暫時性錯誤（可重試）
    pub fn is_transient(&self) -> bool {
        match self {
            AuditorError::Timeout(_) => true,
            AuditorError::Index(_) => true,
            AuditorError::Negotiation(_) => true,
            AuditorError::HttpRequest(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Result 類型別名
pub type Result<T> = std::result::Result<T, AuditorError>;

/// 從 JSON 錯誤轉換
impl From<serde_json::Error> for AuditorError {
    fn from(err: serde_json::Error) -> Self {
        AuditorError::Serialization(err.to_string())
    }
}

/// 從 Bincode 錯誤轉換
impl From<bincode::Error> for AuditorError {
    fn from(err: bincode::Error) -> Self {
        AuditorError::Serialization(err.to_string())
    }
}
