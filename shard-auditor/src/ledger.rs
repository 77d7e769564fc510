//! 審計完成賬本
//!
//! 以節點標識為鍵、`分片摘要 → 結果` 映射為值的持久化存儲。賬本同時是審計輸出
//! 和斷點續跑的依據：條目存在即表示該節點已完成審計，永不重跑。
//!
//! # 語義
//!
//! - `has` 必須區分「鍵不存在」（`Ok(false)`）與「讀取失敗」（`Err`）
//! - 每個鍵只寫入一次；重複提交返回 [`AuditorError::AlreadyAudited`]
//! - 本系統不會更新或刪除條目，重新審計只能由外部清除條目
//!
//! 默認實現基於 redb，值使用 bincode 編碼。

use crate::error::{AuditorError, Result};
use crate::types::{AuditResult, NodeId};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// 鍵: 節點標識（十六進制），值: bincode 編碼的 AuditResult
const AUDIT_LEDGER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_ledger");

/// 賬本存儲接口
#[async_trait]
pub trait Ledger: Send + Sync {
    /// 該節點是否已有條目
    async fn has(&self, node_id: &NodeId) -> Result<bool>;

    /// 一次性寫入節點的完整審計結果
    async fn commit(&self, node_id: &NodeId, result: &AuditResult) -> Result<()>;

    /// 讀取節點的審計結果
    async fn get(&self, node_id: &NodeId) -> Result<Option<AuditResult>>;

    /// 列出所有條目（按節點標識排序）
    async fn entries(&self) -> Result<Vec<(String, AuditResult)>>;
}

/// 基於 redb 的持久化賬本
#[derive(Clone)]
pub struct RedbLedger {
    db: Arc<Database>,
}

impl RedbLedger {
    /// 創建或打開賬本數據庫
    ///
    /// 父目錄不存在時自動創建
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| {
            AuditorError::LedgerRead(format!("Failed to open ledger {:?}: {}", path, e))
        })?;

        // 初始化表，之後的只讀事務才能打開它
        let write_txn = db
            .begin_write()
            .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;
        {
            write_txn
                .open_table(AUDIT_LEDGER_TABLE)
                .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;

        info!("Opened audit ledger at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    fn has_blocking(db: &Database, key: &str) -> Result<bool> {
        let read_txn = db
            .begin_read()
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;
        let table = read_txn
            .open_table(AUDIT_LEDGER_TABLE)
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;

        let found = table
            .get(key)
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?
            .is_some();
        Ok(found)
    }

    fn get_blocking(db: &Database, key: &str) -> Result<Option<AuditResult>> {
        let read_txn = db
            .begin_read()
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;
        let table = read_txn
            .open_table(AUDIT_LEDGER_TABLE)
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;

        let result = match table
            .get(key)
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?
        {
            Some(value) => Some(bincode::deserialize::<AuditResult>(value.value())?),
            None => None,
        };
        Ok(result)
    }

    fn commit_blocking(db: &Database, key: &str, encoded: &[u8]) -> Result<()> {
        let write_txn = db
            .begin_write()
            .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(AUDIT_LEDGER_TABLE)
                .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;

            let exists = table
                .get(key)
                .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?
                .is_some();
            if exists {
                return Err(AuditorError::AlreadyAudited(key.to_string()));
            }

            table
                .insert(key, encoded)
                .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| AuditorError::LedgerWrite(e.to_string()))?;
        Ok(())
    }

    fn entries_blocking(db: &Database) -> Result<Vec<(String, AuditResult)>> {
        let read_txn = db
            .begin_read()
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;
        let table = read_txn
            .open_table(AUDIT_LEDGER_TABLE)
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?;

        let mut entries = Vec::new();
        for item in table
            .iter()
            .map_err(|e| AuditorError::LedgerRead(e.to_string()))?
        {
            let (key, value) = item.map_err(|e| AuditorError::LedgerRead(e.to_string()))?;
            let result: AuditResult = bincode::deserialize(value.value())?;
            entries.push((key.value().to_string(), result));
        }
        Ok(entries)
    }
}

#[async_trait]
impl Ledger for RedbLedger {
    async fn has(&self, node_id: &NodeId) -> Result<bool> {
        let db = self.db.clone();
        let key = node_id.to_string();
        tokio::task::spawn_blocking(move || Self::has_blocking(&db, &key))
            .await
            .map_err(|e| AuditorError::LedgerRead(format!("ledger task failed: {}", e)))?
    }

    async fn commit(&self, node_id: &NodeId, result: &AuditResult) -> Result<()> {
        let encoded = bincode::serialize(result)?;
        let db = self.db.clone();
        let key = node_id.to_string();

        tokio::task::spawn_blocking(move || Self::commit_blocking(&db, &key, &encoded))
            .await
            .map_err(|e| AuditorError::LedgerWrite(format!("ledger task failed: {}", e)))??;

        debug!("Committed {} shard result(s) for node {}", result.len(), node_id);
        Ok(())
    }

    async fn get(&self, node_id: &NodeId) -> Result<Option<AuditResult>> {
        let db = self.db.clone();
        let key = node_id.to_string();
        tokio::task::spawn_blocking(move || Self::get_blocking(&db, &key))
            .await
            .map_err(|e| AuditorError::LedgerRead(format!("ledger task failed: {}", e)))?
    }

    async fn entries(&self) -> Result<Vec<(String, AuditResult)>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || Self::entries_blocking(&db))
            .await
            .map_err(|e| AuditorError::LedgerRead(format!("ledger task failed: {}", e)))?
    }
}
