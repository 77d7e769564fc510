//! 審計結果匯總與導出
//!
//! - [`NodeAuditOutcome`] / [`RunSummary`]: 一次多節點運行的結果匯總，用於日誌
//! - [`export_ledger_json`] / [`load_ledger_json`]: 將賬本導出為 JSON 供離線檢查
//!
//! 單個分片的失敗不會出現在匯總的錯誤中：賬本裡的 `false` 就是失敗信號。

use crate::error::{AuditorError, Result};
use crate::ledger::Ledger;
use crate::types::{AuditResult, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

/// 單個節點審計的終止狀態
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeAuditOutcome {
    /// 賬本中已有條目，跳過
    Skipped,
    /// 已提交到賬本
    Audited { shards: usize, passed: usize },
    /// 賬本讀取失敗、聯絡資訊缺失或枚舉失敗；未提交任何內容
    Aborted { reason: String },
    /// 賬本寫入失敗；節點仍可在下次運行時審計
    CommitFailed { reason: String },
}

/// 一次運行的匯總
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub outcomes: Vec<(NodeId, NodeAuditOutcome)>,
}

impl RunSummary {
    pub fn record(&mut self, node_id: NodeId, outcome: NodeAuditOutcome) {
        self.outcomes.push((node_id, outcome));
    }

    pub fn outcome(&self, node_id: &NodeId) -> Option<&NodeAuditOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == node_id)
            .map(|(_, outcome)| outcome)
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, NodeAuditOutcome::Skipped))
    }

    pub fn audited(&self) -> usize {
        self.count(|o| matches!(o, NodeAuditOutcome::Audited { .. }))
    }

    pub fn aborted(&self) -> usize {
        self.count(|o| matches!(o, NodeAuditOutcome::Aborted { .. }))
    }

    pub fn commit_failures(&self) -> usize {
        self.count(|o| matches!(o, NodeAuditOutcome::CommitFailed { .. }))
    }

    /// 已審計節點的分片總數與通過數
    pub fn shard_totals(&self) -> (usize, usize) {
        self.outcomes
            .iter()
            .fold((0, 0), |(total, ok), (_, outcome)| match outcome {
                NodeAuditOutcome::Audited { shards, passed } => (total + shards, ok + passed),
                _ => (total, ok),
            })
    }

    fn count(&self, pred: impl Fn(&NodeAuditOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    /// 將匯總寫入日誌
    pub fn log(&self) {
        let (shards, passed) = self.shard_totals();
        info!(
            "Run finished: {} node(s): {} audited, {} skipped, {} aborted, {} commit failure(s); {}/{} shard(s) passed",
            self.outcomes.len(),
            self.audited(),
            self.skipped(),
            self.aborted(),
            self.commit_failures(),
            passed,
            shards
        );

        for (node_id, outcome) in &self.outcomes {
            match outcome {
                NodeAuditOutcome::Aborted { reason } => {
                    error!("Node {} aborted: {}", node_id, reason)
                }
                NodeAuditOutcome::CommitFailed { reason } => {
                    error!("Node {} left uncommitted: {}", node_id, reason)
                }
                NodeAuditOutcome::Audited { shards, passed } if passed < shards => {
                    warn!("Node {}: {}/{} shard(s) passed", node_id, passed, shards)
                }
                _ => {}
            }
        }
    }
}

/// 將賬本所有條目導出為 JSON（`{ nodeID: { digest: bool } }`）
pub async fn export_ledger_json(ledger: &dyn Ledger, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let entries: BTreeMap<String, AuditResult> = ledger.entries().await?.into_iter().collect();

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(&entries)?;
    fs::write(path, json)?;

    info!("Exported {} ledger entr(ies) to {:?}", entries.len(), path);
    Ok(entries.len())
}

/// 加載導出的 JSON
pub fn load_ledger_json(path: impl AsRef<Path>) -> Result<BTreeMap<String, AuditResult>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        AuditorError::Serialization(format!("Failed to read {:?}: {}", path, e))
    })?;
    Ok(serde_json::from_str(&content)?)
}
