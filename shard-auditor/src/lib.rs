//! 分佈式存儲網絡分片審計器
//!
//! 本 crate 實現了一個可斷點續跑的審計工具，負責:
//! 1. 為每個存儲節點枚舉仍在存儲窗口內的分片
//! 2. 協商檢索指針並流式下載分片
//! 3. 以 SHA-256 驗證下載內容與分片摘要一致
//! 4. 將每個節點的完整結果一次性寫入持久化賬本，已審計節點永不重跑
//!
//! # 架構
//!
//! ```text
//! ┌──────────────┐
//! │   Auditor    │  ← 節點狀態機與有界並發
//! └──────┬───────┘
//!        │
//!   ┌────┴─────┬────────────┬─────────────┬────────────┐
//!   ▼          ▼            ▼             ▼            ▼
//! Ledger   Contact      Shard         ShardWorker   Report
//! (redb)   Directory    Enumerator    ├ Negotiator
//!                       (ShardIndex)  └ Verifier ──▶ ShardPathResolver
//! ```
//!
//! # 示例用法
//!
//! ```no_run
//! use shard_auditor::{config::load_config, Auditor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("config.toml")?;
//!     let auditor = Auditor::from_config(&config)?;
//!
//!     let summary = auditor.run(config.node_ids()?).await;
//!     println!("Audited {} node(s)", summary.audited());
//!
//!     Ok(())
//! }
//! ```

// 公開模塊
pub mod auditor;
pub mod bridge_client; // JSON-RPC 檢索指針協商
pub mod config;
pub mod digest;
pub mod enumerator;
pub mod error;
pub mod index;
pub mod index_client; // 分頁 REST 索引
pub mod ledger;
pub mod negotiator;
pub mod network;
pub mod report;
pub mod retry;
pub mod shard_path;
pub mod storage_node_client;
pub mod types;
pub mod worker;

// Re-export 常用類型
pub use auditor::Auditor;
pub use error::{AuditorError, Result};
pub use report::{NodeAuditOutcome, RunSummary};
pub use types::{AuditResult, AuditorConfig, NodeId, SamplingMode, ShardDescriptor};
