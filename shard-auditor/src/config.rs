//! 配置管理模塊
//!
//! 負責加載和驗證審計節點配置

use crate::error::{AuditorError, Result};
use crate::types::{AuditorConfig, NodeId};
use config::{Config, File};
use std::path::Path;

/// 從配置文件加載審計員配置
///
/// # 參數
/// - `config_path`: 配置文件路徑（支持 TOML、JSON、YAML）
///
/// 未在文件中出現的字段使用 [`AuditorConfig::default`] 的值。
///
/// # 示例
/// ```no_run
/// use shard_auditor::config::load_config;
///
/// let config = load_config("config.toml").expect("Failed to load config");
/// println!("Index: {}", config.index_url);
/// ```
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<AuditorConfig> {
    let config = Config::builder()
        .add_source(File::from(config_path.as_ref()))
        .build()
        .map_err(|e| AuditorError::Config(format!("Failed to load config file: {}", e)))?;

    let auditor_config: AuditorConfig = config
        .try_deserialize()
        .map_err(|e| AuditorError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&auditor_config)?;

    Ok(auditor_config)
}

/// 從環境變量加載配置（用於容器化部署）
///
/// 環境變量前綴: `SHARD_AUDITOR_`
/// 示例: `SHARD_AUDITOR_INDEX_URL`, `SHARD_AUDITOR_NODE_CONCURRENCY`
pub fn load_config_from_env() -> Result<AuditorConfig> {
    let config = Config::builder()
        .add_source(
            config::Environment::with_prefix("SHARD_AUDITOR")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("nodes"),
        )
        .build()
        .map_err(|e| AuditorError::Config(format!("Failed to load env vars: {}", e)))?;

    let auditor_config: AuditorConfig = config
        .try_deserialize()
        .map_err(|e| AuditorError::Config(format!("Failed to parse env config: {}", e)))?;

    validate_config(&auditor_config)?;

    Ok(auditor_config)
}

/// 驗證配置的有效性
///
/// 檢查:
/// - 並發上限與超時必須大於 0
/// - URL 格式是否正確
/// - 節點標識是否可解析
pub fn validate_config(config: &AuditorConfig) -> Result<()> {
    if config.node_concurrency == 0 {
        return Err(AuditorError::Config(
            "node_concurrency must be greater than 0".to_string(),
        ));
    }

    if config.shard_concurrency == 0 {
        return Err(AuditorError::Config(
            "shard_concurrency must be greater than 0".to_string(),
        ));
    }

    if config.index_page_size == 0 {
        return Err(AuditorError::Config(
            "index_page_size must be greater than 0".to_string(),
        ));
    }

    if config.negotiation_timeout_secs == 0
        || config.transfer_timeout_secs == 0
        || config.http_timeout_secs == 0
    {
        return Err(AuditorError::Config("timeouts must be greater than 0".to_string()));
    }

    // 使用快照時不需要索引服務
    if config.index_snapshot_path.is_none() && !is_http_url(&config.index_url) {
        return Err(AuditorError::Config(format!(
            "Invalid index URL: {}",
            config.index_url
        )));
    }

    if !is_http_url(&config.bridge_rpc_url) {
        return Err(AuditorError::Config(format!(
            "Invalid bridge RPC URL: {}",
            config.bridge_rpc_url
        )));
    }

    if config.bridge_rpc_password.is_some() && config.bridge_rpc_user.is_none() {
        return Err(AuditorError::Config(
            "bridge_rpc_password provided without bridge_rpc_user".to_string(),
        ));
    }

    for node in &config.nodes {
        node.parse::<NodeId>()?;
    }

    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
