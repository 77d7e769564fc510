//! 網絡請求重試機制模組
//!
//! 實現指數退避（Exponential Backoff）策略，用於處理臨時網絡故障。
//! 只有被判定為暫時性的錯誤才會重試；聯絡資訊缺失、序列化錯誤等立即返回。

use crate::error::{AuditorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 重試配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重試次數
    pub max_retries: u32,
    /// 初始延遲時間（毫秒）
    pub initial_delay_ms: u64,
    /// 延遲增長倍數
    pub multiplier: f64,
    /// 最大延遲時間（毫秒）
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 10000,
        }
    }
}

impl RetryConfig {
    /// 使用指定的重試次數，其餘參數取默認值
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// 不重試
    pub fn none() -> Self {
        Self::with_max_retries(0)
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        (((delay_ms as f64) * self.multiplier) as u64).min(self.max_delay_ms)
    }
}

/// 使用指數退避策略重試操作
///
/// # 參數
///
/// * `operation_name` - 操作名稱（用於日誌）
/// * `config` - 重試配置
/// * `operation` - 要重試的異步操作
///
/// 只重試 [`AuditorError::is_transient`] 為真的錯誤。
///
/// # 範例
///
/// ```no_run
/// use shard_auditor::retry::{retry_with_exponential_backoff, RetryConfig};
///
/// # async fn example() -> shard_auditor::Result<()> {
/// let config = RetryConfig::default();
///
/// let value = retry_with_exponential_backoff("fetch_page", &config, || async {
///     Ok::<_, shard_auditor::AuditorError>(42)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_exponential_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 1;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Recovered after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            debug!(operation = operation_name, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation = operation_name,
                attempts = attempt,
                error = %err,
                "Giving up"
            );
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            delay_ms,
            error = %err,
            "Transient failure, backing off"
        );

        sleep(Duration::from_millis(delay_ms)).await;
        delay_ms = config.next_delay(delay_ms);
        attempt += 1;
    }
}

/// 將 `tokio::time::timeout` 的超時轉為 [`AuditorError::Timeout`]
pub async fn with_timeout<T, Fut>(what: &str, limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AuditorError::Timeout(format!(
            "{} exceeded {:?}",
            what, limit
        ))),
    }
}
