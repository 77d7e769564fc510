//! 存儲節點客戶端模塊
//!
//! 負責從存儲節點直接下載分片字節:
//! - `GET http://{address}:{port}/shards/{digest}?token={token}`
//!
//! 響應體以流的形式返回，由調用方邊下載邊計算摘要並寫盤。
//! 整體傳輸超時由調用方控制，這裡只設置連接超時。

use crate::error::{AuditorError, Result};
use crate::network::ShardByteStream;
use crate::types::Contact;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info};

/// 存儲節點客戶端
///
/// 不綁定單個節點；每次下載根據聯絡資訊構造 URL
#[derive(Clone)]
pub struct StorageNodeClient {
    http_client: Client,
    connect_timeout: Duration,
}

impl StorageNodeClient {
    /// 創建帶自定義連接超時的客戶端
    pub fn with_connect_timeout(connect_timeout_secs: u64) -> Result<Self> {
        let connect_timeout = Duration::from_secs(connect_timeout_secs);
        let http_client = Client::builder().connect_timeout(connect_timeout).build()?;

        info!(
            "Created StorageNodeClient (connect timeout: {}s)",
            connect_timeout_secs
        );

        Ok(Self {
            http_client,
            connect_timeout,
        })
    }

    /// 分片下載 URL
    pub fn shard_url(contact: &Contact, digest: &str) -> String {
        format!("http://{}:{}/shards/{}", contact.address, contact.port, digest)
    }

    /// 打開分片下載流
    ///
    /// # 返回
    /// - `Ok(ShardByteStream)`: HTTP 2xx，字節流
    /// - `Err(AuditorError::Transfer)`: 連接失敗或節點返回錯誤狀態
    pub async fn download_shard(
        &self,
        contact: &Contact,
        digest: &str,
        token: &str,
    ) -> Result<ShardByteStream> {
        let url = Self::shard_url(contact, digest);
        debug!("Downloading shard {} from {}", digest, url);

        let response = self
            .http_client
            .get(&url)
            .query(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    AuditorError::Transfer(format!(
                        "{}: connection failed after {:?} - {}",
                        url, self.connect_timeout, e
                    ))
                } else {
                    AuditorError::Transfer(format!("{}: {}", url, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditorError::Transfer(format!(
                "HTTP {}: {} from {}",
                status,
                status.canonical_reason().unwrap_or("Unknown"),
                url
            )));
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| AuditorError::Transfer(format!("stream interrupted: {}", e)));

        Ok(stream.boxed())
    }
}
