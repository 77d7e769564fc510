//! 存儲索引服務客戶端
//!
//! 通過 REST API 查詢分片索引和節點聯絡資訊：
//! - `GET /contacts/{nodeID}` - 查找聯絡資訊（404 表示不存在）
//! - `GET /shards?nodeID=&storeEndGte=&hashGte=&limit=&after=` - 分頁查詢分片
//!
//! 分頁響應格式為 `{ "shards": [...], "next": "<cursor>" }`，`next` 缺失表示最後一頁。
//! 分片流只有在被輪詢時才拉取下一頁。

use crate::error::{AuditorError, Result};
use crate::index::{ContactDirectory, ShardIndex, ShardQuery, ShardStream};
use crate::retry::{retry_with_exponential_backoff, RetryConfig};
use crate::types::{Contact, NodeId, ShardDescriptor};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// 單頁查詢結果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardPage {
    #[serde(default)]
    pub shards: Vec<ShardDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

/// 存儲索引服務客戶端
#[derive(Clone)]
pub struct HttpIndexClient {
    http_client: Client,
    base_url: String,
    page_size: usize,
    retry: RetryConfig,
}

impl HttpIndexClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64, page_size: usize) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        info!(
            "Created HttpIndexClient for {} (page size: {})",
            base_url, page_size
        );

        Ok(Self {
            http_client,
            base_url,
            page_size: page_size.max(1),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 拉取一頁分片
    async fn fetch_page(&self, query: &ShardQuery, after: Option<&str>) -> Result<ShardPage> {
        let url = format!("{}/shards", self.base_url);

        let mut params: Vec<(&str, String)> = vec![
            ("nodeID", query.node_id.to_string()),
            ("storeEndGte", query.store_end_gte.to_string()),
            ("limit", self.page_size.to_string()),
        ];
        if let Some(offset) = &query.hash_gte {
            params.push(("hashGte", offset.clone()));
        }
        if let Some(cursor) = after {
            params.push(("after", cursor.to_string()));
        }

        debug!("Fetching shard page for node {} (after: {:?})", query.node_id, after);

        let response = self
            .http_client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| AuditorError::Index(format!("{}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(if status.is_server_error() {
                AuditorError::Index(format!("HTTP {} from {}", status, url))
            } else {
                AuditorError::Other(anyhow::anyhow!("shard index rejected query: HTTP {}", status))
            });
        }

        let page = response
            .json::<ShardPage>()
            .await
            .map_err(|e| AuditorError::Serialization(format!("Failed to parse shard page: {}", e)))?;

        debug!("Received {} shard(s), next: {:?}", page.shards.len(), page.next);
        Ok(page)
    }
}

/// 分頁游標狀態
enum Cursor {
    Start,
    After(String),
    Exhausted,
}

#[async_trait]
impl ShardIndex for HttpIndexClient {
    async fn query(&self, query: ShardQuery) -> Result<ShardStream> {
        let client = self.clone();

        let pages = stream::try_unfold(Cursor::Start, move |cursor| {
            let client = client.clone();
            let query = query.clone();
            async move {
                let after = match cursor {
                    Cursor::Exhausted => return Ok::<_, AuditorError>(None),
                    Cursor::Start => None,
                    Cursor::After(token) => Some(token),
                };

                let (client_ref, query_ref, after_ref) = (&client, &query, after.as_deref());
                let page =
                    retry_with_exponential_backoff("fetch_shard_page", &client.retry, || {
                        client_ref.fetch_page(query_ref, after_ref)
                    })
                    .await?;

                let next = match page.next {
                    Some(token) if !page.shards.is_empty() => Cursor::After(token),
                    _ => Cursor::Exhausted,
                };
                Ok(Some((page.shards, next)))
            }
        });

        let shards = pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, AuditorError>)))
            .try_flatten();

        Ok(shards.boxed())
    }
}

#[async_trait]
impl ContactDirectory for HttpIndexClient {
    async fn find_contact(&self, node_id: &NodeId) -> Result<Contact> {
        let url = format!("{}/contacts/{}", self.base_url, node_id);
        let url = url.as_str();
        let http_client = &self.http_client;

        retry_with_exponential_backoff("find_contact", &self.retry, || async move {
            let response = http_client
                .get(url)
                .send()
                .await
                .map_err(|e| AuditorError::Index(format!("{}: {}", url, e)))?;

            match response.status() {
                StatusCode::NOT_FOUND => Err(AuditorError::ContactNotFound(node_id.to_string())),
                status if status.is_server_error() => {
                    Err(AuditorError::Index(format!("HTTP {} from {}", status, url)))
                }
                status if !status.is_success() => Err(AuditorError::Other(anyhow::anyhow!(
                    "contact lookup rejected: HTTP {}",
                    status
                ))),
                _ => response.json::<Contact>().await.map_err(|e| {
                    AuditorError::Serialization(format!("Failed to parse contact: {}", e))
                }),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_url() {
        let client = HttpIndexClient::new("http://localhost:6382/", 5, 0).unwrap();
        assert_eq!(client.base_url(), "http://localhost:6382");
        assert_eq!(client.page_size, 1);
    }

    #[test]
    fn test_page_without_next() {
        let page: ShardPage = serde_json::from_str(r#"{"shards": []}"#).unwrap();
        assert!(page.shards.is_empty());
        assert!(page.next.is_none());
    }
}
