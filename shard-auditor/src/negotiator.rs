//! 檢索指針協商
//!
//! 在獨立超時內向網絡請求檢索指針，暫時性錯誤按指數退避重試。
//! 超時覆蓋包括重試在內的整個協商過程。
//!
//! 沒有令牌的指針不是錯誤：它表示節點目前無法提供該分片，由調用方記錄為失敗。

use crate::error::Result;
use crate::network::NetworkClient;
use crate::retry::{retry_with_exponential_backoff, with_timeout, RetryConfig};
use crate::types::{Contact, Contract, RetrievalPointer};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct RetrievalNegotiator {
    network: Arc<dyn NetworkClient>,
    timeout: Duration,
    retry: RetryConfig,
}

impl RetrievalNegotiator {
    pub fn new(network: Arc<dyn NetworkClient>, timeout: Duration, retry: RetryConfig) -> Self {
        Self {
            network,
            timeout,
            retry,
        }
    }

    /// 協商檢索指針
    pub async fn negotiate(&self, contact: &Contact, contract: &Contract) -> Result<RetrievalPointer> {
        let network = self.network.as_ref();

        let pointer = with_timeout(
            "retrieval pointer negotiation",
            self.timeout,
            retry_with_exponential_backoff("get_retrieval_pointer", &self.retry, || {
                network.get_retrieval_pointer(contact, contract)
            }),
        )
        .await?;

        debug!(
            "Negotiated pointer for shard {} on node {} (token: {})",
            contract.data_hash,
            contact.node_id,
            if pointer.usable_token().is_some() { "present" } else { "absent" }
        );

        Ok(pointer)
    }
}
