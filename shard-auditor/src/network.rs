//! 存儲網絡客戶端接口
//!
//! 審計流程只依賴兩個網絡操作：協商檢索指針、以令牌下載分片字節流。
//! [`NetworkGateway`] 將橋接服務（協商）與存儲節點（下載）組合成一個實現。

use crate::bridge_client::BridgeClient;
use crate::error::Result;
use crate::storage_node_client::StorageNodeClient;
use crate::types::{Contact, Contract, RetrievalPointer};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

/// 分片字節流
pub type ShardByteStream = BoxStream<'static, Result<Bytes>>;

#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// 為一對 (contact, contract) 獲取檢索指針
    async fn get_retrieval_pointer(
        &self,
        contact: &Contact,
        contract: &Contract,
    ) -> Result<RetrievalPointer>;

    /// 以令牌打開分片下載流
    async fn open_shard_download(
        &self,
        contact: &Contact,
        digest: &str,
        token: &str,
    ) -> Result<ShardByteStream>;
}

/// 橋接服務 + 存儲節點
#[derive(Clone)]
pub struct NetworkGateway {
    bridge: BridgeClient,
    storage: StorageNodeClient,
}

impl NetworkGateway {
    pub fn new(bridge: BridgeClient, storage: StorageNodeClient) -> Self {
        Self { bridge, storage }
    }
}

#[async_trait]
impl NetworkClient for NetworkGateway {
    async fn get_retrieval_pointer(
        &self,
        contact: &Contact,
        contract: &Contract,
    ) -> Result<RetrievalPointer> {
        self.bridge.get_retrieval_pointer(contact, contract).await
    }

    async fn open_shard_download(
        &self,
        contact: &Contact,
        digest: &str,
        token: &str,
    ) -> Result<ShardByteStream> {
        self.storage.download_shard(contact, digest, token).await
    }
}
