//! 網絡橋接服務客戶端
//!
//! 通過 JSON-RPC 2.0 向橋接服務請求檢索指針：
//!
//! ```text
//! POST {rpc_url}
//! { "jsonrpc": "2.0", "id": <n>, "method": "getRetrievalPointer", "params": [contact, contract] }
//! ```
//!
//! 響應的 `result` 為 `{ "token": "..." }` 或 `null`；`null` 與缺失令牌都是合法結果，
//! 表示節點目前無法提供該分片。

use crate::error::{AuditorError, Result};
use crate::types::{Contact, Contract, RetrievalPointer};
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const GET_RETRIEVAL_POINTER: &str = "getRetrievalPointer";

#[derive(Serialize, Debug)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (&'a Contact, &'a Contract),
}

#[derive(Deserialize, Debug)]
struct RpcResponse {
    #[serde(default)]
    result: Option<RetrievalPointer>,

    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize, Debug)]
struct RpcError {
    #[serde(default)]
    code: i64,

    #[serde(default)]
    message: String,
}

/// 橋接服務認證資訊
#[derive(Debug, Clone)]
pub struct BridgeCredentials {
    pub user: String,
    pub password: Option<String>,
}

#[derive(Clone)]
pub struct BridgeClient {
    http_client: Client,
    rpc_url: String,
    credentials: Option<BridgeCredentials>,
}

impl BridgeClient {
    pub fn new(
        rpc_url: impl Into<String>,
        credentials: Option<BridgeCredentials>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        let rpc_url = rpc_url.into();

        info!("Created BridgeClient for {}", rpc_url);

        Ok(Self {
            http_client,
            rpc_url,
            credentials,
        })
    }

    /// 請求檢索指針
    pub async fn get_retrieval_pointer(
        &self,
        contact: &Contact,
        contract: &Contract,
    ) -> Result<RetrievalPointer> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: rand::thread_rng().gen(),
            method: GET_RETRIEVAL_POINTER,
            params: (contact, contract),
        };

        debug!(
            "Requesting retrieval pointer from {} for shard {} on node {}",
            self.rpc_url, contract.data_hash, contact.node_id
        );

        let mut builder = self.http_client.post(&self.rpc_url).json(&request);
        if let Some(creds) = &self.credentials {
            builder = builder.basic_auth(&creds.user, creds.password.as_ref());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AuditorError::Timeout(format!("{}: {}", self.rpc_url, e))
            } else {
                AuditorError::Negotiation(format!("{}: {}", self.rpc_url, e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuditorError::Negotiation(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let rpc: RpcResponse = response.json().await.map_err(|e| {
            AuditorError::Serialization(format!("Failed to parse bridge response: {}", e))
        })?;

        if let Some(err) = rpc.error {
            return Err(AuditorError::Negotiation(format!(
                "bridge error {}: {}",
                err.code, err.message
            )));
        }

        Ok(rpc.result.unwrap_or_default())
    }
}
